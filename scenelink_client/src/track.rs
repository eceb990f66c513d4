//! Location tracks.
//!
//! Render-location data arrives as one position per sampled frame. A renderer
//! running on its own clock (an audio renderer, say) wants a position at an
//! arbitrary time instead, so the samples are spaced at `1 / fps` seconds and
//! interpolated linearly between neighbours.

use scenelink_shared::math::Vec3;

/// Time-indexed sequence of positions.
#[derive(Debug, Clone, PartialEq)]
pub struct LocationTrack {
    locations: Vec<Vec3>,
    fps: f32,
}

impl LocationTrack {
    /// `fps` must be positive; non-positive rates collapse the track onto its
    /// first sample.
    pub fn new(locations: Vec<Vec3>, fps: f32) -> Self {
        Self { locations, fps }
    }

    pub fn len(&self) -> usize {
        self.locations.len()
    }

    pub fn is_empty(&self) -> bool {
        self.locations.is_empty()
    }

    pub fn fps(&self) -> f32 {
        self.fps
    }

    /// Length of the track in seconds; the last sample sits at this time.
    pub fn duration(&self) -> f32 {
        if self.locations.len() < 2 || self.fps <= 0.0 {
            return 0.0;
        }
        (self.locations.len() - 1) as f32 / self.fps
    }

    pub fn locations(&self) -> &[Vec3] {
        &self.locations
    }

    /// Position at `secs`, held at the first/last sample outside the track.
    pub fn location_at_time(&self, secs: f32) -> Option<Vec3> {
        let first = *self.locations.first()?;
        if self.fps <= 0.0 || !secs.is_finite() || secs <= 0.0 {
            return Some(first);
        }
        let pos = secs * self.fps;
        let last = self.locations.len() - 1;
        let index = pos.floor() as usize;
        if index >= last {
            return self.locations.last().copied();
        }
        let a = self.locations[index];
        let b = self.locations[index + 1];
        Some(a.lerp(b, pos - index as f32))
    }
}
