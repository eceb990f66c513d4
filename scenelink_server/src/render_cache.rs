//! Render-mode location cache.
//!
//! While the host renders, clients pull whole location sequences instead of
//! live updates. One computation steps the scene through a frame range and
//! records the camera-space location of every registered object at each
//! frame; the result is kept per `(start, end)` range until the registered
//! set changes.

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use scenelink_shared::math::{CameraView, Vec3};
use tracing::{debug, warn};

use crate::registry::ObjectRegistry;
use crate::scene::Scene;

/// Location sequences keyed by object id, one entry per frame of the range.
pub type LocationTable = HashMap<u16, Vec<Vec3>>;

/// Rejected frame ranges.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RenderRangeError {
    EndBeforeStart { start: u64, end: u64 },
    PastEnd { end: u64, frame_count: u64 },
}

impl fmt::Display for RenderRangeError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RenderRangeError::EndBeforeStart { start, end } => {
                write!(f, "end frame {end} is before start frame {start}")
            }
            RenderRangeError::PastEnd { end, frame_count } => {
                write!(f, "end frame {end} is past the last frame ({frame_count})")
            }
        }
    }
}

impl std::error::Error for RenderRangeError {}

/// Restores the scene's frame when dropped, so an early return or a panic
/// during sampling does not leave the host on some other frame.
struct FrameGuard<'a, S: Scene + ?Sized> {
    scene: &'a mut S,
    original: i64,
}

impl<'a, S: Scene + ?Sized> FrameGuard<'a, S> {
    fn new(scene: &'a mut S) -> Self {
        let original = scene.current_frame();
        Self { scene, original }
    }
}

impl<S: Scene + ?Sized> Drop for FrameGuard<'_, S> {
    fn drop(&mut self) {
        self.scene.set_frame(self.original);
    }
}

/// Cache of computed [`LocationTable`]s.
#[derive(Debug, Default)]
pub struct RenderLocationCache {
    entries: HashMap<(u64, u64), Arc<LocationTable>>,
    /// Registry generation the entries were computed against.
    generation: Option<u64>,
    computations: u64,
    hits: u64,
}

impl RenderLocationCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Drops every cached table.
    pub fn invalidate(&mut self) {
        if !self.entries.is_empty() {
            debug!(ranges = self.entries.len(), "render cache invalidated");
        }
        self.entries.clear();
        self.generation = None;
    }

    /// Number of range computations performed (cache misses).
    pub fn computations(&self) -> u64 {
        self.computations
    }

    pub fn hits(&self) -> u64 {
        self.hits
    }

    /// Number of cached ranges.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Returns the location table for frames `start..=end`, computing it on a
    /// miss.
    ///
    /// Frame numbers index sampled frames from 0 (see
    /// [`crate::scene::Timeline::scene_frame`]). `end` may equal the frame
    /// count. Without an active camera every sequence is all zeros.
    pub fn get_or_compute<S: Scene + ?Sized>(
        &mut self,
        scene: &mut S,
        registry: &mut ObjectRegistry,
        start: u64,
        end: u64,
    ) -> Result<Arc<LocationTable>, RenderRangeError> {
        if end < start {
            return Err(RenderRangeError::EndBeforeStart { start, end });
        }
        let frame_count = scene.timeline().frame_count();
        if end > frame_count {
            return Err(RenderRangeError::PastEnd { end, frame_count });
        }

        if self.generation != Some(registry.generation()) {
            self.invalidate();
        }
        if let Some(table) = self.entries.get(&(start, end)) {
            self.hits += 1;
            return Ok(Arc::clone(table));
        }

        let table = Arc::new(compute(scene, registry, start, end));
        self.computations += 1;
        // Sampling may have dropped deleted objects, which bumps the
        // generation; tag the entry with the state it actually reflects.
        self.generation = Some(registry.generation());
        self.entries.insert((start, end), Arc::clone(&table));
        debug!(start, end, objects = table.len(), "render locations computed");
        Ok(table)
    }
}

fn compute<S: Scene + ?Sized>(
    scene: &mut S,
    registry: &mut ObjectRegistry,
    start: u64,
    end: u64,
) -> LocationTable {
    let len = (end - start + 1) as usize;

    if scene.camera_world_matrix().is_none() {
        return registry.ids().map(|id| (id, vec![Vec3::ZERO; len])).collect();
    }

    let timeline = scene.timeline();
    let mut table = LocationTable::new();
    {
        let guard = FrameGuard::new(scene);
        for index in start..=end {
            guard.scene.set_frame(timeline.scene_frame(index));
            let camera = guard
                .scene
                .camera_world_matrix()
                .and_then(|m| CameraView::from_camera_world(&m));
            let samples = match camera {
                Some(camera) => registry.sample_locations(&mut *guard.scene, &camera),
                None => {
                    warn!(frame = index, "camera not invertible; recording zeros");
                    registry.ids().map(|id| (id, Vec3::ZERO)).collect()
                }
            };
            for (id, location) in samples {
                table
                    .entry(id)
                    .or_insert_with(|| Vec::with_capacity(len))
                    .push(location);
            }
        }
    }

    // Objects deleted part way through have short sequences; drop them
    // along with anything no longer registered.
    table.retain(|id, seq| seq.len() == len && registry.contains(*id));
    table
}

#[cfg(test)]
mod tests {
    use scenelink_shared::math::Mat4;

    use super::*;
    use crate::identity::IdentityCallbacks;
    use crate::memory_scene::InMemoryScene;
    use crate::scene::Timeline;

    fn animated_scene() -> InMemoryScene {
        let mut scene = InMemoryScene::new(Timeline {
            frame_start: 1,
            frame_end: 10,
            ..Default::default()
        });
        scene.set_camera(Some(Mat4::IDENTITY));
        let ball = scene.add_object("Ball", Vec3::ZERO);
        scene.insert_keyframe(ball, 1, Vec3::new(0.0, 0.0, 0.0));
        scene.insert_keyframe(ball, 10, Vec3::new(9.0, 0.0, 0.0));
        scene.add_object("Light", Vec3::new(0.0, 0.0, -2.0));
        scene
    }

    fn registry(scene: &mut InMemoryScene) -> ObjectRegistry {
        ObjectRegistry::new(scene, IdentityCallbacks::new(|_, _| {}, |_| {}))
    }

    #[test]
    fn computes_sequences_in_camera_space() {
        let mut scene = animated_scene();
        let mut reg = registry(&mut scene);
        let ball = reg.register_sub(&mut scene, "Ball").unwrap();
        let light = reg.register_sub(&mut scene, "Light").unwrap();
        let mut cache = RenderLocationCache::new();

        let table = cache.get_or_compute(&mut scene, &mut reg, 0, 3).unwrap();
        assert_eq!(table[&ball].len(), 4);
        assert!((table[&ball][2].x - 2.0).abs() < 1e-5);
        assert_eq!(table[&light], vec![Vec3::new(0.0, 0.0, 2.0); 4]);
    }

    #[test]
    fn restores_the_current_frame() {
        let mut scene = animated_scene();
        scene.set_frame(7);
        let mut reg = registry(&mut scene);
        reg.register_sub(&mut scene, "Ball").unwrap();
        let mut cache = RenderLocationCache::new();

        cache.get_or_compute(&mut scene, &mut reg, 0, 9).unwrap();
        assert_eq!(scene.current_frame(), 7);
    }

    #[test]
    fn repeated_ranges_hit_the_cache() {
        let mut scene = animated_scene();
        let mut reg = registry(&mut scene);
        reg.register_sub(&mut scene, "Ball").unwrap();
        let mut cache = RenderLocationCache::new();

        let a = cache.get_or_compute(&mut scene, &mut reg, 0, 4).unwrap();
        let queries = scene.location_queries();
        let b = cache.get_or_compute(&mut scene, &mut reg, 0, 4).unwrap();
        assert!(Arc::ptr_eq(&a, &b));
        assert_eq!(scene.location_queries(), queries);
        assert_eq!((cache.computations(), cache.hits()), (1, 1));
    }

    #[test]
    fn registration_changes_invalidate() {
        let mut scene = animated_scene();
        let mut reg = registry(&mut scene);
        reg.register_sub(&mut scene, "Ball").unwrap();
        let mut cache = RenderLocationCache::new();

        cache.get_or_compute(&mut scene, &mut reg, 0, 4).unwrap();
        let light = reg.register_sub(&mut scene, "Light").unwrap();
        let table = cache.get_or_compute(&mut scene, &mut reg, 0, 4).unwrap();
        assert!(table.contains_key(&light));
        assert_eq!(cache.computations(), 2);
    }

    #[test]
    fn unregistering_invalidates() {
        let mut scene = animated_scene();
        let mut reg = registry(&mut scene);
        let ball = reg.register_sub(&mut scene, "Ball").unwrap();
        let light = reg.register_sub(&mut scene, "Light").unwrap();
        let mut cache = RenderLocationCache::new();

        let before = cache.get_or_compute(&mut scene, &mut reg, 0, 4).unwrap();
        assert!(before.contains_key(&light));
        assert!(reg.unregister_sub(&mut scene, light));
        let after = cache.get_or_compute(&mut scene, &mut reg, 0, 4).unwrap();
        assert_eq!(cache.computations(), 2);
        assert!(!after.contains_key(&light));
        assert_eq!(after[&ball], before[&ball]);
    }

    #[test]
    fn no_camera_yields_zeros() {
        let mut scene = animated_scene();
        scene.set_camera(None);
        let mut reg = registry(&mut scene);
        let ball = reg.register_sub(&mut scene, "Ball").unwrap();
        let mut cache = RenderLocationCache::new();

        let table = cache.get_or_compute(&mut scene, &mut reg, 2, 5).unwrap();
        assert_eq!(table[&ball], vec![Vec3::ZERO; 4]);
        assert_eq!(scene.frame_changes(), 0);
    }

    #[test]
    fn rejects_bad_ranges() {
        let mut scene = animated_scene();
        let mut reg = registry(&mut scene);
        let mut cache = RenderLocationCache::new();

        assert_eq!(
            cache.get_or_compute(&mut scene, &mut reg, 5, 4).unwrap_err(),
            RenderRangeError::EndBeforeStart { start: 5, end: 4 }
        );
        assert_eq!(
            cache.get_or_compute(&mut scene, &mut reg, 0, 11).unwrap_err(),
            RenderRangeError::PastEnd {
                end: 11,
                frame_count: 10
            }
        );
        assert!(cache.get_or_compute(&mut scene, &mut reg, 0, 10).is_ok());
    }

    #[test]
    fn invalidate_forces_recompute() {
        let mut scene = animated_scene();
        let mut reg = registry(&mut scene);
        reg.register_sub(&mut scene, "Ball").unwrap();
        let mut cache = RenderLocationCache::new();

        cache.get_or_compute(&mut scene, &mut reg, 0, 1).unwrap();
        cache.invalidate();
        assert!(cache.is_empty());
        cache.get_or_compute(&mut scene, &mut reg, 0, 1).unwrap();
        assert_eq!(cache.computations(), 2);
    }
}
