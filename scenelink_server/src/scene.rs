//! Scene collaborator boundary.
//!
//! The bridge never owns scene objects. It talks to the host scene through the
//! [`Scene`] trait: enumeration, name lookup, identity tags, world locations,
//! the active camera, the animation timeline, and rename / undo notifications.
//!
//! Object references handed out by a scene ([`ObjectKey`]) are weak. The host
//! may invalidate them at any time (undo, file reload, deletion); callers check
//! liveness and re-resolve through [`crate::identity::ObjectHandle`].

use scenelink_shared::math::{Mat4, Vec3};
use serde::{Deserialize, Serialize};

/// Opaque, possibly stale reference to a scene object.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ObjectKey(pub u64);

/// Change notifications the scene reports to the bridge.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SceneNotification {
    /// A watched object was renamed.
    Renamed(ObjectKey),
    /// An undo or redo step replaced scene state; every key may be stale.
    UndoRedo,
}

/// Animation frame range and rate.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Timeline {
    #[serde(default = "default_frame_start")]
    pub frame_start: i64,
    #[serde(default = "default_frame_end")]
    pub frame_end: i64,
    #[serde(default = "default_frame_step")]
    pub frame_step: i64,
    #[serde(default = "default_fps")]
    pub fps: f32,
    #[serde(default = "default_fps_base")]
    pub fps_base: f32,
}

fn default_frame_start() -> i64 {
    1
}

fn default_frame_end() -> i64 {
    250
}

fn default_frame_step() -> i64 {
    1
}

fn default_fps() -> f32 {
    24.0
}

fn default_fps_base() -> f32 {
    1.0
}

impl Default for Timeline {
    fn default() -> Self {
        Self {
            frame_start: default_frame_start(),
            frame_end: default_frame_end(),
            frame_step: default_frame_step(),
            fps: default_fps(),
            fps_base: default_fps_base(),
        }
    }
}

impl Timeline {
    fn step(&self) -> i64 {
        self.frame_step.max(1)
    }

    /// Number of sampled frames: `(end - start + 1) / step`.
    pub fn frame_count(&self) -> u64 {
        let span = self.frame_end - self.frame_start + 1;
        if span <= 0 {
            return 0;
        }
        (span / self.step()) as u64
    }

    /// Playback rate in frames per second.
    pub fn effective_fps(&self) -> f32 {
        if self.fps_base == 0.0 {
            return self.fps;
        }
        self.fps / self.fps_base
    }

    /// Scene frame number of the `index`-th sampled frame.
    pub fn scene_frame(&self, index: u64) -> i64 {
        self.frame_start + index as i64 * self.step()
    }
}

/// Query/notify surface the bridge consumes from the host scene.
pub trait Scene {
    /// Names of all objects, in scene order.
    fn object_names(&self) -> Vec<String>;

    /// Keys of all objects, in scene order.
    fn object_keys(&self) -> Vec<ObjectKey>;

    fn find_by_name(&self, name: &str) -> Option<ObjectKey>;

    /// Whether `key` still refers to a live object.
    fn is_alive(&self, key: ObjectKey) -> bool;

    /// Current name of the object, `None` if `key` is stale.
    fn name_of(&self, key: ObjectKey) -> Option<String>;

    /// Durable identity tag stored on the object, if any.
    fn identity_tag(&self, key: ObjectKey) -> Option<u16>;

    fn set_identity_tag(&mut self, key: ObjectKey, id: u16);

    fn clear_identity_tag(&mut self, key: ObjectKey);

    /// World-space location at the current frame, `None` if `key` is stale.
    fn world_location(&self, key: ObjectKey) -> Option<Vec3>;

    /// World matrix of the active camera, `None` if the scene has no camera.
    fn camera_world_matrix(&self) -> Option<Mat4>;

    fn current_frame(&self) -> i64;

    fn set_frame(&mut self, frame: i64);

    fn timeline(&self) -> Timeline;

    /// Starts reporting [`SceneNotification::Renamed`] for `key`.
    fn watch_renames(&mut self, key: ObjectKey);

    fn unwatch_renames(&mut self, key: ObjectKey);

    /// Drains notifications raised since the last call, oldest first.
    fn take_notifications(&mut self) -> Vec<SceneNotification>;
}
