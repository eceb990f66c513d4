//! In-memory scene.
//!
//! A self-contained [`Scene`] used by the standalone server binary and by
//! tests. It models the parts of a host scene the bridge cares about:
//! unique object names, keyframed locations, a static camera, a timeline,
//! identity tags, rename notifications, and undo snapshots that invalidate
//! every outstanding [`ObjectKey`].

use std::cell::Cell;
use std::collections::HashSet;
use std::path::Path;

use anyhow::Context;
use scenelink_shared::math::{Mat4, Vec3};
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::scene::{ObjectKey, Scene, SceneNotification, Timeline};

/// Longest object name (bytes) the scene accepts; longer names are cut.
pub const MAX_OBJECT_NAME_LEN: usize = 63;

/// A location at a given scene frame.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Keyframe {
    pub frame: i64,
    pub location: Vec3,
}

/// One object of a [`SceneDescription`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ObjectDescription {
    pub name: String,
    #[serde(default)]
    pub location: Vec3,
    #[serde(default)]
    pub keyframes: Vec<Keyframe>,
}

/// Serialized form of an [`InMemoryScene`].
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SceneDescription {
    #[serde(default)]
    pub objects: Vec<ObjectDescription>,
    /// World matrix of the active camera.
    #[serde(default)]
    pub camera: Option<Mat4>,
    #[serde(default)]
    pub timeline: Timeline,
}

impl SceneDescription {
    pub fn from_json_str(s: &str) -> serde_json::Result<Self> {
        serde_json::from_str(s)
    }

    pub fn from_json_file(path: &Path) -> anyhow::Result<Self> {
        let text = std::fs::read_to_string(path)
            .with_context(|| format!("read scene {}", path.display()))?;
        Self::from_json_str(&text).with_context(|| format!("parse scene {}", path.display()))
    }
}

#[derive(Debug, Clone)]
struct SceneObject {
    key: ObjectKey,
    name: String,
    tag: Option<u16>,
    location: Vec3,
    keyframes: Vec<Keyframe>,
}

impl SceneObject {
    fn location_at(&self, frame: i64) -> Vec3 {
        let (first, last) = match (self.keyframes.first(), self.keyframes.last()) {
            (Some(first), Some(last)) => (first, last),
            _ => return self.location,
        };
        if frame <= first.frame {
            return first.location;
        }
        if frame >= last.frame {
            return last.location;
        }
        for pair in self.keyframes.windows(2) {
            let (a, b) = (&pair[0], &pair[1]);
            if frame >= a.frame && frame <= b.frame {
                let t = (frame - a.frame) as f32 / (b.frame - a.frame) as f32;
                return a.location.lerp(b.location, t);
            }
        }
        last.location
    }
}

/// Snapshot of the mutable object state, restored by [`InMemoryScene::undo`].
type UndoSnapshot = Vec<SceneObject>;

/// Scene held entirely in memory.
#[derive(Debug, Default)]
pub struct InMemoryScene {
    objects: Vec<SceneObject>,
    camera: Option<Mat4>,
    timeline: Timeline,
    frame: i64,
    next_key: u64,
    watched: HashSet<ObjectKey>,
    notifications: Vec<SceneNotification>,
    undo_stack: Vec<UndoSnapshot>,
    location_queries: Cell<u64>,
    frame_changes: u64,
}

fn truncate_name(name: &str) -> &str {
    if name.len() <= MAX_OBJECT_NAME_LEN {
        return name;
    }
    let mut end = MAX_OBJECT_NAME_LEN;
    while !name.is_char_boundary(end) {
        end -= 1;
    }
    &name[..end]
}

impl InMemoryScene {
    pub fn new(timeline: Timeline) -> Self {
        Self {
            frame: timeline.frame_start,
            timeline,
            ..Default::default()
        }
    }

    pub fn from_description(desc: &SceneDescription) -> Self {
        let mut scene = Self::new(desc.timeline);
        scene.camera = desc.camera;
        for obj in &desc.objects {
            let key = scene.add_object(&obj.name, obj.location);
            for kf in &obj.keyframes {
                scene.insert_keyframe(key, kf.frame, kf.location);
            }
        }
        scene
    }

    fn alloc_key(&mut self) -> ObjectKey {
        let key = ObjectKey(self.next_key);
        self.next_key += 1;
        key
    }

    fn index_of(&self, key: ObjectKey) -> Option<usize> {
        self.objects.iter().position(|o| o.key == key)
    }

    fn get(&self, key: ObjectKey) -> Option<&SceneObject> {
        self.objects.iter().find(|o| o.key == key)
    }

    fn get_mut(&mut self, key: ObjectKey) -> Option<&mut SceneObject> {
        self.objects.iter_mut().find(|o| o.key == key)
    }

    /// Makes `name` unique by appending `.001`, `.002`, ... when taken.
    fn unique_name(&self, name: &str) -> String {
        let base = truncate_name(name);
        if self.find_by_name(base).is_none() {
            return base.to_string();
        }
        let mut n = 1;
        loop {
            let suffix = format!(".{n:03}");
            let mut cut = base.len().min(MAX_OBJECT_NAME_LEN - suffix.len());
            while !base.is_char_boundary(cut) {
                cut -= 1;
            }
            let candidate = format!("{}{}", &base[..cut], suffix);
            if self.find_by_name(&candidate).is_none() {
                return candidate;
            }
            n += 1;
        }
    }

    /// Adds an object and returns its key. The name is made unique.
    pub fn add_object(&mut self, name: &str, location: Vec3) -> ObjectKey {
        let name = self.unique_name(name);
        let key = self.alloc_key();
        self.objects.push(SceneObject {
            key,
            name,
            tag: None,
            location,
            keyframes: Vec::new(),
        });
        key
    }

    /// Inserts or replaces a keyframe. Keyframes stay sorted by frame.
    pub fn insert_keyframe(&mut self, key: ObjectKey, frame: i64, location: Vec3) -> bool {
        let Some(obj) = self.get_mut(key) else {
            return false;
        };
        match obj.keyframes.binary_search_by_key(&frame, |k| k.frame) {
            Ok(i) => obj.keyframes[i].location = location,
            Err(i) => obj.keyframes.insert(i, Keyframe { frame, location }),
        }
        true
    }

    /// Moves an object without keyframes.
    pub fn set_location(&mut self, key: ObjectKey, location: Vec3) -> bool {
        match self.get_mut(key) {
            Some(obj) => {
                obj.location = location;
                obj.keyframes.clear();
                true
            }
            None => false,
        }
    }

    pub fn set_camera(&mut self, camera: Option<Mat4>) {
        self.camera = camera;
    }

    pub fn set_timeline(&mut self, timeline: Timeline) {
        self.timeline = timeline;
    }

    /// Renames an object, returning the name it actually received.
    pub fn rename(&mut self, key: ObjectKey, new_name: &str) -> Option<String> {
        let current = self.get(key)?;
        if current.name == truncate_name(new_name) {
            return Some(current.name.clone());
        }
        let name = self.unique_name(new_name);
        if let Some(obj) = self.get_mut(key) {
            obj.name = name.clone();
        }
        if self.watched.contains(&key) {
            self.notifications.push(SceneNotification::Renamed(key));
        }
        debug!(?key, %name, "object renamed");
        Some(name)
    }

    pub fn remove(&mut self, key: ObjectKey) -> bool {
        match self.index_of(key) {
            Some(i) => {
                self.objects.remove(i);
                self.watched.remove(&key);
                true
            }
            None => false,
        }
    }

    /// Copies an object, including its identity tag.
    pub fn duplicate(&mut self, key: ObjectKey) -> Option<ObjectKey> {
        let mut copy = self.get(key)?.clone();
        copy.name = self.unique_name(&copy.name);
        copy.key = self.alloc_key();
        let new_key = copy.key;
        self.objects.push(copy);
        Some(new_key)
    }

    /// Records the current object state as an undo step.
    pub fn push_undo(&mut self) {
        self.undo_stack.push(self.objects.clone());
    }

    /// Restores the last undo step. Every object gets a fresh key, so all
    /// previously issued keys become stale.
    pub fn undo(&mut self) -> bool {
        let Some(mut snapshot) = self.undo_stack.pop() else {
            return false;
        };
        for obj in &mut snapshot {
            obj.key = self.alloc_key();
        }
        self.objects = snapshot;
        self.watched.clear();
        self.notifications.push(SceneNotification::UndoRedo);
        true
    }

    /// Reloads the scene from scratch, keeping identity tags but not keys.
    /// Equivalent to an undo step that restores the present state.
    pub fn reload(&mut self) {
        self.push_undo();
        self.undo();
    }

    /// Number of [`Scene::world_location`] calls served so far.
    pub fn location_queries(&self) -> u64 {
        self.location_queries.get()
    }

    /// Number of [`Scene::set_frame`] calls served so far.
    pub fn frame_changes(&self) -> u64 {
        self.frame_changes
    }
}

impl Scene for InMemoryScene {
    fn object_names(&self) -> Vec<String> {
        self.objects.iter().map(|o| o.name.clone()).collect()
    }

    fn object_keys(&self) -> Vec<ObjectKey> {
        self.objects.iter().map(|o| o.key).collect()
    }

    fn find_by_name(&self, name: &str) -> Option<ObjectKey> {
        self.objects.iter().find(|o| o.name == name).map(|o| o.key)
    }

    fn is_alive(&self, key: ObjectKey) -> bool {
        self.index_of(key).is_some()
    }

    fn name_of(&self, key: ObjectKey) -> Option<String> {
        self.get(key).map(|o| o.name.clone())
    }

    fn identity_tag(&self, key: ObjectKey) -> Option<u16> {
        self.get(key).and_then(|o| o.tag)
    }

    fn set_identity_tag(&mut self, key: ObjectKey, id: u16) {
        if let Some(obj) = self.get_mut(key) {
            obj.tag = Some(id);
        }
    }

    fn clear_identity_tag(&mut self, key: ObjectKey) {
        if let Some(obj) = self.get_mut(key) {
            obj.tag = None;
        }
    }

    fn world_location(&self, key: ObjectKey) -> Option<Vec3> {
        self.location_queries.set(self.location_queries.get() + 1);
        self.get(key).map(|o| o.location_at(self.frame))
    }

    fn camera_world_matrix(&self) -> Option<Mat4> {
        self.camera
    }

    fn current_frame(&self) -> i64 {
        self.frame
    }

    fn set_frame(&mut self, frame: i64) {
        self.frame_changes += 1;
        self.frame = frame;
    }

    fn timeline(&self) -> Timeline {
        self.timeline
    }

    fn watch_renames(&mut self, key: ObjectKey) {
        self.watched.insert(key);
    }

    fn unwatch_renames(&mut self, key: ObjectKey) {
        self.watched.remove(&key);
    }

    fn take_notifications(&mut self) -> Vec<SceneNotification> {
        std::mem::take(&mut self.notifications)
    }
}
