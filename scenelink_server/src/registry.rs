//! Object identity registry.
//!
//! Maps stable ids to subscribed scene objects and counts subscribers per id.
//! An entry exists only while its subscriber count is at least one.
//!
//! Ids come from a counter starting at 0 and are never reused for the life of
//! the registry. Every registered object carries its id as an identity tag in
//! the scene so renames can be followed (see [`crate::identity`]).
//!
//! The registry does not poll. It reacts to the scene's rename and undo/redo
//! notifications, and to stale handles it runs into while sampling.

use std::collections::BTreeMap;
use std::fmt;

use scenelink_shared::math::{CameraView, Vec3};
use tracing::{debug, info};

use crate::identity::{IdentityCallbacks, ObjectIdentity, Resolution};
use crate::scene::{ObjectKey, Scene, SceneNotification};

/// Registry operation errors.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RegistryError {
    /// No live scene object has the requested name.
    ObjectNotFound(String),
    /// Every 16-bit id has been handed out once already.
    IdsExhausted,
}

impl fmt::Display for RegistryError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RegistryError::ObjectNotFound(name) => write!(f, "no scene object named {name:?}"),
            RegistryError::IdsExhausted => write!(f, "object id space exhausted"),
        }
    }
}

impl std::error::Error for RegistryError {}

/// An identity and the number of clients subscribed to it.
#[derive(Debug, Clone)]
pub struct RegistryEntry {
    pub identity: ObjectIdentity,
    pub subscriber_count: u32,
}

/// Registry of subscribed scene objects.
#[derive(Debug)]
pub struct ObjectRegistry {
    entries: BTreeMap<u16, RegistryEntry>,
    next_id: u32,
    callbacks: IdentityCallbacks,
    generation: u64,
}

impl ObjectRegistry {
    /// Creates an empty registry and clears identity tags left in the scene
    /// by an earlier registry.
    pub fn new<S: Scene + ?Sized>(scene: &mut S, callbacks: IdentityCallbacks) -> Self {
        let mut cleared = 0usize;
        for key in scene.object_keys() {
            if scene.identity_tag(key).is_some() {
                scene.clear_identity_tag(key);
                cleared += 1;
            }
        }
        if cleared > 0 {
            debug!(cleared, "cleared leftover identity tags");
        }
        Self {
            entries: BTreeMap::new(),
            next_id: 0,
            callbacks,
            generation: 0,
        }
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn contains(&self, id: u16) -> bool {
        self.entries.contains_key(&id)
    }

    pub fn get(&self, id: u16) -> Option<&RegistryEntry> {
        self.entries.get(&id)
    }

    /// Registered ids in ascending order.
    pub fn ids(&self) -> impl Iterator<Item = u16> + '_ {
        self.entries.keys().copied()
    }

    pub fn subscriber_count(&self, id: u16) -> u32 {
        self.entries.get(&id).map_or(0, |e| e.subscriber_count)
    }

    /// Bumped on every mutation of the registered set or its counts.
    /// Derived data (the render cache) compares it to detect staleness.
    pub fn generation(&self) -> u64 {
        self.generation
    }

    fn allocate_id(&mut self) -> Result<u16, RegistryError> {
        let id = u16::try_from(self.next_id).map_err(|_| RegistryError::IdsExhausted)?;
        self.next_id += 1;
        Ok(id)
    }

    /// Subscribes to the object named `name`, returning its id.
    ///
    /// A second subscription to the same object returns the same id. A tag
    /// without a live entry (left over from before a reload) is discarded and
    /// a fresh id is issued.
    pub fn register_sub<S: Scene + ?Sized>(
        &mut self,
        scene: &mut S,
        name: &str,
    ) -> Result<u16, RegistryError> {
        let key = scene
            .find_by_name(name)
            .ok_or_else(|| RegistryError::ObjectNotFound(name.to_string()))?;

        if let Some(tag) = scene.identity_tag(key) {
            if let Some(entry) = self.entries.get_mut(&tag) {
                entry.subscriber_count += 1;
                self.generation += 1;
                debug!(id = tag, %name, count = entry.subscriber_count, "subscriber added");
                return Ok(tag);
            }
            debug!(stale_tag = tag, %name, "discarding stale identity tag");
            scene.clear_identity_tag(key);
        }

        let id = self.allocate_id()?;
        scene.set_identity_tag(key, id);
        scene.watch_renames(key);
        self.entries.insert(
            id,
            RegistryEntry {
                identity: ObjectIdentity::new(id, name.to_string(), key),
                subscriber_count: 1,
            },
        );
        self.generation += 1;
        info!(id, %name, "object registered");
        Ok(id)
    }

    /// Drops one subscription. Returns `false` (and changes nothing) if `id`
    /// is not registered.
    pub fn unregister_sub<S: Scene + ?Sized>(&mut self, scene: &mut S, id: u16) -> bool {
        let Some(entry) = self.entries.get_mut(&id) else {
            return false;
        };
        entry.subscriber_count -= 1;
        self.generation += 1;
        if entry.subscriber_count == 0 {
            if let Some(entry) = self.entries.remove(&id) {
                scene.unwatch_renames(entry.identity.handle().key());
                info!(id, name = entry.identity.display_name(), "object unregistered");
            }
        }
        true
    }

    fn remove_gone(&mut self, gone: Vec<u16>) {
        for id in gone {
            if self.entries.remove(&id).is_some() {
                self.generation += 1;
                info!(id, "registered object deleted from scene");
            }
        }
    }

    /// Re-resolves every registered identity after a scene mutation.
    pub fn reconcile<S: Scene + ?Sized>(&mut self, scene: &mut S) {
        let mut gone = Vec::new();
        for (id, entry) in self.entries.iter_mut() {
            if entry.identity.reconcile(scene, &mut self.callbacks) == Resolution::Gone {
                gone.push(*id);
            }
        }
        self.remove_gone(gone);
    }

    /// Handles a rename notification for `key`.
    pub fn on_renamed<S: Scene + ?Sized>(&mut self, scene: &mut S, key: ObjectKey) {
        let mut gone = Vec::new();
        for (id, entry) in self.entries.iter_mut() {
            if entry.identity.handle().key() != key {
                continue;
            }
            if !entry.identity.on_renamed(scene, &mut self.callbacks) {
                gone.push(*id);
            }
        }
        self.remove_gone(gone);
    }

    /// Routes a scene notification to the matching handler.
    pub fn handle_notification<S: Scene + ?Sized>(
        &mut self,
        scene: &mut S,
        notification: SceneNotification,
    ) {
        match notification {
            SceneNotification::Renamed(key) => self.on_renamed(scene, key),
            SceneNotification::UndoRedo => self.reconcile(scene),
        }
    }

    /// Camera-space location of every registered object at the scene's
    /// current frame, in id order. Objects that no longer resolve are
    /// reported through the delete callback and dropped.
    pub fn sample_locations<S: Scene + ?Sized>(
        &mut self,
        scene: &mut S,
        camera: &CameraView,
    ) -> Vec<(u16, Vec3)> {
        let mut out = Vec::with_capacity(self.entries.len());
        let mut gone = Vec::new();
        for (id, entry) in self.entries.iter_mut() {
            let Some(key) = entry.identity.resolve(scene, &mut self.callbacks) else {
                gone.push(*id);
                continue;
            };
            match scene.world_location(key) {
                Some(loc) => out.push((*id, camera.to_camera_space(loc))),
                None => gone.push(*id),
            }
        }
        self.remove_gone(gone);
        out
    }
}
