//! Object identities.
//!
//! An [`ObjectIdentity`] ties a stable numeric id to a scene object whose
//! [`ObjectKey`] may go stale at any time. The identity keeps a cached key in
//! an [`ObjectHandle`] and re-resolves it when the scene says it is no longer
//! valid:
//!
//! 1. exact name match (cheap, covers undo/reload without renames),
//! 2. scan for an object carrying this id's identity tag (covers renames),
//! 3. otherwise the object is gone and the delete callback fires.
//!
//! Objects duplicated in the host carry a copy of the identity tag. Tier 2
//! then binds to whichever tagged object the scene lists first; duplicates
//! are not told apart.

use crate::scene::{ObjectKey, Scene};

type RenameFn = Box<dyn FnMut(u16, &str) + Send>;
type DeleteFn = Box<dyn FnMut(u16) + Send>;

/// Rename/delete notification sinks, supplied once when the registry is built.
pub struct IdentityCallbacks {
    on_rename: RenameFn,
    on_delete: DeleteFn,
}

impl IdentityCallbacks {
    pub fn new(
        on_rename: impl FnMut(u16, &str) + Send + 'static,
        on_delete: impl FnMut(u16) + Send + 'static,
    ) -> Self {
        Self {
            on_rename: Box::new(on_rename),
            on_delete: Box::new(on_delete),
        }
    }

    pub fn renamed(&mut self, id: u16, new_name: &str) {
        (self.on_rename)(id, new_name)
    }

    pub fn deleted(&mut self, id: u16) {
        (self.on_delete)(id)
    }
}

impl std::fmt::Debug for IdentityCallbacks {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("IdentityCallbacks").finish_non_exhaustive()
    }
}

/// Cached reference to a scene object.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ObjectHandle {
    key: ObjectKey,
}

impl ObjectHandle {
    pub fn new(key: ObjectKey) -> Self {
        Self { key }
    }

    pub fn key(&self) -> ObjectKey {
        self.key
    }

    pub fn is_valid<S: Scene + ?Sized>(&self, scene: &S) -> bool {
        scene.is_alive(self.key)
    }

    /// Points the handle at `key`, moving the rename watch along with it.
    fn rebind<S: Scene + ?Sized>(&mut self, scene: &mut S, key: ObjectKey) {
        if self.key != key {
            scene.unwatch_renames(self.key);
            scene.watch_renames(key);
            self.key = key;
        }
    }
}

/// How a reconciliation pass resolved an identity.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Resolution {
    /// An object with the same name exists.
    ByName(ObjectKey),
    /// The object was found through its identity tag under a new name.
    ByTag(ObjectKey),
    /// No matching object remains.
    Gone,
}

/// A registered scene object.
#[derive(Debug, Clone)]
pub struct ObjectIdentity {
    id: u16,
    display_name: String,
    handle: ObjectHandle,
}

impl ObjectIdentity {
    pub fn new(id: u16, display_name: String, key: ObjectKey) -> Self {
        Self {
            id,
            display_name,
            handle: ObjectHandle::new(key),
        }
    }

    pub fn id(&self) -> u16 {
        self.id
    }

    pub fn display_name(&self) -> &str {
        &self.display_name
    }

    pub fn handle(&self) -> &ObjectHandle {
        &self.handle
    }

    /// Re-resolves the identity against the current scene.
    ///
    /// Fires the rename callback when found by tag, the delete callback when
    /// gone.
    pub fn reconcile<S: Scene + ?Sized>(
        &mut self,
        scene: &mut S,
        callbacks: &mut IdentityCallbacks,
    ) -> Resolution {
        if let Some(key) = scene.find_by_name(&self.display_name) {
            self.handle.rebind(scene, key);
            return Resolution::ByName(key);
        }

        let tagged = scene
            .object_keys()
            .into_iter()
            .find(|k| scene.identity_tag(*k) == Some(self.id));
        if let Some(key) = tagged {
            self.handle.rebind(scene, key);
            if let Some(name) = scene.name_of(key) {
                callbacks.renamed(self.id, &name);
                self.display_name = name;
            }
            return Resolution::ByTag(key);
        }

        callbacks.deleted(self.id);
        Resolution::Gone
    }

    /// Returns a live key for the object, reconciling if the cached one is
    /// stale. `None` means the object is gone (delete callback already fired).
    pub fn resolve<S: Scene + ?Sized>(
        &mut self,
        scene: &mut S,
        callbacks: &mut IdentityCallbacks,
    ) -> Option<ObjectKey> {
        if self.handle.is_valid(scene) {
            return Some(self.handle.key());
        }
        match self.reconcile(scene, callbacks) {
            Resolution::ByName(key) | Resolution::ByTag(key) => Some(key),
            Resolution::Gone => None,
        }
    }

    /// Handles a rename notification for this identity's object.
    ///
    /// Returns `false` if the object turned out to be gone.
    pub fn on_renamed<S: Scene + ?Sized>(
        &mut self,
        scene: &mut S,
        callbacks: &mut IdentityCallbacks,
    ) -> bool {
        let Some(key) = self.resolve(scene, callbacks) else {
            return false;
        };
        if let Some(name) = scene.name_of(key) {
            if name != self.display_name {
                callbacks.renamed(self.id, &name);
                self.display_name = name;
            }
        }
        true
    }
}

#[cfg(test)]
mod tests {
    use std::sync::{Arc, Mutex};

    use scenelink_shared::math::Vec3;

    use super::*;
    use crate::memory_scene::InMemoryScene;
    use crate::scene::Timeline;

    #[derive(Debug, Clone, PartialEq)]
    enum Fired {
        Renamed(u16, String),
        Deleted(u16),
    }

    fn recording_callbacks() -> (IdentityCallbacks, Arc<Mutex<Vec<Fired>>>) {
        let log = Arc::new(Mutex::new(Vec::new()));
        let (r, d) = (log.clone(), log.clone());
        let cbs = IdentityCallbacks::new(
            move |id, name| r.lock().unwrap().push(Fired::Renamed(id, name.to_string())),
            move |id| d.lock().unwrap().push(Fired::Deleted(id)),
        );
        (cbs, log)
    }

    fn tagged(scene: &mut InMemoryScene, name: &str, id: u16) -> ObjectIdentity {
        let key = scene.add_object(name, Vec3::ZERO);
        scene.set_identity_tag(key, id);
        scene.watch_renames(key);
        ObjectIdentity::new(id, name.to_string(), key)
    }

    #[test]
    fn same_name_rebinds_silently() {
        let mut scene = InMemoryScene::new(Timeline::default());
        let mut ident = tagged(&mut scene, "Light", 0);
        let old_key = ident.handle().key();
        scene.reload();
        let (mut cbs, log) = recording_callbacks();

        let res = ident.reconcile(&mut scene, &mut cbs);
        assert!(matches!(res, Resolution::ByName(k) if k != old_key));
        assert!(ident.handle().is_valid(&scene));
        assert!(log.lock().unwrap().is_empty());
    }

    #[test]
    fn tag_scan_finds_renamed_object() {
        let mut scene = InMemoryScene::new(Timeline::default());
        let mut ident = tagged(&mut scene, "Light", 3);
        scene.rename(ident.handle().key(), "Lamp");
        scene.reload();
        let (mut cbs, log) = recording_callbacks();

        let res = ident.reconcile(&mut scene, &mut cbs);
        assert!(matches!(res, Resolution::ByTag(_)));
        assert_eq!((ident.id(), ident.display_name()), (3, "Lamp"));
        assert_eq!(*log.lock().unwrap(), vec![Fired::Renamed(3, "Lamp".into())]);
    }

    #[test]
    fn missing_object_fires_delete() {
        let mut scene = InMemoryScene::new(Timeline::default());
        let mut ident = tagged(&mut scene, "Light", 5);
        scene.remove(ident.handle().key());
        let (mut cbs, log) = recording_callbacks();

        assert_eq!(ident.resolve(&mut scene, &mut cbs), None);
        assert_eq!(*log.lock().unwrap(), vec![Fired::Deleted(5)]);
    }

    #[test]
    fn rename_notification_reports_new_name_once() {
        let mut scene = InMemoryScene::new(Timeline::default());
        let mut ident = tagged(&mut scene, "Light", 0);
        scene.rename(ident.handle().key(), "Sun");
        let (mut cbs, log) = recording_callbacks();

        assert!(ident.on_renamed(&mut scene, &mut cbs));
        assert!(ident.on_renamed(&mut scene, &mut cbs));
        assert_eq!(*log.lock().unwrap(), vec![Fired::Renamed(0, "Sun".into())]);
    }

    #[test]
    fn rebinding_moves_the_rename_watch() {
        let mut scene = InMemoryScene::new(Timeline::default());
        let mut ident = tagged(&mut scene, "Light", 0);
        scene.reload();
        let (mut cbs, _log) = recording_callbacks();
        let key = ident.resolve(&mut scene, &mut cbs).unwrap();

        scene.rename(key, "Renamed");
        assert_eq!(
            scene.take_notifications().last(),
            Some(&crate::scene::SceneNotification::Renamed(key))
        );
    }
}
