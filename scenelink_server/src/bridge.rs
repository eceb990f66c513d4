//! Bridge state shared by the dispatcher and the tick loop.

use std::time::{Duration, Instant};

use tracing::{debug, info, warn};

use scenelink_shared::math::CameraView;

use crate::events::{OutboundEvent, OutboundEventQueue};
use crate::registry::ObjectRegistry;
use crate::render_cache::RenderLocationCache;
use crate::scene::Scene;

/// Minimum spacing between repeated missing-camera warnings.
pub const CAMERA_WARNING_INTERVAL: Duration = Duration::from_secs(5);

/// Whether live positions are being published.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Mode {
    /// Positions are sampled and published every tick.
    Live,
    /// A render session is active; clients pull locations on demand.
    Rendering,
}

/// Scene, registry, render cache and outbound queue of one bridge.
#[derive(Debug)]
pub struct Bridge<S: Scene> {
    scene: S,
    registry: ObjectRegistry,
    cache: RenderLocationCache,
    events: OutboundEventQueue,
    mode: Mode,
    last_camera_warning: Option<Instant>,
}

impl<S: Scene> Bridge<S> {
    pub fn new(mut scene: S) -> Self {
        let events = OutboundEventQueue::new();
        let registry = ObjectRegistry::new(&mut scene, events.sender().identity_callbacks());
        Self {
            scene,
            registry,
            cache: RenderLocationCache::new(),
            events,
            mode: Mode::Live,
            last_camera_warning: None,
        }
    }

    pub fn scene(&self) -> &S {
        &self.scene
    }

    pub fn scene_mut(&mut self) -> &mut S {
        &mut self.scene
    }

    pub fn registry(&self) -> &ObjectRegistry {
        &self.registry
    }

    pub fn cache(&self) -> &RenderLocationCache {
        &self.cache
    }

    pub fn mode(&self) -> Mode {
        self.mode
    }

    /// Split borrow for handlers that touch the scene and registry together.
    pub(crate) fn scene_and_registry(&mut self) -> (&mut S, &mut ObjectRegistry) {
        (&mut self.scene, &mut self.registry)
    }

    pub(crate) fn parts_mut(&mut self) -> (&mut S, &mut ObjectRegistry, &mut RenderLocationCache) {
        (&mut self.scene, &mut self.registry, &mut self.cache)
    }

    /// Starts a render session. Returns `true` if this call changed the mode;
    /// only then is the render cache invalidated.
    pub fn enter_render_mode(&mut self) -> bool {
        if self.mode == Mode::Rendering {
            return false;
        }
        self.mode = Mode::Rendering;
        self.cache.invalidate();
        info!("render session started");
        true
    }

    /// Ends a render session and resumes live publishing.
    pub fn exit_render_mode(&mut self) -> bool {
        if self.mode == Mode::Live {
            return false;
        }
        self.mode = Mode::Live;
        info!("render session finished");
        true
    }

    /// Feeds pending scene notifications to the registry.
    pub fn process_scene_notifications(&mut self) {
        for notification in self.scene.take_notifications() {
            debug!(?notification, "scene notification");
            self.registry
                .handle_notification(&mut self.scene, notification);
        }
    }

    /// Queues a position update for every registered object. Does nothing
    /// during a render session or when the scene has no usable camera.
    pub fn sample_live_positions(&mut self) {
        if self.mode != Mode::Live || self.registry.is_empty() {
            return;
        }
        let camera = self
            .scene
            .camera_world_matrix()
            .and_then(|m| CameraView::from_camera_world(&m));
        let Some(camera) = camera else {
            self.warn_missing_camera();
            return;
        };
        for (id, position) in self.registry.sample_locations(&mut self.scene, &camera) {
            self.events
                .push(OutboundEvent::PositionUpdated { id, position });
        }
    }

    fn warn_missing_camera(&mut self) {
        let now = Instant::now();
        let due = self
            .last_camera_warning
            .map_or(true, |last| now.duration_since(last) >= CAMERA_WARNING_INTERVAL);
        if due {
            warn!("scene has no usable active camera; not publishing positions");
            self.last_camera_warning = Some(now);
        }
    }

    /// Takes every queued outbound event, oldest first.
    pub fn drain_events(&mut self) -> Vec<OutboundEvent> {
        self.events.drain()
    }
}
