//! Shared helpers for the scenelink integration tests.
//!
//! [`BridgeHarness`] runs a TCP bridge over an in-memory scene on a background
//! task. Tests talk to it with the real client and edit the scene between
//! ticks through [`BridgeHarness::edit`], which plays the part of the host
//! application.

use anyhow::Context;
use scenelink_server::memory_scene::InMemoryScene;
use scenelink_server::scene::Timeline;
use scenelink_server::server::{bind_ephemeral, tick_interval, StopHandle, TickOutcome};
use scenelink_shared::config::BridgeConfig;
use scenelink_shared::math::{Mat4, Vec3};
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;

/// Tick rate used by the harness; fast enough to keep tests short.
pub const TEST_TICK_HZ: u32 = 120;

type SceneEdit = Box<dyn FnOnce(&mut InMemoryScene) + Send>;

/// Installs a test-friendly subscriber once per process.
pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter("info")
        .with_test_writer()
        .try_init();
}

/// Camera ten units up +Z looking down -Z, a static `Light` at (1, 2, 0) and
/// a `Ball` moving from x=0 at frame 1 to x=10 at frame 11. Frames 1..=24 at
/// 24 fps.
pub fn demo_scene() -> InMemoryScene {
    let mut scene = InMemoryScene::new(Timeline {
        frame_start: 1,
        frame_end: 24,
        ..Default::default()
    });
    scene.set_camera(Some(Mat4::from_translation(Vec3::new(0.0, 0.0, 10.0))));
    scene.add_object("Light", Vec3::new(1.0, 2.0, 0.0));
    let ball = scene.add_object("Ball", Vec3::ZERO);
    scene.insert_keyframe(ball, 1, Vec3::new(0.0, 0.0, 0.0));
    scene.insert_keyframe(ball, 11, Vec3::new(10.0, 0.0, 0.0));
    scene
}

/// A bridge running on ephemeral ports.
pub struct BridgeHarness {
    pub cfg: BridgeConfig,
    stop: StopHandle,
    edits: mpsc::UnboundedSender<(SceneEdit, oneshot::Sender<()>)>,
    handle: JoinHandle<u64>,
}

impl BridgeHarness {
    pub async fn start(scene: InMemoryScene) -> anyhow::Result<Self> {
        let (mut server, cfg) = bind_ephemeral(scene, TEST_TICK_HZ).await?;
        let stop = server.stop_handle();
        let (edits, mut edit_rx) =
            mpsc::unbounded_channel::<(SceneEdit, oneshot::Sender<()>)>();

        let handle = tokio::spawn(async move {
            let interval = tick_interval(TEST_TICK_HZ);
            let mut next = tokio::time::Instant::now();
            loop {
                while let Ok((edit, done)) = edit_rx.try_recv() {
                    edit(server.bridge_mut().scene_mut());
                    let _ = done.send(());
                }
                if server.step().await == TickOutcome::Stopped {
                    break;
                }
                next += interval;
                tokio::time::sleep_until(next).await;
            }
            server.tick()
        });

        Ok(Self {
            cfg,
            stop,
            edits,
            handle,
        })
    }

    /// Applies `edit` to the scene between two ticks and waits until it ran.
    pub async fn edit(&self, edit: impl FnOnce(&mut InMemoryScene) + Send + 'static) -> anyhow::Result<()> {
        let (done, ran) = oneshot::channel();
        self.edits
            .send((Box::new(edit), done))
            .map_err(|_| anyhow::anyhow!("bridge task is gone"))?;
        ran.await.context("bridge task dropped the edit")
    }

    /// Stops the bridge and returns how many ticks it ran.
    pub async fn shutdown(self) -> anyhow::Result<u64> {
        self.stop.stop();
        self.handle.await.context("join bridge task")
    }
}
