//! Bridge server loop.
//!
//! One tick:
//! - feed scene notifications (renames, undo/redo) to the registry,
//! - drain the request channel until it would block, replying to each request,
//! - sample live positions (skipped during a render session),
//! - publish every queued event in order.
//!
//! Ticks run back to back on a fixed schedule. Nothing inside a tick blocks on
//! a client, and no error from the registry, the cache or the transports
//! ends the loop; only the stop flag does.

use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use scenelink_shared::config::{BridgeConfig, MAX_TICK_HZ, MIN_TICK_HZ};
use tokio::time::Instant;
use tracing::{debug, info, warn};

use crate::bridge::Bridge;
use crate::dispatch::dispatch;
use crate::scene::Scene;
use crate::transport::{
    PublishChannel, RecvOutcome, RequestChannel, TcpPublisher, TcpRequestChannel,
};

/// Shared stop flag. Checked at the start of every tick.
#[derive(Debug, Clone, Default)]
pub struct StopHandle(Arc<AtomicBool>);

impl StopHandle {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn stop(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_stopped(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

/// Whether the loop should keep ticking.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TickOutcome {
    Continue,
    Stopped,
}

/// Counters for the most recent tick.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TickStats {
    pub requests: usize,
    pub published: usize,
    pub faults: usize,
}

/// A bridge wired to its two channels.
pub struct BridgeServer<S: Scene, R: RequestChannel, P: PublishChannel> {
    bridge: Bridge<S>,
    requests: R,
    publisher: P,
    stop: StopHandle,
    tick: u64,
    last_stats: TickStats,
    closed: bool,
}

impl<S, R, P> BridgeServer<S, R, P>
where
    S: Scene + Send,
    R: RequestChannel,
    P: PublishChannel,
{
    pub fn new(scene: S, requests: R, publisher: P) -> Self {
        Self {
            bridge: Bridge::new(scene),
            requests,
            publisher,
            stop: StopHandle::new(),
            tick: 0,
            last_stats: TickStats::default(),
            closed: false,
        }
    }

    pub fn stop_handle(&self) -> StopHandle {
        self.stop.clone()
    }

    pub fn bridge(&self) -> &Bridge<S> {
        &self.bridge
    }

    pub fn bridge_mut(&mut self) -> &mut Bridge<S> {
        &mut self.bridge
    }

    pub fn requests(&self) -> &R {
        &self.requests
    }

    pub fn publisher(&self) -> &P {
        &self.publisher
    }

    /// Number of ticks run so far.
    pub fn tick(&self) -> u64 {
        self.tick
    }

    pub fn last_stats(&self) -> TickStats {
        self.last_stats
    }

    /// Runs one tick.
    pub async fn step(&mut self) -> TickOutcome {
        if self.closed {
            return TickOutcome::Stopped;
        }
        if self.stop.is_stopped() {
            self.requests.close().await;
            self.publisher.close().await;
            self.closed = true;
            info!(ticks = self.tick, "bridge stopped");
            return TickOutcome::Stopped;
        }

        let mut stats = TickStats::default();
        self.bridge.process_scene_notifications();
        self.serve_requests(&mut stats).await;
        self.bridge.sample_live_positions();
        self.publish_events(&mut stats).await;

        self.tick += 1;
        self.last_stats = stats;
        TickOutcome::Continue
    }

    async fn serve_requests(&mut self, stats: &mut TickStats) {
        loop {
            match self.requests.try_recv().await {
                RecvOutcome::Message(req) => {
                    stats.requests += 1;
                    let reply = dispatch(&mut self.bridge, &req.payload);
                    if let Err(e) = self.requests.reply(req.from, reply).await {
                        stats.faults += 1;
                        warn!(peer = req.from.0, error = ?e, "reply not delivered");
                    }
                }
                RecvOutcome::WouldBlock => break,
                RecvOutcome::Fault(e) => {
                    stats.faults += 1;
                    warn!(error = ?e, "request channel fault");
                    break;
                }
            }
        }
    }

    async fn publish_events(&mut self, stats: &mut TickStats) {
        for event in self.bridge.drain_events() {
            let message = match event.encode() {
                Ok(message) => message,
                Err(e) => {
                    warn!(id = event.id(), error = %e, "event not encodable; skipped");
                    continue;
                }
            };
            match self.publisher.publish(message).await {
                Ok(()) => stats.published += 1,
                Err(e) => {
                    stats.faults += 1;
                    warn!(error = ?e, "publish failed");
                }
            }
        }
    }

    /// Runs a number of ticks at `tick_hz`.
    pub async fn run_for_ticks(&mut self, ticks: u32, tick_hz: u32) -> TickOutcome {
        let dt = tick_interval(tick_hz);
        let mut next = Instant::now();
        for _ in 0..ticks {
            next += dt;
            if self.step().await == TickOutcome::Stopped {
                return TickOutcome::Stopped;
            }
            tokio::time::sleep_until(next).await;
        }
        TickOutcome::Continue
    }

    /// Ticks at `tick_hz` until the stop flag is set.
    pub async fn run(&mut self, tick_hz: u32) {
        let dt = tick_interval(tick_hz);
        info!(tick_hz = clamp_tick_hz(tick_hz), "bridge running");
        let mut next = Instant::now();
        loop {
            next += dt;
            if self.step().await == TickOutcome::Stopped {
                break;
            }
            if self.tick % 600 == 0 {
                debug!(tick = self.tick, registered = self.bridge.registry().len(), "tick");
            }
            tokio::time::sleep_until(next).await;
        }
    }
}

fn clamp_tick_hz(tick_hz: u32) -> u32 {
    tick_hz.clamp(MIN_TICK_HZ, MAX_TICK_HZ)
}

/// Time between ticks, with `tick_hz` clamped to the supported range.
pub fn tick_interval(tick_hz: u32) -> Duration {
    Duration::from_secs_f64(1.0 / f64::from(clamp_tick_hz(tick_hz)))
}

/// Bridge server on TCP endpoints.
pub type TcpBridgeServer<S> = BridgeServer<S, TcpRequestChannel, TcpPublisher>;

/// Binds both endpoints from `cfg`.
pub async fn bind<S: Scene + Send>(scene: S, cfg: &BridgeConfig) -> anyhow::Result<TcpBridgeServer<S>> {
    let reqrep: SocketAddr = cfg.reqrep_addr.parse().context("parse reqrep_addr")?;
    let pub_addr: SocketAddr = cfg.pub_addr.parse().context("parse pub_addr")?;
    let requests = TcpRequestChannel::bind(reqrep).await?;
    let publisher = TcpPublisher::bind(pub_addr).await?;
    info!(
        reqrep = %requests.local_addr()?,
        publish = %publisher.local_addr()?,
        "bridge endpoints bound"
    );
    Ok(BridgeServer::new(scene, requests, publisher))
}

/// Helper for tests: binds both endpoints to ephemeral localhost ports and
/// returns the config a client needs to reach them.
pub async fn bind_ephemeral<S: Scene + Send>(
    scene: S,
    tick_hz: u32,
) -> anyhow::Result<(TcpBridgeServer<S>, BridgeConfig)> {
    let any = SocketAddr::new(IpAddr::V4(Ipv4Addr::LOCALHOST), 0).to_string();
    let cfg = BridgeConfig {
        reqrep_addr: any.clone(),
        pub_addr: any,
        tick_hz,
        scene_path: None,
    };
    let server = bind(scene, &cfg).await?;
    let cfg = BridgeConfig {
        reqrep_addr: server.requests().local_addr()?.to_string(),
        pub_addr: server.publisher().local_addr()?.to_string(),
        ..cfg
    };
    Ok((server, cfg))
}

#[cfg(test)]
mod tests {
    use bytes::Bytes;
    use scenelink_shared::math::{Mat4, Vec3};
    use scenelink_shared::wire::{encode_name, encode_request, Command, PubMessage};
    use tokio::sync::mpsc;

    use super::*;
    use crate::memory_scene::InMemoryScene;
    use crate::scene::Timeline;
    use crate::transport::{MemoryPublishChannel, MemoryRequestChannel, MemoryRequester};

    type TestServer = BridgeServer<InMemoryScene, MemoryRequestChannel, MemoryPublishChannel>;

    fn server() -> (TestServer, MemoryRequester, mpsc::UnboundedReceiver<Bytes>) {
        let mut scene = InMemoryScene::new(Timeline::default());
        scene.set_camera(Some(Mat4::IDENTITY));
        scene.add_object("Light", Vec3::new(1.0, 0.0, -1.0));
        scene.add_object("Cube", Vec3::ZERO);
        let (requests, requester) = MemoryRequestChannel::pair();
        let (publisher, published) = MemoryPublishChannel::pair();
        (BridgeServer::new(scene, requests, publisher), requester, published)
    }

    fn drain(rx: &mut mpsc::UnboundedReceiver<Bytes>) -> Vec<PubMessage> {
        let mut out = Vec::new();
        while let Ok(msg) = rx.try_recv() {
            out.push(PubMessage::decode(msg).unwrap());
        }
        out
    }

    #[tokio::test]
    async fn all_pending_requests_are_served_in_one_tick() {
        let (mut server, mut requester, _published) = server();
        for _ in 0..5 {
            requester.send(encode_request(Command::Ping, &[]));
        }
        assert_eq!(server.step().await, TickOutcome::Continue);
        assert_eq!(server.last_stats().requests, 5);
        for _ in 0..5 {
            assert_eq!(requester.try_reply(), Some(Bytes::from_static(&[0x00])));
        }
        assert_eq!(requester.try_reply(), None);
    }

    #[tokio::test]
    async fn subscribed_positions_publish_every_tick() {
        let (mut server, mut requester, mut published) = server();
        requester.send(encode_request(Command::ObjSub, &encode_name("Light").unwrap()));
        server.step().await;
        assert_eq!(requester.try_reply(), Some(Bytes::from_static(&[0x00, 0x00, 0x00])));
        server.step().await;

        let msgs = drain(&mut published);
        assert_eq!(msgs.len(), 2);
        assert!(msgs.iter().all(|m| *m
            == PubMessage::PositionUpdated {
                id: 0,
                position: Vec3::new(1.0, 0.0, 1.0)
            }));
    }

    #[tokio::test]
    async fn render_session_pauses_publishing() {
        let (mut server, requester, mut published) = server();
        requester.send(encode_request(Command::ObjSub, &encode_name("Light").unwrap()));
        requester.send(encode_request(Command::PrepareToRender, &[]));
        server.step().await;
        server.step().await;
        assert!(drain(&mut published).is_empty());

        requester.send(encode_request(Command::InformRenderFinished, &[]));
        server.step().await;
        assert_eq!(drain(&mut published).len(), 1);
    }

    #[tokio::test]
    async fn renames_and_deletions_are_published_in_order() {
        let (mut server, requester, mut published) = server();
        requester.send(encode_request(Command::ObjSub, &encode_name("Light").unwrap()));
        requester.send(encode_request(Command::ObjSub, &encode_name("Cube").unwrap()));
        server.step().await;
        drain(&mut published);

        let scene = server.bridge_mut().scene_mut();
        let light = scene.find_by_name("Light").unwrap();
        let cube = scene.find_by_name("Cube").unwrap();
        scene.rename(light, "Sun");
        scene.remove(cube);
        server.step().await;

        let msgs = drain(&mut published);
        assert_eq!(
            msgs[0],
            PubMessage::Renamed {
                id: 0,
                new_name: "Sun".into()
            }
        );
        assert_eq!(msgs[1], PubMessage::Deleted { id: 1 });
        assert_eq!(msgs[2].id(), 0);
        assert_eq!(msgs.len(), 3);
    }

    #[tokio::test]
    async fn faults_do_not_end_the_tick() {
        let (mut server, mut requester, _published) = server();
        requester.inject_fault("connection reset");
        server.step().await;
        assert_eq!(server.last_stats().faults, 1);

        requester.send(encode_request(Command::Ping, &[]));
        assert_eq!(server.step().await, TickOutcome::Continue);
        assert_eq!(requester.try_reply(), Some(Bytes::from_static(&[0x00])));
    }

    #[tokio::test]
    async fn stop_flag_closes_channels() {
        let (mut server, requester, _published) = server();
        let stop = server.stop_handle();
        server.step().await;
        stop.stop();

        assert_eq!(server.step().await, TickOutcome::Stopped);
        assert!(server.requests().is_closed());
        assert!(server.publisher().is_closed());
        let ticks = server.tick();

        requester.send(encode_request(Command::Ping, &[]));
        assert_eq!(server.step().await, TickOutcome::Stopped);
        assert_eq!(server.tick(), ticks);
    }

    #[tokio::test]
    async fn run_returns_after_stop() {
        let (mut server, _requester, _published) = server();
        let stop = server.stop_handle();
        assert_eq!(server.run_for_ticks(3, 120).await, TickOutcome::Continue);
        assert_eq!(server.tick(), 3);
        stop.stop();
        server.run(120).await;
        assert_eq!(server.tick(), 3);
    }

    #[test]
    fn tick_interval_is_clamped() {
        assert_eq!(tick_interval(0), Duration::from_secs(1));
        assert_eq!(tick_interval(1000), tick_interval(120));
        assert_eq!(tick_interval(20).as_millis(), 50);
    }
}
