//! Request/reply and publish transports.
//!
//! The tick loop talks to clients through two channel traits. The request
//! channel is polled without blocking: [`RequestChannel::try_recv`] returns
//! [`RecvOutcome::WouldBlock`] once nothing is pending, which ends the drain
//! for the current tick. The publish channel fans each message out to every
//! connected subscriber.
//!
//! TCP implementations frame every message with [`scenelink_shared::net`]'s
//! length prefix. In-memory implementations back unit tests.

use std::collections::{HashMap, VecDeque};
use std::net::SocketAddr;
use std::task::Poll;
use std::time::Duration;

use anyhow::Context;
use async_trait::async_trait;
use bytes::{Bytes, BytesMut};
use tokio::io::AsyncWriteExt;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use scenelink_shared::net::{encode_frame, take_frame};

/// Identifies the connection a request arrived on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct PeerId(pub u64);

/// One request and where its reply goes.
#[derive(Debug, Clone)]
pub struct Request {
    pub from: PeerId,
    pub payload: Bytes,
}

/// Result of a non-blocking receive.
#[derive(Debug)]
pub enum RecvOutcome {
    Message(Request),
    /// Nothing is pending right now.
    WouldBlock,
    /// The transport failed. The caller logs it and moves on.
    Fault(anyhow::Error),
}

#[async_trait]
pub trait RequestChannel: Send {
    async fn try_recv(&mut self) -> RecvOutcome;

    async fn reply(&mut self, to: PeerId, reply: Bytes) -> anyhow::Result<()>;

    async fn close(&mut self);
}

#[async_trait]
pub trait PublishChannel: Send {
    async fn publish(&mut self, message: Bytes) -> anyhow::Result<()>;

    async fn close(&mut self);
}

/// Accepts one pending connection if there is one, without waiting.
async fn try_accept(listener: &TcpListener) -> Option<std::io::Result<(TcpStream, SocketAddr)>> {
    std::future::poll_fn(|cx| match listener.poll_accept(cx) {
        Poll::Ready(res) => Poll::Ready(Some(res)),
        Poll::Pending => Poll::Ready(None),
    })
    .await
}

/// How long one reply may take to reach the client's socket before the
/// client is dropped.
pub const REPLY_WRITE_TIMEOUT: Duration = Duration::from_secs(1);

struct Peer {
    stream: TcpStream,
    addr: SocketAddr,
    buf: BytesMut,
}

/// Request/reply endpoint over TCP. Any number of clients may connect; each
/// reply goes back on the connection its request came from.
pub struct TcpRequestChannel {
    listener: TcpListener,
    peers: HashMap<PeerId, Peer>,
    next_peer: u64,
    pending: VecDeque<Request>,
    closed: bool,
}

impl TcpRequestChannel {
    pub async fn bind(addr: SocketAddr) -> anyhow::Result<Self> {
        let listener = TcpListener::bind(addr)
            .await
            .with_context(|| format!("bind request endpoint {addr}"))?;
        Ok(Self {
            listener,
            peers: HashMap::new(),
            next_peer: 0,
            pending: VecDeque::new(),
            closed: false,
        })
    }

    pub fn local_addr(&self) -> anyhow::Result<SocketAddr> {
        Ok(self.listener.local_addr()?)
    }

    pub fn peer_count(&self) -> usize {
        self.peers.len()
    }

    async fn accept_pending(&mut self) -> anyhow::Result<()> {
        while let Some(res) = try_accept(&self.listener).await {
            let (stream, addr) = res.context("accept request connection")?;
            stream.set_nodelay(true).context("set nodelay")?;
            let id = PeerId(self.next_peer);
            self.next_peer += 1;
            info!(peer = id.0, %addr, "request client connected");
            self.peers.insert(
                id,
                Peer {
                    stream,
                    addr,
                    buf: BytesMut::with_capacity(4096),
                },
            );
        }
        Ok(())
    }

    /// Reads whatever each peer has sent and queues complete requests.
    fn read_peers(&mut self) -> Option<anyhow::Error> {
        let mut dropped = Vec::new();
        let mut fault = None;
        let mut ids: Vec<PeerId> = self.peers.keys().copied().collect();
        ids.sort();

        for id in ids {
            let Some(peer) = self.peers.get_mut(&id) else {
                continue;
            };
            loop {
                match peer.stream.try_read_buf(&mut peer.buf) {
                    Ok(0) => {
                        dropped.push(id);
                        break;
                    }
                    Ok(_) => continue,
                    Err(e) if e.kind() == std::io::ErrorKind::WouldBlock => break,
                    Err(e) => {
                        warn!(peer = id.0, addr = %peer.addr, error = %e, "request read failed");
                        dropped.push(id);
                        break;
                    }
                }
            }
            loop {
                match take_frame(&mut peer.buf) {
                    Ok(Some(payload)) => self.pending.push_back(Request { from: id, payload }),
                    Ok(None) => break,
                    Err(e) => {
                        fault = Some(e.context(format!("peer {} sent a bad frame", peer.addr)));
                        dropped.push(id);
                        break;
                    }
                }
            }
        }

        for id in dropped {
            if let Some(peer) = self.peers.remove(&id) {
                info!(peer = id.0, addr = %peer.addr, "request client disconnected");
            }
        }
        fault
    }
}

#[async_trait]
impl RequestChannel for TcpRequestChannel {
    async fn try_recv(&mut self) -> RecvOutcome {
        if self.closed {
            return RecvOutcome::WouldBlock;
        }
        if let Some(req) = self.pending.pop_front() {
            return RecvOutcome::Message(req);
        }
        if let Err(e) = self.accept_pending().await {
            return RecvOutcome::Fault(e);
        }
        if let Some(e) = self.read_peers() {
            return RecvOutcome::Fault(e);
        }
        match self.pending.pop_front() {
            Some(req) => RecvOutcome::Message(req),
            None => RecvOutcome::WouldBlock,
        }
    }

    async fn reply(&mut self, to: PeerId, reply: Bytes) -> anyhow::Result<()> {
        let frame = encode_frame(&reply)?;
        let peer = self
            .peers
            .get_mut(&to)
            .with_context(|| format!("peer {} is gone", to.0))?;
        let written = tokio::time::timeout(REPLY_WRITE_TIMEOUT, peer.stream.write_all(&frame)).await;
        let addr = peer.addr;
        match written {
            Ok(Ok(())) => Ok(()),
            Ok(Err(e)) => {
                self.peers.remove(&to);
                Err(e).with_context(|| format!("reply to {addr}"))
            }
            Err(_) => {
                self.peers.remove(&to);
                warn!(peer = to.0, %addr, "request client not reading replies; dropped");
                anyhow::bail!("reply to {addr} timed out after {REPLY_WRITE_TIMEOUT:?}")
            }
        }
    }

    async fn close(&mut self) {
        for (_, mut peer) in self.peers.drain() {
            let _ = peer.stream.shutdown().await;
        }
        self.pending.clear();
        self.closed = true;
        debug!("request endpoint closed");
    }
}

/// How long one subscriber may take to accept a message before it is dropped.
pub const PUBLISH_WRITE_TIMEOUT: Duration = Duration::from_millis(50);

struct Subscriber {
    stream: TcpStream,
    addr: SocketAddr,
}

/// Publish endpoint over TCP. Subscribers only receive; anything they send
/// is ignored.
pub struct TcpPublisher {
    listener: TcpListener,
    subscribers: Vec<Subscriber>,
    closed: bool,
}

impl TcpPublisher {
    pub async fn bind(addr: SocketAddr) -> anyhow::Result<Self> {
        let listener = TcpListener::bind(addr)
            .await
            .with_context(|| format!("bind publish endpoint {addr}"))?;
        Ok(Self {
            listener,
            subscribers: Vec::new(),
            closed: false,
        })
    }

    pub fn local_addr(&self) -> anyhow::Result<SocketAddr> {
        Ok(self.listener.local_addr()?)
    }

    pub fn subscriber_count(&self) -> usize {
        self.subscribers.len()
    }

    /// Picks up newly connected subscribers.
    pub async fn accept_pending(&mut self) -> anyhow::Result<()> {
        while let Some(res) = try_accept(&self.listener).await {
            let (stream, addr) = res.context("accept subscriber")?;
            stream.set_nodelay(true).context("set nodelay")?;
            info!(%addr, "subscriber connected");
            self.subscribers.push(Subscriber { stream, addr });
        }
        Ok(())
    }
}

#[async_trait]
impl PublishChannel for TcpPublisher {
    async fn publish(&mut self, message: Bytes) -> anyhow::Result<()> {
        if self.closed {
            return Ok(());
        }
        self.accept_pending().await?;
        let frame = encode_frame(&message)?;

        let mut kept = Vec::with_capacity(self.subscribers.len());
        for mut sub in self.subscribers.drain(..) {
            let written =
                tokio::time::timeout(PUBLISH_WRITE_TIMEOUT, sub.stream.write_all(&frame)).await;
            match written {
                Ok(Ok(())) => kept.push(sub),
                Ok(Err(e)) => info!(addr = %sub.addr, error = %e, "subscriber dropped"),
                Err(_) => warn!(addr = %sub.addr, "subscriber too slow; dropped"),
            }
        }
        self.subscribers = kept;
        Ok(())
    }

    async fn close(&mut self) {
        for mut sub in self.subscribers.drain(..) {
            let _ = sub.stream.shutdown().await;
        }
        self.closed = true;
        debug!("publish endpoint closed");
    }
}

enum Incoming {
    Request(Bytes),
    Fault(String),
}

/// In-process request channel. Every request comes from [`PeerId`] 0.
pub struct MemoryRequestChannel {
    incoming: mpsc::UnboundedReceiver<Incoming>,
    replies: mpsc::UnboundedSender<Bytes>,
    closed: bool,
}

/// Client end of a [`MemoryRequestChannel`].
pub struct MemoryRequester {
    outgoing: mpsc::UnboundedSender<Incoming>,
    replies: mpsc::UnboundedReceiver<Bytes>,
}

impl MemoryRequestChannel {
    pub fn pair() -> (Self, MemoryRequester) {
        let (req_tx, req_rx) = mpsc::unbounded_channel();
        let (rep_tx, rep_rx) = mpsc::unbounded_channel();
        (
            Self {
                incoming: req_rx,
                replies: rep_tx,
                closed: false,
            },
            MemoryRequester {
                outgoing: req_tx,
                replies: rep_rx,
            },
        )
    }

    pub fn is_closed(&self) -> bool {
        self.closed
    }
}

impl MemoryRequester {
    pub fn send(&self, request: Bytes) {
        let _ = self.outgoing.send(Incoming::Request(request));
    }

    /// Makes the next receive report a transport fault.
    pub fn inject_fault(&self, reason: &str) {
        let _ = self.outgoing.send(Incoming::Fault(reason.to_string()));
    }

    pub fn try_reply(&mut self) -> Option<Bytes> {
        self.replies.try_recv().ok()
    }
}

#[async_trait]
impl RequestChannel for MemoryRequestChannel {
    async fn try_recv(&mut self) -> RecvOutcome {
        if self.closed {
            return RecvOutcome::WouldBlock;
        }
        match self.incoming.try_recv() {
            Ok(Incoming::Request(payload)) => RecvOutcome::Message(Request {
                from: PeerId(0),
                payload,
            }),
            Ok(Incoming::Fault(reason)) => RecvOutcome::Fault(anyhow::anyhow!(reason)),
            Err(_) => RecvOutcome::WouldBlock,
        }
    }

    async fn reply(&mut self, _to: PeerId, reply: Bytes) -> anyhow::Result<()> {
        self.replies
            .send(reply)
            .map_err(|_| anyhow::anyhow!("requester is gone"))
    }

    async fn close(&mut self) {
        self.closed = true;
    }
}

/// In-process publish channel.
pub struct MemoryPublishChannel {
    tx: mpsc::UnboundedSender<Bytes>,
    closed: bool,
}

impl MemoryPublishChannel {
    pub fn pair() -> (Self, mpsc::UnboundedReceiver<Bytes>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx, closed: false }, rx)
    }

    pub fn is_closed(&self) -> bool {
        self.closed
    }
}

#[async_trait]
impl PublishChannel for MemoryPublishChannel {
    async fn publish(&mut self, message: Bytes) -> anyhow::Result<()> {
        if self.closed {
            return Ok(());
        }
        // No receiver means nobody is listening, same as zero subscribers.
        let _ = self.tx.send(message);
        Ok(())
    }

    async fn close(&mut self) {
        self.closed = true;
    }
}

#[cfg(test)]
mod tests {
    use std::net::{IpAddr, Ipv4Addr};

    use scenelink_shared::math::{Mat4, Vec3};
    use scenelink_shared::net::FramedConn;
    use scenelink_shared::wire::{encode_name, encode_request, Command, RenderDataRequest};

    use super::*;
    use crate::memory_scene::InMemoryScene;
    use crate::scene::Timeline;
    use crate::server::{BridgeServer, TickOutcome};

    fn localhost() -> SocketAddr {
        SocketAddr::new(IpAddr::V4(Ipv4Addr::LOCALHOST), 0)
    }

    async fn recv_with_retry(chan: &mut TcpRequestChannel) -> Request {
        for _ in 0..200 {
            match chan.try_recv().await {
                RecvOutcome::Message(req) => return req,
                RecvOutcome::WouldBlock => tokio::time::sleep(Duration::from_millis(5)).await,
                RecvOutcome::Fault(e) => panic!("fault: {e:#}"),
            }
        }
        panic!("no request arrived");
    }

    #[tokio::test]
    async fn tcp_request_round_trip() {
        let mut chan = TcpRequestChannel::bind(localhost()).await.unwrap();
        let addr = chan.local_addr().unwrap();
        let mut client = FramedConn::connect(addr).await.unwrap();

        assert!(matches!(chan.try_recv().await, RecvOutcome::WouldBlock));
        client.send(&[0xFF]).await.unwrap();
        let req = recv_with_retry(&mut chan).await;
        assert_eq!(&req.payload[..], &[0xFF]);

        chan.reply(req.from, Bytes::from_static(&[0x00])).await.unwrap();
        assert_eq!(&client.recv().await.unwrap()[..], &[0x00]);
    }

    #[tokio::test]
    async fn client_that_never_reads_does_not_stall_the_tick() {
        let mut scene = InMemoryScene::new(Timeline {
            frame_start: 1,
            frame_end: 100_000,
            ..Default::default()
        });
        scene.set_camera(Some(Mat4::IDENTITY));
        scene.add_object("Ball", Vec3::ZERO);
        let requests = TcpRequestChannel::bind(localhost()).await.unwrap();
        let addr = requests.local_addr().unwrap();
        let (publisher, _published) = MemoryPublishChannel::pair();
        let mut server = BridgeServer::new(scene, requests, publisher);

        // 40 replies of 1.2 MB each, far more than the socket buffers hold.
        let mut client = FramedConn::connect(addr).await.unwrap();
        client
            .send(&encode_request(Command::ObjSub, &encode_name("Ball").unwrap()))
            .await
            .unwrap();
        let render = RenderDataRequest {
            id: 0,
            start_frame: 0,
            end_frame: 99_999,
        };
        for _ in 0..40 {
            client
                .send(&encode_request(Command::GetRenderingLocationData, &render.encode()))
                .await
                .unwrap();
        }

        let mut faults = 0;
        for _ in 0..200 {
            let outcome = tokio::time::timeout(Duration::from_secs(10), server.step())
                .await
                .expect("tick finished");
            assert_eq!(outcome, TickOutcome::Continue);
            faults += server.last_stats().faults;
            if faults > 0 {
                break;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        assert!(faults > 0);
        assert_eq!(server.requests().peer_count(), 0);
    }

    #[tokio::test]
    async fn tcp_requests_keep_order() {
        let mut chan = TcpRequestChannel::bind(localhost()).await.unwrap();
        let mut client = FramedConn::connect(chan.local_addr().unwrap()).await.unwrap();
        client.send(&[1]).await.unwrap();
        client.send(&[2]).await.unwrap();

        let first = recv_with_retry(&mut chan).await;
        let second = recv_with_retry(&mut chan).await;
        assert_eq!((first.payload[0], second.payload[0]), (1, 2));
    }

    #[tokio::test]
    async fn tcp_publish_reaches_subscribers() {
        let mut publisher = TcpPublisher::bind(localhost()).await.unwrap();
        let mut sub = FramedConn::connect(publisher.local_addr().unwrap()).await.unwrap();
        for _ in 0..200 {
            publisher.accept_pending().await.unwrap();
            if publisher.subscriber_count() == 1 {
                break;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        assert_eq!(publisher.subscriber_count(), 1);

        publisher.publish(Bytes::from_static(&[0, 0, 2])).await.unwrap();
        assert_eq!(&sub.recv().await.unwrap()[..], &[0, 0, 2]);
    }

    #[tokio::test]
    async fn memory_channels_deliver_and_report_faults() {
        let (mut chan, mut requester) = MemoryRequestChannel::pair();
        requester.inject_fault("boom");
        requester.send(Bytes::from_static(&[0xFF]));

        assert!(matches!(chan.try_recv().await, RecvOutcome::Fault(_)));
        let RecvOutcome::Message(req) = chan.try_recv().await else {
            panic!("expected a message");
        };
        chan.reply(req.from, Bytes::from_static(&[0])).await.unwrap();
        assert_eq!(requester.try_reply(), Some(Bytes::from_static(&[0])));
        assert!(matches!(chan.try_recv().await, RecvOutcome::WouldBlock));

        chan.close().await;
        requester.send(Bytes::from_static(&[0xFF]));
        assert!(matches!(chan.try_recv().await, RecvOutcome::WouldBlock));
    }
}
