//! Bridge client.
//!
//! Holds one connection to each bridge endpoint:
//! - request/reply: one reply per request, in order
//! - publish: position, rename and delete messages for every client

use std::fmt;
use std::net::SocketAddr;
use std::time::Duration;

use anyhow::Context;
use bytes::{Bytes, BytesMut};
use scenelink_shared::{
    config::BridgeConfig,
    math::Vec3,
    net::{take_frame, FramedConn},
    wire::{self, AnimationInfo, Command, PubMessage, RenderDataRequest, StatusCode, WireError},
};
use tokio::{io::AsyncReadExt, net::TcpStream, time::Instant};
use tracing::{debug, info};

/// Client-side failures.
#[derive(Debug)]
pub enum ClientError {
    /// The bridge answered with a non-success status.
    Status { command: Command, status: StatusCode },
    /// A reply or published message did not decode.
    Malformed(WireError),
    /// Connection-level failure.
    Transport(anyhow::Error),
}

impl fmt::Display for ClientError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ClientError::Status { command, status } => {
                write!(f, "{command:?} failed with {status:?}")
            }
            ClientError::Malformed(e) => write!(f, "malformed message: {e}"),
            ClientError::Transport(e) => write!(f, "transport error: {e:#}"),
        }
    }
}

impl std::error::Error for ClientError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            ClientError::Malformed(e) => Some(e),
            _ => None,
        }
    }
}

impl From<WireError> for ClientError {
    fn from(e: WireError) -> Self {
        ClientError::Malformed(e)
    }
}

impl From<anyhow::Error> for ClientError {
    fn from(e: anyhow::Error) -> Self {
        ClientError::Transport(e)
    }
}

impl ClientError {
    /// The status the bridge replied with, if that is what failed.
    pub fn status(&self) -> Option<StatusCode> {
        match self {
            ClientError::Status { status, .. } => Some(*status),
            _ => None,
        }
    }
}

pub type ClientResult<T> = Result<T, ClientError>;

/// Receiving side of the publish endpoint.
///
/// Reads into a buffer so a receive that times out never loses part of a
/// message.
#[derive(Debug)]
pub struct UpdateStream {
    stream: TcpStream,
    buf: BytesMut,
}

impl UpdateStream {
    pub async fn connect(addr: SocketAddr) -> anyhow::Result<Self> {
        let stream = TcpStream::connect(addr)
            .await
            .with_context(|| format!("connect publish endpoint {addr}"))?;
        stream.set_nodelay(true).context("set nodelay")?;
        Ok(Self {
            stream,
            buf: BytesMut::with_capacity(4096),
        })
    }

    /// Next raw message, or `None` if nothing arrived within `timeout`.
    pub async fn recv_raw(&mut self, timeout: Duration) -> anyhow::Result<Option<Bytes>> {
        let deadline = Instant::now() + timeout;
        loop {
            if let Some(frame) = take_frame(&mut self.buf)? {
                return Ok(Some(frame));
            }
            match tokio::time::timeout_at(deadline, self.stream.read_buf(&mut self.buf)).await {
                Err(_) => return Ok(None),
                Ok(Ok(0)) => anyhow::bail!("publish endpoint closed"),
                Ok(Ok(_)) => {}
                Ok(Err(e)) => return Err(e).context("read publish endpoint"),
            }
        }
    }

    /// Next published message, or `None` on timeout.
    pub async fn recv(&mut self, timeout: Duration) -> ClientResult<Option<PubMessage>> {
        match self.recv_raw(timeout).await? {
            Some(frame) => Ok(Some(PubMessage::decode(frame)?)),
            None => Ok(None),
        }
    }
}

/// Connection to a running bridge.
pub struct BridgeClient {
    requests: FramedConn,
    updates: UpdateStream,
}

impl BridgeClient {
    /// Connects to both endpoints named in `cfg`.
    pub async fn connect(cfg: &BridgeConfig) -> anyhow::Result<Self> {
        let reqrep: SocketAddr = cfg.reqrep_addr.parse().context("parse reqrep_addr")?;
        let publish: SocketAddr = cfg.pub_addr.parse().context("parse pub_addr")?;

        info!(%reqrep, %publish, "Connecting to bridge");
        let updates = UpdateStream::connect(publish).await?;
        let requests = FramedConn::connect(reqrep).await?;
        Ok(Self { requests, updates })
    }

    /// Sends one request and returns the payload of a successful reply.
    pub async fn request(&mut self, command: Command, payload: &[u8]) -> ClientResult<Bytes> {
        self.requests
            .send(&wire::encode_request(command, payload))
            .await?;
        let reply = self.requests.recv().await?;
        let (status, body) = wire::decode_reply(reply)?;
        debug!(?command, ?status, len = body.len(), "reply");
        match status {
            StatusCode::Success => Ok(body),
            status => Err(ClientError::Status { command, status }),
        }
    }

    /// Names of every object in the scene.
    pub async fn list_objects(&mut self) -> ClientResult<Vec<String>> {
        let body = self.request(Command::ObjList, &[]).await?;
        Ok(wire::decode_name_list(body)?)
    }

    /// Subscribes to the named object and returns its id.
    pub async fn subscribe(&mut self, name: &str) -> ClientResult<u16> {
        let payload = wire::encode_name(name)?;
        let mut body = self.request(Command::ObjSub, &payload).await?;
        Ok(wire::get_id(&mut body)?)
    }

    pub async fn unsubscribe(&mut self, id: u16) -> ClientResult<()> {
        self.request(Command::ObjUnsub, &id.to_le_bytes()).await?;
        Ok(())
    }

    /// Round-trips an empty request; returns the time it took.
    pub async fn ping(&mut self) -> ClientResult<Duration> {
        let start = std::time::Instant::now();
        self.request(Command::Ping, &[]).await?;
        Ok(start.elapsed())
    }

    pub async fn animation_info(&mut self) -> ClientResult<AnimationInfo> {
        let mut body = self.request(Command::GetAnimationInfo, &[]).await?;
        Ok(AnimationInfo::decode(&mut body)?)
    }

    pub async fn prepare_to_render(&mut self) -> ClientResult<()> {
        self.request(Command::PrepareToRender, &[]).await?;
        Ok(())
    }

    pub async fn render_finished(&mut self) -> ClientResult<()> {
        self.request(Command::InformRenderFinished, &[]).await?;
        Ok(())
    }

    /// Camera-space locations of object `id` for render frames
    /// `start_frame..=end_frame`.
    pub async fn rendering_locations(
        &mut self,
        id: u16,
        start_frame: u64,
        end_frame: u64,
    ) -> ClientResult<Vec<Vec3>> {
        let req = RenderDataRequest {
            id,
            start_frame,
            end_frame,
        };
        let body = self
            .request(Command::GetRenderingLocationData, &req.encode())
            .await?;
        Ok(wire::decode_positions(body)?)
    }

    /// Next published message, or `None` if nothing arrived within `timeout`.
    pub async fn recv_update(&mut self, timeout: Duration) -> ClientResult<Option<PubMessage>> {
        self.updates.recv(timeout).await
    }

    /// Waits up to `timeout` for a message matching `pred`, discarding others.
    pub async fn wait_for_update(
        &mut self,
        timeout: Duration,
        mut pred: impl FnMut(&PubMessage) -> bool,
    ) -> ClientResult<Option<PubMessage>> {
        let deadline = Instant::now() + timeout;
        loop {
            let left = deadline.saturating_duration_since(Instant::now());
            if left.is_zero() {
                return Ok(None);
            }
            match self.recv_update(left).await? {
                Some(msg) if pred(&msg) => return Ok(Some(msg)),
                Some(_) => continue,
                None => return Ok(None),
            }
        }
    }

    pub fn server_peer(&self) -> anyhow::Result<SocketAddr> {
        self.requests.peer_addr()
    }
}
