//! Message framing over TCP.
//!
//! Both bridge endpoints carry whole messages, so each message is framed as a
//! little-endian `u32` length followed by that many bytes. The codec in
//! [`crate::wire`] only ever sees complete frames.

use anyhow::Context;
use bytes::{Buf, BufMut, Bytes, BytesMut};
use std::net::SocketAddr;
use tokio::{
    io::{AsyncReadExt, AsyncWriteExt},
    net::TcpStream,
};
use tracing::debug;

/// Size of the frame length prefix.
pub const FRAME_HEADER_LEN: usize = 4;
/// Upper bound on a single frame; larger lengths are treated as corruption.
pub const MAX_FRAME_LEN: usize = 64 * 1024 * 1024;

/// Prepends the length prefix to `payload`.
pub fn encode_frame(payload: &[u8]) -> anyhow::Result<Bytes> {
    anyhow::ensure!(
        payload.len() <= MAX_FRAME_LEN,
        "frame of {} bytes exceeds limit",
        payload.len()
    );
    let mut buf = BytesMut::with_capacity(FRAME_HEADER_LEN + payload.len());
    buf.put_u32_le(payload.len() as u32);
    buf.extend_from_slice(payload);
    Ok(buf.freeze())
}

/// Pulls one complete frame off the front of `buf`, if one is buffered.
///
/// Used by readers that fill `buf` without blocking and may hold a partial
/// frame between calls.
pub fn take_frame(buf: &mut BytesMut) -> anyhow::Result<Option<Bytes>> {
    if buf.len() < FRAME_HEADER_LEN {
        return Ok(None);
    }
    let len = u32::from_le_bytes([buf[0], buf[1], buf[2], buf[3]]) as usize;
    anyhow::ensure!(len <= MAX_FRAME_LEN, "frame length {len} exceeds limit");
    if buf.len() < FRAME_HEADER_LEN + len {
        return Ok(None);
    }
    buf.advance(FRAME_HEADER_LEN);
    Ok(Some(buf.split_to(len).freeze()))
}

/// Framed connection that sends and waits for whole messages.
#[derive(Debug)]
pub struct FramedConn {
    stream: TcpStream,
}

impl FramedConn {
    pub fn new(stream: TcpStream) -> Self {
        Self { stream }
    }

    pub async fn connect(addr: SocketAddr) -> anyhow::Result<Self> {
        let stream = TcpStream::connect(addr)
            .await
            .with_context(|| format!("tcp connect {addr}"))?;
        stream.set_nodelay(true).context("set nodelay")?;
        debug!(%addr, "tcp connected");
        Ok(Self::new(stream))
    }

    pub async fn send(&mut self, payload: &[u8]) -> anyhow::Result<()> {
        let frame = encode_frame(payload)?;
        self.stream.write_all(&frame).await.context("tcp write")?;
        Ok(())
    }

    pub async fn recv(&mut self) -> anyhow::Result<Bytes> {
        let mut len_buf = [0u8; FRAME_HEADER_LEN];
        self.stream
            .read_exact(&mut len_buf)
            .await
            .context("tcp read len")?;
        let len = u32::from_le_bytes(len_buf) as usize;
        anyhow::ensure!(len <= MAX_FRAME_LEN, "frame length {len} exceeds limit");
        let mut payload = vec![0u8; len];
        self.stream
            .read_exact(&mut payload)
            .await
            .context("tcp read payload")?;
        Ok(Bytes::from(payload))
    }

    pub fn peer_addr(&self) -> anyhow::Result<SocketAddr> {
        Ok(self.stream.peer_addr()?)
    }
}
