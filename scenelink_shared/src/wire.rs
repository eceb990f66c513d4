//! Binary wire codec.
//!
//! Every request, reply, and published message is a flat byte string.
//! All multi-byte values are little-endian; this is fixed by the protocol and
//! never negotiated.
//!
//! Layouts:
//! - request: `[u8 command][payload]`
//! - reply: `[u8 status][payload]`
//! - published message: `[u16 id][u8 type][payload]`
//! - name: `[u8 len][len bytes of UTF-8]`
//! - position: `[f32 x][f32 y][f32 z]`

use std::fmt;

use bytes::{Buf, BufMut, Bytes, BytesMut};

use crate::math::Vec3;

/// Size of an encoded object id.
pub const ID_LEN: usize = 2;
/// Size of an encoded position.
pub const POSITION_LEN: usize = 12;
/// Longest name (in bytes) that fits the one-byte length prefix.
pub const MAX_NAME_LEN: usize = u8::MAX as usize;

/// Request command codes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Command {
    ObjList = 0x01,
    ObjSub = 0x02,
    ObjUnsub = 0x03,
    PrepareToRender = 0x04,
    InformRenderFinished = 0x05,
    GetRenderingLocationData = 0x06,
    GetAnimationInfo = 0x07,
    Ping = 0xFF,
}

impl Command {
    pub fn from_u8(v: u8) -> Option<Self> {
        match v {
            0x01 => Some(Command::ObjList),
            0x02 => Some(Command::ObjSub),
            0x03 => Some(Command::ObjUnsub),
            0x04 => Some(Command::PrepareToRender),
            0x05 => Some(Command::InformRenderFinished),
            0x06 => Some(Command::GetRenderingLocationData),
            0x07 => Some(Command::GetAnimationInfo),
            0xFF => Some(Command::Ping),
            _ => None,
        }
    }
}

/// Reply status codes. Every reply starts with one.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StatusCode {
    Success = 0x00,
    ObjectNotFound = 0x01,
    InvalidRequestData = 0x02,
    InternalError = 0xFE,
    UnknownCommand = 0xFF,
}

impl StatusCode {
    pub fn from_u8(v: u8) -> Option<Self> {
        match v {
            0x00 => Some(StatusCode::Success),
            0x01 => Some(StatusCode::ObjectNotFound),
            0x02 => Some(StatusCode::InvalidRequestData),
            0xFE => Some(StatusCode::InternalError),
            0xFF => Some(StatusCode::UnknownCommand),
            _ => None,
        }
    }
}

/// Published message type codes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PubMsgType {
    PositionUpdated = 0x00,
    Renamed = 0x01,
    Deleted = 0x02,
}

impl PubMsgType {
    pub fn from_u8(v: u8) -> Option<Self> {
        match v {
            0x00 => Some(PubMsgType::PositionUpdated),
            0x01 => Some(PubMsgType::Renamed),
            0x02 => Some(PubMsgType::Deleted),
            _ => None,
        }
    }
}

/// Codec errors.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WireError {
    /// Tried to read past the end of the buffer.
    Truncated { needed: usize, remaining: usize },
    /// Name longer than [`MAX_NAME_LEN`] bytes.
    NameTooLong(usize),
    InvalidUtf8,
    EmptyMessage,
    UnknownStatus(u8),
    UnknownMessageType(u8),
}

impl fmt::Display for WireError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            WireError::Truncated { needed, remaining } => {
                write!(f, "truncated message: needed {needed} bytes, {remaining} left")
            }
            WireError::NameTooLong(len) => {
                write!(f, "name is {len} bytes, at most {MAX_NAME_LEN} fit")
            }
            WireError::InvalidUtf8 => write!(f, "name is not valid UTF-8"),
            WireError::EmptyMessage => write!(f, "empty message"),
            WireError::UnknownStatus(b) => write!(f, "unknown status code {b:#04x}"),
            WireError::UnknownMessageType(b) => write!(f, "unknown message type {b:#04x}"),
        }
    }
}

impl std::error::Error for WireError {}

pub type WireResult<T> = Result<T, WireError>;

fn ensure(remaining: usize, needed: usize) -> WireResult<()> {
    if remaining < needed {
        return Err(WireError::Truncated { needed, remaining });
    }
    Ok(())
}

// Primitives

pub fn put_id(buf: &mut BytesMut, id: u16) {
    buf.put_u16_le(id);
}

pub fn get_id(buf: &mut impl Buf) -> WireResult<u16> {
    ensure(buf.remaining(), ID_LEN)?;
    Ok(buf.get_u16_le())
}

pub fn put_name(buf: &mut BytesMut, name: &str) -> WireResult<()> {
    let len = name.len();
    if len > MAX_NAME_LEN {
        return Err(WireError::NameTooLong(len));
    }
    buf.put_u8(len as u8);
    buf.put_slice(name.as_bytes());
    Ok(())
}

pub fn get_name(buf: &mut impl Buf) -> WireResult<String> {
    ensure(buf.remaining(), 1)?;
    let len = buf.get_u8() as usize;
    ensure(buf.remaining(), len)?;
    let raw = buf.copy_to_bytes(len);
    String::from_utf8(raw.to_vec()).map_err(|_| WireError::InvalidUtf8)
}

pub fn put_position(buf: &mut BytesMut, p: Vec3) {
    buf.put_f32_le(p.x);
    buf.put_f32_le(p.y);
    buf.put_f32_le(p.z);
}

pub fn get_position(buf: &mut impl Buf) -> WireResult<Vec3> {
    ensure(buf.remaining(), POSITION_LEN)?;
    Ok(Vec3::new(buf.get_f32_le(), buf.get_f32_le(), buf.get_f32_le()))
}

pub fn get_u64(buf: &mut impl Buf) -> WireResult<u64> {
    ensure(buf.remaining(), 8)?;
    Ok(buf.get_u64_le())
}

/// Encodes a name on its own.
pub fn encode_name(name: &str) -> WireResult<Bytes> {
    let mut buf = BytesMut::with_capacity(1 + name.len());
    put_name(&mut buf, name)?;
    Ok(buf.freeze())
}

/// Encodes a list of names back to back (the `OBJ_LIST` reply payload).
pub fn encode_name_list<'a>(names: impl IntoIterator<Item = &'a str>) -> WireResult<Bytes> {
    let mut buf = BytesMut::new();
    for name in names {
        put_name(&mut buf, name)?;
    }
    Ok(buf.freeze())
}

/// Decodes names until the buffer is exhausted.
pub fn decode_name_list(mut buf: impl Buf) -> WireResult<Vec<String>> {
    let mut out = Vec::new();
    while buf.has_remaining() {
        out.push(get_name(&mut buf)?);
    }
    Ok(out)
}

pub fn encode_positions(positions: &[Vec3]) -> Bytes {
    let mut buf = BytesMut::with_capacity(positions.len() * POSITION_LEN);
    for p in positions {
        put_position(&mut buf, *p);
    }
    buf.freeze()
}

/// Decodes a packed position sequence. Trailing partial positions are an error.
pub fn decode_positions(mut buf: impl Buf) -> WireResult<Vec<Vec3>> {
    let mut out = Vec::with_capacity(buf.remaining() / POSITION_LEN);
    while buf.has_remaining() {
        out.push(get_position(&mut buf)?);
    }
    Ok(out)
}

// Requests and replies

pub fn encode_request(command: Command, payload: &[u8]) -> Bytes {
    let mut buf = BytesMut::with_capacity(1 + payload.len());
    buf.put_u8(command as u8);
    buf.put_slice(payload);
    buf.freeze()
}

pub fn encode_reply(status: StatusCode, payload: &[u8]) -> Bytes {
    let mut buf = BytesMut::with_capacity(1 + payload.len());
    buf.put_u8(status as u8);
    buf.put_slice(payload);
    buf.freeze()
}

/// Splits a reply into its status and payload.
pub fn decode_reply(mut reply: Bytes) -> WireResult<(StatusCode, Bytes)> {
    if reply.is_empty() {
        return Err(WireError::EmptyMessage);
    }
    let b = reply.get_u8();
    let status = StatusCode::from_u8(b).ok_or(WireError::UnknownStatus(b))?;
    Ok((status, reply))
}

/// Payload of `GET_RENDERING_LOCATION_DATA`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RenderDataRequest {
    pub id: u16,
    pub start_frame: u64,
    pub end_frame: u64,
}

impl RenderDataRequest {
    pub fn encode(&self) -> Bytes {
        let mut buf = BytesMut::with_capacity(ID_LEN + 16);
        put_id(&mut buf, self.id);
        buf.put_u64_le(self.start_frame);
        buf.put_u64_le(self.end_frame);
        buf.freeze()
    }

    pub fn decode(buf: &mut impl Buf) -> WireResult<Self> {
        Ok(Self {
            id: get_id(buf)?,
            start_frame: get_u64(buf)?,
            end_frame: get_u64(buf)?,
        })
    }
}

/// Reply payload of `GET_ANIMATION_INFO`.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct AnimationInfo {
    pub frame_count: u64,
    pub fps: f32,
}

impl AnimationInfo {
    pub fn encode(&self) -> Bytes {
        let mut buf = BytesMut::with_capacity(12);
        buf.put_u64_le(self.frame_count);
        buf.put_f32_le(self.fps);
        buf.freeze()
    }

    pub fn decode(buf: &mut impl Buf) -> WireResult<Self> {
        let frame_count = get_u64(buf)?;
        ensure(buf.remaining(), 4)?;
        Ok(Self {
            frame_count,
            fps: buf.get_f32_le(),
        })
    }
}

// Published messages

/// A message on the publish channel.
#[derive(Debug, Clone, PartialEq)]
pub enum PubMessage {
    PositionUpdated { id: u16, position: Vec3 },
    Renamed { id: u16, new_name: String },
    Deleted { id: u16 },
}

impl PubMessage {
    pub fn id(&self) -> u16 {
        match self {
            PubMessage::PositionUpdated { id, .. }
            | PubMessage::Renamed { id, .. }
            | PubMessage::Deleted { id } => *id,
        }
    }

    pub fn msg_type(&self) -> PubMsgType {
        match self {
            PubMessage::PositionUpdated { .. } => PubMsgType::PositionUpdated,
            PubMessage::Renamed { .. } => PubMsgType::Renamed,
            PubMessage::Deleted { .. } => PubMsgType::Deleted,
        }
    }

    pub fn encode(&self) -> WireResult<Bytes> {
        let mut buf = BytesMut::with_capacity(ID_LEN + 1 + POSITION_LEN);
        put_id(&mut buf, self.id());
        buf.put_u8(self.msg_type() as u8);
        match self {
            PubMessage::PositionUpdated { position, .. } => put_position(&mut buf, *position),
            PubMessage::Renamed { new_name, .. } => put_name(&mut buf, new_name)?,
            PubMessage::Deleted { .. } => {}
        }
        Ok(buf.freeze())
    }

    pub fn decode(mut buf: impl Buf) -> WireResult<Self> {
        let id = get_id(&mut buf)?;
        ensure(buf.remaining(), 1)?;
        let b = buf.get_u8();
        match PubMsgType::from_u8(b).ok_or(WireError::UnknownMessageType(b))? {
            PubMsgType::PositionUpdated => Ok(PubMessage::PositionUpdated {
                id,
                position: get_position(&mut buf)?,
            }),
            PubMsgType::Renamed => Ok(PubMessage::Renamed {
                id,
                new_name: get_name(&mut buf)?,
            }),
            PubMsgType::Deleted => Ok(PubMessage::Deleted { id }),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn names_survive_encoding() {
        let longest = "x".repeat(MAX_NAME_LEN);
        for name in ["", "Light", "Cube.001", "Kamera-Ü-日本", longest.as_str()] {
            let encoded = encode_name(name).unwrap();
            assert_eq!(encoded[0] as usize, name.len());
            let mut buf = encoded.clone();
            assert_eq!(get_name(&mut buf).unwrap(), name);
            assert!(!buf.has_remaining());
        }
    }

    #[test]
    fn overlong_name_is_rejected() {
        let name = "x".repeat(256);
        assert_eq!(encode_name(&name), Err(WireError::NameTooLong(256)));
    }

    #[test]
    fn position_layout_is_three_le_floats() {
        let p = Vec3::new(1.0, -2.5, 3.25);
        let bytes = encode_positions(&[p]);
        assert_eq!(bytes.len(), POSITION_LEN);
        assert_eq!(&bytes[0..4], &1.0f32.to_le_bytes());
        assert_eq!(&bytes[4..8], &(-2.5f32).to_le_bytes());
        assert_eq!(decode_positions(bytes).unwrap(), vec![p]);
    }

    #[test]
    fn name_list_decodes_in_order() {
        let bytes = encode_name_list(["Camera", "Cube", "Light"]).unwrap();
        assert_eq!(
            decode_name_list(bytes).unwrap(),
            vec!["Camera".to_string(), "Cube".to_string(), "Light".to_string()]
        );
    }

    #[test]
    fn truncated_name_is_an_error() {
        // Claims 5 bytes, carries 2.
        let mut buf = Bytes::from_static(&[5, b'a', b'b']);
        assert_eq!(
            get_name(&mut buf),
            Err(WireError::Truncated {
                needed: 5,
                remaining: 2
            })
        );
    }

    #[test]
    fn render_request_layout() {
        let req = RenderDataRequest {
            id: 3,
            start_frame: 10,
            end_frame: 20,
        };
        let bytes = req.encode();
        assert_eq!(bytes.len(), 18);
        assert_eq!(&bytes[0..2], &[3, 0]);
        let mut buf = bytes.clone();
        assert_eq!(RenderDataRequest::decode(&mut buf).unwrap(), req);

        let mut short = bytes.slice(0..10);
        assert!(matches!(
            RenderDataRequest::decode(&mut short),
            Err(WireError::Truncated { .. })
        ));
    }

    #[test]
    fn pub_message_layouts() {
        let moved = PubMessage::PositionUpdated {
            id: 0x0102,
            position: Vec3::new(1.0, 2.0, 3.0),
        }
        .encode()
        .unwrap();
        assert_eq!(moved.len(), 2 + 1 + 12);
        assert_eq!(&moved[0..3], &[0x02, 0x01, 0x00]);

        let renamed = PubMessage::Renamed {
            id: 7,
            new_name: "Lamp".into(),
        };
        let bytes = renamed.encode().unwrap();
        assert_eq!(&bytes[..], &[7, 0, 0x01, 4, b'L', b'a', b'm', b'p']);
        assert_eq!(PubMessage::decode(bytes).unwrap(), renamed);

        let deleted = PubMessage::Deleted { id: 9 }.encode().unwrap();
        assert_eq!(&deleted[..], &[9, 0, 0x02]);
    }

    #[test]
    fn reply_status_is_split_off() {
        let reply = encode_reply(StatusCode::Success, &[0, 0]);
        let (status, payload) = decode_reply(reply).unwrap();
        assert_eq!(status, StatusCode::Success);
        assert_eq!(&payload[..], &[0, 0]);
        assert_eq!(decode_reply(Bytes::new()), Err(WireError::EmptyMessage));
        assert_eq!(
            decode_reply(Bytes::from_static(&[0x42])),
            Err(WireError::UnknownStatus(0x42))
        );
    }

    #[test]
    fn every_status_byte_roundtrips() {
        for status in [
            StatusCode::Success,
            StatusCode::ObjectNotFound,
            StatusCode::InvalidRequestData,
            StatusCode::InternalError,
            StatusCode::UnknownCommand,
        ] {
            assert_eq!(StatusCode::from_u8(status as u8), Some(status));
        }
    }
}
