//! Wire protocol for the desktop rich-presence IPC channel.
//!
//! Every message on the channel is `opcode: u32 LE || length: u32 LE || payload`
//! with a JSON payload of exactly `length` bytes. There is no other message
//! boundary. This crate is shared by the session client and the fake endpoints
//! used in tests so both sides agree on framing and payload shape.

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;
use std::io::{self, Read, Write};

pub const PROTOCOL_VERSION: u32 = 1;
pub const HEADER_BYTES: usize = 8;
pub const MAX_FRAME_BYTES: usize = 64 * 1024; // 64KB

pub const CMD_SET_ACTIVITY: &str = "SET_ACTIVITY";
pub const CMD_PING: &str = "PING";
pub const CMD_DISPATCH: &str = "DISPATCH";
pub const EVT_READY: &str = "READY";
pub const EVT_ERROR: &str = "ERROR";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u32)]
pub enum Opcode {
    Handshake = 0,
    Frame = 1,
    Close = 2,
    Ping = 3,
    Pong = 4,
}

impl Opcode {
    pub fn as_u32(self) -> u32 {
        self as u32
    }
}

impl TryFrom<u32> for Opcode {
    type Error = FrameError;

    fn try_from(value: u32) -> Result<Self, Self::Error> {
        match value {
            0 => Ok(Opcode::Handshake),
            1 => Ok(Opcode::Frame),
            2 => Ok(Opcode::Close),
            3 => Ok(Opcode::Ping),
            4 => Ok(Opcode::Pong),
            other => Err(FrameError::UnknownOpcode(other)),
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum FrameError {
    #[error("frame I/O failed: {0}")]
    Io(#[from] io::Error),

    #[error("unknown opcode {0}")]
    UnknownOpcode(u32),

    #[error("frame payload of {0} bytes exceeds the {limit} byte limit", limit = MAX_FRAME_BYTES)]
    TooLarge(usize),
}

/// One decoded message unit.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    pub opcode: Opcode,
    pub payload: Vec<u8>,
}

impl Frame {
    pub fn new(opcode: Opcode, payload: impl Into<Vec<u8>>) -> Self {
        Self {
            opcode,
            payload: payload.into(),
        }
    }

    pub fn parse<T: DeserializeOwned>(&self) -> serde_json::Result<T> {
        serde_json::from_slice(&self.payload)
    }

    /// Decodes one frame from the front of `bytes`.
    ///
    /// Returns `Ok(None)` when the buffer does not yet hold a complete frame,
    /// otherwise the frame and the number of bytes it occupied.
    pub fn decode(bytes: &[u8]) -> Result<Option<(Frame, usize)>, FrameError> {
        if bytes.len() < HEADER_BYTES {
            return Ok(None);
        }
        let mut header = [0u8; HEADER_BYTES];
        header.copy_from_slice(&bytes[..HEADER_BYTES]);
        let (opcode, length) = parse_header(header)?;

        let end = HEADER_BYTES + length;
        if bytes.len() < end {
            return Ok(None);
        }
        let frame = Frame::new(opcode, &bytes[HEADER_BYTES..end]);
        Ok(Some((frame, end)))
    }
}

pub fn encode_header(opcode: u32, length: u32) -> [u8; HEADER_BYTES] {
    let mut header = [0u8; HEADER_BYTES];
    header[..4].copy_from_slice(&opcode.to_le_bytes());
    header[4..].copy_from_slice(&length.to_le_bytes());
    header
}

pub fn decode_header(header: [u8; HEADER_BYTES]) -> (u32, u32) {
    let opcode = u32::from_le_bytes([header[0], header[1], header[2], header[3]]);
    let length = u32::from_le_bytes([header[4], header[5], header[6], header[7]]);
    (opcode, length)
}

/// Header and payload in one buffer so a single write carries the whole message.
pub fn encode_frame(opcode: Opcode, payload: &[u8]) -> Vec<u8> {
    let mut buffer = Vec::with_capacity(HEADER_BYTES + payload.len());
    buffer.extend_from_slice(&encode_header(opcode.as_u32(), payload.len() as u32));
    buffer.extend_from_slice(payload);
    buffer
}

pub fn write_frame<W: Write>(writer: &mut W, opcode: Opcode, payload: &[u8]) -> io::Result<()> {
    if payload.len() > MAX_FRAME_BYTES {
        return Err(io::Error::new(
            io::ErrorKind::InvalidInput,
            FrameError::TooLarge(payload.len()),
        ));
    }
    writer.write_all(&encode_frame(opcode, payload))?;
    writer.flush()
}

/// Blocks until one whole frame has been read. Short reads are retried by
/// `read_exact` until the declared length is satisfied.
pub fn read_frame<R: Read>(reader: &mut R) -> Result<Frame, FrameError> {
    let mut header = [0u8; HEADER_BYTES];
    reader.read_exact(&mut header)?;
    let (opcode, length) = parse_header(header)?;

    let mut payload = vec![0u8; length];
    reader.read_exact(&mut payload)?;
    Ok(Frame { opcode, payload })
}

/// Validates a received header: a known opcode and a payload length within
/// [`MAX_FRAME_BYTES`]. Every reader goes through here.
pub fn parse_header(header: [u8; HEADER_BYTES]) -> Result<(Opcode, usize), FrameError> {
    let (raw_opcode, length) = decode_header(header);
    let opcode = Opcode::try_from(raw_opcode)?;
    let length = length as usize;
    if length > MAX_FRAME_BYTES {
        return Err(FrameError::TooLarge(length));
    }
    Ok((opcode, length))
}

// ─────────────────────────────────────────────────────────────────────────────
// Payloads
// ─────────────────────────────────────────────────────────────────────────────

/// Identification sent with opcode 0.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Handshake {
    pub v: u32,
    pub client_id: String,
}

impl Handshake {
    pub fn new(client_id: impl Into<String>) -> Self {
        Self {
            v: PROTOCOL_VERSION,
            client_id: client_id.into(),
        }
    }
}

/// Outbound command carried by an opcode 1 frame.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CommandFrame<A = Value> {
    pub cmd: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub nonce: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub args: Option<A>,
}

impl CommandFrame {
    pub fn ping() -> Self {
        Self {
            cmd: CMD_PING.to_string(),
            nonce: None,
            args: None,
        }
    }
}

impl CommandFrame<SetActivityArgs> {
    pub fn set_activity(nonce: impl Into<String>, args: SetActivityArgs) -> Self {
        Self {
            cmd: CMD_SET_ACTIVITY.to_string(),
            nonce: Some(nonce.into()),
            args: Some(args),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SetActivityArgs {
    pub pid: u32,
    /// Always serialized; `null` hides the presence without ending the session.
    pub activity: Option<ActivityPayload>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ActivityPayload {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub details: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub state: Option<String>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub assets: BTreeMap<String, String>,
    pub timestamps: Timestamps,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Timestamps {
    pub start: i64,
}

/// Inbound event or command response carried by an opcode 1 frame.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct EventFrame {
    #[serde(default)]
    pub cmd: Option<String>,
    #[serde(default)]
    pub evt: Option<String>,
    #[serde(default)]
    pub nonce: Option<String>,
    #[serde(default)]
    pub data: Value,
}

impl EventFrame {
    pub fn ready(data: Value) -> Self {
        Self {
            cmd: Some(CMD_DISPATCH.to_string()),
            evt: Some(EVT_READY.to_string()),
            nonce: None,
            data,
        }
    }

    pub fn is_ready(&self) -> bool {
        self.evt.as_deref() == Some(EVT_READY)
    }

    pub fn is_error(&self) -> bool {
        self.evt.as_deref() == Some(EVT_ERROR)
    }
}

/// Payload of an opcode 2 frame sent by the remote before it hangs up.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct CloseEvent {
    #[serde(default)]
    pub code: i64,
    #[serde(default)]
    pub message: String,
}
