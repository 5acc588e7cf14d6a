//! Control message vocabulary and frame layout.

use std::fmt;
use std::str::FromStr;

use bytes::{BufMut, Bytes, BytesMut};

use super::codec::MAX_FRAME_SIZE;

/// Fixed frame header size (type + length).
pub const HEADER_SIZE: usize = 8;

/// Width of the `INSTANCE_COUNT` payload.
pub const INSTANCE_COUNT_WIDTH: usize = std::mem::size_of::<u32>();

/// Errors from encoding or decoding control frames.
#[derive(Debug, thiserror::Error)]
pub enum ProtocolError {
    #[error("Malformed frame: need {needed} bytes, only {available} available")]
    MalformedFrame { needed: usize, available: usize },

    #[error("Unknown message type: {0}")]
    UnknownMessageType(u32),

    #[error("Invalid {message_type} payload: {reason}")]
    InvalidPayload {
        message_type: MessageType,
        reason: String,
    },

    #[error("Header declares {declared} payload bytes but {actual} were supplied")]
    LengthMismatch { declared: usize, actual: usize },

    #[error("Frame payload of {size} bytes exceeds maximum {max}")]
    FrameTooLarge { size: usize, max: usize },

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Message type enumerant carried in the frame header.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u32)]
pub enum MessageType {
    /// Payload is a command keyword (`start` / `stop`).
    ControlCommand = 1,
    /// Payload is the requested instance count.
    InstanceCount = 2,
    /// Payload is the executable path.
    ExecutableName = 3,
}

impl MessageType {
    pub const fn as_u32(self) -> u32 {
        self as u32
    }

    pub const fn from_u32(value: u32) -> Option<Self> {
        match value {
            1 => Some(Self::ControlCommand),
            2 => Some(Self::InstanceCount),
            3 => Some(Self::ExecutableName),
            _ => None,
        }
    }
}

impl TryFrom<u32> for MessageType {
    type Error = ProtocolError;

    fn try_from(value: u32) -> Result<Self, Self::Error> {
        Self::from_u32(value).ok_or(ProtocolError::UnknownMessageType(value))
    }
}

impl fmt::Display for MessageType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::ControlCommand => "CONTROL_COMMAND",
            Self::InstanceCount => "INSTANCE_COUNT",
            Self::ExecutableName => "EXECUTABLE_NAME",
        };
        f.write_str(name)
    }
}

/// Keyword carried by a `CONTROL_COMMAND` message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ControlCommand {
    Start,
    Stop,
}

impl ControlCommand {
    pub const fn keyword(self) -> &'static str {
        match self {
            Self::Start => "start",
            Self::Stop => "stop",
        }
    }
}

impl fmt::Display for ControlCommand {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.keyword())
    }
}

impl FromStr for ControlCommand {
    type Err = ProtocolError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "start" => Ok(Self::Start),
            "stop" => Ok(Self::Stop),
            other => Err(ProtocolError::InvalidPayload {
                message_type: MessageType::ControlCommand,
                reason: format!("unknown command keyword {other:?}"),
            }),
        }
    }
}

/// Fixed-size frame header.
///
/// Built only by `for_payload` or `from_bytes`, so the length is always
/// one that was measured or read off the wire.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FrameHeader {
    message_type: MessageType,
    length: u32,
}

impl FrameHeader {
    /// Header describing `payload`. The length always comes from the payload.
    pub fn for_payload(message_type: MessageType, payload: &[u8]) -> Result<Self, ProtocolError> {
        if payload.len() > MAX_FRAME_SIZE {
            return Err(ProtocolError::FrameTooLarge {
                size: payload.len(),
                max: MAX_FRAME_SIZE,
            });
        }
        let length = u32::try_from(payload.len()).map_err(|_| ProtocolError::FrameTooLarge {
            size: payload.len(),
            max: MAX_FRAME_SIZE,
        })?;
        Ok(Self {
            message_type,
            length,
        })
    }

    pub fn to_bytes(self) -> [u8; HEADER_SIZE] {
        let mut header = [0u8; HEADER_SIZE];
        header[0..4].copy_from_slice(&self.message_type.as_u32().to_be_bytes());
        header[4..8].copy_from_slice(&self.length.to_be_bytes());
        header
    }

    /// Read a header from the front of `src` without consuming it.
    pub fn from_bytes(src: &[u8]) -> Result<Self, ProtocolError> {
        if src.len() < HEADER_SIZE {
            return Err(ProtocolError::MalformedFrame {
                needed: HEADER_SIZE,
                available: src.len(),
            });
        }
        let raw_type = u32::from_be_bytes([src[0], src[1], src[2], src[3]]);
        let length = u32::from_be_bytes([src[4], src[5], src[6], src[7]]);
        Ok(Self {
            message_type: MessageType::try_from(raw_type)?,
            length,
        })
    }

    pub const fn message_type(&self) -> MessageType {
        self.message_type
    }

    pub const fn length(&self) -> u32 {
        self.length
    }

    pub const fn payload_len(&self) -> usize {
        self.length as usize
    }

    /// Fail unless `payload` is exactly the size this header declares.
    pub fn check_payload(&self, payload: &[u8]) -> Result<(), ProtocolError> {
        if self.payload_len() == payload.len() {
            Ok(())
        } else {
            Err(ProtocolError::LengthMismatch {
                declared: self.payload_len(),
                actual: payload.len(),
            })
        }
    }
}

/// Build a complete frame: header followed by exactly `payload.len()` bytes.
pub fn frame(message_type: MessageType, payload: &[u8]) -> Result<Bytes, ProtocolError> {
    let header = FrameHeader::for_payload(message_type, payload)?;
    let mut buf = BytesMut::with_capacity(HEADER_SIZE + payload.len());
    buf.put_slice(&header.to_bytes());
    buf.put_slice(payload);
    Ok(buf.freeze())
}

/// Split one frame off the front of `bytes`.
///
/// Fails with `MalformedFrame` when the declared length runs past the
/// available buffer. Bytes after the frame are left for the caller.
pub fn parse(bytes: &[u8]) -> Result<(MessageType, &[u8]), ProtocolError> {
    let header = FrameHeader::from_bytes(bytes)?;
    let needed = HEADER_SIZE + header.payload_len();
    if bytes.len() < needed {
        return Err(ProtocolError::MalformedFrame {
            needed,
            available: bytes.len(),
        });
    }
    Ok((header.message_type(), &bytes[HEADER_SIZE..needed]))
}

/// Typed control message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ControlMessage {
    InstanceCount(u32),
    ExecutableName(String),
    Command(ControlCommand),
}

impl ControlMessage {
    pub const fn start() -> Self {
        Self::Command(ControlCommand::Start)
    }

    pub const fn stop() -> Self {
        Self::Command(ControlCommand::Stop)
    }

    pub const fn message_type(&self) -> MessageType {
        match self {
            Self::InstanceCount(_) => MessageType::InstanceCount,
            Self::ExecutableName(_) => MessageType::ExecutableName,
            Self::Command(_) => MessageType::ControlCommand,
        }
    }

    /// Serialized payload bytes.
    pub fn payload(&self) -> Bytes {
        match self {
            Self::InstanceCount(count) => Bytes::copy_from_slice(&count.to_be_bytes()),
            Self::ExecutableName(path) => Bytes::copy_from_slice(path.as_bytes()),
            Self::Command(cmd) => Bytes::from_static(cmd.keyword().as_bytes()),
        }
    }

    /// Header and payload, with the header length taken from the payload.
    pub fn to_parts(&self) -> Result<(FrameHeader, Bytes), ProtocolError> {
        let payload = self.payload();
        let header = FrameHeader::for_payload(self.message_type(), &payload)?;
        Ok((header, payload))
    }

    /// Complete wire frame.
    pub fn encode(&self) -> Result<Bytes, ProtocolError> {
        frame(self.message_type(), &self.payload())
    }

    /// Interpret a payload received under `message_type`.
    pub fn decode(message_type: MessageType, payload: &[u8]) -> Result<Self, ProtocolError> {
        let invalid = |reason: String| ProtocolError::InvalidPayload {
            message_type,
            reason,
        };
        match message_type {
            MessageType::InstanceCount => {
                let raw: [u8; INSTANCE_COUNT_WIDTH] = payload.try_into().map_err(|_| {
                    invalid(format!(
                        "expected {INSTANCE_COUNT_WIDTH} bytes, got {}",
                        payload.len()
                    ))
                })?;
                Ok(Self::InstanceCount(u32::from_be_bytes(raw)))
            }
            MessageType::ExecutableName => {
                let path = std::str::from_utf8(payload)
                    .map_err(|e| invalid(format!("path is not UTF-8: {e}")))?;
                if path.is_empty() {
                    return Err(invalid("empty executable path".into()));
                }
                Ok(Self::ExecutableName(path.to_string()))
            }
            MessageType::ControlCommand => {
                let keyword = std::str::from_utf8(payload)
                    .map_err(|e| invalid(format!("keyword is not UTF-8: {e}")))?;
                Ok(Self::Command(keyword.parse()?))
            }
        }
    }
}
