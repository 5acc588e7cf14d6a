//! Streaming codec for control frames over a byte stream.
//!
//! Used by anything that reads or writes control frames on a socket, such as
//! a remote agent or a test peer. The decoder keeps state across calls so a
//! frame may arrive in several reads.

use bytes::{Buf, BufMut, BytesMut};
use tokio_util::codec::{Decoder, Encoder};

use super::message::{ControlMessage, FrameHeader, HEADER_SIZE, MessageType, ProtocolError};

/// Largest payload a single control frame may carry (64 KiB).
pub const MAX_FRAME_SIZE: usize = 64 * 1024;

#[derive(Debug, Clone, Copy)]
enum DecodeState {
    /// Waiting for the fixed header
    AwaitingHeader,
    /// Header consumed, waiting for `payload_len` bytes
    AwaitingPayload {
        message_type: MessageType,
        payload_len: usize,
    },
}

/// Frame codec yielding typed `ControlMessage`s.
#[derive(Debug, Clone)]
pub struct ControlCodec {
    state: DecodeState,
}

impl ControlCodec {
    pub const fn new() -> Self {
        Self {
            state: DecodeState::AwaitingHeader,
        }
    }
}

impl Default for ControlCodec {
    fn default() -> Self {
        Self::new()
    }
}

impl Decoder for ControlCodec {
    type Item = ControlMessage;
    type Error = ProtocolError;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>, Self::Error> {
        loop {
            match self.state {
                DecodeState::AwaitingHeader => {
                    if src.len() < HEADER_SIZE {
                        return Ok(None);
                    }

                    let header = FrameHeader::from_bytes(&src[..])?;
                    let payload_len = header.payload_len();
                    if payload_len > MAX_FRAME_SIZE {
                        return Err(ProtocolError::FrameTooLarge {
                            size: payload_len,
                            max: MAX_FRAME_SIZE,
                        });
                    }

                    src.advance(HEADER_SIZE);
                    src.reserve(payload_len);
                    self.state = DecodeState::AwaitingPayload {
                        message_type: header.message_type(),
                        payload_len,
                    };
                }
                DecodeState::AwaitingPayload {
                    message_type,
                    payload_len,
                } => {
                    if src.len() < payload_len {
                        return Ok(None);
                    }

                    let payload = src.split_to(payload_len).freeze();
                    self.state = DecodeState::AwaitingHeader;
                    return ControlMessage::decode(message_type, &payload).map(Some);
                }
            }
        }
    }
}

impl Encoder<ControlMessage> for ControlCodec {
    type Error = ProtocolError;

    fn encode(&mut self, item: ControlMessage, dst: &mut BytesMut) -> Result<(), Self::Error> {
        let (header, payload) = item.to_parts()?;
        dst.reserve(HEADER_SIZE + payload.len());
        dst.put_slice(&header.to_bytes());
        dst.put_slice(&payload);
        Ok(())
    }
}
