//! Control protocol spoken between the launcher and remote agents.
//!
//! Wire format (8 bytes overhead):
//! ```text
//! [u32 BE: message type][u32 BE: payload length][payload bytes]
//! ```
//!
//! Control messages are one-way. Agents answer only with a single
//! newline-terminated status report once their local work is done.

mod codec;
mod message;

pub use codec::{ControlCodec, MAX_FRAME_SIZE};
pub use message::{
    ControlCommand, ControlMessage, FrameHeader, HEADER_SIZE, INSTANCE_COUNT_WIDTH, MessageType,
    ProtocolError, frame, parse,
};
