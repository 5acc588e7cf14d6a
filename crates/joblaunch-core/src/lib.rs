//! `joblaunch` Core Library
//!
//! Shared functionality for the launcher:
//! - Control protocol codec (framed instructions sent to remote agents)
//! - Host registry and hostfile ingestion
//! - Configuration resolution and hierarchy
//! - Common error types

pub mod config;
pub mod error;
pub mod hosts;
pub mod protocol;
pub mod tracing_init;

pub use config::LauncherConfig;
pub use error::{Error, Result};
pub use hosts::{ConnectionId, HostEntry, HostRegistry, RegistryError};
pub use protocol::{
    ControlCodec, ControlCommand, ControlMessage, FrameHeader, MessageType, ProtocolError,
};
