//! Transport error types.

use joblaunch_core::hosts::ConnectionId;
use joblaunch_core::protocol::ProtocolError;

/// Errors that can occur in the transport adapter.
#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    #[error("Failed to connect to {addr}: {source}")]
    Connect {
        addr: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Timed out after {secs}s: {what}")]
    Timeout { what: String, secs: u64 },

    #[error("Send on {conn} failed: {source}")]
    Send {
        conn: ConnectionId,
        #[source]
        source: std::io::Error,
    },

    #[error("Connection {0} is closed")]
    Closed(ConnectionId),

    #[error("Transport has been shut down")]
    ShutDown,

    #[error("Protocol error: {0}")]
    Protocol(#[from] ProtocolError),
}
