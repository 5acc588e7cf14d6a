//! Transport adapter between the session controller and remote agents.
//!
//! Inbound traffic is delivered as `TransportEvent`s on the channel handed to
//! `connect`; draining that channel is the controller's event loop.

pub mod error;
pub mod tcp;

use async_trait::async_trait;
use tokio::sync::mpsc;

use joblaunch_core::hosts::{ConnectionId, HostEntry};
use joblaunch_core::protocol::{ControlMessage, FrameHeader};

pub use error::TransportError;
pub use tcp::{TcpTransport, TcpTransportConfig};

/// Something a connected peer did.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransportEvent {
    /// A status report line arrived.
    Report { conn: ConnectionId, text: String },
    /// Inbound data could not be read as a status line and was discarded.
    Malformed { conn: ConnectionId, reason: String },
    /// The peer closed its side of the connection.
    PeerShutdown { conn: ConnectionId },
}

impl TransportEvent {
    pub const fn conn(&self) -> ConnectionId {
        match self {
            Self::Report { conn, .. } | Self::Malformed { conn, .. } | Self::PeerShutdown { conn } => {
                *conn
            }
        }
    }
}

/// Connection-oriented transport with per-connection in-order delivery.
#[async_trait]
pub trait Transport: Send + Sync {
    /// Open a connection to `host`. Inbound events for it go to `events`.
    async fn connect(
        &self,
        host: &HostEntry,
        events: mpsc::Sender<TransportEvent>,
    ) -> Result<ConnectionId, TransportError>;

    /// Write one frame. Completes or fails before returning.
    async fn send(
        &self,
        conn: ConnectionId,
        header: FrameHeader,
        payload: &[u8],
    ) -> Result<(), TransportError>;

    /// Drop a single connection. Unknown handles are ignored.
    async fn close(&self, conn: ConnectionId);

    /// Release every transport resource. Idempotent.
    async fn shutdown(&self);
}

/// Frame `message` and send it on `conn`.
pub async fn send_message<T>(
    transport: &T,
    conn: ConnectionId,
    message: &ControlMessage,
) -> Result<(), TransportError>
where
    T: Transport + ?Sized,
{
    let (header, payload) = message.to_parts()?;
    transport.send(conn, header, &payload).await
}
