//! TCP transport to remote agents.
//!
//! One socket per host. Control frames are written on the write half under a
//! per-connection lock so frames never interleave; a reader task per
//! connection turns newline-terminated status lines into `TransportEvent`s.

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncReadExt, AsyncWriteExt, BufReader};
use tokio::net::TcpStream;
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::sync::{Mutex, mpsc};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use joblaunch_core::LauncherConfig;
use joblaunch_core::hosts::{ConnectionId, HostEntry};
use joblaunch_core::protocol::FrameHeader;

use super::{Transport, TransportError, TransportEvent};

/// TCP transport settings.
#[derive(Debug, Clone)]
pub struct TcpTransportConfig {
    /// Timeout for establishing a connection.
    pub connect_timeout: Duration,
    /// Timeout for writing one frame.
    pub send_timeout: Duration,
    /// Longest accepted status line, excluding the newline.
    pub max_line_len: usize,
}

impl Default for TcpTransportConfig {
    fn default() -> Self {
        Self::from(&LauncherConfig::default())
    }
}

impl From<&LauncherConfig> for TcpTransportConfig {
    fn from(config: &LauncherConfig) -> Self {
        Self {
            connect_timeout: config.connect_timeout(),
            send_timeout: config.connect_timeout(),
            max_line_len: config.recv_buffer_size,
        }
    }
}

struct TcpConnection {
    addr: String,
    writer: Arc<Mutex<OwnedWriteHalf>>,
    reader: JoinHandle<()>,
}

/// Transport over plain TCP sockets.
pub struct TcpTransport {
    config: TcpTransportConfig,
    next_id: AtomicU64,
    connections: Mutex<HashMap<ConnectionId, TcpConnection>>,
    shut_down: AtomicBool,
}

impl TcpTransport {
    pub fn new(config: TcpTransportConfig) -> Self {
        Self {
            config,
            next_id: AtomicU64::new(1),
            connections: Mutex::new(HashMap::new()),
            shut_down: AtomicBool::new(false),
        }
    }

    /// Number of open connections.
    pub async fn open_count(&self) -> usize {
        self.connections.lock().await.len()
    }
}

#[async_trait]
impl Transport for TcpTransport {
    async fn connect(
        &self,
        host: &HostEntry,
        events: mpsc::Sender<TransportEvent>,
    ) -> Result<ConnectionId, TransportError> {
        if self.shut_down.load(Ordering::Acquire) {
            return Err(TransportError::ShutDown);
        }

        let addr = host.address();
        let stream = tokio::time::timeout(
            self.config.connect_timeout,
            TcpStream::connect((host.hostname(), host.port())),
        )
        .await
        .map_err(|_| TransportError::Timeout {
            what: format!("connecting to {addr}"),
            secs: self.config.connect_timeout.as_secs(),
        })?
        .map_err(|source| TransportError::Connect {
            addr: addr.clone(),
            source,
        })?;

        if let Err(e) = stream.set_nodelay(true) {
            debug!(addr = %addr, error = %e, "Failed to set TCP_NODELAY");
        }

        let conn = ConnectionId::new(self.next_id.fetch_add(1, Ordering::Relaxed));
        let (read_half, write_half) = stream.into_split();
        let reader = tokio::spawn(read_reports(
            conn,
            read_half,
            self.config.max_line_len,
            events,
        ));

        let mut connections = self.connections.lock().await;
        // shutdown() may have run while we were connecting
        if self.shut_down.load(Ordering::Acquire) {
            reader.abort();
            return Err(TransportError::ShutDown);
        }
        connections.insert(
            conn,
            TcpConnection {
                addr: addr.clone(),
                writer: Arc::new(Mutex::new(write_half)),
                reader,
            },
        );
        drop(connections);

        info!(addr = %addr, %conn, "Connected to agent");
        Ok(conn)
    }

    async fn send(
        &self,
        conn: ConnectionId,
        header: FrameHeader,
        payload: &[u8],
    ) -> Result<(), TransportError> {
        header.check_payload(payload)?;
        let writer = {
            let connections = self.connections.lock().await;
            let connection = connections.get(&conn).ok_or(TransportError::Closed(conn))?;
            Arc::clone(&connection.writer)
        };

        let header_bytes = header.to_bytes();
        let write = async {
            let mut writer = writer.lock().await;
            writer.write_all(&header_bytes).await?;
            writer.write_all(payload).await?;
            writer.flush().await
        };

        tokio::time::timeout(self.config.send_timeout, write)
            .await
            .map_err(|_| TransportError::Timeout {
                what: format!("sending {} on {conn}", header.message_type()),
                secs: self.config.send_timeout.as_secs(),
            })?
            .map_err(|source| TransportError::Send { conn, source })
    }

    async fn close(&self, conn: ConnectionId) {
        let removed = self.connections.lock().await.remove(&conn);
        if let Some(connection) = removed {
            connection.reader.abort();
            let mut writer = connection.writer.lock().await;
            if let Err(e) = writer.shutdown().await {
                debug!(%conn, error = %e, "Error shutting down write half");
            }
            debug!(%conn, addr = %connection.addr, "Closed connection");
        }
    }

    async fn shutdown(&self) {
        if self.shut_down.swap(true, Ordering::AcqRel) {
            return;
        }
        let drained: Vec<_> = self.connections.lock().await.drain().collect();
        for (conn, connection) in &drained {
            connection.reader.abort();
            debug!(%conn, addr = %connection.addr, "Dropping connection on shutdown");
        }
        info!(connections = drained.len(), "Transport shut down");
    }
}

enum LineRead {
    Line,
    TooLong,
    Eof,
}

/// Read one line of at most `max_len` bytes into `line`, without the newline.
///
/// Over-long lines are consumed up to their newline and reported as
/// `TooLong`; a final unterminated line counts as a line.
async fn read_bounded_line<R>(
    reader: &mut R,
    line: &mut Vec<u8>,
    max_len: usize,
) -> std::io::Result<LineRead>
where
    R: AsyncBufRead + Unpin,
{
    let limit = u64::try_from(max_len).unwrap_or(u64::MAX).saturating_add(1);
    let read = (&mut *reader).take(limit).read_until(b'\n', line).await?;
    if read == 0 {
        return Ok(LineRead::Eof);
    }

    if line.last() == Some(&b'\n') {
        line.pop();
        if line.last() == Some(&b'\r') {
            line.pop();
        }
        return Ok(LineRead::Line);
    }
    if line.len() <= max_len {
        return Ok(LineRead::Line);
    }

    // Discard the remainder of the over-long line
    let mut scratch = Vec::new();
    loop {
        scratch.clear();
        let n = (&mut *reader).take(limit).read_until(b'\n', &mut scratch).await?;
        if n == 0 || scratch.last() == Some(&b'\n') {
            return Ok(LineRead::TooLong);
        }
    }
}

/// Per-connection reader: status lines in, events out.
async fn read_reports(
    conn: ConnectionId,
    read_half: OwnedReadHalf,
    max_line_len: usize,
    events: mpsc::Sender<TransportEvent>,
) {
    let mut reader = BufReader::new(read_half);
    let mut line = Vec::with_capacity(max_line_len.min(4096));

    loop {
        line.clear();
        let event = match read_bounded_line(&mut reader, &mut line, max_line_len).await {
            Ok(LineRead::Eof) => break,
            Ok(LineRead::Line) => match String::from_utf8(std::mem::take(&mut line)) {
                Ok(text) if text.trim().is_empty() => {
                    debug!(%conn, "Ignoring blank line from agent");
                    continue;
                }
                Ok(text) => TransportEvent::Report { conn, text },
                Err(e) => TransportEvent::Malformed {
                    conn,
                    reason: format!("status line is not UTF-8: {e}"),
                },
            },
            Ok(LineRead::TooLong) => TransportEvent::Malformed {
                conn,
                reason: format!("status line longer than {max_line_len} bytes"),
            },
            Err(e) => {
                warn!(%conn, error = %e, "Read error on agent connection");
                break;
            }
        };
        if events.send(event).await.is_err() {
            debug!(%conn, "Event channel closed, stopping reader");
            return;
        }
    }

    if events.send(TransportEvent::PeerShutdown { conn }).await.is_err() {
        debug!(%conn, "Event channel closed before peer shutdown was delivered");
    }
}
