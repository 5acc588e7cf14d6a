//! Operator interrupt handling.
//!
//! The signal listener only flips a `watch` flag; the controller observes it
//! from its own loop and does the stop broadcast and cleanup there.

use std::time::Duration;

use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use joblaunch_core::hosts::HostRegistry;
use joblaunch_core::protocol::ControlMessage;

use crate::transport::{Transport, send_message};

/// Upper bound on the whole `stop` broadcast, however many hosts are wedged.
pub const DEFAULT_STOP_TIMEOUT: Duration = Duration::from_secs(5);

/// Sets the interrupt flag.
#[derive(Debug, Clone)]
pub struct InterruptHandler {
    tx: watch::Sender<bool>,
}

/// Observes the interrupt flag.
#[derive(Debug, Clone)]
pub struct InterruptSignal {
    rx: watch::Receiver<bool>,
}

impl InterruptHandler {
    pub fn new() -> (Self, InterruptSignal) {
        let (tx, rx) = watch::channel(false);
        (Self { tx }, InterruptSignal { rx })
    }

    /// Raise the flag. Repeated calls are harmless.
    pub fn trigger(&self) {
        self.tx.send_replace(true);
    }

    pub fn signal(&self) -> InterruptSignal {
        InterruptSignal {
            rx: self.tx.subscribe(),
        }
    }

    /// Spawn a task that triggers on Ctrl+C or, on unix, SIGTERM.
    pub fn listen(&self) -> std::io::Result<JoinHandle<()>> {
        #[cfg(unix)]
        let mut sigterm =
            tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())?;

        let handler = self.clone();
        Ok(tokio::spawn(async move {
            #[cfg(unix)]
            let sigterm_future = sigterm.recv();
            #[cfg(not(unix))]
            let sigterm_future = std::future::pending::<Option<()>>();

            tokio::select! {
                result = tokio::signal::ctrl_c() => {
                    if let Err(e) = result {
                        debug!(error = %e, "Ctrl+C listener failed");
                        return;
                    }
                    info!("Received Ctrl+C");
                }
                _ = sigterm_future => {
                    info!("Received SIGTERM");
                }
            }
            handler.trigger();
        }))
    }
}

impl InterruptSignal {
    pub fn is_triggered(&self) -> bool {
        *self.rx.borrow()
    }

    /// Resolve once the flag is raised. Never resolves if every handler is
    /// dropped without triggering.
    pub async fn triggered(&mut self) {
        if self.rx.wait_for(|raised| *raised).await.is_err() {
            std::future::pending::<()>().await;
        }
    }
}

/// Send `stop` to every connected host, ignoring failures.
///
/// Gives up on the remaining hosts once `deadline` has passed. Returns how
/// many hosts the command reached.
pub async fn broadcast_stop<T>(transport: &T, hosts: &HostRegistry, deadline: Duration) -> usize
where
    T: Transport + ?Sized,
{
    let stop = ControlMessage::stop();
    let mut sent = 0;
    let broadcast = async {
        for host in hosts {
            let Some(conn) = host.connection() else {
                continue;
            };
            match send_message(transport, conn, &stop).await {
                Ok(()) => sent += 1,
                Err(e) => debug!(host = %host.address(), %conn, error = %e, "Stop not delivered"),
            }
        }
    };
    if tokio::time::timeout(deadline, broadcast).await.is_err() {
        warn!(
            secs = deadline.as_secs_f64(),
            "Stop broadcast timed out, abandoning remaining hosts"
        );
    }
    sent
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use std::sync::Mutex;
    use std::sync::atomic::{AtomicUsize, Ordering};

    use async_trait::async_trait;
    use tokio::sync::mpsc;

    use joblaunch_core::hosts::{ConnectionId, HostEntry};
    use joblaunch_core::protocol::FrameHeader;

    use crate::transport::{TransportError, TransportEvent};

    /// Accepts sends on every connection except `wedged`, which never completes.
    struct WedgedTransport {
        wedged: ConnectionId,
        delivered: Mutex<Vec<ConnectionId>>,
        attempts: AtomicUsize,
    }

    #[async_trait]
    impl Transport for WedgedTransport {
        async fn connect(
            &self,
            _host: &HostEntry,
            _events: mpsc::Sender<TransportEvent>,
        ) -> Result<ConnectionId, TransportError> {
            Err(TransportError::ShutDown)
        }

        async fn send(
            &self,
            conn: ConnectionId,
            _header: FrameHeader,
            _payload: &[u8],
        ) -> Result<(), TransportError> {
            self.attempts.fetch_add(1, Ordering::SeqCst);
            if conn == self.wedged {
                std::future::pending::<()>().await;
            }
            self.delivered.lock().unwrap().push(conn);
            Ok(())
        }

        async fn close(&self, _conn: ConnectionId) {}

        async fn shutdown(&self) {}
    }

    fn connected_hosts(count: u64) -> HostRegistry {
        let mut registry = HostRegistry::default();
        for n in 1..=count {
            registry.add(&format!("node-{n}"), 25000).unwrap();
            registry
                .get_mut(usize::try_from(n - 1).unwrap())
                .unwrap()
                .attach(ConnectionId::new(n));
        }
        registry
    }

    #[tokio::test]
    async fn trigger_is_seen_by_every_signal() {
        let (handler, signal) = InterruptHandler::new();
        let late = handler.signal();
        assert!(!signal.is_triggered());

        handler.trigger();
        handler.trigger();
        assert!(signal.is_triggered());
        assert!(late.is_triggered());
    }

    #[tokio::test]
    async fn triggered_wakes_a_waiting_task() {
        let (handler, mut signal) = InterruptHandler::new();
        let waiter = tokio::spawn(async move { signal.triggered().await });

        handler.trigger();
        tokio::time::timeout(Duration::from_secs(1), waiter)
            .await
            .unwrap()
            .unwrap();
    }

    #[tokio::test]
    async fn triggered_pends_when_handler_dropped() {
        let (handler, mut signal) = InterruptHandler::new();
        drop(handler);
        let waited = tokio::time::timeout(Duration::from_millis(50), signal.triggered()).await;
        assert!(waited.is_err());
    }

    #[tokio::test]
    async fn stop_reaches_every_connected_host() {
        let transport = WedgedTransport {
            wedged: ConnectionId::new(0),
            delivered: Mutex::new(Vec::new()),
            attempts: AtomicUsize::new(0),
        };
        let mut hosts = connected_hosts(3);
        hosts.get_mut(1).unwrap().detach();

        let sent = broadcast_stop(&transport, &hosts, DEFAULT_STOP_TIMEOUT).await;
        assert_eq!(sent, 2);
        assert_eq!(
            *transport.delivered.lock().unwrap(),
            vec![ConnectionId::new(1), ConnectionId::new(3)]
        );
    }

    #[tokio::test]
    async fn wedged_host_cannot_stall_the_broadcast_past_its_deadline() {
        let transport = WedgedTransport {
            wedged: ConnectionId::new(2),
            delivered: Mutex::new(Vec::new()),
            attempts: AtomicUsize::new(0),
        };
        let hosts = connected_hosts(3);

        let sent = tokio::time::timeout(
            Duration::from_secs(2),
            broadcast_stop(&transport, &hosts, Duration::from_millis(50)),
        )
        .await
        .unwrap();
        assert_eq!(sent, 1);
        assert_eq!(transport.attempts.load(Ordering::SeqCst), 2);
    }
}
