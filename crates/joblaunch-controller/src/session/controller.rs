//! Session controller.
//!
//! Owns every mutation of a `Session`: connecting hosts, dispatching the
//! `INSTANCE_COUNT` / `EXECUTABLE_NAME` / `start` sequence, draining
//! transport events until every active connection has reported, and the
//! one-shot cleanup shared by the completion and interrupt paths.

use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::mpsc;
use tracing::{debug, info, warn};
use uuid::Uuid;

use joblaunch_core::config::DEFAULT_MAX_INSTANCES;
use joblaunch_core::hosts::{ConnectionId, HostRegistry};
use joblaunch_core::protocol::ControlMessage;

use super::lifecycle::{SessionLifecycle, SessionState};
use super::tracker::{AckOutcome, AckTracker};
use crate::interrupt::{DEFAULT_STOP_TIMEOUT, InterruptSignal, broadcast_stop};
use crate::transport::{Transport, TransportError, TransportEvent, send_message};

/// Capacity of the inbound event channel shared by all connections.
const EVENT_CHANNEL_CAPACITY: usize = 256;

/// Errors that end a session before it can run.
#[derive(Debug, thiserror::Error)]
pub enum SessionError {
    #[error("Instance count must be between 1 and {max}, got {count}")]
    InvalidInstanceCount { count: u32, max: u32 },

    #[error("Executable path is empty")]
    EmptyExecutable,

    #[error("Hostfile path is empty")]
    EmptyHostfilePath,

    #[error("No hosts configured")]
    NoHosts,

    #[error("No reachable hosts ({attempted} attempted)")]
    NoReachableHosts { attempted: usize },

    #[error("Session is {0}, expected valid")]
    NotActive(SessionState),

    #[error("Transport error: {0}")]
    Transport(#[from] TransportError),
}

/// What the operator asked for.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LaunchRequest {
    pub instances: u32,
    pub executable: String,
    pub hostfile: PathBuf,
}

impl LaunchRequest {
    pub fn new(instances: u32, executable: impl Into<String>, hostfile: impl Into<PathBuf>) -> Self {
        Self {
            instances,
            executable: executable.into(),
            hostfile: hostfile.into(),
        }
    }

    /// Check bounds and required paths.
    pub fn validate(&self, max_instances: u32) -> Result<(), SessionError> {
        if self.instances == 0 || self.instances > max_instances {
            return Err(SessionError::InvalidInstanceCount {
                count: self.instances,
                max: max_instances,
            });
        }
        if self.hostfile.as_os_str().is_empty() {
            return Err(SessionError::EmptyHostfilePath);
        }
        if self.executable.trim().is_empty() {
            return Err(SessionError::EmptyExecutable);
        }
        Ok(())
    }
}

/// How a session ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionOutcome {
    /// Every active connection reported.
    Completed,
    /// The operator interrupted the session.
    Interrupted,
}

/// State of one launch.
#[derive(Debug)]
pub struct Session {
    id: Uuid,
    instances: u32,
    executable: String,
    hostfile: PathBuf,
    hosts: HostRegistry,
    tracker: AckTracker,
    lifecycle: SessionLifecycle,
}

impl Session {
    fn new(request: &LaunchRequest, hosts: HostRegistry) -> Self {
        Self {
            id: Uuid::new_v4(),
            instances: request.instances,
            executable: request.executable.clone(),
            hostfile: request.hostfile.clone(),
            hosts,
            tracker: AckTracker::new(),
            lifecycle: SessionLifecycle::new(),
        }
    }

    pub const fn id(&self) -> Uuid {
        self.id
    }

    pub const fn instances(&self) -> u32 {
        self.instances
    }

    pub fn executable(&self) -> &str {
        &self.executable
    }

    pub fn hostfile(&self) -> &Path {
        &self.hostfile
    }

    /// Hosts still owned by the session. Empty after cleanup.
    pub const fn hosts(&self) -> &HostRegistry {
        &self.hosts
    }

    pub fn state(&self) -> SessionState {
        self.lifecycle.state()
    }

    pub fn active_connections(&self) -> usize {
        self.tracker.active_connections()
    }

    pub fn acks_received(&self) -> usize {
        self.tracker.acks_received()
    }

    pub fn is_complete(&self) -> bool {
        self.tracker.is_complete()
    }
}

/// Drives a `Session` against a `Transport`.
pub struct SessionController<T: Transport> {
    transport: Arc<T>,
    interrupt: InterruptSignal,
    max_instances: u32,
    stop_timeout: Duration,
    events_tx: mpsc::Sender<TransportEvent>,
    events_rx: mpsc::Receiver<TransportEvent>,
    report_sink: Box<dyn Write + Send + Sync>,
}

impl<T: Transport> SessionController<T> {
    pub fn new(transport: Arc<T>, interrupt: InterruptSignal) -> Self {
        let (events_tx, events_rx) = mpsc::channel(EVENT_CHANNEL_CAPACITY);
        Self {
            transport,
            interrupt,
            max_instances: DEFAULT_MAX_INSTANCES,
            stop_timeout: DEFAULT_STOP_TIMEOUT,
            events_tx,
            events_rx,
            report_sink: Box::new(std::io::stdout()),
        }
    }

    #[must_use]
    pub fn with_max_instances(mut self, max_instances: u32) -> Self {
        self.max_instances = max_instances;
        self
    }

    /// Overall time allowed for the `stop` broadcast on interrupt.
    #[must_use]
    pub fn with_stop_timeout(mut self, stop_timeout: Duration) -> Self {
        self.stop_timeout = stop_timeout;
        self
    }

    /// Where status report text is echoed. Defaults to stdout.
    #[must_use]
    pub fn with_report_sink(mut self, sink: Box<dyn Write + Send + Sync>) -> Self {
        self.report_sink = sink;
        self
    }

    pub const fn transport(&self) -> &Arc<T> {
        &self.transport
    }

    /// Validate the request and connect every host.
    ///
    /// Unreachable hosts are logged and skipped. Fails if the request is
    /// invalid, `hosts` is empty, or no host could be reached; in the last
    /// case the session is already cleaned up.
    pub async fn setup(
        &self,
        request: &LaunchRequest,
        hosts: HostRegistry,
    ) -> Result<Session, SessionError> {
        request.validate(self.max_instances)?;
        if hosts.is_empty() {
            return Err(SessionError::NoHosts);
        }

        let mut session = Session::new(request, hosts);
        session.lifecycle.activate();
        info!(
            session_id = %session.id,
            hosts = session.hosts.count(),
            instances = session.instances,
            "Connecting to hosts"
        );

        for host in session.hosts.iter_mut() {
            if self.interrupt.is_triggered() {
                info!(session_id = %session.id, "Interrupted during setup, skipping remaining hosts");
                break;
            }
            match self.transport.connect(host, self.events_tx.clone()).await {
                Ok(conn) => {
                    host.attach(conn);
                    session.tracker.register(conn);
                    debug!(host = %host.address(), %conn, "Host connected");
                }
                Err(e) => {
                    warn!(host = %host.address(), error = %e, "Failed to connect, skipping host");
                }
            }
        }

        let attempted = session.hosts.count();
        let active = session.tracker.active_connections();
        info!(
            session_id = %session.id,
            active_connections = active,
            attempted,
            "Setup complete"
        );

        if active == 0 && !self.interrupt.is_triggered() {
            self.cleanup(&mut session).await;
            return Err(SessionError::NoReachableHosts { attempted });
        }
        Ok(session)
    }

    /// Send `INSTANCE_COUNT`, `EXECUTABLE_NAME` and `start` to every
    /// connected host, one host at a time.
    ///
    /// A host whose dispatch fails is closed and excluded from the
    /// acknowledgment count.
    pub async fn start(&self, session: &mut Session) -> Result<(), SessionError> {
        if !session.lifecycle.is_valid() {
            return Err(SessionError::NotActive(session.state()));
        }

        let instance_count = ControlMessage::InstanceCount(session.instances);
        let executable = ControlMessage::ExecutableName(session.executable.clone());
        let start = ControlMessage::start();
        let mut started = 0usize;

        for host in session.hosts.iter_mut() {
            let Some(conn) = host.connection() else {
                continue;
            };
            if self.interrupt.is_triggered() {
                info!(session_id = %session.id, "Interrupted during dispatch");
                break;
            }

            let result = async {
                send_message(self.transport.as_ref(), conn, &instance_count).await?;
                send_message(self.transport.as_ref(), conn, &executable).await?;
                send_message(self.transport.as_ref(), conn, &start).await
            }
            .await;

            match result {
                Ok(()) => {
                    started += 1;
                    debug!(host = %host.address(), %conn, "Start dispatched");
                }
                Err(e) => {
                    warn!(
                        host = %host.address(),
                        %conn,
                        error = %e,
                        "Dispatch failed, excluding host from completion"
                    );
                    session.tracker.exclude(conn);
                    host.detach();
                    self.transport.close(conn).await;
                }
            }
        }

        info!(
            session_id = %session.id,
            started,
            active_connections = session.tracker.active_connections(),
            "Dispatch complete"
        );
        Ok(())
    }

    /// Drain transport events until every active connection has reported
    /// or the operator interrupts. Cleans the session up either way.
    pub async fn await_completion(
        &mut self,
        session: &mut Session,
    ) -> Result<SessionOutcome, SessionError> {
        loop {
            if session.state() == SessionState::CleanedUp {
                return Ok(SessionOutcome::Completed);
            }
            if self.interrupt.is_triggered() {
                self.on_interrupt(session).await;
                return Ok(SessionOutcome::Interrupted);
            }
            if session.tracker.is_complete() {
                info!(
                    session_id = %session.id,
                    acks_received = session.tracker.acks_received(),
                    "All hosts reported"
                );
                self.cleanup(session).await;
                return Ok(SessionOutcome::Completed);
            }

            let mut interrupt = self.interrupt.clone();
            tokio::select! {
                biased;
                () = interrupt.triggered() => {
                    self.on_interrupt(session).await;
                    return Ok(SessionOutcome::Interrupted);
                }
                event = self.events_rx.recv() => match event {
                    Some(event) => self.handle_event(session, event).await,
                    // We hold a sender, so this only happens if it was dropped
                    None => return Err(SessionError::Transport(TransportError::ShutDown)),
                },
            }
        }
    }

    /// Apply one transport event to the session. Events arriving after
    /// cleanup are ignored.
    pub async fn handle_event(&mut self, session: &mut Session, event: TransportEvent) {
        if !session.lifecycle.is_valid() {
            debug!(conn = %event.conn(), "Ignoring event for inactive session");
            return;
        }
        match event {
            TransportEvent::Report { conn, text } => self.on_status_report(session, conn, &text).await,
            TransportEvent::PeerShutdown { conn } => self.on_peer_shutdown(session, conn).await,
            TransportEvent::Malformed { conn, reason } => {
                warn!(%conn, reason = %reason, "Discarding malformed data from host");
            }
        }
    }

    async fn on_status_report(&mut self, session: &mut Session, conn: ConnectionId, text: &str) {
        let host = host_label(session, conn);
        match session.tracker.record_report(conn) {
            AckOutcome::Counted { received, expected } => {
                info!(host = %host, received, expected, "Status report received");
                if let Err(e) = writeln!(self.report_sink, "{text}") {
                    warn!(error = %e, "Failed to write status report");
                }
                if session.tracker.is_complete() {
                    info!(session_id = %session.id, acks_received = received, "All hosts reported");
                    self.cleanup(session).await;
                }
            }
            AckOutcome::Duplicate => {
                warn!(host = %host, %conn, "Duplicate status report ignored");
            }
            AckOutcome::Unknown => {
                debug!(%conn, "Status report from inactive connection ignored");
            }
        }
    }

    async fn on_peer_shutdown(&self, session: &mut Session, conn: ConnectionId) {
        let Some(index) = session.hosts.position_of(conn) else {
            debug!(%conn, "Shutdown from unknown connection ignored");
            return;
        };
        let host = host_label(session, conn);
        if let Some(entry) = session.hosts.get_mut(index) {
            entry.detach();
        }
        self.transport.close(conn).await;

        if session.tracker.exclude(conn) {
            warn!(
                host = %host,
                %conn,
                "Host disconnected before reporting, excluding from completion"
            );
            if session.tracker.is_complete() {
                info!(session_id = %session.id, "No hosts left to report");
                self.cleanup(session).await;
            }
        } else {
            debug!(%conn, "Host disconnected after reporting");
        }
    }

    async fn on_interrupt(&self, session: &mut Session) {
        info!(
            session_id = %session.id,
            acks_received = session.tracker.acks_received(),
            active_connections = session.tracker.active_connections(),
            "Interrupt received, stopping remote hosts"
        );
        if session.lifecycle.is_valid() {
            let stopped =
                broadcast_stop(self.transport.as_ref(), &session.hosts, self.stop_timeout).await;
            debug!(stopped, "Stop broadcast sent");
        }
        self.cleanup(session).await;
    }

    /// Release every host and shut the transport down. Only the first call
    /// does any work; returns whether this call did.
    pub async fn cleanup(&self, session: &mut Session) -> bool {
        if !session.lifecycle.begin_cleanup() {
            debug!(session_id = %session.id, "Cleanup already done");
            return false;
        }

        let released = session.hosts.release_all();
        for conn in released.iter().filter_map(|entry| entry.connection()) {
            self.transport.close(conn).await;
        }
        self.transport.shutdown().await;

        info!(
            session_id = %session.id,
            hosts = released.len(),
            acks_received = session.tracker.acks_received(),
            "Session cleaned up"
        );
        true
    }

    /// Dispatch, wait, and make sure cleanup has run.
    pub async fn run(&mut self, session: &mut Session) -> Result<SessionOutcome, SessionError> {
        let result = match self.start(session).await {
            Ok(()) => self.await_completion(session).await,
            Err(e) => Err(e),
        };
        self.cleanup(session).await;
        result
    }
}

fn host_label(session: &Session, conn: ConnectionId) -> String {
    session
        .hosts
        .position_of(conn)
        .and_then(|index| session.hosts.get(index))
        .map_or_else(|| conn.to_string(), joblaunch_core::HostEntry::address)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn request_validation() {
        assert!(LaunchRequest::new(4, "/bin/job", "hosts").validate(100).is_ok());
        assert!(LaunchRequest::new(100, "/bin/job", "hosts").validate(100).is_ok());

        assert!(matches!(
            LaunchRequest::new(0, "/bin/job", "hosts").validate(100),
            Err(SessionError::InvalidInstanceCount { count: 0, max: 100 })
        ));
        assert!(matches!(
            LaunchRequest::new(101, "/bin/job", "hosts").validate(100),
            Err(SessionError::InvalidInstanceCount { .. })
        ));
        assert!(matches!(
            LaunchRequest::new(1, "  ", "hosts").validate(100),
            Err(SessionError::EmptyExecutable)
        ));
        assert!(matches!(
            LaunchRequest::new(1, "/bin/job", "").validate(100),
            Err(SessionError::EmptyHostfilePath)
        ));
    }
}
