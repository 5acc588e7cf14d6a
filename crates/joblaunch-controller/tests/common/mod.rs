//! Shared fixtures: an in-memory `Transport` and a capturing report sink.

#![allow(dead_code, clippy::unwrap_used, clippy::expect_used)]

use std::collections::{HashMap, HashSet};
use std::io::Write;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use tokio::sync::mpsc;

use joblaunch_controller::interrupt::{InterruptHandler, InterruptSignal};
use joblaunch_controller::session::SessionController;
use joblaunch_controller::transport::{Transport, TransportError, TransportEvent};
use joblaunch_core::hosts::{ConnectionId, HostEntry, HostRegistry};
use joblaunch_core::protocol::{ControlMessage, FrameHeader};

#[derive(Default)]
struct MockState {
    next_id: u64,
    unreachable: HashSet<String>,
    failing_sends: HashSet<String>,
    report_all_on_start: bool,
    hosts_by_conn: HashMap<ConnectionId, String>,
    senders: HashMap<ConnectionId, mpsc::Sender<TransportEvent>>,
    sent: Vec<(String, ControlMessage)>,
    closed: Vec<ConnectionId>,
    shutdowns: usize,
}

/// Transport that records what the controller does with it.
#[derive(Default)]
pub struct MockTransport {
    state: Mutex<MockState>,
}

impl MockTransport {
    pub fn new() -> Self {
        Self::default()
    }

    /// Connecting to `host` fails.
    pub fn unreachable(self, host: &str) -> Self {
        self.state.lock().unwrap().unreachable.insert(host.to_string());
        self
    }

    /// Every send to `host` fails.
    pub fn failing_sends(self, host: &str) -> Self {
        self.state.lock().unwrap().failing_sends.insert(host.to_string());
        self
    }

    /// Every host reports as soon as it receives `start`.
    pub fn report_on_start(self) -> Self {
        self.state.lock().unwrap().report_all_on_start = true;
        self
    }

    pub fn conn_for(&self, host: &str) -> ConnectionId {
        let state = self.state.lock().unwrap();
        *state
            .hosts_by_conn
            .iter()
            .find(|(_, h)| h.as_str() == host)
            .map(|(conn, _)| conn)
            .expect("host was never connected")
    }

    /// Push an event as if the peer behind `conn` produced it.
    pub async fn emit(&self, event: TransportEvent) {
        let tx = self
            .state
            .lock()
            .unwrap()
            .senders
            .get(&event.conn())
            .cloned()
            .expect("unknown connection");
        tx.send(event).await.unwrap();
    }

    pub fn sent_to(&self, host: &str) -> Vec<ControlMessage> {
        self.state
            .lock()
            .unwrap()
            .sent
            .iter()
            .filter(|(h, _)| h == host)
            .map(|(_, msg)| msg.clone())
            .collect()
    }

    pub fn closed(&self) -> Vec<ConnectionId> {
        self.state.lock().unwrap().closed.clone()
    }

    pub fn shutdown_count(&self) -> usize {
        self.state.lock().unwrap().shutdowns
    }
}

#[async_trait]
impl Transport for MockTransport {
    async fn connect(
        &self,
        host: &HostEntry,
        events: mpsc::Sender<TransportEvent>,
    ) -> Result<ConnectionId, TransportError> {
        let mut state = self.state.lock().unwrap();
        if state.unreachable.contains(host.hostname()) {
            return Err(TransportError::Connect {
                addr: host.address(),
                source: std::io::Error::from(std::io::ErrorKind::ConnectionRefused),
            });
        }
        state.next_id += 1;
        let conn = ConnectionId::new(state.next_id);
        state.hosts_by_conn.insert(conn, host.hostname().to_string());
        state.senders.insert(conn, events);
        Ok(conn)
    }

    async fn send(
        &self,
        conn: ConnectionId,
        header: FrameHeader,
        payload: &[u8],
    ) -> Result<(), TransportError> {
        assert_eq!(header.payload_len(), payload.len(), "header length must match payload");
        let message = ControlMessage::decode(header.message_type(), payload)?;

        let mut state = self.state.lock().unwrap();
        if state.closed.contains(&conn) {
            return Err(TransportError::Closed(conn));
        }
        let host = state
            .hosts_by_conn
            .get(&conn)
            .cloned()
            .ok_or(TransportError::Closed(conn))?;
        if state.failing_sends.contains(&host) {
            return Err(TransportError::Send {
                conn,
                source: std::io::Error::from(std::io::ErrorKind::BrokenPipe),
            });
        }

        if state.report_all_on_start && message == ControlMessage::start() {
            let tx = &state.senders[&conn];
            tx.try_send(TransportEvent::Report {
                conn,
                text: format!("{host}: exit 0"),
            })
            .unwrap();
        }
        state.sent.push((host, message));
        Ok(())
    }

    async fn close(&self, conn: ConnectionId) {
        self.state.lock().unwrap().closed.push(conn);
    }

    async fn shutdown(&self) {
        self.state.lock().unwrap().shutdowns += 1;
    }
}

/// `Write` sink whose contents the test can read back.
#[derive(Clone, Default)]
pub struct SharedSink(Arc<Mutex<Vec<u8>>>);

impl SharedSink {
    pub fn lines(&self) -> Vec<String> {
        String::from_utf8(self.0.lock().unwrap().clone())
            .unwrap()
            .lines()
            .map(ToString::to_string)
            .collect()
    }
}

impl Write for SharedSink {
    fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
        self.0.lock().unwrap().extend_from_slice(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> std::io::Result<()> {
        Ok(())
    }
}

pub fn registry(hosts: &[&str]) -> HostRegistry {
    let mut registry = HostRegistry::default();
    for host in hosts {
        registry.add(host, 25000).unwrap();
    }
    registry
}

pub struct Harness<T: Transport> {
    pub controller: SessionController<T>,
    pub interrupts: InterruptHandler,
    pub reports: SharedSink,
}

pub fn harness<T: Transport>(transport: Arc<T>) -> Harness<T> {
    let (interrupts, signal): (InterruptHandler, InterruptSignal) = InterruptHandler::new();
    let reports = SharedSink::default();
    let controller =
        SessionController::new(transport, signal).with_report_sink(Box::new(reports.clone()));
    Harness {
        controller,
        interrupts,
        reports,
    }
}
