#![allow(clippy::unwrap_used)] // Integration tests use unwrap for brevity

//! End-to-end sessions over loopback TCP against fake remote agents.

mod common;

use std::sync::Arc;
use std::time::Duration;

use tokio::io::AsyncWriteExt;
use tokio::net::TcpListener;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_stream::StreamExt;
use tokio_util::codec::FramedRead;

use common::harness;
use joblaunch_controller::session::{LaunchRequest, SessionOutcome};
use joblaunch_controller::transport::{TcpTransport, TcpTransportConfig};
use joblaunch_core::HostRegistry;
use joblaunch_core::protocol::{ControlCodec, ControlMessage};

#[derive(Clone, Copy)]
enum Agent {
    /// Reports `exit 0` after `start`
    Reports,
    /// Closes the connection after `start` without reporting
    Disconnects,
    /// Never reports
    Silent,
}

struct FakeAgent {
    port: u16,
    started: mpsc::Receiver<()>,
    received: JoinHandle<Vec<ControlMessage>>,
}

/// Accept one connection, decode control frames and act out `behavior`.
/// Resolves to every message received once the controller hangs up.
async fn spawn_agent(name: &'static str, behavior: Agent) -> FakeAgent {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let port = listener.local_addr().unwrap().port();
    let (started_tx, started) = mpsc::channel(1);

    let received = tokio::spawn(async move {
        let (stream, _) = listener.accept().await.unwrap();
        let (read_half, mut write_half) = stream.into_split();
        let mut frames = FramedRead::new(read_half, ControlCodec::new());
        let mut received = Vec::new();

        while let Some(message) = frames.next().await {
            let message = message.unwrap();
            let is_start = message == ControlMessage::start();
            received.push(message);
            if !is_start {
                continue;
            }
            started_tx.send(()).await.unwrap();
            match behavior {
                Agent::Reports => {
                    let line = format!("{name}: exit 0\n");
                    write_half.write_all(line.as_bytes()).await.unwrap();
                }
                Agent::Disconnects => return received,
                Agent::Silent => {}
            }
        }
        received
    });

    FakeAgent {
        port,
        started,
        received,
    }
}

fn registry_for(agents: &[&FakeAgent]) -> HostRegistry {
    let mut registry = HostRegistry::default();
    for agent in agents {
        registry.add("127.0.0.1", agent.port).unwrap();
    }
    registry
}

fn transport() -> Arc<TcpTransport> {
    Arc::new(TcpTransport::new(TcpTransportConfig {
        connect_timeout: Duration::from_secs(2),
        send_timeout: Duration::from_secs(2),
        max_line_len: 1024,
    }))
}

fn dispatch_sequence(instances: u32, exe: &str) -> Vec<ControlMessage> {
    vec![
        ControlMessage::InstanceCount(instances),
        ControlMessage::ExecutableName(exe.into()),
        ControlMessage::start(),
    ]
}

#[tokio::test]
async fn agents_receive_ordered_dispatch_and_session_completes() {
    let a = spawn_agent("agent-a", Agent::Reports).await;
    let b = spawn_agent("agent-b", Agent::Reports).await;
    let transport = transport();
    let mut h = harness(Arc::clone(&transport));

    let request = LaunchRequest::new(2, "/usr/bin/job", "hosts");
    let mut session = h
        .controller
        .setup(&request, registry_for(&[&a, &b]))
        .await
        .unwrap();
    assert_eq!(session.active_connections(), 2);

    let outcome = tokio::time::timeout(Duration::from_secs(5), h.controller.run(&mut session))
        .await
        .unwrap()
        .unwrap();
    assert_eq!(outcome, SessionOutcome::Completed);
    assert_eq!(session.acks_received(), 2);
    assert_eq!(transport.open_count().await, 0);

    let mut lines = h.reports.lines();
    lines.sort();
    assert_eq!(lines, vec!["agent-a: exit 0", "agent-b: exit 0"]);

    for agent in [a, b] {
        let received = agent.received.await.unwrap();
        assert_eq!(received, dispatch_sequence(2, "/usr/bin/job"));
    }
}

#[tokio::test]
async fn unreachable_and_disconnecting_agents_do_not_block_completion() {
    let closed_port = {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        listener.local_addr().unwrap().port()
    };
    let reporter = spawn_agent("agent-a", Agent::Reports).await;
    let quitter = spawn_agent("agent-b", Agent::Disconnects).await;

    let mut hosts = registry_for(&[&reporter, &quitter]);
    hosts.add("127.0.0.1", closed_port).unwrap();

    let mut h = harness(transport());
    let request = LaunchRequest::new(1, "/usr/bin/job", "hosts");
    let mut session = h.controller.setup(&request, hosts).await.unwrap();
    assert_eq!(session.active_connections(), 2);

    let outcome = tokio::time::timeout(Duration::from_secs(5), h.controller.run(&mut session))
        .await
        .unwrap()
        .unwrap();
    assert_eq!(outcome, SessionOutcome::Completed);
    assert_eq!(session.active_connections(), 1);
    assert_eq!(session.acks_received(), 1);
    assert_eq!(h.reports.lines(), vec!["agent-a: exit 0"]);
}

#[tokio::test]
async fn interrupt_sends_stop_to_silent_agents() {
    let mut a = spawn_agent("agent-a", Agent::Silent).await;
    let mut b = spawn_agent("agent-b", Agent::Silent).await;
    let transport = transport();
    let mut h = harness(Arc::clone(&transport));

    let request = LaunchRequest::new(3, "/usr/bin/job", "hosts");
    let mut session = h
        .controller
        .setup(&request, registry_for(&[&a, &b]))
        .await
        .unwrap();

    let interrupts = h.interrupts.clone();
    let operator = async move {
        a.started.recv().await.unwrap();
        b.started.recv().await.unwrap();
        interrupts.trigger();
        (a.received, b.received)
    };

    let (outcome, (a_received, b_received)) =
        tokio::time::timeout(Duration::from_secs(5), async {
            tokio::join!(h.controller.run(&mut session), operator)
        })
        .await
        .unwrap();
    assert_eq!(outcome.unwrap(), SessionOutcome::Interrupted);
    assert_eq!(session.acks_received(), 0);

    let mut expected = dispatch_sequence(3, "/usr/bin/job");
    expected.push(ControlMessage::stop());
    assert_eq!(a_received.await.unwrap(), expected);
    assert_eq!(b_received.await.unwrap(), expected);
    assert_eq!(transport.open_count().await, 0);
}

#[tokio::test]
async fn hostfile_entries_drive_the_session() {
    let a = spawn_agent("agent-a", Agent::Reports).await;
    let b = spawn_agent("agent-b", Agent::Reports).await;

    let dir = tempfile::TempDir::new().unwrap();
    let path = dir.path().join("hosts");
    let content = format!(
        "# launch targets\n127.0.0.1:{}\n\n127.0.0.1:{}\n",
        a.port, b.port
    );
    std::fs::write(&path, content).unwrap();

    let config = joblaunch_core::LauncherConfig::default();
    let hosts = joblaunch_core::hosts::load_hostfile(&path, &config).unwrap();
    assert_eq!(hosts.count(), 2);

    let mut h = harness(Arc::new(TcpTransport::new(TcpTransportConfig::from(&config))));
    let request = LaunchRequest::new(1, "/usr/bin/job", &path);
    let mut session = h.controller.setup(&request, hosts).await.unwrap();

    let outcome = tokio::time::timeout(Duration::from_secs(5), h.controller.run(&mut session))
        .await
        .unwrap()
        .unwrap();
    assert_eq!(outcome, SessionOutcome::Completed);
    assert_eq!(session.acks_received(), 2);
}
