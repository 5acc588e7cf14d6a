//! Acknowledgment tracking.
//!
//! Counts one status report per active connection. Connections that fail
//! to start or disconnect before reporting are excluded so they never hold
//! up completion.

use std::collections::HashSet;

use joblaunch_core::hosts::ConnectionId;

/// Result of feeding one status report to the tracker.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AckOutcome {
    /// First report from this connection.
    Counted { received: usize, expected: usize },
    /// This connection already reported.
    Duplicate,
    /// Not an active connection (never registered or excluded).
    Unknown,
}

#[derive(Debug, Default)]
pub struct AckTracker {
    pending: HashSet<ConnectionId>,
    acked: HashSet<ConnectionId>,
}

impl AckTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Expect a report from `conn`.
    pub fn register(&mut self, conn: ConnectionId) {
        if !self.acked.contains(&conn) {
            self.pending.insert(conn);
        }
    }

    /// Stop expecting a report from `conn`. Returns true if it was pending.
    pub fn exclude(&mut self, conn: ConnectionId) -> bool {
        self.pending.remove(&conn)
    }

    pub fn record_report(&mut self, conn: ConnectionId) -> AckOutcome {
        if self.acked.contains(&conn) {
            return AckOutcome::Duplicate;
        }
        if !self.pending.remove(&conn) {
            return AckOutcome::Unknown;
        }
        self.acked.insert(conn);
        AckOutcome::Counted {
            received: self.acks_received(),
            expected: self.active_connections(),
        }
    }

    pub fn is_pending(&self, conn: ConnectionId) -> bool {
        self.pending.contains(&conn)
    }

    pub fn has_acked(&self, conn: ConnectionId) -> bool {
        self.acked.contains(&conn)
    }

    /// Connections that still count toward completion: acked plus pending.
    pub fn active_connections(&self) -> usize {
        self.acked.len() + self.pending.len()
    }

    pub fn acks_received(&self) -> usize {
        self.acked.len()
    }

    /// All active connections have reported.
    pub fn is_complete(&self) -> bool {
        self.pending.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn conn(n: u64) -> ConnectionId {
        ConnectionId::new(n)
    }

    #[test]
    fn completes_only_after_every_connection_reports() {
        let mut tracker = AckTracker::new();
        for n in 1..=3 {
            tracker.register(conn(n));
        }
        assert_eq!(tracker.active_connections(), 3);

        assert_eq!(
            tracker.record_report(conn(2)),
            AckOutcome::Counted { received: 1, expected: 3 }
        );
        assert!(!tracker.is_complete());
        tracker.record_report(conn(1));
        assert!(!tracker.is_complete());
        tracker.record_report(conn(3));
        assert!(tracker.is_complete());
        assert_eq!(tracker.acks_received(), 3);
    }

    #[test]
    fn duplicate_reports_are_not_counted() {
        let mut tracker = AckTracker::new();
        tracker.register(conn(1));
        tracker.register(conn(2));

        tracker.record_report(conn(1));
        assert_eq!(tracker.record_report(conn(1)), AckOutcome::Duplicate);
        assert_eq!(tracker.acks_received(), 1);
        assert!(!tracker.is_complete());
    }

    #[test]
    fn excluded_connection_no_longer_blocks_completion() {
        let mut tracker = AckTracker::new();
        tracker.register(conn(1));
        tracker.register(conn(2));

        assert!(tracker.exclude(conn(2)));
        assert!(!tracker.exclude(conn(2)));
        assert_eq!(tracker.active_connections(), 1);

        assert_eq!(tracker.record_report(conn(2)), AckOutcome::Unknown);
        tracker.record_report(conn(1));
        assert!(tracker.is_complete());
    }

    #[test]
    fn excluding_an_acked_connection_changes_nothing() {
        let mut tracker = AckTracker::new();
        tracker.register(conn(1));
        tracker.register(conn(2));
        tracker.record_report(conn(1));

        assert!(!tracker.exclude(conn(1)));
        assert_eq!(tracker.active_connections(), 2);
        assert_eq!(tracker.acks_received(), 1);
    }

    #[test]
    fn received_never_exceeds_active() {
        let mut tracker = AckTracker::new();
        tracker.register(conn(1));
        for n in [1, 1, 7, 1] {
            tracker.record_report(conn(n));
            assert!(tracker.acks_received() <= tracker.active_connections());
        }
    }
}
