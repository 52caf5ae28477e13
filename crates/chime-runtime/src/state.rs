//! Connection lifecycle state and run statistics.

use std::sync::atomic::{AtomicU64, Ordering};

/// Where the orchestrator is in its connection lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ConnectionState {
    /// Not started yet.
    #[default]
    Disconnected,
    /// Calling the connector's `connect`.
    Connecting,
    /// Stream established, loops starting.
    Connected,
    /// Serving events and triggers.
    Receiving,
    /// Waiting out the backoff before the next attempt.
    Reconnecting,
    /// Run finished, normally or fatally.
    ShutDown,
}

impl ConnectionState {
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::ShutDown)
    }
}

impl std::fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Disconnected => write!(f, "Disconnected"),
            Self::Connecting => write!(f, "Connecting"),
            Self::Connected => write!(f, "Connected"),
            Self::Receiving => write!(f, "Receiving"),
            Self::Reconnecting => write!(f, "Reconnecting"),
            Self::ShutDown => write!(f, "ShutDown"),
        }
    }
}

/// Counters updated by the orchestrator while it runs.
#[derive(Debug, Default)]
pub struct RuntimeStats {
    connect_attempts: AtomicU64,
    disconnects: AtomicU64,
    events_dispatched: AtomicU64,
    events_unmatched: AtomicU64,
    scheduled_runs: AtomicU64,
}

impl RuntimeStats {
    pub(crate) fn record_connect_attempt(&self) {
        self.connect_attempts.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_disconnect(&self) {
        self.disconnects.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_event(&self, matched: bool) {
        let counter = if matched {
            &self.events_dispatched
        } else {
            &self.events_unmatched
        };
        counter.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_scheduled_run(&self) {
        self.scheduled_runs.fetch_add(1, Ordering::Relaxed);
    }

    /// A point-in-time copy of the counters.
    pub fn snapshot(&self) -> StatsSnapshot {
        StatsSnapshot {
            connect_attempts: self.connect_attempts.load(Ordering::Relaxed),
            disconnects: self.disconnects.load(Ordering::Relaxed),
            events_dispatched: self.events_dispatched.load(Ordering::Relaxed),
            events_unmatched: self.events_unmatched.load(Ordering::Relaxed),
            scheduled_runs: self.scheduled_runs.load(Ordering::Relaxed),
        }
    }
}

/// Plain copy of [`RuntimeStats`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct StatsSnapshot {
    /// Calls to the connector's `connect`, successful or not.
    pub connect_attempts: u64,
    /// Streams that ended with an error.
    pub disconnects: u64,
    /// Inbound events that selected at least one handler.
    pub events_dispatched: u64,
    /// Inbound events no handler wanted.
    pub events_unmatched: u64,
    /// Scheduled entries executed.
    pub scheduled_runs: u64,
}

impl std::fmt::Display for StatsSnapshot {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{} connect attempts, {} disconnects, {} events dispatched ({} unmatched), {} scheduled runs",
            self.connect_attempts,
            self.disconnects,
            self.events_dispatched,
            self.events_unmatched,
            self.scheduled_runs
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn snapshot_reflects_counters() {
        let stats = RuntimeStats::default();
        stats.record_connect_attempt();
        stats.record_connect_attempt();
        stats.record_disconnect();
        stats.record_event(true);
        stats.record_event(false);
        stats.record_scheduled_run();

        let snapshot = stats.snapshot();
        assert_eq!(
            snapshot,
            StatsSnapshot {
                connect_attempts: 2,
                disconnects: 1,
                events_dispatched: 1,
                events_unmatched: 1,
                scheduled_runs: 1,
            }
        );
        assert!(snapshot.to_string().starts_with("2 connect attempts"));
    }

    #[test]
    fn only_shutdown_is_terminal() {
        assert!(ConnectionState::ShutDown.is_terminal());
        assert!(!ConnectionState::Reconnecting.is_terminal());
        assert_eq!(ConnectionState::Receiving.to_string(), "Receiving");
    }
}
