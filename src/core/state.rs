use super::frame::CloseCode;
use super::heartbeat::Heartbeater;

/// Lifecycle of one gateway session.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
pub enum ConnectionState {
    /// Never opened, or explicitly logged out.
    #[default]
    Unknown,
    /// Transport connect requested.
    Init,
    /// Transport connected; waiting for the hello envelope.
    Connecting,
    /// Hello received, identify sent.
    Connected,
    Disconnecting,
    Disconnected,
    Error,
}

impl ConnectionState {
    pub fn as_str(self) -> &'static str {
        match self {
            ConnectionState::Unknown => "unknown",
            ConnectionState::Init => "init",
            ConnectionState::Connecting => "connecting",
            ConnectionState::Connected => "connected",
            ConnectionState::Disconnecting => "disconnecting",
            ConnectionState::Disconnected => "disconnected",
            ConnectionState::Error => "error",
        }
    }
}

/// Why the engine closed the transport itself, if it did.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
pub enum CloseReason {
    #[default]
    NotRequested,
    ReconnectRequested,
    LogoutRequested,
    HeartbeatAckMissing,
}

impl CloseReason {
    pub fn is_requested(self) -> bool {
        !matches!(self, CloseReason::NotRequested)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            CloseReason::NotRequested => "not_requested",
            CloseReason::ReconnectRequested => "reconnect_requested",
            CloseReason::LogoutRequested => "logout_requested",
            CloseReason::HeartbeatAckMissing => "heartbeat_ack_missing",
        }
    }
}

/// Last sequence number seen on the current connection.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SequenceTracker(Option<u64>);

impl SequenceTracker {
    /// Record a sequence carried by an envelope. Absent sequences leave the tracker alone.
    #[inline]
    pub fn observe(&mut self, sequence: Option<u64>) {
        if let Some(sequence) = sequence {
            self.0 = Some(sequence);
        }
    }

    #[inline]
    pub fn last(&self) -> Option<u64> {
        self.0
    }

    pub fn reset(&mut self) {
        self.0 = None;
    }
}

/// Point-in-time copy of the engine state for status queries.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SessionSnapshot {
    pub state: ConnectionState,
    pub sequence: Option<u64>,
    pub heartbeat: Heartbeater,
    pub session_id: Option<String>,
    pub user_id: Option<String>,
    pub close_reason: CloseReason,
    pub close_code: CloseCode,
    pub close_description: Option<String>,
    pub buffered_len: usize,
    /// Number of transport connections opened since the client was spawned.
    pub connections: u64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sequence_tracker_keeps_last_non_null_value() {
        let mut tracker = SequenceTracker::default();
        assert_eq!(tracker.last(), None);

        tracker.observe(Some(1));
        tracker.observe(None);
        assert_eq!(tracker.last(), Some(1));

        tracker.observe(Some(42));
        assert_eq!(tracker.last(), Some(42));

        tracker.reset();
        assert_eq!(tracker.last(), None);
    }

    #[test]
    fn only_not_requested_is_unexpected() {
        assert!(!CloseReason::NotRequested.is_requested());
        assert!(CloseReason::ReconnectRequested.is_requested());
        assert!(CloseReason::LogoutRequested.is_requested());
        assert!(CloseReason::HeartbeatAckMissing.is_requested());
    }
}
