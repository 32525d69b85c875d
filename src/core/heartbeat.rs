/// Decision produced by [`Heartbeater::should_beat`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HeartbeatDecision {
    /// The interval has not elapsed yet.
    No,
    /// Send a heartbeat carrying the last seen sequence number.
    Beat(Option<u64>),
    /// The previous heartbeat was never acknowledged; the link is considered dead.
    MustReconnect,
}

/// Liveness timer state for one gateway session.
///
/// Time is supplied by the caller as monotonic milliseconds so the decision logic stays
/// deterministic and clock-free.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Heartbeater {
    running: bool,
    interval_ms: u64,
    last_beat_tick_ms: u64,
    ack_pending: bool,
}

impl Heartbeater {
    pub fn new() -> Self {
        Self::default()
    }

    /// Start beating every `interval_ms`. A running heartbeater ignores further starts.
    pub fn start(&mut self, interval_ms: u64, now_ms: u64) -> bool {
        if self.running {
            return false;
        }
        // The first interval has nothing to acknowledge.
        self.ack_pending = false;
        self.interval_ms = interval_ms;
        self.last_beat_tick_ms = now_ms;
        self.running = true;
        true
    }

    pub fn stop(&mut self) {
        *self = Self::default();
    }

    pub fn on_ack_received(&mut self) {
        self.ack_pending = false;
    }

    pub fn should_beat(&mut self, sequence: Option<u64>, now_ms: u64) -> HeartbeatDecision {
        if !self.running || now_ms.saturating_sub(self.last_beat_tick_ms) <= self.interval_ms {
            return HeartbeatDecision::No;
        }

        self.last_beat_tick_ms = now_ms;
        if self.ack_pending {
            return HeartbeatDecision::MustReconnect;
        }
        self.ack_pending = true;
        HeartbeatDecision::Beat(sequence)
    }

    pub fn is_running(&self) -> bool {
        self.running
    }

    pub fn interval_ms(&self) -> u64 {
        self.interval_ms
    }

    pub fn is_ack_pending(&self) -> bool {
        self.ack_pending
    }

    pub fn last_beat_tick_ms(&self) -> u64 {
        self.last_beat_tick_ms
    }
}
