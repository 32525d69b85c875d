use std::collections::VecDeque;
use std::time::{Duration, Instant};

use hdrhistogram::Histogram;

const MAX_RECENT_ERRORS: usize = 100;
const MAX_ERROR_TEXT_BYTES: usize = 1024;

#[derive(Debug, Clone)]
pub struct GatewayErrorRecord {
    pub at: Instant,
    pub context: String,
    pub error: String,
}

fn truncate_string(s: &str) -> String {
    if s.len() <= MAX_ERROR_TEXT_BYTES {
        return s.to_string();
    }

    let mut end = MAX_ERROR_TEXT_BYTES;
    while end > 0 && !s.is_char_boundary(end) {
        end -= 1;
    }
    s[..end].to_string()
}

/// Counters snapshot returned by `GetGatewayStats`.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct GatewayStats {
    pub uptime: Duration,
    pub inbound_messages: u64,
    pub dispatched_events: u64,
    pub dropped_events: u64,
    pub overflows: u64,
    pub decode_failures: u64,
    pub reconnects: u64,
    pub errors: u64,
    pub recent_errors: usize,
    pub heartbeats_sent: u64,
    pub heartbeat_p50_us: u64,
    pub heartbeat_p99_us: u64,
    pub heartbeat_samples: u64,
}

/// Running counters for one gateway client. Owned by the session actor, so no interior
/// mutability.
#[derive(Debug)]
pub struct GatewayHealth {
    started: Instant,
    inbound_messages: u64,
    dispatched_events: u64,
    dropped_events: u64,
    overflows: u64,
    decode_failures: u64,
    reconnects: u64,
    errors: u64,
    heartbeats_sent: u64,
    recent_errors: VecDeque<GatewayErrorRecord>,
    heartbeat_rtt: Option<Histogram<u64>>,
}

impl Default for GatewayHealth {
    fn default() -> Self {
        Self::new()
    }
}

impl GatewayHealth {
    pub fn new() -> Self {
        Self {
            started: Instant::now(),
            inbound_messages: 0,
            dispatched_events: 0,
            dropped_events: 0,
            overflows: 0,
            decode_failures: 0,
            reconnects: 0,
            errors: 0,
            heartbeats_sent: 0,
            recent_errors: VecDeque::with_capacity(MAX_RECENT_ERRORS),
            // 1us..60s at 3 significant digits.
            heartbeat_rtt: Histogram::new_with_bounds(1, 60_000_000, 3).ok(),
        }
    }

    pub fn record_inbound(&mut self) {
        self.inbound_messages = self.inbound_messages.saturating_add(1);
    }

    pub fn record_dispatched(&mut self) {
        self.dispatched_events = self.dispatched_events.saturating_add(1);
    }

    pub fn record_dropped(&mut self) {
        self.dropped_events = self.dropped_events.saturating_add(1);
    }

    pub fn record_overflow(&mut self) {
        self.overflows = self.overflows.saturating_add(1);
    }

    pub fn record_decode_failure(&mut self) {
        self.decode_failures = self.decode_failures.saturating_add(1);
    }

    pub fn increment_reconnect(&mut self) {
        self.reconnects = self.reconnects.saturating_add(1);
    }

    pub fn record_heartbeat_sent(&mut self) {
        self.heartbeats_sent = self.heartbeats_sent.saturating_add(1);
    }

    pub fn record_heartbeat_rtt(&mut self, rtt: Duration) {
        let micros = rtt.as_micros().min(u64::MAX as u128) as u64;
        if let Some(histogram) = self.heartbeat_rtt.as_mut() {
            histogram.saturating_record(micros.max(1));
        }
    }

    pub fn record_error(&mut self, context: &str, error: &str) {
        self.errors = self.errors.saturating_add(1);
        if self.recent_errors.len() == MAX_RECENT_ERRORS {
            self.recent_errors.pop_front();
        }
        self.recent_errors.push_back(GatewayErrorRecord {
            at: Instant::now(),
            context: truncate_string(context),
            error: truncate_string(error),
        });
    }

    pub fn recent_errors(&self) -> impl Iterator<Item = &GatewayErrorRecord> {
        self.recent_errors.iter()
    }

    pub fn stats(&self) -> GatewayStats {
        let (samples, p50, p99) = match self.heartbeat_rtt.as_ref() {
            Some(histogram) if histogram.len() > 0 => (
                histogram.len(),
                histogram.value_at_percentile(50.0),
                histogram.value_at_percentile(99.0),
            ),
            _ => (0, 0, 0),
        };

        GatewayStats {
            uptime: self.started.elapsed(),
            inbound_messages: self.inbound_messages,
            dispatched_events: self.dispatched_events,
            dropped_events: self.dropped_events,
            overflows: self.overflows,
            decode_failures: self.decode_failures,
            reconnects: self.reconnects,
            errors: self.errors,
            recent_errors: self.recent_errors.len(),
            heartbeats_sent: self.heartbeats_sent,
            heartbeat_p50_us: p50,
            heartbeat_p99_us: p99,
            heartbeat_samples: samples,
        }
    }
}
