//! Heartbeat bookkeeping
//!
//! The heartbeat task and the read loop of one socket share a
//! [`HeartbeatState`]: the task records each beat, the read loop records
//! ACKs and dispatch sequences.

use rand::Rng;
use std::time::Duration;
use tokio::time::Instant;

#[derive(Debug, Default)]
pub(crate) struct HeartbeatState {
    last_sent: Option<Instant>,
    acked: bool,
    latency: Option<Duration>,
    /// Sequence sent with the next heartbeat
    sequence: Option<u64>,
}

impl HeartbeatState {
    /// Start a new socket; latency from the previous socket is kept.
    pub(crate) fn reset(&mut self, sequence: Option<u64>) {
        self.last_sent = None;
        self.acked = true;
        self.sequence = sequence;
    }

    pub(crate) fn sequence(&self) -> Option<u64> {
        self.sequence
    }

    pub(crate) fn set_sequence(&mut self, sequence: Option<u64>) {
        self.sequence = sequence;
    }

    pub(crate) fn record_sent(&mut self, now: Instant) {
        self.last_sent = Some(now);
        self.acked = false;
    }

    /// Mark the outstanding beat acknowledged and return its round trip
    pub(crate) fn record_ack(&mut self, now: Instant) -> Option<Duration> {
        self.acked = true;
        if let Some(sent) = self.last_sent {
            self.latency = Some(now.saturating_duration_since(sent));
        }
        self.latency
    }

    /// A beat went out and no ACK came back
    pub(crate) fn is_zombie(&self) -> bool {
        self.last_sent.is_some() && !self.acked
    }

    pub(crate) fn latency(&self) -> Option<Duration> {
        self.latency
    }
}

/// Random offset in `[0, interval)` for the first beat of a socket
pub(crate) fn first_beat_delay(interval: Duration) -> Duration {
    let millis = interval.as_millis() as u64;
    if millis == 0 {
        return Duration::ZERO;
    }
    Duration::from_millis(rand::thread_rng().gen_range(0..millis))
}
