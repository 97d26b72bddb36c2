//! Identify gate
//!
//! Serializes the Identify handshake of every shard sharing one token.
//! Each concurrency slot admits one Identify per refill period; a shard maps
//! to slot `shard_id % max_concurrency`. Slots are never released by hand:
//! an acquired slot stays consumed until the next refill tick and frees
//! itself afterwards, so a shard that dies mid-handshake cannot hold it.

use crate::error::{GatewayError, GatewayResult};
use crate::gateway_info::SessionStartLimit;
use async_trait::async_trait;
use parking_lot::Mutex as SyncMutex;
use std::time::Duration;
use tokio::sync::Mutex;
use tokio::time::Instant;

/// Admission control for Identify frames
#[async_trait]
pub trait IdentifyLimiter: Send + Sync {
    /// Wait until `shard_id` may send Identify.
    async fn acquire(&self, shard_id: u32) -> GatewayResult<()>;
}

/// Gate that never waits
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopIdentifyGate;

#[async_trait]
impl IdentifyLimiter for NoopIdentifyGate {
    async fn acquire(&self, _shard_id: u32) -> GatewayResult<()> {
        Ok(())
    }
}

#[derive(Debug)]
struct Slot {
    /// Slot is consumed until this instant
    free_at: Option<Instant>,
}

#[derive(Debug)]
struct StartLimit {
    total: u32,
    remaining: u32,
    resets_at: Instant,
}

impl StartLimit {
    const RESET_PERIOD: Duration = Duration::from_secs(24 * 60 * 60);

    /// Consume one session start, or return when the next one is available.
    fn take(&mut self, now: Instant) -> Result<(), Instant> {
        if now >= self.resets_at {
            self.remaining = self.total;
            self.resets_at = now + Self::RESET_PERIOD;
        }
        if self.remaining == 0 {
            return Err(self.resets_at);
        }
        self.remaining -= 1;
        Ok(())
    }
}

/// Scheduled-refill identify bucket shared by all shards of a token
#[derive(Debug)]
pub struct IdentifyGate {
    /// One FIFO queue per concurrency slot
    slots: Vec<Mutex<Slot>>,
    refill: Duration,
    origin: Instant,
    start_limit: SyncMutex<Option<StartLimit>>,
    acquire_timeout: Option<Duration>,
}

impl IdentifyGate {
    /// Default refill period between identifies on one slot
    pub const DEFAULT_REFILL: Duration = Duration::from_secs(5);

    #[must_use]
    pub fn new(max_concurrency: u32) -> Self {
        Self::with_refill(max_concurrency, Self::DEFAULT_REFILL)
    }

    #[must_use]
    pub fn with_refill(max_concurrency: u32, refill: Duration) -> Self {
        let slots = (0..max_concurrency.max(1))
            .map(|_| Mutex::new(Slot { free_at: None }))
            .collect();
        Self {
            slots,
            refill,
            origin: Instant::now(),
            start_limit: SyncMutex::new(None),
            acquire_timeout: None,
        }
    }

    /// Gate sized from the gateway's session start limit
    #[must_use]
    pub fn from_session_start_limit(limit: &SessionStartLimit) -> Self {
        Self::new(limit.max_concurrency).with_session_start_limit(limit)
    }

    /// Also enforce the daily session start quota
    #[must_use]
    pub fn with_session_start_limit(self, limit: &SessionStartLimit) -> Self {
        *self.start_limit.lock() = Some(StartLimit {
            total: limit.total,
            remaining: limit.remaining.min(limit.total),
            resets_at: Instant::now() + limit.reset_after(),
        });
        self
    }

    /// Fail an acquire that waits longer than `timeout`
    #[must_use]
    pub fn with_acquire_timeout(mut self, timeout: Duration) -> Self {
        self.acquire_timeout = Some(timeout);
        self
    }

    #[must_use]
    pub fn max_concurrency(&self) -> u32 {
        self.slots.len() as u32
    }

    #[must_use]
    pub fn refill(&self) -> Duration {
        self.refill
    }

    /// Session starts left before the quota resets, if a quota is tracked
    #[must_use]
    pub fn remaining_session_starts(&self) -> Option<u32> {
        self.start_limit.lock().as_ref().map(|l| l.remaining)
    }

    /// First refill tick strictly after `now`
    fn next_tick(&self, now: Instant) -> Instant {
        if self.refill.is_zero() {
            return now;
        }
        let elapsed = now.duration_since(self.origin);
        let ticks = elapsed.as_nanos() / self.refill.as_nanos() + 1;
        self.origin + self.refill.saturating_mul(u32::try_from(ticks).unwrap_or(u32::MAX))
    }

    async fn wait_for_session_start(&self, shard_id: u32) {
        loop {
            let outcome = self
                .start_limit
                .lock()
                .as_mut()
                .map_or(Ok(()), |limit| limit.take(Instant::now()));

            match outcome {
                Ok(()) => return,
                Err(resets_at) => {
                    tracing::warn!(
                        shard_id,
                        wait_ms = resets_at.saturating_duration_since(Instant::now()).as_millis() as u64,
                        "Session start limit reached, waiting for reset"
                    );
                    tokio::time::sleep_until(resets_at).await;
                }
            }
        }
    }

    async fn acquire_slot(&self, shard_id: u32) {
        let index = (shard_id as usize) % self.slots.len();
        let mut slot = self.slots[index].lock().await;

        if let Some(free_at) = slot.free_at {
            if free_at > Instant::now() {
                tracing::debug!(shard_id, slot = index, "Waiting for identify slot");
                tokio::time::sleep_until(free_at).await;
            }
        }

        self.wait_for_session_start(shard_id).await;

        let now = Instant::now();
        slot.free_at = Some(self.next_tick(now));
        tracing::debug!(shard_id, slot = index, "Identify slot acquired");
    }
}

#[async_trait]
impl IdentifyLimiter for IdentifyGate {
    async fn acquire(&self, shard_id: u32) -> GatewayResult<()> {
        match self.acquire_timeout {
            Some(timeout) => tokio::time::timeout(timeout, self.acquire_slot(shard_id))
                .await
                .map_err(|_| GatewayError::IdentifyTimeout(timeout)),
            None => {
                self.acquire_slot(shard_id).await;
                Ok(())
            }
        }
    }
}
