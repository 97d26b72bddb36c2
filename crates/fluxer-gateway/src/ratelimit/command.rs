//! Per-connection command budget
//!
//! Fixed-window bucket: `capacity` frames per `window`, refilled to full when
//! the window rolls over. Heartbeat, Identify and Resume never pass through
//! here; the part of the server budget they need is held back by
//! [`RateLimitConfig::reserved`].

use crate::error::RateLimited;
use parking_lot::Mutex;
use std::time::Duration;
use tokio::time::Instant;

/// Outgoing frame limits of one socket
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RateLimitConfig {
    /// Frames the server accepts per window
    pub capacity: u32,
    pub window: Duration,
    /// Frames per window kept free for heartbeats and handshakes
    pub reserved: u32,
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            capacity: 120,
            window: Duration::from_secs(60),
            reserved: 5,
        }
    }
}

impl RateLimitConfig {
    /// Frames per window available to caller commands
    #[must_use]
    pub fn caller_capacity(&self) -> u32 {
        self.capacity.saturating_sub(self.reserved).max(1)
    }
}

/// Snapshot of a bucket
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RateBudget {
    pub capacity: u32,
    pub remaining: u32,
    pub window_reset_at: Instant,
}

impl RateBudget {
    fn new(capacity: u32, window: Duration) -> Self {
        Self {
            capacity,
            remaining: capacity,
            window_reset_at: Instant::now() + window,
        }
    }

    /// Roll the window forward if it has elapsed
    fn refill(&mut self, now: Instant, window: Duration) {
        if now < self.window_reset_at {
            return;
        }
        self.remaining = self.capacity;
        if window.is_zero() {
            self.window_reset_at = now;
            return;
        }
        let behind = now.duration_since(self.window_reset_at);
        let skipped = u32::try_from(behind.as_nanos() / window.as_nanos()).unwrap_or(u32::MAX);
        self.window_reset_at += window.saturating_mul(skipped.saturating_add(1));
    }
}

/// Token bucket gating caller commands on one connection
#[derive(Debug)]
pub struct CommandRateLimiter {
    window: Duration,
    budget: Mutex<RateBudget>,
}

impl CommandRateLimiter {
    #[must_use]
    pub fn new(capacity: u32, window: Duration) -> Self {
        Self {
            window,
            budget: Mutex::new(RateBudget::new(capacity, window)),
        }
    }

    /// Limiter for caller commands under the given socket limits
    #[must_use]
    pub fn from_config(config: &RateLimitConfig) -> Self {
        Self::new(config.caller_capacity(), config.window)
    }

    /// Take `n` tokens without waiting.
    pub fn try_acquire(&self, n: u32) -> Result<(), RateLimited> {
        let now = Instant::now();
        let mut budget = self.budget.lock();
        budget.refill(now, self.window);

        if budget.remaining >= n {
            budget.remaining -= n;
            return Ok(());
        }

        let retry_after = if n > budget.capacity {
            // Can never fit; report a full window so callers back off.
            self.window
        } else {
            budget.window_reset_at.saturating_duration_since(now)
        };
        Err(RateLimited { retry_after })
    }

    /// Take `n` tokens, sleeping until the window resets if the bucket is
    /// short. Retries once; a second shortfall is returned to the caller.
    pub async fn acquire(&self, n: u32) -> Result<(), RateLimited> {
        match self.try_acquire(n) {
            Ok(()) => Ok(()),
            Err(limited) => {
                tracing::debug!(
                    retry_after_ms = limited.retry_after.as_millis() as u64,
                    "Command budget exhausted, waiting for refill"
                );
                tokio::time::sleep(limited.retry_after).await;
                self.try_acquire(n)
            }
        }
    }

    /// Current budget, with any elapsed window already applied
    #[must_use]
    pub fn budget(&self) -> RateBudget {
        let mut budget = self.budget.lock();
        budget.refill(Instant::now(), self.window);
        *budget
    }

    /// Start a fresh window at full capacity
    pub fn reset(&self) {
        let mut budget = self.budget.lock();
        *budget = RateBudget::new(budget.capacity, self.window);
    }
}
