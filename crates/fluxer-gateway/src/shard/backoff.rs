//! Reconnect policy with jittered exponential back-off.

use rand::Rng;
use std::time::Duration;

/// Controls how a shard waits between reconnect attempts.
#[derive(Debug, Clone, PartialEq)]
pub struct ReconnectBackoff {
    /// Delay before the first reconnect attempt.
    pub initial_delay: Duration,
    /// Maximum delay between attempts (cap).
    pub max_delay: Duration,
    /// Multiplier applied after each failed attempt.
    pub backoff_factor: f64,
    /// Upper bound of the random extra delay, as a fraction of the delay.
    pub jitter: f64,
    /// Consecutive failures before the shard gives up; `None` retries forever.
    pub max_attempts: Option<u32>,
}

impl Default for ReconnectBackoff {
    fn default() -> Self {
        Self {
            initial_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(60),
            backoff_factor: 2.0,
            jitter: 0.25,
            max_attempts: None,
        }
    }
}

impl ReconnectBackoff {
    /// Delay before reconnect attempt `attempt` (0-indexed).
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        let base_ms = self.initial_delay.as_millis() as f64;
        let exponent = i32::try_from(attempt).unwrap_or(i32::MAX);
        let delay_ms = base_ms * self.backoff_factor.max(1.0).powi(exponent);
        let capped_ms = delay_ms.min(self.max_delay.as_millis() as f64);

        let jitter_ms = if self.jitter > 0.0 {
            capped_ms * self.jitter * rand::thread_rng().gen::<f64>()
        } else {
            0.0
        };
        Duration::from_millis((capped_ms + jitter_ms) as u64)
    }

    /// Whether `failures` consecutive failures exhaust the policy.
    pub fn should_give_up(&self, failures: u32) -> bool {
        self.max_attempts.is_some_and(|max| failures >= max)
    }
}
