//! Exponential backoff with jitter for reconnect loops.

use rand::Rng;
use std::time::Duration;

/// Reconnect delay policy: exponential growth from a base delay up to a
/// cap, with proportional jitter so simultaneous clients do not thunder
/// back in lockstep.
#[derive(Debug, Clone)]
pub struct BackoffPolicy {
    base: Duration,
    cap: Duration,
    jitter: f64,
}

impl BackoffPolicy {
    /// Creates a policy.
    ///
    /// # Arguments
    ///
    /// * `base` - Delay before the first retry.
    /// * `cap` - Upper bound applied before jitter.
    /// * `jitter` - Proportional spread, e.g. `0.2` for +/-20%.
    pub fn new(base: Duration, cap: Duration, jitter: f64) -> Self {
        Self {
            base,
            cap,
            jitter: jitter.clamp(0.0, 1.0),
        }
    }

    /// Returns the jittered delay for a retry attempt (0-based).
    pub fn delay(&self, attempt: u32) -> Duration {
        let exp = self
            .base
            .saturating_mul(2u32.saturating_pow(attempt))
            .min(self.cap);
        if self.jitter == 0.0 {
            return exp;
        }
        let spread = rand::thread_rng().gen_range(-self.jitter..=self.jitter);
        exp.mul_f64(1.0 + spread)
    }

    /// Delay without jitter, useful for asserting bounds.
    pub fn raw_delay(&self, attempt: u32) -> Duration {
        self.base
            .saturating_mul(2u32.saturating_pow(attempt))
            .min(self.cap)
    }
}

impl Default for BackoffPolicy {
    /// Reconnect defaults: 1s base, 30s cap, +/-20% jitter.
    fn default() -> Self {
        Self::new(Duration::from_secs(1), Duration::from_secs(30), 0.2)
    }
}
