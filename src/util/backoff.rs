//! Reconnect backoff
// (c) 2025 Ross Younger

use std::time::Duration;

use rand::Rng as _;

/// Bounded exponential backoff with jitter.
///
/// Attempt `n` (counting from zero) waits `min(base · 2ⁿ, cap)`, scaled by a random factor in
/// `[0.5, 1.5]` and clamped to `cap`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryTimer {
    base: Duration,
    cap: Duration,
}

impl RetryTimer {
    /// Constructor. If `cap` is less than `base`, `base` is used for both.
    #[must_use]
    pub fn new(base: Duration, cap: Duration) -> Self {
        Self {
            base,
            cap: cap.max(base),
        }
    }

    /// The delay before attempt `attempt`, without jitter
    #[must_use]
    pub fn nominal_delay(&self, attempt: u32) -> Duration {
        let factor = 1u32.checked_shl(attempt).unwrap_or(u32::MAX);
        self.base.saturating_mul(factor).min(self.cap)
    }

    /// The delay before attempt `attempt`, with jitter
    #[must_use]
    pub fn delay(&self, attempt: u32) -> Duration {
        let jitter = rand::thread_rng().gen_range(0.5..=1.5);
        self.nominal_delay(attempt).mul_f64(jitter).min(self.cap)
    }
}
