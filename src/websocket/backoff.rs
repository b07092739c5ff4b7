use rand::Rng;
use std::time::Duration;

/// Exponential backoff schedule for reconnect attempts
///
/// `delay(n) = min(base * 2^n, cap)`. Pure and deterministic; jitter is
/// applied separately through [`BackoffPolicy::jittered`] so the reference
/// timing stays reproducible.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BackoffPolicy {
    /// Delay for attempt 0
    pub base: Duration,
    /// Upper bound for any delay
    pub cap: Duration,
}

impl BackoffPolicy {
    pub const DEFAULT_BASE: Duration = Duration::from_millis(1000);
    pub const DEFAULT_CAP: Duration = Duration::from_millis(30_000);

    pub fn new(base: Duration, cap: Duration) -> Self {
        Self { base, cap }
    }

    /// Delay before the attempt with the given index
    pub fn delay(&self, attempt: u32) -> Duration {
        1u32.checked_shl(attempt)
            .and_then(|factor| self.base.checked_mul(factor))
            .map_or(self.cap, |delay| delay.min(self.cap))
    }

    /// Like [`delay`](Self::delay) but drawn uniformly from the upper half
    /// of the window, so it never exceeds the deterministic value.
    pub fn jittered<R: Rng>(&self, attempt: u32, rng: &mut R) -> Duration {
        let delay = self.delay(attempt);
        let half = delay / 2;
        let spread = (delay - half).as_millis() as u64;
        half + Duration::from_millis(rng.gen_range(0..=spread))
    }
}

impl Default for BackoffPolicy {
    fn default() -> Self {
        Self {
            base: Self::DEFAULT_BASE,
            cap: Self::DEFAULT_CAP,
        }
    }
}
