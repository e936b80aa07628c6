//! Jittered exponential back-off used for redelivery scheduling.

use std::time::Duration;

/// Controls the delay between delivery attempts of a failed task.
#[derive(Debug, Clone)]
pub struct BackoffPolicy {
    /// Delay before the first retry.
    pub initial_delay: Duration,
    /// Cap on the delay between attempts.
    pub max_delay: Duration,
    /// Multiplier applied after each failed attempt.
    pub factor: f64,
}

impl Default for BackoffPolicy {
    fn default() -> Self {
        Self {
            initial_delay: Duration::from_millis(500),
            max_delay: Duration::from_secs(10),
            factor: 2.0,
        }
    }
}

impl BackoffPolicy {
    /// Delay for the given attempt number (0-indexed), with ~25% jitter to
    /// spread redelivery storms.
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        let base_ms = self.initial_delay.as_millis() as f64;
        let delay_ms = base_ms * self.factor.powi(attempt as i32);
        let capped_ms = delay_ms.min(self.max_delay.as_millis() as f64);
        let jitter = capped_ms * 0.25 * pseudo_random_fraction(attempt);
        Duration::from_millis((capped_ms + jitter) as u64)
    }
}

/// Cheap deterministic "random" fraction [0, 1) based on attempt number.
/// Not cryptographically secure.
fn pseudo_random_fraction(attempt: u32) -> f64 {
    let hash = attempt.wrapping_mul(2654435761); // Knuth multiplicative hash
    (hash as f64) / (u32::MAX as f64)
}
