//! Retry policy for unary JSON-RPC calls.

use std::time::Duration;

/// Exponential backoff applied to network errors and HTTP 5xx/429.
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub initial_delay: Duration,
    pub max_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            initial_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(10),
        }
    }
}

impl RetryPolicy {
    /// Delay before retrying the given 0-indexed failed attempt.
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        let delay = self.initial_delay.saturating_mul(2u32.saturating_pow(attempt));
        delay.min(self.max_delay)
    }

    pub fn attempts_exhausted(&self, attempt: u32) -> bool {
        attempt + 1 >= self.max_attempts
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn delay_doubles_then_caps() {
        let p = RetryPolicy::default();
        assert_eq!(p.delay_for_attempt(0), Duration::from_secs(1));
        assert_eq!(p.delay_for_attempt(1), Duration::from_secs(2));
        assert_eq!(p.delay_for_attempt(2), Duration::from_secs(4));
        assert_eq!(p.delay_for_attempt(5), Duration::from_secs(10));
    }

    #[test]
    fn exhaustion_counts_attempts() {
        let p = RetryPolicy::default();
        assert!(!p.attempts_exhausted(0));
        assert!(!p.attempts_exhausted(1));
        assert!(p.attempts_exhausted(2));
    }
}
