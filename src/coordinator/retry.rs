//! Reconnect attempt accounting and backoff policy

use std::time::Duration;

/// Restart attempts before degrading to offline mode
pub const MAX_RECONNECT_ATTEMPTS: u32 = 5;

/// Backoff ceiling
const MAX_BACKOFF: Duration = Duration::from_millis(30_000);

/// Per-error-episode retry accounting. Reset on a successful engine start,
/// a manual retry, or restored connectivity; frozen once exhausted.
#[derive(Debug, Clone)]
pub struct RetryContext {
    attempt: u32,
    max_attempts: u32,
}

impl RetryContext {
    pub fn new() -> Self {
        Self {
            attempt: 0,
            max_attempts: MAX_RECONNECT_ATTEMPTS,
        }
    }

    /// Count one failed attempt, saturating at the maximum
    pub fn record_attempt(&mut self) {
        if self.attempt < self.max_attempts {
            self.attempt += 1;
        }
    }

    /// True once the attempt budget is spent
    pub fn exhausted(&self) -> bool {
        self.attempt >= self.max_attempts
    }

    pub fn reset(&mut self) {
        self.attempt = 0;
    }

    pub fn attempt(&self) -> u32 {
        self.attempt
    }

    pub fn max_attempts(&self) -> u32 {
        self.max_attempts
    }
}

impl Default for RetryContext {
    fn default() -> Self {
        Self::new()
    }
}

/// Delay before restart attempt `attempt` (1-based):
/// `min(2^(attempt-1) * 1000ms, 30000ms)`, i.e. 1s, 2s, 4s, 8s, 16s, 30s.
pub fn backoff_delay(attempt: u32) -> Duration {
    let attempt = attempt.max(1);
    let ms = 2u64
        .saturating_pow(attempt - 1)
        .saturating_mul(1000)
        .min(MAX_BACKOFF.as_millis() as u64);
    Duration::from_millis(ms)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_backoff_doubles_from_one_second() {
        assert_eq!(backoff_delay(1), Duration::from_millis(1000));
        assert_eq!(backoff_delay(2), Duration::from_millis(2000));
        assert_eq!(backoff_delay(3), Duration::from_millis(4000));
        assert_eq!(backoff_delay(4), Duration::from_millis(8000));
        assert_eq!(backoff_delay(5), Duration::from_millis(16000));
    }

    #[test]
    fn test_backoff_is_capped_at_thirty_seconds() {
        assert_eq!(backoff_delay(6), Duration::from_millis(30000));
        assert_eq!(backoff_delay(40), Duration::from_millis(30000));
    }

    #[test]
    fn test_attempt_zero_is_treated_as_first() {
        assert_eq!(backoff_delay(0), Duration::from_millis(1000));
    }

    #[test]
    fn test_context_exhausts_after_five_attempts() {
        let mut retry = RetryContext::new();
        for _ in 0..4 {
            retry.record_attempt();
            assert!(!retry.exhausted());
        }
        retry.record_attempt();
        assert!(retry.exhausted());
        assert_eq!(retry.attempt(), 5);
    }

    #[test]
    fn test_attempt_count_saturates_when_frozen() {
        let mut retry = RetryContext::new();
        for _ in 0..10 {
            retry.record_attempt();
        }
        assert_eq!(retry.attempt(), retry.max_attempts());
    }

    #[test]
    fn test_reset_clears_attempts() {
        let mut retry = RetryContext::new();
        retry.record_attempt();
        retry.record_attempt();
        retry.reset();
        assert_eq!(retry.attempt(), 0);
        assert!(!retry.exhausted());
    }
}
