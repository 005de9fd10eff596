//! Retry strategies for webhook delivery.

use std::time::Duration;

use chrono::{DateTime, Utc};
use rand::Rng;

/// Trait for retry strategies.
///
/// `attempt` is always the number of attempts already made, counted after
/// the failure being handled.
pub trait RetryStrategy: Send + Sync {
    /// Returns the delay before the next attempt, or None if max retries exceeded.
    fn next_delay(&self, attempt: u32) -> Option<Duration>;

    /// Returns the absolute time of the next attempt, or None if exhausted.
    fn next_attempt_at(&self, attempt: u32, now: DateTime<Utc>) -> Option<DateTime<Utc>> {
        self.next_delay(attempt).map(|delay| offset_from(now, delay))
    }
}

/// Returns `now + delay`, saturating at the latest representable time.
fn offset_from(now: DateTime<Utc>, delay: Duration) -> DateTime<Utc> {
    chrono::Duration::from_std(delay)
        .ok()
        .and_then(|d| now.checked_add_signed(d))
        .unwrap_or(DateTime::<Utc>::MAX_UTC)
}

/// Exponential backoff retry strategy.
///
/// Delay increases exponentially: `min(base * 2^attempt, max_delay)`.
/// The cap holds for any attempt count.
#[derive(Debug, Clone)]
pub struct ExponentialBackoff {
    /// Base delay.
    pub base: Duration,
    /// Maximum delay cap.
    pub max_delay: Duration,
    /// Maximum number of attempts.
    pub max_attempts: u32,
    /// Jitter factor (0.0 to 1.0).
    pub jitter: f64,
}

impl ExponentialBackoff {
    /// Creates the delivery policy: 30s base, 1h cap, 5 attempts, no jitter.
    pub fn new() -> Self {
        Self {
            base: Duration::from_secs(30),
            max_delay: Duration::from_secs(3600), // 1 hour
            max_attempts: 5,
            jitter: 0.0,
        }
    }

    /// Sets the base delay.
    pub fn base(mut self, base: Duration) -> Self {
        self.base = base;
        self
    }

    /// Sets the maximum delay.
    pub fn max_delay(mut self, max: Duration) -> Self {
        self.max_delay = max;
        self
    }

    /// Sets the maximum attempts.
    pub fn max_attempts(mut self, max: u32) -> Self {
        self.max_attempts = max;
        self
    }

    /// Sets the jitter factor.
    pub fn jitter(mut self, jitter: f64) -> Self {
        self.jitter = jitter.clamp(0.0, 1.0);
        self
    }

    /// Returns the capped delay for `attempt`, ignoring `max_attempts`.
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let Some(multiplier) = 2_u32.checked_pow(attempt) else {
            return self.max_delay;
        };
        let delay = self.base.checked_mul(multiplier).unwrap_or(self.max_delay);
        std::cmp::min(delay, self.max_delay)
    }
}

impl Default for ExponentialBackoff {
    fn default() -> Self {
        Self::new()
    }
}

impl RetryStrategy for ExponentialBackoff {
    fn next_delay(&self, attempt: u32) -> Option<Duration> {
        if attempt >= self.max_attempts {
            return None;
        }

        let delay = self.delay_for(attempt);

        // Apply jitter
        if self.jitter > 0.0 {
            let jitter_range = (delay.as_millis() as f64 * self.jitter) as u64;
            let jitter_offset = rand::thread_rng().gen_range(0..=jitter_range);
            Some(std::cmp::min(delay + Duration::from_millis(jitter_offset), self.max_delay))
        } else {
            Some(delay)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn assert_close(actual: DateTime<Utc>, expected: DateTime<Utc>) {
        let diff = (actual - expected).num_seconds().abs();
        assert!(diff <= 5, "expected {expected}, got {actual}");
    }

    #[test]
    fn test_exponential_backoff() {
        let strategy = ExponentialBackoff::new();

        assert_eq!(strategy.next_delay(1), Some(Duration::from_secs(60)));
        assert_eq!(strategy.next_delay(2), Some(Duration::from_secs(120)));
        assert_eq!(strategy.next_delay(3), Some(Duration::from_secs(240)));
        assert_eq!(strategy.next_delay(4), Some(Duration::from_secs(480)));
        assert_eq!(strategy.next_delay(5), None);
    }

    #[test]
    fn test_delay_is_capped() {
        let strategy = ExponentialBackoff::new();

        assert_eq!(strategy.delay_for(7), Duration::from_secs(3600));
        assert_eq!(strategy.delay_for(10), Duration::from_secs(3600));
        assert_eq!(strategy.delay_for(31), Duration::from_secs(3600));
        assert_eq!(strategy.delay_for(32), Duration::from_secs(3600));
        assert_eq!(strategy.delay_for(u32::MAX), Duration::from_secs(3600));
    }

    #[test]
    fn test_delay_is_monotonic() {
        let strategy = ExponentialBackoff::new();
        let mut previous = Duration::ZERO;

        for attempt in 0..64 {
            let delay = strategy.delay_for(attempt);
            assert!(delay >= previous);
            assert!(delay <= Duration::from_secs(3600));
            previous = delay;
        }
    }

    #[test]
    fn test_next_attempt_at() {
        let strategy = ExponentialBackoff::new().max_attempts(u32::MAX);
        let now = Utc::now();

        assert_close(strategy.next_attempt_at(1, now).unwrap(), now + chrono::Duration::seconds(60));
        assert_close(strategy.next_attempt_at(2, now).unwrap(), now + chrono::Duration::seconds(120));
        assert_close(strategy.next_attempt_at(10, now).unwrap(), now + chrono::Duration::hours(1));
    }

    #[test]
    fn test_jitter_stays_under_cap() {
        let strategy = ExponentialBackoff::new().jitter(1.0).max_attempts(20);

        for _ in 0..50 {
            let delay = strategy.next_delay(1).unwrap();
            assert!(delay >= Duration::from_secs(60));
            assert!(delay <= Duration::from_secs(120));
            assert!(strategy.next_delay(15).unwrap() <= Duration::from_secs(3600));
        }
    }

    #[test]
    fn test_next_attempt_at_stops_at_max_attempts() {
        let strategy = ExponentialBackoff::new().max_attempts(3);
        let now = Utc::now();

        assert!(strategy.next_attempt_at(2, now).is_some());
        assert_eq!(strategy.next_attempt_at(3, now), None);
    }

    #[test]
    fn test_zero_jitter_is_exact() {
        let strategy = ExponentialBackoff::new().jitter(-2.0);
        assert_eq!(strategy.jitter, 0.0);
        assert_eq!(strategy.next_delay(2), Some(Duration::from_secs(120)));
    }
}
