//! Retry policy: decides backoff delays.

use std::time::Duration;

/// Exponential backoff with a cap.
#[derive(Debug, Clone, PartialEq)]
pub struct RetryPolicy {
    pub base_delay: Duration,

    pub multiplier: f64,

    /// Upper bound for any single delay.
    pub max_delay: Duration,
}

impl RetryPolicy {
    pub fn new(base_delay: Duration, max_delay: Duration) -> Self {
        Self {
            base_delay,
            multiplier: 2.0,
            max_delay,
        }
    }

    /// Delay after failed attempt number `attempt` (1-indexed):
    /// `min(base_delay * multiplier^attempt, max_delay)`.
    ///
    /// Example with base_delay=30s, max_delay=30m:
    /// - attempt 1: 60s
    /// - attempt 2: 120s
    /// - attempt 3: 240s
    /// - attempt 6+: 30m
    pub fn next_delay(&self, attempt: u32) -> Duration {
        let exponent = i32::try_from(attempt).unwrap_or(i32::MAX);
        let secs = self.base_delay.as_secs_f64() * self.multiplier.powi(exponent);
        if !secs.is_finite() || secs >= self.max_delay.as_secs_f64() {
            return self.max_delay;
        }
        Duration::from_secs_f64(secs.max(0.0))
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::new(Duration::from_secs(30), Duration::from_secs(30 * 60))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[rstest]
    #[case(1, Duration::from_secs(60))]
    #[case(2, Duration::from_secs(120))]
    #[case(3, Duration::from_secs(240))]
    #[case(5, Duration::from_secs(960))]
    #[case(6, Duration::from_secs(1800))]
    #[case(40, Duration::from_secs(1800))]
    fn exponential_backoff_is_capped(#[case] attempt: u32, #[case] expected: Duration) {
        assert_eq!(RetryPolicy::default().next_delay(attempt), expected);
    }

    #[test]
    fn delays_never_decrease() {
        let policy = RetryPolicy::new(Duration::from_millis(250), Duration::from_secs(10));
        let delays: Vec<_> = (1..20).map(|a| policy.next_delay(a)).collect();
        assert!(delays.windows(2).all(|w| w[0] <= w[1]));
        assert_eq!(*delays.last().unwrap(), Duration::from_secs(10));
    }

    #[test]
    fn huge_attempt_does_not_overflow() {
        let policy = RetryPolicy::default();
        assert_eq!(policy.next_delay(u32::MAX), policy.max_delay);
    }
}
