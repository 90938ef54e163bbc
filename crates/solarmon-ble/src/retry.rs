//! Bounded retry policy.
//!
//! Connection attempts use a capped exponential backoff so that several
//! devices failing at once do not retry in lockstep; reconnects after a link
//! drop use a fixed delay. Both are expressed by [`RetryPolicy`].

use solarmon_core::config::{ConnectConfig, ReconnectConfig};
use std::time::Duration;

/// Attempt budget and delay schedule.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    max_attempts: u32,
    initial_delay: Duration,
    max_delay: Duration,
}

impl RetryPolicy {
    /// Delay doubling from `initial_delay` up to `max_delay`.
    ///
    /// # Examples
    ///
    /// ```
    /// use solarmon_ble::retry::RetryPolicy;
    /// use std::time::Duration;
    ///
    /// let policy = RetryPolicy::exponential(5, Duration::from_secs(2), Duration::from_secs(10));
    /// let delays: Vec<_> = policy.delays().map(|d| d.as_secs()).collect();
    /// assert_eq!(delays, vec![2, 4, 8, 10]);
    /// ```
    pub fn exponential(max_attempts: u32, initial_delay: Duration, max_delay: Duration) -> Self {
        Self {
            max_attempts: max_attempts.max(1),
            initial_delay,
            max_delay: max_delay.max(initial_delay),
        }
    }

    /// The same delay before every retry.
    pub fn fixed(max_attempts: u32, delay: Duration) -> Self {
        Self::exponential(max_attempts, delay, delay)
    }

    /// Total attempts, the first one included.
    #[must_use]
    pub fn max_attempts(&self) -> u32 {
        self.max_attempts
    }

    /// Shortest delay of the schedule.
    #[must_use]
    pub fn initial_delay(&self) -> Duration {
        self.initial_delay
    }

    /// Delay before attempt `attempt` (1-based). The first attempt has none.
    #[must_use]
    pub fn delay_before(&self, attempt: u32) -> Duration {
        if attempt <= 1 {
            return Duration::ZERO;
        }
        let doublings = (attempt - 2).min(31);
        self.initial_delay
            .saturating_mul(1u32 << doublings)
            .min(self.max_delay)
    }

    /// Delays between consecutive attempts.
    pub fn delays(&self) -> impl Iterator<Item = Duration> + '_ {
        (2..=self.max_attempts).map(|attempt| self.delay_before(attempt))
    }
}

impl From<&ConnectConfig> for RetryPolicy {
    fn from(config: &ConnectConfig) -> Self {
        Self::exponential(config.max_attempts, config.initial_delay(), config.max_delay())
    }
}

impl From<&ReconnectConfig> for RetryPolicy {
    fn from(config: &ReconnectConfig) -> Self {
        Self::fixed(config.max_attempts, config.delay())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[rstest]
    #[case(1, 0)]
    #[case(2, 2000)]
    #[case(3, 4000)]
    #[case(4, 8000)]
    #[case(5, 10000)]
    #[case(40, 10000)]
    fn test_exponential_delay_is_capped(#[case] attempt: u32, #[case] expected_ms: u64) {
        let policy = RetryPolicy::exponential(5, Duration::from_secs(2), Duration::from_secs(10));
        assert_eq!(policy.delay_before(attempt), Duration::from_millis(expected_ms));
    }

    #[test]
    fn test_fixed_policy() {
        let policy = RetryPolicy::fixed(2, Duration::from_secs(2));
        assert_eq!(policy.delays().collect::<Vec<_>>(), vec![Duration::from_secs(2)]);
    }

    #[test]
    fn test_zero_attempts_means_one() {
        let policy = RetryPolicy::fixed(0, Duration::from_secs(1));
        assert_eq!(policy.max_attempts(), 1);
        assert_eq!(policy.delays().count(), 0);
    }

    #[test]
    fn test_from_config_defaults() {
        let connect = RetryPolicy::from(&ConnectConfig::default());
        assert_eq!(connect.max_attempts(), 5);
        assert_eq!(connect.delay_before(2), Duration::from_secs(2));

        let reconnect = RetryPolicy::from(&ReconnectConfig::default());
        assert_eq!(reconnect.max_attempts(), 2);
        assert_eq!(reconnect.delay_before(2), Duration::from_secs(2));
    }
}
