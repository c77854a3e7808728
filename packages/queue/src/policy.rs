// ABOUTME: Retry and lease settings for the execution queue
// ABOUTME: Backoff doubles per attempt starting from the base delay

use serde::{Deserialize, Serialize};
use std::time::Duration;

pub const DEFAULT_QUEUE_NAME: &str = "code-execution";
pub const DEFAULT_ATTEMPTS: u32 = 3;
pub const DEFAULT_BACKOFF_BASE: Duration = Duration::from_secs(2);
pub const DEFAULT_LEASE_DURATION: Duration = Duration::from_secs(60);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RetryPolicy {
    /// Total deliveries allowed, including the first
    pub attempts: u32,
    pub backoff_base: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            attempts: DEFAULT_ATTEMPTS,
            backoff_base: DEFAULT_BACKOFF_BASE,
        }
    }
}

impl RetryPolicy {
    /// Delay before redelivery after failed attempt `attempt` (1-based):
    /// base, 2·base, 4·base, ...
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let exponent = attempt.saturating_sub(1);
        let multiplier = 1u32.checked_shl(exponent).unwrap_or(u32::MAX);
        self.backoff_base.saturating_mul(multiplier)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QueueSettings {
    pub name: String,
    pub retry: RetryPolicy,
    /// How long a claimed job stays invisible to other workers.
    /// Must outlast the longest run.
    pub lease_duration: Duration,
}

impl Default for QueueSettings {
    fn default() -> Self {
        Self {
            name: DEFAULT_QUEUE_NAME.to_string(),
            retry: RetryPolicy::default(),
            lease_duration: DEFAULT_LEASE_DURATION,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[rstest]
    #[case(1, 2_000)]
    #[case(2, 4_000)]
    #[case(3, 8_000)]
    #[case(0, 2_000)]
    fn test_backoff_schedule(#[case] attempt: u32, #[case] expected_ms: u64) {
        let policy = RetryPolicy::default();
        assert_eq!(policy.delay_for(attempt), Duration::from_millis(expected_ms));
    }

    #[test]
    fn test_backoff_saturates() {
        let policy = RetryPolicy {
            attempts: 100,
            backoff_base: Duration::from_secs(2),
        };
        assert_eq!(
            policy.delay_for(64),
            Duration::from_secs(2).saturating_mul(u32::MAX)
        );
        assert!(policy.delay_for(33) >= policy.delay_for(32));
    }
}
