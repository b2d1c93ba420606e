use std::time::Duration;

use rand::Rng;
use serde::{Deserialize, Serialize};

/// Exponential backoff for transient storage failures.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryPolicy {
    /// Total attempts, including the first one.
    pub max_attempts: u32,
    pub base_delay_ms: u64,
    pub max_delay_ms: u64,
    /// Randomize each delay within its upper half.
    pub jitter: bool,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        RetryPolicy {
            max_attempts: 3,
            base_delay_ms: 50,
            max_delay_ms: 2_000,
            jitter: true,
        }
    }
}

impl RetryPolicy {
    /// Backoff before attempt `attempt + 1`, where `attempt` starts at 1.
    pub fn delay(&self, attempt: u32) -> Duration {
        let exp = attempt.saturating_sub(1).min(32);
        let capped = self
            .base_delay_ms
            .saturating_mul(1u64 << exp)
            .min(self.max_delay_ms);
        let millis = if self.jitter && capped > 1 {
            let half = capped / 2;
            half + rand::thread_rng().gen_range(0..=capped - half)
        } else {
            capped
        };
        Duration::from_millis(millis)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn delays_double_until_the_cap() {
        let policy = RetryPolicy {
            max_attempts: 6,
            base_delay_ms: 50,
            max_delay_ms: 300,
            jitter: false,
        };
        let delays: Vec<u64> = (1..=5).map(|a| policy.delay(a).as_millis() as u64).collect();
        assert_eq!(delays, vec![50, 100, 200, 300, 300]);
    }

    #[test]
    fn jitter_stays_within_upper_half() {
        let policy = RetryPolicy::default();
        for attempt in 1..=4 {
            let bound = (50u64 << (attempt - 1)).min(2_000);
            let ms = policy.delay(attempt).as_millis() as u64;
            assert!(ms >= bound / 2 && ms <= bound, "attempt {attempt}: {ms}ms");
        }
    }

    #[test]
    fn huge_attempt_numbers_do_not_overflow() {
        let policy = RetryPolicy::default();
        assert!(policy.delay(u32::MAX) <= Duration::from_millis(2_000));
    }
}
