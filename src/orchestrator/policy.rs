//! Bounded retry policies for pipeline stages
//!
//! Each stage owns a `RetryPolicy` value instead of inlining its retry loop.
//! `max_attempts` counts the first attempt, so a policy of 2 means one retry.

use std::time::Duration;

/// Delay schedule between attempts
#[derive(Debug, Clone, Copy)]
pub enum Backoff {
    /// Fixed delay before every retry
    Linear(Duration),
    /// base, 2*base, 4*base, ...
    Exponential { base: Duration },
}

impl Backoff {
    /// Delay before the given attempt (1-based); the first attempt has none
    pub fn delay_before(&self, attempt: u32) -> Option<Duration> {
        if attempt <= 1 {
            return None;
        }
        Some(match self {
            Backoff::Linear(delay) => *delay,
            Backoff::Exponential { base } => {
                // Exponent clamp keeps the shift from overflowing
                let exp = (attempt - 2).min(16);
                *base * 2u32.pow(exp)
            }
        })
    }
}

/// Bounded retry budget for one stage
#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
    /// Total attempts, including the first
    pub max_attempts: u32,
    pub backoff: Backoff,
}

impl RetryPolicy {
    pub fn delay_before(&self, attempt: u32) -> Option<Duration> {
        self.backoff.delay_before(attempt)
    }
}

/// Stage policies with the deployed defaults
#[derive(Debug, Clone, Copy)]
pub struct StagePolicies {
    pub capture: RetryPolicy,
    pub verify: RetryPolicy,
    pub alert: RetryPolicy,
}

impl Default for StagePolicies {
    fn default() -> Self {
        Self {
            capture: RetryPolicy {
                max_attempts: 2,
                backoff: Backoff::Linear(Duration::from_millis(500)),
            },
            verify: RetryPolicy {
                max_attempts: 2,
                backoff: Backoff::Exponential {
                    base: Duration::from_secs(1),
                },
            },
            // Alert is best-effort: one retry, then the run completes anyway
            alert: RetryPolicy {
                max_attempts: 2,
                backoff: Backoff::Linear(Duration::from_millis(500)),
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_first_attempt_has_no_delay() {
        let policy = StagePolicies::default().capture;
        assert!(policy.delay_before(1).is_none());
    }

    #[test]
    fn test_linear_backoff_is_flat() {
        let backoff = Backoff::Linear(Duration::from_millis(500));
        assert_eq!(backoff.delay_before(2), Some(Duration::from_millis(500)));
        assert_eq!(backoff.delay_before(3), Some(Duration::from_millis(500)));
    }

    #[test]
    fn test_exponential_backoff_doubles() {
        let backoff = Backoff::Exponential {
            base: Duration::from_secs(1),
        };
        assert_eq!(backoff.delay_before(2), Some(Duration::from_secs(1)));
        assert_eq!(backoff.delay_before(3), Some(Duration::from_secs(2)));
        assert_eq!(backoff.delay_before(4), Some(Duration::from_secs(4)));
    }

    #[test]
    fn test_exponential_backoff_exponent_clamped() {
        let backoff = Backoff::Exponential {
            base: Duration::from_millis(1),
        };
        // Far past any real attempt budget; must not overflow
        assert!(backoff.delay_before(60).is_some());
    }

    #[test]
    fn test_default_budgets() {
        let policies = StagePolicies::default();
        assert_eq!(policies.capture.max_attempts, 2);
        assert_eq!(policies.verify.max_attempts, 2);
        assert_eq!(policies.alert.max_attempts, 2);
    }
}
