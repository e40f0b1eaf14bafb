//! Retry and backoff policy for publish attempts

use rand::Rng;
use std::time::Duration;

use crate::config::RetryConfig;
use crate::error::PublishErrorKind;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetryDecision {
    Retry(Duration),
    GiveUp,
}

/// Exponential backoff with a cap and proportional jitter
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    pub base_delay: Duration,
    pub factor: f64,
    pub max_delay: Duration,
    pub max_attempts: u32,
    pub jitter_ratio: f64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::from_config(&RetryConfig::default())
    }
}

impl RetryPolicy {
    pub fn from_config(config: &RetryConfig) -> Self {
        Self {
            base_delay: Duration::from_millis(config.base_delay_ms),
            factor: config.factor,
            max_delay: Duration::from_millis(config.max_delay_ms),
            max_attempts: config.max_attempts,
            jitter_ratio: config.jitter_ratio,
        }
    }

    /// Decide what to do after `attempt` (1-based) failed with `kind`
    pub fn next_delay(&self, attempt: u32, kind: &PublishErrorKind) -> RetryDecision {
        if !kind.is_retryable() || attempt >= self.max_attempts {
            return RetryDecision::GiveUp;
        }

        let sample = if self.jitter_ratio > 0.0 {
            rand::thread_rng().gen_range(-self.jitter_ratio..=self.jitter_ratio)
        } else {
            0.0
        };
        let mut delay = self.jittered(self.backoff(attempt), sample);

        if let PublishErrorKind::RateLimited {
            retry_after: Some(suggested),
        } = kind
        {
            if *suggested > delay {
                delay = *suggested;
            }
        }

        RetryDecision::Retry(delay)
    }

    /// Un-jittered delay after `attempt`: `base * factor^(attempt-1)`, capped
    pub fn backoff(&self, attempt: u32) -> Duration {
        let exponent = attempt.saturating_sub(1) as i32;
        let millis = self.base_delay.as_millis() as f64 * self.factor.powi(exponent);
        let capped = millis.min(self.max_delay.as_millis() as f64);
        Duration::from_millis(capped.max(0.0) as u64)
    }

    /// Scale by `1 + sample`, where sample lies in `[-jitter_ratio, jitter_ratio]`
    fn jittered(&self, delay: Duration, sample: f64) -> Duration {
        let sample = sample.clamp(-self.jitter_ratio, self.jitter_ratio);
        let millis = delay.as_millis() as f64 * (1.0 + sample);
        Duration::from_millis(millis.max(0.0) as u64)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn policy() -> RetryPolicy {
        RetryPolicy::default()
    }

    #[test]
    fn test_backoff_grows_exponentially_and_caps() {
        let policy = policy();
        assert_eq!(policy.backoff(1), Duration::from_secs(2));
        assert_eq!(policy.backoff(2), Duration::from_secs(4));
        assert_eq!(policy.backoff(3), Duration::from_secs(8));
        assert_eq!(policy.backoff(10), Duration::from_secs(60));
    }

    #[test]
    fn test_non_retryable_kinds_give_up() {
        let policy = policy();
        assert_eq!(
            policy.next_delay(1, &PublishErrorKind::AuthExpired),
            RetryDecision::GiveUp
        );
        assert_eq!(
            policy.next_delay(1, &PublishErrorKind::PermanentRejected),
            RetryDecision::GiveUp
        );
    }

    #[test]
    fn test_gives_up_at_max_attempts() {
        let policy = policy();
        assert!(matches!(
            policy.next_delay(2, &PublishErrorKind::TransientNetwork),
            RetryDecision::Retry(_)
        ));
        assert_eq!(
            policy.next_delay(3, &PublishErrorKind::TransientNetwork),
            RetryDecision::GiveUp
        );
    }

    #[test]
    fn test_jitter_stays_within_bounds() {
        let policy = policy();
        let max = Duration::from_millis(60_000 * 12 / 10);
        for attempt in 1..3 {
            let base = policy.backoff(attempt).as_millis() as f64;
            for _ in 0..200 {
                match policy.next_delay(attempt, &PublishErrorKind::TransientNetwork) {
                    RetryDecision::Retry(delay) => {
                        let ms = delay.as_millis() as f64;
                        assert!(ms >= base * 0.8 - 1.0 && ms <= base * 1.2 + 1.0);
                        assert!(delay <= max);
                    }
                    RetryDecision::GiveUp => panic!("Expected a retry"),
                }
            }
        }
    }

    #[test]
    fn test_rate_limit_honours_longer_suggestion() {
        let policy = policy();
        let kind = PublishErrorKind::RateLimited {
            retry_after: Some(Duration::from_secs(30)),
        };
        assert_eq!(
            policy.next_delay(1, &kind),
            RetryDecision::Retry(Duration::from_secs(30))
        );

        let short = PublishErrorKind::RateLimited {
            retry_after: Some(Duration::from_millis(1)),
        };
        match policy.next_delay(1, &short) {
            RetryDecision::Retry(delay) => assert!(delay >= Duration::from_millis(1_600)),
            RetryDecision::GiveUp => panic!("Expected a retry"),
        }
    }

    #[test]
    fn test_zero_jitter_is_deterministic() {
        let policy = RetryPolicy {
            jitter_ratio: 0.0,
            ..policy()
        };
        assert_eq!(
            policy.next_delay(2, &PublishErrorKind::TransientNetwork),
            RetryDecision::Retry(Duration::from_secs(4))
        );
    }
}
