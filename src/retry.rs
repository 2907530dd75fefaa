//! # Retry/Backoff Policy
//!
//! Outcome classification for HTTP responses and the exponential backoff
//! schedule used between attempts of one batch.
//!
//! | Response | Outcome |
//! |----------|---------|
//! | 2xx | `Success` |
//! | 401, 403 | `TerminalFailure` (auth) |
//! | 400, 422 | `TerminalFailure` (malformed request) |
//! | 408, 429, 5xx | `RetryableFailure` |
//! | transport error | `RetryableFailure` |
//! | anything else | `DeferredFailure` (no retry this cycle, batch requeued) |

use rand::Rng;
use std::time::Duration;

use crate::config::DeliveryConfig;
use crate::error::DeliveryError;

/// Result of one delivery attempt
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outcome {
    Success,
    RetryableFailure(DeliveryError),
    /// Keep the batch for the next cycle without retrying now
    DeferredFailure(DeliveryError),
    TerminalFailure(DeliveryError),
}

impl Outcome {
    pub fn is_success(&self) -> bool {
        matches!(self, Outcome::Success)
    }
}

/// Map an HTTP status code (and the response body, for logging) to an [`Outcome`]
pub fn classify_status(status: u16, body: &str) -> Outcome {
    match status {
        200..=299 => Outcome::Success,
        401 | 403 => Outcome::TerminalFailure(DeliveryError::Auth { status }),
        400 | 422 => Outcome::TerminalFailure(DeliveryError::Client {
            status,
            body: body.to_string(),
        }),
        408 | 429 | 500..=599 => Outcome::RetryableFailure(DeliveryError::Server { status }),
        _ => Outcome::DeferredFailure(DeliveryError::UnexpectedStatus { status }),
    }
}

/// Backoff schedule for attempts within one flush cycle.
///
/// `delay(attempt) = min(max_delay, base_delay * 2^attempt) + jitter`, with a
/// floor of `rate_limit_floor` after a 429.
#[derive(Debug, Clone, PartialEq)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub base_delay: Duration,
    pub max_delay: Duration,
    pub rate_limit_floor: Duration,
    pub max_jitter: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::from_config(&DeliveryConfig::default())
    }
}

impl RetryPolicy {
    pub fn from_config(config: &DeliveryConfig) -> Self {
        Self {
            max_attempts: config.max_attempts.max(1),
            base_delay: config.base_delay(),
            max_delay: config.max_delay(),
            rate_limit_floor: config.rate_limit_floor(),
            max_jitter: config.jitter(),
        }
    }

    /// Same schedule with a different attempt budget
    pub fn with_max_attempts(&self, max_attempts: u32) -> Self {
        Self {
            max_attempts: max_attempts.max(1),
            ..self.clone()
        }
    }

    /// Whether another attempt is allowed after `attempt` (0-based) failed
    pub fn should_retry(&self, attempt: u32) -> bool {
        attempt + 1 < self.max_attempts
    }

    /// Deterministic part of the delay after `attempt` (0-based) failed with `error`
    pub fn backoff(&self, attempt: u32, error: &DeliveryError) -> Duration {
        let factor = 2u32.saturating_pow(attempt);
        let exponential = self.base_delay.saturating_mul(factor).min(self.max_delay);

        if error.is_rate_limited() {
            exponential.max(self.rate_limit_floor)
        } else {
            exponential
        }
    }

    /// Full delay including random jitter in `0..=max_jitter`
    pub fn delay_for(&self, attempt: u32, error: &DeliveryError) -> Duration {
        self.backoff(attempt, error) + self.jitter()
    }

    fn jitter(&self) -> Duration {
        let max_ms = self.max_jitter.as_millis() as u64;
        if max_ms == 0 {
            return Duration::ZERO;
        }
        Duration::from_millis(rand::thread_rng().gen_range(0..=max_ms))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn policy() -> RetryPolicy {
        RetryPolicy {
            max_attempts: 3,
            base_delay: Duration::from_secs(5),
            max_delay: Duration::from_secs(120),
            rate_limit_floor: Duration::from_secs(60),
            max_jitter: Duration::ZERO,
        }
    }

    #[test]
    fn test_success_codes() {
        for status in [200, 201, 202, 204, 299] {
            assert_eq!(classify_status(status, ""), Outcome::Success);
        }
    }

    #[test]
    fn test_retryable_codes() {
        for status in [408, 429, 500, 502, 503, 504] {
            assert!(
                matches!(classify_status(status, ""), Outcome::RetryableFailure(DeliveryError::Server { .. })),
                "HTTP {} should be retryable",
                status
            );
        }
    }

    #[test]
    fn test_terminal_codes() {
        assert_eq!(
            classify_status(401, ""),
            Outcome::TerminalFailure(DeliveryError::Auth { status: 401 })
        );
        assert_eq!(
            classify_status(403, ""),
            Outcome::TerminalFailure(DeliveryError::Auth { status: 403 })
        );
        assert_eq!(
            classify_status(400, "missing field"),
            Outcome::TerminalFailure(DeliveryError::Client { status: 400, body: "missing field".into() })
        );
        assert!(matches!(classify_status(422, ""), Outcome::TerminalFailure(_)));
    }

    #[test]
    fn test_other_codes_are_deferred() {
        for status in [301, 404, 409, 418] {
            assert_eq!(
                classify_status(status, ""),
                Outcome::DeferredFailure(DeliveryError::UnexpectedStatus { status })
            );
        }
    }

    #[test]
    fn test_should_retry_respects_max_attempts() {
        let policy = policy();
        assert!(policy.should_retry(0));
        assert!(policy.should_retry(1));
        assert!(!policy.should_retry(2));

        let single = RetryPolicy { max_attempts: 1, ..policy };
        assert!(!single.should_retry(0));
    }

    #[test]
    fn test_with_max_attempts_keeps_schedule() {
        let single = policy().with_max_attempts(1);
        assert!(!single.should_retry(0));
        assert_eq!(single.base_delay, Duration::from_secs(5));

        assert_eq!(policy().with_max_attempts(0).max_attempts, 1);
    }

    #[test]
    fn test_exponential_backoff() {
        let policy = policy();
        let err = DeliveryError::Server { status: 503 };
        assert_eq!(policy.backoff(0, &err), Duration::from_secs(5));
        assert_eq!(policy.backoff(1, &err), Duration::from_secs(10));
        assert_eq!(policy.backoff(2, &err), Duration::from_secs(20));
    }

    #[test]
    fn test_backoff_is_capped() {
        let policy = policy();
        let err = DeliveryError::Transport("timeout".into());
        assert_eq!(policy.backoff(5, &err), Duration::from_secs(120));
        assert_eq!(policy.backoff(40, &err), Duration::from_secs(120));
    }

    #[test]
    fn test_rate_limit_floor() {
        let policy = policy();
        let err = DeliveryError::Server { status: 429 };
        assert_eq!(policy.backoff(0, &err), Duration::from_secs(60));
        assert_eq!(policy.backoff(4, &err), Duration::from_secs(80));
    }

    #[test]
    fn test_jitter_within_bounds() {
        let policy = RetryPolicy { max_jitter: Duration::from_secs(1), ..policy() };
        let err = DeliveryError::Server { status: 500 };
        for _ in 0..100 {
            let delay = policy.delay_for(0, &err);
            assert!(delay >= Duration::from_secs(5));
            assert!(delay <= Duration::from_secs(6));
        }
    }

    #[test]
    fn test_zero_jitter_is_deterministic() {
        let policy = policy();
        let err = DeliveryError::Server { status: 500 };
        assert_eq!(policy.delay_for(1, &err), Duration::from_secs(10));
    }

    #[test]
    fn test_from_default_config() {
        let policy = RetryPolicy::default();
        assert_eq!(policy.max_attempts, 3);
        assert_eq!(policy.base_delay, Duration::from_secs(5));
        assert_eq!(policy.rate_limit_floor, Duration::from_secs(60));
        assert_eq!(policy.max_jitter, Duration::from_secs(1));
    }
}
