use crate::config::RetrySettings;
use crate::errors::TransportError;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use std::time::Duration;

/// Exponential backoff with jitter for the network-call stage.
///
/// Retries timeouts, 5xx and rate limits; a server-provided retry-after
/// hint overrides the computed delay. Auth and non-429 4xx never retry.
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub base_delay_ms: u64,
    pub max_delay_ms: u64,
    pub seed: Option<u64>,
}

impl RetryPolicy {
    pub fn from_settings(settings: &RetrySettings, seed: Option<u64>) -> Self {
        Self {
            max_attempts: settings.max_attempts.max(1),
            base_delay_ms: settings.base_delay_ms,
            max_delay_ms: settings.max_delay_ms,
            seed,
        }
    }

    pub fn should_retry(&self, err: &TransportError, attempt: u32) -> bool {
        attempt < self.max_attempts && err.is_retryable()
    }

    /// Delay before the given attempt (1-based: attempt 1 already failed).
    pub fn delay_for(&self, attempt: u32, retry_after_ms: Option<u64>) -> Duration {
        if let Some(hint) = retry_after_ms {
            return Duration::from_millis(hint.min(self.max_delay_ms));
        }
        let exp = self
            .base_delay_ms
            .saturating_mul(1u64 << attempt.saturating_sub(1).min(16))
            .min(self.max_delay_ms);
        // +/- 25% jitter, seeded per attempt so replays back off identically.
        let mut rng = match self.seed {
            Some(seed) => StdRng::seed_from_u64(seed.wrapping_add(u64::from(attempt))),
            None => StdRng::from_entropy(),
        };
        let jitter = rng.gen_range(0.75..=1.25);
        Duration::from_millis((exp as f64 * jitter) as u64)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn policy() -> RetryPolicy {
        RetryPolicy {
            max_attempts: 3,
            base_delay_ms: 100,
            max_delay_ms: 1_000,
            seed: Some(7),
        }
    }

    #[test]
    fn retries_transient_errors_until_budget_spent() {
        let p = policy();
        let err = TransportError::Http { status: 503 };
        assert!(p.should_retry(&err, 1));
        assert!(p.should_retry(&err, 2));
        assert!(!p.should_retry(&err, 3));
    }

    #[test]
    fn never_retries_client_errors() {
        let p = policy();
        assert!(!p.should_retry(&TransportError::Http { status: 404 }, 1));
        assert!(!p.should_retry(&TransportError::Auth { status: 401 }, 1));
        assert!(!p.should_retry(&TransportError::MalformedResponse("x".into()), 1));
    }

    #[test]
    fn delay_grows_exponentially_and_caps() {
        let p = policy();
        let d1 = p.delay_for(1, None).as_millis() as u64;
        let d2 = p.delay_for(2, None).as_millis() as u64;
        let d4 = p.delay_for(4, None).as_millis() as u64;
        assert!((75..=125).contains(&d1), "got {d1}");
        assert!((150..=250).contains(&d2), "got {d2}");
        assert!(d4 <= 1_250, "cap with jitter headroom, got {d4}");
    }

    #[test]
    fn retry_after_hint_wins() {
        let p = policy();
        assert_eq!(p.delay_for(1, Some(400)), Duration::from_millis(400));
        // but still bounded by the configured maximum
        assert_eq!(p.delay_for(1, Some(60_000)), Duration::from_millis(1_000));
    }

    #[test]
    fn seeded_jitter_is_deterministic() {
        let p = policy();
        assert_eq!(p.delay_for(2, None), p.delay_for(2, None));
    }
}
