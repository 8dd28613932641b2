//! Bounded retry of stage calls.
//!
//! A stage call is repeated with the identical instruction when it fails with
//! a retryable error (transport trouble or an answer that did not match the
//! schema). Everything else, tampering included, surfaces on the first try.

use std::future::Future;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use prrules_types::{PrRulesError, Result};

/// Wait between two attempts of the same call.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum BackoffPolicy {
    Fixed {
        #[serde(rename = "delay_ms", with = "millis")]
        delay: Duration,
    },
    /// `base * 2^retry`, never more than `max`.
    Exponential {
        #[serde(rename = "base_ms", with = "millis")]
        base: Duration,
        #[serde(rename = "max_ms", with = "millis")]
        max: Duration,
    },
    None,
}

impl Default for BackoffPolicy {
    fn default() -> Self {
        BackoffPolicy::Exponential {
            base: Duration::from_millis(500),
            max: Duration::from_secs(30),
        }
    }
}

impl BackoffPolicy {
    /// Wait before retry number `retry` (0 for the first retry).
    pub fn delay(&self, retry: usize) -> Duration {
        match self {
            BackoffPolicy::None => Duration::ZERO,
            BackoffPolicy::Fixed { delay } => *delay,
            BackoffPolicy::Exponential { base, max } => {
                let factor = 1u32.checked_shl(retry as u32).unwrap_or(u32::MAX);
                base.saturating_mul(factor).min(*max)
            }
        }
    }

    /// The policy delay, stretched to a provider's rate-limit hint.
    fn wait_after(&self, error: &PrRulesError, retry: usize) -> Duration {
        let delay = self.delay(retry);
        match error {
            PrRulesError::RateLimited { retry_after_ms, .. } => {
                delay.max(Duration::from_millis(*retry_after_ms))
            }
            _ => delay,
        }
    }
}

mod millis {
    use std::time::Duration;

    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(d: &Duration, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_u64(d.as_millis() as u64)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Duration, D::Error> {
        u64::deserialize(d).map(Duration::from_millis)
    }
}

/// Run `call` up to `max_retries + 1` times.
///
/// Running out of attempts on retryable errors yields
/// [`PrRulesError::RetriesExhausted`] carrying the last underlying error.
pub async fn execute_with_retry<T, F, Fut>(
    call: F,
    max_retries: usize,
    policy: &BackoffPolicy,
    stage: &str,
) -> Result<T>
where
    F: Fn() -> Fut,
    Fut: Future<Output = Result<T>>,
{
    let mut attempt = 0;
    loop {
        attempt += 1;
        let error = match call().await {
            Ok(value) => return Ok(value),
            Err(e) if !e.is_retryable() => return Err(e),
            Err(e) => e,
        };

        if attempt > max_retries {
            tracing::warn!(stage, attempts = attempt, error = %error, "Retries exhausted");
            return Err(PrRulesError::RetriesExhausted {
                stage: stage.to_string(),
                attempts: attempt,
                last_error: error.to_string(),
            });
        }

        let wait = policy.wait_after(&error, attempt - 1);
        tracing::warn!(
            stage,
            attempt,
            delay_ms = wait.as_millis() as u64,
            backend_unavailable = error.is_backend_unavailable(),
            error = %error,
            "Stage call failed, retrying"
        );
        tokio::time::sleep(wait).await;
    }
}
