//! Bounded retries for idempotent sub-operations inside a stage.
//!
//! Whole runs are never retried; only single network calls and similar
//! operations that a stage knows to be safe to repeat.

use std::future::Future;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio_util::sync::CancellationToken;
use tracing::warn;

/// Exponential backoff with a capped delay.
///
/// Every field is optional in config files; missing ones take the defaults.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryPolicy {
    /// Attempts in total, the first one included
    pub max_attempts: u32,

    pub initial_delay_ms: u64,

    /// Upper bound for any single backoff sleep
    pub max_delay_ms: u64,

    pub backoff_multiplier: f64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            initial_delay_ms: 500,
            max_delay_ms: 10_000,
            backoff_multiplier: 2.0,
        }
    }
}

impl RetryPolicy {
    /// No retries at all
    pub fn once() -> Self {
        Self {
            max_attempts: 1,
            ..Self::default()
        }
    }

    /// Sleep before the retry that follows failed attempt `attempt` (1-based)
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        let exponent = attempt.saturating_sub(1).min(i32::MAX as u32) as i32;
        let scaled = self.initial_delay_ms as f64 * self.backoff_multiplier.powi(exponent);
        Duration::from_millis(scaled.min(self.max_delay_ms as f64) as u64)
    }

    pub fn should_retry(&self, attempt: u32) -> bool {
        attempt < self.max_attempts
    }
}

#[derive(Debug, Error)]
pub enum RetryError {
    #[error("{operation} failed after {attempts} attempt(s): {source:#}")]
    Exhausted {
        operation: String,
        attempts: u32,
        #[source]
        source: anyhow::Error,
    },

    #[error("{operation} cancelled")]
    Cancelled { operation: String },
}

/// Run `op` until it succeeds, the policy is exhausted, or `cancel` fires.
///
/// Both the attempt in flight and the backoff sleep race `cancel`; the
/// losing attempt is dropped.
pub async fn retry<T, F, Fut>(
    policy: &RetryPolicy,
    cancel: &CancellationToken,
    operation: &str,
    mut op: F,
) -> Result<T, RetryError>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = anyhow::Result<T>>,
{
    let mut attempt = 0u32;

    loop {
        attempt += 1;

        let result = tokio::select! {
            biased;
            _ = cancel.cancelled() => {
                return Err(RetryError::Cancelled { operation: operation.to_string() });
            }
            result = op() => result,
        };

        match result {
            Ok(value) => return Ok(value),
            Err(e) if policy.should_retry(attempt) => {
                let delay = policy.delay_for_attempt(attempt);
                warn!(
                    operation,
                    attempt,
                    delay_ms = delay.as_millis() as u64,
                    error = %e,
                    "Operation failed, retrying"
                );

                tokio::select! {
                    _ = cancel.cancelled() => {
                        return Err(RetryError::Cancelled { operation: operation.to_string() });
                    }
                    _ = tokio::time::sleep(delay) => {}
                }
            }
            Err(e) => {
                return Err(RetryError::Exhausted {
                    operation: operation.to_string(),
                    attempts: attempt,
                    source: e,
                });
            }
        }
    }
}
