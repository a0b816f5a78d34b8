//! Per-call timeout and bounded retry for plugin calls.
//!
//! Every external call is raced against its own timer and, when it fails
//! with [`OrchestratorError::TransientExternal`] (or times out), retried with
//! exponential backoff and jitter. `max_retries` counts total attempts: a
//! call that fails `max_retries - 1` times and then succeeds returns success.

use std::future::Future;
use std::time::Duration;

use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::error::{OrchestratorError, OrchestratorResult};

pub const DEFAULT_MAX_RETRIES: u32 = 3;
pub const DEFAULT_BASE_DELAY_MS: u64 = 1_000;
pub const DEFAULT_MAX_DELAY_MS: u64 = 60_000;
pub const DEFAULT_JITTER_FACTOR: f64 = 0.2;
pub const DEFAULT_CALL_TIMEOUT_MS: u64 = 30_000;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RetryPolicy {
    pub max_retries: u32,
    pub base_delay_ms: u64,
    pub max_delay_ms: u64,
    pub jitter_factor: f64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: DEFAULT_MAX_RETRIES,
            base_delay_ms: DEFAULT_BASE_DELAY_MS,
            max_delay_ms: DEFAULT_MAX_DELAY_MS,
            jitter_factor: DEFAULT_JITTER_FACTOR,
        }
    }
}

impl RetryPolicy {
    /// Delay before retry number `attempt` (zero-based).
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        Duration::from_millis(backoff_delay_ms(
            attempt,
            self.base_delay_ms,
            self.max_delay_ms,
            self.jitter_factor,
            rand::random::<f64>(),
        ))
    }
}

/// `min(max, base * 2^attempt) * (1 + (random * 2 - 1) * jitter)`.
///
/// `random` is expected in `[0.0, 1.0)`, so a jitter factor of 0.2 spreads
/// the delay by up to 20% either side of the capped exponential value.
#[allow(
    clippy::cast_precision_loss,
    clippy::cast_possible_truncation,
    clippy::cast_sign_loss
)]
pub fn backoff_delay_ms(
    attempt: u32,
    base_delay_ms: u64,
    max_delay_ms: u64,
    jitter_factor: f64,
    random: f64,
) -> u64 {
    let exponential = base_delay_ms.saturating_mul(1u64 << attempt.min(31));
    let capped = exponential.min(max_delay_ms);
    let jitter = 1.0 + (random * 2.0 - 1.0) * jitter_factor.clamp(0.0, 1.0);
    ((capped as f64) * jitter).round().max(0.0) as u64
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CallPolicy {
    pub timeout: Duration,
    pub retry: RetryPolicy,
}

impl Default for CallPolicy {
    fn default() -> Self {
        Self {
            timeout: Duration::from_millis(DEFAULT_CALL_TIMEOUT_MS),
            retry: RetryPolicy::default(),
        }
    }
}

impl CallPolicy {
    /// Same timeout, no retries. Reactions use this so the reaction ledger
    /// owns their retry schedule.
    pub fn single_attempt(&self) -> Self {
        Self {
            timeout: self.timeout,
            retry: RetryPolicy {
                max_retries: 1,
                ..self.retry
            },
        }
    }
}

pub async fn call_with_policy<T, F, Fut>(
    operation: &str,
    policy: &CallPolicy,
    cancel: &CancellationToken,
    mut call: F,
) -> OrchestratorResult<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = OrchestratorResult<T>>,
{
    let max_attempts = policy.retry.max_retries.max(1);
    let mut attempt = 0;
    loop {
        if cancel.is_cancelled() {
            return Err(OrchestratorError::Cancelled(operation.to_owned()));
        }

        let outcome = tokio::select! {
            biased;
            _ = cancel.cancelled() => {
                return Err(OrchestratorError::Cancelled(operation.to_owned()));
            }
            outcome = tokio::time::timeout(policy.timeout, call()) => outcome,
        };

        let error = match outcome {
            Ok(Ok(value)) => return Ok(value),
            Ok(Err(error)) => error,
            Err(_) => OrchestratorError::TransientExternal(format!(
                "{operation} timed out after {}ms",
                policy.timeout.as_millis()
            )),
        };

        attempt += 1;
        if !error.is_transient() || attempt >= max_attempts {
            return Err(error);
        }

        let delay = policy.retry.delay_for_attempt(attempt - 1);
        debug!(
            operation,
            attempt,
            delay_ms = delay.as_millis() as u64,
            error = %error,
            "retrying external call"
        );
        tokio::select! {
            biased;
            _ = cancel.cancelled() => {
                return Err(OrchestratorError::Cancelled(operation.to_owned()));
            }
            _ = tokio::time::sleep(delay) => {}
        }
    }
}
