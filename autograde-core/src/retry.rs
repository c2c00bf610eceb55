//! Retry classification, backoff computation and the injectable delay.
//!
//! The evaluator owns its retry loop because an unparsable response is
//! retried just like a transient transport fault. This module supplies the
//! pieces: which [`LlmError`]s are transient, how long to wait before retry
//! `n`, and the [`Sleeper`] through which the wait happens.

use crate::config::RetryConfig;
use crate::error::LlmError;
use crate::types::ErrorFlag;
use async_trait::async_trait;
use std::sync::Mutex;
use std::time::Duration;

/// Check if an error is retryable (transient).
pub fn is_retryable(err: &LlmError) -> bool {
    matches!(
        err,
        LlmError::RateLimited { .. }
            | LlmError::ServerError { .. }
            | LlmError::Connection { .. }
            | LlmError::Timeout { .. }
    )
}

/// The flag recorded when `err` is the reason an evaluation gave up.
///
/// Rate limits count as timeouts: the backend never refused the request.
pub fn failure_flag(err: &LlmError) -> ErrorFlag {
    match err {
        LlmError::Timeout { .. } | LlmError::RateLimited { .. } => ErrorFlag::TimeoutError,
        _ => ErrorFlag::ApiError,
    }
}

/// Delay before retry number `retry` (0-based), honouring a server's
/// retry-after hint when the failure was a rate limit.
pub fn compute_backoff(config: &RetryConfig, retry: u32, err: Option<&LlmError>) -> Duration {
    let computed = compute_exponential_backoff(config, retry);
    let ms = match err {
        Some(LlmError::RateLimited { retry_after_secs }) => retry_after_secs
            .saturating_mul(1000)
            .max(computed)
            .min(config.max_backoff_ms.max(computed)),
        _ => computed,
    };
    Duration::from_millis(ms)
}

/// Pure exponential backoff with optional jitter.
pub fn compute_exponential_backoff(config: &RetryConfig, retry: u32) -> u64 {
    let exponent = i32::try_from(retry).unwrap_or(i32::MAX);
    let base = config.initial_backoff_ms as f64 * config.backoff_multiplier.powi(exponent);
    let capped = base.min(config.max_backoff_ms as f64) as u64;
    if config.jitter {
        // Add up to 25% jitter
        let jitter = (capped as f64 * 0.25 * rand_simple()) as u64;
        capped + jitter
    } else {
        capped
    }
}

/// Simple pseudo-random for jitter.
fn rand_simple() -> f64 {
    use std::time::SystemTime;
    let nanos = SystemTime::now()
        .duration_since(SystemTime::UNIX_EPOCH)
        .unwrap_or_default()
        .subsec_nanos();
    (nanos % 1000) as f64 / 1000.0
}

/// Waits between retries. Injected so tests can observe delays without
/// waiting for them.
#[async_trait]
pub trait Sleeper: Send + Sync {
    async fn sleep(&self, duration: Duration);
}

/// Sleeps on the tokio timer.
#[derive(Debug, Clone, Copy, Default)]
pub struct TokioSleeper;

#[async_trait]
impl Sleeper for TokioSleeper {
    async fn sleep(&self, duration: Duration) {
        tokio::time::sleep(duration).await;
    }
}

/// Records requested delays and returns immediately.
#[derive(Debug, Default)]
pub struct RecordingSleeper {
    delays: Mutex<Vec<Duration>>,
}

impl RecordingSleeper {
    pub fn new() -> Self {
        Self::default()
    }

    /// Every delay requested so far, in order.
    pub fn delays(&self) -> Vec<Duration> {
        self.delays
            .lock()
            .map(|d| d.clone())
            .unwrap_or_else(|poisoned| poisoned.into_inner().clone())
    }
}

#[async_trait]
impl Sleeper for RecordingSleeper {
    async fn sleep(&self, duration: Duration) {
        match self.delays.lock() {
            Ok(mut delays) => delays.push(duration),
            Err(poisoned) => poisoned.into_inner().push(duration),
        }
    }
}
