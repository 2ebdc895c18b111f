//! Resilient execution of adapter calls.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::time::Instant;

use crate::adapter::AdapterKind;
use crate::context::CallContext;
use crate::error::{AdapterError, ErrorKind, Result};
use crate::health::{HealthMonitor, Permit, Sample};

/// Retry and timeout policy for one adapter.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExecutorConfig {
    /// Total attempts, including the first. Zero is treated as one.
    pub retry_attempts: u32,
    /// Budget for a single attempt.
    pub timeout: Duration,
    /// The delay before attempt `n + 1` is `backoff_base * n`.
    pub backoff_base: Duration,
}

impl Default for ExecutorConfig {
    fn default() -> Self {
        Self {
            retry_attempts: 3,
            timeout: Duration::from_secs(10),
            backoff_base: Duration::from_millis(1000),
        }
    }
}

impl ExecutorConfig {
    /// Returns the default policy for an adapter kind.
    pub fn for_kind(kind: AdapterKind) -> Self {
        let (timeout_secs, retry_attempts) = match kind {
            AdapterKind::Inventory => (15, 2),
            AdapterKind::Billing => (10, 3),
            AdapterKind::CustomerManagement => (8, 3),
            AdapterKind::SalesChannel => (12, 3),
        };
        Self {
            retry_attempts,
            timeout: Duration::from_secs(timeout_secs),
            ..Self::default()
        }
    }

    pub fn with_retry_attempts(mut self, retry_attempts: u32) -> Self {
        self.retry_attempts = retry_attempts;
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn with_backoff_base(mut self, backoff_base: Duration) -> Self {
        self.backoff_base = backoff_base;
        self
    }

    fn attempts(&self) -> u32 {
        self.retry_attempts.max(1)
    }
}

/// Uniform outcome of an executed adapter call.
///
/// Exactly one of `value` and `error_kind` is present.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AdapterCallResult<T> {
    success: bool,
    value: Option<T>,
    error_kind: Option<ErrorKind>,
    error_message: Option<String>,
    started_at: DateTime<Utc>,
    elapsed_ms: u64,
    attempts: u32,
}

impl<T> AdapterCallResult<T> {
    fn succeeded(value: T, started_at: DateTime<Utc>, elapsed: Duration, attempts: u32) -> Self {
        Self {
            success: true,
            value: Some(value),
            error_kind: None,
            error_message: None,
            started_at,
            elapsed_ms: elapsed.as_millis() as u64,
            attempts,
        }
    }

    fn failed(
        error: AdapterError,
        started_at: DateTime<Utc>,
        elapsed: Duration,
        attempts: u32,
    ) -> Self {
        Self {
            success: false,
            value: None,
            error_kind: Some(error.kind),
            error_message: Some(error.message),
            started_at,
            elapsed_ms: elapsed.as_millis() as u64,
            attempts,
        }
    }

    pub fn is_success(&self) -> bool {
        self.success
    }

    pub fn value(&self) -> Option<&T> {
        self.value.as_ref()
    }

    pub fn error_kind(&self) -> Option<ErrorKind> {
        self.error_kind
    }

    pub fn error_message(&self) -> Option<&str> {
        self.error_message.as_deref()
    }

    pub fn started_at(&self) -> DateTime<Utc> {
        self.started_at
    }

    /// Milliseconds from the start of the first attempt to the final outcome.
    pub fn elapsed_ms(&self) -> u64 {
        self.elapsed_ms
    }

    /// Attempts actually made. Fast-failed attempts are not counted.
    pub fn attempts(&self) -> u32 {
        self.attempts
    }

    /// Converts into a plain `Result`, keeping the last error.
    pub fn into_result(self) -> Result<T> {
        match (self.value, self.error_kind) {
            (Some(value), _) => Ok(value),
            (None, kind) => Err(AdapterError::new(
                kind.unwrap_or(ErrorKind::TransportError),
                self.error_message.unwrap_or_default(),
            )),
        }
    }
}

/// Wraps adapter calls with a per-attempt timeout, bounded retries with
/// linear backoff, and the circuit breaker held by the [`HealthMonitor`].
#[derive(Debug, Clone)]
pub struct AdapterExecutor {
    health: Arc<HealthMonitor>,
}

impl AdapterExecutor {
    pub fn new(health: Arc<HealthMonitor>) -> Self {
        Self { health }
    }

    pub fn health(&self) -> &Arc<HealthMonitor> {
        &self.health
    }

    /// Runs `operation` against `adapter` under `config`.
    ///
    /// Each attempt is spawned and raced against the timeout. An attempt that
    /// times out is abandoned: it keeps running in the background and its
    /// result is discarded. Transient failures are retried, other kinds end
    /// the call immediately. One health sample is recorded per attempt.
    pub async fn execute<T, F, Fut>(
        &self,
        adapter: &str,
        context: &str,
        ctx: &CallContext,
        config: &ExecutorConfig,
        mut operation: F,
    ) -> AdapterCallResult<T>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T>> + Send + 'static,
        T: Send + 'static,
    {
        let started_at = Utc::now();
        let start = Instant::now();
        let max_attempts = config.attempts();
        let mut attempts = 0;
        let mut last_error = AdapterError::transport(format!("{context}: no attempt made"));

        for attempt in 1..=max_attempts {
            let permit = match self.health.try_acquire(adapter) {
                Ok(permit) => permit,
                Err(err) => {
                    tracing::warn!(
                        correlation_id = %ctx.correlation_id,
                        adapter,
                        context,
                        attempt,
                        "circuit open, failing fast"
                    );
                    last_error = err;
                    break;
                }
            };
            let trial = TrialGuard::new(&self.health, adapter, permit);

            attempts = attempt;
            let attempt_start = Instant::now();
            let outcome = match tokio::time::timeout(config.timeout, tokio::spawn(operation())).await
            {
                Ok(Ok(result)) => result,
                Ok(Err(join_err)) => Err(AdapterError::transport(format!(
                    "{context}: task failed: {join_err}"
                ))),
                Err(_) => Err(AdapterError::timeout(config.timeout)),
            };
            let attempt_elapsed = attempt_start.elapsed();
            trial.disarm();

            match outcome {
                Ok(value) => {
                    self.health
                        .record_sample(adapter, Sample::ok(attempt_elapsed));
                    let elapsed = start.elapsed();
                    record_call(adapter, "success", elapsed);
                    tracing::debug!(
                        correlation_id = %ctx.correlation_id,
                        adapter,
                        context,
                        attempt,
                        elapsed_ms = elapsed.as_millis() as u64,
                        "adapter call succeeded"
                    );
                    return AdapterCallResult::succeeded(value, started_at, elapsed, attempts);
                }
                Err(err) => {
                    self.health
                        .record_sample(adapter, Sample::from_error(&err, attempt_elapsed));
                    tracing::warn!(
                        correlation_id = %ctx.correlation_id,
                        adapter,
                        context,
                        attempt,
                        max_attempts,
                        error = %err,
                        "adapter attempt failed"
                    );

                    let retry = err.is_transient() && attempt < max_attempts;
                    last_error = err;
                    if !retry {
                        break;
                    }
                    tokio::time::sleep(config.backoff_base * attempt).await;
                }
            }
        }

        let elapsed = start.elapsed();
        record_call(adapter, last_error.kind.as_str(), elapsed);
        tracing::error!(
            correlation_id = %ctx.correlation_id,
            adapter,
            context,
            attempts,
            error = %last_error,
            "adapter call failed"
        );
        AdapterCallResult::failed(last_error, started_at, elapsed, attempts)
    }
}

/// Hands back a half-open trial permit if the attempt is cancelled before
/// it records a sample.
struct TrialGuard<'a> {
    health: &'a HealthMonitor,
    adapter: &'a str,
    armed: bool,
}

impl<'a> TrialGuard<'a> {
    fn new(health: &'a HealthMonitor, adapter: &'a str, permit: Permit) -> Self {
        Self {
            health,
            adapter,
            armed: permit == Permit::Trial,
        }
    }

    fn disarm(mut self) {
        self.armed = false;
    }
}

impl Drop for TrialGuard<'_> {
    fn drop(&mut self) {
        if self.armed {
            self.health.abandon_trial(self.adapter);
        }
    }
}

fn record_call(adapter: &str, outcome: &'static str, elapsed: Duration) {
    metrics::counter!(
        "adapter_calls_total",
        "adapter" => adapter.to_string(),
        "outcome" => outcome
    )
    .increment(1);
    metrics::histogram!("adapter_call_duration_seconds", "adapter" => adapter.to_string())
        .record(elapsed.as_secs_f64());
}
