//! Per-adapter health tracking and circuit breaking.
//!
//! Circuit transitions:
//! ```text
//! Closed ──(N consecutive failures)──► Open ──(cool-down elapsed)──► HalfOpen
//!   ▲                                   ▲                              │
//!   └──────────(probe succeeds)─────────┼──────────────────────────────┤
//!                                       └───────(probe fails)──────────┘
//! ```

use std::collections::BTreeMap;
use std::time::Duration;

use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use tokio::time::Instant;

use crate::error::{AdapterError, ErrorKind, Result};

#[derive(Debug, Clone)]
pub struct HealthConfig {
    /// Consecutive failed samples that open the circuit.
    pub failure_threshold: u32,
    /// How long an open circuit waits before letting one probe through.
    pub cooldown: Duration,
    /// Successful samples slower than this mark the adapter degraded.
    pub degraded_latency: Duration,
}

impl Default for HealthConfig {
    fn default() -> Self {
        Self {
            failure_threshold: 5,
            cooldown: Duration::from_secs(30),
            degraded_latency: Duration::from_secs(2),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum HealthStatus {
    Healthy,
    Degraded,
    Unhealthy,
}

impl HealthStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            HealthStatus::Healthy => "healthy",
            HealthStatus::Degraded => "degraded",
            HealthStatus::Unhealthy => "unhealthy",
        }
    }
}

impl std::fmt::Display for HealthStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum CircuitState {
    Closed,
    Open,
    HalfOpen,
}

impl std::fmt::Display for CircuitState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            CircuitState::Closed => write!(f, "closed"),
            CircuitState::Open => write!(f, "open"),
            CircuitState::HalfOpen => write!(f, "half-open"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SampleOutcome {
    Ok,
    Error,
    Timeout,
}

/// Outcome of one attempt against an adapter.
#[derive(Debug, Clone)]
pub struct Sample {
    pub outcome: SampleOutcome,
    pub elapsed: Duration,
    pub error: Option<String>,
}

impl Sample {
    pub fn ok(elapsed: Duration) -> Self {
        Self {
            outcome: SampleOutcome::Ok,
            elapsed,
            error: None,
        }
    }

    /// Builds a sample from a failed attempt.
    ///
    /// Business rejections (`NotFound`, `ValidationError`) prove the system
    /// answered, so they count as available.
    pub fn from_error(err: &AdapterError, elapsed: Duration) -> Self {
        let outcome = match err.kind {
            ErrorKind::Timeout => SampleOutcome::Timeout,
            ErrorKind::NotFound | ErrorKind::ValidationError => SampleOutcome::Ok,
            _ => SampleOutcome::Error,
        };
        Self {
            outcome,
            elapsed,
            error: Some(err.to_string()),
        }
    }

    fn is_failure(&self) -> bool {
        self.outcome != SampleOutcome::Ok
    }
}

/// Point-in-time health of one adapter.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SystemHealthState {
    pub status: HealthStatus,
    pub consecutive_failures: u32,
    pub last_checked_at: Option<DateTime<Utc>>,
    pub circuit_state: CircuitState,
    pub last_response_ms: Option<u64>,
    pub last_error: Option<String>,
}

/// Fleet-wide health summary.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AggregateHealth {
    pub overall: HealthStatus,
    pub healthy_count: usize,
    pub total: usize,
}

/// Granted by [`HealthMonitor::try_acquire`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Permit {
    /// The circuit is closed.
    Call,
    /// The single half-open trial call. Its holder must record a sample
    /// or call [`HealthMonitor::abandon_trial`].
    Trial,
}

#[derive(Debug)]
struct Entry {
    consecutive_failures: u32,
    last_checked_at: Option<DateTime<Utc>>,
    circuit: CircuitState,
    opened_at: Option<Instant>,
    probe_in_flight: bool,
    slow: bool,
    last_response_ms: Option<u64>,
    last_error: Option<String>,
}

impl Entry {
    fn new() -> Self {
        Self {
            consecutive_failures: 0,
            last_checked_at: None,
            circuit: CircuitState::Closed,
            opened_at: None,
            probe_in_flight: false,
            slow: false,
            last_response_ms: None,
            last_error: None,
        }
    }

    fn status(&self) -> HealthStatus {
        match self.circuit {
            CircuitState::Open => HealthStatus::Unhealthy,
            CircuitState::HalfOpen => HealthStatus::Degraded,
            CircuitState::Closed if self.consecutive_failures > 0 || self.slow => {
                HealthStatus::Degraded
            }
            CircuitState::Closed => HealthStatus::Healthy,
        }
    }

    fn snapshot(&self) -> SystemHealthState {
        SystemHealthState {
            status: self.status(),
            consecutive_failures: self.consecutive_failures,
            last_checked_at: self.last_checked_at,
            circuit_state: self.circuit,
            last_response_ms: self.last_response_ms,
            last_error: self.last_error.clone(),
        }
    }

    fn open(&mut self, now: Instant) {
        self.circuit = CircuitState::Open;
        self.opened_at = Some(now);
        self.probe_in_flight = false;
    }
}

/// Aggregates per-adapter samples into health states and guards calls with
/// a circuit breaker.
///
/// The monitor is the only writer of health state. Writers hold the lock
/// only for the duration of a counter update, and readers copy out a
/// snapshot.
#[derive(Debug, Default)]
pub struct HealthMonitor {
    config: HealthConfig,
    systems: RwLock<BTreeMap<String, Entry>>,
}

impl HealthMonitor {
    pub fn new(config: HealthConfig) -> Self {
        Self {
            config,
            systems: RwLock::new(BTreeMap::new()),
        }
    }

    pub fn config(&self) -> &HealthConfig {
        &self.config
    }

    /// Starts tracking an adapter so it appears in reports before its first call.
    pub fn register(&self, adapter: &str) {
        self.systems
            .write()
            .entry(adapter.to_string())
            .or_insert_with(Entry::new);
    }

    /// Asks permission to call the adapter.
    ///
    /// Fails with `CircuitOpen` while the circuit is open, or while a
    /// half-open probe is already in flight. Once the cool-down has
    /// elapsed, the first caller is let through as the probe.
    pub fn try_acquire(&self, adapter: &str) -> Result<Permit> {
        let mut systems = self.systems.write();
        let entry = systems
            .entry(adapter.to_string())
            .or_insert_with(Entry::new);

        match entry.circuit {
            CircuitState::Closed => Ok(Permit::Call),
            CircuitState::Open => {
                let cooled = entry
                    .opened_at
                    .is_none_or(|at| at.elapsed() >= self.config.cooldown);
                if cooled {
                    entry.circuit = CircuitState::HalfOpen;
                    entry.probe_in_flight = true;
                    tracing::info!(adapter, "circuit half-open, allowing probe");
                    Ok(Permit::Trial)
                } else {
                    Err(AdapterError::circuit_open(adapter))
                }
            }
            CircuitState::HalfOpen => {
                if entry.probe_in_flight {
                    Err(AdapterError::circuit_open(adapter))
                } else {
                    entry.probe_in_flight = true;
                    Ok(Permit::Trial)
                }
            }
        }
    }

    /// Gives back a trial permit whose attempt ended without a sample.
    ///
    /// The circuit re-opens with a fresh cool-down.
    pub fn abandon_trial(&self, adapter: &str) {
        let mut systems = self.systems.write();
        let Some(entry) = systems.get_mut(adapter) else {
            return;
        };
        if entry.circuit == CircuitState::HalfOpen && entry.probe_in_flight {
            entry.open(Instant::now());
            tracing::warn!(adapter, "half-open call abandoned, circuit re-opened");
        }
    }

    /// Folds one attempt's outcome into the adapter's state.
    pub fn record_sample(&self, adapter: &str, sample: Sample) {
        let now = Instant::now();
        let mut systems = self.systems.write();
        let entry = systems
            .entry(adapter.to_string())
            .or_insert_with(Entry::new);

        entry.last_checked_at = Some(Utc::now());
        entry.last_response_ms = Some(sample.elapsed.as_millis() as u64);

        if sample.is_failure() {
            entry.consecutive_failures += 1;
            entry.last_error = sample.error;
            match entry.circuit {
                CircuitState::Closed
                    if entry.consecutive_failures >= self.config.failure_threshold =>
                {
                    entry.open(now);
                    metrics::counter!("adapter_circuit_open_total", "adapter" => adapter.to_string())
                        .increment(1);
                    tracing::warn!(
                        adapter,
                        failures = entry.consecutive_failures,
                        "circuit opened"
                    );
                }
                CircuitState::HalfOpen => {
                    entry.open(now);
                    tracing::warn!(adapter, "probe failed, circuit re-opened");
                }
                _ => {}
            }
        } else {
            entry.slow = sample.elapsed > self.config.degraded_latency;
            match entry.circuit {
                CircuitState::Open => {
                    // A late result from an abandoned call does not close the circuit.
                }
                CircuitState::HalfOpen => {
                    entry.circuit = CircuitState::Closed;
                    entry.opened_at = None;
                    entry.probe_in_flight = false;
                    entry.consecutive_failures = 0;
                    entry.last_error = None;
                    tracing::info!(adapter, "probe succeeded, circuit closed");
                }
                CircuitState::Closed => {
                    entry.consecutive_failures = 0;
                    entry.last_error = None;
                }
            }
        }
    }

    /// Returns the current state of one adapter.
    pub fn state(&self, adapter: &str) -> Option<SystemHealthState> {
        self.systems.read().get(adapter).map(Entry::snapshot)
    }

    /// Returns a snapshot of every tracked adapter.
    pub fn report(&self) -> BTreeMap<String, SystemHealthState> {
        self.systems
            .read()
            .iter()
            .map(|(name, entry)| (name.clone(), entry.snapshot()))
            .collect()
    }

    /// Summarizes the fleet: unhealthy if no adapter is healthy, degraded if
    /// some are, healthy if all are.
    pub fn aggregate(&self) -> AggregateHealth {
        let systems = self.systems.read();
        let total = systems.len();
        let healthy_count = systems
            .values()
            .filter(|e| e.status() == HealthStatus::Healthy)
            .count();

        let overall = if healthy_count == 0 {
            HealthStatus::Unhealthy
        } else if healthy_count < total {
            HealthStatus::Degraded
        } else {
            HealthStatus::Healthy
        };

        AggregateHealth {
            overall,
            healthy_count,
            total,
        }
    }
}
