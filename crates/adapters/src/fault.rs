//! Fault injection shared by the in-memory adapters.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;

use crate::error::{AdapterError, Result};

#[derive(Debug, Default)]
struct FaultState {
    always: HashMap<String, bool>,
    remaining: HashMap<String, u32>,
    latency: HashMap<String, Duration>,
    calls: HashMap<String, u32>,
    unavailable: bool,
}

/// Per-operation failure and latency switches.
///
/// Cloning shares the underlying state, so a test can keep a handle while
/// the adapter is owned by the system under test.
#[derive(Debug, Clone, Default)]
pub struct FaultInjector {
    state: Arc<Mutex<FaultState>>,
}

impl FaultInjector {
    pub fn new() -> Self {
        Self::default()
    }

    /// Makes every call to `op` fail with a transport error until cleared.
    pub fn fail_always(&self, op: &str) {
        self.state.lock().always.insert(op.to_string(), true);
    }

    /// Makes the next `times` calls to `op` fail with a transport error.
    pub fn fail_times(&self, op: &str, times: u32) {
        self.state.lock().remaining.insert(op.to_string(), times);
    }

    /// Delays every call to `op` by `latency` before it runs.
    pub fn set_latency(&self, op: &str, latency: Duration) {
        self.state.lock().latency.insert(op.to_string(), latency);
    }

    /// Marks the whole system unreachable; every operation fails.
    pub fn set_unavailable(&self, unavailable: bool) {
        self.state.lock().unavailable = unavailable;
    }

    /// Removes all faults for `op`.
    pub fn clear(&self, op: &str) {
        let mut state = self.state.lock();
        state.always.remove(op);
        state.remaining.remove(op);
        state.latency.remove(op);
    }

    /// Returns how many times `op` has been invoked.
    pub fn calls(&self, op: &str) -> u32 {
        self.state.lock().calls.get(op).copied().unwrap_or(0)
    }

    /// Records a call to `op`, applies its latency, and returns the injected
    /// failure if one is configured.
    pub async fn check(&self, op: &str) -> Result<()> {
        let (latency, fail) = {
            let mut state = self.state.lock();
            *state.calls.entry(op.to_string()).or_insert(0) += 1;

            let mut fail = state.unavailable || state.always.get(op).copied().unwrap_or(false);
            if let Some(left) = state.remaining.get_mut(op)
                && *left > 0
            {
                *left -= 1;
                fail = true;
            }
            (state.latency.get(op).copied(), fail)
        };

        if let Some(latency) = latency {
            tokio::time::sleep(latency).await;
        }

        if fail {
            return Err(AdapterError::transport(format!("{op}: injected failure")));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_fail_times_then_recovers() {
        let faults = FaultInjector::new();
        faults.fail_times("op", 2);

        assert!(faults.check("op").await.is_err());
        assert!(faults.check("op").await.is_err());
        assert!(faults.check("op").await.is_ok());
        assert_eq!(faults.calls("op"), 3);
    }

    #[tokio::test]
    async fn test_unavailable_fails_every_operation() {
        let faults = FaultInjector::new();
        faults.set_unavailable(true);
        assert!(faults.check("a").await.is_err());
        assert!(faults.check("b").await.is_err());

        faults.set_unavailable(false);
        assert!(faults.check("a").await.is_ok());
    }

    #[tokio::test]
    async fn test_clear_removes_faults() {
        let faults = FaultInjector::new();
        faults.fail_always("op");
        assert!(faults.check("op").await.is_err());
        faults.clear("op");
        assert!(faults.check("op").await.is_ok());
    }
}
