//! The set of adapters wired into the bus, with fleet-wide probes.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use common::CorrelationId;
use futures_util::future::join_all;
use serde::Serialize;
use tokio::task::JoinHandle;

use crate::adapter::{Adapter, AdapterKind, SystemInfo};
use crate::billing::BillingAdapter;
use crate::channel::SalesChannelAdapter;
use crate::context::CallContext;
use crate::customer::CustomerAdapter;
use crate::executor::{AdapterExecutor, ExecutorConfig};
use crate::health::{HealthMonitor, HealthStatus};
use crate::inventory::InventoryAdapter;

/// Health of one system as reported to operators.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SystemReport {
    pub system: String,
    pub status: HealthStatus,
    pub response_time_ms: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// Fleet-wide health report.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct HealthReport {
    pub overall: HealthStatus,
    pub systems: Vec<SystemReport>,
    pub timestamp: DateTime<Utc>,
    pub total_systems: usize,
    pub healthy_systems: usize,
}

/// System information of one adapter, or the reason it could not be fetched.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SystemInfoReport {
    pub adapter: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub info: Option<SystemInfo>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// Holds one adapter per external system together with the executor and
/// per-adapter call policies.
pub struct AdapterFleet {
    inventory: Arc<dyn InventoryAdapter>,
    billing: Arc<dyn BillingAdapter>,
    customer: Arc<dyn CustomerAdapter>,
    channel: Arc<dyn SalesChannelAdapter>,
    all: Vec<Arc<dyn Adapter>>,
    executor: Arc<AdapterExecutor>,
    configs: HashMap<AdapterKind, ExecutorConfig>,
}

impl AdapterFleet {
    pub fn new<I, B, C, S>(
        inventory: Arc<I>,
        billing: Arc<B>,
        customer: Arc<C>,
        channel: Arc<S>,
        executor: Arc<AdapterExecutor>,
    ) -> Self
    where
        I: InventoryAdapter + 'static,
        B: BillingAdapter + 'static,
        C: CustomerAdapter + 'static,
        S: SalesChannelAdapter + 'static,
    {
        let all: Vec<Arc<dyn Adapter>> = vec![
            inventory.clone() as Arc<dyn Adapter>,
            billing.clone() as Arc<dyn Adapter>,
            customer.clone() as Arc<dyn Adapter>,
            channel.clone() as Arc<dyn Adapter>,
        ];
        for adapter in &all {
            executor.health().register(adapter.name());
        }

        let configs = AdapterKind::ALL
            .into_iter()
            .map(|kind| (kind, ExecutorConfig::for_kind(kind)))
            .collect();

        Self {
            inventory,
            billing,
            customer,
            channel,
            all,
            executor,
            configs,
        }
    }

    /// Overrides the call policy for one adapter kind.
    pub fn with_config(mut self, kind: AdapterKind, config: ExecutorConfig) -> Self {
        self.configs.insert(kind, config);
        self
    }

    /// Applies `f` to the call policy of every adapter kind.
    pub fn map_configs(mut self, f: impl Fn(ExecutorConfig) -> ExecutorConfig) -> Self {
        for config in self.configs.values_mut() {
            *config = f(config.clone());
        }
        self
    }

    pub fn config(&self, kind: AdapterKind) -> ExecutorConfig {
        self.configs
            .get(&kind)
            .cloned()
            .unwrap_or_else(|| ExecutorConfig::for_kind(kind))
    }

    pub fn inventory(&self) -> &Arc<dyn InventoryAdapter> {
        &self.inventory
    }

    pub fn billing(&self) -> &Arc<dyn BillingAdapter> {
        &self.billing
    }

    pub fn customer(&self) -> &Arc<dyn CustomerAdapter> {
        &self.customer
    }

    pub fn channel(&self) -> &Arc<dyn SalesChannelAdapter> {
        &self.channel
    }

    pub fn executor(&self) -> &Arc<AdapterExecutor> {
        &self.executor
    }

    pub fn health(&self) -> &Arc<HealthMonitor> {
        self.executor.health()
    }

    /// Probes every adapter concurrently and reports the resulting health.
    ///
    /// Probes run through the executor with a single attempt, so an open
    /// circuit is reported without touching the system, and a cooled-down
    /// circuit uses the probe as its half-open trial.
    pub async fn health_report(&self, ctx: &CallContext) -> HealthReport {
        let probes = self.all.iter().map(|adapter| {
            let name = adapter.name().to_string();
            let config = self.config(adapter.kind()).with_retry_attempts(1);
            let adapter = adapter.clone();
            let probe_ctx = ctx.clone();
            async move {
                self.executor
                    .execute(&name, "test_connection", ctx, &config, move || {
                        let adapter = adapter.clone();
                        let ctx = probe_ctx.clone();
                        async move { adapter.test_connection(&ctx).await }
                    })
                    .await;
            }
        });
        join_all(probes).await;

        let states = self.health().report();
        let systems: Vec<SystemReport> = self
            .all
            .iter()
            .filter_map(|adapter| {
                let name = adapter.name();
                states.get(name).map(|state| SystemReport {
                    system: name.to_string(),
                    status: state.status,
                    response_time_ms: state.last_response_ms,
                    error: state.last_error.clone(),
                })
            })
            .collect();
        let aggregate = self.health().aggregate();

        tracing::info!(
            correlation_id = %ctx.correlation_id,
            overall = %aggregate.overall,
            healthy = aggregate.healthy_count,
            total = aggregate.total,
            "health check completed"
        );

        HealthReport {
            overall: aggregate.overall,
            total_systems: systems.len(),
            healthy_systems: aggregate.healthy_count,
            systems,
            timestamp: Utc::now(),
        }
    }

    /// Collects system information from every adapter.
    pub async fn system_info(&self, ctx: &CallContext) -> Vec<SystemInfoReport> {
        let calls = self.all.iter().map(|adapter| {
            let name = adapter.name().to_string();
            let config = self.config(adapter.kind());
            let adapter = adapter.clone();
            let info_ctx = ctx.clone();
            async move {
                let result = self
                    .executor
                    .execute(&name, "system_info", ctx, &config, move || {
                        let adapter = adapter.clone();
                        let ctx = info_ctx.clone();
                        async move { adapter.system_info(&ctx).await }
                    })
                    .await
                    .into_result();
                match result {
                    Ok(info) => SystemInfoReport {
                        adapter: name,
                        info: Some(info),
                        error: None,
                    },
                    Err(err) => SystemInfoReport {
                        adapter: name,
                        info: None,
                        error: Some(err.to_string()),
                    },
                }
            }
        });
        join_all(calls).await
    }

    /// Runs [`Self::health_report`] every `interval` until the handle is aborted.
    pub fn spawn_probe_loop(self: Arc<Self>, interval: Duration) -> JoinHandle<()> {
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            loop {
                ticker.tick().await;
                let ctx = CallContext::new(CorrelationId::new());
                self.health_report(&ctx).await;
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::billing::InMemoryBillingAdapter;
    use crate::channel::InMemorySalesChannelAdapter;
    use crate::customer::InMemoryCustomerAdapter;
    use crate::health::HealthConfig;
    use crate::inventory::InMemoryInventoryAdapter;

    struct Fixture {
        fleet: AdapterFleet,
        billing: Arc<InMemoryBillingAdapter>,
    }

    fn fixture(threshold: u32) -> Fixture {
        let health = Arc::new(HealthMonitor::new(HealthConfig {
            failure_threshold: threshold,
            ..HealthConfig::default()
        }));
        let billing = Arc::new(InMemoryBillingAdapter::new());
        let fleet = AdapterFleet::new(
            Arc::new(InMemoryInventoryAdapter::with_demo_products()),
            billing.clone(),
            Arc::new(InMemoryCustomerAdapter::new()),
            Arc::new(InMemorySalesChannelAdapter::new()),
            Arc::new(AdapterExecutor::new(health)),
        );
        Fixture { fleet, billing }
    }

    fn ctx() -> CallContext {
        CallContext::new(CorrelationId::new())
    }

    #[tokio::test]
    async fn test_all_healthy() {
        let f = fixture(5);
        let report = f.fleet.health_report(&ctx()).await;

        assert_eq!(report.overall, HealthStatus::Healthy);
        assert_eq!(report.total_systems, 4);
        assert_eq!(report.healthy_systems, 4);
        let names: Vec<_> = report.systems.iter().map(|s| s.system.as_str()).collect();
        assert_eq!(names, vec!["inventory", "billing", "customer", "channel"]);
        assert!(report.systems.iter().all(|s| s.response_time_ms.is_some()));
    }

    #[tokio::test]
    async fn test_failing_probe_degrades_fleet() {
        let f = fixture(5);
        f.billing.faults().fail_always("test_connection");

        let report = f.fleet.health_report(&ctx()).await;
        assert_eq!(report.overall, HealthStatus::Degraded);
        assert_eq!(report.healthy_systems, 3);

        let billing = report
            .systems
            .iter()
            .find(|s| s.system == "billing")
            .unwrap();
        assert_eq!(billing.status, HealthStatus::Degraded);
        assert!(billing.error.as_deref().unwrap().contains("injected failure"));
    }

    #[tokio::test]
    async fn test_repeated_probe_failures_open_circuit() {
        let f = fixture(2);
        f.billing.faults().fail_always("test_connection");

        f.fleet.health_report(&ctx()).await;
        let report = f.fleet.health_report(&ctx()).await;
        let billing = report
            .systems
            .iter()
            .find(|s| s.system == "billing")
            .unwrap();
        assert_eq!(billing.status, HealthStatus::Unhealthy);

        f.fleet.health_report(&ctx()).await;
        assert_eq!(f.billing.faults().calls("test_connection"), 2);
    }

    #[tokio::test]
    async fn test_system_info() {
        let f = fixture(5);
        f.billing.faults().fail_always("system_info");
        let fleet = f
            .fleet
            .with_config(AdapterKind::Billing, ExecutorConfig::default().with_retry_attempts(1));

        let infos = fleet.system_info(&ctx()).await;
        assert_eq!(infos.len(), 4);
        assert_eq!(infos[0].adapter, "inventory");
        assert_eq!(infos[0].info.as_ref().unwrap().system, "WMS v3.2.1");
        assert!(infos[1].info.is_none());
        assert!(infos[1].error.is_some());
    }
}
