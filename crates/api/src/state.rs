//! Shared application state and its wiring.

use std::sync::Arc;

use adapters::{
    AdapterExecutor, AdapterFleet, ExecutorConfig, HealthMonitor, InMemoryBillingAdapter,
    InMemoryCustomerAdapter, InMemoryInventoryAdapter, InMemorySalesChannelAdapter,
};
use queue::{
    AuditLog, HandlerRegistry, InMemoryAuditLog, InMemoryJobTransport, JobTransport,
    PriorityQueueRouter,
};
use saga::{
    AdapterCompensator, InMemorySagaStore, InventorySyncService, SagaOrchestrator, SagaStore,
    register_handlers,
};

use crate::config::Config;

/// Shared application state accessible from all handlers.
pub struct AppState {
    pub fleet: Arc<AdapterFleet>,
    pub router: PriorityQueueRouter,
    pub orchestrator: Arc<SagaOrchestrator>,
    pub inventory_sync: Arc<InventorySyncService>,
    pub audit: Arc<dyn AuditLog>,
}

impl AppState {
    /// Wires the adapters, queue and orchestrator over the given backends.
    pub fn build(
        config: &Config,
        store: Arc<dyn SagaStore>,
        audit: Arc<dyn AuditLog>,
    ) -> queue::Result<Self> {
        let health = Arc::new(HealthMonitor::new(config.health_config()));
        let backoff_base = config.backoff_base;
        let fleet = Arc::new(
            AdapterFleet::new(
                Arc::new(InMemoryInventoryAdapter::with_demo_products()),
                Arc::new(InMemoryBillingAdapter::new()),
                Arc::new(InMemoryCustomerAdapter::new()),
                Arc::new(InMemorySalesChannelAdapter::new()),
                Arc::new(AdapterExecutor::new(health)),
            )
            .map_configs(move |c: ExecutorConfig| c.with_backoff_base(backoff_base)),
        );

        let mut registry = HandlerRegistry::new();
        register_handlers(&mut registry, Arc::clone(&fleet), Arc::clone(&audit))?;

        let transport: Arc<dyn JobTransport> = if config.queue_durable {
            Arc::new(InMemoryJobTransport::new())
        } else {
            Arc::new(InMemoryJobTransport::unavailable())
        };
        let router = PriorityQueueRouter::new(registry, transport, config.router_config());

        let orchestrator = SagaOrchestrator::new(
            store,
            router.clone(),
            Arc::new(AdapterCompensator::new(Arc::clone(&fleet))),
        );
        let inventory_sync = InventorySyncService::new(router.clone());

        Ok(Self {
            fleet,
            router,
            orchestrator,
            inventory_sync,
            audit,
        })
    }

    /// Starts the saga event listener and the queue workers.
    pub fn start(&self) {
        self.orchestrator.start();
        self.router.start();
    }
}

/// Creates application state backed entirely by in-memory stores.
pub fn create_default_state(config: &Config) -> queue::Result<Arc<AppState>> {
    let state = AppState::build(
        config,
        Arc::new(InMemorySagaStore::new()),
        Arc::new(InMemoryAuditLog::new()),
    )?;
    Ok(Arc::new(state))
}
