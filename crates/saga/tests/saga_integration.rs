//! End-to-end saga tests over the in-memory adapters and queue.

use std::sync::Arc;
use std::time::Duration;

use adapters::{
    AdapterError, AdapterExecutor, AdapterFleet, ChannelOrderStatus, ExecutorConfig,
    HealthMonitor, InMemoryBillingAdapter, InMemoryCustomerAdapter, InMemoryInventoryAdapter,
    InMemorySalesChannelAdapter,
};
use async_trait::async_trait;
use common::{CorrelationId, OrderId};
use parking_lot::Mutex;
use queue::{
    AuditEntry, AuditLog, AuditStatus, HandlerRegistry, InMemoryAuditLog, InMemoryJobTransport,
    PriorityQueueRouter, RouterConfig,
};
use saga::{
    AdapterCompensator, Compensator, CustomerInfo, InMemorySagaStore, OrderItem, OrderRequest,
    SagaInstance, SagaOrchestrator, SagaStatus, SagaStore, StepName, StepStatus,
    register_handlers,
};

/// Records the order compensations run in, then delegates to the adapters.
struct RecordingCompensator {
    inner: AdapterCompensator,
    calls: Mutex<Vec<StepName>>,
}

#[async_trait]
impl Compensator for RecordingCompensator {
    async fn compensate(&self, step: StepName, saga: &SagaInstance) -> Result<(), AdapterError> {
        self.calls.lock().push(step);
        self.inner.compensate(step, saga).await
    }
}

struct Harness {
    orchestrator: Arc<SagaOrchestrator>,
    router: PriorityQueueRouter,
    store: InMemorySagaStore,
    inventory: Arc<InMemoryInventoryAdapter>,
    billing: Arc<InMemoryBillingAdapter>,
    customers: Arc<InMemoryCustomerAdapter>,
    channel: Arc<InMemorySalesChannelAdapter>,
    audit: Arc<InMemoryAuditLog>,
    compensations: Option<Arc<RecordingCompensator>>,
}

struct HarnessBuilder {
    transport: InMemoryJobTransport,
    store: InMemorySagaStore,
    record_compensations: bool,
}

impl HarnessBuilder {
    fn new() -> Self {
        Self {
            transport: InMemoryJobTransport::new(),
            store: InMemorySagaStore::new(),
            record_compensations: false,
        }
    }

    fn inline(mut self) -> Self {
        self.transport = InMemoryJobTransport::unavailable();
        self
    }

    fn store(mut self, store: InMemorySagaStore) -> Self {
        self.store = store;
        self
    }

    fn record_compensations(mut self) -> Self {
        self.record_compensations = true;
        self
    }

    fn build(self) -> Harness {
        let inventory = Arc::new(InMemoryInventoryAdapter::with_demo_products());
        let billing = Arc::new(InMemoryBillingAdapter::new());
        let customers = Arc::new(InMemoryCustomerAdapter::new());
        let channel = Arc::new(InMemorySalesChannelAdapter::new());
        let fleet = Arc::new(
            AdapterFleet::new(
                inventory.clone(),
                billing.clone(),
                customers.clone(),
                channel.clone(),
                Arc::new(AdapterExecutor::new(Arc::new(HealthMonitor::default()))),
            )
            .map_configs(|c: ExecutorConfig| c.with_backoff_base(Duration::from_millis(10))),
        );

        let audit = Arc::new(InMemoryAuditLog::new());
        let mut registry = HandlerRegistry::new();
        register_handlers(
            &mut registry,
            Arc::clone(&fleet),
            Arc::clone(&audit) as Arc<dyn AuditLog>,
        )
        .unwrap();
        let router = PriorityQueueRouter::new(
            registry,
            Arc::new(self.transport),
            RouterConfig {
                max_deliveries: 2,
                redelivery_backoff: Duration::from_millis(100),
            },
        );

        let (compensator, compensations) = if self.record_compensations {
            let recording = Arc::new(RecordingCompensator {
                inner: AdapterCompensator::new(Arc::clone(&fleet)),
                calls: Mutex::new(Vec::new()),
            });
            (recording.clone() as Arc<dyn Compensator>, Some(recording))
        } else {
            let adapters = Arc::new(AdapterCompensator::new(fleet)) as Arc<dyn Compensator>;
            (adapters, None)
        };

        let orchestrator =
            SagaOrchestrator::new(Arc::new(self.store.clone()), router.clone(), compensator);
        orchestrator.start();
        router.start();

        Harness {
            orchestrator,
            router,
            store: self.store,
            inventory,
            billing,
            customers,
            channel,
            audit,
            compensations,
        }
    }
}

impl Harness {
    async fn submit(&self, email: &str) -> OrderId {
        self.orchestrator
            .submit(order(email), CorrelationId::new())
            .await
            .unwrap()
            .order_id()
    }

    async fn wait_terminal(&self, order_id: OrderId) -> SagaInstance {
        for _ in 0..500 {
            let saga = self.orchestrator.get(order_id).await.unwrap();
            if saga.is_terminal() {
                return saga;
            }
            tokio::time::sleep(Duration::from_millis(50)).await;
        }
        panic!("saga {order_id} did not finish");
    }

    /// Waits until an audit entry for `operation` has been written.
    async fn wait_audit(&self, operation: &str) -> AuditEntry {
        for _ in 0..100 {
            let entries = self.audit.recent(usize::MAX).await.unwrap();
            if let Some(entry) = entries.into_iter().find(|e| e.operation == operation) {
                return entry;
            }
            tokio::time::sleep(Duration::from_millis(50)).await;
        }
        panic!("no {operation} audit entry");
    }
}

fn order(email: &str) -> OrderRequest {
    OrderRequest {
        items: vec![
            OrderItem {
                product_id: "PROD-001".to_string(),
                quantity: 3,
                unit_price_cents: 1250,
                description: Some("Widget".to_string()),
            },
            OrderItem {
                product_id: "PROD-002".to_string(),
                quantity: 1,
                unit_price_cents: 4000,
                description: None,
            },
        ],
        customer: CustomerInfo {
            email: email.to_string(),
            first_name: "Ada".to_string(),
            last_name: "Lovelace".to_string(),
        },
        source: None,
    }
}

#[tokio::test(start_paused = true)]
async fn test_happy_path_completes_every_step() {
    let h = HarnessBuilder::new().build();
    let order_id = h.submit("ada@example.com").await;

    let saga = h.wait_terminal(order_id).await;
    assert_eq!(saga.status(), SagaStatus::Completed);
    assert!(!saga.needs_intervention());
    for step in saga.steps() {
        assert_eq!(step.status, StepStatus::Completed, "step {}", step.name);
        assert!(step.completed_at.is_some());
    }

    assert_eq!(h.inventory.stock_of("PROD-001"), Some(12));
    assert_eq!(h.inventory.stock_of("PROD-002"), Some(7));
    assert_eq!(h.billing.open_invoice_count(), 1);
    assert!(h.customers.find_by_email("ada@example.com").is_some());
    assert_eq!(
        h.channel.order_status(order_id),
        Some(ChannelOrderStatus::Confirmed)
    );

    let entry = h.wait_audit("order_completed").await;
    assert_eq!(entry.status, AuditStatus::Success);
    assert_eq!(entry.correlation_id, saga.correlation_id().clone());
}

#[tokio::test(start_paused = true)]
async fn test_invoice_failure_releases_stock() {
    let h = HarnessBuilder::new().build();
    h.billing.faults().fail_always("issue_invoice");

    let order_id = h.submit("ada@example.com").await;
    let saga = h.wait_terminal(order_id).await;

    assert_eq!(saga.status(), SagaStatus::Compensated);
    assert!(!saga.needs_intervention());
    assert_eq!(saga.step(StepName::Inventory).status, StepStatus::Compensated);
    assert_eq!(saga.step(StepName::Invoice).status, StepStatus::Failed);
    assert!(saga.step(StepName::Invoice).error.is_some());
    assert_eq!(saga.step(StepName::Crm).status, StepStatus::Pending);

    assert_eq!(h.inventory.stock_of("PROD-001"), Some(15));
    assert_eq!(h.inventory.stock_of("PROD-002"), Some(8));
    assert_eq!(h.billing.invoice_count(), 0);
    assert_eq!(h.customers.customer_count(), 0);
}

#[tokio::test(start_paused = true)]
async fn test_compensation_runs_latest_step_first() {
    let h = HarnessBuilder::new().record_compensations().build();
    h.customers.faults().fail_always("upsert_customer");

    let order_id = h.submit("ada@example.com").await;
    let saga = h.wait_terminal(order_id).await;

    assert_eq!(saga.status(), SagaStatus::Compensated);
    let calls = h.compensations.as_ref().unwrap().calls.lock().clone();
    assert_eq!(calls, vec![StepName::Invoice, StepName::Inventory]);
    assert_eq!(h.billing.open_invoice_count(), 0);
    assert_eq!(h.inventory.stock_of("PROD-001"), Some(15));
}

#[tokio::test(start_paused = true)]
async fn test_exhausted_compensation_needs_intervention() {
    let h = HarnessBuilder::new().build();
    h.billing.faults().fail_always("issue_invoice");
    h.inventory.faults().fail_always("release_stock");

    let order_id = h.submit("ada@example.com").await;
    let saga = h.wait_terminal(order_id).await;

    assert_eq!(saga.status(), SagaStatus::Failed);
    assert!(saga.needs_intervention());
    assert_eq!(saga.step(StepName::Inventory).status, StepStatus::Completed);
    assert!(saga.step(StepName::Inventory).error.is_some());
    assert_eq!(h.inventory.stock_of("PROD-001"), Some(12));

    let entry = h.wait_audit("order_failed").await;
    assert_eq!(entry.status, AuditStatus::Error);
    assert!(entry.error_message.is_some());
}

#[tokio::test(start_paused = true)]
async fn test_out_of_stock_fails_without_compensation() {
    let h = HarnessBuilder::new().record_compensations().build();
    let mut request = order("ada@example.com");
    request.items[0].quantity = 100;

    let order_id = h
        .orchestrator
        .submit(request, CorrelationId::new())
        .await
        .unwrap()
        .order_id();
    let saga = h.wait_terminal(order_id).await;

    assert_eq!(saga.status(), SagaStatus::Failed);
    assert!(!saga.needs_intervention());
    assert!(h.compensations.as_ref().unwrap().calls.lock().is_empty());
    assert_eq!(h.inventory.stock_of("PROD-002"), Some(8));
}

#[tokio::test(start_paused = true)]
async fn test_orders_for_same_customer_share_one_record() {
    let h = HarnessBuilder::new().build();
    let first = h.submit("ada@example.com").await;
    let second = h.submit("ada@example.com").await;

    assert_eq!(h.wait_terminal(first).await.status(), SagaStatus::Completed);
    assert_eq!(h.wait_terminal(second).await.status(), SagaStatus::Completed);
    assert_eq!(h.customers.customer_count(), 1);
    assert_eq!(h.billing.invoice_count(), 2);
}

#[tokio::test(start_paused = true)]
async fn test_inline_mode_completes_without_transport() {
    let h = HarnessBuilder::new().inline().build();
    let order_id = h.submit("ada@example.com").await;

    let saga = h.wait_terminal(order_id).await;
    assert_eq!(saga.status(), SagaStatus::Completed);

    let job_id = saga.step(StepName::Inventory).job_id.unwrap();
    let record = h.router.job(job_id).unwrap();
    assert!(record.inline);
    assert_eq!(record.attempts, 1);
}

#[tokio::test(start_paused = true)]
async fn test_inline_slow_step_does_not_stall_other_sagas() {
    let h = HarnessBuilder::new().inline().build();
    h.billing
        .faults()
        .set_latency("issue_invoice", Duration::from_secs(5));

    let slow = h.submit("ada@example.com").await;
    tokio::time::sleep(Duration::from_millis(100)).await;
    let saga = h.orchestrator.get(slow).await.unwrap();
    assert!(saga.step(StepName::Invoice).status.is_active());

    let other = h.submit("grace@example.com").await;
    tokio::time::sleep(Duration::from_millis(100)).await;

    let saga = h.orchestrator.get(other).await.unwrap();
    assert_eq!(
        saga.step(StepName::Inventory).status,
        StepStatus::Completed
    );
    let saga = h.orchestrator.get(slow).await.unwrap();
    assert_ne!(saga.step(StepName::Invoice).status, StepStatus::Completed);

    assert_eq!(h.wait_terminal(slow).await.status(), SagaStatus::Completed);
    assert_eq!(h.wait_terminal(other).await.status(), SagaStatus::Completed);
}

#[tokio::test(start_paused = true)]
async fn test_recover_resumes_interrupted_saga() {
    let store = InMemorySagaStore::new();

    // Accepted but never delivered: the first router has no workers.
    let order_id = OrderId::new();
    {
        let mut registry = HandlerRegistry::new();
        for step in StepName::ALL {
            registry
                .register(
                    step.domain(),
                    step.action(),
                    queue::handler_fn(|_job: queue::QueueJob| async {
                        Ok(serde_json::Value::Null)
                    }),
                )
                .unwrap();
        }
        let router = PriorityQueueRouter::new(
            registry,
            Arc::new(InMemoryJobTransport::new()),
            RouterConfig::default(),
        );
        let stalled = SagaOrchestrator::new(
            Arc::new(store.clone()),
            router,
            Arc::new(AdapterCompensator::new(Arc::new(AdapterFleet::new(
                Arc::new(InMemoryInventoryAdapter::new()),
                Arc::new(InMemoryBillingAdapter::new()),
                Arc::new(InMemoryCustomerAdapter::new()),
                Arc::new(InMemorySalesChannelAdapter::new()),
                Arc::new(AdapterExecutor::new(Arc::new(HealthMonitor::default()))),
            )))),
        );
        stalled
            .submit_with_id(order_id, order("ada@example.com"), CorrelationId::new())
            .await
            .unwrap();
    }
    assert_eq!(store.list_active().await.unwrap().len(), 1);

    let h = HarnessBuilder::new().store(store).build();
    assert_eq!(h.orchestrator.recover().await.unwrap(), 1);

    let saga = h.wait_terminal(order_id).await;
    assert_eq!(saga.status(), SagaStatus::Completed);
    assert!(h.store.list_active().await.unwrap().is_empty());
}

#[tokio::test(start_paused = true)]
async fn test_archive_hides_finished_saga() {
    let h = HarnessBuilder::new().build();
    let order_id = h.submit("ada@example.com").await;
    h.wait_terminal(order_id).await;

    assert_eq!(h.orchestrator.list(10).await.unwrap().len(), 1);
    h.orchestrator.archive(order_id).await.unwrap();
    assert!(h.orchestrator.list(10).await.unwrap().is_empty());
    assert!(h.orchestrator.get(order_id).await.is_ok());
}
