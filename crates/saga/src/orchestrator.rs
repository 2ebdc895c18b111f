//! Drives order sagas through their steps.

use std::collections::HashMap;
use std::collections::hash_map::Entry;
use std::sync::Arc;

use chrono::Utc;
use common::{CorrelationId, JobId, OrderId};
use parking_lot::{Mutex as SyncMutex, RwLock};
use queue::{AuditRequest, AuditStatus, JobEvent, JobPayload, PriorityQueueRouter, QueueJob};
use tokio::sync::{Mutex, mpsc};
use tokio::task::JoinHandle;

use crate::compensation::Compensator;
use crate::error::{Result, SagaError};
use crate::instance::SagaInstance;
use crate::order::OrderRequest;
use crate::state::{SagaStatus, StepName, StepStatus};
use crate::store::SagaStore;

type SagaEntry = Arc<Mutex<SagaInstance>>;

/// Owns the order-processing state machine.
///
/// Each saga is guarded by its own async mutex, so one saga's transitions
/// are applied by one task at a time while distinct sagas proceed
/// independently. Every transition is saved to the [`SagaStore`] before
/// the lock is released; readers go to the store and never wait on a saga.
///
/// Step completions arrive as job events from the router. Call
/// [`start`](Self::start) to begin consuming them. Each event is applied in
/// its own task, so a step running inline never holds up other sagas.
pub struct SagaOrchestrator {
    store: Arc<dyn SagaStore>,
    router: PriorityQueueRouter,
    compensator: Arc<dyn Compensator>,
    cache: RwLock<HashMap<OrderId, SagaEntry>>,
    events: SyncMutex<Option<mpsc::UnboundedReceiver<JobEvent>>>,
}

impl SagaOrchestrator {
    pub fn new(
        store: Arc<dyn SagaStore>,
        router: PriorityQueueRouter,
        compensator: Arc<dyn Compensator>,
    ) -> Arc<Self> {
        let events = router.subscribe();
        Arc::new(Self {
            store,
            router,
            compensator,
            cache: RwLock::new(HashMap::new()),
            events: SyncMutex::new(Some(events)),
        })
    }

    pub fn router(&self) -> &PriorityQueueRouter {
        &self.router
    }

    /// Spawns the task that feeds job events into the sagas.
    ///
    /// Returns `None` if it is already running.
    pub fn start(self: &Arc<Self>) -> Option<JoinHandle<()>> {
        let mut events = self.events.lock().take()?;
        let this = Arc::clone(self);
        Some(tokio::spawn(async move {
            while let Some(event) = events.recv().await {
                let this = Arc::clone(&this);
                tokio::spawn(async move { this.handle_event(event).await });
            }
            tracing::debug!("job event stream closed");
        }))
    }

    /// Accepts an order and dispatches its first step.
    pub async fn submit(
        self: &Arc<Self>,
        request: OrderRequest,
        correlation_id: CorrelationId,
    ) -> Result<SagaInstance> {
        self.submit_with_id(OrderId::new(), request, correlation_id)
            .await
    }

    /// Accepts an order under a caller-chosen id.
    #[tracing::instrument(
        skip_all,
        fields(order_id = %order_id, correlation_id = %correlation_id)
    )]
    pub async fn submit_with_id(
        self: &Arc<Self>,
        order_id: OrderId,
        request: OrderRequest,
        correlation_id: CorrelationId,
    ) -> Result<SagaInstance> {
        request.validate()?;

        let entry = Arc::new(Mutex::new(SagaInstance::new(
            order_id,
            correlation_id,
            request,
        )));
        let mut saga = entry.lock().await;
        match self.cache.write().entry(order_id) {
            Entry::Occupied(_) => return Err(SagaError::AlreadyExists(order_id)),
            Entry::Vacant(slot) => {
                slot.insert(Arc::clone(&entry));
            }
        }
        if let Err(e) = self.create(&saga).await {
            self.cache.write().remove(&order_id);
            return Err(e);
        }
        metrics::counter!("saga_started_total").increment(1);

        self.dispatch(&mut saga, StepName::Inventory).await?;
        tracing::info!(items = saga.request().items.len(), "order accepted");
        Ok(saga.clone())
    }

    /// Saves a new saga unless the store already knows its id.
    async fn create(&self, saga: &SagaInstance) -> Result<()> {
        if self.store.load(saga.order_id()).await?.is_some() {
            return Err(SagaError::AlreadyExists(saga.order_id()));
        }
        self.store.save(saga).await
    }

    /// Returns the last saved state of a saga.
    pub async fn get(&self, order_id: OrderId) -> Result<SagaInstance> {
        self.store
            .load(order_id)
            .await?
            .ok_or(SagaError::OrderNotFound(order_id))
    }

    /// Returns up to `limit` sagas, newest first.
    pub async fn list(&self, limit: usize) -> Result<Vec<SagaInstance>> {
        self.store.list(limit).await
    }

    /// Removes a finished saga from listings and from the cache.
    pub async fn archive(&self, order_id: OrderId) -> Result<()> {
        let saga = self.get(order_id).await?;
        if !saga.is_terminal() {
            return Err(SagaError::InvalidStatus {
                order_id,
                status: saga.status(),
            });
        }
        self.store.archive(order_id).await?;
        self.cache.write().remove(&order_id);
        tracing::info!(%order_id, "saga archived");
        Ok(())
    }

    /// Resumes every saga the store reports as active.
    ///
    /// Active steps are dispatched again under a new job. This relies on the
    /// step operations being idempotent per order and step.
    pub async fn recover(self: &Arc<Self>) -> Result<usize> {
        let active = self.store.list_active().await?;
        let count = active.len();

        for saga in active {
            let order_id = saga.order_id();
            let entry = Arc::clone(
                self.cache
                    .write()
                    .entry(order_id)
                    .or_insert_with(|| Arc::new(Mutex::new(saga))),
            );
            let mut saga = entry.lock().await;

            let outcome = match saga.status() {
                SagaStatus::Compensating => {
                    self.spawn_compensation(order_id);
                    Ok(())
                }
                SagaStatus::Received | SagaStatus::Processing => self.resume(&mut saga).await,
                _ => Ok(()),
            };
            if let Err(e) = outcome {
                tracing::error!(%order_id, error = %e, "failed to resume saga");
            }
        }

        tracing::info!(sagas = count, "saga recovery finished");
        Ok(count)
    }

    async fn resume(self: &Arc<Self>, saga: &mut SagaInstance) -> Result<()> {
        let next = match saga.active_step() {
            Some(step) => Some(step.name),
            None => saga
                .steps()
                .iter()
                .find(|s| s.status != StepStatus::Completed)
                .map(|s| s.name),
        };
        match next {
            Some(step) => self.dispatch(saga, step).await,
            None => {
                saga.complete()?;
                self.store.save(saga).await?;
                self.finish(saga).await;
                Ok(())
            }
        }
    }

    /// Records that a worker picked up a step's job.
    #[tracing::instrument(skip_all, fields(order_id = %order_id, step = %step, job_id = %job_id))]
    pub async fn on_step_started(
        self: &Arc<Self>,
        order_id: OrderId,
        step: StepName,
        job_id: JobId,
    ) -> Result<()> {
        let entry = self.entry(order_id).await?;
        let mut saga = entry.lock().await;
        if !is_current(&saga, step, job_id) {
            tracing::debug!("ignoring start of stale job");
            return Ok(());
        }
        saga.mark_processing(step, job_id)?;
        self.store.save(&saga).await
    }

    /// Completes a step and dispatches the next one, or completes the saga.
    #[tracing::instrument(skip_all, fields(order_id = %order_id, step = %step, job_id = %job_id))]
    pub async fn on_step_succeeded(
        self: &Arc<Self>,
        order_id: OrderId,
        step: StepName,
        job_id: JobId,
        output: serde_json::Value,
    ) -> Result<()> {
        let entry = self.entry(order_id).await?;
        let mut saga = entry.lock().await;
        if !is_current(&saga, step, job_id) {
            tracing::debug!("ignoring result of stale job");
            return Ok(());
        }

        saga.complete_step(step, output)?;
        tracing::info!("saga step completed");
        match step.next() {
            Some(next) => self.dispatch(&mut saga, next).await,
            None => {
                saga.complete()?;
                self.store.save(&saga).await?;
                self.finish(&saga).await;
                Ok(())
            }
        }
    }

    /// Fails a step and either fails the saga or starts compensating.
    #[tracing::instrument(skip_all, fields(order_id = %order_id, step = %step, job_id = %job_id))]
    pub async fn on_step_failed(
        self: &Arc<Self>,
        order_id: OrderId,
        step: StepName,
        job_id: JobId,
        error: String,
    ) -> Result<()> {
        let entry = self.entry(order_id).await?;
        let mut saga = entry.lock().await;
        if !is_current(&saga, step, job_id) {
            tracing::debug!("ignoring failure of stale job");
            return Ok(());
        }
        self.fail(&mut saga, step, error).await
    }

    async fn handle_event(self: &Arc<Self>, event: JobEvent) {
        let result = match event {
            JobEvent::Started(job) => match saga_step(&job) {
                Some((order_id, step)) => self.on_step_started(order_id, step, job.id).await,
                None => Ok(()),
            },
            JobEvent::Finished(outcome) => match saga_step(&outcome.job) {
                Some((order_id, step)) => match outcome.result {
                    Ok(output) => {
                        self.on_step_succeeded(order_id, step, outcome.job.id, output)
                            .await
                    }
                    Err(err) => {
                        self.on_step_failed(order_id, step, outcome.job.id, err.to_string())
                            .await
                    }
                },
                None => Ok(()),
            },
        };
        if let Err(e) = result {
            tracing::error!(error = %e, "failed to apply job event to saga");
        }
    }

    /// Returns the cached saga, loading it from the store on a miss.
    async fn entry(&self, order_id: OrderId) -> Result<SagaEntry> {
        let cached = self.cache.read().get(&order_id).cloned();
        if let Some(entry) = cached {
            return Ok(entry);
        }

        let saga = self
            .store
            .load(order_id)
            .await?
            .ok_or(SagaError::OrderNotFound(order_id))?;
        let entry = Arc::clone(
            self.cache
                .write()
                .entry(order_id)
                .or_insert_with(|| Arc::new(Mutex::new(saga))),
        );
        Ok(entry)
    }

    /// Queues the job of `step` and saves the saga.
    async fn dispatch(self: &Arc<Self>, saga: &mut SagaInstance, step: StepName) -> Result<()> {
        let data = saga.request().step_data(saga.order_id(), step)?;
        let job = QueueJob::new(
            JobPayload::new(step.domain(), step.action())
                .with_order(saga.order_id())
                .with_data(data),
            saga.correlation_id().clone(),
        )
        .with_priority(step.priority());
        let job_id = job.id;

        saga.mark_queued(step, job_id)?;
        self.store.save(saga).await?;

        match self.router.enqueue(job).await {
            Ok(_) => {
                tracing::debug!(order_id = %saga.order_id(), %step, %job_id, "saga step queued");
                Ok(())
            }
            Err(e) => {
                tracing::error!(
                    order_id = %saga.order_id(),
                    %step,
                    error = %e,
                    "failed to queue saga step"
                );
                self.fail(saga, step, format!("failed to queue step: {e}"))
                    .await
            }
        }
    }

    async fn fail(
        self: &Arc<Self>,
        saga: &mut SagaInstance,
        step: StepName,
        error: String,
    ) -> Result<()> {
        let compensate = saga.fail_step(step, error.clone())?;
        self.store.save(saga).await?;
        tracing::warn!(
            order_id = %saga.order_id(),
            correlation_id = %saga.correlation_id(),
            %step,
            error = %error,
            compensate,
            "saga step failed"
        );
        self.audit(
            saga,
            format!("{step}_failed"),
            AuditStatus::Error,
            Some(error),
        )
        .await;

        if compensate {
            self.spawn_compensation(saga.order_id());
        } else {
            self.finish(saga).await;
        }
        Ok(())
    }

    fn spawn_compensation(self: &Arc<Self>, order_id: OrderId) {
        let this = Arc::clone(self);
        tokio::spawn(async move {
            if let Err(e) = this.compensate(order_id).await {
                tracing::error!(%order_id, error = %e, "compensation aborted");
            }
        });
    }

    /// Undoes completed steps, latest first, until none remain or one fails.
    #[tracing::instrument(skip(self), fields(order_id = %order_id))]
    async fn compensate(&self, order_id: OrderId) -> Result<()> {
        let entry = self.entry(order_id).await?;
        let mut saga = entry.lock().await;

        while saga.status() == SagaStatus::Compensating {
            let Some(step) = saga.completed_steps_reversed().first().copied() else {
                break;
            };

            match self.compensator.compensate(step, &saga).await {
                Ok(()) => {
                    saga.mark_compensated(step)?;
                    self.store.save(&saga).await?;
                    tracing::info!(%step, "saga step compensated");
                }
                Err(e) => {
                    saga.compensation_exhausted(step, e.to_string());
                    self.store.save(&saga).await?;
                    tracing::error!(
                        %step,
                        correlation_id = %saga.correlation_id(),
                        error = %e,
                        "compensation exhausted, manual intervention required"
                    );
                }
            }
        }

        if saga.is_terminal() {
            self.finish(&saga).await;
        }
        Ok(())
    }

    /// Emits metrics and the audit entry of a terminal saga and evicts it.
    async fn finish(&self, saga: &SagaInstance) {
        let elapsed = (Utc::now() - saga.created_at())
            .to_std()
            .unwrap_or_default();
        metrics::histogram!("saga_duration_seconds", "status" => saga.status().as_str())
            .record(elapsed.as_secs_f64());

        let (counter, audit_status) = match saga.status() {
            SagaStatus::Completed => ("saga_completed_total", AuditStatus::Success),
            SagaStatus::Compensated => ("saga_compensated_total", AuditStatus::Error),
            _ => ("saga_failed_total", AuditStatus::Error),
        };
        metrics::counter!(counter).increment(1);

        let error = saga.needs_intervention().then(|| {
            saga.steps()
                .iter()
                .rev()
                .find_map(|s| s.error.clone())
                .unwrap_or_else(|| "compensation exhausted".to_string())
        });
        self.audit(saga, format!("order_{}", saga.status()), audit_status, error)
            .await;

        self.cache.write().remove(&saga.order_id());
        tracing::info!(
            order_id = %saga.order_id(),
            correlation_id = %saga.correlation_id(),
            status = %saga.status(),
            needs_intervention = saga.needs_intervention(),
            duration_ms = elapsed.as_millis() as u64,
            "saga finished"
        );
    }

    /// Queues an audit entry. Failures are logged and otherwise ignored.
    async fn audit(
        &self,
        saga: &SagaInstance,
        operation: String,
        status: AuditStatus,
        error: Option<String>,
    ) {
        let mut request = AuditRequest::new("saga", operation, status).with_payload(
            serde_json::json!({
                "order_id": saga.order_id(),
                "status": saga.status(),
                "needs_intervention": saga.needs_intervention(),
            }),
        );
        if let Some(error) = error {
            request = request.with_error(error);
        }

        let queued = match request.into_job(saga.correlation_id().clone()) {
            Ok(job) => self.router.enqueue(job).await.map(|_| ()),
            Err(e) => Err(e),
        };
        if let Err(e) = queued {
            tracing::warn!(order_id = %saga.order_id(), error = %e, "failed to queue audit entry");
        }
    }
}

/// True if `job_id` is the job the step is currently waiting on.
fn is_current(saga: &SagaInstance, step: StepName, job_id: JobId) -> bool {
    let entry = saga.step(step);
    entry.job_id == Some(job_id) && entry.status.is_active()
}

fn saga_step(job: &QueueJob) -> Option<(OrderId, StepName)> {
    let step = StepName::from_route(job.domain, job.action())?;
    Some((job.payload.order_id?, step))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::InMemorySagaStore;
    use adapters::AdapterError;
    use async_trait::async_trait;
    use queue::{Domain, HandlerRegistry, InMemoryJobTransport, RouterConfig, handler_fn};

    struct NoopCompensator;

    #[async_trait]
    impl Compensator for NoopCompensator {
        async fn compensate(
            &self,
            _step: StepName,
            _saga: &SagaInstance,
        ) -> std::result::Result<(), AdapterError> {
            Ok(())
        }
    }

    /// Router whose step handlers all succeed; workers are never started so
    /// tests drive the callbacks by hand.
    fn setup() -> (Arc<SagaOrchestrator>, InMemorySagaStore) {
        let mut registry = HandlerRegistry::new();
        for step in StepName::ALL {
            registry
                .register(
                    step.domain(),
                    step.action(),
                    handler_fn(|_job: QueueJob| async { Ok(serde_json::Value::Null) }),
                )
                .unwrap();
        }
        registry
            .register(
                Domain::Audit,
                queue::LOG_OPERATION,
                handler_fn(|_job: QueueJob| async { Ok(serde_json::Value::Null) }),
            )
            .unwrap();
        let router = PriorityQueueRouter::new(
            registry,
            Arc::new(InMemoryJobTransport::new()),
            RouterConfig::default(),
        );
        let store = InMemorySagaStore::new();
        let orchestrator =
            SagaOrchestrator::new(Arc::new(store.clone()), router, Arc::new(NoopCompensator));
        (orchestrator, store)
    }

    fn request() -> OrderRequest {
        serde_json::from_value(serde_json::json!({
            "items": [{ "productId": "P1", "qty": 1 }],
            "customer": { "email": "x@y.com" }
        }))
        .unwrap()
    }

    fn job_of(saga: &SagaInstance, step: StepName) -> JobId {
        saga.step(step).job_id.unwrap()
    }

    #[tokio::test]
    async fn test_submit_queues_first_step() {
        let (orchestrator, store) = setup();
        let saga = orchestrator
            .submit(request(), CorrelationId::from("c-1"))
            .await
            .unwrap();

        assert_eq!(saga.status(), SagaStatus::Processing);
        assert_eq!(saga.step(StepName::Inventory).status, StepStatus::Queued);
        let job = orchestrator
            .router()
            .job(job_of(&saga, StepName::Inventory))
            .unwrap();
        assert_eq!(job.domain, Domain::Inventory);
        assert_eq!(job.action, "reserve_stock");
        assert_eq!(job.order_id, Some(saga.order_id()));
        assert_eq!(store.len(), 1);
    }

    #[tokio::test]
    async fn test_invalid_order_rejected() {
        let (orchestrator, store) = setup();
        let mut request = request();
        request.items.clear();

        let err = orchestrator
            .submit(request, CorrelationId::new())
            .await
            .unwrap_err();
        assert!(matches!(err, SagaError::Validation(_)));
        assert!(store.is_empty());
    }

    #[tokio::test]
    async fn test_duplicate_order_id_rejected() {
        let (orchestrator, _) = setup();
        let order_id = OrderId::new();
        orchestrator
            .submit_with_id(order_id, request(), CorrelationId::new())
            .await
            .unwrap();
        let err = orchestrator
            .submit_with_id(order_id, request(), CorrelationId::new())
            .await
            .unwrap_err();
        assert!(matches!(err, SagaError::AlreadyExists(id) if id == order_id));
    }

    /// Store that yields before every call so concurrent submits interleave.
    struct YieldingStore(InMemorySagaStore);

    #[async_trait]
    impl SagaStore for YieldingStore {
        async fn save(&self, saga: &SagaInstance) -> Result<()> {
            tokio::task::yield_now().await;
            self.0.save(saga).await
        }

        async fn load(&self, order_id: OrderId) -> Result<Option<SagaInstance>> {
            tokio::task::yield_now().await;
            self.0.load(order_id).await
        }

        async fn list_active(&self) -> Result<Vec<SagaInstance>> {
            self.0.list_active().await
        }

        async fn list(&self, limit: usize) -> Result<Vec<SagaInstance>> {
            self.0.list(limit).await
        }

        async fn archive(&self, order_id: OrderId) -> Result<bool> {
            self.0.archive(order_id).await
        }
    }

    #[tokio::test]
    async fn test_concurrent_submits_with_same_id_accept_one() {
        let (plain, _) = setup();
        let store = InMemorySagaStore::new();
        let orchestrator = SagaOrchestrator::new(
            Arc::new(YieldingStore(store.clone())),
            plain.router().clone(),
            Arc::new(NoopCompensator),
        );
        let order_id = OrderId::new();

        let (first, second) = tokio::join!(
            orchestrator.submit_with_id(order_id, request(), CorrelationId::new()),
            orchestrator.submit_with_id(order_id, request(), CorrelationId::new()),
        );

        assert_eq!(
            [first.is_ok(), second.is_ok()]
                .iter()
                .filter(|ok| **ok)
                .count(),
            1
        );
        let err = first.err().or(second.err()).unwrap();
        assert!(matches!(err, SagaError::AlreadyExists(id) if id == order_id));
        assert_eq!(store.len(), 1);
    }

    #[tokio::test]
    async fn test_callbacks_advance_through_every_step() {
        let (orchestrator, _) = setup();
        let saga = orchestrator
            .submit(request(), CorrelationId::new())
            .await
            .unwrap();
        let order_id = saga.order_id();

        for step in StepName::ALL {
            let saga = orchestrator.get(order_id).await.unwrap();
            let job_id = job_of(&saga, step);
            orchestrator
                .on_step_started(order_id, step, job_id)
                .await
                .unwrap();
            assert_eq!(
                orchestrator.get(order_id).await.unwrap().step(step).status,
                StepStatus::Processing
            );
            orchestrator
                .on_step_succeeded(order_id, step, job_id, serde_json::json!({ "ok": step.as_str() }))
                .await
                .unwrap();
        }

        let saga = orchestrator.get(order_id).await.unwrap();
        assert_eq!(saga.status(), SagaStatus::Completed);
        assert_eq!(saga.step(StepName::Crm).output, Some(serde_json::json!({ "ok": "crm" })));
    }

    #[tokio::test]
    async fn test_stale_job_result_ignored() {
        let (orchestrator, _) = setup();
        let saga = orchestrator
            .submit(request(), CorrelationId::new())
            .await
            .unwrap();

        orchestrator
            .on_step_succeeded(saga.order_id(), StepName::Inventory, JobId::new(), serde_json::Value::Null)
            .await
            .unwrap();

        let saga = orchestrator.get(saga.order_id()).await.unwrap();
        assert_eq!(saga.step(StepName::Inventory).status, StepStatus::Queued);
    }

    #[tokio::test]
    async fn test_first_step_failure_fails_without_compensation() {
        let (orchestrator, _) = setup();
        let saga = orchestrator
            .submit(request(), CorrelationId::new())
            .await
            .unwrap();
        let job_id = job_of(&saga, StepName::Inventory);

        orchestrator
            .on_step_failed(saga.order_id(), StepName::Inventory, job_id, "out of stock".to_string())
            .await
            .unwrap();

        let saga = orchestrator.get(saga.order_id()).await.unwrap();
        assert_eq!(saga.status(), SagaStatus::Failed);
        assert!(!saga.needs_intervention());
        assert_eq!(
            saga.step(StepName::Inventory).error.as_deref(),
            Some("out of stock")
        );
    }

    #[tokio::test]
    async fn test_archive_requires_terminal_saga() {
        let (orchestrator, store) = setup();
        let saga = orchestrator
            .submit(request(), CorrelationId::new())
            .await
            .unwrap();
        let order_id = saga.order_id();

        let err = orchestrator.archive(order_id).await.unwrap_err();
        assert!(matches!(err, SagaError::InvalidStatus { status: SagaStatus::Processing, .. }));

        orchestrator
            .on_step_failed(order_id, StepName::Inventory, job_of(&saga, StepName::Inventory), "boom".to_string())
            .await
            .unwrap();
        orchestrator.archive(order_id).await.unwrap();

        assert!(orchestrator.list(10).await.unwrap().is_empty());
        assert!(store.list_active().await.unwrap().is_empty());
        assert!(orchestrator.get(order_id).await.is_ok());
    }

    #[tokio::test]
    async fn test_recover_redispatches_active_step() {
        let (orchestrator, store) = setup();
        let saga = orchestrator
            .submit(request(), CorrelationId::new())
            .await
            .unwrap();
        let first_job = job_of(&saga, StepName::Inventory);

        // A fresh orchestrator over the same store has an empty cache.
        let restarted = SagaOrchestrator::new(
            Arc::new(store.clone()),
            setup().0.router().clone(),
            Arc::new(NoopCompensator),
        );
        assert_eq!(restarted.recover().await.unwrap(), 1);

        let saga = restarted.get(saga.order_id()).await.unwrap();
        let second_job = job_of(&saga, StepName::Inventory);
        assert_ne!(first_job, second_job);
        assert_eq!(saga.step(StepName::Inventory).status, StepStatus::Queued);
        assert!(restarted.router().job(second_job).is_some());
    }
}
