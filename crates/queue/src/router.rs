//! Priority-aware job router with one worker per domain.

use std::cmp::Ordering;
use std::collections::{BTreeMap, BinaryHeap, HashMap};
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering as AtomicOrdering};
use std::time::Duration;

use chrono::Utc;
use common::JobId;
use parking_lot::{Mutex, RwLock};
use serde::Serialize;
use tokio::sync::{Notify, mpsc, watch};
use tokio::task::JoinHandle;

use crate::error::{JobError, QueueError, Result};
use crate::job::{Domain, JobEvent, JobOutcome, JobRecord, JobStatus, QueueJob};
use crate::registry::HandlerRegistry;
use crate::transport::JobTransport;

#[derive(Debug, Clone)]
pub struct RouterConfig {
    /// Deliveries per job before it is moved to the failed bucket.
    pub max_deliveries: u32,
    /// Delay before redelivery `n + 1` is `redelivery_backoff * n`.
    pub redelivery_backoff: Duration,
}

impl Default for RouterConfig {
    fn default() -> Self {
        Self {
            max_deliveries: 3,
            redelivery_backoff: Duration::from_secs(2),
        }
    }
}

/// Depth and outcome counters of one domain queue.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct QueueStats {
    pub waiting: usize,
    pub active: usize,
    pub completed: usize,
    pub failed: usize,
}

/// Heap entry: higher priority first, then lower sequence number.
struct Pending {
    priority: u8,
    seq: u64,
    job: QueueJob,
}

impl PartialEq for Pending {
    fn eq(&self, other: &Self) -> bool {
        self.priority == other.priority && self.seq == other.seq
    }
}

impl Eq for Pending {}

impl PartialOrd for Pending {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Pending {
    fn cmp(&self, other: &Self) -> Ordering {
        self.priority
            .cmp(&other.priority)
            .then_with(|| other.seq.cmp(&self.seq))
    }
}

#[derive(Default)]
struct DomainQueue {
    heap: Mutex<BinaryHeap<Pending>>,
    notify: Notify,
    stats: Mutex<QueueStats>,
}

struct Inner {
    config: RouterConfig,
    registry: HandlerRegistry,
    transport: Arc<dyn JobTransport>,
    queues: HashMap<Domain, DomainQueue>,
    records: RwLock<HashMap<JobId, JobRecord>>,
    seq: AtomicU64,
    subscribers: Mutex<Vec<mpsc::UnboundedSender<JobEvent>>>,
    shutdown: watch::Sender<bool>,
}

/// Routes jobs to per-domain queues and drains each with its own worker.
///
/// Within a domain, jobs dequeue by priority (highest first) and then in
/// insertion order. There is no ordering across domains. A job whose
/// handler fails transiently is redelivered up to its delivery bound and
/// then lands in the failed bucket.
///
/// If the transport is unavailable, [`enqueue`](Self::enqueue) runs the job
/// inline and records the outcome before returning its id.
#[derive(Clone)]
pub struct PriorityQueueRouter {
    inner: Arc<Inner>,
    workers: Arc<Mutex<Vec<JoinHandle<()>>>>,
}

impl PriorityQueueRouter {
    pub fn new(
        registry: HandlerRegistry,
        transport: Arc<dyn JobTransport>,
        config: RouterConfig,
    ) -> Self {
        let queues = Domain::ALL
            .into_iter()
            .map(|domain| (domain, DomainQueue::default()))
            .collect();
        let (shutdown, _) = watch::channel(false);

        Self {
            inner: Arc::new(Inner {
                config,
                registry,
                transport,
                queues,
                records: RwLock::new(HashMap::new()),
                seq: AtomicU64::new(0),
                subscribers: Mutex::new(Vec::new()),
                shutdown,
            }),
            workers: Arc::new(Mutex::new(Vec::new())),
        }
    }

    pub fn registry(&self) -> &HandlerRegistry {
        &self.inner.registry
    }

    pub fn config(&self) -> &RouterConfig {
        &self.inner.config
    }

    /// Returns a receiver of job lifecycle events.
    pub fn subscribe(&self) -> mpsc::UnboundedReceiver<JobEvent> {
        let (tx, rx) = mpsc::unbounded_channel();
        self.inner.subscribers.lock().push(tx);
        rx
    }

    /// Spawns one worker per domain. Calling it again is a no-op.
    pub fn start(&self) {
        let mut workers = self.workers.lock();
        if !workers.is_empty() {
            return;
        }
        for domain in Domain::ALL {
            let inner = Arc::clone(&self.inner);
            let shutdown = self.inner.shutdown.subscribe();
            workers.push(tokio::spawn(run_worker(inner, domain, shutdown)));
        }
        tracing::info!(workers = workers.len(), "queue workers started");
    }

    /// Stops accepting jobs and waits for workers to finish their current job.
    pub async fn shutdown(&self) {
        self.inner.shutdown.send_replace(true);
        let workers = std::mem::take(&mut *self.workers.lock());
        for worker in workers {
            if let Err(e) = worker.await {
                tracing::error!(error = %e, "queue worker terminated abnormally");
            }
        }
        tracing::info!("queue workers stopped");
    }

    /// Accepts a job and returns its id.
    #[tracing::instrument(
        skip(self, job),
        fields(
            job_id = %job.id,
            domain = %job.domain,
            action = %job.payload.action,
            priority = job.priority,
            correlation_id = %job.correlation_id,
        )
    )]
    pub async fn enqueue(&self, job: QueueJob) -> Result<JobId> {
        if *self.inner.shutdown.borrow() {
            return Err(QueueError::ShuttingDown);
        }
        if !self.inner.registry.contains(job.domain, job.action()) {
            return Err(QueueError::UnknownHandler {
                domain: job.domain,
                action: job.payload.action.clone(),
            });
        }

        let id = job.id;
        self.inner
            .records
            .write()
            .insert(id, JobRecord::waiting(&job));
        metrics::counter!("queue_jobs_enqueued_total", "domain" => job.domain.as_str())
            .increment(1);

        if self.inner.persist(&job).await {
            self.inner.with_stats(job.domain, |s| s.waiting += 1);
            self.inner.push(job);
            tracing::debug!("job enqueued");
        } else {
            tracing::warn!("transport unavailable, running job inline");
            self.inner.with_stats(job.domain, |s| s.active += 1);
            self.inner.deliver(job, true).await;
        }

        Ok(id)
    }

    /// Returns the current state of a job.
    pub fn job(&self, id: JobId) -> Option<JobRecord> {
        self.inner.records.read().get(&id).cloned()
    }

    /// Returns counters for every domain.
    pub fn stats(&self) -> BTreeMap<Domain, QueueStats> {
        self.inner
            .queues
            .iter()
            .map(|(domain, queue)| (*domain, *queue.stats.lock()))
            .collect()
    }

    #[cfg(test)]
    fn dequeue(&self, domain: Domain) -> Option<QueueJob> {
        self.inner.dequeue(domain)
    }
}

impl Inner {
    fn with_stats(&self, domain: Domain, f: impl FnOnce(&mut QueueStats)) {
        if let Some(queue) = self.queues.get(&domain) {
            f(&mut queue.stats.lock());
        }
    }

    fn update_record(&self, id: JobId, f: impl FnOnce(&mut JobRecord)) {
        if let Some(record) = self.records.write().get_mut(&id) {
            f(record);
            record.updated_at = Utc::now();
        }
    }

    fn publish(&self, event: JobEvent) {
        self.subscribers
            .lock()
            .retain(|tx| tx.send(event.clone()).is_ok());
    }

    fn max_deliveries(&self, job: &QueueJob) -> u32 {
        job.max_deliveries
            .unwrap_or(self.config.max_deliveries)
            .max(1)
    }

    async fn persist(&self, job: &QueueJob) -> bool {
        if !self.transport.is_available().await {
            return false;
        }
        match self.transport.persist(job).await {
            Ok(()) => true,
            Err(e) => {
                tracing::warn!(error = %e, "failed to persist job");
                false
            }
        }
    }

    async fn mark(&self, job: &QueueJob, status: JobStatus, inline: bool) {
        if inline {
            return;
        }
        if let Err(e) = self.transport.mark(job.id, status).await {
            tracing::warn!(job_id = %job.id, error = %e, "failed to update job in transport");
        }
    }

    fn push(&self, job: QueueJob) {
        let Some(queue) = self.queues.get(&job.domain) else {
            return;
        };
        let seq = self.seq.fetch_add(1, AtomicOrdering::SeqCst);
        queue.heap.lock().push(Pending {
            priority: job.priority,
            seq,
            job,
        });
        queue.notify.notify_one();
    }

    fn dequeue(&self, domain: Domain) -> Option<QueueJob> {
        let queue = self.queues.get(&domain)?;
        let pending = queue.heap.lock().pop()?;
        let mut stats = queue.stats.lock();
        stats.waiting = stats.waiting.saturating_sub(1);
        stats.active += 1;
        Some(pending.job)
    }

    async fn run_handler(&self, job: &QueueJob) -> std::result::Result<serde_json::Value, JobError> {
        let Some(handler) = self.registry.get(job.domain, job.action()) else {
            return Err(JobError::validation(format!(
                "no handler for {}/{}",
                job.domain,
                job.action()
            )));
        };

        let job = job.clone();
        match tokio::spawn(async move { handler.handle(&job).await }).await {
            Ok(result) => result,
            Err(e) => Err(JobError::transport(format!("handler aborted: {e}"))),
        }
    }

    /// Runs one delivery of `job` and settles its state.
    async fn deliver(self: &Arc<Self>, mut job: QueueJob, inline: bool) {
        job.attempt += 1;
        let attempt = job.attempt;
        self.update_record(job.id, |r| {
            r.status = JobStatus::Active;
            r.attempts = attempt;
            r.inline = inline;
        });
        self.mark(&job, JobStatus::Active, inline).await;
        self.publish(JobEvent::Started(job.clone()));

        let result = self.run_handler(&job).await;
        let max_deliveries = self.max_deliveries(&job);

        match result {
            Ok(value) => {
                self.with_stats(job.domain, |s| {
                    s.active = s.active.saturating_sub(1);
                    s.completed += 1;
                });
                let stored = value.clone();
                self.update_record(job.id, |r| {
                    r.status = JobStatus::Completed;
                    r.result = Some(stored);
                    r.last_error = None;
                });
                self.mark(&job, JobStatus::Completed, inline).await;
                metrics::counter!("queue_jobs_completed_total", "domain" => job.domain.as_str())
                    .increment(1);
                tracing::info!(
                    job_id = %job.id,
                    domain = %job.domain,
                    action = %job.action(),
                    correlation_id = %job.correlation_id,
                    attempt,
                    "job completed"
                );
                self.publish(JobEvent::Finished(JobOutcome {
                    job,
                    result: Ok(value),
                }));
            }
            Err(err) if !inline && err.is_transient() && attempt < max_deliveries => {
                let delay = self.config.redelivery_backoff * attempt;
                self.with_stats(job.domain, |s| {
                    s.active = s.active.saturating_sub(1);
                    s.waiting += 1;
                });
                let last_error = err.clone();
                self.update_record(job.id, |r| {
                    r.status = JobStatus::Waiting;
                    r.last_error = Some(last_error);
                });
                self.mark(&job, JobStatus::Waiting, inline).await;
                metrics::counter!("queue_jobs_redelivered_total", "domain" => job.domain.as_str())
                    .increment(1);
                tracing::warn!(
                    job_id = %job.id,
                    domain = %job.domain,
                    action = %job.action(),
                    correlation_id = %job.correlation_id,
                    attempt,
                    max_deliveries,
                    delay_ms = delay.as_millis() as u64,
                    error = %err,
                    "job failed, scheduling redelivery"
                );

                let inner = Arc::clone(self);
                tokio::spawn(async move {
                    tokio::time::sleep(delay).await;
                    inner.push(job);
                });
            }
            Err(err) => {
                self.with_stats(job.domain, |s| {
                    s.active = s.active.saturating_sub(1);
                    s.failed += 1;
                });
                let last_error = err.clone();
                self.update_record(job.id, |r| {
                    r.status = JobStatus::Failed;
                    r.last_error = Some(last_error);
                });
                self.mark(&job, JobStatus::Failed, inline).await;
                metrics::counter!("queue_jobs_failed_total", "domain" => job.domain.as_str())
                    .increment(1);
                tracing::error!(
                    job_id = %job.id,
                    domain = %job.domain,
                    action = %job.action(),
                    correlation_id = %job.correlation_id,
                    attempt,
                    error = %err,
                    "job failed"
                );
                self.publish(JobEvent::Finished(JobOutcome {
                    job,
                    result: Err(err),
                }));
            }
        }
    }
}

async fn run_worker(inner: Arc<Inner>, domain: Domain, mut shutdown: watch::Receiver<bool>) {
    tracing::debug!(%domain, "queue worker running");
    loop {
        if *shutdown.borrow() {
            break;
        }
        if let Some(job) = inner.dequeue(domain) {
            inner.deliver(job, false).await;
            continue;
        }
        let Some(queue) = inner.queues.get(&domain) else {
            break;
        };
        tokio::select! {
            _ = queue.notify.notified() => {}
            changed = shutdown.changed() => {
                if changed.is_err() {
                    break;
                }
            }
        }
    }
    tracing::debug!(%domain, "queue worker exiting");
}
