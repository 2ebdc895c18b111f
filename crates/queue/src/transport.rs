//! Durable job transport capability.

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use async_trait::async_trait;
use common::JobId;
use parking_lot::RwLock;

use crate::error::{QueueError, Result};
use crate::job::{JobStatus, QueueJob};

/// Where accepted jobs are persisted before dispatch.
///
/// When the transport reports itself unavailable the router stops queueing
/// and runs jobs inline instead.
#[async_trait]
pub trait JobTransport: Send + Sync {
    async fn is_available(&self) -> bool;

    /// Persists a newly accepted job.
    async fn persist(&self, job: &QueueJob) -> Result<()>;

    /// Records a status change of a persisted job.
    async fn mark(&self, job_id: JobId, status: JobStatus) -> Result<()>;
}

/// In-memory transport for tests and local runs.
#[derive(Debug, Clone)]
pub struct InMemoryJobTransport {
    available: Arc<AtomicBool>,
    jobs: Arc<RwLock<HashMap<JobId, (QueueJob, JobStatus)>>>,
}

impl Default for InMemoryJobTransport {
    fn default() -> Self {
        Self::new()
    }
}

impl InMemoryJobTransport {
    pub fn new() -> Self {
        Self {
            available: Arc::new(AtomicBool::new(true)),
            jobs: Arc::new(RwLock::new(HashMap::new())),
        }
    }

    /// Creates a transport that reports itself unavailable.
    pub fn unavailable() -> Self {
        let transport = Self::new();
        transport.set_available(false);
        transport
    }

    pub fn set_available(&self, available: bool) {
        self.available.store(available, Ordering::SeqCst);
    }

    pub fn persisted_count(&self) -> usize {
        self.jobs.read().len()
    }

    pub fn status_of(&self, job_id: JobId) -> Option<JobStatus> {
        self.jobs.read().get(&job_id).map(|(_, status)| *status)
    }
}

#[async_trait]
impl JobTransport for InMemoryJobTransport {
    async fn is_available(&self) -> bool {
        self.available.load(Ordering::SeqCst)
    }

    async fn persist(&self, job: &QueueJob) -> Result<()> {
        if !self.available.load(Ordering::SeqCst) {
            return Err(QueueError::Transport("transport unavailable".to_string()));
        }
        self.jobs
            .write()
            .insert(job.id, (job.clone(), JobStatus::Waiting));
        Ok(())
    }

    async fn mark(&self, job_id: JobId, status: JobStatus) -> Result<()> {
        match self.jobs.write().get_mut(&job_id) {
            Some(entry) => {
                entry.1 = status;
                Ok(())
            }
            None => Err(QueueError::JobNotFound(job_id)),
        }
    }
}
