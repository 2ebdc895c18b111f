//! Explicit `(domain, action) -> handler` registration table.

use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;

use async_trait::async_trait;

use crate::error::{JobError, QueueError, Result};
use crate::job::{Domain, QueueJob};

/// Processes one kind of job.
#[async_trait]
pub trait JobHandler: Send + Sync {
    async fn handle(&self, job: &QueueJob) -> std::result::Result<serde_json::Value, JobError>;
}

/// Adapts an async closure into a [`JobHandler`].
pub struct FnHandler<F>(F);

/// Wraps `f` as a handler.
pub fn handler_fn<F, Fut>(f: F) -> FnHandler<F>
where
    F: Fn(QueueJob) -> Fut + Send + Sync,
    Fut: Future<Output = std::result::Result<serde_json::Value, JobError>> + Send,
{
    FnHandler(f)
}

#[async_trait]
impl<F, Fut> JobHandler for FnHandler<F>
where
    F: Fn(QueueJob) -> Fut + Send + Sync,
    Fut: Future<Output = std::result::Result<serde_json::Value, JobError>> + Send,
{
    async fn handle(&self, job: &QueueJob) -> std::result::Result<serde_json::Value, JobError> {
        (self.0)(job.clone()).await
    }
}

/// Handlers keyed by domain and action, built once at startup.
#[derive(Default, Clone)]
pub struct HandlerRegistry {
    handlers: HashMap<(Domain, String), Arc<dyn JobHandler>>,
}

impl HandlerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a handler, rejecting a second handler for the same route.
    pub fn register<H>(&mut self, domain: Domain, action: &str, handler: H) -> Result<()>
    where
        H: JobHandler + 'static,
    {
        self.register_arc(domain, action, Arc::new(handler))
    }

    pub fn register_arc(
        &mut self,
        domain: Domain,
        action: &str,
        handler: Arc<dyn JobHandler>,
    ) -> Result<()> {
        let key = (domain, action.to_string());
        if self.handlers.contains_key(&key) {
            return Err(QueueError::DuplicateHandler {
                domain,
                action: action.to_string(),
            });
        }
        self.handlers.insert(key, handler);
        Ok(())
    }

    pub fn get(&self, domain: Domain, action: &str) -> Option<Arc<dyn JobHandler>> {
        self.handlers.get(&(domain, action.to_string())).cloned()
    }

    pub fn contains(&self, domain: Domain, action: &str) -> bool {
        self.handlers.contains_key(&(domain, action.to_string()))
    }

    /// Checks that every required route has a handler.
    pub fn validate(&self, required: &[(Domain, &str)]) -> Result<()> {
        let missing: Vec<String> = required
            .iter()
            .filter(|(domain, action)| !self.contains(*domain, action))
            .map(|(domain, action)| format!("{domain}/{action}"))
            .collect();

        if missing.is_empty() {
            Ok(())
        } else {
            Err(QueueError::MissingHandlers(missing))
        }
    }

    /// Returns every registered route in sorted order.
    pub fn routes(&self) -> Vec<(Domain, String)> {
        let mut routes: Vec<_> = self.handlers.keys().cloned().collect();
        routes.sort();
        routes
    }

    pub fn len(&self) -> usize {
        self.handlers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.handlers.is_empty()
    }
}
