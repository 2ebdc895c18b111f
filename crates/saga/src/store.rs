//! Saga persistence capability and its in-memory implementation.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use common::OrderId;
use parking_lot::RwLock;

use crate::error::Result;
use crate::instance::SagaInstance;

/// Durable home of saga instances.
///
/// The orchestrator caches instances in memory, but the store is the source
/// of truth: everything needed to resume a saga after a restart must be
/// reachable through it.
#[async_trait]
pub trait SagaStore: Send + Sync {
    /// Inserts or replaces the instance.
    async fn save(&self, saga: &SagaInstance) -> Result<()>;

    async fn load(&self, order_id: OrderId) -> Result<Option<SagaInstance>>;

    /// Returns every non-terminal, non-archived saga, oldest first.
    async fn list_active(&self) -> Result<Vec<SagaInstance>>;

    /// Returns up to `limit` non-archived sagas, newest first.
    async fn list(&self, limit: usize) -> Result<Vec<SagaInstance>>;

    /// Hides a saga from listings. Returns false if it does not exist.
    async fn archive(&self, order_id: OrderId) -> Result<bool>;
}

#[derive(Debug, Clone)]
struct Stored {
    saga: SagaInstance,
    archived: bool,
}

/// In-memory saga store for tests and local runs.
#[derive(Debug, Clone, Default)]
pub struct InMemorySagaStore {
    sagas: Arc<RwLock<HashMap<OrderId, Stored>>>,
}

impl InMemorySagaStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.sagas.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.sagas.read().is_empty()
    }

    fn collect(&self, filter: impl Fn(&Stored) -> bool) -> Vec<SagaInstance> {
        let mut sagas: Vec<SagaInstance> = self
            .sagas
            .read()
            .values()
            .filter(|s| filter(s))
            .map(|s| s.saga.clone())
            .collect();
        sagas.sort_by_key(|s| s.created_at());
        sagas
    }
}

#[async_trait]
impl SagaStore for InMemorySagaStore {
    async fn save(&self, saga: &SagaInstance) -> Result<()> {
        let mut sagas = self.sagas.write();
        let archived = sagas
            .get(&saga.order_id())
            .is_some_and(|stored| stored.archived);
        sagas.insert(
            saga.order_id(),
            Stored {
                saga: saga.clone(),
                archived,
            },
        );
        Ok(())
    }

    async fn load(&self, order_id: OrderId) -> Result<Option<SagaInstance>> {
        Ok(self.sagas.read().get(&order_id).map(|s| s.saga.clone()))
    }

    async fn list_active(&self) -> Result<Vec<SagaInstance>> {
        Ok(self.collect(|s| !s.archived && !s.saga.is_terminal()))
    }

    async fn list(&self, limit: usize) -> Result<Vec<SagaInstance>> {
        let mut sagas = self.collect(|s| !s.archived);
        sagas.reverse();
        sagas.truncate(limit);
        Ok(sagas)
    }

    async fn archive(&self, order_id: OrderId) -> Result<bool> {
        match self.sagas.write().get_mut(&order_id) {
            Some(stored) => {
                stored.archived = true;
                Ok(true)
            }
            None => Ok(false),
        }
    }
}
