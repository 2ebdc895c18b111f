//! Order-processing sagas over the integration bus.
//!
//! An order runs four steps in a fixed sequence, each one a job on the
//! priority queue:
//! 1. Reserve stock in the warehouse system
//! 2. Issue the invoice in the billing system
//! 3. Upsert the customer in the CRM
//! 4. Push the order status to the sales channel
//!
//! When a step fails after the first one has completed, the completed steps
//! are compensated latest first. A compensation that exhausts its retries
//! leaves the saga failed and flagged for manual intervention.

pub mod compensation;
pub mod error;
pub mod handlers;
pub mod instance;
pub mod inventory_sync;
pub mod orchestrator;
pub mod order;
pub mod postgres;
pub mod state;
pub mod store;

pub use compensation::{AdapterCompensator, Compensator};
pub use error::{Result, SagaError};
pub use handlers::{LOW_STOCK_THRESHOLD, REQUIRED_ROUTES, register_handlers};
pub use instance::{SagaInstance, SagaStep};
pub use inventory_sync::{
    InventorySyncService, SyncJobData, SyncRequest, SyncState, SyncStatus, SyncType,
};
pub use orchestrator::SagaOrchestrator;
pub use order::{CustomerInfo, OrderItem, OrderRequest, ReserveStockData};
pub use postgres::PostgresSagaStore;
pub use state::{SagaStatus, StepName, StepStatus};
pub use store::{InMemorySagaStore, SagaStore};
