//! Adapters for the four external systems behind the integration bus.
//!
//! Every outbound call goes through [`AdapterExecutor`], which applies a
//! per-attempt timeout, bounded retries with linear backoff, and consults
//! the [`HealthMonitor`] circuit breaker before touching the downstream
//! system. The monitor folds each attempt's outcome into a per-adapter
//! health state and a fleet-wide aggregate.
//!
//! The in-memory adapters stand in for the real HTTP/FTP/database clients
//! and support fault injection for tests.

pub mod adapter;
pub mod billing;
pub mod channel;
pub mod context;
pub mod customer;
pub mod error;
pub mod executor;
pub mod fault;
pub mod fleet;
pub mod health;
pub mod inventory;

pub use adapter::{Adapter, AdapterKind, SystemInfo};
pub use billing::{
    BillingAdapter, InMemoryBillingAdapter, Invoice, InvoiceLine, InvoiceRequest, InvoiceStatus,
};
pub use channel::{
    ChannelOrder, ChannelOrderStatus, InMemorySalesChannelAdapter, OrderStatusUpdate, ProductSync,
    SalesChannelAdapter,
};
pub use context::CallContext;
pub use customer::{
    Customer, CustomerAdapter, CustomerRequest, CustomerStatus, InMemoryCustomerAdapter,
};
pub use error::{AdapterError, ErrorKind, Result};
pub use executor::{AdapterCallResult, AdapterExecutor, ExecutorConfig};
pub use fault::FaultInjector;
pub use fleet::{AdapterFleet, HealthReport, SystemInfoReport, SystemReport};
pub use health::{
    AggregateHealth, CircuitState, HealthConfig, HealthMonitor, HealthStatus, Permit,
    Sample, SampleOutcome, SystemHealthState,
};
pub use inventory::{
    InMemoryInventoryAdapter, InventoryAdapter, Product, Reservation, StockLine, StockOperation,
    StockUpdate,
};
