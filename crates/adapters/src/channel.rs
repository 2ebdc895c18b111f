//! Sales-channel (marketplace) adapter trait and in-memory implementation.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use common::OrderId;
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};

use crate::adapter::{Adapter, AdapterKind, SystemInfo};
use crate::context::CallContext;
use crate::error::{AdapterError, Result};
use crate::fault::FaultInjector;
use crate::inventory::StockLine;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChannelOrderStatus {
    New,
    Confirmed,
    Shipped,
    Delivered,
    Cancelled,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OrderStatusUpdate {
    pub order_id: OrderId,
    pub status: ChannelOrderStatus,
    pub tracking_number: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProductSync {
    pub product_id: String,
    pub stock_quantity: i64,
    pub price_cents: Option<i64>,
}

/// An order placed on the sales channel and not yet imported.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChannelOrder {
    pub id: String,
    pub order_number: String,
    pub customer_id: String,
    pub total_amount_cents: i64,
    pub status: ChannelOrderStatus,
    pub items: Vec<StockLine>,
}

/// Trait for marketplace operations.
#[async_trait]
pub trait SalesChannelAdapter: Adapter {
    /// Publishes the order's status. Pushing the same status twice is a no-op.
    async fn push_order_status(&self, ctx: &CallContext, update: &OrderStatusUpdate) -> Result<()>;

    /// Publishes a product's available quantity and price.
    async fn sync_product(&self, ctx: &CallContext, sync: &ProductSync) -> Result<()>;

    /// Returns orders placed on the channel since the last fetch.
    async fn fetch_new_orders(&self, ctx: &CallContext) -> Result<Vec<ChannelOrder>>;
}

#[derive(Debug, Default)]
struct InMemoryChannelState {
    order_statuses: HashMap<OrderId, OrderStatusUpdate>,
    products: HashMap<String, ProductSync>,
    pending_orders: Vec<ChannelOrder>,
}

/// In-memory marketplace for tests and local runs.
#[derive(Debug, Clone, Default)]
pub struct InMemorySalesChannelAdapter {
    state: Arc<RwLock<InMemoryChannelState>>,
    faults: FaultInjector,
}

impl InMemorySalesChannelAdapter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn faults(&self) -> &FaultInjector {
        &self.faults
    }

    /// Queues an order to be returned by the next fetch.
    pub fn add_pending_order(&self, order: ChannelOrder) {
        self.state.write().pending_orders.push(order);
    }

    pub fn order_status(&self, order_id: OrderId) -> Option<ChannelOrderStatus> {
        self.state
            .read()
            .order_statuses
            .get(&order_id)
            .map(|u| u.status)
    }

    pub fn synced_product(&self, product_id: &str) -> Option<ProductSync> {
        self.state.read().products.get(product_id).cloned()
    }
}

#[async_trait]
impl Adapter for InMemorySalesChannelAdapter {
    fn kind(&self) -> AdapterKind {
        AdapterKind::SalesChannel
    }

    async fn test_connection(&self, _ctx: &CallContext) -> Result<()> {
        self.faults.check("test_connection").await
    }

    async fn system_info(&self, _ctx: &CallContext) -> Result<SystemInfo> {
        self.faults.check("system_info").await?;
        Ok(SystemInfo {
            system: "E-commerce Platform v4.2".to_string(),
            details: serde_json::json!({
                "features": ["orders", "inventory", "payments"],
                "limits": { "requestsPerHour": 5000 },
            }),
        })
    }
}

#[async_trait]
impl SalesChannelAdapter for InMemorySalesChannelAdapter {
    async fn push_order_status(
        &self,
        _ctx: &CallContext,
        update: &OrderStatusUpdate,
    ) -> Result<()> {
        self.faults.check("push_order_status").await?;
        self.state
            .write()
            .order_statuses
            .insert(update.order_id, update.clone());
        Ok(())
    }

    async fn sync_product(&self, _ctx: &CallContext, sync: &ProductSync) -> Result<()> {
        self.faults.check("sync_product").await?;
        if sync.stock_quantity < 0 {
            return Err(AdapterError::validation(format!(
                "negative stock for {}",
                sync.product_id
            )));
        }
        self.state
            .write()
            .products
            .insert(sync.product_id.clone(), sync.clone());
        Ok(())
    }

    async fn fetch_new_orders(&self, _ctx: &CallContext) -> Result<Vec<ChannelOrder>> {
        self.faults.check("fetch_new_orders").await?;
        Ok(std::mem::take(&mut self.state.write().pending_orders))
    }
}
