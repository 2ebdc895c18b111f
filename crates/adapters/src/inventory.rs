//! Inventory adapter trait and in-memory implementation.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};

use crate::adapter::{Adapter, AdapterKind, SystemInfo};
use crate::context::CallContext;
use crate::error::{AdapterError, Result};
use crate::fault::FaultInjector;

/// A product and its stock level at the warehouse.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Product {
    pub id: String,
    pub name: String,
    pub stock_level: i64,
    pub location: String,
}

/// One line of an order to reserve.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StockLine {
    pub product_id: String,
    pub quantity: u32,
}

/// Result of a successful stock reservation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Reservation {
    pub reservation_id: String,
    pub lines: Vec<StockLine>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StockOperation {
    Set,
    Add,
    Subtract,
}

/// A direct stock correction.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StockUpdate {
    pub product_id: String,
    pub quantity: i64,
    pub operation: StockOperation,
}

/// Trait for warehouse operations.
#[async_trait]
pub trait InventoryAdapter: Adapter {
    /// Reserves stock for the given lines.
    ///
    /// Keyed by the context's idempotency key: a repeated call with the same
    /// key returns the existing reservation without reserving again.
    async fn reserve_stock(&self, ctx: &CallContext, lines: &[StockLine]) -> Result<Reservation>;

    /// Releases the reservation made under the context's idempotency key.
    /// Releasing an unknown or already released reservation succeeds.
    async fn release_stock(&self, ctx: &CallContext) -> Result<()>;

    /// Applies a stock correction and returns the updated product.
    async fn update_stock(&self, ctx: &CallContext, update: &StockUpdate) -> Result<Product>;

    /// Returns the current stock level of a product.
    async fn stock_level(&self, ctx: &CallContext, product_id: &str) -> Result<Product>;

    /// Returns every product, ordered by id.
    async fn list_products(&self, ctx: &CallContext) -> Result<Vec<Product>>;
}

#[derive(Debug, Default)]
struct InMemoryInventoryState {
    products: HashMap<String, Product>,
    reservations: HashMap<String, Reservation>,
    next_id: u32,
}

/// In-memory warehouse for tests and local runs.
#[derive(Debug, Clone, Default)]
pub struct InMemoryInventoryAdapter {
    state: Arc<RwLock<InMemoryInventoryState>>,
    faults: FaultInjector,
}

impl InMemoryInventoryAdapter {
    /// Creates an empty warehouse.
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a warehouse seeded with demo products.
    pub fn with_demo_products() -> Self {
        let adapter = Self::new();
        adapter.add_product("PROD-001", "Laptop Dell", 15, "A1");
        adapter.add_product("PROD-002", "iPhone 15", 8, "B2");
        adapter
    }

    /// Adds or replaces a product.
    pub fn add_product(&self, id: &str, name: &str, stock_level: i64, location: &str) {
        self.state.write().products.insert(
            id.to_string(),
            Product {
                id: id.to_string(),
                name: name.to_string(),
                stock_level,
                location: location.to_string(),
            },
        );
    }

    /// Returns the fault injector controlling this adapter.
    pub fn faults(&self) -> &FaultInjector {
        &self.faults
    }

    /// Returns the number of active reservations.
    pub fn reservation_count(&self) -> usize {
        self.state.read().reservations.len()
    }

    /// Returns the stock level of a product, if it exists.
    pub fn stock_of(&self, product_id: &str) -> Option<i64> {
        self.state
            .read()
            .products
            .get(product_id)
            .map(|p| p.stock_level)
    }
}

#[async_trait]
impl Adapter for InMemoryInventoryAdapter {
    fn kind(&self) -> AdapterKind {
        AdapterKind::Inventory
    }

    async fn test_connection(&self, _ctx: &CallContext) -> Result<()> {
        self.faults.check("test_connection").await
    }

    async fn system_info(&self, _ctx: &CallContext) -> Result<SystemInfo> {
        self.faults.check("system_info").await?;
        let products = self.state.read().products.len();
        Ok(SystemInfo {
            system: "WMS v3.2.1".to_string(),
            details: serde_json::json!({
                "connection": "FTP + Database",
                "products": products,
            }),
        })
    }
}

#[async_trait]
impl InventoryAdapter for InMemoryInventoryAdapter {
    async fn reserve_stock(&self, ctx: &CallContext, lines: &[StockLine]) -> Result<Reservation> {
        self.faults.check("reserve_stock").await?;
        let key = ctx.require_key()?;

        let mut state = self.state.write();
        if let Some(existing) = state.reservations.get(key) {
            return Ok(existing.clone());
        }

        if lines.is_empty() {
            return Err(AdapterError::validation("reservation has no lines"));
        }
        for line in lines {
            let product = state
                .products
                .get(&line.product_id)
                .ok_or_else(|| AdapterError::not_found(format!("product {}", line.product_id)))?;
            if product.stock_level < i64::from(line.quantity) {
                return Err(AdapterError::validation(format!(
                    "insufficient stock for {}: requested {}, available {}",
                    line.product_id, line.quantity, product.stock_level
                )));
            }
        }

        for line in lines {
            if let Some(product) = state.products.get_mut(&line.product_id) {
                product.stock_level -= i64::from(line.quantity);
            }
        }

        state.next_id += 1;
        let reservation = Reservation {
            reservation_id: format!("RES-{:04}", state.next_id),
            lines: lines.to_vec(),
        };
        state
            .reservations
            .insert(key.to_string(), reservation.clone());

        Ok(reservation)
    }

    async fn release_stock(&self, ctx: &CallContext) -> Result<()> {
        self.faults.check("release_stock").await?;
        let key = ctx.require_key()?;

        let mut state = self.state.write();
        if let Some(reservation) = state.reservations.remove(key) {
            for line in &reservation.lines {
                if let Some(product) = state.products.get_mut(&line.product_id) {
                    product.stock_level = product
                        .stock_level
                        .saturating_add(i64::from(line.quantity));
                }
            }
        }
        Ok(())
    }

    async fn update_stock(&self, _ctx: &CallContext, update: &StockUpdate) -> Result<Product> {
        self.faults.check("update_stock").await?;

        let mut state = self.state.write();
        let product = state
            .products
            .get_mut(&update.product_id)
            .ok_or_else(|| AdapterError::not_found(format!("product {}", update.product_id)))?;

        let new_level = match update.operation {
            StockOperation::Set => Some(update.quantity),
            StockOperation::Add => product.stock_level.checked_add(update.quantity),
            StockOperation::Subtract => product.stock_level.checked_sub(update.quantity),
        }
        .ok_or_else(|| {
            AdapterError::validation(format!("stock for {} out of range", update.product_id))
        })?;
        if new_level < 0 {
            return Err(AdapterError::validation(format!(
                "stock for {} would drop below zero",
                update.product_id
            )));
        }

        product.stock_level = new_level;
        Ok(product.clone())
    }

    async fn stock_level(&self, _ctx: &CallContext, product_id: &str) -> Result<Product> {
        self.faults.check("stock_level").await?;
        self.state
            .read()
            .products
            .get(product_id)
            .cloned()
            .ok_or_else(|| AdapterError::not_found(format!("product {product_id}")))
    }

    async fn list_products(&self, _ctx: &CallContext) -> Result<Vec<Product>> {
        self.faults.check("list_products").await?;
        let mut products: Vec<Product> = self.state.read().products.values().cloned().collect();
        products.sort_by(|a, b| a.id.cmp(&b.id));
        Ok(products)
    }
}
