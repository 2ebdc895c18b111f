//! Billing adapter trait and in-memory implementation.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Datelike, Duration, Utc};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};

use crate::adapter::{Adapter, AdapterKind, SystemInfo};
use crate::context::CallContext;
use crate::error::{AdapterError, Result};
use crate::fault::FaultInjector;

/// Days until an issued invoice is due.
const PAYMENT_TERM_DAYS: i64 = 30;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InvoiceLine {
    pub description: String,
    pub quantity: u32,
    pub unit_price_cents: i64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InvoiceRequest {
    pub customer_id: String,
    pub lines: Vec<InvoiceLine>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InvoiceStatus {
    Draft,
    Sent,
    Paid,
    Void,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Invoice {
    pub id: String,
    pub invoice_number: String,
    pub customer_id: String,
    pub amount_cents: i64,
    pub status: InvoiceStatus,
    pub due_date: DateTime<Utc>,
}

/// Trait for invoicing operations.
#[async_trait]
pub trait BillingAdapter: Adapter {
    /// Issues a draft invoice, deduplicated on the idempotency key.
    async fn issue_invoice(&self, ctx: &CallContext, request: &InvoiceRequest) -> Result<Invoice>;

    /// Voids the invoice issued under the idempotency key, if any.
    async fn void_invoice(&self, ctx: &CallContext) -> Result<()>;
}

#[derive(Debug, Default)]
struct InMemoryBillingState {
    invoices: HashMap<String, Invoice>,
    next_id: u32,
}

/// In-memory invoicing system for tests and local runs.
#[derive(Debug, Clone, Default)]
pub struct InMemoryBillingAdapter {
    state: Arc<RwLock<InMemoryBillingState>>,
    faults: FaultInjector,
}

impl InMemoryBillingAdapter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn faults(&self) -> &FaultInjector {
        &self.faults
    }

    /// Returns the number of invoices ever issued, including voided ones.
    pub fn invoice_count(&self) -> usize {
        self.state.read().invoices.len()
    }

    /// Returns the number of invoices that have not been voided.
    pub fn open_invoice_count(&self) -> usize {
        self.state
            .read()
            .invoices
            .values()
            .filter(|i| i.status != InvoiceStatus::Void)
            .count()
    }
}

#[async_trait]
impl Adapter for InMemoryBillingAdapter {
    fn kind(&self) -> AdapterKind {
        AdapterKind::Billing
    }

    async fn test_connection(&self, _ctx: &CallContext) -> Result<()> {
        self.faults.check("test_connection").await
    }

    async fn system_info(&self, _ctx: &CallContext) -> Result<SystemInfo> {
        self.faults.check("system_info").await?;
        Ok(SystemInfo {
            system: "InvoiceGen Pro v2.1".to_string(),
            details: serde_json::json!({
                "limits": { "perMonth": 5000 },
                "currencies": ["PLN", "EUR", "USD"],
            }),
        })
    }
}

#[async_trait]
impl BillingAdapter for InMemoryBillingAdapter {
    async fn issue_invoice(&self, ctx: &CallContext, request: &InvoiceRequest) -> Result<Invoice> {
        self.faults.check("issue_invoice").await?;
        let key = ctx.require_key()?;

        if request.lines.is_empty() {
            return Err(AdapterError::validation("invoice has no lines"));
        }

        let mut state = self.state.write();
        if let Some(existing) = state.invoices.get(key) {
            return Ok(existing.clone());
        }

        let amount_cents = request
            .lines
            .iter()
            .try_fold(0i64, |total, l| {
                i64::from(l.quantity)
                    .checked_mul(l.unit_price_cents)
                    .and_then(|line| total.checked_add(line))
            })
            .ok_or_else(|| AdapterError::validation("invoice total out of range"))?;

        state.next_id += 1;
        let now = Utc::now();
        let invoice = Invoice {
            id: format!("INV-{:04}", state.next_id),
            invoice_number: format!("{}/{:04}", now.year(), state.next_id),
            customer_id: request.customer_id.clone(),
            amount_cents,
            status: InvoiceStatus::Draft,
            due_date: now + Duration::days(PAYMENT_TERM_DAYS),
        };
        state.invoices.insert(key.to_string(), invoice.clone());

        Ok(invoice)
    }

    async fn void_invoice(&self, ctx: &CallContext) -> Result<()> {
        self.faults.check("void_invoice").await?;
        let key = ctx.require_key()?;

        if let Some(invoice) = self.state.write().invoices.get_mut(key) {
            invoice.status = InvoiceStatus::Void;
        }
        Ok(())
    }
}
