//! Customer-management (CRM) adapter trait and in-memory implementation.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};

use crate::adapter::{Adapter, AdapterKind, SystemInfo};
use crate::context::CallContext;
use crate::error::{AdapterError, Result};
use crate::fault::FaultInjector;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CustomerRequest {
    pub email: String,
    pub first_name: String,
    pub last_name: String,
    pub source: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CustomerStatus {
    Lead,
    Active,
    Inactive,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Customer {
    pub id: String,
    pub email: String,
    pub first_name: String,
    pub last_name: String,
    pub status: CustomerStatus,
    pub tags: Vec<String>,
    /// Idempotency keys of the orders linked to this customer.
    pub order_keys: Vec<String>,
}

/// Trait for CRM operations.
#[async_trait]
pub trait CustomerAdapter: Adapter {
    /// Creates the customer or returns the existing record for the same
    /// email, linking the order identified by the idempotency key.
    async fn upsert_customer(&self, ctx: &CallContext, request: &CustomerRequest)
    -> Result<Customer>;

    /// Unlinks the order identified by the idempotency key.
    async fn detach_order(&self, ctx: &CallContext) -> Result<()>;
}

#[derive(Debug, Default)]
struct InMemoryCustomerState {
    /// Customers keyed by lowercased email.
    customers: HashMap<String, Customer>,
    next_id: u32,
}

/// In-memory CRM for tests and local runs.
#[derive(Debug, Clone, Default)]
pub struct InMemoryCustomerAdapter {
    state: Arc<RwLock<InMemoryCustomerState>>,
    faults: FaultInjector,
}

impl InMemoryCustomerAdapter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn faults(&self) -> &FaultInjector {
        &self.faults
    }

    pub fn customer_count(&self) -> usize {
        self.state.read().customers.len()
    }

    pub fn find_by_email(&self, email: &str) -> Option<Customer> {
        self.state
            .read()
            .customers
            .get(&email.to_lowercase())
            .cloned()
    }
}

#[async_trait]
impl Adapter for InMemoryCustomerAdapter {
    fn kind(&self) -> AdapterKind {
        AdapterKind::CustomerManagement
    }

    async fn test_connection(&self, _ctx: &CallContext) -> Result<()> {
        self.faults.check("test_connection").await
    }

    async fn system_info(&self, _ctx: &CallContext) -> Result<SystemInfo> {
        self.faults.check("system_info").await?;
        Ok(SystemInfo {
            system: "CRM Pro v4.5".to_string(),
            details: serde_json::json!({
                "features": ["customers", "campaigns", "analytics"],
                "limits": { "contacts": 50000 },
            }),
        })
    }
}

#[async_trait]
impl CustomerAdapter for InMemoryCustomerAdapter {
    async fn upsert_customer(
        &self,
        ctx: &CallContext,
        request: &CustomerRequest,
    ) -> Result<Customer> {
        self.faults.check("upsert_customer").await?;
        let key = ctx.require_key()?;

        if !request.email.contains('@') {
            return Err(AdapterError::validation(format!(
                "invalid email: {}",
                request.email
            )));
        }

        let mut state = self.state.write();
        let email_key = request.email.to_lowercase();

        if !state.customers.contains_key(&email_key) {
            state.next_id += 1;
            let tags = match &request.source {
                Some(source) => vec![source.clone(), "new".to_string()],
                None => vec!["new".to_string()],
            };
            let customer = Customer {
                id: format!("CRM-{:04}", state.next_id),
                email: request.email.clone(),
                first_name: request.first_name.clone(),
                last_name: request.last_name.clone(),
                status: CustomerStatus::Lead,
                tags,
                order_keys: Vec::new(),
            };
            state.customers.insert(email_key.clone(), customer);
        }

        let customer = state
            .customers
            .get_mut(&email_key)
            .ok_or_else(|| AdapterError::not_found(format!("customer {}", request.email)))?;
        if !customer.order_keys.iter().any(|k| k == key) {
            customer.order_keys.push(key.to_string());
        }
        Ok(customer.clone())
    }

    async fn detach_order(&self, ctx: &CallContext) -> Result<()> {
        self.faults.check("detach_order").await?;
        let key = ctx.require_key()?;

        for customer in self.state.write().customers.values_mut() {
            customer.order_keys.retain(|k| k != key);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ErrorKind;
    use common::{CorrelationId, OrderId};

    fn request(email: &str) -> CustomerRequest {
        CustomerRequest {
            email: email.to_string(),
            first_name: "Jan".to_string(),
            last_name: "Testowy".to_string(),
            source: Some("marketplace".to_string()),
        }
    }

    #[tokio::test]
    async fn test_create_customer_as_lead() {
        let adapter = InMemoryCustomerAdapter::new();
        let ctx = CallContext::for_step(CorrelationId::new(), OrderId::new(), "crm");

        let customer = adapter
            .upsert_customer(&ctx, &request("a@b.com"))
            .await
            .unwrap();
        assert_eq!(customer.status, CustomerStatus::Lead);
        assert_eq!(customer.tags, vec!["marketplace", "new"]);
        assert_eq!(customer.order_keys.len(), 1);
    }

    #[tokio::test]
    async fn test_upsert_twice_same_step_yields_one_customer() {
        let adapter = InMemoryCustomerAdapter::new();
        let ctx = CallContext::for_step(CorrelationId::new(), OrderId::new(), "crm");

        let first = adapter
            .upsert_customer(&ctx, &request("a@b.com"))
            .await
            .unwrap();
        let second = adapter
            .upsert_customer(&ctx, &request("a@b.com"))
            .await
            .unwrap();

        assert_eq!(first.id, second.id);
        assert_eq!(adapter.customer_count(), 1);
        assert_eq!(second.order_keys.len(), 1);
    }

    #[tokio::test]
    async fn test_second_order_links_to_existing_customer() {
        let adapter = InMemoryCustomerAdapter::new();
        let first_ctx = CallContext::for_step(CorrelationId::new(), OrderId::new(), "crm");
        let second_ctx = CallContext::for_step(CorrelationId::new(), OrderId::new(), "crm");

        adapter
            .upsert_customer(&first_ctx, &request("A@B.com"))
            .await
            .unwrap();
        let customer = adapter
            .upsert_customer(&second_ctx, &request("a@b.com"))
            .await
            .unwrap();

        assert_eq!(adapter.customer_count(), 1);
        assert_eq!(customer.order_keys.len(), 2);
    }

    #[tokio::test]
    async fn test_detach_order() {
        let adapter = InMemoryCustomerAdapter::new();
        let ctx = CallContext::for_step(CorrelationId::new(), OrderId::new(), "crm");
        adapter
            .upsert_customer(&ctx, &request("a@b.com"))
            .await
            .unwrap();

        adapter.detach_order(&ctx).await.unwrap();
        let customer = adapter.find_by_email("a@b.com").unwrap();
        assert!(customer.order_keys.is_empty());
    }

    #[tokio::test]
    async fn test_invalid_email_rejected() {
        let adapter = InMemoryCustomerAdapter::new();
        let ctx = CallContext::for_step(CorrelationId::new(), OrderId::new(), "crm");
        let err = adapter
            .upsert_customer(&ctx, &request("not-an-email"))
            .await
            .unwrap_err();
        assert_eq!(err.kind, ErrorKind::ValidationError);
        assert_eq!(adapter.customer_count(), 0);
    }
}
