//! Inbound order request and the per-step job payloads derived from it.

use adapters::{
    ChannelOrderStatus, CustomerRequest, InvoiceLine, InvoiceRequest, OrderStatusUpdate, StockLine,
};
use common::OrderId;
use serde::{Deserialize, Serialize};

use crate::error::{Result, SagaError};
use crate::state::StepName;

const DEFAULT_SOURCE: &str = "marketplace";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OrderItem {
    pub product_id: String,
    #[serde(alias = "qty")]
    pub quantity: u32,
    #[serde(default)]
    pub unit_price_cents: i64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CustomerInfo {
    pub email: String,
    #[serde(default)]
    pub first_name: String,
    #[serde(default)]
    pub last_name: String,
}

/// An order submitted for processing.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OrderRequest {
    pub items: Vec<OrderItem>,
    pub customer: CustomerInfo,
    /// Channel the order came from, used to tag the customer.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source: Option<String>,
}

impl OrderRequest {
    pub fn validate(&self) -> Result<()> {
        if self.items.is_empty() {
            return Err(SagaError::Validation("order has no items".to_string()));
        }
        for item in &self.items {
            if item.product_id.trim().is_empty() {
                return Err(SagaError::Validation("item has no product id".to_string()));
            }
            if item.quantity == 0 {
                return Err(SagaError::Validation(format!(
                    "quantity for {} must be positive",
                    item.product_id
                )));
            }
            if item.unit_price_cents < 0 {
                return Err(SagaError::Validation(format!(
                    "price for {} must not be negative",
                    item.product_id
                )));
            }
        }
        if self.total_cents().is_none() {
            return Err(SagaError::Validation("order total out of range".to_string()));
        }
        if !self.customer.email.contains('@') {
            return Err(SagaError::Validation(format!(
                "invalid customer email: {}",
                self.customer.email
            )));
        }
        Ok(())
    }

    /// Order total, or `None` if it does not fit in an `i64`.
    pub fn total_cents(&self) -> Option<i64> {
        self.items.iter().try_fold(0i64, |total, i| {
            i64::from(i.quantity)
                .checked_mul(i.unit_price_cents)
                .and_then(|line| total.checked_add(line))
        })
    }

    pub fn stock_lines(&self) -> Vec<StockLine> {
        self.items
            .iter()
            .map(|i| StockLine {
                product_id: i.product_id.clone(),
                quantity: i.quantity,
            })
            .collect()
    }

    pub fn invoice_request(&self) -> InvoiceRequest {
        InvoiceRequest {
            customer_id: self.customer.email.clone(),
            lines: self
                .items
                .iter()
                .map(|i| InvoiceLine {
                    description: i.description.clone().unwrap_or_else(|| i.product_id.clone()),
                    quantity: i.quantity,
                    unit_price_cents: i.unit_price_cents,
                })
                .collect(),
        }
    }

    pub fn customer_request(&self) -> CustomerRequest {
        CustomerRequest {
            email: self.customer.email.clone(),
            first_name: self.customer.first_name.clone(),
            last_name: self.customer.last_name.clone(),
            source: Some(
                self.source
                    .clone()
                    .unwrap_or_else(|| DEFAULT_SOURCE.to_string()),
            ),
        }
    }

    /// Builds the job data for one step.
    pub fn step_data(&self, order_id: OrderId, step: StepName) -> Result<serde_json::Value> {
        let data = match step {
            StepName::Inventory => serde_json::to_value(ReserveStockData {
                lines: self.stock_lines(),
            })?,
            StepName::Invoice => serde_json::to_value(self.invoice_request())?,
            StepName::Crm => serde_json::to_value(self.customer_request())?,
            StepName::Marketplace => serde_json::to_value(OrderStatusUpdate {
                order_id,
                status: ChannelOrderStatus::Confirmed,
                tracking_number: None,
            })?,
        };
        Ok(data)
    }
}

/// Job data of `inventory/reserve_stock`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReserveStockData {
    pub lines: Vec<StockLine>,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn order() -> OrderRequest {
        serde_json::from_value(serde_json::json!({
            "items": [
                { "productId": "P1", "qty": 2, "unitPriceCents": 1500 },
                { "productId": "P2", "quantity": 1, "unitPriceCents": 500, "description": "Cable" }
            ],
            "customer": { "email": "x@y.com" }
        }))
        .unwrap()
    }

    #[test]
    fn test_deserializes_short_quantity_alias() {
        let order = order();
        assert_eq!(order.items[0].quantity, 2);
        assert_eq!(order.items[1].quantity, 1);
        assert!(order.validate().is_ok());
        assert_eq!(order.total_cents(), Some(3500));
    }

    #[test]
    fn test_validation() {
        let mut empty = order();
        empty.items.clear();
        assert!(matches!(empty.validate(), Err(SagaError::Validation(_))));

        let mut zero = order();
        zero.items[0].quantity = 0;
        assert!(zero.validate().is_err());

        let mut bad_email = order();
        bad_email.customer.email = "nobody".to_string();
        assert!(bad_email.validate().is_err());
    }

    #[test]
    fn test_rejects_total_that_overflows() {
        let mut huge = order();
        huge.items[0].unit_price_cents = i64::MAX / 2 + 1;
        assert_eq!(huge.total_cents(), None);
        assert!(matches!(huge.validate(), Err(SagaError::Validation(_))));
    }

    #[test]
    fn test_step_data() {
        let order = order();
        let order_id = OrderId::new();

        let invoice: InvoiceRequest =
            serde_json::from_value(order.step_data(order_id, StepName::Invoice).unwrap()).unwrap();
        assert_eq!(invoice.customer_id, "x@y.com");
        assert_eq!(invoice.lines[0].description, "P1");
        assert_eq!(invoice.lines[1].description, "Cable");

        let customer: CustomerRequest =
            serde_json::from_value(order.step_data(order_id, StepName::Crm).unwrap()).unwrap();
        assert_eq!(customer.source.as_deref(), Some("marketplace"));

        let status: OrderStatusUpdate =
            serde_json::from_value(order.step_data(order_id, StepName::Marketplace).unwrap())
                .unwrap();
        assert_eq!(status.order_id, order_id);
        assert_eq!(status.status, ChannelOrderStatus::Confirmed);
    }
}
