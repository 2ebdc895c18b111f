//! Compensating actions that undo completed saga steps.

use std::sync::Arc;

use adapters::{
    AdapterError, AdapterFleet, CallContext, ChannelOrderStatus, OrderStatusUpdate,
};
use async_trait::async_trait;

use crate::instance::SagaInstance;
use crate::state::StepName;

/// Undoes the side effect of one completed step.
///
/// Implementations must be idempotent: a compensation may run again after a
/// restart or a timed-out attempt that completed late.
#[async_trait]
pub trait Compensator: Send + Sync {
    async fn compensate(&self, step: StepName, saga: &SagaInstance) -> Result<(), AdapterError>;
}

/// Compensates through the adapters, with the executor's retry policy.
pub struct AdapterCompensator {
    fleet: Arc<AdapterFleet>,
}

impl AdapterCompensator {
    pub fn new(fleet: Arc<AdapterFleet>) -> Self {
        Self { fleet }
    }
}

#[async_trait]
impl Compensator for AdapterCompensator {
    async fn compensate(&self, step: StepName, saga: &SagaInstance) -> Result<(), AdapterError> {
        let ctx =
            CallContext::for_step(saga.correlation_id().clone(), saga.order_id(), step.as_str());
        let kind = step.adapter();
        let config = self.fleet.config(kind);
        let executor = self.fleet.executor();

        let result = match step {
            StepName::Inventory => {
                let inventory = Arc::clone(self.fleet.inventory());
                executor
                    .execute(kind.as_str(), "release_stock", &ctx, &config, || {
                        let inventory = Arc::clone(&inventory);
                        let ctx = ctx.clone();
                        async move { inventory.release_stock(&ctx).await }
                    })
                    .await
            }
            StepName::Invoice => {
                let billing = Arc::clone(self.fleet.billing());
                executor
                    .execute(kind.as_str(), "void_invoice", &ctx, &config, || {
                        let billing = Arc::clone(&billing);
                        let ctx = ctx.clone();
                        async move { billing.void_invoice(&ctx).await }
                    })
                    .await
            }
            StepName::Crm => {
                let customers = Arc::clone(self.fleet.customer());
                executor
                    .execute(kind.as_str(), "detach_order", &ctx, &config, || {
                        let customers = Arc::clone(&customers);
                        let ctx = ctx.clone();
                        async move { customers.detach_order(&ctx).await }
                    })
                    .await
            }
            StepName::Marketplace => {
                let channel = Arc::clone(self.fleet.channel());
                let update = OrderStatusUpdate {
                    order_id: saga.order_id(),
                    status: ChannelOrderStatus::Cancelled,
                    tracking_number: None,
                };
                executor
                    .execute(kind.as_str(), "push_order_status", &ctx, &config, || {
                        let channel = Arc::clone(&channel);
                        let ctx = ctx.clone();
                        let update = update.clone();
                        async move { channel.push_order_status(&ctx, &update).await }
                    })
                    .await
            }
        };

        result.into_result().map_err(|err| {
            AdapterError::compensation_exhausted(format!("{step} compensation on {kind}: {err}"))
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::order::{CustomerInfo, OrderItem, OrderRequest};
    use adapters::{
        AdapterExecutor, BillingAdapter, ErrorKind, ExecutorConfig, HealthMonitor,
        InMemoryBillingAdapter, InMemoryCustomerAdapter, InMemoryInventoryAdapter,
        InMemorySalesChannelAdapter, InventoryAdapter, InvoiceLine, InvoiceRequest, StockLine,
    };
    use common::{CorrelationId, OrderId};
    use std::time::Duration;

    struct Fixture {
        compensator: AdapterCompensator,
        inventory: Arc<InMemoryInventoryAdapter>,
        billing: Arc<InMemoryBillingAdapter>,
        channel: Arc<InMemorySalesChannelAdapter>,
    }

    fn fixture() -> Fixture {
        let inventory = Arc::new(InMemoryInventoryAdapter::with_demo_products());
        let billing = Arc::new(InMemoryBillingAdapter::new());
        let channel = Arc::new(InMemorySalesChannelAdapter::new());
        let fleet = AdapterFleet::new(
            inventory.clone(),
            billing.clone(),
            Arc::new(InMemoryCustomerAdapter::new()),
            channel.clone(),
            Arc::new(AdapterExecutor::new(Arc::new(HealthMonitor::default()))),
        )
        .map_configs(|c: ExecutorConfig| c.with_backoff_base(Duration::from_millis(10)));
        Fixture {
            compensator: AdapterCompensator::new(Arc::new(fleet)),
            inventory,
            billing,
            channel,
        }
    }

    fn saga() -> SagaInstance {
        SagaInstance::new(
            OrderId::new(),
            CorrelationId::new(),
            OrderRequest {
                items: vec![OrderItem {
                    product_id: "PROD-001".to_string(),
                    quantity: 3,
                    unit_price_cents: 100,
                    description: None,
                }],
                customer: CustomerInfo {
                    email: "x@y.com".to_string(),
                    first_name: String::new(),
                    last_name: String::new(),
                },
                source: None,
            },
        )
    }

    fn step_ctx(saga: &SagaInstance, step: StepName) -> CallContext {
        CallContext::for_step(saga.correlation_id().clone(), saga.order_id(), step.as_str())
    }

    #[tokio::test]
    async fn test_release_restores_stock_and_is_idempotent() {
        let f = fixture();
        let saga = saga();
        f.inventory
            .reserve_stock(
                &step_ctx(&saga, StepName::Inventory),
                &[StockLine {
                    product_id: "PROD-001".to_string(),
                    quantity: 3,
                }],
            )
            .await
            .unwrap();
        assert_eq!(f.inventory.stock_of("PROD-001"), Some(12));

        f.compensator.compensate(StepName::Inventory, &saga).await.unwrap();
        f.compensator.compensate(StepName::Inventory, &saga).await.unwrap();
        assert_eq!(f.inventory.stock_of("PROD-001"), Some(15));
    }

    #[tokio::test]
    async fn test_void_invoice() {
        let f = fixture();
        let saga = saga();
        f.billing
            .issue_invoice(
                &step_ctx(&saga, StepName::Invoice),
                &InvoiceRequest {
                    customer_id: "x@y.com".to_string(),
                    lines: vec![InvoiceLine {
                        description: "PROD-001".to_string(),
                        quantity: 1,
                        unit_price_cents: 100,
                    }],
                },
            )
            .await
            .unwrap();
        assert_eq!(f.billing.open_invoice_count(), 1);

        f.compensator.compensate(StepName::Invoice, &saga).await.unwrap();
        assert_eq!(f.billing.open_invoice_count(), 0);
    }

    #[tokio::test]
    async fn test_marketplace_compensation_cancels_order() {
        let f = fixture();
        let saga = saga();
        f.compensator
            .compensate(StepName::Marketplace, &saga)
            .await
            .unwrap();
        assert_eq!(
            f.channel.order_status(saga.order_id()),
            Some(ChannelOrderStatus::Cancelled)
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_exhausted_retries_report_compensation_exhausted() {
        let f = fixture();
        f.inventory.faults().fail_always("release_stock");

        let err = f
            .compensator
            .compensate(StepName::Inventory, &saga())
            .await
            .unwrap_err();
        assert_eq!(err.kind, ErrorKind::CompensationExhausted);
        assert_eq!(f.inventory.faults().calls("release_stock"), 2);
    }
}
