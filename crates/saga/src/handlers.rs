//! Job handlers that call the adapters, and the startup registration table.

use std::future::Future;
use std::sync::Arc;

use adapters::{
    AdapterFleet, AdapterKind, CallContext, CustomerRequest, InvoiceRequest, OrderStatusUpdate,
    Product, ProductSync, StockUpdate,
};
use queue::{
    AuditLog, Domain, HandlerRegistry, JobError, LOG_OPERATION, LogOperationHandler, QueueJob,
    handler_fn,
};
use serde::Serialize;
use serde_json::{Value, json};

use crate::inventory_sync::SyncJobData;
use crate::order::ReserveStockData;
use crate::state::StepName;

/// Stock level at or below which a product counts as running low.
pub const LOW_STOCK_THRESHOLD: i64 = 5;

/// Every route the service must be able to process before taking traffic.
pub const REQUIRED_ROUTES: &[(Domain, &str)] = &[
    (Domain::Inventory, "reserve_stock"),
    (Domain::Inventory, "stock_update"),
    (Domain::Inventory, "inventory_check"),
    (Domain::Inventory, "stock_alert"),
    (Domain::Inventory, "inventory_sync"),
    (Domain::Billing, "process_invoice"),
    (Domain::Customer, "update_customer"),
    (Domain::Channel, "update_order_status"),
    (Domain::Channel, "sync_product"),
    (Domain::Channel, "sync_inventory"),
    (Domain::Audit, LOG_OPERATION),
];

type HandlerResult = std::result::Result<Value, JobError>;

/// Registers every job handler and checks nothing is missing.
pub fn register_handlers(
    registry: &mut HandlerRegistry,
    fleet: Arc<AdapterFleet>,
    audit: Arc<dyn AuditLog>,
) -> queue::Result<()> {
    route(registry, &fleet, Domain::Inventory, "reserve_stock", reserve_stock)?;
    route(registry, &fleet, Domain::Inventory, "stock_update", stock_update)?;
    route(registry, &fleet, Domain::Inventory, "inventory_check", inventory_check)?;
    route(registry, &fleet, Domain::Inventory, "stock_alert", stock_alert)?;
    route(registry, &fleet, Domain::Inventory, "inventory_sync", inventory_sync)?;
    route(registry, &fleet, Domain::Billing, "process_invoice", process_invoice)?;
    route(registry, &fleet, Domain::Customer, "update_customer", update_customer)?;
    route(registry, &fleet, Domain::Channel, "update_order_status", update_order_status)?;
    route(registry, &fleet, Domain::Channel, "sync_product", sync_product)?;
    route(registry, &fleet, Domain::Channel, "sync_inventory", sync_inventory)?;
    registry.register(Domain::Audit, LOG_OPERATION, LogOperationHandler::new(audit))?;

    registry.validate(REQUIRED_ROUTES)?;
    tracing::info!(routes = registry.len(), "job handlers registered");
    Ok(())
}

fn route<F, Fut>(
    registry: &mut HandlerRegistry,
    fleet: &Arc<AdapterFleet>,
    domain: Domain,
    action: &str,
    f: F,
) -> queue::Result<()>
where
    F: Fn(Arc<AdapterFleet>, QueueJob) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = HandlerResult> + Send + 'static,
{
    let fleet = Arc::clone(fleet);
    registry.register(
        domain,
        action,
        handler_fn(move |job: QueueJob| f(Arc::clone(&fleet), job)),
    )
}

/// Builds the call context of a job.
///
/// Saga steps are keyed by `<order_id>:<step>` so a redelivered job and the
/// later compensation address the same downstream entity. Other jobs are
/// keyed by their job id.
fn context(job: &QueueJob, step: Option<StepName>) -> CallContext {
    match (job.payload.order_id, step) {
        (Some(order_id), Some(step)) => {
            CallContext::for_step(job.correlation_id.clone(), order_id, step.as_str())
        }
        _ => CallContext::new(job.correlation_id.clone()).with_idempotency_key(job.id.to_string()),
    }
}

/// Runs one adapter operation through the executor.
async fn call<T, F, Fut>(
    fleet: &AdapterFleet,
    kind: AdapterKind,
    operation: &str,
    ctx: &CallContext,
    f: F,
) -> std::result::Result<T, JobError>
where
    F: Fn(CallContext) -> Fut,
    Fut: Future<Output = adapters::Result<T>> + Send + 'static,
    T: Send + 'static,
{
    let config = fleet.config(kind);
    let value = fleet
        .executor()
        .execute(kind.as_str(), operation, ctx, &config, || f(ctx.clone()))
        .await
        .into_result()?;
    Ok(value)
}

fn to_json<T: Serialize>(value: &T) -> HandlerResult {
    serde_json::to_value(value).map_err(|e| JobError::validation(format!("unserializable result: {e}")))
}

fn product_id(job: &QueueJob) -> std::result::Result<String, JobError> {
    job.payload
        .product_id
        .clone()
        .or_else(|| {
            job.payload
                .data
                .get("product_id")
                .and_then(Value::as_str)
                .map(str::to_string)
        })
        .ok_or_else(|| JobError::validation(format!("{} requires a product id", job.action())))
}

async fn reserve_stock(fleet: Arc<AdapterFleet>, job: QueueJob) -> HandlerResult {
    let data: ReserveStockData = job.payload.data_as()?;
    let ctx = context(&job, Some(StepName::Inventory));
    let inventory = Arc::clone(fleet.inventory());
    let reservation = call(&fleet, AdapterKind::Inventory, "reserve_stock", &ctx, |ctx| {
        let inventory = Arc::clone(&inventory);
        let lines = data.lines.clone();
        async move { inventory.reserve_stock(&ctx, &lines).await }
    })
    .await?;
    to_json(&reservation)
}

async fn stock_update(fleet: Arc<AdapterFleet>, job: QueueJob) -> HandlerResult {
    let update: StockUpdate = job.payload.data_as()?;
    let ctx = context(&job, None);
    let inventory = Arc::clone(fleet.inventory());
    let product = call(&fleet, AdapterKind::Inventory, "update_stock", &ctx, |ctx| {
        let inventory = Arc::clone(&inventory);
        let update = update.clone();
        async move { inventory.update_stock(&ctx, &update).await }
    })
    .await?;

    let low_stock = product.stock_level <= LOW_STOCK_THRESHOLD;
    if low_stock {
        tracing::warn!(
            correlation_id = %job.correlation_id,
            product_id = %product.id,
            stock_level = product.stock_level,
            "stock running low"
        );
    }
    Ok(json!({ "product": product, "low_stock": low_stock }))
}

async fn read_stock(
    fleet: &AdapterFleet,
    ctx: &CallContext,
    product_id: &str,
) -> std::result::Result<Product, JobError> {
    let inventory = Arc::clone(fleet.inventory());
    let product_id = product_id.to_string();
    call(fleet, AdapterKind::Inventory, "stock_level", ctx, |ctx| {
        let inventory = Arc::clone(&inventory);
        let product_id = product_id.clone();
        async move { inventory.stock_level(&ctx, &product_id).await }
    })
    .await
}

async fn inventory_check(fleet: Arc<AdapterFleet>, job: QueueJob) -> HandlerResult {
    let product_id = product_id(&job)?;
    let product = read_stock(&fleet, &context(&job, None), &product_id).await?;
    Ok(json!({
        "product_id": product.id,
        "stock_level": product.stock_level,
        "location": product.location,
    }))
}

async fn stock_alert(fleet: Arc<AdapterFleet>, job: QueueJob) -> HandlerResult {
    let product_id = product_id(&job)?;
    let threshold = job
        .payload
        .data
        .get("threshold")
        .and_then(Value::as_i64)
        .unwrap_or(LOW_STOCK_THRESHOLD);
    let product = read_stock(&fleet, &context(&job, None), &product_id).await?;

    let alert = product.stock_level <= threshold;
    if alert {
        tracing::warn!(
            correlation_id = %job.correlation_id,
            product_id = %product.id,
            stock_level = product.stock_level,
            threshold,
            "low stock alert"
        );
    }
    Ok(json!({
        "product_id": product.id,
        "stock_level": product.stock_level,
        "threshold": threshold,
        "alert": alert,
    }))
}

/// Reads the products a sync covers: the listed ids, or the whole catalogue.
async fn sync_products(
    fleet: &AdapterFleet,
    ctx: &CallContext,
    product_ids: &[String],
) -> std::result::Result<Vec<Product>, JobError> {
    if product_ids.is_empty() {
        let inventory = Arc::clone(fleet.inventory());
        return call(fleet, AdapterKind::Inventory, "list_products", ctx, |ctx| {
            let inventory = Arc::clone(&inventory);
            async move { inventory.list_products(&ctx).await }
        })
        .await;
    }

    let mut products = Vec::with_capacity(product_ids.len());
    for product_id in product_ids {
        products.push(read_stock(fleet, ctx, product_id).await?);
    }
    Ok(products)
}

async fn inventory_sync(fleet: Arc<AdapterFleet>, job: QueueJob) -> HandlerResult {
    let data: SyncJobData = job.payload.data_as()?;
    let products = sync_products(&fleet, &context(&job, None), &data.request.product_ids).await?;

    tracing::info!(
        correlation_id = %job.correlation_id,
        sync_id = %data.sync_id,
        sync_type = %data.request.sync_type,
        products = products.len(),
        "warehouse stock read"
    );
    Ok(json!({
        "sync_id": data.sync_id,
        "synced": products.len(),
        "products": products,
    }))
}

async fn sync_inventory(fleet: Arc<AdapterFleet>, job: QueueJob) -> HandlerResult {
    let data: SyncJobData = job.payload.data_as()?;
    let ctx = context(&job, None);
    let products = sync_products(&fleet, &ctx, &data.request.product_ids).await?;

    let channel = Arc::clone(fleet.channel());
    for product in &products {
        let sync = ProductSync {
            product_id: product.id.clone(),
            stock_quantity: product.stock_level,
            price_cents: None,
        };
        call(&fleet, AdapterKind::SalesChannel, "sync_product", &ctx, |ctx| {
            let channel = Arc::clone(&channel);
            let sync = sync.clone();
            async move { channel.sync_product(&ctx, &sync).await }
        })
        .await?;
    }

    tracing::info!(
        correlation_id = %job.correlation_id,
        sync_id = %data.sync_id,
        products = products.len(),
        "channel stock synchronised"
    );
    Ok(json!({ "sync_id": data.sync_id, "synced": products.len() }))
}

async fn process_invoice(fleet: Arc<AdapterFleet>, job: QueueJob) -> HandlerResult {
    let request: InvoiceRequest = job.payload.data_as()?;
    let ctx = context(&job, Some(StepName::Invoice));
    let billing = Arc::clone(fleet.billing());
    let invoice = call(&fleet, AdapterKind::Billing, "issue_invoice", &ctx, |ctx| {
        let billing = Arc::clone(&billing);
        let request = request.clone();
        async move { billing.issue_invoice(&ctx, &request).await }
    })
    .await?;
    to_json(&invoice)
}

async fn update_customer(fleet: Arc<AdapterFleet>, job: QueueJob) -> HandlerResult {
    let request: CustomerRequest = job.payload.data_as()?;
    let ctx = context(&job, Some(StepName::Crm));
    let customers = Arc::clone(fleet.customer());
    let customer = call(
        &fleet,
        AdapterKind::CustomerManagement,
        "upsert_customer",
        &ctx,
        |ctx| {
            let customers = Arc::clone(&customers);
            let request = request.clone();
            async move { customers.upsert_customer(&ctx, &request).await }
        },
    )
    .await?;
    to_json(&customer)
}

async fn update_order_status(fleet: Arc<AdapterFleet>, job: QueueJob) -> HandlerResult {
    let update: OrderStatusUpdate = job.payload.data_as()?;
    let ctx = context(&job, Some(StepName::Marketplace));
    let channel = Arc::clone(fleet.channel());
    let pushed = update.clone();
    call(&fleet, AdapterKind::SalesChannel, "push_order_status", &ctx, |ctx| {
        let channel = Arc::clone(&channel);
        let update = update.clone();
        async move { channel.push_order_status(&ctx, &update).await }
    })
    .await?;
    to_json(&pushed)
}

async fn sync_product(fleet: Arc<AdapterFleet>, job: QueueJob) -> HandlerResult {
    let sync: ProductSync = job.payload.data_as()?;
    let ctx = context(&job, None);
    let channel = Arc::clone(fleet.channel());
    let synced = sync.clone();
    call(&fleet, AdapterKind::SalesChannel, "sync_product", &ctx, |ctx| {
        let channel = Arc::clone(&channel);
        let sync = sync.clone();
        async move { channel.sync_product(&ctx, &sync).await }
    })
    .await?;
    to_json(&synced)
}
