//! PostgreSQL saga store tests.
//!
//! These need Docker and are ignored by default. Run with:
//!
//! ```bash
//! cargo test -p saga --test postgres_store -- --ignored --test-threads=1
//! ```

use std::sync::Arc;

use common::{CorrelationId, JobId, OrderId};
use saga::{
    CustomerInfo, OrderItem, OrderRequest, PostgresSagaStore, SagaInstance, SagaStatus,
    SagaStore, StepName, StepStatus,
};
use sqlx::PgPool;
use testcontainers::{ContainerAsync, runners::AsyncRunner};
use testcontainers_modules::postgres::Postgres;
use tokio::sync::OnceCell;

struct ContainerInfo {
    #[allow(dead_code)] // Container must stay alive for tests
    container: ContainerAsync<Postgres>,
    connection_string: String,
}

static CONTAINER: OnceCell<Arc<ContainerInfo>> = OnceCell::const_new();

async fn get_container_info() -> Arc<ContainerInfo> {
    CONTAINER
        .get_or_init(|| async {
            let container = Postgres::default().start().await.unwrap();
            let host = container.get_host().await.unwrap();
            let port = container.get_host_port_ipv4(5432).await.unwrap();
            let connection_string =
                format!("postgres://postgres:postgres@{}:{}/postgres", host, port);

            let pool = PgPool::connect(&connection_string).await.unwrap();
            PostgresSagaStore::new(pool.clone())
                .run_migrations()
                .await
                .unwrap();
            pool.close().await;

            Arc::new(ContainerInfo {
                container,
                connection_string,
            })
        })
        .await
        .clone()
}

async fn get_test_store() -> PostgresSagaStore {
    let info = get_container_info().await;
    let pool = sqlx::postgres::PgPoolOptions::new()
        .max_connections(5)
        .connect(&info.connection_string)
        .await
        .unwrap();
    sqlx::query("TRUNCATE sagas").execute(&pool).await.unwrap();
    PostgresSagaStore::new(pool)
}

fn saga() -> SagaInstance {
    SagaInstance::new(
        OrderId::new(),
        CorrelationId::new(),
        OrderRequest {
            items: vec![OrderItem {
                product_id: "PROD-001".to_string(),
                quantity: 2,
                unit_price_cents: 500,
                description: None,
            }],
            customer: CustomerInfo {
                email: "ada@example.com".to_string(),
                first_name: "Ada".to_string(),
                last_name: String::new(),
            },
            source: Some("shopify".to_string()),
        },
    )
}

#[tokio::test]
#[ignore = "requires Docker"]
async fn test_save_and_load_round_trips_steps() {
    let store = get_test_store().await;
    let mut saga = saga();
    let job_id = JobId::new();
    saga.mark_queued(StepName::Inventory, job_id).unwrap();
    saga.complete_step(StepName::Inventory, serde_json::json!({ "reservationId": "RES-1" }))
        .unwrap();
    store.save(&saga).await.unwrap();

    let loaded = store.load(saga.order_id()).await.unwrap().unwrap();
    assert_eq!(loaded.status(), SagaStatus::Processing);
    assert_eq!(loaded.correlation_id(), saga.correlation_id());
    assert_eq!(loaded.request(), saga.request());
    assert_eq!(loaded.step(StepName::Inventory).status, StepStatus::Completed);
    assert_eq!(loaded.step(StepName::Inventory).job_id, Some(job_id));
    assert_eq!(loaded.step(StepName::Invoice).status, StepStatus::Pending);

    assert!(store.load(OrderId::new()).await.unwrap().is_none());
}

#[tokio::test]
#[ignore = "requires Docker"]
async fn test_save_updates_existing_row() {
    let store = get_test_store().await;
    let mut saga = saga();
    store.save(&saga).await.unwrap();

    saga.mark_queued(StepName::Inventory, JobId::new()).unwrap();
    saga.fail_step(StepName::Inventory, "out of stock").unwrap();
    store.save(&saga).await.unwrap();

    let loaded = store.load(saga.order_id()).await.unwrap().unwrap();
    assert_eq!(loaded.status(), SagaStatus::Failed);
    assert_eq!(
        loaded.step(StepName::Inventory).error.as_deref(),
        Some("out of stock")
    );
    assert_eq!(store.list(10).await.unwrap().len(), 1);
}

#[tokio::test]
#[ignore = "requires Docker"]
async fn test_list_active_skips_terminal_and_archived() {
    let store = get_test_store().await;

    let active = saga();
    store.save(&active).await.unwrap();

    let mut failed = saga();
    failed.mark_queued(StepName::Inventory, JobId::new()).unwrap();
    failed.fail_step(StepName::Inventory, "boom").unwrap();
    store.save(&failed).await.unwrap();

    let listed = store.list_active().await.unwrap();
    assert_eq!(listed.len(), 1);
    assert_eq!(listed[0].order_id(), active.order_id());

    assert!(store.archive(failed.order_id()).await.unwrap());
    assert!(!store.archive(OrderId::new()).await.unwrap());
    let all = store.list(10).await.unwrap();
    assert_eq!(all.len(), 1);
    assert_eq!(all[0].order_id(), active.order_id());
}
