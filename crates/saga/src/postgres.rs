//! PostgreSQL-backed saga store over the `sagas` table.

use async_trait::async_trait;
use common::{CorrelationId, OrderId};
use sqlx::{PgPool, Row, postgres::PgRow};
use uuid::Uuid;

use crate::error::{Result, SagaError};
use crate::instance::SagaInstance;
use crate::state::SagaStatus;
use crate::store::SagaStore;

const ACTIVE_STATUSES: [&str; 3] = ["received", "processing", "compensating"];

#[derive(Clone)]
pub struct PostgresSagaStore {
    pool: PgPool,
}

impl PostgresSagaStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    /// Runs the database migrations.
    pub async fn run_migrations(&self) -> std::result::Result<(), sqlx::migrate::MigrateError> {
        sqlx::migrate!("../../migrations").run(&self.pool).await
    }

    fn row_to_saga(row: PgRow) -> Result<SagaInstance> {
        let status: String = row.try_get("status")?;
        let status = SagaStatus::parse(&status)
            .ok_or_else(|| SagaError::Validation(format!("unknown saga status: {status}")))?;
        let correlation_id: String = row.try_get("correlation_id")?;

        Ok(SagaInstance {
            order_id: OrderId::from_uuid(row.try_get::<Uuid, _>("order_id")?),
            correlation_id: CorrelationId::from(correlation_id),
            status,
            steps: serde_json::from_value(row.try_get("steps")?)?,
            request: serde_json::from_value(row.try_get("request")?)?,
            needs_intervention: row.try_get("needs_intervention")?,
            created_at: row.try_get("created_at")?,
            updated_at: row.try_get("updated_at")?,
        })
    }
}

#[async_trait]
impl SagaStore for PostgresSagaStore {
    async fn save(&self, saga: &SagaInstance) -> Result<()> {
        let steps = serde_json::to_value(saga.steps())?;
        let request = serde_json::to_value(saga.request())?;

        sqlx::query(
            r#"
            INSERT INTO sagas
                (order_id, correlation_id, status, needs_intervention, request, steps, created_at, updated_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
            ON CONFLICT (order_id) DO UPDATE SET
                status = EXCLUDED.status,
                needs_intervention = EXCLUDED.needs_intervention,
                steps = EXCLUDED.steps,
                updated_at = EXCLUDED.updated_at
            "#,
        )
        .bind(saga.order_id().as_uuid())
        .bind(saga.correlation_id().as_str())
        .bind(saga.status().as_str())
        .bind(saga.needs_intervention())
        .bind(request)
        .bind(steps)
        .bind(saga.created_at())
        .bind(saga.updated_at())
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn load(&self, order_id: OrderId) -> Result<Option<SagaInstance>> {
        let row = sqlx::query("SELECT * FROM sagas WHERE order_id = $1")
            .bind(order_id.as_uuid())
            .fetch_optional(&self.pool)
            .await?;
        row.map(Self::row_to_saga).transpose()
    }

    async fn list_active(&self) -> Result<Vec<SagaInstance>> {
        let rows = sqlx::query(
            r#"
            SELECT * FROM sagas
            WHERE NOT archived AND status = ANY($1)
            ORDER BY created_at ASC
            "#,
        )
        .bind(&ACTIVE_STATUSES[..])
        .fetch_all(&self.pool)
        .await?;
        rows.into_iter().map(Self::row_to_saga).collect()
    }

    async fn list(&self, limit: usize) -> Result<Vec<SagaInstance>> {
        let rows = sqlx::query(
            "SELECT * FROM sagas WHERE NOT archived ORDER BY created_at DESC LIMIT $1",
        )
        .bind(limit as i64)
        .fetch_all(&self.pool)
        .await?;
        rows.into_iter().map(Self::row_to_saga).collect()
    }

    async fn archive(&self, order_id: OrderId) -> Result<bool> {
        let result = sqlx::query("UPDATE sagas SET archived = TRUE WHERE order_id = $1")
            .bind(order_id.as_uuid())
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected() > 0)
    }
}
