//! API server entry point.

use std::sync::Arc;

use api::config::Config;
use api::state::AppState;
use queue::{AuditLog, InMemoryAuditLog, PostgresAuditLog};
use saga::{InMemorySagaStore, PostgresSagaStore, SagaStore};
use tokio::signal;
use tracing_subscriber::EnvFilter;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;

/// Waits for a shutdown signal (SIGINT or SIGTERM).
async fn shutdown_signal() {
    let ctrl_c = async {
        signal::ctrl_c()
            .await
            .expect("failed to install SIGINT handler");
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("failed to install SIGTERM handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {
            tracing::info!("received SIGINT, starting graceful shutdown");
        }
        () = terminate => {
            tracing::info!("received SIGTERM, starting graceful shutdown");
        }
    }
}

fn init_tracing(config: &Config) {
    let filter = EnvFilter::try_new(&config.log_level).unwrap_or_else(|_| EnvFilter::new("info"));
    let registry = tracing_subscriber::registry().with(filter);
    if config.log_json {
        registry
            .with(tracing_subscriber::fmt::layer().json())
            .init();
    } else {
        registry.with(tracing_subscriber::fmt::layer()).init();
    }
}

#[tokio::main]
async fn main() {
    let config = Config::from_env();

    // 1. Initialize tracing
    init_tracing(&config);

    // 2. Install Prometheus metrics recorder
    let metrics_handle = metrics_exporter_prometheus::PrometheusBuilder::new()
        .install_recorder()
        .expect("failed to install Prometheus recorder");

    // 3. Pick the saga store and audit log
    let (store, audit): (Arc<dyn SagaStore>, Arc<dyn AuditLog>) = match &config.database_url {
        Some(url) => {
            let pool = sqlx::postgres::PgPoolOptions::new()
                .max_connections(10)
                .connect(url)
                .await
                .expect("failed to connect to database");
            let store = PostgresSagaStore::new(pool.clone());
            store
                .run_migrations()
                .await
                .expect("failed to run migrations");
            tracing::info!("using PostgreSQL saga store and audit log");
            (
                Arc::new(store) as Arc<dyn SagaStore>,
                Arc::new(PostgresAuditLog::new(pool)) as Arc<dyn AuditLog>,
            )
        }
        None => {
            tracing::warn!("DATABASE_URL not set, sagas and audit entries are kept in memory");
            (
                Arc::new(InMemorySagaStore::new()) as Arc<dyn SagaStore>,
                Arc::new(InMemoryAuditLog::new()) as Arc<dyn AuditLog>,
            )
        }
    };

    // 4. Wire the engine and resume interrupted sagas
    let state = Arc::new(
        AppState::build(&config, store, audit).expect("failed to register job handlers"),
    );
    state.start();
    match state.orchestrator.recover().await {
        Ok(count) => tracing::info!(sagas = count, "resumed active sagas"),
        Err(e) => tracing::error!(error = %e, "saga recovery failed"),
    }
    let probes = Arc::clone(&state.fleet).spawn_probe_loop(config.probe_interval);

    // 5. Build the application
    let app = api::create_app(Arc::clone(&state), metrics_handle);

    // 6. Start server
    let addr = config.addr();
    tracing::info!(
        %addr,
        queue_durable = config.queue_durable,
        "starting API server"
    );

    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .expect("failed to bind address");
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .expect("server error");

    probes.abort();
    state.router.shutdown().await;
    tracing::info!("server shut down gracefully");
}
