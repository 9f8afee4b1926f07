//! Worker process entry point.
//!
//! Starts two supervised tasks in one address space: the queue poller and
//! the HTTP facade. They share the database pool, the blob store, and the
//! model cache, and coordinate only through durable state in the database.

use std::sync::Arc;
use std::time::Duration;

use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing::info;
use tracing_subscriber::EnvFilter;

use biomarker_worker::api::{build_router, AppState};
use biomarker_worker::bundle::ModelCache;
use biomarker_worker::config::Settings;
use biomarker_worker::db::{connect_pool, DatabaseConfig, Gateway};
use biomarker_worker::queue::{run_poller, QueueClient};
use biomarker_worker::runner::WorkerContext;
use biomarker_worker::storage::BlobStore;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    let settings = Settings::from_env()?;

    let pool = connect_pool(&DatabaseConfig::new(settings.database_url.clone())).await?;
    let gateway = Gateway::new(pool);
    let storage = BlobStore::from_settings(&settings).await;
    let queue = QueueClient::new(&settings);
    let models = Arc::new(ModelCache::new());

    let poll_interval = Duration::from_secs_f64(settings.poll_interval_seconds);
    let poller = tokio::spawn(run_poller(
        WorkerContext {
            gateway: gateway.clone(),
            storage: storage.clone(),
        },
        queue,
        poll_interval,
    ));

    let state = AppState {
        gateway,
        storage,
        models,
        settings: Arc::new(settings.clone()),
    };
    let app = build_router(state)
        .layer(
            CorsLayer::new()
                .allow_origin(Any)
                .allow_methods(Any)
                .allow_headers(Any),
        )
        .layer(TraceLayer::new_for_http());

    let listener = tokio::net::TcpListener::bind(&settings.bind_addr).await?;
    info!("worker listening on {}", settings.bind_addr);
    axum::serve(listener, app).await?;

    poller.abort();
    Ok(())
}
