//! Herdwatch - farm-scoped cattle health monitoring.
//!
//! # API Endpoints
//!
//! - `POST /farms` - Register a farm
//! - `GET /farms/{farm}` - Farm with healthy/at-risk counts
//! - `POST /farms/{farm}/reconcile` - Recompute farm counts
//! - `GET|POST /farms/{farm}/cattle` - List or register cattle
//! - `GET /farms/{farm}/cattle/stats` - Average vitals per animal
//! - `GET|PATCH|DELETE /farms/{farm}/cattle/{id}` - One cattle record
//! - `GET|POST /farms/{farm}/cattle/{id}/readings` - Reading history / new reading
//! - `PATCH /farms/{farm}/cattle/{id}/reset-health` - Reset counters
//! - `GET /farms/{farm}/cattle/{id}/prediction` - Latest cached prediction
//! - `GET /health` - Health check

use std::net::SocketAddr;
use std::sync::Arc;

use tokio::net::TcpListener;
use tower::ServiceBuilder;
use tower_http::trace::TraceLayer;
use tracing::info;
use tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt};

use herdwatch::aggregation::HealthAggregator;
use herdwatch::api::{AppState, router};
use herdwatch::cache::PredictionCache;
use herdwatch::classifier::HttpClassifier;
use herdwatch::config::Config;
use herdwatch::storage::Storage;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::registry()
        .with(fmt::layer())
        .with(EnvFilter::from_default_env().add_directive("herdwatch=info".parse()?))
        .init();

    let config = Config::from_env()?;

    info!(
        port = config.port,
        db_url = %config.database_url,
        classifier_url = %config.classifier_url,
        fallback = %config.fallback,
        "Starting Herdwatch server"
    );

    let storage = Storage::new(&config.database_url).await?;
    info!("Database initialized");

    let classifier =
        HttpClassifier::with_base_url(&config.classifier_url, config.classifier_timeout)?;
    let cache = PredictionCache::new(config.prediction_cache_capacity);
    let aggregator = HealthAggregator::new(storage, Arc::new(classifier), config.fallback, cache);

    let app = router(AppState::new(aggregator))
        .layer(ServiceBuilder::new().layer(TraceLayer::new_for_http()));

    let addr = SocketAddr::from(([0, 0, 0, 0], config.port));
    let listener = TcpListener::bind(addr).await?;

    info!(%addr, "Herdwatch is listening");

    axum::serve(listener, app).await?;

    Ok(())
}
