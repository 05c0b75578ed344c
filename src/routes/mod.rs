//! Route modules for the manga sync server

pub mod content;
pub mod devices;
pub mod health;
pub mod lock;
pub mod sync;

use axum::{extract::DefaultBodyLimit, routing::get, Router};
use std::time::Duration;
use tower_http::cors::{Any, CorsLayer};
use tower_http::timeout::TimeoutLayer;
use tower_http::trace::TraceLayer;

use crate::config::SyncStrategy;
use crate::state::AppState;

/// Libraries with many manga exceed axum's default body limit
const MAX_LIBRARY_BYTES: usize = 100 * 1024 * 1024;

/// Build the application router
pub fn router(state: AppState) -> Router {
    let strategy = state.config().sync.strategy;
    let request_timeout = Duration::from_secs(state.config().server.request_timeout_secs);

    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any)
        .expose_headers(Any);

    Router::new()
        .route("/health", get(health::health_check))
        .route("/api/health", get(health::health_check))
        .nest("/api/sync", sync_router(strategy))
        .nest("/api/devices", devices::router())
        .layer(TraceLayer::new_for_http())
        .layer(TimeoutLayer::new(request_timeout))
        .layer(cors)
        .with_state(state)
}

/// Routes under `/api/sync`; only the configured strategy's data path is mounted
fn sync_router(strategy: SyncStrategy) -> Router<AppState> {
    let data = match strategy {
        SyncStrategy::Merge => sync::data_router(),
        SyncStrategy::Blob => content::router(),
    };

    Router::new()
        .merge(sync::router())
        .merge(lock::router())
        .merge(data.layer(DefaultBodyLimit::max(MAX_LIBRARY_BYTES)))
}
