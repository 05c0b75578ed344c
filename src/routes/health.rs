//! Health check endpoints

use axum::{extract::State, Json};
use serde::Serialize;

use crate::config::SyncStrategy;
use crate::state::AppState;

#[derive(Serialize)]
pub struct HealthResponse {
    pub status: &'static str,
    pub version: &'static str,
    pub service: &'static str,
    pub strategy: SyncStrategy,
    pub database: bool,
}

pub async fn health_check(State(state): State<AppState>) -> Json<HealthResponse> {
    let database = sqlx::query("SELECT 1").execute(state.db()).await.is_ok();
    if !database {
        tracing::warn!("Health check could not reach the database");
    }

    Json(HealthResponse {
        status: if database { "healthy" } else { "degraded" },
        version: env!("CARGO_PKG_VERSION"),
        service: "manga-sync-server",
        strategy: state.config().sync.strategy,
        database,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::routes::testing::{app, body_json, send};
    use axum::body::Body;
    use axum::http::{Request, StatusCode};

    #[tokio::test]
    async fn test_health_needs_no_api_key() {
        let (app, _, _) = app(SyncStrategy::Blob).await;

        for uri in ["/health", "/api/health"] {
            let response = send(&app, Request::get(uri).body(Body::empty()).unwrap()).await;
            assert_eq!(response.status(), StatusCode::OK);

            let body = body_json(response).await;
            assert_eq!(body["status"], "healthy");
            assert_eq!(body["strategy"], "blob");
        }
    }
}
