//! Sync lock endpoints

use axum::{extract::State, http::StatusCode, routing::get, Json, Router};

use crate::auth::Authenticated;
use crate::error::{AppError, Result};
use crate::state::AppState;
use crate::sync::{CreateLockRequest, LockPatch, LockRepository, SyncLock};

/// Create the lock router
pub fn router() -> Router<AppState> {
    Router::new().route(
        "/lock",
        get(get_lock)
            .post(create_lock)
            .patch(update_lock)
            .delete(delete_lock),
    )
}

fn no_lock() -> AppError {
    AppError::NotFound("No sync lock for this account".to_string())
}

async fn get_lock(
    State(state): State<AppState>,
    Authenticated(account): Authenticated,
) -> Result<Json<SyncLock>> {
    let mut conn = state.db().acquire().await?;

    LockRepository::new(&mut conn)
        .get(&account.key)
        .await?
        .map(Json)
        .ok_or_else(no_lock)
}

async fn create_lock(
    State(state): State<AppState>,
    Authenticated(account): Authenticated,
    Json(request): Json<CreateLockRequest>,
) -> Result<(StatusCode, Json<SyncLock>)> {
    if request.acquired_by.trim().is_empty() {
        return Err(AppError::Validation("acquired_by is required".to_string()));
    }

    let mut conn = state.db().acquire().await?;
    let lock = LockRepository::new(&mut conn)
        .create(&account.key, &request.acquired_by, state.config().sync.lock_ttl())
        .await?;

    tracing::info!(account = %account.name, acquired_by = %lock.acquired_by, "Sync lock created");
    Ok((StatusCode::CREATED, Json(lock)))
}

async fn update_lock(
    State(state): State<AppState>,
    Authenticated(account): Authenticated,
    Json(patch): Json<LockPatch>,
) -> Result<Json<SyncLock>> {
    let mut conn = state.db().acquire().await?;

    LockRepository::new(&mut conn)
        .update(&account.key, &patch)
        .await?
        .map(Json)
        .ok_or_else(no_lock)
}

async fn delete_lock(
    State(state): State<AppState>,
    Authenticated(account): Authenticated,
) -> Result<StatusCode> {
    let mut conn = state.db().acquire().await?;

    if LockRepository::new(&mut conn).delete(&account.key).await? {
        tracing::info!(account = %account.name, "Sync lock deleted");
        Ok(StatusCode::NO_CONTENT)
    } else {
        Err(no_lock())
    }
}

#[cfg(test)]
mod tests {
    use crate::config::SyncStrategy;
    use crate::routes::testing::{app, body_json, request, send};
    use axum::body::Body;
    use axum::http::{header, StatusCode};
    use serde_json::json;

    fn json_request(method: &str, value: serde_json::Value) -> axum::http::Request<Body> {
        request(method, "/api/sync/lock")
            .header(header::CONTENT_TYPE, "application/json")
            .body(Body::from(value.to_string()))
            .unwrap()
    }

    fn empty_request(method: &str) -> axum::http::Request<Body> {
        request(method, "/api/sync/lock").body(Body::empty()).unwrap()
    }

    #[tokio::test]
    async fn test_lock_lifecycle() {
        let (app, _, _) = app(SyncStrategy::Merge).await;

        assert_eq!(send(&app, empty_request("GET")).await.status(), StatusCode::NOT_FOUND);

        let created = send(&app, json_request("POST", json!({ "acquired_by": "phone-1" }))).await;
        assert_eq!(created.status(), StatusCode::CREATED);
        let created = body_json(created).await;
        assert_eq!(created["status"], "pending");
        assert_eq!(created["retry_count"], 0);

        let again = send(&app, json_request("POST", json!({ "acquired_by": "tablet-1" }))).await;
        assert_eq!(again.status(), StatusCode::CONFLICT);

        let patched = send(&app, json_request("PATCH", json!({ "retry_count": 2 }))).await;
        assert_eq!(patched.status(), StatusCode::OK);
        let patched = body_json(patched).await;
        assert_eq!(patched["retry_count"], 2);
        assert_eq!(patched["status"], "pending");
        assert_eq!(patched["acquired_by"], "phone-1");

        assert_eq!(send(&app, empty_request("DELETE")).await.status(), StatusCode::NO_CONTENT);
        assert_eq!(send(&app, empty_request("DELETE")).await.status(), StatusCode::NOT_FOUND);
        assert_eq!(
            send(&app, json_request("PATCH", json!({ "status": "success" }))).await.status(),
            StatusCode::NOT_FOUND
        );
    }

    #[tokio::test]
    async fn test_invalid_patch_status_is_rejected() {
        let (app, _, _) = app(SyncStrategy::Merge).await;

        send(&app, json_request("POST", json!({ "acquired_by": "phone-1" }))).await;
        let response = send(&app, json_request("PATCH", json!({ "status": "done" }))).await;
        assert!(response.status().is_client_error());
    }
}
