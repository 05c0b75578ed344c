//! Sync API endpoints
//!
//! Provides the granular merge endpoint, the account's sync status and
//! device-reported lifecycle events.

use axum::{
    extract::State,
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};

use crate::auth::Authenticated;
use crate::error::{AppError, Result};
use crate::library::LibrarySnapshot;
use crate::notify::NotificationEvent;
use crate::state::AppState;
use crate::sync::{EventReport, SnapshotRepository, SyncAttempt, SyncDataRequest, SyncRecord, SyncRepository};

/// Routes shared by both strategies
pub fn router() -> Router<AppState> {
    Router::new()
        .route("/", get(get_status))
        .route("/event", post(report_event))
}

/// Granular merge data path
pub fn data_router() -> Router<AppState> {
    Router::new().route("/data", get(get_library).post(sync_data))
}

/// Merge a device's library into the account's
async fn sync_data(
    State(state): State<AppState>,
    Authenticated(account): Authenticated,
    Json(request): Json<SyncDataRequest>,
) -> Result<Response> {
    tracing::debug!(
        account = %account.name,
        device_id = %request.device.id,
        manga = request.backup.manga.len(),
        "Sync requested"
    );

    match state.coordinator().sync_data(&account, request).await? {
        SyncAttempt::Synced(response) => Ok(Json(response).into_response()),
        SyncAttempt::LockHeld(lock) => Ok((StatusCode::CONFLICT, Json(lock)).into_response()),
    }
}

/// Get the stored library
async fn get_library(
    State(state): State<AppState>,
    Authenticated(account): Authenticated,
) -> Result<Json<LibrarySnapshot>> {
    let mut conn = state.db().acquire().await?;

    SnapshotRepository::new(&mut conn)
        .get(&account.key)
        .await?
        .map(Json)
        .ok_or_else(|| AppError::NotFound("No library stored for this account".to_string()))
}

/// Get the account's sync record
async fn get_status(
    State(state): State<AppState>,
    Authenticated(account): Authenticated,
) -> Result<Json<SyncRecord>> {
    let mut conn = state.db().acquire().await?;

    SyncRepository::new(&mut conn)
        .get(&account.key)
        .await?
        .map(Json)
        .ok_or_else(|| AppError::NotFound("Account has not synced yet".to_string()))
}

/// Forward a device-reported event to the notification senders
async fn report_event(
    State(state): State<AppState>,
    Authenticated(account): Authenticated,
    Json(report): Json<EventReport>,
) -> Result<StatusCode> {
    let event: NotificationEvent = report.event.parse().map_err(AppError::Validation)?;

    tracing::info!(account = %account.name, event = %event, "Device reported sync event");
    state.notifier().sync_event(
        event,
        &account.name,
        report.device_name.as_deref(),
        report.message.as_deref(),
    );

    Ok(StatusCode::NO_CONTENT)
}

#[cfg(test)]
mod tests {
    use crate::config::SyncStrategy;
    use crate::notify::NotificationEvent;
    use crate::routes::testing::{app, body_json, request, send, KEY};
    use crate::sync::LockRepository;
    use axum::body::Body;
    use axum::http::{header, StatusCode};
    use serde_json::json;

    fn json_body(value: serde_json::Value) -> Body {
        Body::from(value.to_string())
    }

    fn upload(claim: i64, read: bool, modified: i64) -> serde_json::Value {
        json!({
            "sync": { "last_synced_epoch": claim },
            "device": { "id": "phone-1", "name": "Pixel" },
            "backup": {
                "backupManga": [{
                    "source": 1,
                    "url": "/manga/1",
                    "title": "Manga",
                    "customCover": "kept",
                    "lastModifiedAt": modified,
                    "chapters": [{
                        "url": "/manga/1/1",
                        "name": "Chapter 1",
                        "chapterNumber": 1.0,
                        "read": read,
                        "lastModifiedAt": modified
                    }]
                }],
                "backupCategories": [{ "name": "Reading", "order": 0, "flags": 0 }]
            }
        })
    }

    #[tokio::test]
    async fn test_sync_data_round_trip() {
        let (app, _, mut recorded) = app(SyncStrategy::Merge).await;

        let status = send(&app, request("GET", "/api/sync").body(Body::empty()).unwrap()).await;
        assert_eq!(status.status(), StatusCode::NOT_FOUND);

        let response = send(
            &app,
            request("POST", "/api/sync/data")
                .header(header::CONTENT_TYPE, "application/json")
                .body(json_body(upload(1_000, false, 10)))
                .unwrap(),
        )
        .await;
        assert_eq!(response.status(), StatusCode::OK);
        let body = body_json(response).await;
        assert_eq!(body["update_required"], false);
        assert!(body.get("backup").is_none());
        assert_eq!(body["sync"]["last_synced_epoch"], 1_000);

        let response = send(
            &app,
            request("POST", "/api/sync/data")
                .header(header::CONTENT_TYPE, "application/json")
                .body(json_body(upload(5_000, true, 20)))
                .unwrap(),
        )
        .await;
        let body = body_json(response).await;
        assert_eq!(body["update_required"], true);
        let manga = &body["backup"]["backupManga"][0];
        assert_eq!(manga["chapters"][0]["read"], true);
        assert_eq!(manga["customCover"], "kept");

        let library = send(&app, request("GET", "/api/sync/data").body(Body::empty()).unwrap()).await;
        let library = body_json(library).await;
        assert_eq!(library["backupCategories"][0]["name"], "Reading");

        let status = send(&app, request("GET", "/api/sync").body(Body::empty()).unwrap()).await;
        assert_eq!(body_json(status).await["device_id"], "phone-1");

        assert_eq!(
            recorded.next(4).await,
            vec![
                NotificationEvent::Started,
                NotificationEvent::Success,
                NotificationEvent::Started,
                NotificationEvent::Success,
            ]
        );
    }

    #[tokio::test]
    async fn test_sync_data_reports_held_lock() {
        let (app, state, _) = app(SyncStrategy::Merge).await;

        let mut conn = state.db().acquire().await.unwrap();
        LockRepository::new(&mut conn)
            .create(KEY, "tablet-1", chrono::Duration::minutes(5))
            .await
            .unwrap();
        drop(conn);

        let response = send(
            &app,
            request("POST", "/api/sync/data")
                .header(header::CONTENT_TYPE, "application/json")
                .body(json_body(upload(1_000, false, 10)))
                .unwrap(),
        )
        .await;

        assert_eq!(response.status(), StatusCode::CONFLICT);
        let body = body_json(response).await;
        assert_eq!(body["acquired_by"], "tablet-1");
        assert_eq!(body["status"], "pending");
    }

    #[tokio::test]
    async fn test_report_event() {
        let (app, _, mut recorded) = app(SyncStrategy::Blob).await;

        let response = send(
            &app,
            request("POST", "/api/sync/event")
                .header(header::CONTENT_TYPE, "application/json")
                .body(json_body(json!({ "event": "SYNC_FAILED", "device_name": "Pixel", "message": "no space" })))
                .unwrap(),
        )
        .await;
        assert_eq!(response.status(), StatusCode::NO_CONTENT);
        assert_eq!(recorded.next(1).await, vec![NotificationEvent::Failed]);

        let response = send(
            &app,
            request("POST", "/api/sync/event")
                .header(header::CONTENT_TYPE, "application/json")
                .body(json_body(json!({ "event": "exploded" })))
                .unwrap(),
        )
        .await;
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        recorded.assert_quiet().await;
    }
}
