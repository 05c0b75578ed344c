//! Device listing endpoint

use axum::{extract::State, routing::get, Json, Router};

use crate::auth::Authenticated;
use crate::db::{Device, DeviceRepository};
use crate::error::Result;
use crate::state::AppState;

/// Create the devices router
pub fn router() -> Router<AppState> {
    Router::new().route("/", get(list_devices))
}

/// List the account's devices, most recently synced first
async fn list_devices(
    State(state): State<AppState>,
    Authenticated(account): Authenticated,
) -> Result<Json<Vec<Device>>> {
    let mut conn = state.db().acquire().await?;
    let devices = DeviceRepository::new(&mut conn).list(&account.key).await?;

    Ok(Json(devices))
}

#[cfg(test)]
mod tests {
    use crate::config::SyncStrategy;
    use crate::db::{ClientDevice, DeviceRepository};
    use crate::routes::testing::{app, body_json, request, send, KEY};
    use axum::body::Body;
    use axum::http::StatusCode;

    #[tokio::test]
    async fn test_list_devices() {
        let (app, state, _) = app(SyncStrategy::Merge).await;

        let mut conn = state.db().acquire().await.unwrap();
        DeviceRepository::new(&mut conn)
            .resolve(
                KEY,
                &ClientDevice {
                    id: "phone-1".to_string(),
                    name: Some("Pixel".to_string()),
                },
            )
            .await
            .unwrap();
        drop(conn);

        let response = send(&app, request("GET", "/api/devices").body(Body::empty()).unwrap()).await;
        assert_eq!(response.status(), StatusCode::OK);

        let body = body_json(response).await;
        assert_eq!(body[0]["id"], "phone-1");
        assert_eq!(body[0]["name"], "Pixel");
        assert!(body[0].get("row_id").is_none());
    }
}
