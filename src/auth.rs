//! API key authentication
//!
//! Every sync route runs on behalf of the account owning the request's key,
//! taken from the `X-API-Token` header or the `apikey` query parameter.

use axum::{
    async_trait,
    extract::{FromRequestParts, Query},
    http::request::Parts,
};
use serde::Deserialize;

use crate::db::{Account, AccountRepository};
use crate::error::AppError;
use crate::state::AppState;

pub const API_KEY_HEADER: &str = "X-API-Token";

#[derive(Debug, Default, Deserialize)]
struct ApiKeyQuery {
    #[serde(default)]
    apikey: Option<String>,
}

/// The account a request is authenticated as
#[derive(Debug, Clone)]
pub struct Authenticated(pub Account);

fn api_key(parts: &Parts) -> Option<String> {
    let from_header = parts
        .headers
        .get(API_KEY_HEADER)
        .and_then(|value| value.to_str().ok())
        .map(str::trim)
        .filter(|key| !key.is_empty())
        .map(str::to_string);

    from_header.or_else(|| {
        Query::<ApiKeyQuery>::try_from_uri(&parts.uri)
            .ok()
            .and_then(|Query(query)| query.apikey)
            .filter(|key| !key.is_empty())
    })
}

#[async_trait]
impl FromRequestParts<AppState> for Authenticated {
    type Rejection = AppError;

    async fn from_request_parts(parts: &mut Parts, state: &AppState) -> Result<Self, Self::Rejection> {
        let key = api_key(parts)
            .ok_or_else(|| AppError::Validation(format!("Missing {} header", API_KEY_HEADER)))?;

        let mut conn = state.db().acquire().await?;
        let account = AccountRepository::new(&mut conn)
            .get(&key)
            .await?
            .ok_or_else(|| AppError::Unauthorized("Unknown API key".to_string()))?;

        Ok(Authenticated(account))
    }
}
