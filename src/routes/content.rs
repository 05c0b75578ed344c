//! Blob sync endpoints
//!
//! The whole library travels as an opaque body. Reads honor
//! `If-None-Match`, writes honor `If-Match`; the server never merges.

use axum::{
    body::Bytes,
    extract::State,
    http::{header, HeaderMap, HeaderValue, StatusCode},
    response::{IntoResponse, Response},
    routing::get,
    Router,
};

use crate::auth::Authenticated;
use crate::error::{AppError, Result};
use crate::state::AppState;
use crate::sync::BlobRepository;

/// Create the blob content router
pub fn router() -> Router<AppState> {
    Router::new().route("/content", get(get_content).put(put_content))
}

/// Strip the quoting and weak marker of an entity tag
fn unquote(tag: &str) -> &str {
    let tag = tag.trim();
    let tag = tag.strip_prefix("W/").unwrap_or(tag);
    tag.strip_prefix('"')
        .and_then(|t| t.strip_suffix('"'))
        .unwrap_or(tag)
}

/// Whether a precondition header lists `etag` (or `*`)
fn precondition_matches(header: &str, etag: &str) -> bool {
    header
        .split(',')
        .map(unquote)
        .any(|candidate| candidate == "*" || candidate == etag)
}

fn etag_header(etag: &str) -> Result<HeaderValue> {
    HeaderValue::from_str(&format!("\"{}\"", etag))
        .map_err(|e| AppError::Internal(format!("Invalid ETag {:?}: {}", etag, e)))
}

fn header_str<'h>(headers: &'h HeaderMap, name: header::HeaderName) -> Result<Option<&'h str>> {
    headers
        .get(name.clone())
        .map(|value| {
            value
                .to_str()
                .map_err(|_| AppError::Validation(format!("Malformed {} header", name)))
        })
        .transpose()
}

/// Download the stored blob
async fn get_content(
    State(state): State<AppState>,
    Authenticated(account): Authenticated,
    headers: HeaderMap,
) -> Result<Response> {
    let mut conn = state.db().acquire().await?;
    let mut repo = BlobRepository::new(&mut conn);

    if let Some(if_none_match) = header_str(&headers, header::IF_NONE_MATCH)? {
        if let Some(etag) = repo.get_etag(&account.key).await? {
            if precondition_matches(if_none_match, &etag) {
                tracing::debug!(account = %account.name, etag = %etag, "Blob unchanged");
                return Ok((StatusCode::NOT_MODIFIED, [(header::ETAG, etag_header(&etag)?)]).into_response());
            }
        }
    }

    let (data, etag) = repo
        .get_blob_and_etag(&account.key)
        .await?
        .ok_or_else(|| AppError::NotFound("No library stored for this account".to_string()))?;

    Ok((
        StatusCode::OK,
        [
            (header::ETAG, etag_header(&etag)?),
            (
                header::CONTENT_TYPE,
                HeaderValue::from_static("application/octet-stream"),
            ),
        ],
        data,
    )
        .into_response())
}

/// Upload a new blob, optionally only over a known version
async fn put_content(
    State(state): State<AppState>,
    Authenticated(account): Authenticated,
    headers: HeaderMap,
    body: Bytes,
) -> Result<Response> {
    let mut conn = state.db().acquire().await?;
    let mut repo = BlobRepository::new(&mut conn);

    let new_etag = match header_str(&headers, header::IF_MATCH)? {
        None => Some(repo.set_blob(&account.key, &body).await?),
        Some(if_match) => {
            // The conditional write re-checks the tag, so a concurrent
            // writer between the read and the update still fails here
            let expected = repo
                .get_etag(&account.key)
                .await?
                .filter(|current| precondition_matches(if_match, current));

            match expected {
                Some(expected) => repo.set_blob_if_match(&account.key, &expected, &body).await?,
                None => None,
            }
        }
    };

    match new_etag {
        Some(etag) => {
            tracing::info!(
                account = %account.name,
                etag = %etag,
                bytes = body.len(),
                "Stored library blob"
            );
            Ok((StatusCode::OK, [(header::ETAG, etag_header(&etag)?)]).into_response())
        }
        None => {
            tracing::debug!(account = %account.name, "Blob precondition failed");
            Ok(StatusCode::PRECONDITION_FAILED.into_response())
        }
    }
}
