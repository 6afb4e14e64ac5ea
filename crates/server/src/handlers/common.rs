//! Shared handler helpers.

use crate::error::{ApiError, ApiResult};
use crate::metrics;
use crate::state::AppState;
use crate::store::{Store, StoreError};
use axum::body::Body;
use axum::extract::FromRequestParts;
use axum::http::request::Parts;
use serde::Deserialize;
use std::convert::Infallible;
use stowage_core::FileId;

/// Header carrying the id of the user acting on a file.
pub const USER_ID_HEADER: &str = "x-user-id";

/// The user a request acts for, taken from `X-User-Id`.
///
/// Authentication is out of scope; the id only feeds store permissions.
#[derive(Clone, Debug, Default)]
pub struct Actor(pub Option<String>);

impl Actor {
    pub fn id(&self) -> Option<&str> {
        self.0.as_deref()
    }
}

impl<S: Send + Sync> FromRequestParts<S> for Actor {
    type Rejection = Infallible;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        let id = parts
            .headers
            .get(USER_ID_HEADER)
            .and_then(|v| v.to_str().ok())
            .map(str::trim)
            .filter(|v| !v.is_empty())
            .map(str::to_string);
        Ok(Self(id))
    }
}

/// Query of the chunk endpoints.
#[derive(Debug, Default, Deserialize)]
pub struct ChunkQuery {
    pub token: Option<String>,
    /// Fraction of the file sent once this chunk lands. Unparseable values
    /// are ignored.
    pub progress: Option<String>,
}

impl ChunkQuery {
    pub fn progress(&self) -> Option<f64> {
        self.progress
            .as_deref()
            .and_then(|p| p.trim().parse::<f64>().ok())
            .filter(|p| p.is_finite() && *p > 0.0)
            .map(|p| p.min(1.0))
    }
}

/// Query carrying only a token.
#[derive(Debug, Default, Deserialize)]
pub struct TokenQuery {
    pub token: Option<String>,
}

/// Parse a file id from a path segment. Unparseable ids cannot exist.
pub fn parse_file_id(raw: &str) -> ApiResult<FileId> {
    FileId::parse(raw).map_err(|_| ApiError::NotFound(format!("file {raw:?} does not exist")))
}

/// Reject the request unless `token` is the upload token of `id`.
pub async fn authorize(store: &Store, id: FileId, token: Option<&str>) -> ApiResult<()> {
    let token = token.ok_or_else(|| ApiError::Forbidden("missing token".to_string()))?;
    if !store.check_token(token, id).await? {
        return Err(ApiError::Forbidden("invalid token".to_string()));
    }
    Ok(())
}

/// Append one chunk to the staging file of `file_id` and record progress.
///
/// Checks, in order: store exists, token is valid, body fits, record exists
/// and is not complete. The record checks run under the file lock so a
/// chunk queued behind completion or deletion never reaches the staging
/// file. Returns the number of bytes appended.
pub async fn stage_chunk(
    state: &AppState,
    store_name: &str,
    file_id: &str,
    query: &ChunkQuery,
    body: Body,
) -> ApiResult<u64> {
    let store = state.store(store_name)?;
    let id = parse_file_id(file_id)?;
    authorize(&store, id, query.token.as_deref()).await?;

    let data = axum::body::to_bytes(body, state.config.server.max_chunk_bytes)
        .await
        .map_err(|e| {
            metrics::record_upload_failure("chunk_body");
            ApiError::PayloadTooLarge(format!("chunk body rejected: {e}"))
        })?;

    let guard = state.staging.lock(id).await;
    let rejection = match store.get(id).await? {
        None => Some(ApiError::NotFound(format!("file {id} does not exist"))),
        Some(file) if file.complete => Some(StoreError::AlreadyComplete(id).into()),
        Some(_) => None,
    };
    if let Some(rejection) = rejection {
        drop(guard);
        state.staging.forget(id).await;
        return Err(rejection);
    }

    if let Err(e) = state.staging.append(id, &data).await {
        tracing::error!(
            file_id = %id,
            store = %store.name(),
            error = %e,
            "Failed to append chunk to staging file"
        );
        metrics::record_upload_failure("stage");
        if let Err(e) = state.staging.remove(id).await {
            tracing::warn!(file_id = %id, error = %e, "Failed to remove staging file");
        }
        return Err(ApiError::Internal("failed to stage chunk".to_string()));
    }
    store.record_progress(id, query.progress()).await?;
    drop(guard);

    metrics::CHUNKS_RECEIVED.inc();
    metrics::BYTES_STAGED.inc_by(data.len() as u64);
    Ok(data.len() as u64)
}
