//! JSON endpoints for the upload lifecycle of a store's files.

use crate::error::{ApiError, ApiResult};
use crate::handlers::common::{
    Actor, ChunkQuery, TokenQuery, authorize, parse_file_id, stage_chunk,
};
use crate::metrics;
use crate::state::AppState;
use crate::store::StoreError;
use axum::Json;
use axum::extract::{Path, Query, Request, State};
use futures::TryStreamExt;
use serde::{Deserialize, Serialize};
use std::time::Instant;
use stowage_core::{FileDescriptor, FileId, FileRecord, FileUpdate, extension_of};
use stowage_storage::{ByteStream, StorageError};

/// Response of file creation.
#[derive(Debug, Serialize, Deserialize)]
pub struct CreateFileResponse {
    pub file_id: FileId,
    pub token: String,
    /// Raw chunk endpoint of the file.
    pub url: String,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct ChunkResponse {
    pub bytes_written: u64,
}

#[derive(Debug, Deserialize)]
pub struct TokenRequest {
    pub token: String,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct OkResponse {
    pub ok: bool,
}

#[derive(Debug, Deserialize)]
pub struct ImportRequest {
    pub url: String,
    #[serde(default)]
    pub file: Option<FileDescriptor>,
}

/// POST /v1/stores/{store}/files - Create a file record and its upload token.
#[tracing::instrument(skip(state, actor, descriptor), fields(store = %store_name))]
pub async fn create_file(
    State(state): State<AppState>,
    Path(store_name): Path<String>,
    actor: Actor,
    Json(descriptor): Json<FileDescriptor>,
) -> ApiResult<Json<CreateFileResponse>> {
    let store = state.store(&store_name)?;
    let file = store.create(&descriptor, actor.id()).await?;
    let token = store.create_token(file.id).await?;

    tracing::info!(file_id = %file.id, size = file.size, "Upload created");

    Ok(Json(CreateFileResponse {
        file_id: file.id,
        token,
        url: store.url(&file.id.to_string()),
    }))
}

/// PUT /v1/stores/{store}/files/{file_id}/chunk - Append a chunk.
#[tracing::instrument(skip(state, query, req), fields(store = %store_name, file_id = %file_id))]
pub async fn write_chunk(
    State(state): State<AppState>,
    Path((store_name, file_id)): Path<(String, String)>,
    Query(query): Query<ChunkQuery>,
    req: Request,
) -> ApiResult<Json<ChunkResponse>> {
    let bytes_written = stage_chunk(&state, &store_name, &file_id, &query, req.into_body()).await?;
    Ok(Json(ChunkResponse { bytes_written }))
}

/// POST /v1/stores/{store}/files/{file_id}/complete - Move staged bytes into the store.
#[tracing::instrument(skip(state, body), fields(store = %store_name, file_id = %file_id))]
pub async fn complete_file(
    State(state): State<AppState>,
    Path((store_name, file_id)): Path<(String, String)>,
    Json(body): Json<TokenRequest>,
) -> ApiResult<Json<FileRecord>> {
    let store = state.store(&store_name)?;
    let id = parse_file_id(&file_id)?;
    authorize(&store, id, Some(&body.token)).await?;

    let started = Instant::now();
    let guard = state.staging.lock(id).await;

    let file = store
        .get(id)
        .await?
        .ok_or_else(|| ApiError::NotFound(format!("file {id} does not exist")))?;
    if file.complete {
        return Err(StoreError::AlreadyComplete(id).into());
    }

    let Some(mut staged) = state.staging.open(id).await.map_err(StorageError::Io)? else {
        tracing::warn!("No staged bytes for file, removing its record");
        metrics::record_upload_failure("missing_staging");
        state.metadata.delete_file(id).await?;
        drop(guard);
        state.staging.forget(id).await;
        return Err(ApiError::NotFound(format!("no staged data for file {id}")));
    };

    let result = store.write(staged.take_stream(), id).await;
    if let Err(e) = staged.discard().await {
        tracing::warn!(error = %e, "Failed to remove staging file");
    }
    drop(guard);
    state.staging.forget(id).await;

    let record = result?;
    metrics::COMPLETION_DURATION.observe(started.elapsed().as_secs_f64());
    Ok(Json(record))
}

/// POST /v1/stores/{store}/files/{file_id}/stop - Mark an upload as paused.
#[tracing::instrument(skip(state, actor, body), fields(store = %store_name, file_id = %file_id))]
pub async fn stop_upload(
    State(state): State<AppState>,
    Path((store_name, file_id)): Path<(String, String)>,
    actor: Actor,
    Json(body): Json<TokenRequest>,
) -> ApiResult<Json<OkResponse>> {
    let store = state.store(&store_name)?;
    let id = parse_file_id(&file_id)?;
    authorize(&store, id, Some(&body.token)).await?;

    let update = FileUpdate {
        uploading: Some(false),
        ..Default::default()
    };
    store.update(id, actor.id(), update).await?;
    Ok(Json(OkResponse { ok: true }))
}

/// DELETE /v1/stores/{store}/files/{file_id}?token= - Delete a file and its copies.
#[tracing::instrument(skip(state, actor, query), fields(store = %store_name, file_id = %file_id))]
pub async fn delete_file(
    State(state): State<AppState>,
    Path((store_name, file_id)): Path<(String, String)>,
    Query(query): Query<TokenQuery>,
    actor: Actor,
) -> ApiResult<Json<OkResponse>> {
    let store = state.store(&store_name)?;
    let id = parse_file_id(&file_id)?;
    authorize(&store, id, query.token.as_deref()).await?;

    store.delete(id, actor.id()).await?;
    tracing::info!("File deleted");
    Ok(Json(OkResponse { ok: true }))
}

/// GET /v1/stores/{store}/files/{file_id}?token= - Current state of a file.
pub async fn get_file_record(
    State(state): State<AppState>,
    Path((store_name, file_id)): Path<(String, String)>,
    Query(query): Query<TokenQuery>,
) -> ApiResult<Json<FileRecord>> {
    let store = state.store(&store_name)?;
    let id = parse_file_id(&file_id)?;
    authorize(&store, id, query.token.as_deref()).await?;

    let file = store
        .get(id)
        .await?
        .ok_or_else(|| ApiError::NotFound(format!("file {id} does not exist")))?;
    Ok(Json(file))
}

/// POST /v1/stores/{store}/import - Fetch a file over HTTP(S) into a store.
#[tracing::instrument(skip(state, actor, req), fields(store = %store_name, url = %req.url))]
pub async fn import_file(
    State(state): State<AppState>,
    Path(store_name): Path<String>,
    actor: Actor,
    Json(req): Json<ImportRequest>,
) -> ApiResult<Json<FileRecord>> {
    let store = state.store(&store_name)?;
    let url = reqwest::Url::parse(&req.url)
        .map_err(|e| ApiError::BadRequest(format!("invalid url: {e}")))?;
    if !matches!(url.scheme(), "http" | "https") {
        return Err(ApiError::BadRequest(format!(
            "unsupported url scheme {:?}",
            url.scheme()
        )));
    }

    let response = state
        .http
        .get(url.clone())
        .send()
        .await
        .and_then(|r| r.error_for_status())
        .map_err(|e| ApiError::BadGateway(format!("failed to fetch {url}: {e}")))?;

    let descriptor = import_descriptor(&url, req.file, response.content_length());
    let file = store.create(&descriptor, actor.id()).await?;

    let source: ByteStream = Box::pin(
        response
            .bytes_stream()
            .map_err(|e| StorageError::Io(std::io::Error::other(e))),
    );
    let record = store.write(source, file.id).await?;
    tracing::info!(file_id = %record.id, size = record.size, "File imported");
    Ok(Json(record))
}

/// Fill in what the client left out of an import descriptor.
///
/// A missing name is the last segment of the URL path; its extension picks
/// the content type. A missing size comes from the response length.
fn import_descriptor(
    url: &reqwest::Url,
    file: Option<FileDescriptor>,
    content_length: Option<u64>,
) -> FileDescriptor {
    let mut descriptor = file.unwrap_or_default();
    if descriptor.name.is_empty() {
        descriptor.name = url
            .path_segments()
            .and_then(|mut segments| segments.next_back())
            .filter(|s| !s.is_empty())
            .map(|s| {
                percent_encoding::percent_decode_str(s)
                    .decode_utf8_lossy()
                    .into_owned()
            })
            .unwrap_or_else(|| "file".to_string());
    }
    if descriptor.content_type.is_none() {
        descriptor.content_type = extension_of(&descriptor.name)
            .and_then(|ext| stowage_core::mime::lookup(&ext));
    }
    if descriptor.size == 0 {
        descriptor.size = content_length.unwrap_or(0);
    }
    descriptor
}
