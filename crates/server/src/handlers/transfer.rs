//! Raw HTTP transfer routes, mounted under `/{stores_path}`.
//!
//! `POST /{store}/{file_id}?token=&progress=` appends a chunk.
//! `GET /{store}/{file_id}[.ext]` and `GET /{store}/{file_id}/{name}` serve a
//! complete file.

use crate::compression::{Encoding, encode_stream};
use crate::error::{ApiError, ApiResult};
use crate::handlers::common::{ChunkQuery, parse_file_id, stage_chunk};
use crate::state::AppState;
use axum::body::Body;
use axum::extract::{Path, Query, Request, State};
use axum::http::header::{ACCEPT_ENCODING, CONTENT_ENCODING, CONTENT_LENGTH, CONTENT_TYPE};
use axum::http::{HeaderMap, HeaderValue, StatusCode};
use axum::response::{IntoResponse, Response};

/// POST /{stores_path}/{store}/{file_id} - Append a chunk.
#[tracing::instrument(skip(state, query, req), fields(store = %store, file_id = %file_id))]
pub async fn post_chunk(
    State(state): State<AppState>,
    Path((store, file_id)): Path<(String, String)>,
    Query(query): Query<ChunkQuery>,
    req: Request,
) -> ApiResult<Response> {
    stage_chunk(&state, &store, &file_id, &query, req.into_body()).await?;
    Ok((StatusCode::NO_CONTENT, [(CONTENT_TYPE, "text/plain")]).into_response())
}

/// GET /{stores_path}/{store}/{file_id} - Serve a file. A trailing extension is ignored.
pub async fn get_file(
    State(state): State<AppState>,
    Path((store, file_id)): Path<(String, String)>,
    headers: HeaderMap,
) -> ApiResult<Response> {
    serve(&state, &store, &file_id, &headers).await
}

/// GET /{stores_path}/{store}/{file_id}/{name} - Serve a file under its name.
pub async fn get_named_file(
    State(state): State<AppState>,
    Path((store, file_id, _name)): Path<(String, String, String)>,
    headers: HeaderMap,
) -> ApiResult<Response> {
    serve(&state, &store, &file_id, &headers).await
}

#[tracing::instrument(skip(state, request_headers), fields(store = %store_name))]
async fn serve(
    state: &AppState,
    store_name: &str,
    file_id: &str,
    request_headers: &HeaderMap,
) -> ApiResult<Response> {
    let store = state.store(store_name)?;
    let raw_id = file_id.split_once('.').map_or(file_id, |(id, _)| id);
    let id = parse_file_id(raw_id)?;

    let file = store
        .get(id)
        .await?
        .filter(|f| f.complete)
        .ok_or_else(|| ApiError::NotFound(format!("file {id} does not exist")))?;

    if let Some(delay) = state.config.server.simulate_read_delay() {
        tokio::time::sleep(delay).await;
    }

    if !store.allows_read(&file, request_headers) {
        return Err(ApiError::Forbidden("read denied".to_string()));
    }

    let mut headers = HeaderMap::new();
    let content_type = file
        .content_type
        .as_deref()
        .and_then(|t| HeaderValue::from_str(t).ok())
        .unwrap_or_else(|| HeaderValue::from_static("application/octet-stream"));
    headers.insert(CONTENT_TYPE, content_type);
    headers.insert(CONTENT_LENGTH, HeaderValue::from(file.size));

    let stream = store.read(&file, &mut headers).await?;

    let encoding = Encoding::negotiate(request_headers.get(ACCEPT_ENCODING));
    if let Some(value) = encoding.header_value() {
        headers.remove(CONTENT_LENGTH);
        headers.insert(CONTENT_ENCODING, HeaderValue::from_static(value));
    }
    let body = Body::from_stream(encode_stream(stream, encoding));

    Ok((StatusCode::OK, headers, body).into_response())
}
