//! Handler functions for every path in the route table (§6.1).

use std::sync::Arc;
use std::time::Duration;

use axum::extract::{Path, State};
use axum::http::{HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};

use crate::error::IndexError;
use crate::storage::types::{validate_doc_id, UpdateBatch};

use super::dto::{
    Empty, FingerprintVersionResponse, HealthResponse, IndexInfoResponse, PutFingerprintRequest,
    ScoredDocDto, SearchRequest, SearchResponse,
};
use super::{decode_body, ApiError, AppState, Encoded, Encoding};

type AppResult<T> = Result<T, ApiError>;

/// Runs blocking engine work (segment I/O, scans, oplog appends) on the
/// blocking thread pool so it never stalls the async reactor, per the
/// scheduling contract's "segment I/O is dispatched via `spawn_blocking`".
async fn blocking<T, F>(f: F) -> AppResult<T>
where
    F: FnOnce() -> Result<T, IndexError> + Send + 'static,
    T: Send + 'static,
{
    match tokio::task::spawn_blocking(f).await {
        Ok(result) => Ok(result?),
        Err(_) => Err(IndexError::ShuttingDown.into()),
    }
}

pub async fn health(State(_state): State<Arc<AppState>>) -> impl IntoResponse {
    axum::Json(HealthResponse { status: "ok" })
}

pub async fn metrics(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    (
        [(axum::http::header::CONTENT_TYPE, "text/plain; version=0.0.4")],
        state.metrics.render(),
    )
}

pub async fn create_index(State(state): State<Arc<AppState>>, Path(index): Path<String>) -> AppResult<Response> {
    state.registry.create(&index)?;
    Ok(axum::Json(Empty {}).into_response())
}

pub async fn delete_index(State(state): State<Arc<AppState>>, Path(index): Path<String>) -> AppResult<Response> {
    // Idempotent per §6.1: deleting a nonexistent index still succeeds.
    match state.registry.delete(&index) {
        Ok(()) | Err(IndexError::IndexNotFound(_)) => Ok(axum::Json(Empty {}).into_response()),
        Err(e) => Err(e.into()),
    }
}

pub async fn index_exists(State(state): State<Arc<AppState>>, Path(index): Path<String>) -> StatusCode {
    if state.registry.exists(&index) {
        StatusCode::OK
    } else {
        StatusCode::NOT_FOUND
    }
}

pub async fn index_info(
    State(state): State<Arc<AppState>>,
    Path(index): Path<String>,
    headers: HeaderMap,
) -> AppResult<Encoded<IndexInfoResponse>> {
    let handle = state.registry.open_or_get(&index)?;
    let stats = blocking(move || Ok(handle.stats())).await?;
    Ok(Encoded(Encoding::of_accept(&headers), stats.into()))
}

pub async fn put_fingerprint(
    State(state): State<Arc<AppState>>,
    Path((index, id)): Path<(String, u64)>,
    headers: HeaderMap,
    body: axum::body::Bytes,
) -> AppResult<Response> {
    let doc_id = validate_doc_id(id)?;
    let request: PutFingerprintRequest = decode_body(&headers, &body)?;
    let handle = state.registry.open_or_get(&index)?;
    let batch = UpdateBatch {
        changes: vec![crate::storage::types::Change::Insert { id: doc_id, hashes: request.hashes }],
        metadata: None,
        expected_version: None,
    };
    blocking(move || handle.apply(batch)).await?;
    state.metrics.record_update();
    Ok(axum::Json(Empty {}).into_response())
}

pub async fn get_fingerprint(
    State(state): State<Arc<AppState>>,
    Path((index, id)): Path<(String, u64)>,
    headers: HeaderMap,
) -> AppResult<Encoded<FingerprintVersionResponse>> {
    let doc_id = validate_doc_id(id)?;
    let handle = state.registry.open_or_get(&index)?;
    let version = blocking(move || handle.fingerprint_version(doc_id))
        .await?
        .ok_or(IndexError::FingerprintNotFound(doc_id))?;
    Ok(Encoded(Encoding::of_accept(&headers), FingerprintVersionResponse { version }))
}

pub async fn delete_fingerprint(
    State(state): State<Arc<AppState>>,
    Path((index, id)): Path<(String, u64)>,
) -> AppResult<Response> {
    let doc_id = validate_doc_id(id)?;
    let handle = state.registry.open_or_get(&index)?;
    let batch = UpdateBatch {
        changes: vec![crate::storage::types::Change::Delete { id: doc_id }],
        metadata: None,
        expected_version: None,
    };
    blocking(move || handle.apply(batch)).await?;
    state.metrics.record_update();
    Ok(axum::Json(Empty {}).into_response())
}

pub async fn update(
    State(state): State<Arc<AppState>>,
    Path(index): Path<String>,
    headers: HeaderMap,
    body: axum::body::Bytes,
) -> AppResult<Encoded<FingerprintVersionResponse>> {
    let batch: UpdateBatch = decode_body(&headers, &body)?;
    let handle = state.registry.open_or_get(&index)?;
    let version = blocking(move || handle.apply(batch)).await?;
    state.metrics.record_update();
    Ok(Encoded(Encoding::of_accept(&headers), FingerprintVersionResponse { version }))
}

pub async fn search(
    State(state): State<Arc<AppState>>,
    Path(index): Path<String>,
    headers: HeaderMap,
    body: axum::body::Bytes,
) -> AppResult<Encoded<SearchResponse>> {
    let request: SearchRequest = decode_body(&headers, &body)?;
    let handle = state.registry.open_or_get(&index)?;
    let limit = request.limit.unwrap_or(state.config.search_default_limit);
    let timeout = Duration::from_millis(request.timeout.unwrap_or(state.config.search_default_timeout_ms));

    let result = blocking(move || handle.search(&request.query, limit, timeout)).await?;
    state.metrics.record_search();
    let response = SearchResponse {
        results: result.hits.into_iter().map(ScoredDocDto::from).collect(),
        complete: result.complete,
    };
    Ok(Encoded(Encoding::of_accept(&headers), response))
}

pub async fn snapshot(State(state): State<Arc<AppState>>, Path(index): Path<String>) -> AppResult<Response> {
    let handle = state.registry.open_or_get(&index)?;
    let bytes = blocking(move || {
        let mut bytes = Vec::new();
        handle.write_snapshot(&mut bytes)?;
        Ok(bytes)
    })
    .await?;
    Ok(([(axum::http::header::CONTENT_TYPE, "application/x-tar")], bytes).into_response())
}
