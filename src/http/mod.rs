//! HTTP surface (§6.1): a thin axum front end over the registry and the
//! per-index core. Chosen the way the wider corpus reaches for a JSON REST
//! surface — the core itself has no HTTP framework dependency.

mod dto;
mod routes;

use std::sync::Arc;

use axum::http::{HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post, put};
use axum::Router;
use serde::{de::DeserializeOwned, Serialize};

use crate::config::Config;
use crate::error::IndexError;
use crate::metrics::Metrics;
use crate::registry::Registry;

/// Shared state handed to every handler.
pub struct AppState {
    pub registry: Registry,
    pub metrics: Arc<Metrics>,
    pub config: Config,
}

pub fn router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/_health", get(routes::health))
        .route("/_metrics", get(routes::metrics))
        .route(
            "/:index",
            put(routes::create_index).delete(routes::delete_index).head(routes::index_exists).get(routes::index_info),
        )
        .route("/:index/_update", post(routes::update))
        .route("/:index/_search", post(routes::search))
        .route("/:index/_snapshot", get(routes::snapshot))
        .route(
            "/:index/:id",
            put(routes::put_fingerprint).get(routes::get_fingerprint).delete(routes::delete_fingerprint),
        )
        .with_state(state)
}

/// `Content-Type`/`Accept` negotiation between `application/json` (default)
/// and `application/msgpack`, per §6.1. The domain types are identical
/// either way; only the wire encoding differs.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Encoding {
    Json,
    MessagePack,
}

impl Encoding {
    fn from_headers(headers: &HeaderMap, header_name: &str) -> Self {
        let value = headers.get(header_name).and_then(|v| v.to_str().ok()).unwrap_or("");
        if value.contains("application/msgpack") || value.contains("application/x-msgpack") {
            Encoding::MessagePack
        } else {
            Encoding::Json
        }
    }

    pub(crate) fn of_request(headers: &HeaderMap) -> Self {
        Self::from_headers(headers, "content-type")
    }

    pub(crate) fn of_accept(headers: &HeaderMap) -> Self {
        Self::from_headers(headers, "accept")
    }
}

pub(crate) fn decode_body<T: DeserializeOwned>(headers: &HeaderMap, bytes: &[u8]) -> Result<T, IndexError> {
    match Encoding::of_request(headers) {
        Encoding::MessagePack => rmp_serde::from_slice(bytes).map_err(IndexError::MsgpackDecode),
        Encoding::Json => serde_json::from_slice(bytes).map_err(IndexError::Json),
    }
}

pub(crate) struct Encoded<T>(pub Encoding, pub T);

impl<T: Serialize> IntoResponse for Encoded<T> {
    fn into_response(self) -> Response {
        let Encoded(encoding, body) = self;
        match encoding {
            Encoding::MessagePack => match rmp_serde::to_vec(&body) {
                Ok(bytes) => ([(axum::http::header::CONTENT_TYPE, "application/msgpack")], bytes).into_response(),
                Err(e) => ApiError(IndexError::MsgpackEncode(e)).into_response(),
            },
            Encoding::Json => match serde_json::to_vec(&body) {
                Ok(bytes) => ([(axum::http::header::CONTENT_TYPE, "application/json")], bytes).into_response(),
                Err(e) => ApiError(IndexError::Json(e)).into_response(),
            },
        }
    }
}

/// Wraps `IndexError` so it can be returned directly from a handler; maps
/// to the status/code pair the error type already carries (§7).
pub(crate) struct ApiError(pub IndexError);

impl From<IndexError> for ApiError {
    fn from(e: IndexError) -> Self {
        ApiError(e)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = StatusCode::from_u16(self.0.status()).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
        let body = dto::ErrorBody { code: self.0.code(), message: self.0.to_string() };
        (status, axum::Json(body)).into_response()
    }
}
