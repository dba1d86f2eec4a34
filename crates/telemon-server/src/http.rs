//! HTTP front-end.
//!
//! | Route | Body | Chain |
//! |---|---|---|
//! | `POST /updates/` | JSON array of metrics | yes |
//! | `POST /update/` | one JSON metric | yes |
//! | `POST /value/` | `{"name", "type"}` | no |
//! | `GET /ping` | | no |

use crate::chain::{ChainError, ChainInput, Rejection};
use crate::ingest::IngestError;
use crate::state::AppState;
use axum::body::Bytes;
use axum::extract::State;
use axum::http::{header, HeaderMap, HeaderValue, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::Router;
use serde::Serialize;
use telemon_common::compress;
use telemon_common::types::{Batch, Metric, MetricKey};
use telemon_common::wire::{self, http};
use telemon_security::Signer;
use telemon_storage::error::StorageError;

#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    #[error(transparent)]
    Chain(#[from] ChainError),

    #[error("storage write failed: {0}")]
    Write(#[from] IngestError),

    #[error(transparent)]
    Read(#[from] StorageError),

    #[error("{0}")]
    Internal(String),
}

impl ApiError {
    fn status(&self) -> StatusCode {
        match self {
            ApiError::Chain(e) => match e.rejection() {
                Rejection::BadRequest => StatusCode::BAD_REQUEST,
                Rejection::Unauthenticated => StatusCode::UNAUTHORIZED,
                Rejection::Forbidden => StatusCode::FORBIDDEN,
            },
            ApiError::Write(e) => match e.source_ref() {
                StorageError::Invalid(_) => StatusCode::BAD_REQUEST,
                _ => StatusCode::INTERNAL_SERVER_ERROR,
            },
            ApiError::Read(StorageError::NotFound(_)) => StatusCode::NOT_FOUND,
            ApiError::Read(StorageError::Invalid(_)) => StatusCode::BAD_REQUEST,
            ApiError::Read(_) | ApiError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status();
        if status.is_server_error() {
            tracing::error!(error = %self, "Request failed");
        } else {
            tracing::warn!(error = %self, "Request rejected");
        }
        (status, self.to_string()).into_response()
    }
}

fn header_value(headers: &HeaderMap, name: &str) -> Option<String> {
    headers
        .get(name)
        .and_then(|v| v.to_str().ok())
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

/// Maps request headers onto the chain's canonical inputs.
pub fn chain_input(headers: &HeaderMap, body: Bytes) -> ChainInput {
    ChainInput {
        body: body.to_vec(),
        encrypted: wire::is_marked(header_value(headers, http::ENCRYPTED).as_deref()),
        signature: header_value(headers, http::SIGNATURE),
        real_ip: header_value(headers, http::REAL_IP),
        encoding: header_value(headers, header::CONTENT_ENCODING.as_str()),
    }
}

/// Parses a JSON array, keeping every entry that is a valid metric.
fn parse_batch(body: &[u8]) -> Result<Batch, ChainError> {
    let raw: Vec<serde_json::Value> =
        serde_json::from_slice(body).map_err(|e| ChainError::Malformed(e.to_string()))?;
    let total = raw.len();
    let parsed = raw
        .into_iter()
        .filter_map(|value| match serde_json::from_value::<Metric>(value) {
            Ok(metric) => Some(metric),
            Err(e) => {
                tracing::warn!(error = %e, "Dropping unparsable metric");
                None
            }
        })
        .collect();
    let batch = Batch::sanitize(parsed);
    if batch.is_empty() && total > 0 {
        return Err(ChainError::Malformed(format!(
            "none of {total} metrics is valid"
        )));
    }
    Ok(batch)
}

fn parse_metric(body: &[u8]) -> Result<Metric, ChainError> {
    let metric: Metric =
        serde_json::from_slice(body).map_err(|e| ChainError::Malformed(e.to_string()))?;
    metric
        .validate()
        .map_err(|e| ChainError::Malformed(e.to_string()))?;
    Ok(metric)
}

/// JSON response, signed when a secret is configured.
fn signed_json<T: Serialize>(signer: &Signer, value: &T) -> Result<Response, ApiError> {
    let body = serde_json::to_vec(value).map_err(|e| ApiError::Internal(e.to_string()))?;
    let mut response = (
        [(header::CONTENT_TYPE, HeaderValue::from_static("application/json"))],
        body.clone(),
    )
        .into_response();
    if let Some(signature) = signer
        .sign(&body)
        .map_err(|e| ApiError::Internal(e.to_string()))?
    {
        let value =
            HeaderValue::from_str(&signature).map_err(|e| ApiError::Internal(e.to_string()))?;
        response.headers_mut().insert(http::SIGNATURE, value);
    }
    Ok(response)
}

#[derive(Debug, Serialize)]
struct Accepted {
    accepted: usize,
}

async fn updates(
    State(state): State<AppState>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<Response, ApiError> {
    let plain = state.chain.process(chain_input(&headers, body))?;
    let batch = parse_batch(&plain)?;
    if !batch.is_empty() {
        state.ingest.batch(&batch.metrics).await?;
    }
    tracing::debug!(count = batch.len(), "Batch stored");
    signed_json(
        state.chain.signer(),
        &Accepted {
            accepted: batch.len(),
        },
    )
}

async fn update(
    State(state): State<AppState>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<Response, ApiError> {
    let plain = state.chain.process(chain_input(&headers, body))?;
    let metric = parse_metric(&plain)?;
    let stored = state.ingest.add(&metric).await?;
    signed_json(state.chain.signer(), &stored)
}

async fn value(
    State(state): State<AppState>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<Response, ApiError> {
    let encoding = header_value(&headers, header::CONTENT_ENCODING.as_str());
    let plain = compress::decode(encoding.as_deref(), body.to_vec()).map_err(ChainError::from)?;
    let key: MetricKey =
        serde_json::from_slice(&plain).map_err(|e| ChainError::Malformed(e.to_string()))?;
    let metric = state.ingest.find(&key).await?;
    signed_json(state.chain.signer(), &metric)
}

async fn ping(State(state): State<AppState>) -> Result<&'static str, ApiError> {
    state.ingest.ping().await?;
    Ok("ok")
}

pub fn routes() -> Router<AppState> {
    Router::new()
        .route("/updates/", post(updates))
        .route("/update/", post(update))
        .route("/value/", post(value))
        .route("/ping", get(ping))
}
