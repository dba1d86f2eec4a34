//! gRPC front-end: the `Metrics.Batch` call behind the same chain as HTTP.

use crate::chain::{ChainError, ChainInput, Rejection};
use crate::ingest::IngestError;
use crate::state::AppState;
use prost::Message;
use telemon_common::proto::batch_request::Payload;
use telemon_common::proto::metrics_server::Metrics;
use telemon_common::proto::{BatchRequest, BatchResponse, MetricList};
use telemon_common::types::{Batch, Metric};
use telemon_common::wire::{self, metadata};
use telemon_storage::error::StorageError;
use tonic::metadata::MetadataMap;
use tonic::{Request, Response, Status};

pub struct MetricsService {
    state: AppState,
}

impl MetricsService {
    pub fn new(state: AppState) -> Self {
        Self { state }
    }
}

fn chain_status(e: ChainError) -> Status {
    let message = e.to_string();
    tracing::warn!(error = %message, "RPC batch rejected");
    match e.rejection() {
        Rejection::BadRequest => Status::invalid_argument(message),
        Rejection::Unauthenticated => Status::unauthenticated(message),
        Rejection::Forbidden => Status::permission_denied(message),
    }
}

fn storage_status(e: IngestError) -> Status {
    tracing::error!(error = %e, "RPC batch not stored");
    match e.source_ref() {
        StorageError::Invalid(_) => Status::invalid_argument(e.to_string()),
        _ => Status::internal(e.to_string()),
    }
}

fn meta(md: &MetadataMap, key: &str) -> Option<String> {
    md.get(key)
        .and_then(|v| v.to_str().ok())
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

/// Maps metadata and the oneof payload onto the chain's canonical inputs.
/// A structured list is re-encoded so its signature covers the same bytes
/// the agent signed.
pub fn chain_input(md: &MetadataMap, payload: Option<Payload>) -> Result<ChainInput, Status> {
    let encrypted = wire::is_marked(meta(md, metadata::ENCRYPTED).as_deref());
    let encoding = meta(md, metadata::CONTENT_ENCODING);
    let body = match payload {
        Some(Payload::Encoded(bytes)) => bytes,
        Some(Payload::Metrics(list)) => {
            if encrypted || encoding.is_some() {
                return Err(Status::invalid_argument(
                    "structured payload cannot be encrypted or compressed",
                ));
            }
            list.encode_to_vec()
        }
        None => return Err(Status::invalid_argument("missing payload")),
    };
    Ok(ChainInput {
        body,
        encrypted,
        signature: meta(md, metadata::SIGNATURE),
        real_ip: meta(md, metadata::REAL_IP),
        encoding,
    })
}

/// Decodes a protobuf list, dropping entries that are not valid metrics.
fn decode_batch(body: &[u8]) -> Result<Batch, ChainError> {
    let list = MetricList::decode(body).map_err(|e| ChainError::Malformed(e.to_string()))?;
    let total = list.metrics.len();
    let metrics = list
        .metrics
        .into_iter()
        .filter_map(|m| match Metric::try_from(m) {
            Ok(metric) => Some(metric),
            Err(e) => {
                tracing::warn!(error = %e, "Dropping invalid metric");
                None
            }
        })
        .collect();
    let batch = Batch { metrics };
    if batch.is_empty() && total > 0 {
        return Err(ChainError::Malformed(format!(
            "none of {total} metrics is valid"
        )));
    }
    Ok(batch)
}

#[tonic::async_trait]
impl Metrics for MetricsService {
    async fn batch(
        &self,
        request: Request<BatchRequest>,
    ) -> Result<Response<BatchResponse>, Status> {
        let (md, _, req) = request.into_parts();
        let input = chain_input(&md, req.payload)?;
        let plain = self.state.chain.process(input).map_err(chain_status)?;
        let batch = decode_batch(&plain).map_err(chain_status)?;

        if !batch.is_empty() {
            self.state
                .ingest
                .batch(&batch.metrics)
                .await
                .map_err(storage_status)?;
        }
        tracing::debug!(count = batch.len(), "RPC batch stored");

        let accepted = u32::try_from(batch.len()).unwrap_or(u32::MAX);
        Ok(Response::new(BatchResponse { accepted }))
    }
}
