//! Wire transports carrying prepared payloads to the server.
//!
//! Both transports see the same [`Payload`]: the body after compression and
//! encryption plus the out-of-band markers. They differ only in framing.

use async_trait::async_trait;
use prost::Message;
use std::time::Duration;
use telemon_common::compress::GZIP;
use telemon_common::proto::batch_request::Payload as WirePayload;
use telemon_common::proto::metrics_client::MetricsClient;
use telemon_common::proto::{BatchRequest, MetricList};
use telemon_common::types::Batch;
use telemon_common::wire::{http, metadata};
use tonic::metadata::MetadataValue;
use tonic::transport::{Channel, Endpoint};

#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    #[error("failed to encode batch: {0}")]
    Encode(String),

    #[error("connection failed: {0}")]
    Connect(String),

    #[error("request timed out")]
    Timeout,

    #[error("server rejected batch ({status}): {message}")]
    Rejected { status: String, message: String },

    #[error("protocol error: {0}")]
    Protocol(String),
}

impl TransportError {
    /// Connection-level failures are worth retrying; everything the server
    /// answered is not.
    pub fn is_transient(&self) -> bool {
        matches!(self, TransportError::Connect(_) | TransportError::Timeout)
    }
}

/// One prepared request, reused across retry attempts.
#[derive(Debug, Clone, Default)]
pub struct Payload {
    pub body: Vec<u8>,
    pub signature: Option<String>,
    pub compressed: bool,
    pub encrypted: bool,
    pub real_ip: Option<String>,
}

#[async_trait]
pub trait Transport: Send + Sync {
    fn name(&self) -> &'static str;

    /// Serializes a batch into the transport's canonical body.
    fn encode(&self, batch: &Batch) -> Result<Vec<u8>, TransportError>;

    async fn send(&self, payload: &Payload) -> Result<(), TransportError>;
}

/// JSON over HTTP to `POST /updates/`.
pub struct HttpTransport {
    client: reqwest::Client,
    url: String,
}

impl HttpTransport {
    pub fn new(base_url: &str, timeout: Duration) -> Result<Self, TransportError> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .connect_timeout(timeout)
            .build()
            .map_err(|e| TransportError::Protocol(e.to_string()))?;
        Ok(Self {
            client,
            url: format!("{}/updates/", base_url.trim_end_matches('/')),
        })
    }
}

fn classify_reqwest(e: reqwest::Error) -> TransportError {
    if e.is_timeout() {
        TransportError::Timeout
    } else if e.is_connect() {
        TransportError::Connect(e.to_string())
    } else {
        TransportError::Protocol(e.to_string())
    }
}

#[async_trait]
impl Transport for HttpTransport {
    fn name(&self) -> &'static str {
        "http"
    }

    fn encode(&self, batch: &Batch) -> Result<Vec<u8>, TransportError> {
        serde_json::to_vec(&batch.metrics).map_err(|e| TransportError::Encode(e.to_string()))
    }

    async fn send(&self, payload: &Payload) -> Result<(), TransportError> {
        let mut request = self
            .client
            .post(&self.url)
            .header(reqwest::header::CONTENT_TYPE, "application/json");
        if payload.compressed {
            request = request.header(reqwest::header::CONTENT_ENCODING, GZIP);
        }
        if let Some(signature) = &payload.signature {
            request = request.header(http::SIGNATURE, signature);
        }
        if payload.encrypted {
            request = request.header(http::ENCRYPTED, "true");
        }
        if let Some(ip) = &payload.real_ip {
            request = request.header(http::REAL_IP, ip);
        }

        let response = request
            .body(payload.body.clone())
            .send()
            .await
            .map_err(classify_reqwest)?;

        let status = response.status();
        if status.is_success() {
            return Ok(());
        }
        let message = response.text().await.unwrap_or_default();
        Err(TransportError::Rejected {
            status: status.to_string(),
            message,
        })
    }
}

/// Protobuf over gRPC through the `Metrics.Batch` call.
pub struct GrpcTransport {
    client: MetricsClient<Channel>,
}

impl GrpcTransport {
    /// Builds a lazily connecting client; the first call dials the server.
    pub fn new(endpoint: &str, timeout: Duration) -> Result<Self, TransportError> {
        let channel = Endpoint::from_shared(endpoint.to_string())
            .map_err(|e| TransportError::Protocol(e.to_string()))?
            .connect_timeout(timeout)
            .timeout(timeout)
            .connect_lazy();
        Ok(Self {
            client: MetricsClient::new(channel),
        })
    }

    fn request(&self, payload: &Payload) -> Result<tonic::Request<BatchRequest>, TransportError> {
        // Untransformed bodies travel as the structured list.
        let wire = if payload.compressed || payload.encrypted {
            WirePayload::Encoded(payload.body.clone())
        } else {
            let list = MetricList::decode(payload.body.as_slice())
                .map_err(|e| TransportError::Encode(e.to_string()))?;
            WirePayload::Metrics(list)
        };

        let mut request = tonic::Request::new(BatchRequest {
            payload: Some(wire),
        });
        let md = request.metadata_mut();
        if let Some(signature) = &payload.signature {
            md.insert(metadata::SIGNATURE, ascii(signature)?);
        }
        if payload.encrypted {
            md.insert(metadata::ENCRYPTED, MetadataValue::from_static("true"));
        }
        if payload.compressed {
            md.insert(metadata::CONTENT_ENCODING, MetadataValue::from_static(GZIP));
        }
        if let Some(ip) = &payload.real_ip {
            md.insert(metadata::REAL_IP, ascii(ip)?);
        }
        Ok(request)
    }
}

fn ascii(value: &str) -> Result<MetadataValue<tonic::metadata::Ascii>, TransportError> {
    value
        .parse()
        .map_err(|_| TransportError::Encode(format!("invalid metadata value: {value:?}")))
}

fn classify_status(status: tonic::Status) -> TransportError {
    match status.code() {
        tonic::Code::Unavailable => TransportError::Connect(status.message().to_string()),
        tonic::Code::DeadlineExceeded => TransportError::Timeout,
        code => TransportError::Rejected {
            status: format!("{code:?}"),
            message: status.message().to_string(),
        },
    }
}

#[async_trait]
impl Transport for GrpcTransport {
    fn name(&self) -> &'static str {
        "grpc"
    }

    fn encode(&self, batch: &Batch) -> Result<Vec<u8>, TransportError> {
        Ok(MetricList::from(batch).encode_to_vec())
    }

    async fn send(&self, payload: &Payload) -> Result<(), TransportError> {
        let request = self.request(payload)?;
        let response = self
            .client
            .clone()
            .batch(request)
            .await
            .map_err(classify_status)?;
        tracing::debug!(accepted = response.into_inner().accepted, "Batch accepted");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use telemon_common::types::Metric;

    fn sample() -> Batch {
        Batch {
            metrics: vec![Metric::counter("PollCount", 1), Metric::gauge("Alloc", 123.0)],
        }
    }

    async fn closed_port() -> String {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        drop(listener);
        format!("http://{addr}")
    }

    #[test]
    fn only_connection_errors_are_transient() {
        assert!(TransportError::Connect("refused".into()).is_transient());
        assert!(TransportError::Timeout.is_transient());
        assert!(!TransportError::Encode("bad".into()).is_transient());
        assert!(!TransportError::Protocol("bad".into()).is_transient());
        assert!(!TransportError::Rejected {
            status: "401".into(),
            message: String::new(),
        }
        .is_transient());
    }

    #[test]
    fn http_encodes_json_array() {
        let transport = HttpTransport::new("http://localhost:1", Duration::from_secs(1)).unwrap();
        let body = transport.encode(&sample()).unwrap();
        let json: serde_json::Value = serde_json::from_slice(&body).unwrap();
        assert_eq!(json[0]["name"], "PollCount");
        assert_eq!(json[0]["type"], "counter");
        assert_eq!(json[0]["delta"], 1);
        assert_eq!(json[1]["value"], 123.0);
        assert!(json[1].get("delta").is_none());
    }

    #[tokio::test]
    async fn http_sends_markers_as_headers() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("POST", "/updates/")
            .match_header("HashSHA256", "abc123")
            .match_header("X-Encrypted", "true")
            .match_header("Content-Encoding", "gzip")
            .match_header("X-Real-IP", "10.0.0.7")
            .match_header("Accept-Encoding", mockito::Matcher::Missing)
            .match_body(mockito::Matcher::Exact("opaque".into()))
            .with_status(200)
            .create_async()
            .await;

        let transport = HttpTransport::new(&server.url(), Duration::from_secs(5)).unwrap();
        let payload = Payload {
            body: b"opaque".to_vec(),
            signature: Some("abc123".into()),
            compressed: true,
            encrypted: true,
            real_ip: Some("10.0.0.7".into()),
        };
        transport.send(&payload).await.unwrap();
        mock.assert_async().await;
    }

    #[tokio::test]
    async fn http_rejection_is_not_transient() {
        let mut server = mockito::Server::new_async().await;
        let _mock = server
            .mock("POST", "/updates/")
            .with_status(401)
            .with_body("signature mismatch")
            .create_async()
            .await;

        let transport = HttpTransport::new(&server.url(), Duration::from_secs(5)).unwrap();
        let err = transport.send(&Payload::default()).await.unwrap_err();
        match &err {
            TransportError::Rejected { status, message } => {
                assert!(status.starts_with("401"));
                assert_eq!(message, "signature mismatch");
            }
            other => panic!("unexpected error: {other}"),
        }
        assert!(!err.is_transient());
    }

    #[tokio::test]
    async fn http_refused_connection_is_transient() {
        let transport = HttpTransport::new(&closed_port().await, Duration::from_secs(2)).unwrap();
        let err = transport.send(&Payload::default()).await.unwrap_err();
        assert!(err.is_transient(), "unexpected error: {err}");
    }

    #[tokio::test]
    async fn grpc_plain_payload_uses_structured_list() {
        let transport = GrpcTransport::new("http://127.0.0.1:1", Duration::from_secs(1)).unwrap();
        let body = transport.encode(&sample()).unwrap();
        let request = transport
            .request(&Payload {
                body,
                signature: Some("feed".into()),
                real_ip: Some("10.0.0.7".into()),
                ..Default::default()
            })
            .unwrap();

        assert_eq!(request.metadata().get(metadata::SIGNATURE).unwrap().to_str().unwrap(), "feed");
        assert_eq!(request.metadata().get(metadata::REAL_IP).unwrap().to_str().unwrap(), "10.0.0.7");
        assert!(request.metadata().get(metadata::ENCRYPTED).is_none());
        match request.into_inner().payload {
            Some(WirePayload::Metrics(list)) => {
                assert_eq!(list.metrics.len(), 2);
                assert_eq!(list.metrics[0].name, "PollCount");
            }
            other => panic!("unexpected payload: {other:?}"),
        }
    }

    #[tokio::test]
    async fn grpc_transformed_payload_is_opaque() {
        let transport = GrpcTransport::new("http://127.0.0.1:1", Duration::from_secs(1)).unwrap();
        let request = transport
            .request(&Payload {
                body: vec![1, 2, 3],
                compressed: true,
                encrypted: true,
                ..Default::default()
            })
            .unwrap();

        assert_eq!(request.metadata().get(metadata::ENCRYPTED).unwrap().to_str().unwrap(), "true");
        assert_eq!(
            request.metadata().get(metadata::CONTENT_ENCODING).unwrap().to_str().unwrap(),
            "gzip"
        );
        assert_eq!(
            request.into_inner().payload,
            Some(WirePayload::Encoded(vec![1, 2, 3]))
        );
    }

    #[tokio::test]
    async fn grpc_unreachable_server_is_transient() {
        let transport = GrpcTransport::new(&closed_port().await, Duration::from_secs(2)).unwrap();
        let body = transport.encode(&sample()).unwrap();
        let err = transport
            .send(&Payload {
                body,
                ..Default::default()
            })
            .await
            .unwrap_err();
        assert!(err.is_transient(), "unexpected error: {err}");
    }
}
