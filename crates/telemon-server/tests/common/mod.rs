#![allow(dead_code)]

use anyhow::Result;
use axum::body::{to_bytes, Body};
use axum::http::{Request, StatusCode};
use rsa::RsaPrivateKey;
use std::net::SocketAddr;
use std::sync::{Arc, OnceLock};
use std::time::Duration;
use telemon_common::lifecycle::Lifecycle;
use telemon_common::retry::RetryExecutor;
use telemon_common::types::{Batch, Metric};
use telemon_security::{Decryptor, Encryptor, NetworkGuard, Signer};
use telemon_server::app::{self, Listeners};
use telemon_server::chain::SecurityChain;
use telemon_server::ingest::Ingest;
use telemon_server::state::AppState;
use telemon_storage::{MemoryStorage, Storage};
use tokio::task::JoinHandle;
use tower::util::ServiceExt;

pub fn sample_batch() -> Batch {
    Batch {
        metrics: vec![Metric::counter("PollCount", 1), Metric::gauge("Alloc", 123.0)],
    }
}

/// Test RSA keys, generated once per test binary.
pub fn private_key(slot: usize) -> RsaPrivateKey {
    static KEYS: [OnceLock<RsaPrivateKey>; 2] = [OnceLock::new(), OnceLock::new()];
    KEYS[slot]
        .get_or_init(|| {
            RsaPrivateKey::new(&mut rand::rngs::OsRng, 1024).expect("test key generation")
        })
        .clone()
}

pub fn decryptor(slot: usize) -> Decryptor {
    Decryptor::new(private_key(slot))
}

pub fn encryptor(slot: usize) -> Encryptor {
    Encryptor::new(private_key(slot).to_public_key())
}

#[derive(Default)]
pub struct ChainSpec {
    pub private_key: Option<usize>,
    pub secret: Option<&'static str>,
    pub subnet: Option<&'static str>,
}

impl ChainSpec {
    pub fn build(&self) -> SecurityChain {
        SecurityChain::new(
            self.private_key.map(decryptor),
            Signer::new(self.secret),
            NetworkGuard::parse(self.subnet).expect("test subnet"),
        )
    }
}

pub fn build_state(spec: &ChainSpec) -> AppState {
    let storage: Arc<dyn Storage> = Arc::new(MemoryStorage::new());
    let ingest = Ingest::new(
        storage,
        RetryExecutor::new(Duration::from_millis(1)),
        Duration::from_secs(5),
    );
    AppState::new(spec.build(), ingest)
}

pub async fn post(
    app: &axum::Router,
    path: &str,
    headers: &[(&str, &str)],
    body: Vec<u8>,
) -> (StatusCode, axum::http::HeaderMap, Vec<u8>) {
    let mut builder = Request::builder().method("POST").uri(path);
    for (name, value) in headers {
        builder = builder.header(*name, *value);
    }
    let request = builder.body(Body::from(body)).expect("request");
    let response = app.clone().oneshot(request).await.expect("oneshot");
    let status = response.status();
    let headers = response.headers().clone();
    let bytes = to_bytes(response.into_body(), usize::MAX)
        .await
        .expect("body");
    (status, headers, bytes.to_vec())
}

pub async fn get(app: &axum::Router, path: &str) -> StatusCode {
    let request = Request::builder()
        .method("GET")
        .uri(path)
        .body(Body::empty())
        .expect("request");
    app.clone()
        .oneshot(request)
        .await
        .expect("oneshot")
        .status()
}

/// Both front-ends on ephemeral loopback ports.
pub struct TestServer {
    pub http: SocketAddr,
    pub grpc: SocketAddr,
    pub state: AppState,
    lifecycle: Lifecycle,
    handle: JoinHandle<Result<()>>,
}

impl TestServer {
    pub async fn start(spec: &ChainSpec) -> Result<Self> {
        let state = build_state(spec);
        let loopback = SocketAddr::from(([127, 0, 0, 1], 0));
        let listeners = Listeners::bind(Some(loopback), Some(loopback)).await?;
        let http = listeners
            .http_addr()
            .ok_or_else(|| anyhow::anyhow!("no http listener"))?;
        let grpc = listeners
            .grpc_addr()
            .ok_or_else(|| anyhow::anyhow!("no grpc listener"))?;

        let lifecycle = Lifecycle::new();
        let handle = tokio::spawn(app::serve(listeners, state.clone(), lifecycle.subscribe()));
        Ok(Self {
            http,
            grpc,
            state,
            lifecycle,
            handle,
        })
    }

    pub fn http_url(&self) -> String {
        format!("http://{}", self.http)
    }

    pub fn grpc_url(&self) -> String {
        format!("http://{}", self.grpc)
    }

    pub async fn stored(&self) -> Vec<Metric> {
        self.state.storage().get().await.expect("storage get")
    }

    pub async fn stop(self) -> Result<()> {
        self.lifecycle.shutdown();
        tokio::time::timeout(Duration::from_secs(10), self.handle).await???;
        Ok(())
    }
}
