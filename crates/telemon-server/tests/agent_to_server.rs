//! Agent delivery against a live server on both transports.

mod common;

use common::{encryptor, sample_batch, ChainSpec, TestServer};
use std::sync::Arc;
use std::time::Duration;
use telemon_agent::delivery::{Delivery, DeliveryError};
use telemon_agent::transport::{GrpcTransport, HttpTransport, Transport, TransportError};
use telemon_common::retry::{RetryError, RetryExecutor};
use telemon_common::types::Metric;
use telemon_security::Signer;

const TIMEOUT: Duration = Duration::from_secs(5);

#[derive(Clone, Copy, Debug)]
enum Kind {
    Http,
    Grpc,
}

const KINDS: [Kind; 2] = [Kind::Http, Kind::Grpc];

fn transport(server: &TestServer, kind: Kind) -> Arc<dyn Transport> {
    match kind {
        Kind::Http => Arc::new(HttpTransport::new(&server.http_url(), TIMEOUT).unwrap()),
        Kind::Grpc => Arc::new(GrpcTransport::new(&server.grpc_url(), TIMEOUT).unwrap()),
    }
}

fn delivery(server: &TestServer, kind: Kind) -> Delivery {
    Delivery::new(transport(server, kind)).with_retry(RetryExecutor::new(Duration::from_millis(10)))
}

fn expected() -> Vec<Metric> {
    vec![Metric::gauge("Alloc", 123.0), Metric::counter("PollCount", 1)]
}

fn assert_rejected(result: Result<(), DeliveryError>, kind: Kind) {
    match result {
        Err(DeliveryError::Send(RetryError::Permanent {
            attempt: 0,
            source: TransportError::Rejected { .. },
        })) => {}
        other => panic!("{kind:?}: expected a permanent rejection, got {other:?}"),
    }
}

#[tokio::test]
async fn plain_batches_arrive_unchanged() {
    for kind in KINDS {
        let server = TestServer::start(&ChainSpec::default()).await.unwrap();
        delivery(&server, kind).deliver(&sample_batch()).await.unwrap();
        assert_eq!(server.stored().await, expected(), "{kind:?}");
        server.stop().await.unwrap();
    }
}

#[tokio::test]
async fn compressed_batches_arrive_unchanged() {
    for kind in KINDS {
        let server = TestServer::start(&ChainSpec::default()).await.unwrap();
        delivery(&server, kind)
            .with_compression(true)
            .deliver(&sample_batch())
            .await
            .unwrap();
        assert_eq!(server.stored().await, expected(), "{kind:?}");
        server.stop().await.unwrap();
    }
}

#[tokio::test]
async fn mismatched_secret_is_rejected() {
    for kind in KINDS {
        let server = TestServer::start(&ChainSpec {
            secret: Some("k2"),
            ..Default::default()
        })
        .await
        .unwrap();

        let result = delivery(&server, kind)
            .with_signer(Signer::new(Some("k")))
            .deliver(&sample_batch())
            .await;
        assert_rejected(result, kind);
        assert!(server.stored().await.is_empty(), "{kind:?}");

        delivery(&server, kind)
            .with_signer(Signer::new(Some("k2")))
            .deliver(&sample_batch())
            .await
            .unwrap();
        assert_eq!(server.stored().await, expected(), "{kind:?}");
        server.stop().await.unwrap();
    }
}

#[tokio::test]
async fn encrypted_signed_compressed_batches_are_opened() {
    for kind in KINDS {
        let server = TestServer::start(&ChainSpec {
            private_key: Some(0),
            secret: Some("k"),
            ..Default::default()
        })
        .await
        .unwrap();

        delivery(&server, kind)
            .with_signer(Signer::new(Some("k")))
            .with_encryptor(Some(encryptor(0)))
            .with_compression(true)
            .deliver(&sample_batch())
            .await
            .unwrap();
        assert_eq!(server.stored().await, expected(), "{kind:?}");
        server.stop().await.unwrap();
    }
}

#[tokio::test]
async fn wrong_public_key_is_rejected() {
    for kind in KINDS {
        let server = TestServer::start(&ChainSpec {
            private_key: Some(1),
            ..Default::default()
        })
        .await
        .unwrap();

        let result = delivery(&server, kind)
            .with_encryptor(Some(encryptor(0)))
            .with_compression(true)
            .deliver(&sample_batch())
            .await;
        assert_rejected(result, kind);
        assert!(server.stored().await.is_empty(), "{kind:?}");
        server.stop().await.unwrap();
    }
}

#[tokio::test]
async fn trusted_subnet_filters_on_reported_address() {
    for kind in KINDS {
        let server = TestServer::start(&ChainSpec {
            subnet: Some("10.0.0.0/8"),
            ..Default::default()
        })
        .await
        .unwrap();

        let result = delivery(&server, kind)
            .with_real_ip(Some("192.168.0.7".into()))
            .deliver(&sample_batch())
            .await;
        assert_rejected(result, kind);
        assert!(server.stored().await.is_empty(), "{kind:?}");

        delivery(&server, kind)
            .with_real_ip(Some("10.1.1.1".into()))
            .deliver(&sample_batch())
            .await
            .unwrap();
        assert_eq!(server.stored().await, expected(), "{kind:?}");
        server.stop().await.unwrap();
    }
}

#[tokio::test]
async fn stopped_server_exhausts_retries() {
    for kind in KINDS {
        let server = TestServer::start(&ChainSpec::default()).await.unwrap();
        let delivery = delivery(&server, kind);
        server.stop().await.unwrap();

        let err = delivery.deliver(&sample_batch()).await.unwrap_err();
        assert!(
            matches!(err, DeliveryError::Send(RetryError::Exhausted { retries: 3, .. })),
            "{kind:?}: {err:?}"
        );
    }
}
