//! Turns a [`Batch`] into a wire payload and pushes it through a transport.

use crate::transport::{Payload, Transport, TransportError};
use std::sync::Arc;
use telemon_common::compress::{self, CompressError};
use telemon_common::retry::{RetryError, RetryExecutor};
use telemon_common::types::Batch;
use telemon_security::{CryptoError, Encryptor, Signer};

#[derive(Debug, thiserror::Error)]
pub enum DeliveryError {
    #[error(transparent)]
    Encode(TransportError),

    #[error("compression failed: {0}")]
    Compress(#[from] CompressError),

    #[error("signing failed: {0}")]
    Sign(#[from] telemon_security::sign::SignError),

    #[error("encryption failed: {0}")]
    Encrypt(#[from] CryptoError),

    #[error(transparent)]
    Send(#[from] RetryError<TransportError>),
}

pub struct Delivery {
    transport: Arc<dyn Transport>,
    signer: Signer,
    encryptor: Option<Encryptor>,
    compress: bool,
    real_ip: Option<String>,
    retry: RetryExecutor,
}

impl Delivery {
    pub fn new(transport: Arc<dyn Transport>) -> Self {
        Self {
            transport,
            signer: Signer::disabled(),
            encryptor: None,
            compress: false,
            real_ip: None,
            retry: RetryExecutor::default(),
        }
    }

    pub fn with_signer(mut self, signer: Signer) -> Self {
        self.signer = signer;
        self
    }

    pub fn with_encryptor(mut self, encryptor: Option<Encryptor>) -> Self {
        self.encryptor = encryptor;
        self
    }

    pub fn with_compression(mut self, compress: bool) -> Self {
        self.compress = compress;
        self
    }

    pub fn with_real_ip(mut self, real_ip: Option<String>) -> Self {
        self.real_ip = real_ip;
        self
    }

    pub fn with_retry(mut self, retry: RetryExecutor) -> Self {
        self.retry = retry;
        self
    }

    pub fn transport_name(&self) -> &'static str {
        self.transport.name()
    }

    /// encode → gzip → sign → encrypt. The signature covers the bytes that
    /// the server sees after decryption.
    pub fn prepare(&self, batch: &Batch) -> Result<Payload, DeliveryError> {
        let mut body = self.transport.encode(batch).map_err(DeliveryError::Encode)?;
        if self.compress {
            body = compress::gzip(&body)?;
        }
        let signature = self.signer.sign(&body)?;
        let encrypted = match &self.encryptor {
            Some(encryptor) => {
                body = encryptor.encrypt(&body)?;
                true
            }
            None => false,
        };
        Ok(Payload {
            body,
            signature,
            compressed: self.compress,
            encrypted,
            real_ip: self.real_ip.clone(),
        })
    }

    /// Prepares `batch` once and transmits it, retrying connection failures.
    pub async fn deliver(&self, batch: &Batch) -> Result<(), DeliveryError> {
        let payload = self.prepare(batch)?;
        let transport = &self.transport;
        let payload = &payload;
        self.retry
            .run(|| transport.send(payload), TransportError::is_transient)
            .await?;
        tracing::debug!(
            transport = self.transport.name(),
            count = batch.len(),
            bytes = payload.body.len(),
            "Batch delivered"
        );
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::HttpTransport;
    use async_trait::async_trait;
    use rsa::RsaPrivateKey;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Mutex;
    use std::time::Duration;
    use telemon_common::types::Metric;
    use telemon_security::Decryptor;

    fn sample() -> Batch {
        Batch {
            metrics: vec![Metric::counter("PollCount", 1), Metric::gauge("Alloc", 123.0)],
        }
    }

    fn http() -> Arc<dyn Transport> {
        Arc::new(HttpTransport::new("http://localhost:1", Duration::from_secs(1)).unwrap())
    }

    /// Fails with `error` for the first `failures` calls, then records.
    struct Flaky {
        failures: u32,
        calls: AtomicU32,
        error: fn() -> TransportError,
        seen: Mutex<Vec<Payload>>,
    }

    impl Flaky {
        fn new(failures: u32, error: fn() -> TransportError) -> Arc<Self> {
            Arc::new(Self {
                failures,
                calls: AtomicU32::new(0),
                error,
                seen: Mutex::new(Vec::new()),
            })
        }
    }

    #[async_trait]
    impl Transport for Flaky {
        fn name(&self) -> &'static str {
            "flaky"
        }

        fn encode(&self, batch: &Batch) -> Result<Vec<u8>, TransportError> {
            serde_json::to_vec(&batch.metrics).map_err(|e| TransportError::Encode(e.to_string()))
        }

        async fn send(&self, payload: &Payload) -> Result<(), TransportError> {
            let n = self.calls.fetch_add(1, Ordering::SeqCst);
            if n < self.failures {
                return Err((self.error)());
            }
            self.seen.lock().unwrap().push(payload.clone());
            Ok(())
        }
    }

    #[test]
    fn plain_payload_is_the_encoded_batch() {
        let transport = http();
        let expected = transport.encode(&sample()).unwrap();
        let payload = Delivery::new(transport).prepare(&sample()).unwrap();
        assert_eq!(payload.body, expected);
        assert!(payload.signature.is_none());
        assert!(!payload.compressed);
        assert!(!payload.encrypted);
    }

    #[test]
    fn full_pipeline_reverses_on_the_receiving_side() {
        let private = RsaPrivateKey::new(&mut rand::rngs::OsRng, 1024).unwrap();
        let decryptor = Decryptor::new(private);
        let encryptor = Encryptor::new(decryptor.public_key());

        let transport = http();
        let encoded = transport.encode(&sample()).unwrap();
        let delivery = Delivery::new(transport)
            .with_signer(Signer::new(Some("k")))
            .with_encryptor(Some(encryptor))
            .with_compression(true)
            .with_real_ip(Some("10.0.0.7".into()));

        let payload = delivery.prepare(&sample()).unwrap();
        assert!(payload.compressed && payload.encrypted);
        assert_eq!(payload.real_ip.as_deref(), Some("10.0.0.7"));

        let compressed = decryptor.decrypt(&payload.body).unwrap();
        assert!(Signer::new(Some("k"))
            .verify(&compressed, payload.signature.as_deref())
            .is_ok());
        assert_eq!(compress::gunzip(&compressed).unwrap(), encoded);
    }

    #[tokio::test(start_paused = true)]
    async fn transient_failures_are_retried() {
        let flaky = Flaky::new(2, || TransportError::Connect("refused".into()));
        let delivery = Delivery::new(flaky.clone());

        let started = tokio::time::Instant::now();
        delivery.deliver(&sample()).await.unwrap();

        assert_eq!(flaky.calls.load(Ordering::SeqCst), 3);
        assert_eq!(started.elapsed(), Duration::from_secs(1 + 3));
        assert_eq!(flaky.seen.lock().unwrap().len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn rejection_is_not_retried() {
        let flaky = Flaky::new(u32::MAX, || TransportError::Rejected {
            status: "401".into(),
            message: "bad signature".into(),
        });
        let delivery = Delivery::new(flaky.clone());

        let err = delivery.deliver(&sample()).await.unwrap_err();
        assert!(matches!(
            err,
            DeliveryError::Send(RetryError::Permanent { attempt: 0, .. })
        ));
        assert_eq!(flaky.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn persistent_outage_exhausts_retries() {
        let flaky = Flaky::new(u32::MAX, || TransportError::Timeout);
        let delivery = Delivery::new(flaky.clone());

        let err = delivery.deliver(&sample()).await.unwrap_err();
        assert!(matches!(err, DeliveryError::Send(ref e) if e.is_exhausted()));
        assert_eq!(flaky.calls.load(Ordering::SeqCst), 4);
    }
}
