//! HMAC-SHA-256 request signing.
//!
//! The signature covers the exact bytes put on the wire before encryption,
//! hex-encoded. Transports only differ in where they carry it.

use hmac::{Hmac, Mac};
use sha2::Sha256;

type HmacSha256 = Hmac<Sha256>;

#[derive(Debug, thiserror::Error)]
pub enum SignError {
    #[error("request is not signed")]
    Missing,

    #[error("signature is not valid hex")]
    Encoding,

    #[error("signature mismatch")]
    Mismatch,

    #[error("HMAC key error: {0}")]
    Key(String),
}

fn mac(secret: &[u8], body: &[u8]) -> Result<HmacSha256, SignError> {
    let mut mac = HmacSha256::new_from_slice(secret).map_err(|e| SignError::Key(e.to_string()))?;
    mac.update(body);
    Ok(mac)
}

/// Hex-encoded HMAC-SHA-256 of `body` under `secret`.
///
/// # Examples
///
/// ```
/// use telemon_security::sign::{sign, verify};
///
/// let sig = sign(b"payload", b"k").unwrap();
/// assert!(verify(b"payload", &sig, b"k"));
/// assert!(!verify(b"payload", &sig, b"k2"));
/// ```
pub fn sign(body: &[u8], secret: &[u8]) -> Result<String, SignError> {
    Ok(hex::encode(mac(secret, body)?.finalize().into_bytes()))
}

/// Constant-time check of a hex signature.
pub fn verify(body: &[u8], signature: &str, secret: &[u8]) -> bool {
    let Ok(expected) = hex::decode(signature.trim()) else {
        return false;
    };
    match mac(secret, body) {
        Ok(mac) => mac.verify_slice(&expected).is_ok(),
        Err(_) => false,
    }
}

/// Signing policy for one side of the pipeline.
///
/// With no secret configured, signing yields nothing and verification
/// accepts every request. That is the unauthenticated trust model and has
/// to be chosen explicitly through [`Signer::disabled`] or an empty secret.
#[derive(Clone, Default)]
pub struct Signer {
    secret: Option<Vec<u8>>,
}

impl std::fmt::Debug for Signer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Signer")
            .field("enabled", &self.is_enabled())
            .finish()
    }
}

impl Signer {
    /// An empty secret disables signing.
    pub fn new(secret: Option<&str>) -> Self {
        Self {
            secret: secret
                .filter(|s| !s.is_empty())
                .map(|s| s.as_bytes().to_vec()),
        }
    }

    pub fn disabled() -> Self {
        Self { secret: None }
    }

    pub fn is_enabled(&self) -> bool {
        self.secret.is_some()
    }

    /// Returns `None` when signing is disabled.
    pub fn sign(&self, body: &[u8]) -> Result<Option<String>, SignError> {
        match &self.secret {
            Some(secret) => sign(body, secret).map(Some),
            None => Ok(None),
        }
    }

    /// Verifies `signature` against `body`. Disabled signers accept
    /// everything; enabled signers reject a missing signature.
    pub fn verify(&self, body: &[u8], signature: Option<&str>) -> Result<(), SignError> {
        let Some(secret) = &self.secret else {
            return Ok(());
        };
        let signature = signature.ok_or(SignError::Missing)?;
        let expected = hex::decode(signature.trim()).map_err(|_| SignError::Encoding)?;
        mac(secret, body)?
            .verify_slice(&expected)
            .map_err(|_| SignError::Mismatch)
    }
}
