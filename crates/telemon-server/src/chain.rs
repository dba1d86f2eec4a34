//! The ordered verification pipeline shared by the HTTP and gRPC front-ends.
//!
//! Order is fixed: decrypt, verify signature, check source subnet,
//! decompress. The first failing stage rejects the request and nothing
//! after it runs.

use telemon_common::compress::{self, CompressError};
use telemon_security::sign::SignError;
use telemon_security::{CryptoError, Decryptor, NetworkGuard, Signer};

/// Transport-neutral view of one inbound request.
#[derive(Debug, Clone, Default)]
pub struct ChainInput {
    pub body: Vec<u8>,
    pub encrypted: bool,
    pub signature: Option<String>,
    pub real_ip: Option<String>,
    pub encoding: Option<String>,
}

#[derive(Debug, thiserror::Error)]
pub enum ChainError {
    #[error("decryption failed: {0}")]
    Decrypt(#[from] CryptoError),

    #[error("payload is marked encrypted but no private key is configured")]
    NoPrivateKey,

    #[error("signature check failed: {0}")]
    Signature(#[from] SignError),

    #[error("source address {} is not in the trusted subnet", .0.as_deref().unwrap_or("<none>"))]
    Forbidden(Option<String>),

    #[error("decompression failed: {0}")]
    Decompress(#[from] CompressError),

    #[error("malformed payload: {0}")]
    Malformed(String),
}

/// Transport-neutral rejection class.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Rejection {
    BadRequest,
    Unauthenticated,
    Forbidden,
}

impl ChainError {
    pub fn rejection(&self) -> Rejection {
        match self {
            ChainError::Signature(_) => Rejection::Unauthenticated,
            ChainError::Forbidden(_) => Rejection::Forbidden,
            ChainError::Decrypt(_)
            | ChainError::NoPrivateKey
            | ChainError::Decompress(_)
            | ChainError::Malformed(_) => Rejection::BadRequest,
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct SecurityChain {
    decryptor: Option<Decryptor>,
    signer: Signer,
    guard: NetworkGuard,
}

impl SecurityChain {
    pub fn new(decryptor: Option<Decryptor>, signer: Signer, guard: NetworkGuard) -> Self {
        Self {
            decryptor,
            signer,
            guard,
        }
    }

    pub fn signer(&self) -> &Signer {
        &self.signer
    }

    /// Runs every stage and returns the plaintext, uncompressed body.
    pub fn process(&self, input: ChainInput) -> Result<Vec<u8>, ChainError> {
        let body = self.decrypt(input.encrypted, input.body)?;
        self.signer.verify(&body, input.signature.as_deref())?;
        if !self.guard.allow(input.real_ip.as_deref()) {
            return Err(ChainError::Forbidden(input.real_ip));
        }
        Ok(compress::decode(input.encoding.as_deref(), body)?)
    }

    fn decrypt(&self, encrypted: bool, body: Vec<u8>) -> Result<Vec<u8>, ChainError> {
        match (&self.decryptor, encrypted) {
            (Some(decryptor), true) => Ok(decryptor.decrypt(&body)?),
            (None, true) => Err(ChainError::NoPrivateKey),
            (_, false) => Ok(body),
        }
    }
}
