//! Hybrid envelope encryption.
//!
//! Every call to [`Encryptor::encrypt`] draws a fresh 32-byte AES-256-GCM
//! session key, wraps it with the recipient's RSA public key (PKCS#1 v1.5)
//! and seals the plaintext with it. Wire layout:
//!
//! ```text
//! [wrapped session key: N bytes][AES-GCM ciphertext + tag]
//! ```
//!
//! where N is the RSA modulus size in bytes (512 for a 4096-bit key).

use rand::rngs::OsRng;
use ring::aead::{Aad, LessSafeKey, Nonce, UnboundKey, AES_256_GCM, NONCE_LEN};
use ring::rand::{SecureRandom, SystemRandom};
use rsa::pkcs1::{DecodeRsaPrivateKey, DecodeRsaPublicKey};
use rsa::pkcs8::{DecodePrivateKey, DecodePublicKey};
use rsa::traits::PublicKeyParts;
use rsa::{Pkcs1v15Encrypt, RsaPrivateKey, RsaPublicKey};
use std::path::Path;

/// Length of the AES-256 session key.
pub const SESSION_KEY_LEN: usize = 32;

/// The AEAD nonce is fixed to zero. Safe only while every message uses a
/// fresh session key; the wire format has no room for a nonce.
const ZERO_NONCE: [u8; NONCE_LEN] = [0u8; NONCE_LEN];

#[derive(Debug, thiserror::Error)]
pub enum CryptoError {
    #[error("malformed envelope: {len} bytes, expected at least {expected}")]
    MalformedEnvelope { len: usize, expected: usize },

    #[error("failed to unwrap session key")]
    KeyUnwrapFailed,

    #[error("payload authentication failed")]
    AuthenticationFailed,

    #[error("failed to wrap session key: {0}")]
    KeyWrapFailed(String),

    #[error("random source failure")]
    Rng,

    #[error("invalid key: {0}")]
    InvalidKey(String),

    #[error("failed to read key file: {0}")]
    Io(#[from] std::io::Error),
}

/// A parsed envelope borrowing from the received buffer.
#[derive(Debug)]
pub struct Envelope<'a> {
    pub session_key: &'a [u8],
    pub payload: &'a [u8],
}

impl<'a> Envelope<'a> {
    /// Splits `data` at the fixed wrapped-key size.
    ///
    /// # Errors
    ///
    /// [`CryptoError::MalformedEnvelope`] if `data` is shorter than `key_size`.
    pub fn parse(data: &'a [u8], key_size: usize) -> Result<Self, CryptoError> {
        if data.len() < key_size {
            return Err(CryptoError::MalformedEnvelope {
                len: data.len(),
                expected: key_size,
            });
        }
        let (session_key, payload) = data.split_at(key_size);
        Ok(Self {
            session_key,
            payload,
        })
    }
}

fn aead_key(raw: &[u8]) -> Result<LessSafeKey, CryptoError> {
    let unbound = UnboundKey::new(&AES_256_GCM, raw)
        .map_err(|_| CryptoError::InvalidKey("session key length".to_string()))?;
    Ok(LessSafeKey::new(unbound))
}

/// Sender side: holds the recipient's public key.
#[derive(Clone)]
pub struct Encryptor {
    public_key: RsaPublicKey,
    rng: SystemRandom,
}

impl std::fmt::Debug for Encryptor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Encryptor")
            .field("key_size", &self.key_size())
            .finish()
    }
}

impl Encryptor {
    pub fn new(public_key: RsaPublicKey) -> Self {
        Self {
            public_key,
            rng: SystemRandom::new(),
        }
    }

    /// Loads a PEM public key (`PUBLIC KEY` or `RSA PUBLIC KEY`).
    pub fn from_pem(pem: &str) -> Result<Self, CryptoError> {
        let key = RsaPublicKey::from_public_key_pem(pem)
            .or_else(|_| RsaPublicKey::from_pkcs1_pem(pem))
            .map_err(|e| CryptoError::InvalidKey(e.to_string()))?;
        Ok(Self::new(key))
    }

    pub fn load(path: &Path) -> Result<Self, CryptoError> {
        let pem = std::fs::read_to_string(path)?;
        Self::from_pem(&pem)
    }

    /// Size in bytes of the wrapped session key.
    pub fn key_size(&self) -> usize {
        self.public_key.size()
    }

    pub fn encrypt(&self, plaintext: &[u8]) -> Result<Vec<u8>, CryptoError> {
        let mut session_key = [0u8; SESSION_KEY_LEN];
        self.rng
            .fill(&mut session_key)
            .map_err(|_| CryptoError::Rng)?;

        let wrapped = self
            .public_key
            .encrypt(&mut OsRng, Pkcs1v15Encrypt, &session_key)
            .map_err(|e| CryptoError::KeyWrapFailed(e.to_string()))?;

        let key = aead_key(&session_key)?;
        let mut in_out = plaintext.to_vec();
        key.seal_in_place_append_tag(
            Nonce::assume_unique_for_key(ZERO_NONCE),
            Aad::empty(),
            &mut in_out,
        )
        .map_err(|_| CryptoError::AuthenticationFailed)?;

        let mut out = Vec::with_capacity(wrapped.len() + in_out.len());
        out.extend_from_slice(&wrapped);
        out.extend_from_slice(&in_out);
        Ok(out)
    }
}

/// Receiver side: holds the own private key.
#[derive(Clone)]
pub struct Decryptor {
    private_key: RsaPrivateKey,
}

impl std::fmt::Debug for Decryptor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Decryptor")
            .field("key_size", &self.key_size())
            .finish()
    }
}

impl Decryptor {
    pub fn new(private_key: RsaPrivateKey) -> Self {
        Self { private_key }
    }

    /// Loads a PEM private key (`PRIVATE KEY` or `RSA PRIVATE KEY`).
    pub fn from_pem(pem: &str) -> Result<Self, CryptoError> {
        let key = RsaPrivateKey::from_pkcs8_pem(pem)
            .or_else(|_| RsaPrivateKey::from_pkcs1_pem(pem))
            .map_err(|e| CryptoError::InvalidKey(e.to_string()))?;
        Ok(Self::new(key))
    }

    pub fn load(path: &Path) -> Result<Self, CryptoError> {
        let pem = std::fs::read_to_string(path)?;
        Self::from_pem(&pem)
    }

    pub fn key_size(&self) -> usize {
        self.private_key.size()
    }

    pub fn public_key(&self) -> RsaPublicKey {
        self.private_key.to_public_key()
    }

    pub fn decrypt(&self, data: &[u8]) -> Result<Vec<u8>, CryptoError> {
        let envelope = Envelope::parse(data, self.key_size())?;

        let session_key = self
            .private_key
            .decrypt(Pkcs1v15Encrypt, envelope.session_key)
            .map_err(|_| CryptoError::KeyUnwrapFailed)?;
        if session_key.len() != SESSION_KEY_LEN {
            return Err(CryptoError::KeyUnwrapFailed);
        }

        let key = aead_key(&session_key)?;
        let mut in_out = envelope.payload.to_vec();
        let plaintext = key
            .open_in_place(
                Nonce::assume_unique_for_key(ZERO_NONCE),
                Aad::empty(),
                &mut in_out,
            )
            .map_err(|_| CryptoError::AuthenticationFailed)?;
        Ok(plaintext.to_vec())
    }
}
