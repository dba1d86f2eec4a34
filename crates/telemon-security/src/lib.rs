//! Payload protection shared by the agent and the server.
//!
//! - [`crypto`]: hybrid RSA + AES-256-GCM envelope encryption
//! - [`sign`]: HMAC-SHA-256 request signing
//! - [`netguard`]: source-subnet allow-list
//!
//! Every component here is a leaf: errors are returned to the caller and
//! never logged and swallowed.

pub mod crypto;
pub mod netguard;
pub mod sign;

pub use crypto::{CryptoError, Decryptor, Encryptor};
pub use netguard::NetworkGuard;
pub use sign::Signer;
