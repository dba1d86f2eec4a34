//! gzip payload codec.

use flate2::read::{GzDecoder, GzEncoder};
use flate2::Compression;
use std::io::Read;

/// Content encoding name used in HTTP headers and RPC metadata.
pub const GZIP: &str = "gzip";

/// Upper bound on a decompressed request body.
pub const MAX_DECOMPRESSED_LEN: usize = 16 * 1024 * 1024;

#[derive(Debug, thiserror::Error)]
pub enum CompressError {
    #[error("unsupported content encoding: {0}")]
    Unsupported(String),

    #[error("decompressed body exceeds {limit} bytes")]
    TooLarge { limit: usize },

    #[error("gzip codec error: {0}")]
    Io(#[from] std::io::Error),
}

pub fn gzip(data: &[u8]) -> Result<Vec<u8>, CompressError> {
    let mut encoder = GzEncoder::new(data, Compression::default());
    let mut compressed = Vec::new();
    encoder.read_to_end(&mut compressed)?;
    Ok(compressed)
}

/// Decompresses up to [`MAX_DECOMPRESSED_LEN`] bytes.
pub fn gunzip(data: &[u8]) -> Result<Vec<u8>, CompressError> {
    gunzip_with_limit(data, MAX_DECOMPRESSED_LEN)
}

/// Decompresses `data`, refusing output longer than `limit` bytes.
pub fn gunzip_with_limit(data: &[u8], limit: usize) -> Result<Vec<u8>, CompressError> {
    let mut decoder = GzDecoder::new(data).take(limit as u64 + 1);
    let mut decompressed = Vec::new();
    decoder.read_to_end(&mut decompressed)?;
    if decompressed.len() > limit {
        return Err(CompressError::TooLarge { limit });
    }
    Ok(decompressed)
}

/// Decodes `data` according to a content-encoding marker. `None` and
/// `identity` pass through.
pub fn decode(encoding: Option<&str>, data: Vec<u8>) -> Result<Vec<u8>, CompressError> {
    match encoding.map(str::trim) {
        None | Some("") | Some("identity") => Ok(data),
        Some(enc) if enc.eq_ignore_ascii_case(GZIP) => gunzip(&data),
        Some(other) => Err(CompressError::Unsupported(other.to_string())),
    }
}
