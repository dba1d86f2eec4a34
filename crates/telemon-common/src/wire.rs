//! Names of the out-of-band fields carried next to a payload.

/// HTTP header names.
pub mod http {
    /// Hex HMAC-SHA-256 of the body.
    pub const SIGNATURE: &str = "HashSHA256";
    /// `true` when the body is an encrypted envelope.
    pub const ENCRYPTED: &str = "X-Encrypted";
    /// Client address as seen before any proxy.
    pub const REAL_IP: &str = "X-Real-IP";
    /// Per-request id echoed by the server's request logging.
    pub const TRACE_ID: &str = "X-Trace-Id";
}

/// gRPC metadata keys. Metadata keys are lower-case.
pub mod metadata {
    pub const SIGNATURE: &str = "hashsha256";
    pub const ENCRYPTED: &str = "x-encrypted";
    pub const CONTENT_ENCODING: &str = "x-content-encoding";
    pub const REAL_IP: &str = "x-real-ip";
}

/// Whether an encrypted marker value means "encrypted".
pub fn is_marked(value: Option<&str>) -> bool {
    value.is_some_and(|v| v.trim().eq_ignore_ascii_case("true"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn marker_parsing() {
        assert!(is_marked(Some("true")));
        assert!(is_marked(Some(" TRUE ")));
        assert!(!is_marked(Some("false")));
        assert!(!is_marked(Some("1")));
        assert!(!is_marked(None));
    }
}
