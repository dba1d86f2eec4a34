use telemon_common::types::{MetricError, MetricKey};

/// Errors returned by [`crate::Storage`] backends.
///
/// # Examples
///
/// ```rust
/// use telemon_common::types::{MetricKey, MetricKind};
/// use telemon_storage::error::StorageError;
///
/// let err = StorageError::NotFound(MetricKey {
///     name: "Alloc".into(),
///     kind: MetricKind::Gauge,
/// });
/// assert!(err.to_string().contains("Alloc"));
/// assert!(!err.is_transient());
/// assert!(!StorageError::Timeout.is_transient());
/// assert!(StorageError::Unavailable("busy".into()).is_transient());
/// ```
#[derive(Debug, thiserror::Error)]
pub enum StorageError {
    #[error("Storage: metric {} ({}) not found", .0.name, .0.kind)]
    NotFound(MetricKey),

    #[error("Storage: invalid metric: {0}")]
    Invalid(#[from] MetricError),

    /// The backend is temporarily unable to serve (busy, locked, cannot open).
    #[error("Storage: backend unavailable: {0}")]
    Unavailable(String),

    /// The call outlived its deadline. The backend may still complete the
    /// write afterwards, so this is never retried.
    #[error("Storage: operation exceeded its deadline")]
    Timeout,

    #[error("Storage: SQLite error: {0}")]
    Sqlite(rusqlite::Error),

    #[error("Storage: {0}")]
    Other(String),
}

impl StorageError {
    /// Whether retrying the same call may succeed without applying it twice.
    pub fn is_transient(&self) -> bool {
        matches!(self, StorageError::Unavailable(_))
    }
}

impl From<rusqlite::Error> for StorageError {
    fn from(e: rusqlite::Error) -> Self {
        use rusqlite::ErrorCode;
        match e.sqlite_error_code() {
            Some(ErrorCode::DatabaseBusy | ErrorCode::DatabaseLocked | ErrorCode::CannotOpen) => {
                StorageError::Unavailable(e.to_string())
            }
            _ => StorageError::Sqlite(e),
        }
    }
}

pub type Result<T> = std::result::Result<T, StorageError>;
