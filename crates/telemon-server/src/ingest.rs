//! Storage access for request handlers: every call is bounded by a
//! deadline, writes are retried while the backend reports itself unavailable.
//! A write that misses its deadline may still land, so it is not retried.

use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use telemon_common::retry::{RetryError, RetryExecutor};
use telemon_common::types::{Metric, MetricKey};
use telemon_storage::error::StorageError;
use telemon_storage::{with_deadline, MemoryStorage, SqliteStorage, Storage};

pub type IngestError = RetryError<StorageError>;

#[derive(Clone)]
pub struct Ingest {
    storage: Arc<dyn Storage>,
    retry: RetryExecutor,
    deadline: Duration,
}

impl Ingest {
    pub fn new(storage: Arc<dyn Storage>, retry: RetryExecutor, deadline: Duration) -> Self {
        Self {
            storage,
            retry,
            deadline,
        }
    }

    pub fn storage(&self) -> &Arc<dyn Storage> {
        &self.storage
    }

    /// Stores a verified batch. All-or-nothing per attempt.
    pub async fn batch(&self, metrics: &[Metric]) -> Result<(), IngestError> {
        let storage = &self.storage;
        let deadline = self.deadline;
        self.retry
            .run(
                || with_deadline(deadline, storage.batch(metrics)),
                StorageError::is_transient,
            )
            .await
    }

    pub async fn add(&self, metric: &Metric) -> Result<Metric, IngestError> {
        let storage = &self.storage;
        let deadline = self.deadline;
        self.retry
            .run(
                || with_deadline(deadline, storage.add(metric)),
                StorageError::is_transient,
            )
            .await
    }

    pub async fn find(&self, key: &MetricKey) -> Result<Metric, StorageError> {
        with_deadline(self.deadline, self.storage.find(key)).await
    }

    pub async fn get(&self) -> Result<Vec<Metric>, StorageError> {
        with_deadline(self.deadline, self.storage.get()).await
    }

    pub async fn ping(&self) -> Result<(), StorageError> {
        with_deadline(self.deadline, self.storage.ping()).await
    }
}

/// Opens the configured backend. A SQLite database that stays unavailable
/// through every retry degrades to in-memory storage; other open errors
/// are fatal.
pub async fn open_storage(
    path: Option<&Path>,
    retry: RetryExecutor,
) -> Result<Arc<dyn Storage>, StorageError> {
    let Some(path) = path else {
        tracing::info!("Using in-memory storage");
        return Ok(Arc::new(MemoryStorage::new()));
    };

    let opened = retry
        .run(
            || std::future::ready(SqliteStorage::open(path)),
            StorageError::is_transient,
        )
        .await;
    match opened {
        Ok(sqlite) => Ok(Arc::new(sqlite)),
        Err(RetryError::Exhausted { source, .. }) => {
            tracing::warn!(
                path = %path.display(),
                error = %source,
                "Database unavailable, falling back to in-memory storage"
            );
            Ok(Arc::new(MemoryStorage::new()))
        }
        Err(RetryError::Permanent { source, .. }) => Err(source),
    }
}
