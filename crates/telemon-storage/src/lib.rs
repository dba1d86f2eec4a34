//! Metric storage collaborators.
//!
//! The server depends only on the [`Storage`] capability. Two backends are
//! provided: [`memory::MemoryStorage`] and [`sqlite::SqliteStorage`]. Gauges
//! overwrite the stored value; counters accumulate deltas.

pub mod error;
pub mod memory;
pub mod sqlite;

use async_trait::async_trait;
use error::{Result, StorageError};
use std::future::Future;
use std::time::Duration;
use telemon_common::types::{Metric, MetricKey};

pub use memory::MemoryStorage;
pub use sqlite::SqliteStorage;

/// Persistence backend for metrics.
///
/// Implementations are shared across request tasks and must do their own
/// locking.
#[async_trait]
pub trait Storage: Send + Sync {
    /// Applies one metric and returns the stored result.
    async fn add(&self, metric: &Metric) -> Result<Metric>;

    /// Applies all metrics atomically: either every entry is stored or none.
    async fn batch(&self, metrics: &[Metric]) -> Result<()>;

    async fn find(&self, key: &MetricKey) -> Result<Metric>;

    /// All stored metrics, ordered by name then kind.
    async fn get(&self) -> Result<Vec<Metric>>;

    async fn ping(&self) -> Result<()>;
}

/// Bounds a storage call by `deadline`, cancelling it when the deadline
/// passes.
pub async fn with_deadline<T, F>(deadline: Duration, fut: F) -> Result<T>
where
    F: Future<Output = Result<T>>,
{
    match tokio::time::timeout(deadline, fut).await {
        Ok(result) => result,
        Err(_) => Err(StorageError::Timeout),
    }
}

pub(crate) fn validate_all(metrics: &[Metric]) -> Result<()> {
    for metric in metrics {
        metric.validate()?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test(start_paused = true)]
    async fn deadline_maps_to_timeout() {
        let out: Result<()> = with_deadline(Duration::from_millis(10), async {
            tokio::time::sleep(Duration::from_secs(1)).await;
            Ok(())
        })
        .await;
        let err = out.unwrap_err();
        assert!(matches!(err, StorageError::Timeout));
        assert!(!err.is_transient());
    }
}
