use crate::error::{Result, StorageError};
use crate::{validate_all, Storage};
use async_trait::async_trait;
use std::collections::BTreeMap;
use std::sync::{RwLock, RwLockReadGuard, RwLockWriteGuard};
use telemon_common::types::{Metric, MetricKey, MetricKind};

/// Process-local store. Also the degraded fallback when the database
/// cannot be reached at startup.
#[derive(Default)]
pub struct MemoryStorage {
    metrics: RwLock<BTreeMap<MetricKey, Metric>>,
}

impl MemoryStorage {
    pub fn new() -> Self {
        Self::default()
    }

    fn read(&self) -> RwLockReadGuard<'_, BTreeMap<MetricKey, Metric>> {
        self.metrics
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn write(&self) -> RwLockWriteGuard<'_, BTreeMap<MetricKey, Metric>> {
        self.metrics
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

/// Merges `metric` into `map`: gauges replace, counters accumulate.
fn apply(map: &mut BTreeMap<MetricKey, Metric>, metric: &Metric) -> Metric {
    let key = metric.key();
    let merged = match (metric.kind, map.get(&key)) {
        (MetricKind::Counter, Some(existing)) => Metric::counter(
            metric.name.clone(),
            existing
                .delta
                .unwrap_or_default()
                .wrapping_add(metric.delta.unwrap_or_default()),
        ),
        _ => metric.clone(),
    };
    map.insert(key, merged.clone());
    merged
}

#[async_trait]
impl Storage for MemoryStorage {
    async fn add(&self, metric: &Metric) -> Result<Metric> {
        metric.validate()?;
        Ok(apply(&mut self.write(), metric))
    }

    async fn batch(&self, metrics: &[Metric]) -> Result<()> {
        validate_all(metrics)?;
        let mut map = self.write();
        for metric in metrics {
            apply(&mut map, metric);
        }
        Ok(())
    }

    async fn find(&self, key: &MetricKey) -> Result<Metric> {
        self.read()
            .get(key)
            .cloned()
            .ok_or_else(|| StorageError::NotFound(key.clone()))
    }

    async fn get(&self) -> Result<Vec<Metric>> {
        Ok(self.read().values().cloned().collect())
    }

    async fn ping(&self) -> Result<()> {
        Ok(())
    }
}
