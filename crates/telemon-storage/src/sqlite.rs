use crate::error::{Result, StorageError};
use crate::{validate_all, Storage};
use async_trait::async_trait;
use rusqlite::{Connection, OptionalExtension};
use std::path::Path;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;
use telemon_common::types::{Metric, MetricKey, MetricKind};

const SCHEMA: &str = "
CREATE TABLE IF NOT EXISTS metrics (
    name TEXT NOT NULL,
    kind TEXT NOT NULL,
    delta INTEGER,
    value REAL,
    PRIMARY KEY (name, kind)
);
";

const UPSERT_COUNTER: &str = "INSERT INTO metrics (name, kind, delta, value) VALUES (?1, 'counter', ?2, NULL)
     ON CONFLICT(name, kind) DO UPDATE SET delta = delta + excluded.delta";

const UPSERT_GAUGE: &str = "INSERT INTO metrics (name, kind, delta, value) VALUES (?1, 'gauge', NULL, ?2)
     ON CONFLICT(name, kind) DO UPDATE SET value = excluded.value";

const BUSY_TIMEOUT: Duration = Duration::from_secs(1);

/// Single-file SQLite backend. Blocking calls run on the blocking pool.
#[derive(Clone)]
pub struct SqliteStorage {
    conn: Arc<Mutex<Connection>>,
}

impl SqliteStorage {
    /// Opens (or creates) the database at `path` and applies the schema.
    ///
    /// # Errors
    ///
    /// Busy, locked or unopenable databases map to the transient
    /// [`StorageError::Unavailable`].
    pub fn open(path: &Path) -> Result<Self> {
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent)
                .map_err(|e| StorageError::Unavailable(format!("{}: {e}", parent.display())))?;
        }
        let conn = Connection::open(path)?;
        conn.busy_timeout(BUSY_TIMEOUT)?;
        conn.execute_batch("PRAGMA journal_mode=WAL;")?;
        conn.execute_batch(SCHEMA)?;
        tracing::info!(path = %path.display(), "Opened SQLite storage");
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    async fn with_conn<F, R>(&self, f: F) -> Result<R>
    where
        F: FnOnce(&mut Connection) -> Result<R> + Send + 'static,
        R: Send + 'static,
    {
        let conn = Arc::clone(&self.conn);
        tokio::task::spawn_blocking(move || {
            let mut guard = lock(&conn);
            f(&mut guard)
        })
        .await
        .map_err(|e| StorageError::Other(format!("storage task failed: {e}")))?
    }
}

fn lock(conn: &Mutex<Connection>) -> MutexGuard<'_, Connection> {
    conn.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

fn upsert(conn: &Connection, metric: &Metric) -> Result<()> {
    match metric.kind {
        MetricKind::Counter => {
            conn.prepare_cached(UPSERT_COUNTER)?
                .execute(rusqlite::params![&metric.name, metric.delta])?;
        }
        MetricKind::Gauge => {
            conn.prepare_cached(UPSERT_GAUGE)?
                .execute(rusqlite::params![&metric.name, metric.value])?;
        }
    }
    Ok(())
}

fn row_to_metric(row: &rusqlite::Row<'_>) -> rusqlite::Result<(String, String, Option<i64>, Option<f64>)> {
    Ok((row.get(0)?, row.get(1)?, row.get(2)?, row.get(3)?))
}

fn into_metric(
    (name, kind, delta, value): (String, String, Option<i64>, Option<f64>),
) -> Result<Metric> {
    let kind: MetricKind = kind.parse()?;
    let metric = Metric {
        name,
        kind,
        delta,
        value,
    };
    metric.validate()?;
    Ok(metric)
}

fn select_one(conn: &Connection, key: &MetricKey) -> Result<Metric> {
    let row = conn
        .prepare_cached("SELECT name, kind, delta, value FROM metrics WHERE name = ?1 AND kind = ?2")?
        .query_row(rusqlite::params![&key.name, key.kind.to_string()], row_to_metric)
        .optional()?;
    match row {
        Some(row) => into_metric(row),
        None => Err(StorageError::NotFound(key.clone())),
    }
}

#[async_trait]
impl Storage for SqliteStorage {
    async fn add(&self, metric: &Metric) -> Result<Metric> {
        metric.validate()?;
        let metric = metric.clone();
        self.with_conn(move |conn| {
            upsert(conn, &metric)?;
            select_one(conn, &metric.key())
        })
        .await
    }

    async fn batch(&self, metrics: &[Metric]) -> Result<()> {
        validate_all(metrics)?;
        let metrics = metrics.to_vec();
        self.with_conn(move |conn| {
            let tx = conn.transaction()?;
            for metric in &metrics {
                upsert(&tx, metric)?;
            }
            tx.commit()?;
            Ok(())
        })
        .await
    }

    async fn find(&self, key: &MetricKey) -> Result<Metric> {
        let key = key.clone();
        self.with_conn(move |conn| select_one(conn, &key)).await
    }

    async fn get(&self) -> Result<Vec<Metric>> {
        self.with_conn(|conn| {
            let mut stmt =
                conn.prepare_cached("SELECT name, kind, delta, value FROM metrics ORDER BY name, kind")?;
            let rows = stmt.query_map([], row_to_metric)?;
            let mut out = Vec::new();
            for row in rows {
                out.push(into_metric(row?)?);
            }
            Ok(out)
        })
        .await
    }

    async fn ping(&self) -> Result<()> {
        self.with_conn(|conn| {
            conn.query_row("SELECT 1", [], |_| Ok(()))?;
            Ok(())
        })
        .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn setup() -> (TempDir, SqliteStorage) {
        let dir = TempDir::new().unwrap();
        let store = SqliteStorage::open(&dir.path().join("metrics.db")).unwrap();
        (dir, store)
    }

    #[tokio::test]
    async fn batch_then_get_returns_exact_values() {
        let (_dir, store) = setup();
        store
            .batch(&[Metric::counter("PollCount", 1), Metric::gauge("Alloc", 123.0)])
            .await
            .unwrap();
        store
            .batch(&[Metric::counter("PollCount", 2)])
            .await
            .unwrap();

        let all = store.get().await.unwrap();
        assert_eq!(
            all,
            vec![Metric::gauge("Alloc", 123.0), Metric::counter("PollCount", 3)]
        );
    }

    #[tokio::test]
    async fn add_returns_accumulated_counter() {
        let (_dir, store) = setup();
        store.add(&Metric::counter("Hits", 10)).await.unwrap();
        let out = store.add(&Metric::counter("Hits", -3)).await.unwrap();
        assert_eq!(out, Metric::counter("Hits", 7));
    }

    #[tokio::test]
    async fn find_missing_is_not_found() {
        let (_dir, store) = setup();
        let err = store
            .find(&MetricKey {
                name: "Nope".into(),
                kind: MetricKind::Gauge,
            })
            .await
            .unwrap_err();
        assert!(matches!(err, StorageError::NotFound(_)));
        assert!(store.ping().await.is_ok());
    }

    #[tokio::test]
    async fn data_survives_reopen() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("metrics.db");
        {
            let store = SqliteStorage::open(&path).unwrap();
            store.add(&Metric::gauge("Alloc", 7.5)).await.unwrap();
        }
        let store = SqliteStorage::open(&path).unwrap();
        assert_eq!(store.get().await.unwrap(), vec![Metric::gauge("Alloc", 7.5)]);
    }

    #[test]
    fn unopenable_path_is_transient() {
        let dir = TempDir::new().unwrap();
        let blocker = dir.path().join("not-a-dir");
        std::fs::write(&blocker, b"x").unwrap();
        let err = SqliteStorage::open(&blocker.join("metrics.db")).err().unwrap();
        assert!(err.is_transient(), "unexpected error: {err}");
    }
}
