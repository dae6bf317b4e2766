//! Durable message bus client: named streams, consumer groups, at-least-once
//! delivery. The log lives in a single WAL-mode SQLite file shared by every
//! service process; offsets are committed per consumer group after each
//! handled batch, so redelivery after a crash is expected and handlers must
//! be idempotent.

use std::future::Future;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use rusqlite::{params, Connection};
use serde::de::DeserializeOwned;
use serde::Serialize;
use thiserror::Error;
use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;

const BATCH_SIZE: usize = 64;
const POLL_INTERVAL: Duration = Duration::from_millis(50);
const PUBLISH_ATTEMPTS: u32 = 3;
const HANDLER_ATTEMPTS: u32 = 3;

#[derive(Debug, Error)]
pub enum BusError {
    #[error("bus database error: {0}")]
    Database(#[from] rusqlite::Error),
    #[error("bus serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// One consumed record, with enough envelope for incident forensics.
#[derive(Debug, Clone)]
pub struct Record<T> {
    pub offset: i64,
    pub key: String,
    pub published_at: DateTime<Utc>,
    pub value: T,
}

/// Client handle onto the shared stream log. Cheap to clone.
#[derive(Clone)]
pub struct MeshBus {
    conn: Arc<Mutex<Connection>>,
    prefix: String,
}

impl MeshBus {
    /// Opens (creating if needed) the bus log at `path`. Streams are
    /// namespaced under `prefix`, e.g. `agentmesh.topology`.
    pub fn open(path: &Path, prefix: &str) -> Result<Self, BusError> {
        if let Some(parent) = path.parent() {
            let _ = std::fs::create_dir_all(parent);
        }
        let conn = Connection::open(path)?;
        conn.busy_timeout(Duration::from_secs(5))?;
        conn.execute_batch("PRAGMA journal_mode=WAL; PRAGMA synchronous=NORMAL;")?;
        run_migrations(&conn)?;
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
            prefix: prefix.to_string(),
        })
    }

    fn full_stream(&self, stream: &str) -> String {
        format!("{}.{}", self.prefix, stream)
    }

    /// Appends one record. Retried internally; fails only once the retry
    /// budget is exhausted.
    pub async fn publish<T: Serialize>(
        &self,
        stream: &str,
        key: &str,
        value: &T,
    ) -> Result<(), BusError> {
        let full = self.full_stream(stream);
        let payload = serde_json::to_string(value)?;
        let published_at = Utc::now().to_rfc3339();

        let mut last_err = None;
        for attempt in 0..PUBLISH_ATTEMPTS {
            let result = {
                let conn = self.conn.lock().await;
                conn.execute(
                    "INSERT INTO records (stream, key, value, published_at) VALUES (?1, ?2, ?3, ?4)",
                    params![full, key, payload, published_at],
                )
            };
            match result {
                Ok(_) => return Ok(()),
                Err(err) => {
                    tracing::warn!(stream = %full, %key, attempt, error = %err, "publish failed, retrying");
                    last_err = Some(err);
                    tokio::time::sleep(Duration::from_millis(50 * u64::from(attempt + 1))).await;
                }
            }
        }
        Err(BusError::Database(last_err.expect("retry loop ran")))
    }

    /// Consumes `stream` as a member of `group`, invoking `handler` once per
    /// accepted record, in offset order. Blocks until `cancel` fires. The
    /// group offset starts at the earliest available record on first connect
    /// and is committed after each batch. A handler that keeps failing after
    /// retries drops the record and moves on; malformed records are dropped
    /// without invoking the handler.
    pub async fn consume<T, F, Fut>(
        &self,
        stream: &str,
        group: &str,
        cancel: CancellationToken,
        mut handler: F,
    ) -> Result<(), BusError>
    where
        T: DeserializeOwned + Clone,
        F: FnMut(Record<T>) -> Fut,
        Fut: Future<Output = anyhow::Result<()>>,
    {
        let full = self.full_stream(stream);
        {
            let conn = self.conn.lock().await;
            conn.execute(
                "INSERT OR IGNORE INTO offsets (stream, group_id, next_seq) VALUES (?1, ?2, 0)",
                params![full, group],
            )?;
        }

        loop {
            if cancel.is_cancelled() {
                return Ok(());
            }

            let (claimed_from, rows) = self.fetch_batch(&full, group).await?;
            if rows.is_empty() {
                tokio::select! {
                    _ = cancel.cancelled() => return Ok(()),
                    _ = tokio::time::sleep(POLL_INTERVAL) => continue,
                }
            }

            let next_seq = rows.last().map(|row| row.0 + 1).expect("non-empty batch");
            for (offset, key, payload, published_at) in rows {
                let value: T = match serde_json::from_str(&payload) {
                    Ok(value) => value,
                    Err(err) => {
                        tracing::warn!(stream = %full, %group, offset, error = %err, "dropping malformed record");
                        continue;
                    }
                };
                let record = Record {
                    offset,
                    key,
                    published_at,
                    value,
                };
                self.handle_with_retry(&full, group, record, &mut handler)
                    .await;
            }

            // CAS commit: if another group member advanced past us, its
            // commit wins and we re-read from the shared offset.
            let conn = self.conn.lock().await;
            conn.execute(
                "UPDATE offsets SET next_seq = ?1 WHERE stream = ?2 AND group_id = ?3 AND next_seq = ?4",
                params![next_seq, full, group, claimed_from],
            )?;
        }
    }

    async fn handle_with_retry<T, F, Fut>(
        &self,
        full: &str,
        group: &str,
        record: Record<T>,
        handler: &mut F,
    ) where
        T: DeserializeOwned + Clone,
        F: FnMut(Record<T>) -> Fut,
        Fut: Future<Output = anyhow::Result<()>>,
    {
        let offset = record.offset;
        for attempt in 0..HANDLER_ATTEMPTS {
            match handler(record.clone()).await {
                Ok(()) => return,
                Err(err) if attempt + 1 < HANDLER_ATTEMPTS => {
                    tracing::debug!(stream = %full, %group, offset, attempt, error = %err, "handler failed, retrying");
                    tokio::time::sleep(Duration::from_millis(100)).await;
                }
                Err(err) => {
                    tracing::warn!(stream = %full, %group, offset, error = %err, "handler failed, dropping record");
                    return;
                }
            }
        }
    }

    async fn fetch_batch(
        &self,
        full: &str,
        group: &str,
    ) -> Result<(i64, Vec<(i64, String, String, DateTime<Utc>)>), BusError> {
        let conn = self.conn.lock().await;
        let next_seq: i64 = conn.query_row(
            "SELECT next_seq FROM offsets WHERE stream = ?1 AND group_id = ?2",
            params![full, group],
            |row| row.get(0),
        )?;

        let mut stmt = conn.prepare(
            "SELECT seq, key, value, published_at FROM records
             WHERE stream = ?1 AND seq >= ?2 ORDER BY seq LIMIT ?3",
        )?;
        let rows = stmt
            .query_map(params![full, next_seq, BATCH_SIZE as i64], |row| {
                Ok((
                    row.get::<_, i64>(0)?,
                    row.get::<_, String>(1)?,
                    row.get::<_, String>(2)?,
                    row.get::<_, String>(3)?,
                ))
            })?
            .collect::<Result<Vec<_>, _>>()?;

        let rows = rows
            .into_iter()
            .map(|(seq, key, value, published_at)| {
                let published_at = DateTime::parse_from_rfc3339(&published_at)
                    .map(|dt| dt.with_timezone(&Utc))
                    .unwrap_or_else(|_| Utc::now());
                (seq, key, value, published_at)
            })
            .collect();

        Ok((next_seq, rows))
    }

    /// Reads every record currently on a stream, outside any group. Intended
    /// for diagnostics and tests; malformed records are skipped.
    pub async fn read_all<T: DeserializeOwned>(
        &self,
        stream: &str,
    ) -> Result<Vec<Record<T>>, BusError> {
        let full = self.full_stream(stream);
        let conn = self.conn.lock().await;
        let mut stmt = conn.prepare(
            "SELECT seq, key, value, published_at FROM records WHERE stream = ?1 ORDER BY seq",
        )?;
        let rows = stmt
            .query_map(params![full], |row| {
                Ok((
                    row.get::<_, i64>(0)?,
                    row.get::<_, String>(1)?,
                    row.get::<_, String>(2)?,
                    row.get::<_, String>(3)?,
                ))
            })?
            .collect::<Result<Vec<_>, _>>()?;

        Ok(rows
            .into_iter()
            .filter_map(|(offset, key, payload, published_at)| {
                let value = serde_json::from_str(&payload).ok()?;
                let published_at = DateTime::parse_from_rfc3339(&published_at)
                    .map(|dt| dt.with_timezone(&Utc))
                    .unwrap_or_else(|_| Utc::now());
                Some(Record {
                    offset,
                    key,
                    published_at,
                    value,
                })
            })
            .collect())
    }
}

fn run_migrations(conn: &Connection) -> Result<(), rusqlite::Error> {
    conn.execute_batch(
        r#"
        CREATE TABLE IF NOT EXISTS records (
            seq INTEGER PRIMARY KEY AUTOINCREMENT,
            stream TEXT NOT NULL,
            key TEXT NOT NULL,
            value TEXT NOT NULL,
            published_at TEXT NOT NULL
        );
        CREATE INDEX IF NOT EXISTS idx_records_stream ON records(stream, seq);
        CREATE TABLE IF NOT EXISTS offsets (
            stream TEXT NOT NULL,
            group_id TEXT NOT NULL,
            next_seq INTEGER NOT NULL,
            PRIMARY KEY (stream, group_id)
        );
        "#,
    )
}
