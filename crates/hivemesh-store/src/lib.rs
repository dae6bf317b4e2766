//! Keyed state store client: typed JSON get/set with optional TTL over a
//! WAL-mode SQLite file shared by every service process. Writers stay out of
//! each other's way through key namespaces (`graph:`, `proposal:`,
//! `insight:`, `agent:`); there is no distributed locking.

use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use rusqlite::{params, Connection, OptionalExtension};
use serde::de::DeserializeOwned;
use serde::Serialize;
use thiserror::Error;
use tokio::sync::Mutex;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("store database error: {0}")]
    Database(#[from] rusqlite::Error),
    #[error("store serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// Client handle onto the shared state store. Cheap to clone.
#[derive(Clone)]
pub struct StateStore {
    conn: Arc<Mutex<Connection>>,
}

impl StateStore {
    pub fn open(path: &Path) -> Result<Self, StoreError> {
        if let Some(parent) = path.parent() {
            let _ = std::fs::create_dir_all(parent);
        }
        let conn = Connection::open(path)?;
        conn.busy_timeout(Duration::from_secs(5))?;
        conn.execute_batch("PRAGMA journal_mode=WAL; PRAGMA synchronous=NORMAL;")?;
        conn.execute_batch(
            "CREATE TABLE IF NOT EXISTS kv (
                key TEXT PRIMARY KEY,
                value TEXT NOT NULL,
                expires_at INTEGER
            );",
        )?;
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    /// Stores `value` under `key`, replacing any prior value. A `ttl` of
    /// `None` keeps the value until overwritten or deleted.
    pub async fn set<T: Serialize>(
        &self,
        key: &str,
        value: &T,
        ttl: Option<Duration>,
    ) -> Result<(), StoreError> {
        let payload = serde_json::to_string(value)?;
        let expires_at = ttl.map(|ttl| Utc::now().timestamp_millis() + ttl.as_millis() as i64);
        let conn = self.conn.lock().await;
        conn.execute(
            "INSERT OR REPLACE INTO kv (key, value, expires_at) VALUES (?1, ?2, ?3)",
            params![key, payload, expires_at],
        )?;
        Ok(())
    }

    /// Returns the value under `key`, or `None` if absent or expired.
    pub async fn get<T: DeserializeOwned>(&self, key: &str) -> Result<Option<T>, StoreError> {
        let now = Utc::now().timestamp_millis();
        let conn = self.conn.lock().await;
        let row: Option<(String, Option<i64>)> = conn
            .query_row(
                "SELECT value, expires_at FROM kv WHERE key = ?1",
                params![key],
                |row| Ok((row.get(0)?, row.get(1)?)),
            )
            .optional()?;

        match row {
            None => Ok(None),
            Some((_, Some(expires_at))) if expires_at <= now => {
                conn.execute("DELETE FROM kv WHERE key = ?1", params![key])?;
                Ok(None)
            }
            Some((payload, _)) => Ok(Some(serde_json::from_str(&payload)?)),
        }
    }

    pub async fn delete(&self, key: &str) -> Result<(), StoreError> {
        let conn = self.conn.lock().await;
        conn.execute("DELETE FROM kv WHERE key = ?1", params![key])?;
        Ok(())
    }

    /// Returns every live `(key, value)` pair whose key starts with `prefix`,
    /// in key order. Rows that fail to deserialize are skipped, which lets a
    /// cold-starting service load what it can.
    pub async fn list_prefix<T: DeserializeOwned>(
        &self,
        prefix: &str,
    ) -> Result<Vec<(String, T)>, StoreError> {
        let now = Utc::now().timestamp_millis();
        let pattern = format!("{}%", prefix.replace('%', "\\%").replace('_', "\\_"));
        let conn = self.conn.lock().await;
        let mut stmt = conn.prepare(
            "SELECT key, value, expires_at FROM kv WHERE key LIKE ?1 ESCAPE '\\' ORDER BY key",
        )?;
        let rows = stmt
            .query_map(params![pattern], |row| {
                Ok((
                    row.get::<_, String>(0)?,
                    row.get::<_, String>(1)?,
                    row.get::<_, Option<i64>>(2)?,
                ))
            })?
            .collect::<Result<Vec<_>, _>>()?;

        let mut out = Vec::new();
        for (key, payload, expires_at) in rows {
            if matches!(expires_at, Some(at) if at <= now) {
                continue;
            }
            match serde_json::from_str(&payload) {
                Ok(value) => out.push((key, value)),
                Err(err) => {
                    tracing::warn!(%key, error = %err, "skipping undecodable store row");
                }
            }
        }
        Ok(out)
    }
}
