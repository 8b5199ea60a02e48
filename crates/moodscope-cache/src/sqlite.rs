//! Disk-backed cache on rusqlite.
//!
//! One table keyed by the content-addressed cache key, with a unix-seconds
//! expiry column. Expired rows are dropped opportunistically on read. All
//! connection work happens on the blocking pool behind an `Arc<Mutex<_>>`.

use std::collections::HashMap;
use std::path::Path;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use anyhow::Result;
use async_trait::async_trait;
use chrono::Utc;
use rusqlite::{params, Connection, OptionalExtension};

use crate::{CachedValue, ResultCache};

#[derive(Clone)]
pub struct SqliteCache {
    db: Arc<Mutex<Connection>>,
    ttl_seconds: i64,
}

impl SqliteCache {
    pub fn open(path: &Path, ttl: Duration) -> Result<Self> {
        let conn = Connection::open(path)?;
        conn.pragma_update(None, "journal_mode", "WAL")?;
        Self::from_connection(conn, ttl)
    }

    pub fn open_in_memory(ttl: Duration) -> Result<Self> {
        Self::from_connection(Connection::open_in_memory()?, ttl)
    }

    fn from_connection(conn: Connection, ttl: Duration) -> Result<Self> {
        conn.execute_batch(
            "CREATE TABLE IF NOT EXISTS result_cache (
                key        TEXT PRIMARY KEY,
                value      TEXT NOT NULL,
                expires_at INTEGER NOT NULL
            );
            CREATE INDEX IF NOT EXISTS idx_result_cache_expiry
                ON result_cache(expires_at);",
        )?;
        Ok(Self {
            db: Arc::new(Mutex::new(conn)),
            ttl_seconds: ttl.as_secs() as i64,
        })
    }

    fn read_many(
        db: &Arc<Mutex<Connection>>,
        keys: &[String],
    ) -> Result<HashMap<String, CachedValue>> {
        let now = Utc::now().timestamp();
        let conn = db
            .lock()
            .map_err(|_| anyhow::anyhow!("cache connection poisoned"))?;
        let mut found = HashMap::new();
        for key in keys {
            let row: Option<(String, i64)> = conn
                .query_row(
                    "SELECT value, expires_at FROM result_cache WHERE key = ?1",
                    params![key],
                    |row| Ok((row.get(0)?, row.get(1)?)),
                )
                .optional()?;
            match row {
                Some((_, expires_at)) if expires_at <= now => {
                    conn.execute("DELETE FROM result_cache WHERE key = ?1", params![key])?;
                }
                Some((raw, _)) => match serde_json::from_str::<CachedValue>(&raw) {
                    Ok(value) => {
                        found.insert(key.clone(), value);
                    }
                    Err(e) => {
                        // Corrupt row: treat as a miss and drop it.
                        tracing::warn!("dropping corrupt cache row for {key}: {e}");
                        conn.execute("DELETE FROM result_cache WHERE key = ?1", params![key])?;
                    }
                },
                None => {}
            }
        }
        Ok(found)
    }

    fn write_many(
        db: &Arc<Mutex<Connection>>,
        ttl_seconds: i64,
        items: &[(String, CachedValue)],
    ) -> Result<()> {
        let expires_at = Utc::now().timestamp() + ttl_seconds;
        let conn = db
            .lock()
            .map_err(|_| anyhow::anyhow!("cache connection poisoned"))?;
        for (key, value) in items {
            let raw = serde_json::to_string(value)?;
            conn.execute(
                "INSERT OR REPLACE INTO result_cache (key, value, expires_at)
                 VALUES (?1, ?2, ?3)",
                params![key, raw, expires_at],
            )?;
        }
        Ok(())
    }
}

#[async_trait]
impl ResultCache for SqliteCache {
    async fn get_many(&self, keys: &[String]) -> HashMap<String, CachedValue> {
        let db = self.db.clone();
        let keys = keys.to_vec();
        let result =
            tokio::task::spawn_blocking(move || Self::read_many(&db, &keys)).await;
        match result {
            Ok(Ok(found)) => found,
            Ok(Err(e)) => {
                tracing::warn!("cache read failed, treating as miss: {e}");
                HashMap::new()
            }
            Err(e) => {
                tracing::warn!("cache read task aborted, treating as miss: {e}");
                HashMap::new()
            }
        }
    }

    async fn put_many(&self, items: Vec<(String, CachedValue)>) {
        if items.is_empty() {
            return;
        }
        let db = self.db.clone();
        let ttl_seconds = self.ttl_seconds;
        let result =
            tokio::task::spawn_blocking(move || Self::write_many(&db, ttl_seconds, &items)).await;
        match result {
            Ok(Ok(())) => {}
            Ok(Err(e)) => tracing::warn!("cache write dropped: {e}"),
            Err(e) => tracing::warn!("cache write task aborted: {e}"),
        }
    }
}
