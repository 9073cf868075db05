//! Durable keyspace on SQLite.
//!
//! The runtime persists small records under Redis-style keys:
//!
//!   approval:<uuid>    — hash with a TTL (approval records)
//!   ratelimit:<bucket>  — sorted set, score = unix timestamp
//!   logs:all, logs:<t>  — capped lists, newest first
//!   chat:<user_id>      — capped list of conversation turns
//!
//! Hashes, sorted sets, and lists map onto three tables; multi-step
//! operations (conditional resolution, sliding-window admission, push+trim)
//! run inside a single transaction so concurrent callers observe them
//! atomically.

use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;

use rusqlite::{Connection, OptionalExtension, params};
use tokio::sync::Mutex;
use tracing::info;

use crate::error::Result;

/// Current unix time in seconds, fractional.
pub fn now_secs() -> f64 {
    chrono::Utc::now().timestamp_micros() as f64 / 1_000_000.0
}

#[derive(Clone)]
pub struct Store {
    conn: Arc<Mutex<Connection>>,
}

impl Store {
    pub fn open(path: &Path) -> Result<Self> {
        info!("opening store at {}", path.display());
        let conn = Connection::open(path)?;
        conn.execute_batch("PRAGMA journal_mode = WAL;")?;
        migrate(&conn)?;
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    pub fn open_in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory()?;
        migrate(&conn)?;
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    // -- Hashes --------------------------------------------------------------

    /// Set fields on a hash, creating it if absent.
    pub async fn hset(&self, key: &str, fields: &[(&str, &str)]) -> Result<()> {
        let mut conn = self.conn.lock().await;
        let tx = conn.transaction()?;
        for (field, value) in fields {
            tx.execute(
                "INSERT OR REPLACE INTO kv_hash (key, field, value) VALUES (?1, ?2, ?3)",
                params![key, field, value],
            )?;
        }
        tx.commit()?;
        Ok(())
    }

    /// Set fields only if `guard_field` currently equals `guard_value`.
    /// Returns false when the key is missing, expired, or the guard fails.
    pub async fn hset_if(
        &self,
        key: &str,
        guard_field: &str,
        guard_value: &str,
        fields: &[(&str, &str)],
    ) -> Result<bool> {
        let mut conn = self.conn.lock().await;
        let tx = conn.transaction()?;
        if expired(&tx, key)? {
            drop_key(&tx, key)?;
            tx.commit()?;
            return Ok(false);
        }
        let current: Option<String> = tx
            .query_row(
                "SELECT value FROM kv_hash WHERE key = ?1 AND field = ?2",
                params![key, guard_field],
                |row| row.get(0),
            )
            .optional()?;
        if current.as_deref() != Some(guard_value) {
            tx.commit()?;
            return Ok(false);
        }
        for (field, value) in fields {
            tx.execute(
                "INSERT OR REPLACE INTO kv_hash (key, field, value) VALUES (?1, ?2, ?3)",
                params![key, field, value],
            )?;
        }
        tx.commit()?;
        Ok(true)
    }

    /// All fields of a hash, or None if the key is missing or expired.
    pub async fn hgetall(&self, key: &str) -> Result<Option<HashMap<String, String>>> {
        let mut conn = self.conn.lock().await;
        let tx = conn.transaction()?;
        if expired(&tx, key)? {
            drop_key(&tx, key)?;
            tx.commit()?;
            return Ok(None);
        }
        let mut stmt = tx.prepare("SELECT field, value FROM kv_hash WHERE key = ?1")?;
        let map: HashMap<String, String> = stmt
            .query_map(params![key], |row| Ok((row.get(0)?, row.get(1)?)))?
            .collect::<std::result::Result<_, _>>()?;
        drop(stmt);
        tx.commit()?;
        Ok(if map.is_empty() { None } else { Some(map) })
    }

    /// A single hash field, or None if absent or expired.
    pub async fn hget(&self, key: &str, field: &str) -> Result<Option<String>> {
        let mut conn = self.conn.lock().await;
        let tx = conn.transaction()?;
        if expired(&tx, key)? {
            drop_key(&tx, key)?;
            tx.commit()?;
            return Ok(None);
        }
        let value: Option<String> = tx
            .query_row(
                "SELECT value FROM kv_hash WHERE key = ?1 AND field = ?2",
                params![key, field],
                |row| row.get(0),
            )
            .optional()?;
        tx.commit()?;
        Ok(value)
    }

    /// Set a TTL on a key. Expired keys read as missing and are purged lazily.
    pub async fn expire(&self, key: &str, ttl_secs: u64) -> Result<()> {
        let conn = self.conn.lock().await;
        conn.execute(
            "INSERT OR REPLACE INTO kv_expiry (key, expires_at) VALUES (?1, ?2)",
            params![key, now_secs() + ttl_secs as f64],
        )?;
        Ok(())
    }

    /// All live hash keys starting with `prefix`.
    pub async fn keys_with_prefix(&self, prefix: &str) -> Result<Vec<String>> {
        let mut conn = self.conn.lock().await;
        let tx = conn.transaction()?;
        let pattern = format!("{}%", prefix.replace('%', "\\%").replace('_', "\\_"));
        let mut stmt = tx.prepare(
            "SELECT DISTINCT key FROM kv_hash WHERE key LIKE ?1 ESCAPE '\\' ORDER BY key",
        )?;
        let all: Vec<String> = stmt
            .query_map(params![pattern], |row| row.get(0))?
            .collect::<std::result::Result<_, _>>()?;
        drop(stmt);
        let mut live = Vec::with_capacity(all.len());
        for key in all {
            if expired(&tx, &key)? {
                drop_key(&tx, &key)?;
            } else {
                live.push(key);
            }
        }
        tx.commit()?;
        Ok(live)
    }

    // -- Capped lists --------------------------------------------------------

    /// Push to the head of a list and trim it to `cap` entries.
    pub async fn lpush_trim(&self, key: &str, value: &str, cap: usize) -> Result<()> {
        let mut conn = self.conn.lock().await;
        let tx = conn.transaction()?;
        let head: Option<i64> = tx
            .query_row(
                "SELECT MIN(pos) FROM kv_list WHERE key = ?1",
                params![key],
                |row| row.get(0),
            )
            .optional()?
            .flatten();
        let pos = head.map(|p| p - 1).unwrap_or(0);
        tx.execute(
            "INSERT INTO kv_list (key, pos, value) VALUES (?1, ?2, ?3)",
            params![key, pos, value],
        )?;
        tx.execute(
            "DELETE FROM kv_list WHERE key = ?1 AND pos NOT IN (
                 SELECT pos FROM kv_list WHERE key = ?1 ORDER BY pos ASC LIMIT ?2
             )",
            params![key, cap as i64],
        )?;
        tx.commit()?;
        Ok(())
    }

    /// Read `count` entries starting at `offset`, newest first.
    pub async fn lrange(&self, key: &str, offset: usize, count: usize) -> Result<Vec<String>> {
        let conn = self.conn.lock().await;
        let mut stmt = conn.prepare(
            "SELECT value FROM kv_list WHERE key = ?1 ORDER BY pos ASC LIMIT ?2 OFFSET ?3",
        )?;
        let values = stmt
            .query_map(params![key, count as i64, offset as i64], |row| row.get(0))?
            .collect::<std::result::Result<Vec<String>, _>>()?;
        Ok(values)
    }

    pub async fn llen(&self, key: &str) -> Result<usize> {
        let conn = self.conn.lock().await;
        let count: i64 = conn.query_row(
            "SELECT COUNT(*) FROM kv_list WHERE key = ?1",
            params![key],
            |row| row.get(0),
        )?;
        Ok(count as usize)
    }

    // -- Sorted-set sliding window -------------------------------------------

    /// Atomic sliding-window admission on `ratelimit:<bucket>` keys.
    ///
    /// Evicts entries older than the window, records the new call, then
    /// counts. If the count exceeds `max_calls` the just-added entry is
    /// removed before returning false, so no interleaving admits more than
    /// `max_calls` per window.
    pub async fn window_admit(
        &self,
        key: &str,
        now: f64,
        window_secs: u64,
        max_calls: u32,
    ) -> Result<bool> {
        let member = uuid::Uuid::new_v4().to_string();
        let mut conn = self.conn.lock().await;
        let tx = conn.transaction()?;
        tx.execute(
            "DELETE FROM kv_zset WHERE key = ?1 AND score <= ?2",
            params![key, now - window_secs as f64],
        )?;
        tx.execute(
            "INSERT INTO kv_zset (key, member, score) VALUES (?1, ?2, ?3)",
            params![key, member, now],
        )?;
        let count: i64 = tx.query_row(
            "SELECT COUNT(*) FROM kv_zset WHERE key = ?1",
            params![key],
            |row| row.get(0),
        )?;
        let admitted = count <= max_calls as i64;
        if !admitted {
            tx.execute(
                "DELETE FROM kv_zset WHERE key = ?1 AND member = ?2",
                params![key, member],
            )?;
        }
        tx.commit()?;
        Ok(admitted)
    }

    // -- Test support --------------------------------------------------------

    /// Drop every table so that all subsequent operations fail. Exercises the
    /// swallow-and-degrade paths.
    #[cfg(test)]
    pub(crate) async fn poison(&self) {
        let conn = self.conn.lock().await;
        conn.execute_batch(
            "DROP TABLE kv_hash; DROP TABLE kv_expiry; DROP TABLE kv_list; DROP TABLE kv_zset;",
        )
        .unwrap();
    }
}

fn migrate(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        "
        CREATE TABLE IF NOT EXISTS kv_hash (
            key    TEXT NOT NULL,
            field  TEXT NOT NULL,
            value  TEXT NOT NULL,
            PRIMARY KEY (key, field)
        );

        CREATE TABLE IF NOT EXISTS kv_expiry (
            key        TEXT PRIMARY KEY,
            expires_at REAL NOT NULL
        );

        CREATE TABLE IF NOT EXISTS kv_list (
            key    TEXT NOT NULL,
            pos    INTEGER NOT NULL,
            value  TEXT NOT NULL,
            PRIMARY KEY (key, pos)
        );

        CREATE TABLE IF NOT EXISTS kv_zset (
            key    TEXT NOT NULL,
            member TEXT NOT NULL,
            score  REAL NOT NULL,
            PRIMARY KEY (key, member)
        );

        CREATE INDEX IF NOT EXISTS idx_zset_score ON kv_zset (key, score);
        ",
    )?;
    Ok(())
}

fn expired(conn: &Connection, key: &str) -> rusqlite::Result<bool> {
    let expires_at: Option<f64> = conn
        .query_row(
            "SELECT expires_at FROM kv_expiry WHERE key = ?1",
            params![key],
            |row| row.get(0),
        )
        .optional()?;
    Ok(expires_at.is_some_and(|t| t <= now_secs()))
}

fn drop_key(conn: &Connection, key: &str) -> rusqlite::Result<()> {
    conn.execute("DELETE FROM kv_hash WHERE key = ?1", params![key])?;
    conn.execute("DELETE FROM kv_expiry WHERE key = ?1", params![key])?;
    Ok(())
}
