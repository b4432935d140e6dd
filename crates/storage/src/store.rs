//! SQLite store implementation.

use crate::{Error, LogRecord, Result};
use chrono::Utc;
use rusqlite::{Connection, OptionalExtension, params};
use serde::Serialize;
use serde::de::DeserializeOwned;
use std::path::Path;
use std::sync::{Mutex, MutexGuard};

/// Key of the persisted policy record.
pub const POLICIES_KEY: &str = "policies";
/// Key of the persisted preset catalog.
pub const PRESETS_KEY: &str = "presets";
/// Key of the per-origin blocked artifact list.
pub const BLOCKED_KEY: &str = "blockedCookies";
/// Key of the artifact action history.
pub const HISTORY_KEY: &str = "cookieActionHistory";

/// Default number of decision logs retained.
pub const MAX_LOGS: usize = 1000;

/// SQLite-backed store for keyed JSON records and the decision log.
///
/// The connection sits behind a mutex so one store can be shared between
/// the controller and the log buffer.
pub struct Store {
    conn: Mutex<Connection>,
}

impl Store {
    /// Open or create a store at the given path.
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let conn = Connection::open(path)?;
        let store = Self {
            conn: Mutex::new(conn),
        };
        store.init_schema()?;
        Ok(store)
    }

    /// Create an in-memory store (useful for testing).
    pub fn in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory()?;
        let store = Self {
            conn: Mutex::new(conn),
        };
        store.init_schema()?;
        Ok(store)
    }

    fn conn(&self) -> Result<MutexGuard<'_, Connection>> {
        self.conn
            .lock()
            .map_err(|_| Error::Unavailable("connection lock poisoned".to_string()))
    }

    fn init_schema(&self) -> Result<()> {
        self.conn()?.execute_batch(
            r#"
            CREATE TABLE IF NOT EXISTS records (
                key TEXT PRIMARY KEY,
                value TEXT NOT NULL,
                updated_at TEXT NOT NULL
            );
            CREATE TABLE IF NOT EXISTS logs (
                seq INTEGER PRIMARY KEY AUTOINCREMENT,
                id TEXT NOT NULL,
                capability TEXT NOT NULL,
                decision TEXT NOT NULL,
                origin TEXT NOT NULL,
                timestamp TEXT NOT NULL,
                data TEXT NOT NULL
            );
            CREATE INDEX IF NOT EXISTS idx_logs_capability
                ON logs(capability, seq);
            "#,
        )?;
        Ok(())
    }

    /// Read a keyed record. Missing keys yield `None`.
    pub fn get<T: DeserializeOwned>(&self, key: &str) -> Result<Option<T>> {
        let value: Option<String> = self
            .conn()?
            .query_row("SELECT value FROM records WHERE key = ?1", [key], |row| {
                row.get(0)
            })
            .optional()?;

        match value {
            Some(json) => Ok(Some(serde_json::from_str(&json)?)),
            None => Ok(None),
        }
    }

    /// Write a keyed record, replacing any previous value.
    pub fn put<T: Serialize + ?Sized>(&self, key: &str, value: &T) -> Result<()> {
        let json = serde_json::to_string(value)?;
        self.conn()?.execute(
            "INSERT INTO records (key, value, updated_at) VALUES (?1, ?2, ?3)
             ON CONFLICT(key) DO UPDATE SET value = excluded.value, updated_at = excluded.updated_at",
            params![key, json, Utc::now().to_rfc3339()],
        )?;
        Ok(())
    }

    pub fn delete(&self, key: &str) -> Result<bool> {
        let removed = self
            .conn()?
            .execute("DELETE FROM records WHERE key = ?1", [key])?;
        Ok(removed > 0)
    }

    /// Append a batch of decision logs (oldest first) in one transaction and
    /// trim the log to the newest `retain` entries. Returns how many old
    /// entries were evicted.
    pub fn append_logs(&self, records: &[LogRecord], retain: usize) -> Result<usize> {
        let mut conn = self.conn()?;
        let tx = conn.transaction()?;
        {
            let mut stmt = tx.prepare(
                "INSERT INTO logs (id, capability, decision, origin, timestamp, data)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
            )?;
            for record in records {
                stmt.execute(params![
                    record.id.to_string(),
                    record.capability,
                    record.decision.as_str(),
                    record.origin,
                    record.timestamp.to_rfc3339(),
                    serde_json::to_string(record)?,
                ])?;
            }
        }
        let evicted = tx.execute(
            "DELETE FROM logs WHERE seq NOT IN (SELECT seq FROM logs ORDER BY seq DESC LIMIT ?1)",
            [retain as i64],
        )?;
        tx.commit()?;
        Ok(evicted)
    }

    /// Load decision logs, newest first.
    pub fn load_logs(&self, limit: Option<usize>, capability: Option<&str>) -> Result<Vec<LogRecord>> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare(
            "SELECT data FROM logs WHERE (?1 IS NULL OR capability = ?1)
             ORDER BY seq DESC LIMIT ?2",
        )?;

        let limit = limit.map_or(-1, |n| n as i64);
        let records = stmt
            .query_map(params![capability, limit], |row| row.get::<_, String>(0))?
            .filter_map(|r| r.ok())
            .filter_map(|data| match serde_json::from_str(&data) {
                Ok(record) => Some(record),
                Err(e) => {
                    tracing::warn!(error = %e, "skipping unreadable log row");
                    None
                }
            })
            .collect();

        Ok(records)
    }

    pub fn count_logs(&self) -> Result<usize> {
        let count: i64 = self
            .conn()?
            .query_row("SELECT COUNT(*) FROM logs", [], |row| row.get(0))?;
        Ok(count as usize)
    }

    /// Delete every decision log. Returns how many were removed.
    pub fn clear_logs(&self) -> Result<usize> {
        Ok(self.conn()?.execute("DELETE FROM logs", [])?)
    }
}
