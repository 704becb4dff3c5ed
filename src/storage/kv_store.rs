use chrono::Utc;
use parking_lot::Mutex;
use rusqlite::{params, Connection, OptionalExtension};
use serde::Serialize;
use serde_json::Value;
use std::sync::Arc;
use tracing::debug;

use crate::errors::SinkError;

/// Named single-value records (e.g. the run `SUMMARY`). Values are bounded in size.
pub struct KeyValueStore {
    conn: Arc<Mutex<Connection>>,
    max_value_bytes: usize,
}

impl KeyValueStore {
    pub(crate) fn new(conn: Arc<Mutex<Connection>>, max_value_bytes: usize) -> Self {
        Self {
            conn,
            max_value_bytes,
        }
    }

    /// Insert or replace `key`.
    pub fn set_value<T: Serialize + ?Sized>(&self, key: &str, value: &T) -> Result<(), SinkError> {
        let json = serde_json::to_string(value)?;
        if json.len() > self.max_value_bytes {
            return Err(SinkError::SizeExceeded {
                items: 1,
                bytes: json.len(),
                limit: self.max_value_bytes,
            });
        }

        let conn = self.conn.lock();
        conn.execute(
            "INSERT INTO key_value_store (key, value_json, updated_at) VALUES (?1, ?2, ?3)
             ON CONFLICT(key) DO UPDATE SET value_json = excluded.value_json, updated_at = excluded.updated_at",
            params![key, json, Utc::now().timestamp()],
        )?;

        debug!(key, bytes = json.len(), "Key-value record stored");
        Ok(())
    }

    pub fn get_value(&self, key: &str) -> Result<Option<Value>, SinkError> {
        let conn = self.conn.lock();
        let json: Option<String> = conn
            .query_row(
                "SELECT value_json FROM key_value_store WHERE key = ?1",
                params![key],
                |row| row.get(0),
            )
            .optional()?;

        match json {
            Some(j) => Ok(Some(serde_json::from_str(&j)?)),
            None => Ok(None),
        }
    }
}
