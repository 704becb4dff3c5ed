//! Local SQLite persistence: an append-only dataset and a small key-value store.

pub mod batch_writer;
pub mod dataset;
pub mod kv_store;

use anyhow::{Context, Result};
use parking_lot::Mutex;
use rusqlite::{Connection, OpenFlags};
use std::sync::Arc;
use tracing::{info, warn};

pub use batch_writer::{write_all, DatasetSink, RowIdentity, WriteReport};
pub use dataset::Dataset;
pub use kv_store::KeyValueStore;

const SCHEMA_SQL: &str = r#"
PRAGMA journal_mode = WAL;
PRAGMA synchronous = NORMAL;
PRAGMA temp_store = MEMORY;

CREATE TABLE IF NOT EXISTS dataset_rows (
    seq INTEGER PRIMARY KEY AUTOINCREMENT,
    dataset TEXT NOT NULL,
    run_id TEXT NOT NULL,
    row_json TEXT NOT NULL,
    written_at INTEGER NOT NULL
);

CREATE INDEX IF NOT EXISTS idx_dataset_rows_dataset_run
    ON dataset_rows(dataset, run_id, seq);

CREATE TABLE IF NOT EXISTS key_value_store (
    key TEXT PRIMARY KEY,
    value_json TEXT NOT NULL,
    updated_at INTEGER NOT NULL
) WITHOUT ROWID;
"#;

/// Shared handle to the harvest database.
#[derive(Clone)]
pub struct Storage {
    conn: Arc<Mutex<Connection>>,
}

impl Storage {
    pub fn open(db_path: &str) -> Result<Self> {
        let flags = OpenFlags::SQLITE_OPEN_READ_WRITE
            | OpenFlags::SQLITE_OPEN_CREATE
            | OpenFlags::SQLITE_OPEN_NO_MUTEX;

        let conn = Connection::open_with_flags(db_path, flags)
            .with_context(|| format!("Failed to open database at {}", db_path))?;
        conn.execute_batch(SCHEMA_SQL)
            .context("Failed to initialize database schema")?;

        let journal_mode: String = conn
            .query_row("PRAGMA journal_mode", [], |row| row.get(0))
            .unwrap_or_default();
        if journal_mode.to_lowercase() != "wal" {
            warn!("WAL mode not active, journal_mode = {}", journal_mode);
        }

        info!("📊 Harvest database initialized at: {}", db_path);
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    /// In-memory store (for testing).
    pub fn in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory()?;
        conn.execute_batch(SCHEMA_SQL)
            .context("Failed to initialize database schema")?;
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    /// Append-only dataset `name`, tagging rows with `run_id`.
    pub fn dataset(&self, name: &str, run_id: &str, max_write_bytes: usize) -> Dataset {
        Dataset::new(self.conn.clone(), name, run_id, max_write_bytes)
    }

    pub fn key_value_store(&self, max_value_bytes: usize) -> KeyValueStore {
        KeyValueStore::new(self.conn.clone(), max_value_bytes)
    }
}
