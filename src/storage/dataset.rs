use chrono::Utc;
use parking_lot::Mutex;
use rusqlite::{params, Connection};
use serde::Serialize;
use serde_json::Value;
use std::sync::Arc;
use tracing::debug;

use super::batch_writer::DatasetSink;
use crate::errors::SinkError;

/// Apify-style dataset: rows are appended, never updated.
pub struct Dataset {
    conn: Arc<Mutex<Connection>>,
    name: String,
    run_id: String,
    max_write_bytes: usize,
}

impl Dataset {
    pub(crate) fn new(
        conn: Arc<Mutex<Connection>>,
        name: &str,
        run_id: &str,
        max_write_bytes: usize,
    ) -> Self {
        Self {
            conn,
            name: name.to_string(),
            run_id: run_id.to_string(),
            max_write_bytes,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn max_write_bytes(&self) -> usize {
        self.max_write_bytes
    }

    /// Rows written to this dataset across all runs.
    pub fn row_count(&self) -> Result<usize, SinkError> {
        let conn = self.conn.lock();
        let count: i64 = conn.query_row(
            "SELECT COUNT(*) FROM dataset_rows WHERE dataset = ?1",
            params![self.name],
            |row| row.get(0),
        )?;
        Ok(count as usize)
    }

    /// Rows from one run, in write order.
    pub fn rows_for_run(&self, run_id: &str) -> Result<Vec<Value>, SinkError> {
        let conn = self.conn.lock();
        let mut stmt = conn.prepare(
            "SELECT row_json FROM dataset_rows WHERE dataset = ?1 AND run_id = ?2 ORDER BY seq",
        )?;
        let rows = stmt.query_map(params![self.name, run_id], |row| row.get::<_, String>(0))?;

        let mut out = Vec::new();
        for json in rows {
            out.push(serde_json::from_str(&json?)?);
        }
        Ok(out)
    }
}

impl<T: Serialize> DatasetSink<T> for Dataset {
    fn push_data(&mut self, chunk: &[T]) -> Result<(), SinkError> {
        let encoded = chunk
            .iter()
            .map(serde_json::to_string)
            .collect::<Result<Vec<_>, _>>()?;

        // Size as one JSON array, the way a dataset push body is measured.
        let bytes = encoded.iter().map(String::len).sum::<usize>()
            + encoded.len().saturating_sub(1)
            + 2;
        if bytes > self.max_write_bytes {
            return Err(SinkError::SizeExceeded {
                items: chunk.len(),
                bytes,
                limit: self.max_write_bytes,
            });
        }

        let now = Utc::now().timestamp();
        let mut conn = self.conn.lock();
        let tx = conn.transaction()?;
        {
            let mut stmt = tx.prepare_cached(
                "INSERT INTO dataset_rows (dataset, run_id, row_json, written_at) VALUES (?1, ?2, ?3, ?4)",
            )?;
            for row in &encoded {
                stmt.execute(params![self.name, self.run_id, row, now])?;
            }
        }
        tx.commit()?;

        debug!(dataset = %self.name, rows = chunk.len(), bytes, "Rows appended");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::Storage;
    use serde_json::json;

    #[test]
    fn rows_are_appended_in_order() {
        let storage = Storage::in_memory().unwrap();
        let mut ds = storage.dataset("bookings", "run-1", 1024);

        ds.push_data(&[json!({"n": 1}), json!({"n": 2})]).unwrap();
        ds.push_data(&[json!({"n": 3})]).unwrap();

        let rows = ds.rows_for_run("run-1").unwrap();
        assert_eq!(rows, vec![json!({"n": 1}), json!({"n": 2}), json!({"n": 3})]);
        assert_eq!(ds.row_count().unwrap(), 3);
    }

    #[test]
    fn oversized_chunk_is_rejected_without_writing() {
        let storage = Storage::in_memory().unwrap();
        let mut ds = storage.dataset("bookings", "run-1", 40);
        let chunk = vec![json!({"payload": "x".repeat(30)}), json!({"n": 1})];

        let err = ds.push_data(&chunk).unwrap_err();
        assert!(err.is_size_exceeded());
        assert_eq!(ds.row_count().unwrap(), 0);
    }

    #[test]
    fn size_is_measured_as_a_json_array() {
        let storage = Storage::in_memory().unwrap();
        // `[1,2]` is exactly five bytes.
        let mut exact = storage.dataset("nums", "run-1", 5);
        assert!(exact.push_data(&[1, 2]).is_ok());

        let mut short = storage.dataset("nums", "run-2", 4);
        assert!(short.push_data(&[1, 2]).unwrap_err().is_size_exceeded());
    }

    #[test]
    fn runs_and_datasets_are_kept_apart() {
        let storage = Storage::in_memory().unwrap();
        storage
            .dataset("bookings", "run-a", 1024)
            .push_data(&[json!({"run": "a"})])
            .unwrap();
        storage
            .dataset("bookings", "run-b", 1024)
            .push_data(&[json!({"run": "b"})])
            .unwrap();
        storage
            .dataset("other", "run-a", 1024)
            .push_data(&[json!({"run": "a-other"})])
            .unwrap();

        let ds = storage.dataset("bookings", "run-a", 1024);
        assert_eq!(ds.rows_for_run("run-a").unwrap(), vec![json!({"run": "a"})]);
        assert_eq!(ds.row_count().unwrap(), 2);
    }
}
