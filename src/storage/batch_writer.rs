//! Safe batch writer
//!
//! Sinks reject writes above a size limit they do not advertise. We start with
//! the whole sequence as one chunk and halve on rejection until every chunk
//! fits. Chunks are index ranges over the input, so relative order survives
//! every split and nothing is copied until a sink asks to serialize it.

use tracing::{debug, info, warn};

use crate::errors::{SinkError, WriteError};

/// Append-only destination for rows.
pub trait DatasetSink<T> {
    /// Write the whole chunk or nothing.
    fn push_data(&mut self, chunk: &[T]) -> Result<(), SinkError>;
}

/// Human-readable handle for a row, used when a lone row cannot be written.
pub trait RowIdentity {
    fn row_id(&self) -> String;
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct WriteReport {
    pub rows_written: usize,
    pub write_calls: usize,
    pub splits: usize,
}

/// Write every record exactly once, in order, splitting chunks the sink rejects.
pub fn write_all<T, S>(records: &[T], sink: &mut S) -> Result<WriteReport, WriteError>
where
    T: RowIdentity,
    S: DatasetSink<T> + ?Sized,
{
    let mut report = WriteReport::default();
    if records.is_empty() {
        return Ok(report);
    }

    // Half-open ranges; the top of the stack is always the leftmost pending chunk.
    let mut pending: Vec<(usize, usize)> = vec![(0, records.len())];

    while let Some((start, end)) = pending.pop() {
        let chunk = &records[start..end];
        match sink.push_data(chunk) {
            Ok(()) => {
                report.rows_written += chunk.len();
                report.write_calls += 1;
                debug!(start, rows = chunk.len(), "Chunk written");
            }
            Err(SinkError::SizeExceeded { bytes, limit, .. }) if chunk.len() == 1 => {
                let record_id = chunk[0].row_id();
                warn!(index = start, record = %record_id, bytes, limit, "🚫 Single row exceeds sink limit");
                return Err(WriteError::RecordTooLarge {
                    index: start,
                    record_id,
                    bytes,
                    limit,
                });
            }
            Err(SinkError::SizeExceeded { bytes, limit, .. }) => {
                let mid = start + (chunk.len() + 1) / 2;
                debug!(
                    start,
                    rows = chunk.len(),
                    bytes,
                    limit,
                    "Chunk too large, splitting"
                );
                pending.push((mid, end));
                pending.push((start, mid));
                report.splits += 1;
            }
            Err(other) => return Err(WriteError::Sink(other)),
        }
    }

    info!(
        rows = report.rows_written,
        calls = report.write_calls,
        splits = report.splits,
        "💾 Dataset write complete"
    );
    Ok(report)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Debug, Clone, PartialEq)]
    struct Row(u32);

    impl RowIdentity for Row {
        fn row_id(&self) -> String {
            format!("row-{}", self.0)
        }
    }

    /// Accepts at most `max_items` per write; records every accepted chunk.
    struct CountingSink {
        max_items: usize,
        accepted: Vec<Vec<Row>>,
        attempts: usize,
    }

    impl CountingSink {
        fn new(max_items: usize) -> Self {
            Self {
                max_items,
                accepted: Vec::new(),
                attempts: 0,
            }
        }

        fn flattened(&self) -> Vec<Row> {
            self.accepted.iter().flatten().cloned().collect()
        }
    }

    impl DatasetSink<Row> for CountingSink {
        fn push_data(&mut self, chunk: &[Row]) -> Result<(), SinkError> {
            self.attempts += 1;
            if chunk.len() > self.max_items {
                return Err(SinkError::SizeExceeded {
                    items: chunk.len(),
                    bytes: chunk.len() * 100,
                    limit: self.max_items * 100,
                });
            }
            self.accepted.push(chunk.to_vec());
            Ok(())
        }
    }

    fn rows(n: u32) -> Vec<Row> {
        (0..n).map(Row).collect()
    }

    #[test]
    fn empty_input_makes_no_calls() {
        let mut sink = CountingSink::new(3);
        let report = write_all(&rows(0), &mut sink).unwrap();
        assert_eq!(report, WriteReport::default());
        assert_eq!(sink.attempts, 0);
    }

    #[test]
    fn fitting_input_is_one_call() {
        let mut sink = CountingSink::new(10);
        let report = write_all(&rows(4), &mut sink).unwrap();
        assert_eq!(report.write_calls, 1);
        assert_eq!(report.splits, 0);
        assert_eq!(sink.flattened(), rows(4));
    }

    #[test]
    fn seven_rows_with_limit_three() {
        let mut sink = CountingSink::new(3);
        let input = rows(7);
        let report = write_all(&input, &mut sink).unwrap();

        assert_eq!(report.rows_written, 7);
        assert!(sink.accepted.iter().all(|c| c.len() <= 3));
        assert_eq!(sink.flattened(), input);
        // 7 -> 4 + 3, 4 -> 2 + 2
        let sizes: Vec<usize> = sink.accepted.iter().map(Vec::len).collect();
        assert_eq!(sizes, vec![2, 2, 3]);
        assert_eq!(report.write_calls, 3);
        assert_eq!(report.splits, 2);
    }

    #[test]
    fn splitting_down_to_singletons_preserves_order() {
        for n in [1u32, 2, 5, 16, 33] {
            let mut sink = CountingSink::new(1);
            let input = rows(n);
            let report = write_all(&input, &mut sink).unwrap();
            assert_eq!(sink.flattened(), input, "n = {}", n);
            assert_eq!(report.write_calls, n as usize);
            assert_eq!(report.rows_written, n as usize);
        }
    }

    #[test]
    fn every_limit_writes_every_row_once() {
        let input = rows(23);
        for limit in 1..=25 {
            let mut sink = CountingSink::new(limit);
            write_all(&input, &mut sink).unwrap();
            assert_eq!(sink.flattened(), input, "limit {}", limit);
        }
    }

    #[test]
    fn unwritable_single_row_is_fatal_and_named() {
        struct RejectRow(u32);
        impl DatasetSink<Row> for RejectRow {
            fn push_data(&mut self, chunk: &[Row]) -> Result<(), SinkError> {
                if chunk.iter().any(|r| r.0 == self.0) {
                    return Err(SinkError::SizeExceeded {
                        items: chunk.len(),
                        bytes: 20_000_000,
                        limit: 9_437_184,
                    });
                }
                Ok(())
            }
        }

        let err = write_all(&rows(6), &mut RejectRow(4)).unwrap_err();
        match err {
            WriteError::RecordTooLarge {
                index, record_id, ..
            } => {
                assert_eq!(index, 4);
                assert_eq!(record_id, "row-4");
            }
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn other_sink_errors_are_not_split() {
        struct Broken {
            attempts: usize,
        }
        impl DatasetSink<Row> for Broken {
            fn push_data(&mut self, _chunk: &[Row]) -> Result<(), SinkError> {
                self.attempts += 1;
                Err(SinkError::Serialization(
                    serde_json::from_str::<serde_json::Value>("{").unwrap_err(),
                ))
            }
        }

        let mut sink = Broken { attempts: 0 };
        let err = write_all(&rows(8), &mut sink).unwrap_err();
        assert!(matches!(err, WriteError::Sink(SinkError::Serialization(_))));
        assert_eq!(sink.attempts, 1);
    }
}
