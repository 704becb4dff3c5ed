//! Error taxonomy for the harvest pipeline.
//!
//! RPC outcomes are not errors here; see [`crate::scrapers::aura_rpc::RpcResponse`].
//! These types cover the persistence side and startup validation.

use thiserror::Error;

/// Returned by a sink when a single write cannot be accepted.
#[derive(Debug, Error)]
pub enum SinkError {
    /// The chunk is larger than the sink accepts in one write. Recoverable by splitting.
    #[error("write of {items} item(s) is {bytes} bytes, sink limit is {limit} bytes")]
    SizeExceeded {
        items: usize,
        bytes: usize,
        limit: usize,
    },

    #[error("storage error: {0}")]
    Storage(#[from] rusqlite::Error),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl SinkError {
    pub fn is_size_exceeded(&self) -> bool {
        matches!(self, SinkError::SizeExceeded { .. })
    }
}

/// Terminal failures of the safe batch writer.
#[derive(Debug, Error)]
pub enum WriteError {
    /// A lone record is still too large for the sink. Trim its fields and rerun.
    #[error(
        "record #{index} ({record_id}) is {bytes} bytes on its own, sink limit is {limit} bytes"
    )]
    RecordTooLarge {
        index: usize,
        record_id: String,
        bytes: usize,
        limit: usize,
    },

    #[error(transparent)]
    Sink(SinkError),
}

/// Run-level failures that stop the harvest.
#[derive(Debug, Error)]
pub enum HarvestError {
    #[error("missing required credentials: {}", .0.join(", "))]
    MissingCredentials(Vec<&'static str>),

    #[error("dataset write failed: {0}")]
    Write(#[from] WriteError),

    #[error("summary write failed: {0}")]
    Summary(#[from] SinkError),

    #[error("dataset row count mismatch: expected {expected}, wrote {written}")]
    RowCountMismatch { expected: usize, written: usize },
}
