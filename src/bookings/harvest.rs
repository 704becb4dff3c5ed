//! Harvest loop
//!
//! One query unit at a time: fetch, extract, normalize, tag. A dead session
//! stops the loop; any other failure is recorded against its unit and the loop
//! moves on. Persistence happens once, after every unit has been visited.

use async_trait::async_trait;
use chrono::Utc;
use std::time::Duration;
use tracing::{debug, error, info, warn};

use super::normalize::normalize;
use super::summary::{RunMetadata, RunSummary, SummaryRecord};
use crate::errors::HarvestError;
use crate::models::{BookingRow, Credentials, QueryUnit};
use crate::scrapers::aura_rpc::RpcResponse;
use crate::scrapers::extractor::{extract_array, ArrayLocation};
use crate::storage::{write_all, DatasetSink, KeyValueStore, WriteReport};

/// Key the run summary is stored under.
pub const SUMMARY_KEY: &str = "SUMMARY";

/// Anything that can answer one RPC call per query unit.
#[async_trait]
pub trait BookingSource: Send + Sync {
    async fn fetch(&self, unit: &QueryUnit) -> RpcResponse;
}

#[derive(Debug, Clone)]
pub struct HarvestOptions {
    /// Fixed pause between consecutive units.
    pub delay: Duration,
    /// Keep at most this many rows overall.
    pub max_results: Option<usize>,
}

impl Default for HarvestOptions {
    fn default() -> Self {
        Self {
            delay: Duration::from_millis(2000),
            max_results: Some(10_000),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum UnitStatus {
    Succeeded {
        count: usize,
        location: ArrayLocation,
    },
    Failed {
        kind: &'static str,
        error: String,
    },
    /// Never attempted because the session expired earlier in the run.
    Skipped,
}

#[derive(Debug, Clone, PartialEq)]
pub struct UnitReport {
    pub unit: String,
    pub status: UnitStatus,
}

#[derive(Debug, Clone)]
pub struct HarvestOutcome {
    pub rows: Vec<BookingRow>,
    pub units: Vec<UnitReport>,
    pub session_expired: bool,
    /// Row count before the result cap, if the cap cut anything.
    pub truncated_from: Option<usize>,
}

/// Visit every unit in order and accumulate tagged rows.
pub async fn harvest<S>(source: &S, units: &[QueryUnit], options: &HarvestOptions) -> HarvestOutcome
where
    S: BookingSource + ?Sized,
{
    let mut rows: Vec<BookingRow> = Vec::new();
    let mut reports: Vec<UnitReport> = Vec::with_capacity(units.len());
    let mut session_expired = false;

    for (i, unit) in units.iter().enumerate() {
        if session_expired {
            reports.push(UnitReport {
                unit: unit.label.clone(),
                status: UnitStatus::Skipped,
            });
            continue;
        }

        info!(unit = %unit.label, "📅 Processing query unit");

        let status = match source.fetch(unit).await {
            RpcResponse::Success(payload) => {
                let extraction = extract_array(&payload);
                if extraction.location == ArrayLocation::NotFound {
                    warn!(unit = %unit.label, "⚠️ Zero records detected in payload");
                }

                let extracted_at = Utc::now();
                let before = rows.len();
                for (idx, raw) in extraction.records.iter().enumerate() {
                    let booking = normalize(raw);
                    if idx < 3 {
                        debug!(
                            unit = %unit.label,
                            booking_id = %booking.booking_id,
                            customer = %booking.customer_name,
                            unit_number = %booking.unit_number,
                            "Parsed booking {}", idx + 1
                        );
                    }
                    rows.push(BookingRow::new(booking, unit, extracted_at));
                }
                let count = rows.len() - before;

                if count > 0 {
                    info!(unit = %unit.label, count, location = %extraction.location, "✅ Bookings extracted");
                } else {
                    info!(unit = %unit.label, "No bookings found");
                }
                UnitStatus::Succeeded {
                    count,
                    location: extraction.location,
                }
            }
            RpcResponse::SessionExpired(detail) => {
                error!(unit = %unit.label, "🛑 Session expired, aborting remaining units");
                session_expired = true;
                UnitStatus::Failed {
                    kind: "session_expired",
                    error: format!("SESSION_EXPIRED: {}", detail),
                }
            }
            RpcResponse::ApplicationError(detail) => failed(unit, "application_error", detail),
            RpcResponse::TransportError(failure) => {
                failed(unit, "transport_error", failure.to_string())
            }
            RpcResponse::Malformed(reason) => failed(unit, "malformed", reason),
        };

        reports.push(UnitReport {
            unit: unit.label.clone(),
            status,
        });

        if !session_expired && i + 1 < units.len() && !options.delay.is_zero() {
            debug!(delay_ms = options.delay.as_millis() as u64, "⏳ Waiting before next unit");
            tokio::time::sleep(options.delay).await;
        }
    }

    let mut truncated_from = None;
    if let Some(cap) = options.max_results {
        if rows.len() > cap {
            warn!(from = rows.len(), to = cap, "⚠️ Limiting results");
            truncated_from = Some(rows.len());
            rows.truncate(cap);
        }
    }

    HarvestOutcome {
        rows,
        units: reports,
        session_expired,
        truncated_from,
    }
}

fn failed(unit: &QueryUnit, kind: &'static str, error: String) -> UnitStatus {
    warn!(unit = %unit.label, kind, error = %error, "❌ Query unit failed");
    UnitStatus::Failed { kind, error }
}

/// Gate a run on its credentials. Must pass before any client is built.
///
/// On failure the failure record is stored under [`SUMMARY_KEY`] and the
/// missing inputs come back as [`HarvestError::MissingCredentials`].
pub fn preflight(credentials: &Credentials, kv: &KeyValueStore) -> Result<(), HarvestError> {
    let Err(err) = credentials.validate() else {
        return Ok(());
    };

    error!("❌ {}", err);
    error!("Required inputs: {}", Credentials::REQUIRED_INPUTS.join(", "));
    kv.set_value(
        SUMMARY_KEY,
        &SummaryRecord::failure(
            "Missing required authentication parameters",
            &Credentials::REQUIRED_INPUTS,
        ),
    )?;
    Err(err)
}

#[derive(Debug, Clone)]
pub struct PersistReport {
    pub write: WriteReport,
    pub summary: RunSummary,
}

/// Write every row, verify the count, then store the summary under [`SUMMARY_KEY`].
pub fn persist<D>(
    outcome: &HarvestOutcome,
    dataset: &mut D,
    kv: &KeyValueStore,
    metadata: RunMetadata,
) -> Result<PersistReport, HarvestError>
where
    D: DatasetSink<BookingRow> + ?Sized,
{
    let write = write_all(&outcome.rows, dataset)?;
    if write.rows_written != outcome.rows.len() {
        return Err(HarvestError::RowCountMismatch {
            expected: outcome.rows.len(),
            written: write.rows_written,
        });
    }

    let summary = RunSummary::from_outcome(outcome);
    kv.set_value(SUMMARY_KEY, &SummaryRecord::success(summary.clone(), metadata))?;
    info!(key = SUMMARY_KEY, rows = write.rows_written, "Summary stored");

    Ok(PersistReport { write, summary })
}
