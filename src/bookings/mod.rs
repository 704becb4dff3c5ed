//! Booking pipeline: normalize raw records, drive the harvest loop, summarize.

pub mod harvest;
pub mod normalize;
pub mod summary;

pub use harvest::{
    harvest, persist, preflight, BookingSource, HarvestOptions, HarvestOutcome, PersistReport,
    UnitReport, UnitStatus, SUMMARY_KEY,
};
pub use normalize::normalize;
pub use summary::{RunMetadata, RunSummary, SummaryRecord};
