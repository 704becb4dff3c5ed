//! Bookings Harvester Library
//!
//! Pulls booking records from the partner portal's Aura RPC endpoint,
//! flattens them, and persists them with size-safe batching.

pub mod bookings;
pub mod config;
pub mod errors;
pub mod models;
pub mod scrapers;
pub mod storage;

pub use errors::{HarvestError, SinkError, WriteError};
pub use models::{BookingRow, Credentials, NormalizedBooking, QueryUnit};
