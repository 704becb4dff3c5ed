//! Run summary: small, bounded aggregate stored next to the dataset.

use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::BTreeMap;

use super::harvest::{HarvestOutcome, UnitStatus};
use crate::models::QueryUnit;

const UNKNOWN: &str = "Unknown";

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct UnitCount {
    pub unit: String,
    pub count: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct UnitFailure {
    pub unit: String,
    pub kind: String,
    pub error: String,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Financials {
    pub total_agreement_value: f64,
    #[serde(rename = "totalDLDAmount")]
    pub total_dld_amount: f64,
    pub average_agreement_value: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RunSummary {
    pub total_bookings: usize,
    pub unit_breakdown: Vec<UnitCount>,
    pub failed_units: Vec<UnitFailure>,
    pub skipped_units: Vec<String>,
    pub session_expired: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub truncated_from: Option<usize>,
    pub project_breakdown: BTreeMap<String, usize>,
    pub status_breakdown: BTreeMap<String, usize>,
    pub financials: Financials,
}

impl RunSummary {
    pub fn from_outcome(outcome: &HarvestOutcome) -> Self {
        let mut unit_breakdown = Vec::new();
        let mut failed_units = Vec::new();
        let mut skipped_units = Vec::new();

        for report in &outcome.units {
            match &report.status {
                UnitStatus::Succeeded { count, .. } => unit_breakdown.push(UnitCount {
                    unit: report.unit.clone(),
                    count: *count,
                }),
                UnitStatus::Failed { kind, error } => failed_units.push(UnitFailure {
                    unit: report.unit.clone(),
                    kind: kind.to_string(),
                    error: error.clone(),
                }),
                UnitStatus::Skipped => skipped_units.push(report.unit.clone()),
            }
        }

        let mut project_breakdown = BTreeMap::new();
        let mut status_breakdown = BTreeMap::new();
        let mut financials = Financials::default();

        for row in &outcome.rows {
            let b = &row.booking;
            *project_breakdown.entry(or_unknown(&b.project)).or_insert(0) += 1;
            *status_breakdown.entry(or_unknown(&b.status)).or_insert(0) += 1;
            financials.total_agreement_value += b.agreement_value;
            financials.total_dld_amount += b.dld_amount;
        }
        if !outcome.rows.is_empty() {
            financials.average_agreement_value =
                financials.total_agreement_value / outcome.rows.len() as f64;
        }

        Self {
            total_bookings: outcome.rows.len(),
            unit_breakdown,
            failed_units,
            skipped_units,
            session_expired: outcome.session_expired,
            truncated_from: outcome.truncated_from,
            project_breakdown,
            status_breakdown,
            financials,
        }
    }
}

fn or_unknown(value: &str) -> String {
    if value.is_empty() {
        UNKNOWN.to_string()
    } else {
        value.to_string()
    }
}

/// Breakdown entries, largest first; ties by name.
pub fn ranked(breakdown: &BTreeMap<String, usize>) -> Vec<(&str, usize)> {
    let mut entries: Vec<(&str, usize)> = breakdown.iter().map(|(k, v)| (k.as_str(), *v)).collect();
    entries.sort_by(|a, b| b.1.cmp(&a.1).then_with(|| a.0.cmp(b.0)));
    entries
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RunMetadata {
    pub run_id: String,
    pub scraped_at: DateTime<Utc>,
    pub query_units: Vec<String>,
    pub method: &'static str,
    pub version: &'static str,
}

impl RunMetadata {
    pub fn new(run_id: impl Into<String>, units: &[QueryUnit]) -> Self {
        Self {
            run_id: run_id.into(),
            scraped_at: Utc::now(),
            query_units: units.iter().map(|u| u.label.clone()).collect(),
            method: "direct_aura_api",
            version: env!("CARGO_PKG_VERSION"),
        }
    }
}

/// What is stored under the `SUMMARY` key.
#[derive(Debug, Clone, Serialize)]
#[serde(untagged)]
pub enum SummaryRecord {
    Success {
        success: bool,
        summary: RunSummary,
        metadata: RunMetadata,
    },
    #[serde(rename_all = "camelCase")]
    Failure {
        success: bool,
        error: String,
        /// Only set when the run was refused for missing inputs.
        #[serde(skip_serializing_if = "Vec::is_empty")]
        required_inputs: Vec<String>,
        timestamp: DateTime<Utc>,
    },
}

impl SummaryRecord {
    pub fn success(summary: RunSummary, metadata: RunMetadata) -> Self {
        SummaryRecord::Success {
            success: true,
            summary,
            metadata,
        }
    }

    pub fn failure(error: impl Into<String>, required_inputs: &[&str]) -> Self {
        SummaryRecord::Failure {
            success: false,
            error: error.into(),
            required_inputs: required_inputs.iter().map(|s| s.to_string()).collect(),
            timestamp: Utc::now(),
        }
    }
}
