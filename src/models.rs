use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::fmt;

use crate::errors::HarvestError;
use crate::storage::batch_writer::RowIdentity;

/// One logical fetch unit: the filter set sent to the remote procedure.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QueryUnit {
    /// Short label used in logs, provenance and the summary (e.g. "2025").
    pub label: String,
    /// Parameters passed verbatim as the Apex method's `params`.
    pub params: Map<String, Value>,
}

impl QueryUnit {
    pub fn new(label: impl Into<String>, params: Map<String, Value>) -> Self {
        Self {
            label: label.into(),
            params,
        }
    }

    /// The booking report is filtered by `selectedYear`.
    pub fn year(year: i32) -> Self {
        let mut params = Map::new();
        params.insert("selectedYear".to_string(), Value::from(year));
        Self::new(year.to_string(), params)
    }
}

/// Portal session credentials, captured from a browser and passed through untouched.
#[derive(Clone, Default)]
pub struct Credentials {
    /// Full `Cookie` header; carries the session id.
    pub cookie_header: String,
    /// `aura.token` form field.
    pub aura_token: String,
    /// `aura.context` form field (a JSON blob we never parse).
    pub aura_context: String,
}

impl Credentials {
    pub fn new(
        cookie_header: impl Into<String>,
        aura_token: impl Into<String>,
        aura_context: impl Into<String>,
    ) -> Self {
        Self {
            cookie_header: cookie_header.into(),
            aura_token: aura_token.into(),
            aura_context: aura_context.into(),
        }
    }

    /// Names of the inputs a run cannot start without.
    pub const REQUIRED_INPUTS: [&'static str; 3] = ["cookieHeader", "auraToken", "auraContext"];

    pub fn missing(&self) -> Vec<&'static str> {
        let values = [&self.cookie_header, &self.aura_token, &self.aura_context];
        Self::REQUIRED_INPUTS
            .iter()
            .zip(values)
            .filter(|(_, v)| v.trim().is_empty())
            .map(|(name, _)| *name)
            .collect()
    }

    pub fn validate(&self) -> Result<(), HarvestError> {
        let missing = self.missing();
        if missing.is_empty() {
            Ok(())
        } else {
            Err(HarvestError::MissingCredentials(missing))
        }
    }
}

impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credentials")
            .field("cookie_header", &format_args!("<{} chars>", self.cookie_header.len()))
            .field("aura_token", &format_args!("<{} chars>", self.aura_token.len()))
            .field("aura_context", &format_args!("<{} chars>", self.aura_context.len()))
            .finish()
    }
}

/// Flat booking record. Every field always has a value.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NormalizedBooking {
    pub booking_id: String,
    pub salesforce_id: String,

    pub customer_name: String,
    pub nationality: String,

    pub project: String,
    pub unit_number: String,
    pub tower_name: String,
    pub tower_type: String,
    pub bedrooms: String,
    pub area_sq_ft: f64,

    pub agreement_value: f64,
    pub agreement_value_formatted: String,
    pub dld_amount: f64,
    pub dld_amount_formatted: String,
    pub dld_percentage: String,
    pub paid_percentage: f64,

    pub status: String,
    pub current_status: String,
    pub signed_status: String,
    pub pre_registration: String,

    pub spa_executed: String,
    pub spa_executed_date: String,

    pub booking_date: String,
    pub booking_date_formatted: String,
    pub signed_date: String,
    pub signed_date_formatted: String,

    pub sales_manager: String,
    pub sales_head: String,

    pub channel_partner: String,
    pub contact_person: String,

    pub opportunity_name: String,
    pub opportunity_id: String,
}

/// A normalized booking tagged with where and when it was harvested.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BookingRow {
    #[serde(flatten)]
    pub booking: NormalizedBooking,
    pub query_unit: String,
    pub extracted_at: DateTime<Utc>,
}

impl BookingRow {
    pub fn new(booking: NormalizedBooking, unit: &QueryUnit, extracted_at: DateTime<Utc>) -> Self {
        Self {
            booking,
            query_unit: unit.label.clone(),
            extracted_at,
        }
    }
}

impl RowIdentity for BookingRow {
    fn row_id(&self) -> String {
        if !self.booking.booking_id.is_empty() {
            self.booking.booking_id.clone()
        } else if !self.booking.salesforce_id.is_empty() {
            self.booking.salesforce_id.clone()
        } else {
            format!("<unnamed booking from {}>", self.query_unit)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn year_unit_carries_selected_year() {
        let unit = QueryUnit::year(2024);
        assert_eq!(unit.label, "2024");
        assert_eq!(unit.params.get("selectedYear"), Some(&Value::from(2024)));
    }

    #[test]
    fn blank_credentials_are_reported_by_name() {
        let creds = Credentials::new("sid=abc", "  ", "");
        assert_eq!(creds.missing(), vec!["auraToken", "auraContext"]);
        assert!(matches!(
            creds.validate(),
            Err(HarvestError::MissingCredentials(names)) if names.len() == 2
        ));
        assert!(Credentials::new("a", "b", "c").validate().is_ok());
    }

    #[test]
    fn debug_output_hides_credential_values() {
        let creds = Credentials::new("sid=secret-cookie", "tok", "{}");
        let rendered = format!("{:?}", creds);
        assert!(!rendered.contains("secret-cookie"));
        assert!(rendered.contains("<17 chars>"));
    }

    #[test]
    fn row_serializes_flat_with_provenance() {
        let booking = NormalizedBooking {
            booking_id: "B-1".into(),
            agreement_value: 1000.0,
            ..Default::default()
        };
        let row = BookingRow::new(booking, &QueryUnit::year(2025), Utc::now());
        let json = serde_json::to_value(&row).unwrap();
        assert_eq!(json["bookingId"], "B-1");
        assert_eq!(json["agreementValue"], 1000.0);
        assert_eq!(json["queryUnit"], "2025");
        assert!(json.get("extractedAt").is_some());
        assert!(json.get("booking").is_none());
    }

    #[test]
    fn row_identity_falls_back_to_salesforce_id() {
        let booking = NormalizedBooking {
            salesforce_id: "a0X1".into(),
            ..Default::default()
        };
        let row = BookingRow::new(booking, &QueryUnit::year(2025), Utc::now());
        assert_eq!(row.row_id(), "a0X1");
    }
}
