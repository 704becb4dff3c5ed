//! Raw booking → flat row
//!
//! Source records are Salesforce sObjects with relationship fields (`Unit__r`,
//! `Project__r`, ...) that may be missing, null, or shaped differently between
//! controllers. Nothing here fails: every field falls back to `""` or `0`.

use chrono::{DateTime, NaiveDate, NaiveDateTime};
use serde_json::Value;

use crate::models::NormalizedBooking;

type Paths = &'static [&'static [&'static str]];

const BOOKING_ID: Paths = &[&["Name"], &["Booking_Number__c"]];
const SALESFORCE_ID: Paths = &[&["Id"]];
const CUSTOMER_NAME: Paths = &[
    &["Primary_Applicant_Name__c"],
    &["Customer_Name__c"],
    &["Lead__r", "Name"],
];
const NATIONALITY: Paths = &[&["Nationality_V2__c"], &["Customer_Nationality__c"]];
const PROJECT: Paths = &[&["Project__r", "Name"], &["Project_Name__c"]];
const UNIT_NUMBER: Paths = &[&["Unit__r", "Name"], &["Unit_Number__c"]];
const TOWER_NAME: Paths = &[&["Tower_Name__c"], &["Tower__r", "Name"]];
const TOWER_TYPE: Paths = &[&["Unit__r", "Tower__r", "Tower_Type__c"]];
const BEDROOMS: Paths = &[&["Unit__r", "No_of_Bedroom__c"]];
const AREA: Paths = &[
    &["Unit__r", "Chargeable_Area__c"],
    &["Area__c"],
    &["Unit__r", "Total_Area__c"],
];
const AGREEMENT_VALUE: Paths = &[&["Agreement_Value__c"]];
const DLD_AMOUNT: Paths = &[&["DLD_Amount__c"]];
const DLD_PERCENTAGE: Paths = &[&["DLD_Percentage__c"]];
const PAID_PERCENTAGE: Paths = &[&["Paid_Percentage__c"]];
const STATUS: Paths = &[&["Status__c"], &["Booking_Status__c"]];
const CURRENT_STATUS: Paths = &[&["Current_Status__c"]];
const SIGNED_STATUS: Paths = &[&["Signed_Status__c"]];
const PRE_REGISTRATION: Paths = &[&["Pre_registration__c"]];
const SPA_EXECUTED: Paths = &[&["SPA_Executed__c"]];
const SPA_EXECUTED_DATE: Paths = &[&["SPA_Executed_Date__c"]];
const BOOKING_DATE: Paths = &[&["Booking_Date__c"], &["CreatedDate"]];
const SIGNED_DATE: Paths = &[&["Signed_Date__c"]];
const CHANNEL_PARTNER: Paths = &[&["Channel_Partner__r", "Name"]];
const CONTACT_PERSON: Paths = &[&["Channel_Partner_Contact_Person__c"]];
const OPPORTUNITY_NAME: Paths = &[&["Opportunity__r", "Name"]];
const OPPORTUNITY_ID: Paths = &[&["Opportunity__c"]];

/// Map one raw booking to the flat schema. Pure and total.
pub fn normalize(raw: &Value) -> NormalizedBooking {
    let agreement_value = number(raw, AGREEMENT_VALUE);
    let dld_amount = number(raw, DLD_AMOUNT);
    let booking_date = text(raw, BOOKING_DATE);
    let signed_date = text(raw, SIGNED_DATE);

    NormalizedBooking {
        booking_id: text(raw, BOOKING_ID),
        salesforce_id: text(raw, SALESFORCE_ID),

        customer_name: text(raw, CUSTOMER_NAME),
        nationality: text(raw, NATIONALITY),

        project: text(raw, PROJECT),
        unit_number: text(raw, UNIT_NUMBER),
        tower_name: text(raw, TOWER_NAME),
        tower_type: text(raw, TOWER_TYPE),
        bedrooms: text(raw, BEDROOMS),
        area_sq_ft: number(raw, AREA),

        agreement_value,
        agreement_value_formatted: currency_companion(agreement_value),
        dld_amount,
        dld_amount_formatted: currency_companion(dld_amount),
        dld_percentage: text(raw, DLD_PERCENTAGE),
        paid_percentage: number(raw, PAID_PERCENTAGE),

        status: text(raw, STATUS),
        current_status: text(raw, CURRENT_STATUS),
        signed_status: text(raw, SIGNED_STATUS),
        pre_registration: text(raw, PRE_REGISTRATION),

        spa_executed: text(raw, SPA_EXECUTED),
        spa_executed_date: text(raw, SPA_EXECUTED_DATE),

        booking_date_formatted: date_companion(&booking_date),
        booking_date,
        signed_date_formatted: date_companion(&signed_date),
        signed_date,

        sales_manager: person(raw, "Sales_Managers__r"),
        sales_head: person(raw, "Sales_Head__r"),

        channel_partner: text(raw, CHANNEL_PARTNER),
        contact_person: text(raw, CONTACT_PERSON),

        opportunity_name: text(raw, OPPORTUNITY_NAME),
        opportunity_id: text(raw, OPPORTUNITY_ID),
    }
}

/// First candidate path holding a present value (non-null, non-empty string).
pub fn read_path<'a>(record: &'a Value, candidates: &[&[&str]]) -> Option<&'a Value> {
    candidates.iter().find_map(|path| {
        let value = path
            .iter()
            .try_fold(record, |value, key| value.get(*key))?;
        match value {
            Value::Null => None,
            Value::String(s) if s.is_empty() => None,
            other => Some(other),
        }
    })
}

fn text(record: &Value, candidates: &[&[&str]]) -> String {
    candidates
        .iter()
        .find_map(|path| match read_path(record, &[*path]) {
            Some(Value::String(s)) => Some(s.clone()),
            Some(Value::Number(n)) => Some(n.to_string()),
            Some(Value::Bool(b)) => Some(b.to_string()),
            _ => None,
        })
        .unwrap_or_default()
}

fn number(record: &Value, candidates: &[&[&str]]) -> f64 {
    let parsed = match read_path(record, candidates) {
        Some(Value::Number(n)) => n.as_f64(),
        Some(Value::String(s)) => s.trim().parse::<f64>().ok(),
        _ => None,
    };
    parsed.filter(|v| v.is_finite()).unwrap_or(0.0)
}

fn person(record: &Value, relation: &'static str) -> String {
    let first = text(record, &[&[relation, "FirstName"]]);
    let last = text(record, &[&[relation, "LastName"]]);
    format!("{} {}", first, last).trim().to_string()
}

fn currency_companion(amount: f64) -> String {
    if amount == 0.0 {
        String::new()
    } else {
        format_aed(amount)
    }
}

/// `AED 1,234,567.89`
pub fn format_aed(amount: f64) -> String {
    if !amount.is_finite() {
        return String::new();
    }
    let fixed = format!("{:.2}", amount.abs());
    let (whole, cents) = fixed.split_once('.').unwrap_or((fixed.as_str(), "00"));

    let mut grouped = String::with_capacity(whole.len() + whole.len() / 3);
    for (i, digit) in whole.chars().enumerate() {
        if i > 0 && (whole.len() - i) % 3 == 0 {
            grouped.push(',');
        }
        grouped.push(digit);
    }

    let sign = if amount < 0.0 && fixed != "0.00" { "-" } else { "" };
    format!("AED {}{}.{}", sign, grouped, cents)
}

fn date_companion(raw: &str) -> String {
    parse_portal_date(raw)
        .map(|d| d.format("%d/%m/%Y").to_string())
        .unwrap_or_default()
}

/// Accepts plain dates and the datetime shapes Salesforce emits.
pub fn parse_portal_date(raw: &str) -> Option<NaiveDate> {
    let raw = raw.trim();
    if raw.is_empty() {
        return None;
    }
    if let Ok(d) = NaiveDate::parse_from_str(raw, "%Y-%m-%d") {
        return Some(d);
    }
    if let Ok(dt) = DateTime::parse_from_rfc3339(raw) {
        return Some(dt.naive_utc().date());
    }
    if let Ok(dt) = DateTime::parse_from_str(raw, "%Y-%m-%dT%H:%M:%S%.f%z") {
        return Some(dt.naive_utc().date());
    }
    NaiveDateTime::parse_from_str(raw, "%Y-%m-%dT%H:%M:%S%.f")
        .ok()
        .map(|dt| dt.date())
}
