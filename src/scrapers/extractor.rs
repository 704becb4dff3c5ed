//! Adaptive array extraction
//!
//! The Apex controller does not return a fixed shape: the booking list can be
//! the payload itself, sit under one of several wrapper keys, or hide behind a
//! double `returnValue` indirection. Resolution is ordered and reported so a
//! zero-record run can be told apart from an extractor that has gone stale.

use serde_json::{Map, Value};
use std::fmt;

/// Wrapper locations checked in priority order. First array found wins.
pub const CANDIDATE_PATHS: &[&[&str]] = &[
    &["returnValue", "returnValue"],
    &["returnValue"],
    &["records"],
    &["data"],
    &["result"],
    &["items"],
    &["bookings"],
    &["bookingList"],
    &["bookingData"],
];

/// Where the record array was found.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ArrayLocation {
    /// Payload was already an array.
    Root,
    /// Found under one of [`CANDIDATE_PATHS`].
    Candidate(String),
    /// Found by scanning top-level values.
    StructuralScan(String),
    NotFound,
}

impl fmt::Display for ArrayLocation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ArrayLocation::Root => write!(f, "root"),
            ArrayLocation::Candidate(path) => write!(f, "candidate:{}", path),
            ArrayLocation::StructuralScan(key) => write!(f, "scan:{}", key),
            ArrayLocation::NotFound => write!(f, "not-found"),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Extraction {
    pub records: Vec<Value>,
    pub location: ArrayLocation,
}

impl Extraction {
    fn empty() -> Self {
        Self {
            records: Vec::new(),
            location: ArrayLocation::NotFound,
        }
    }
}

/// Locate the record array inside an unresolved payload. Never fails.
pub fn extract_array(payload: &Value) -> Extraction {
    match payload {
        Value::Array(items) => Extraction {
            records: items.clone(),
            location: ArrayLocation::Root,
        },
        Value::Object(map) => {
            for path in CANDIDATE_PATHS {
                if let Some(Value::Array(items)) = lookup(map, path) {
                    return Extraction {
                        records: items.clone(),
                        location: ArrayLocation::Candidate(path.join(".")),
                    };
                }
            }
            structural_scan(map).unwrap_or_else(Extraction::empty)
        }
        _ => Extraction::empty(),
    }
}

fn lookup<'a>(map: &'a Map<String, Value>, path: &[&str]) -> Option<&'a Value> {
    let (first, rest) = path.split_first()?;
    rest.iter()
        .try_fold(map.get(*first)?, |value, key| value.get(*key))
}

/// One level deep, in insertion order.
fn structural_scan(map: &Map<String, Value>) -> Option<Extraction> {
    map.iter().find_map(|(key, value)| match value {
        Value::Array(items) if looks_like_records(items) => Some(Extraction {
            records: items.clone(),
            location: ArrayLocation::StructuralScan(key.clone()),
        }),
        _ => None,
    })
}

/// First element must be an object, and at least half of all elements.
fn looks_like_records(items: &[Value]) -> bool {
    match items.first() {
        Some(Value::Object(_)) => {
            let objects = items.iter().filter(|v| v.is_object()).count();
            objects * 2 >= items.len()
        }
        _ => false,
    }
}
