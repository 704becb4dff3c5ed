//! Harvest configuration
//!
//! Loaded from an optional TOML file, then overridden by CLI flags and
//! environment variables in `main`.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::path::Path;
use std::time::Duration;

use crate::bookings::harvest::HarvestOptions;
use crate::models::{Credentials, QueryUnit};
use crate::scrapers::aura_rpc::{RpcTarget, PORTAL_AURA_BASE};

/// Dataset pushes above ~9 MB are rejected by the hosted store we mirror.
pub const DEFAULT_MAX_WRITE_BYTES: usize = 9 * 1024 * 1024;
pub const DEFAULT_MAX_SUMMARY_BYTES: usize = 256 * 1024;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct HarvestConfig {
    pub base_url: String,
    pub target: RpcTarget,

    /// Report years to fetch, one query unit each.
    pub years: Vec<i32>,
    /// Extra Apex parameters merged into every unit.
    pub extra_params: Map<String, Value>,

    pub max_results: Option<usize>,
    pub delay_ms: u64,
    pub request_timeout_secs: u64,

    pub db_path: String,
    pub dataset: String,
    pub max_write_bytes: usize,
    pub max_summary_bytes: usize,

    pub credentials: CredentialsConfig,
}

/// Credentials may come from the file, but env/CLI normally supply them.
#[derive(Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct CredentialsConfig {
    pub cookie_header: String,
    pub aura_token: String,
    pub aura_context: String,
}

impl std::fmt::Debug for CredentialsConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        std::fmt::Debug::fmt(&self.to_credentials(), f)
    }
}

impl CredentialsConfig {
    pub fn to_credentials(&self) -> Credentials {
        Credentials::new(
            self.cookie_header.clone(),
            self.aura_token.clone(),
            self.aura_context.clone(),
        )
    }
}

impl Default for HarvestConfig {
    fn default() -> Self {
        Self {
            base_url: PORTAL_AURA_BASE.to_string(),
            target: RpcTarget::default(),
            years: vec![2025],
            extra_params: Map::new(),
            max_results: Some(10_000),
            delay_ms: 2000,
            request_timeout_secs: 30,
            db_path: "./bookings.db".to_string(),
            dataset: "bookings".to_string(),
            max_write_bytes: DEFAULT_MAX_WRITE_BYTES,
            max_summary_bytes: DEFAULT_MAX_SUMMARY_BYTES,
            credentials: CredentialsConfig::default(),
        }
    }
}

impl HarvestConfig {
    /// Load from TOML file
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let contents = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config {}", path.display()))?;
        toml::from_str(&contents).with_context(|| format!("Invalid config {}", path.display()))
    }

    pub fn query_units(&self) -> Vec<QueryUnit> {
        self.years
            .iter()
            .map(|&year| {
                let mut unit = QueryUnit::year(year);
                for (k, v) in &self.extra_params {
                    unit.params.entry(k.clone()).or_insert_with(|| v.clone());
                }
                unit
            })
            .collect()
    }

    pub fn harvest_options(&self) -> HarvestOptions {
        HarvestOptions {
            delay: Duration::from_millis(self.delay_ms),
            max_results: self.max_results,
        }
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn partial_file_keeps_defaults() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(
            file,
            r#"
years = [2023, 2024]
delay_ms = 500

[target]
method = "getBookingsV2"

[extra_params]
status = "All"
"#
        )
        .unwrap();

        let config = HarvestConfig::load(file.path()).unwrap();
        assert_eq!(config.years, vec![2023, 2024]);
        assert_eq!(config.delay_ms, 500);
        assert_eq!(config.target.method, "getBookingsV2");
        assert_eq!(config.target.classname, "SitevisitChartController");
        assert_eq!(config.max_write_bytes, DEFAULT_MAX_WRITE_BYTES);
        assert_eq!(config.base_url, PORTAL_AURA_BASE);

        let units = config.query_units();
        assert_eq!(units.len(), 2);
        assert_eq!(units[0].params["selectedYear"], 2023);
        assert_eq!(units[1].params["status"], "All");
    }

    #[test]
    fn extra_params_never_override_the_year() {
        let mut config = HarvestConfig::default();
        config
            .extra_params
            .insert("selectedYear".into(), Value::from(1999));
        assert_eq!(config.query_units()[0].params["selectedYear"], 2025);
    }

    #[test]
    fn missing_file_is_an_error() {
        assert!(HarvestConfig::load("/definitely/not/here.toml").is_err());
    }
}
