//! Bookings Harvester
//! Pilot in Command: Partner Portal Extraction
//! Mission: Pull every booking for the requested years, land every row
//!
//! Usage:
//!   PORTAL_COOKIE_HEADER='sid=...' PORTAL_AURA_TOKEN='...' PORTAL_AURA_CONTEXT='{...}' \
//!   cargo run --release -- --years 2024,2025

use anyhow::Result;
use clap::Parser;
use dotenv::dotenv;
use std::path::{Path, PathBuf};
use tracing::{error, info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};
use uuid::Uuid;

use bookings_harvester::{
    bookings::{
        harvest, normalize::format_aed, persist, preflight, summary::ranked, RunMetadata,
        RunSummary, SummaryRecord, SUMMARY_KEY,
    },
    config::HarvestConfig,
    errors::HarvestError,
    scrapers::AuraClient,
    storage::Storage,
};

#[derive(Parser, Debug)]
#[command(name = "bookings-harvester")]
#[command(about = "Harvest partner-portal bookings into a local dataset")]
struct Args {
    /// Optional TOML config file; flags and env vars override it
    #[arg(long, env = "HARVEST_CONFIG")]
    config: Option<PathBuf>,

    /// Full Cookie header captured from the browser session
    #[arg(long, env = "PORTAL_COOKIE_HEADER", hide_env_values = true)]
    cookie_header: Option<String>,

    /// aura.token from a captured request payload
    #[arg(long, env = "PORTAL_AURA_TOKEN", hide_env_values = true)]
    aura_token: Option<String>,

    /// aura.context from a captured request payload
    #[arg(long, env = "PORTAL_AURA_CONTEXT", hide_env_values = true)]
    aura_context: Option<String>,

    /// Years to fetch, comma separated
    #[arg(long, env = "HARVEST_YEARS", value_delimiter = ',')]
    years: Option<Vec<i32>>,

    #[arg(long, env = "HARVEST_MAX_RESULTS")]
    max_results: Option<usize>,

    /// Pause between years, in milliseconds
    #[arg(long, env = "HARVEST_DELAY_MS")]
    delay_ms: Option<u64>,

    #[arg(long, env = "HARVEST_DB_PATH")]
    db_path: Option<String>,

    #[arg(long, env = "PORTAL_BASE_URL")]
    base_url: Option<String>,

    #[arg(long, env = "PORTAL_NAMESPACE")]
    namespace: Option<String>,

    #[arg(long, env = "PORTAL_CLASSNAME")]
    classname: Option<String>,

    #[arg(long, env = "PORTAL_METHOD")]
    method: Option<String>,

    #[arg(long, env = "PORTAL_PAGE_URI")]
    page_uri: Option<String>,
}

impl Args {
    fn into_config(self) -> Result<HarvestConfig> {
        let mut config = match &self.config {
            Some(path) => HarvestConfig::load(path)?,
            None => HarvestConfig::default(),
        };

        if let Some(v) = self.cookie_header {
            config.credentials.cookie_header = v;
        }
        if let Some(v) = self.aura_token {
            config.credentials.aura_token = v;
        }
        if let Some(v) = self.aura_context {
            config.credentials.aura_context = v;
        }
        if let Some(v) = self.years {
            config.years = v;
        }
        if let Some(v) = self.max_results {
            config.max_results = Some(v);
        }
        if let Some(v) = self.delay_ms {
            config.delay_ms = v;
        }
        if let Some(v) = self.db_path {
            config.db_path = v;
        }
        if let Some(v) = self.base_url {
            config.base_url = v;
        }
        if let Some(v) = self.namespace {
            config.target.namespace = v;
        }
        if let Some(v) = self.classname {
            config.target.classname = v;
        }
        if let Some(v) = self.method {
            config.target.method = v;
        }
        if let Some(v) = self.page_uri {
            config.target.page_uri = v;
        }
        Ok(config)
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    load_env();
    init_tracing();

    let config = Args::parse().into_config()?;
    let storage = Storage::open(&config.db_path)?;
    let kv = storage.key_value_store(config.max_summary_bytes);

    let credentials = config.credentials.to_credentials();
    preflight(&credentials, &kv)?;

    let units = config.query_units();
    let run_id = Uuid::new_v4().to_string();
    info!(
        run_id = %run_id,
        cookie_chars = credentials.cookie_header.len(),
        years = ?config.years,
        max_results = ?config.max_results,
        target = %format!("{}.{}", config.target.classname, config.target.method),
        "📋 Configuration loaded"
    );

    let client = AuraClient::new(
        &config.base_url,
        config.target.clone(),
        credentials,
        config.request_timeout(),
    )?;

    let outcome = harvest(&client, &units, &config.harvest_options()).await;
    if outcome.session_expired {
        warn!("⚠️ Session expired during the run. Capture fresh tokens before the next run.");
    }

    let mut dataset = storage.dataset(&config.dataset, &run_id, config.max_write_bytes);
    let metadata = RunMetadata::new(run_id.clone(), &units);
    let report = match persist(&outcome, &mut dataset, &kv, metadata) {
        Ok(report) => report,
        Err(e) => {
            error!(run_id = %run_id, "🛑 {}", e);
            if let HarvestError::Write(_) | HarvestError::RowCountMismatch { .. } = e {
                if let Err(store_err) =
                    kv.set_value(SUMMARY_KEY, &SummaryRecord::failure(e.to_string(), &[]))
                {
                    warn!(error = %store_err, "⚠️ Failed to store failure summary");
                }
            }
            return Err(e.into());
        }
    };

    print_report(&report.summary);
    info!(
        dataset = %config.dataset,
        run_id = %run_id,
        rows = report.write.rows_written,
        calls = report.write.write_calls,
        "✅ Bookings saved as dataset rows, summary saved as {}",
        SUMMARY_KEY
    );
    Ok(())
}

/// Initialize tracing
fn init_tracing() {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "bookings_harvester=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();
}

fn load_env() {
    // 1) Standard dotenv search (cwd + parents)
    let _ = dotenv();

    // 2) Also try the crate's own .env when run with --manifest-path from elsewhere
    let manifest_dir = Path::new(env!("CARGO_MANIFEST_DIR"));
    let candidate = manifest_dir.join(".env");
    if candidate.exists() {
        let _ = dotenv::from_path(&candidate);
    }
}

fn print_report(summary: &RunSummary) {
    println!();
    println!("╔══════════════════════════════════════════════════════════╗");
    println!("║                    HARVEST COMPLETE                      ║");
    println!("╚══════════════════════════════════════════════════════════╝");
    println!();
    println!("📊 Results Summary:");
    println!("   Total Bookings: {}", summary.total_bookings);
    if let Some(before) = summary.truncated_from {
        println!("   (capped from {})", before);
    }
    let processed: Vec<String> = summary
        .unit_breakdown
        .iter()
        .map(|u| format!("{}({})", u.unit, u.count))
        .collect();
    println!("   Units Processed: {}", processed.join(", "));
    if !summary.failed_units.is_empty() {
        let failed: Vec<&str> = summary.failed_units.iter().map(|u| u.unit.as_str()).collect();
        println!("   ❌ Failed Units: {}", failed.join(", "));
    }
    if !summary.skipped_units.is_empty() {
        println!("   ⏭  Skipped Units: {}", summary.skipped_units.join(", "));
    }

    println!();
    println!("💰 Financial Summary:");
    println!(
        "   Total Agreement Value: {}",
        format_aed(summary.financials.total_agreement_value)
    );
    println!(
        "   Total DLD Amount: {}",
        format_aed(summary.financials.total_dld_amount)
    );
    println!(
        "   Average Agreement Value: {}",
        format_aed(summary.financials.average_agreement_value)
    );

    println!();
    println!("📁 Projects Breakdown:");
    for (project, count) in ranked(&summary.project_breakdown) {
        println!("   {}: {} bookings", project, count);
    }

    println!();
    println!("📋 Status Breakdown:");
    for (status, count) in ranked(&summary.status_breakdown) {
        println!("   {}: {} bookings", status, count);
    }
    println!();
}
