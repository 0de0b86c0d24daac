//! DisasterAgg - LLM-assisted disaster aggregation
//!
//! Clusters the last week of crowd-sourced incident reports into
//! disaster records with a hosted Gemini model and replaces the stored
//! disaster set.
//!
//! Exit codes:
//!   0 - Success (or any event-trigger run; failures are only logged)
//!   1 - Runtime error (config, store, classifier) on the callable path

mod aggregation;
mod classifier;
mod cli;
mod config;
mod error;
mod models;
mod store;

use aggregation::{trigger, AggregatorOptions, ReportAggregator};
use anyhow::{bail, Context, Result};
use chrono::Utc;
use classifier::{GeminiClassifier, GeminiConfig};
use cli::{Args, TriggerKind};
use config::{ApiKey, Config};
use models::{AggregationSummary, Severity};
use std::sync::Arc;
use store::OpenedStore;
use tracing::{debug, error, info};
use tracing_subscriber::FmtSubscriber;

#[tokio::main]
async fn main() -> Result<()> {
    // Parse command-line arguments
    let args = Args::parse_args();

    // Validate arguments
    if let Err(e) = args.validate() {
        eprintln!("Error: {}", e);
        std::process::exit(1);
    }

    // Handle --init-config early (no logging needed)
    if args.init_config {
        return handle_init_config();
    }

    init_logging(&args);

    info!("DisasterAgg v{}", env!("CARGO_PKG_VERSION"));
    debug!("Trigger: {:?}, dry run: {}", args.trigger, args.dry_run);

    match run(args).await {
        Ok(exit_code) => std::process::exit(exit_code),
        Err(e) => {
            error!("Run failed: {:#}", e);
            eprintln!("\n❌ Error: {:#}", e);
            std::process::exit(1);
        }
    }
}

/// Handle --init-config: generate a default .disasteragg.toml.
fn handle_init_config() -> Result<()> {
    let path = std::path::Path::new(config::DEFAULT_CONFIG_FILE);

    if path.exists() {
        eprintln!("⚠️  {} already exists. Remove it first or edit it manually.", config::DEFAULT_CONFIG_FILE);
        std::process::exit(1);
    }

    std::fs::write(path, Config::default_toml())
        .with_context(|| format!("Failed to write {}", config::DEFAULT_CONFIG_FILE))?;

    println!("✅ Created {} with default settings.", config::DEFAULT_CONFIG_FILE);
    println!("   Set GEMINI_API_KEY in the environment; keys are never read from the file.");
    Ok(())
}

/// Initialize logging based on verbosity settings.
fn init_logging(args: &Args) {
    let level = args.log_level();

    let subscriber = FmtSubscriber::builder()
        .with_max_level(level)
        .with_target(false)
        .with_thread_ids(false)
        .with_file(false)
        .with_line_number(false)
        .with_writer(std::io::stderr)
        .compact()
        .finish();

    tracing::subscriber::set_global_default(subscriber).expect("Failed to set tracing subscriber");
}

/// Load configuration from file or use defaults.
fn load_config(args: &Args) -> Result<Config> {
    if let Some(ref config_path) = args.config {
        info!("Loading config from: {}", config_path.display());
        return Config::load(config_path);
    }

    match Config::load_default() {
        Ok(Some(config)) => {
            info!("Loaded default config from {}", config::DEFAULT_CONFIG_FILE);
            Ok(config)
        }
        Ok(None) => {
            debug!("No config file found, using defaults");
            Ok(Config::default())
        }
        Err(e) => Err(e),
    }
}

/// Run one invocation. Returns the process exit code.
async fn run(args: Args) -> Result<i32> {
    let mut config = load_config(&args)?;
    config.merge_with_args(&args);
    config.validate()?;

    let token = args.firestore_token.clone().map(ApiKey::new);
    let opened = OpenedStore::open(&config.store, token, config.classifier.timeout_seconds)?;
    let store = opened.handle();

    let options = AggregatorOptions::from(&config.aggregation);

    if args.dry_run {
        return handle_dry_run(store.as_ref(), &options).await;
    }

    let api_key = match args.api_key.clone().map(ApiKey::new) {
        Some(key) if !key.is_empty() => key,
        _ => bail!("GEMINI_API_KEY is not set (use the environment or --api-key)"),
    };

    let classifier = GeminiClassifier::new(GeminiConfig {
        api_url: config.classifier.api_url.clone(),
        model: config.classifier.model.clone(),
        api_key,
        temperature: config.classifier.temperature,
        timeout_seconds: config.classifier.timeout_seconds,
        strict_validation: config.aggregation.strict_validation,
    })?;

    info!(
        "Aggregating with {} over the last {} days ({:?})",
        config.classifier.model, config.aggregation.window_days, options.strategy
    );
    let aggregator = ReportAggregator::new(store, Arc::new(classifier), options);

    let exit_code = match args.trigger {
        TriggerKind::Event => {
            if let Some(summary) = trigger::on_report_created(&aggregator).await {
                print_summary(&summary);
            }
            0
        }
        TriggerKind::Callable => match trigger::reaggregate(&aggregator).await {
            Ok((response, summary)) => {
                info!(
                    "{} disasters written from {} reports ({} previous removed)",
                    summary.disasters_written, summary.reports_considered, summary.previous_removed
                );
                println!("{}", serde_json::to_string(&response)?);
                0
            }
            Err(err) => {
                println!("{}", err.to_json());
                1
            }
        },
    };

    // The snapshot mirrors whatever state the run left behind.
    opened.persist()?;
    Ok(exit_code)
}

/// Handle --dry-run: list the report window, no clearing or classifier call.
async fn handle_dry_run(store: &dyn store::DisasterStore, options: &AggregatorOptions) -> Result<i32> {
    let since = Utc::now()
        .checked_sub_signed(options.window)
        .context("Report window is out of range")?;
    println!("\n🔍 Dry run: reports since {} (no LLM call, no writes)...\n", since.format("%Y-%m-%d %H:%M UTC"));

    let mut reports = store.reports_since(since).await?;
    reports.retain(|r| r.timestamp.is_some_and(|ts| ts >= since));

    if reports.is_empty() {
        println!("   No reports in the window. A real run would leave zero disasters.");
    } else {
        for report in &reports {
            println!(
                "     📄 {} [{}] area {} · {} affected · {}",
                report.case_id.as_deref().unwrap_or(&report.id),
                report.category,
                report.area_id,
                report.people_affected,
                report
                    .timestamp
                    .map(|ts| ts.format("%Y-%m-%d %H:%M").to_string())
                    .unwrap_or_default()
            );
        }
        println!("\n   Total: {} reports would be sent to the classifier", reports.len());
    }

    println!("\n✅ Dry run complete. No LLM calls were made.");
    Ok(0)
}

fn print_summary(summary: &AggregationSummary) {
    let count = |s: Severity| summary.by_severity.get(&s).copied().unwrap_or(0);

    println!("\n📊 Aggregation Summary ({}):", summary.generation);
    println!("   Reports in window: {}", summary.reports_considered);
    println!("   Disasters written: {}", summary.disasters_written);
    println!(
        "   - {} Critical: {} | {} High: {} | {} Medium: {}",
        Severity::Critical.emoji(),
        count(Severity::Critical),
        Severity::High.emoji(),
        count(Severity::High),
        Severity::Medium.emoji(),
        count(Severity::Medium)
    );
    println!("   Previous disasters removed: {}", summary.previous_removed);
}
