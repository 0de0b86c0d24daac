//! Command-line interface argument parsing.
//!
//! This module handles all CLI argument parsing using clap,
//! including validation and default values.

use crate::config::{ReplaceStrategy, StoreBackend, MAX_WINDOW_DAYS};
use clap::Parser;
use std::path::PathBuf;

/// DisasterAgg - cluster crowd-sourced incident reports into disasters
///
/// Loads the last week of reports, asks Gemini to group them into
/// disasters, names each one after its primary area and replaces the
/// stored disaster set.
///
/// Examples:
///   disasteragg --project relief-ops
///   disasteragg --trigger event --project relief-ops
///   disasteragg --snapshot ./state.json --strategy generational
///   disasteragg --snapshot ./state.json --dry-run
///   disasteragg --init-config
#[derive(Parser, Debug, Clone)]
#[command(author, version, about, long_about = None)]
#[command(propagate_version = true)]
pub struct Args {
    /// Invocation path to emulate
    ///
    /// `callable` prints {"success":true} or an INTERNAL error and exits 1 on
    /// failure. `event` only logs failures.
    #[arg(long, default_value = "callable", value_name = "KIND")]
    pub trigger: TriggerKind,

    /// Gemini API key
    #[arg(long, env = "GEMINI_API_KEY", hide_env_values = true, value_name = "KEY")]
    pub api_key: Option<String>,

    /// OAuth bearer token for Firestore (not needed against the emulator)
    #[arg(long, env = "FIRESTORE_TOKEN", hide_env_values = true, value_name = "TOKEN")]
    pub firestore_token: Option<String>,

    /// Gemini model to use for clustering
    #[arg(short, long, env = "DISASTERAGG_MODEL")]
    pub model: Option<String>,

    /// Document store backend
    #[arg(long, value_name = "BACKEND")]
    pub store: Option<StoreBackend>,

    /// JSON snapshot file (implies --store snapshot)
    #[arg(long, value_name = "FILE")]
    pub snapshot: Option<PathBuf>,

    /// Firestore project id
    #[arg(short, long, env = "GOOGLE_CLOUD_PROJECT", value_name = "ID")]
    pub project: Option<String>,

    /// Firestore emulator host (host:port)
    #[arg(long, env = "FIRESTORE_EMULATOR_HOST", value_name = "HOST")]
    pub emulator_host: Option<String>,

    /// Trailing report window in days
    #[arg(long, value_name = "DAYS")]
    pub window_days: Option<u32>,

    /// Request timeout in seconds
    #[arg(long, value_name = "SECS")]
    pub timeout: Option<u64>,

    /// How the previous disaster set is replaced
    #[arg(long, value_name = "STRATEGY")]
    pub strategy: Option<ReplaceStrategy>,

    /// Skip the aggregation lease
    #[arg(long)]
    pub no_lease: bool,

    /// Fail the run on any invalid classifier candidate
    #[arg(long)]
    pub strict: bool,

    /// Path to configuration file
    ///
    /// If not specified, looks for .disasteragg.toml in the current directory
    #[arg(short, long, value_name = "FILE")]
    pub config: Option<PathBuf>,

    /// Enable verbose logging output
    #[arg(short, long)]
    pub verbose: bool,

    /// Run in quiet mode (errors only)
    #[arg(short, long)]
    pub quiet: bool,

    /// Dry run: list the reports in the window without clearing,
    /// classifying or writing anything
    #[arg(long)]
    pub dry_run: bool,

    /// Generate a default .disasteragg.toml configuration file
    #[arg(long)]
    pub init_config: bool,
}

/// Which invocation path a run emulates.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, clap::ValueEnum)]
pub enum TriggerKind {
    /// Fire-and-forget run after a report is created
    Event,
    /// On-demand re-aggregation with a success/error response
    #[default]
    Callable,
}

impl Args {
    /// Parse command-line arguments.
    pub fn parse_args() -> Self {
        Self::parse()
    }

    /// Validate the parsed arguments.
    pub fn validate(&self) -> Result<(), String> {
        // Skip validation for --init-config
        if self.init_config {
            return Ok(());
        }

        if self.verbose && self.quiet {
            return Err("Cannot use both --verbose and --quiet".to_string());
        }

        if let Some(days) = self.window_days {
            if days == 0 || days > MAX_WINDOW_DAYS {
                return Err(format!("Window must be between 1 and {} days", MAX_WINDOW_DAYS));
            }
        }

        if let Some(timeout) = self.timeout {
            if timeout == 0 {
                return Err("Timeout must be at least 1 second".to_string());
            }
        }

        if self.store == Some(StoreBackend::Snapshot) && self.snapshot.is_none() {
            return Err("--store snapshot requires --snapshot <FILE>".to_string());
        }

        if let Some(ref host) = self.emulator_host {
            if host.starts_with("http://") || host.starts_with("https://") {
                return Err("Emulator host must be host:port, without a scheme".to_string());
            }
        }

        Ok(())
    }

    /// Returns the log level based on verbosity settings.
    pub fn log_level(&self) -> tracing::Level {
        if self.quiet {
            tracing::Level::ERROR
        } else if self.verbose {
            tracing::Level::DEBUG
        } else {
            tracing::Level::INFO
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn make_args() -> Args {
        Args {
            trigger: TriggerKind::Callable,
            api_key: Some("key".to_string()),
            firestore_token: None,
            model: None,
            store: None,
            snapshot: None,
            project: Some("relief-ops".to_string()),
            emulator_host: None,
            window_days: None,
            timeout: None,
            strategy: None,
            no_lease: false,
            strict: false,
            config: None,
            verbose: false,
            quiet: false,
            dry_run: false,
            init_config: false,
        }
    }

    #[test]
    fn test_parse_flags() {
        let args = Args::try_parse_from([
            "disasteragg",
            "--trigger",
            "event",
            "--snapshot",
            "state.json",
            "--strategy",
            "generational",
            "--window-days",
            "3",
        ])
        .unwrap();
        assert_eq!(args.trigger, TriggerKind::Event);
        assert_eq!(args.snapshot, Some(PathBuf::from("state.json")));
        assert_eq!(args.strategy, Some(ReplaceStrategy::Generational));
        assert_eq!(args.window_days, Some(3));
    }

    #[test]
    fn test_validation_conflicting_options() {
        let mut args = make_args();
        args.verbose = true;
        args.quiet = true;
        assert!(args.validate().is_err());
    }

    #[test]
    fn test_validation_zero_window() {
        let mut args = make_args();
        args.window_days = Some(0);
        assert!(args.validate().is_err());
    }

    #[test]
    fn test_validation_oversized_window() {
        let mut args = make_args();
        args.window_days = Some(200_000_000);
        assert!(args.validate().is_err());

        args.window_days = Some(MAX_WINDOW_DAYS);
        assert!(args.validate().is_ok());
    }

    #[test]
    fn test_validation_snapshot_backend_needs_path() {
        let mut args = make_args();
        args.store = Some(StoreBackend::Snapshot);
        assert!(args.validate().is_err());

        args.snapshot = Some(PathBuf::from("state.json"));
        assert!(args.validate().is_ok());
    }

    #[test]
    fn test_validation_emulator_host_without_scheme() {
        let mut args = make_args();
        args.emulator_host = Some("http://localhost:8080".to_string());
        assert!(args.validate().is_err());
    }

    #[test]
    fn test_log_level() {
        let mut args = make_args();
        assert_eq!(args.log_level(), tracing::Level::INFO);

        args.verbose = true;
        assert_eq!(args.log_level(), tracing::Level::DEBUG);

        args.verbose = false;
        args.quiet = true;
        assert_eq!(args.log_level(), tracing::Level::ERROR);
    }
}
