//! Configuration file handling.
//!
//! This module handles loading and merging configuration from
//! `.disasteragg.toml` files. Secrets are never read from the file.

use anyhow::{bail, Context, Result};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::{Path, PathBuf};

/// Default config file name, looked up in the working directory.
pub const DEFAULT_CONFIG_FILE: &str = ".disasteragg.toml";

/// Longest report window accepted, in days.
pub const MAX_WINDOW_DAYS: u32 = 3_650;

/// Longest lease accepted, in seconds.
pub const MAX_LEASE_TTL_SECONDS: u64 = 86_400;

/// Secret string that never shows up in logs.
#[derive(Clone, Default, PartialEq, Eq)]
pub struct ApiKey(String);

impl ApiKey {
    pub fn new(value: impl Into<String>) -> Self {
        Self(value.into())
    }

    /// Raw value, for request headers only.
    pub fn expose(&self) -> &str {
        &self.0
    }

    pub fn is_empty(&self) -> bool {
        self.0.trim().is_empty()
    }
}

impl fmt::Debug for ApiKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ApiKey(***)")
    }
}

/// Root configuration structure.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    /// Classifier (Gemini) settings.
    #[serde(default)]
    pub classifier: ClassifierConfig,

    /// Document store settings.
    #[serde(default)]
    pub store: StoreConfig,

    /// Aggregation pass settings.
    #[serde(default)]
    pub aggregation: AggregationConfig,
}

/// Generative model settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClassifierConfig {
    /// Base URL of the Generative Language API.
    #[serde(default = "default_api_url")]
    pub api_url: String,

    /// Model name.
    #[serde(default = "default_model")]
    pub model: String,

    /// Temperature for generation.
    #[serde(default = "default_temperature")]
    pub temperature: f32,

    /// Request timeout in seconds.
    #[serde(default = "default_timeout")]
    pub timeout_seconds: u64,
}

impl Default for ClassifierConfig {
    fn default() -> Self {
        Self {
            api_url: default_api_url(),
            model: default_model(),
            temperature: default_temperature(),
            timeout_seconds: default_timeout(),
        }
    }
}

fn default_api_url() -> String {
    "https://generativelanguage.googleapis.com/v1beta".to_string()
}

fn default_model() -> String {
    "gemini-2.0-flash".to_string()
}

fn default_temperature() -> f32 {
    0.1
}

fn default_timeout() -> u64 {
    120 // matches the trigger's wall-clock budget
}

/// Which document store to use.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "snake_case")]
pub enum StoreBackend {
    /// Firestore over its REST API
    #[default]
    Firestore,
    /// Local JSON snapshot file
    Snapshot,
}

/// Document store settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoreConfig {
    #[serde(default)]
    pub backend: StoreBackend,

    /// Firestore project id.
    #[serde(default)]
    pub project_id: String,

    /// Firestore database id.
    #[serde(default = "default_database")]
    pub database: String,

    /// `host:port` of a Firestore emulator, if any.
    #[serde(default)]
    pub emulator_host: Option<String>,

    /// Path of the JSON snapshot for the snapshot backend.
    #[serde(default)]
    pub snapshot_path: Option<PathBuf>,

    #[serde(default = "default_reports_collection")]
    pub reports_collection: String,

    #[serde(default = "default_areas_collection")]
    pub areas_collection: String,

    #[serde(default = "default_disasters_collection")]
    pub disasters_collection: String,

    /// Holds the current-generation pointer and the run lease.
    #[serde(default = "default_meta_collection")]
    pub meta_collection: String,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            backend: StoreBackend::default(),
            project_id: String::new(),
            database: default_database(),
            emulator_host: None,
            snapshot_path: None,
            reports_collection: default_reports_collection(),
            areas_collection: default_areas_collection(),
            disasters_collection: default_disasters_collection(),
            meta_collection: default_meta_collection(),
        }
    }
}

fn default_database() -> String {
    "(default)".to_string()
}

fn default_reports_collection() -> String {
    "reported_cases".to_string()
}

fn default_areas_collection() -> String {
    "Areas".to_string()
}

fn default_disasters_collection() -> String {
    "disasters".to_string()
}

fn default_meta_collection() -> String {
    "aggregation_meta".to_string()
}

/// How the previous disaster set is replaced.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "snake_case")]
pub enum ReplaceStrategy {
    /// Delete everything first, then write the new set
    #[default]
    ClearFirst,
    /// Write the new set tagged with a generation, then delete the old one
    Generational,
}

/// Aggregation pass settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AggregationConfig {
    /// Trailing window of reports, in days.
    #[serde(default = "default_window_days")]
    pub window_days: u32,

    /// Title used when neither the area nor the classifier names the disaster.
    #[serde(default = "default_fallback_title")]
    pub fallback_title: String,

    #[serde(default)]
    pub replace_strategy: ReplaceStrategy,

    /// Guard runs with a lease document.
    #[serde(default = "default_true")]
    pub lease_enabled: bool,

    #[serde(default = "default_lease_ttl")]
    pub lease_ttl_seconds: u64,

    /// Fail the run on any invalid candidate instead of dropping it.
    #[serde(default)]
    pub strict_validation: bool,
}

impl Default for AggregationConfig {
    fn default() -> Self {
        Self {
            window_days: default_window_days(),
            fallback_title: default_fallback_title(),
            replace_strategy: ReplaceStrategy::default(),
            lease_enabled: true,
            lease_ttl_seconds: default_lease_ttl(),
            strict_validation: false,
        }
    }
}

fn default_window_days() -> u32 {
    7
}

fn default_fallback_title() -> String {
    "Unknown Disaster".to_string()
}

fn default_true() -> bool {
    true
}

fn default_lease_ttl() -> u64 {
    180
}

impl Config {
    /// Load configuration from a file path.
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;

        let config: Config = toml::from_str(&content)
            .with_context(|| format!("Failed to parse config file: {}", path.display()))?;

        Ok(config)
    }

    /// Try to load configuration from the default location.
    ///
    /// Returns `Ok(None)` if the file doesn't exist, `Err` if it exists but can't be parsed.
    pub fn load_default() -> Result<Option<Self>> {
        Self::load_from_dir(Path::new("."))
    }

    /// Try to load `.disasteragg.toml` from a directory.
    pub fn load_from_dir(dir: &Path) -> Result<Option<Self>> {
        let config_path = dir.join(DEFAULT_CONFIG_FILE);

        if config_path.exists() {
            Ok(Some(Self::load(&config_path)?))
        } else {
            Ok(None)
        }
    }

    /// Merge this configuration with CLI arguments.
    ///
    /// CLI arguments take precedence over config file settings, but only
    /// when they were given explicitly.
    pub fn merge_with_args(&mut self, args: &crate::cli::Args) {
        if let Some(ref model) = args.model {
            self.classifier.model = model.clone();
        }
        if let Some(timeout) = args.timeout {
            self.classifier.timeout_seconds = timeout;
        }

        if let Some(backend) = args.store {
            self.store.backend = backend;
        }
        if let Some(ref snapshot) = args.snapshot {
            self.store.snapshot_path = Some(snapshot.clone());
            if args.store.is_none() {
                self.store.backend = StoreBackend::Snapshot;
            }
        }
        if let Some(ref project) = args.project {
            self.store.project_id = project.clone();
        }
        if let Some(ref host) = args.emulator_host {
            self.store.emulator_host = Some(host.clone());
        }

        if let Some(days) = args.window_days {
            self.aggregation.window_days = days;
        }
        if let Some(strategy) = args.strategy {
            self.aggregation.replace_strategy = strategy;
        }
        if args.no_lease {
            self.aggregation.lease_enabled = false;
        }
        if args.strict {
            self.aggregation.strict_validation = true;
        }
    }

    /// Reject values that cannot drive a run, whichever source set them.
    pub fn validate(&self) -> Result<()> {
        let window = self.aggregation.window_days;
        if window == 0 || window > MAX_WINDOW_DAYS {
            bail!("window_days must be between 1 and {}, got {}", MAX_WINDOW_DAYS, window);
        }

        let ttl = self.aggregation.lease_ttl_seconds;
        if self.aggregation.lease_enabled && (ttl == 0 || ttl > MAX_LEASE_TTL_SECONDS) {
            bail!(
                "lease_ttl_seconds must be between 1 and {}, got {}",
                MAX_LEASE_TTL_SECONDS,
                ttl
            );
        }

        if self.classifier.timeout_seconds == 0 {
            bail!("timeout_seconds must be at least 1");
        }

        Ok(())
    }

    /// Generate a default configuration file content.
    pub fn default_toml() -> String {
        let config = Config::default();
        toml::to_string_pretty(&config).unwrap_or_else(|_| String::new())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = Config::default();
        assert_eq!(config.classifier.model, "gemini-2.0-flash");
        assert_eq!(config.classifier.timeout_seconds, 120);
        assert_eq!(config.store.reports_collection, "reported_cases");
        assert_eq!(config.store.areas_collection, "Areas");
        assert_eq!(config.store.disasters_collection, "disasters");
        assert_eq!(config.aggregation.window_days, 7);
        assert_eq!(config.aggregation.fallback_title, "Unknown Disaster");
        assert_eq!(config.aggregation.replace_strategy, ReplaceStrategy::ClearFirst);
        assert!(config.aggregation.lease_enabled);
    }

    #[test]
    fn test_parse_config() {
        let toml_content = r#"
[classifier]
model = "gemini-1.5-pro"
temperature = 0.0

[store]
backend = "snapshot"
snapshot_path = "state.json"

[aggregation]
window_days = 3
replace_strategy = "generational"
lease_enabled = false
"#;

        let config: Config = toml::from_str(toml_content).unwrap();
        assert_eq!(config.classifier.model, "gemini-1.5-pro");
        assert_eq!(config.classifier.temperature, 0.0);
        assert_eq!(config.store.backend, StoreBackend::Snapshot);
        assert_eq!(config.store.snapshot_path, Some(PathBuf::from("state.json")));
        assert_eq!(config.store.database, "(default)");
        assert_eq!(config.aggregation.window_days, 3);
        assert_eq!(config.aggregation.replace_strategy, ReplaceStrategy::Generational);
        assert!(!config.aggregation.lease_enabled);
    }

    #[test]
    fn test_default_toml_generation() {
        let toml_str = Config::default_toml();
        assert!(toml_str.contains("[classifier]"));
        assert!(toml_str.contains("[store]"));
        assert!(toml_str.contains("[aggregation]"));
        assert!(!toml_str.contains("api_key"));
    }

    #[test]
    fn test_load_from_dir() {
        let dir = tempfile::tempdir().unwrap();
        assert!(Config::load_from_dir(dir.path()).unwrap().is_none());

        std::fs::write(
            dir.path().join(DEFAULT_CONFIG_FILE),
            "[store]\nproject_id = \"relief-ops\"\n",
        )
        .unwrap();
        let config = Config::load_from_dir(dir.path()).unwrap().unwrap();
        assert_eq!(config.store.project_id, "relief-ops");
    }

    #[test]
    fn test_load_rejects_bad_toml() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("bad.toml");
        std::fs::write(&path, "[aggregation\nwindow_days = ").unwrap();
        assert!(Config::load(&path).is_err());
    }

    #[test]
    fn test_load_from_dir_surfaces_parse_errors() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(
            dir.path().join(DEFAULT_CONFIG_FILE),
            "[aggregation]\nreplace_strategy = \"generationl\"\n",
        )
        .unwrap();
        assert!(Config::load_from_dir(dir.path()).is_err());
    }

    #[test]
    fn test_validate_bounds() {
        assert!(Config::default().validate().is_ok());

        let mut config = Config::default();
        config.aggregation.window_days = 200_000_000;
        assert!(config.validate().is_err());

        let mut config = Config::default();
        config.aggregation.window_days = 0;
        assert!(config.validate().is_err());

        let mut config = Config::default();
        config.aggregation.lease_ttl_seconds = u64::MAX;
        assert!(config.validate().is_err());
        config.aggregation.lease_enabled = false;
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_api_key_debug_is_redacted() {
        let key = ApiKey::new("AIza-secret");
        assert_eq!(format!("{:?}", key), "ApiKey(***)");
        assert_eq!(key.expose(), "AIza-secret");
    }
}
