//! Configuration types and loading for stockfeed.
//!
//! Configuration lives in `~/.stockfeed/config.json`. Every section has
//! defaults, so a missing file or a partial file is valid. Environment
//! variables override a handful of fields that are commonly changed per host.

use anyhow::{Context, Result};
use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Get the configuration directory path.
pub fn config_dir() -> PathBuf {
    directories::UserDirs::new().map_or_else(
        || PathBuf::from(".stockfeed"),
        |dirs| dirs.home_dir().join(".stockfeed"),
    )
}

/// Get the configuration file path.
pub fn config_path() -> PathBuf {
    config_dir().join("config.json")
}

/// Where a loaded configuration came from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConfigSource {
    File(PathBuf),
    /// Nothing at this path; built-in defaults were used
    Defaults(PathBuf),
}

impl fmt::Display for ConfigSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::File(path) => write!(f, "{}", path.display()),
            Self::Defaults(path) => write!(f, "defaults ({} not found)", path.display()),
        }
    }
}

// ============================================================================
// Root Configuration
// ============================================================================

/// Root configuration for the ingestion service.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    /// Logging configuration
    #[serde(default)]
    pub observability: ObservabilityConfig,

    /// Local database configuration
    #[serde(default)]
    pub storage: StorageConfig,

    /// Remote market data source configuration
    #[serde(default)]
    pub source: SourceConfig,

    /// Retry and escalation policy for the ingestion loop
    #[serde(default)]
    pub ingest: IngestConfig,

    /// Network identity rotation configuration
    #[serde(default)]
    pub rotation: RotationConfig,

    /// Stock codes tracked by the catalog (e.g. "600000.SH")
    #[serde(default)]
    pub entities: Vec<String>,
}

impl Config {
    /// Load configuration from the default path, falling back to defaults.
    pub fn load() -> Result<(Self, ConfigSource)> {
        Self::load_or_default(&config_path())
    }

    /// Load `path` if it exists, otherwise return defaults.
    pub fn load_or_default(path: &Path) -> Result<(Self, ConfigSource)> {
        if !path.exists() {
            return Ok((Self::default(), ConfigSource::Defaults(path.to_path_buf())));
        }
        let config = Self::load_from(path)?;
        Ok((config, ConfigSource::File(path.to_path_buf())))
    }

    /// Load configuration from a specific path.
    pub fn load_from(path: &Path) -> Result<Self> {
        let content = fs::read_to_string(path)
            .with_context(|| format!("Failed to read config from {}", path.display()))?;

        serde_json::from_str(&content)
            .with_context(|| format!("Failed to parse config from {}", path.display()))
    }

    /// Load configuration with environment variable overrides applied.
    ///
    /// An explicit `path` must exist. Nothing is logged here since logging
    /// is configured from the result.
    pub fn load_with_env(path: Option<&Path>) -> Result<(Self, ConfigSource)> {
        let (mut config, source) = match path {
            Some(p) => (Self::load_from(p)?, ConfigSource::File(p.to_path_buf())),
            None => Self::load()?,
        };
        config.apply_env_overrides();
        Ok((config, source))
    }

    /// Apply environment variable overrides to the configuration.
    pub fn apply_env_overrides(&mut self) {
        if let Ok(path) = std::env::var("STOCKFEED_DB_PATH") {
            if !path.trim().is_empty() {
                self.storage.db_path = Some(PathBuf::from(path));
            }
        }
        if let Ok(level) = std::env::var("STOCKFEED_LOG_LEVEL") {
            self.observability.log_level = level;
        }
        if let Ok(format) = std::env::var("STOCKFEED_LOG_FORMAT") {
            self.observability.log_format = format;
        }
        if let Ok(command) = std::env::var("STOCKFEED_ROTATION_COMMAND") {
            self.rotation.command = if command.trim().is_empty() {
                None
            } else {
                Some(command)
            };
        }
    }
}

// ============================================================================
// Observability
// ============================================================================

/// Observability configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ObservabilityConfig {
    /// Log level (trace, debug, info, warn, error)
    #[serde(default = "default_log_level", alias = "level")]
    pub log_level: String,

    /// Log format (json, pretty)
    #[serde(default = "default_log_format", alias = "format")]
    pub log_format: String,

    /// Additional module targets pinned to `warn`
    #[serde(default)]
    pub excluded_targets: Vec<String>,
}

impl Default for ObservabilityConfig {
    fn default() -> Self {
        Self {
            log_level: default_log_level(),
            log_format: default_log_format(),
            excluded_targets: Vec::new(),
        }
    }
}

// ============================================================================
// Storage
// ============================================================================

/// SQLite storage configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct StorageConfig {
    /// Database path. Defaults to `~/.stockfeed/stockfeed.db`.
    #[serde(default)]
    pub db_path: Option<PathBuf>,
}

impl StorageConfig {
    /// Resolved database path.
    pub fn db_path(&self) -> PathBuf {
        self.db_path
            .clone()
            .unwrap_or_else(|| config_dir().join("stockfeed.db"))
    }
}

// ============================================================================
// Data Source
// ============================================================================

/// Remote kline source configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SourceConfig {
    /// Kline endpoint URL
    #[serde(default = "default_kline_url")]
    pub kline_url: String,

    /// Per-request timeout in seconds
    #[serde(default = "default_request_timeout_secs")]
    pub request_timeout_secs: u64,

    /// Minimum spacing between two requests, in milliseconds
    #[serde(default = "default_min_request_interval_ms")]
    pub min_request_interval_ms: u64,

    /// User agent sent with every request
    #[serde(default = "default_user_agent")]
    pub user_agent: String,
}

impl Default for SourceConfig {
    fn default() -> Self {
        Self {
            kline_url: default_kline_url(),
            request_timeout_secs: default_request_timeout_secs(),
            min_request_interval_ms: default_min_request_interval_ms(),
            user_agent: default_user_agent(),
        }
    }
}

impl SourceConfig {
    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }

    pub fn min_request_interval(&self) -> Duration {
        Duration::from_millis(self.min_request_interval_ms)
    }
}

// ============================================================================
// Ingestion Policy
// ============================================================================

/// Retry policy for the per-entity ingestion state machine.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IngestConfig {
    /// Consecutive transient failures after which the next failure
    /// escalates to an identity rotation
    #[serde(default = "default_escalation_threshold")]
    pub escalation_threshold: u32,

    /// Fetch attempts per entity before it is given up for the pass
    #[serde(default = "default_max_attempts_per_entity")]
    pub max_attempts_per_entity: u32,

    /// Fixed delay between retries of the same entity, in milliseconds
    #[serde(default = "default_retry_delay_ms")]
    pub retry_delay_ms: u64,

    /// First date fetched for entities without a watermark
    #[serde(default = "default_initial_start_date")]
    pub initial_start_date: NaiveDate,

    /// Offer failed entities one more pass after the main pass
    #[serde(default = "default_true")]
    pub retry_failed_pass: bool,

    /// Run the reconciliation sweep for entities without records
    #[serde(default = "default_true")]
    pub reconcile_empty: bool,
}

impl Default for IngestConfig {
    fn default() -> Self {
        Self {
            escalation_threshold: default_escalation_threshold(),
            max_attempts_per_entity: default_max_attempts_per_entity(),
            retry_delay_ms: default_retry_delay_ms(),
            initial_start_date: default_initial_start_date(),
            retry_failed_pass: true,
            reconcile_empty: true,
        }
    }
}

impl IngestConfig {
    pub fn retry_delay(&self) -> Duration {
        Duration::from_millis(self.retry_delay_ms)
    }
}

// ============================================================================
// Identity Rotation
// ============================================================================

/// Identity rotation configuration.
///
/// When `command` is unset, rotation is disabled and rate-limited entities
/// fall back to plain fixed-delay retries.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RotationConfig {
    /// Shell command that forces a new public identity (e.g. a WAN reconnect script)
    #[serde(default)]
    pub command: Option<String>,

    /// URL returning the caller's public IP as plain text
    #[serde(default = "default_probe_url")]
    pub probe_url: String,

    /// Rotation attempts before giving up on obtaining a fresh identity
    #[serde(default = "default_max_rotation_attempts")]
    pub max_attempts: u32,

    /// Delay before retrying a failed rotation, in milliseconds
    #[serde(default = "default_rotation_retry_delay_ms")]
    pub retry_delay_ms: u64,

    /// Time allowed for the network path to settle after a rotation, in milliseconds
    #[serde(default = "default_settle_delay_ms")]
    pub settle_delay_ms: u64,

    /// Upper bound on a single rotation call, in seconds
    #[serde(default = "default_rotation_timeout_secs")]
    pub timeout_secs: u64,

    /// Number of recently used identities remembered
    #[serde(default = "default_registry_capacity")]
    pub registry_capacity: usize,
}

impl Default for RotationConfig {
    fn default() -> Self {
        Self {
            command: None,
            probe_url: default_probe_url(),
            max_attempts: default_max_rotation_attempts(),
            retry_delay_ms: default_rotation_retry_delay_ms(),
            settle_delay_ms: default_settle_delay_ms(),
            timeout_secs: default_rotation_timeout_secs(),
            registry_capacity: default_registry_capacity(),
        }
    }
}

impl RotationConfig {
    pub fn retry_delay(&self) -> Duration {
        Duration::from_millis(self.retry_delay_ms)
    }

    pub fn settle_delay(&self) -> Duration {
        Duration::from_millis(self.settle_delay_ms)
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

// ============================================================================
// Defaults
// ============================================================================

fn default_log_level() -> String {
    "info".into()
}
fn default_log_format() -> String {
    "pretty".into()
}
fn default_true() -> bool {
    true
}
fn default_kline_url() -> String {
    "https://push2his.eastmoney.com/api/qt/stock/kline/get".into()
}
fn default_request_timeout_secs() -> u64 {
    30
}
fn default_min_request_interval_ms() -> u64 {
    200
}
fn default_user_agent() -> String {
    "Mozilla/5.0 (Macintosh; Intel Mac OS X 10_15_7)".into()
}
fn default_escalation_threshold() -> u32 {
    3
}
fn default_max_attempts_per_entity() -> u32 {
    10
}
fn default_retry_delay_ms() -> u64 {
    2_000
}
fn default_initial_start_date() -> NaiveDate {
    NaiveDate::from_ymd_opt(2005, 1, 4).unwrap_or(NaiveDate::MIN)
}
fn default_probe_url() -> String {
    "https://api.ipify.org".into()
}
fn default_max_rotation_attempts() -> u32 {
    5
}
fn default_rotation_retry_delay_ms() -> u64 {
    5_000
}
fn default_settle_delay_ms() -> u64 {
    10_000
}
fn default_rotation_timeout_secs() -> u64 {
    90
}
fn default_registry_capacity() -> usize {
    50
}

// ============================================================================
// Tests
// ============================================================================
