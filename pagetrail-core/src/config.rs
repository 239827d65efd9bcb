//! Configuration loading and management
//!
//! Configuration is loaded from `~/.config/pagetrail/config.toml`
//!
//! Paths follow the XDG Base Directory Specification:
//! - Config: `$XDG_CONFIG_HOME/pagetrail/` (~/.config/pagetrail/)
//! - Data: `$XDG_DATA_HOME/pagetrail/` (~/.local/share/pagetrail/)
//! - State/Logs: `$XDG_STATE_HOME/pagetrail/` (~/.local/state/pagetrail/)

use crate::error::{Error, Result};
use chrono::{NaiveDate, Utc};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Prefix of the daily rolling log files
pub const LOG_FILE_PREFIX: &str = "pagetrail.log";

/// Longest accepted timer period, in seconds (one week)
pub const MAX_INTERVAL_SECS: u64 = 7 * 24 * 60 * 60;

/// Returns a best-effort home directory path.
fn home_dir() -> PathBuf {
    std::env::var_os("HOME")
        .map(PathBuf::from)
        .or_else(dirs::home_dir)
        .unwrap_or_else(|| PathBuf::from("."))
}

/// Returns XDG_CONFIG_HOME or ~/.config
fn xdg_config_home() -> PathBuf {
    std::env::var("XDG_CONFIG_HOME")
        .map(PathBuf::from)
        .unwrap_or_else(|_| home_dir().join(".config"))
}

/// Returns XDG_DATA_HOME or ~/.local/share
fn xdg_data_home() -> PathBuf {
    std::env::var("XDG_DATA_HOME")
        .map(PathBuf::from)
        .unwrap_or_else(|_| home_dir().join(".local/share"))
}

/// Returns XDG_STATE_HOME or ~/.local/state
fn xdg_state_home() -> PathBuf {
    std::env::var("XDG_STATE_HOME")
        .map(PathBuf::from)
        .unwrap_or_else(|_| home_dir().join(".local/state"))
}

/// Main configuration struct
#[derive(Debug, Deserialize, Default, Clone)]
pub struct Config {
    /// Which signals are captured
    #[serde(default)]
    pub tracking: TrackingConfig,

    /// Buffering and flush behaviour
    #[serde(default)]
    pub dispatch: DispatchConfig,

    /// Where flushed batches go
    #[serde(default)]
    pub sink: SinkConfig,

    /// Logging configuration
    #[serde(default)]
    pub logging: LoggingConfig,
}

/// Signal capture switches
#[derive(Debug, Deserialize, Clone)]
pub struct TrackingConfig {
    #[serde(default = "default_true")]
    pub scroll_depth: bool,

    #[serde(default = "default_true")]
    pub time_on_page: bool,

    #[serde(default = "default_true")]
    pub clicks: bool,

    #[serde(default = "default_true")]
    pub form_submissions: bool,

    /// When false, clicks on external links are reported as plain link clicks
    #[serde(default = "default_true")]
    pub external_links: bool,

    /// Seconds between `time_on_page` events
    #[serde(default = "default_time_on_page_interval")]
    pub time_on_page_interval_secs: u64,
}

impl Default for TrackingConfig {
    fn default() -> Self {
        Self {
            scroll_depth: true,
            time_on_page: true,
            clicks: true,
            form_submissions: true,
            external_links: true,
            time_on_page_interval_secs: default_time_on_page_interval(),
        }
    }
}

impl TrackingConfig {
    pub fn time_on_page_interval(&self) -> Duration {
        Duration::from_secs(self.time_on_page_interval_secs)
    }

    /// Validate configuration, returning error message if invalid
    pub fn validate(&self) -> Result<()> {
        if self.time_on_page_interval_secs == 0
            || self.time_on_page_interval_secs > MAX_INTERVAL_SECS
        {
            return Err(Error::Config(format!(
                "tracking.time_on_page_interval_secs must be between 1 and {}",
                MAX_INTERVAL_SECS
            )));
        }
        Ok(())
    }
}

fn default_true() -> bool {
    true
}

fn default_time_on_page_interval() -> u64 {
    60
}

/// Buffered dispatcher configuration
#[derive(Debug, Deserialize, Clone)]
pub struct DispatchConfig {
    /// Events per flushed batch, also the non-forced flush threshold
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,

    /// Seconds between timer-driven flushes
    #[serde(default = "default_send_interval")]
    pub send_interval_secs: u64,

    /// Most recent events kept in the persisted snapshot
    #[serde(default = "default_snapshot_limit")]
    pub snapshot_limit: usize,

    /// Store key for the pending-state snapshot
    #[serde(default = "default_storage_key")]
    pub storage_key: String,

    /// Store key for the stable user id
    #[serde(default = "default_user_id_key")]
    pub user_id_key: String,

    /// Report sink failures to callers as delivered
    #[serde(default)]
    pub optimistic_ack: bool,

    /// Log every recorded event at info level
    #[serde(default)]
    pub debug: bool,
}

impl Default for DispatchConfig {
    fn default() -> Self {
        Self {
            batch_size: default_batch_size(),
            send_interval_secs: default_send_interval(),
            snapshot_limit: default_snapshot_limit(),
            storage_key: default_storage_key(),
            user_id_key: default_user_id_key(),
            optimistic_ack: false,
            debug: false,
        }
    }
}

impl DispatchConfig {
    pub fn send_interval(&self) -> Duration {
        Duration::from_secs(self.send_interval_secs)
    }

    /// Validate configuration, returning error message if invalid
    pub fn validate(&self) -> Result<()> {
        if self.batch_size == 0 || self.batch_size > 500 {
            return Err(Error::Config(
                "dispatch.batch_size must be between 1 and 500".to_string(),
            ));
        }
        if self.send_interval_secs == 0 || self.send_interval_secs > MAX_INTERVAL_SECS {
            return Err(Error::Config(format!(
                "dispatch.send_interval_secs must be between 1 and {}",
                MAX_INTERVAL_SECS
            )));
        }
        if self.snapshot_limit == 0 {
            return Err(Error::Config(
                "dispatch.snapshot_limit must be greater than 0".to_string(),
            ));
        }
        if self.storage_key.is_empty() || self.user_id_key.is_empty() {
            return Err(Error::Config(
                "dispatch.storage_key and dispatch.user_id_key must not be empty".to_string(),
            ));
        }
        if self.storage_key == self.user_id_key {
            return Err(Error::Config(
                "dispatch.storage_key and dispatch.user_id_key must differ".to_string(),
            ));
        }
        Ok(())
    }
}

fn default_batch_size() -> usize {
    10
}

fn default_send_interval() -> u64 {
    30
}

fn default_snapshot_limit() -> usize {
    100
}

fn default_storage_key() -> String {
    "portfolio_analytics".to_string()
}

fn default_user_id_key() -> String {
    "portfolio_user_id".to_string()
}

/// Supported sink kinds
#[derive(Debug, Deserialize, Clone, Copy, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum SinkKind {
    /// Append batches to a bounded log in the key-value store
    #[default]
    Local,
    /// POST batches to an analytics server
    Http,
}

/// Sink configuration
#[derive(Debug, Deserialize, Clone)]
pub struct SinkConfig {
    #[serde(default)]
    pub kind: SinkKind,

    /// Analytics server URL (e.g., `https://analytics.example.com`)
    pub server_url: Option<String>,

    /// Path batches are POSTed to, joined onto `server_url`
    #[serde(default = "default_events_path")]
    pub events_path: String,

    /// Bearer token sent with every batch
    pub api_key: Option<String>,

    /// HTTP request timeout in seconds
    #[serde(default = "default_sink_timeout")]
    pub timeout_secs: u64,

    /// Retry attempts for transient HTTP failures
    #[serde(default)]
    pub max_retries: usize,

    /// Store key for the local batch log
    #[serde(default = "default_log_key")]
    pub log_key: String,

    /// Batches kept in the local log
    #[serde(default = "default_log_limit")]
    pub log_limit: usize,
}

impl Default for SinkConfig {
    fn default() -> Self {
        Self {
            kind: SinkKind::Local,
            server_url: None,
            events_path: default_events_path(),
            api_key: None,
            timeout_secs: default_sink_timeout(),
            max_retries: 0,
            log_key: default_log_key(),
            log_limit: default_log_limit(),
        }
    }
}

impl SinkConfig {
    /// Validate configuration, returning error message if invalid
    pub fn validate(&self) -> Result<()> {
        match self.kind {
            SinkKind::Http if self.server_url.is_none() => Err(Error::Config(
                "sink.server_url is required when sink.kind = \"http\"".to_string(),
            )),
            SinkKind::Http if !self.events_path.starts_with('/') => Err(Error::Config(
                "sink.events_path must start with '/'".to_string(),
            )),
            SinkKind::Local if self.log_limit == 0 => Err(Error::Config(
                "sink.log_limit must be greater than 0".to_string(),
            )),
            _ => Ok(()),
        }
    }
}

fn default_events_path() -> String {
    "/api/analytics/events".to_string()
}

fn default_sink_timeout() -> u64 {
    10
}

fn default_log_key() -> String {
    "analytics_log".to_string()
}

fn default_log_limit() -> usize {
    50
}

/// Logging configuration
#[derive(Debug, Deserialize, Clone)]
pub struct LoggingConfig {
    /// Log level (trace, debug, info, warn, error)
    #[serde(default = "default_log_level")]
    pub level: String,

    /// Maximum number of log files to keep
    #[serde(default = "default_max_log_files")]
    pub max_files: usize,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            max_files: default_max_log_files(),
        }
    }
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_max_log_files() -> usize {
    5
}

impl Config {
    /// Load configuration from the default path
    pub fn load() -> Result<Self> {
        let config_path = Self::config_path();

        if !config_path.exists() {
            tracing::info!("No config file found at {:?}, using defaults", config_path);
            return Ok(Config::default());
        }

        Self::load_from(&config_path)
    }

    /// Load configuration from a specific path
    pub fn load_from(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| Error::Config(format!("failed to read config file {:?}: {}", path, e)))?;

        let config: Config = toml::from_str(&content)
            .map_err(|e| Error::Config(format!("failed to parse config: {}", e)))?;

        config.validate()?;
        Ok(config)
    }

    /// Validate every section
    pub fn validate(&self) -> Result<()> {
        self.tracking.validate()?;
        self.dispatch.validate()?;
        self.sink.validate()
    }

    /// Returns the default config file path
    ///
    /// `$XDG_CONFIG_HOME/pagetrail/config.toml` (~/.config/pagetrail/config.toml)
    pub fn config_path() -> PathBuf {
        xdg_config_home().join("pagetrail").join("config.toml")
    }

    /// Returns the data directory path (for the key-value store)
    pub fn data_dir() -> PathBuf {
        xdg_data_home().join("pagetrail")
    }

    /// Returns the state directory path (for logs)
    pub fn state_dir() -> PathBuf {
        xdg_state_home().join("pagetrail")
    }

    /// Returns the key-value store file path
    ///
    /// `$XDG_DATA_HOME/pagetrail/store.db` (~/.local/share/pagetrail/store.db)
    pub fn store_path() -> PathBuf {
        Self::data_dir().join("store.db")
    }

    /// Returns today's log file path
    ///
    /// Logs roll daily (UTC), so the file carries a date suffix:
    /// `$XDG_STATE_HOME/pagetrail/pagetrail.log.YYYY-MM-DD`
    pub fn log_path() -> PathBuf {
        Self::log_path_on(Utc::now().date_naive())
    }

    /// Log file written on `date`
    pub fn log_path_on(date: NaiveDate) -> PathBuf {
        Self::state_dir().join(format!("{}.{}", LOG_FILE_PREFIX, date.format("%Y-%m-%d")))
    }
}
