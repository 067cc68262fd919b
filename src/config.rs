//! Worker configuration module.
//!
//! Handles loading, validating, and merging `config.toml`. Stock defaults are
//! overridden by the user's file, and FTP credentials can be overridden once
//! more from the environment so secrets stay out of the file.
//!
//! ## Configuration Options
//!
//! ```toml
//! # All options are optional - defaults shown below
//!
//! [remote]
//! host = "localhost"
//! port = 21
//! username = "anonymous"
//! password = ""
//! connect_timeout_secs = 30
//!
//! [log_sink]
//! batch_size = 50           # Entries that trigger an immediate flush
//! flush_interval_secs = 60  # Timer flush period
//! folder = "/logs"          # Remote folder for batched log files
//! error_folder = "/error_logs" # Remote folder for ERROR entries
//! min_level = "info"        # Lowest level forwarded to the remote log
//!
//! [retry]
//! max_retries = 3           # Retries after the first failed run
//! base_delay_secs = 1       # Delay after the first failure; doubles each time
//!
//! [fetch]
//! timeout_secs = 30         # Per-source download timeout
//!
//! [fonts]
//! directory = "/usr/share/fonts"
//!
//! [output]
//! jpeg_quality = 90
//! # staging_dir = "/var/spool/photo-compose/staging"
//!
//! [processing]
//! max_threads = 4           # Max parallel layer workers (omit for auto = CPU cores)
//! ```
//!
//! ## Environment Overrides
//!
//! | Variable | Field |
//! |---|---|
//! | `PHOTO_COMPOSE_FTP_HOST` | `remote.host` |
//! | `PHOTO_COMPOSE_FTP_USERNAME` | `remote.username` |
//! | `PHOTO_COMPOSE_FTP_PASSWORD` | `remote.password` |
//!
//! Unknown keys are rejected to catch typos early.

use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("TOML parse error: {0}")]
    Toml(#[from] toml::de::Error),
    #[error("Config validation error: {0}")]
    Validation(String),
}

pub const ENV_FTP_HOST: &str = "PHOTO_COMPOSE_FTP_HOST";
pub const ENV_FTP_USERNAME: &str = "PHOTO_COMPOSE_FTP_USERNAME";
pub const ENV_FTP_PASSWORD: &str = "PHOTO_COMPOSE_FTP_PASSWORD";

/// Upper bound for `retry.max_retries`.
pub const MAX_RETRIES: u32 = 16;

/// Worker configuration loaded from `config.toml`.
///
/// All fields have defaults. User config files need only specify the values
/// they want to override. Unknown keys are rejected.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct WorkerConfig {
    /// FTP server that receives composed images and log batches.
    pub remote: RemoteConfig,
    /// Batched remote logging.
    pub log_sink: LogSinkConfig,
    /// Job retry policy.
    pub retry: RetryConfig,
    /// Source download settings.
    pub fetch: FetchConfig,
    /// Font resources for text layers.
    pub fonts: FontsConfig,
    /// Encoding and staging of the composed image.
    pub output: OutputConfig,
    /// Parallel processing settings.
    pub processing: ProcessingConfig,
}

impl WorkerConfig {
    /// Validate config values are within acceptable ranges.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.remote.host.trim().is_empty() {
            return Err(ConfigError::Validation("remote.host must not be empty".into()));
        }
        if self.remote.port == 0 {
            return Err(ConfigError::Validation("remote.port must be non-zero".into()));
        }
        if self.log_sink.batch_size == 0 {
            return Err(ConfigError::Validation(
                "log_sink.batch_size must be at least 1".into(),
            ));
        }
        if self.log_sink.flush_interval_secs == 0 {
            return Err(ConfigError::Validation(
                "log_sink.flush_interval_secs must be at least 1".into(),
            ));
        }
        if self.log_sink.min_level.parse::<tracing::Level>().is_err() {
            return Err(ConfigError::Validation(format!(
                "log_sink.min_level '{}' is not a log level",
                self.log_sink.min_level
            )));
        }
        if self.retry.max_retries > MAX_RETRIES {
            return Err(ConfigError::Validation(format!(
                "retry.max_retries must be at most {MAX_RETRIES}"
            )));
        }
        if self.fetch.timeout_secs == 0 {
            return Err(ConfigError::Validation(
                "fetch.timeout_secs must be at least 1".into(),
            ));
        }
        if !(1..=100).contains(&self.output.jpeg_quality) {
            return Err(ConfigError::Validation(
                "output.jpeg_quality must be 1-100".into(),
            ));
        }
        Ok(())
    }

    /// Override credentials from environment-style lookups.
    ///
    /// Takes the lookup as a function so tests need not touch the process
    /// environment.
    pub fn apply_env_overrides(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        if let Some(host) = lookup(ENV_FTP_HOST) {
            self.remote.host = host;
        }
        if let Some(username) = lookup(ENV_FTP_USERNAME) {
            self.remote.username = username;
        }
        if let Some(password) = lookup(ENV_FTP_PASSWORD) {
            self.remote.password = password;
        }
    }
}

/// FTP connection settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct RemoteConfig {
    pub host: String,
    pub port: u16,
    pub username: String,
    pub password: String,
    pub connect_timeout_secs: u64,
}

impl Default for RemoteConfig {
    fn default() -> Self {
        Self {
            host: "localhost".to_string(),
            port: 21,
            username: "anonymous".to_string(),
            password: String::new(),
            connect_timeout_secs: 30,
        }
    }
}

/// Batched remote logging settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct LogSinkConfig {
    /// Buffered entries that trigger an immediate flush.
    pub batch_size: usize,
    /// Period of the background flush timer.
    pub flush_interval_secs: u64,
    /// Remote folder receiving one file per batch.
    pub folder: String,
    /// Remote folder receiving ERROR entries, batched separately.
    pub error_folder: String,
    /// Lowest level forwarded (`trace`, `debug`, `info`, `warn`, `error`).
    pub min_level: String,
}

impl Default for LogSinkConfig {
    fn default() -> Self {
        Self {
            batch_size: 50,
            flush_interval_secs: 60,
            folder: "/logs".to_string(),
            error_folder: "/error_logs".to_string(),
            min_level: "info".to_string(),
        }
    }
}

impl LogSinkConfig {
    pub fn flush_interval(&self) -> Duration {
        Duration::from_secs(self.flush_interval_secs)
    }

    pub fn level(&self) -> tracing::Level {
        self.min_level.parse().unwrap_or(tracing::Level::INFO)
    }
}

/// Job retry settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct RetryConfig {
    /// Retries after the first run; a job runs at most `max_retries + 1` times.
    pub max_retries: u32,
    /// Delay after the first failure; doubles after each further failure.
    pub base_delay_secs: u64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_retries: 3,
            base_delay_secs: 1,
        }
    }
}

/// Source download settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct FetchConfig {
    pub timeout_secs: u64,
}

impl Default for FetchConfig {
    fn default() -> Self {
        Self { timeout_secs: 30 }
    }
}

impl FetchConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

/// Font resource settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct FontsConfig {
    /// Directory holding the family files (`arial.ttf`, `Verdana.ttf`, ...).
    pub directory: PathBuf,
}

impl Default for FontsConfig {
    fn default() -> Self {
        Self {
            directory: PathBuf::from("/usr/share/fonts"),
        }
    }
}

/// Output encoding and staging settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct OutputConfig {
    /// JPEG encoding quality (1 = worst, 100 = best).
    pub jpeg_quality: u32,
    /// Where composed images are staged before upload.
    /// When absent, the system temp directory is used.
    pub staging_dir: Option<PathBuf>,
}

impl Default for OutputConfig {
    fn default() -> Self {
        Self {
            jpeg_quality: 90,
            staging_dir: None,
        }
    }
}

impl OutputConfig {
    pub fn staging_dir(&self) -> PathBuf {
        self.staging_dir.clone().unwrap_or_else(std::env::temp_dir)
    }
}

/// Parallel processing settings.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ProcessingConfig {
    /// Maximum number of parallel layer workers.
    /// When absent or null, defaults to the number of CPU cores.
    /// Values larger than the core count are clamped down.
    pub max_threads: Option<usize>,
}

/// Resolve the effective thread count from config.
///
/// - `None` → use all available cores
/// - `Some(n)` → use `min(n, cores)` (user can constrain down, not up)
pub fn effective_threads(config: &ProcessingConfig) -> usize {
    let cores = std::thread::available_parallelism()
        .map(|n| n.get())
        .unwrap_or(1);
    config
        .max_threads
        .map(|n| n.clamp(1, cores))
        .unwrap_or(cores)
}

// =============================================================================
// Config loading, merging, and validation
// =============================================================================

/// Returns the stock default config as a `toml::Value::Table`.
///
/// This is the canonical representation of all default values, used as the
/// base layer for merging user overrides on top.
pub fn stock_defaults_value() -> toml::Value {
    toml::Value::try_from(WorkerConfig::default()).expect("default config must serialize")
}

/// Recursively merge `overlay` on top of `base`.
///
/// - Tables are merged key-by-key (overlay keys override base keys).
/// - Non-table values in overlay replace base values entirely.
/// - Keys in base that are not in overlay are preserved.
pub fn merge_toml(base: toml::Value, overlay: toml::Value) -> toml::Value {
    match (base, overlay) {
        (toml::Value::Table(mut base_table), toml::Value::Table(overlay_table)) => {
            for (key, overlay_val) in overlay_table {
                let merged = match base_table.remove(&key) {
                    Some(base_val) => merge_toml(base_val, overlay_val),
                    None => overlay_val,
                };
                base_table.insert(key, merged);
            }
            toml::Value::Table(base_table)
        }
        (_, overlay) => overlay,
    }
}

/// Load a config file as a raw TOML value.
///
/// Returns `Ok(None)` if the file does not exist.
/// Returns `Err` if the file exists but contains invalid TOML.
pub fn load_raw_config(path: &Path) -> Result<Option<toml::Value>, ConfigError> {
    if !path.exists() {
        return Ok(None);
    }
    let content = fs::read_to_string(path)?;
    let value: toml::Value = toml::from_str(&content)?;
    Ok(Some(value))
}

/// Merge an optional overlay onto the stock defaults, then deserialize.
pub fn resolve_config(overlay: Option<toml::Value>) -> Result<WorkerConfig, ConfigError> {
    let base = stock_defaults_value();
    let merged = match overlay {
        Some(ov) => merge_toml(base, ov),
        None => base,
    };
    let config: WorkerConfig = merged.try_into()?;
    Ok(config)
}

/// Load config from `path`, apply environment overrides, and validate.
///
/// A missing file yields the stock defaults.
pub fn load_config(path: &Path) -> Result<WorkerConfig, ConfigError> {
    let mut config = resolve_config(load_raw_config(path)?)?;
    config.apply_env_overrides(|key| std::env::var(key).ok());
    config.validate()?;
    Ok(config)
}

/// Returns a fully-commented stock `config.toml` with all keys and explanations.
///
/// Used by the `gen-config` CLI command.
pub fn stock_config_toml() -> &'static str {
    r##"# photo-compose worker configuration
# ==================================
# All settings are optional. Remove or comment out any you don't need.
# Values shown below are the defaults.
#
# Unknown keys will cause an error.
#
# FTP credentials may also come from the environment, which wins over this
# file: PHOTO_COMPOSE_FTP_HOST, PHOTO_COMPOSE_FTP_USERNAME,
# PHOTO_COMPOSE_FTP_PASSWORD.

# ---------------------------------------------------------------------------
# Remote store (FTP)
# ---------------------------------------------------------------------------
[remote]
host = "localhost"
port = 21
username = "anonymous"
password = ""
connect_timeout_secs = 30

# ---------------------------------------------------------------------------
# Batched remote log
# ---------------------------------------------------------------------------
[log_sink]
# Buffered entries that trigger an immediate flush.
batch_size = 50

# Seconds between timer flushes of whatever is buffered.
flush_interval_secs = 60

# Remote folder receiving one newline-delimited JSON file per batch.
folder = "/logs"

# Remote folder receiving ERROR entries, batched apart from the rest.
error_folder = "/error_logs"

# Lowest level forwarded: trace, debug, info, warn, error.
min_level = "info"

# ---------------------------------------------------------------------------
# Retry
# ---------------------------------------------------------------------------
[retry]
# Retries after the first failed run (delays 1s, 2s, 4s with the defaults).
max_retries = 3

# Delay after the first failure in seconds; doubles after each failure.
base_delay_secs = 1

# ---------------------------------------------------------------------------
# Source download
# ---------------------------------------------------------------------------
[fetch]
timeout_secs = 30

# ---------------------------------------------------------------------------
# Fonts
# ---------------------------------------------------------------------------
[fonts]
# Directory holding arial.ttf, AvenirNextCyr-Regular.ttf, Helvetica.ttf,
# Roboto-Medium.ttf, TimesNewRoman.ttf and Verdana.ttf.
directory = "/usr/share/fonts"

# ---------------------------------------------------------------------------
# Output
# ---------------------------------------------------------------------------
[output]
# JPEG encoding quality (1 = worst, 100 = best).
jpeg_quality = 90

# Local directory for staged files before upload.
# Omit to use the system temp directory.
# staging_dir = "/var/spool/photo-compose/staging"

# ---------------------------------------------------------------------------
# Processing
# ---------------------------------------------------------------------------
[processing]
# Maximum parallel layer workers.
# Omit or comment out to auto-detect (= number of CPU cores).
# max_threads = 4
"##
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use tempfile::TempDir;

    #[test]
    fn default_config_values() {
        let config = WorkerConfig::default();
        assert_eq!(config.remote.port, 21);
        assert_eq!(config.log_sink.batch_size, 50);
        assert_eq!(config.log_sink.flush_interval_secs, 60);
        assert_eq!(config.log_sink.folder, "/logs");
        assert_eq!(config.log_sink.error_folder, "/error_logs");
        assert_eq!(config.retry.max_retries, 3);
        assert_eq!(config.fonts.directory, PathBuf::from("/usr/share/fonts"));
        assert_eq!(config.output.jpeg_quality, 90);
    }

    #[test]
    fn default_config_is_valid() {
        assert!(WorkerConfig::default().validate().is_ok());
    }

    #[test]
    fn parse_partial_config() {
        let toml = r##"
[log_sink]
batch_size = 10
"##;
        let config: WorkerConfig = toml::from_str(toml).unwrap();
        assert_eq!(config.log_sink.batch_size, 10);
        // Default values preserved
        assert_eq!(config.log_sink.flush_interval_secs, 60);
        assert_eq!(config.remote.host, "localhost");
    }

    #[test]
    fn unknown_keys_rejected() {
        let toml = r##"
[remote]
hostname = "ftp.example.com"
"##;
        assert!(toml::from_str::<WorkerConfig>(toml).is_err());
    }

    #[test]
    fn merge_overrides_nested_keys_only() {
        let overlay: toml::Value = toml::from_str("[remote]\nport = 2121\n").unwrap();
        let merged = merge_toml(stock_defaults_value(), overlay);
        let config: WorkerConfig = merged.try_into().unwrap();
        assert_eq!(config.remote.port, 2121);
        assert_eq!(config.remote.host, "localhost");
    }

    #[test]
    fn validate_rejects_bad_values() {
        let mut config = WorkerConfig::default();
        config.retry.max_retries = MAX_RETRIES + 1;
        assert!(matches!(config.validate(), Err(ConfigError::Validation(_))));

        let mut config = WorkerConfig::default();
        config.log_sink.min_level = "loud".into();
        assert!(config.validate().is_err());

        let mut config = WorkerConfig::default();
        config.output.jpeg_quality = 0;
        assert!(config.validate().is_err());

        let mut config = WorkerConfig::default();
        config.log_sink.batch_size = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn env_overrides_credentials() {
        let env: HashMap<&str, &str> = [
            (ENV_FTP_HOST, "ftp.example.com"),
            (ENV_FTP_PASSWORD, "s3cret"),
        ]
        .into_iter()
        .collect();
        let mut config = WorkerConfig::default();
        config.apply_env_overrides(|k| env.get(k).map(|v| v.to_string()));
        assert_eq!(config.remote.host, "ftp.example.com");
        assert_eq!(config.remote.password, "s3cret");
        assert_eq!(config.remote.username, "anonymous");
    }

    #[test]
    fn log_level_parses() {
        let mut sink = LogSinkConfig::default();
        assert_eq!(sink.level(), tracing::Level::INFO);
        sink.min_level = "warn".into();
        assert_eq!(sink.level(), tracing::Level::WARN);
    }

    // =========================================================================
    // load_config tests
    // =========================================================================

    #[test]
    fn load_config_returns_default_when_no_file() {
        let tmp = TempDir::new().unwrap();
        let config = resolve_config(load_raw_config(&tmp.path().join("config.toml")).unwrap())
            .unwrap();
        assert_eq!(config.remote.port, 21);
    }

    #[test]
    fn load_config_reads_file() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("config.toml");
        fs::write(
            &path,
            r##"
[remote]
port = 990

[retry]
base_delay_secs = 2
"##,
        )
        .unwrap();

        let config = load_config(&path).unwrap();
        assert_eq!(config.remote.port, 990);
        assert_eq!(config.retry.base_delay_secs, 2);
        assert_eq!(config.retry.max_retries, 3);
    }

    #[test]
    fn load_config_invalid_toml_is_error() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("config.toml");
        fs::write(&path, "this is not valid toml [[[").unwrap();
        assert!(matches!(load_config(&path), Err(ConfigError::Toml(_))));
    }

    #[test]
    fn load_config_validates() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("config.toml");
        fs::write(&path, "[output]\njpeg_quality = 101\n").unwrap();
        assert!(matches!(load_config(&path), Err(ConfigError::Validation(_))));
    }

    // =========================================================================
    // stock_config_toml tests
    // =========================================================================

    #[test]
    fn stock_config_toml_is_valid_toml() {
        let content = stock_config_toml();
        let _: toml::Value = toml::from_str(content).expect("stock config must be valid TOML");
    }

    #[test]
    fn stock_config_toml_roundtrips_to_defaults() {
        let config: WorkerConfig = toml::from_str(stock_config_toml()).unwrap();
        let defaults = WorkerConfig::default();
        assert_eq!(config.remote.host, defaults.remote.host);
        assert_eq!(config.log_sink.batch_size, defaults.log_sink.batch_size);
        assert_eq!(config.log_sink.folder, defaults.log_sink.folder);
        assert_eq!(config.log_sink.error_folder, defaults.log_sink.error_folder);
        assert_eq!(config.retry.max_retries, defaults.retry.max_retries);
        assert_eq!(config.fonts.directory, defaults.fonts.directory);
        assert_eq!(config.output.jpeg_quality, defaults.output.jpeg_quality);
        assert_eq!(config.processing.max_threads, None);
    }

    #[test]
    fn effective_threads_clamps_to_cores() {
        let cores = std::thread::available_parallelism()
            .map(|n| n.get())
            .unwrap_or(1);
        let config = ProcessingConfig {
            max_threads: Some(99_999),
        };
        assert_eq!(effective_threads(&config), cores);
        assert_eq!(effective_threads(&ProcessingConfig::default()), cores);
        let one = ProcessingConfig {
            max_threads: Some(1),
        };
        assert_eq!(effective_threads(&one), 1);
    }
}
