//! Configuration loading for the album downloader
//!
//! Settings live in `config.toml` inside the config directory. A missing file
//! is created with defaults, and a file that no longer parses is backed up and
//! replaced. The `[settings]` table doubles as the settings store for the
//! request interval bounds and the download order.

use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{error, info, warn};

/// Error types for config loading
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("TOML parsing error: {0}")]
    Toml(#[from] toml::de::Error),

    #[error("TOML serialization error: {0}")]
    TomlSer(String),

    #[error("Invalid interval range {min}-{max} ms: need min >= 100 and max - min > 3000")]
    InvalidInterval { min: u64, max: u64 },
}

/// Result type alias for config operations
pub type ConfigResult<T> = Result<T, ConfigError>;

pub const CONFIG_FILE_NAME: &str = "config.toml";

pub const DEFAULT_MIN_INTERVAL_MS: u64 = 1000;
pub const DEFAULT_MAX_INTERVAL_MS: u64 = 3000;

/// Smallest accepted value for either interval bound.
pub const INTERVAL_FLOOR_MS: u64 = 100;

/// The interval spread must be strictly greater than this.
pub const INTERVAL_MIN_SPREAD_MS: u64 = 3000;

/// Checks the interval policy: both bounds at least 100 ms and a spread
/// strictly greater than 3000 ms.
pub fn is_valid_interval_range(min: u64, max: u64) -> bool {
    if min < INTERVAL_FLOOR_MS || max < INTERVAL_FLOOR_MS {
        return false;
    }
    if max <= min {
        return false;
    }
    max - min > INTERVAL_MIN_SPREAD_MS
}

/// Order in which discovered media is downloaded.
///
/// Stored as `"asc"` or `"reverse"`; any other stored value reads as reverse.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum DownloadOrder {
    Ascending,
    #[default]
    Reverse,
}

impl From<String> for DownloadOrder {
    fn from(value: String) -> Self {
        DownloadOrder::from(value.as_str())
    }
}

impl From<&str> for DownloadOrder {
    fn from(value: &str) -> Self {
        match value.trim() {
            "asc" => DownloadOrder::Ascending,
            _ => DownloadOrder::Reverse,
        }
    }
}

impl From<DownloadOrder> for String {
    fn from(order: DownloadOrder) -> Self {
        order.to_string()
    }
}

impl std::fmt::Display for DownloadOrder {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            DownloadOrder::Ascending => write!(f, "asc"),
            DownloadOrder::Reverse => write!(f, "reverse"),
        }
    }
}

/// User-tunable run settings, read once at the start of every run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Settings {
    pub min_interval_ms: u64,
    pub max_interval_ms: u64,
    #[serde(default)]
    pub download_order: DownloadOrder,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            min_interval_ms: DEFAULT_MIN_INTERVAL_MS,
            max_interval_ms: DEFAULT_MAX_INTERVAL_MS,
            download_order: DownloadOrder::Reverse,
        }
    }
}

impl Settings {
    /// Rejects interval bounds outside the policy.
    pub fn validate(&self) -> ConfigResult<()> {
        if is_valid_interval_range(self.min_interval_ms, self.max_interval_ms) {
            Ok(())
        } else {
            Err(ConfigError::InvalidInterval {
                min: self.min_interval_ms,
                max: self.max_interval_ms,
            })
        }
    }

    /// Returns settings that are safe to hand to the engine.
    ///
    /// Bounds are first raised to the 100 ms floor; if the pair still breaks
    /// the policy the default interval is substituted. The order is kept.
    pub fn validated(self) -> Self {
        let min = self.min_interval_ms.max(INTERVAL_FLOOR_MS);
        let max = self.max_interval_ms.max(INTERVAL_FLOOR_MS);
        if is_valid_interval_range(min, max) {
            return Self {
                min_interval_ms: min,
                max_interval_ms: max,
                download_order: self.download_order,
            };
        }

        let is_default = self.min_interval_ms == DEFAULT_MIN_INTERVAL_MS && self.max_interval_ms == DEFAULT_MAX_INTERVAL_MS;
        if !is_default {
            warn!(
                "Interval range {}-{} ms is outside policy, using defaults {}-{} ms",
                self.min_interval_ms, self.max_interval_ms, DEFAULT_MIN_INTERVAL_MS, DEFAULT_MAX_INTERVAL_MS
            );
        }
        Self {
            min_interval_ms: DEFAULT_MIN_INTERVAL_MS,
            max_interval_ms: DEFAULT_MAX_INTERVAL_MS,
            download_order: self.download_order,
        }
    }
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct Paths {
    pub download_directory: String,
    pub log_directory: String,
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct Network {
    pub api_base: String,
    pub user_agent: String,
    /// Raw `Cookie` header of a logged-in session; empty means anonymous.
    pub cookie: String,
    pub request_timeout_secs: u64,
    pub connect_timeout_secs: u64,
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct Pools {
    pub download_concurrency: usize,
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct Retry {
    pub rounds: usize,
    pub backoff_base_ms: u64,
    pub backoff_jitter_ms: u64,
}

impl Default for Retry {
    fn default() -> Self {
        Self {
            rounds: 2,
            backoff_base_ms: 250,
            backoff_jitter_ms: 400,
        }
    }
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct Logging {
    pub log_level: String,
    pub log_format: String,
    pub log_to_file: bool,
}

#[derive(Debug, Serialize, Deserialize, Clone)]
#[serde(default)]
pub struct AppConfig {
    pub paths: Paths,
    pub network: Network,
    pub pools: Pools,
    pub retry: Retry,
    pub settings: Settings,
    pub logging: Logging,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            paths: Paths {
                download_directory: "./downloads".to_string(),
                log_directory: "./logs".to_string(),
            },
            network: Network {
                api_base: "https://weibo.com".to_string(),
                user_agent: format!("weibo_album_downloader/{}", env!("CARGO_PKG_VERSION")),
                cookie: String::new(),
                request_timeout_secs: 45,
                connect_timeout_secs: 15,
            },
            pools: Pools {
                download_concurrency: 4,
            },
            retry: Retry::default(),
            settings: Settings::default(),
            logging: Logging {
                log_level: "info".to_string(),
                log_format: "line".to_string(),
                log_to_file: true,
            },
        }
    }
}

impl Network {
    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }

    pub fn connect_timeout(&self) -> Duration {
        Duration::from_secs(self.connect_timeout_secs)
    }
}

/// Config manager owning `config.toml`
pub struct ConfigManager {
    app_config: Arc<RwLock<AppConfig>>,
    config_dir: PathBuf,
}

impl ConfigManager {
    /// Create a new ConfigManager, writing a default config if none exists.
    pub fn new(config_dir: impl AsRef<Path>) -> ConfigResult<Self> {
        let config_dir = config_dir.as_ref().to_path_buf();

        if !config_dir.exists() {
            info!("Creating config directory: {}", config_dir.display());
            fs::create_dir_all(&config_dir)?;
        }

        let app_config = Self::load_app_config(&config_dir)?;
        let manager = Self {
            app_config: Arc::new(RwLock::new(app_config)),
            config_dir,
        };
        manager.create_default_configs()?;

        Ok(manager)
    }

    fn config_path(&self) -> PathBuf {
        self.config_dir.join(CONFIG_FILE_NAME)
    }

    // Load app config from config.toml
    fn load_app_config(config_dir: &Path) -> ConfigResult<AppConfig> {
        let config_path = config_dir.join(CONFIG_FILE_NAME);

        if !config_path.exists() {
            warn!("Config file not found: {}", config_path.display());
            return Ok(AppConfig::default());
        }

        let content = fs::read_to_string(&config_path)?;
        match toml::from_str(&content) {
            Ok(config) => Ok(config),
            Err(e) => {
                error!("Failed to parse {}: {}", CONFIG_FILE_NAME, e);
                info!("Backing up old config and creating new one with default values");

                if let Err(backup_err) = fs::rename(&config_path, config_path.with_extension("toml.backup")) {
                    warn!("Failed to backup old config: {}", backup_err);
                }

                let default_config = AppConfig::default();
                match toml::to_string_pretty(&default_config) {
                    Ok(toml_string) => {
                        if let Err(write_err) = fs::write(&config_path, toml_string) {
                            error!("Failed to write new config file: {}", write_err);
                        } else {
                            info!("Created new {} with default values", CONFIG_FILE_NAME);
                        }
                    }
                    Err(ser_err) => error!("Failed to serialize default config: {}", ser_err),
                }

                Ok(default_config)
            }
        }
    }

    /// Get a copy of the app config
    pub fn get_app_config(&self) -> AppConfig {
        self.app_config.read().clone()
    }

    /// Save app config to file and update the in-memory copy
    pub fn save_app_config(&self, config: &AppConfig) -> ConfigResult<()> {
        let toml_string = toml::to_string_pretty(config).map_err(|e| ConfigError::TomlSer(e.to_string()))?;
        fs::write(self.config_path(), toml_string)?;

        *self.app_config.write() = config.clone();
        Ok(())
    }

    /// Read the run settings, substituting defaults for invalid intervals.
    pub fn settings(&self) -> Settings {
        self.app_config.read().settings.validated()
    }

    /// Persist run settings. Invalid interval bounds are rejected and nothing
    /// is written.
    pub fn save_settings(&self, settings: &Settings) -> ConfigResult<()> {
        settings.validate()?;

        let mut config = self.get_app_config();
        config.settings = *settings;
        self.save_app_config(&config)?;

        info!(
            "Saved settings: interval {}-{} ms, order {}",
            settings.min_interval_ms, settings.max_interval_ms, settings.download_order
        );
        Ok(())
    }

    /// Create the config file if it doesn't exist
    pub fn create_default_configs(&self) -> ConfigResult<()> {
        let config_path = self.config_path();
        if !config_path.exists() {
            let config = self.get_app_config();
            let toml_string = toml::to_string_pretty(&config).map_err(|e| ConfigError::TomlSer(e.to_string()))?;
            fs::write(&config_path, toml_string)?;
            info!("Wrote default config to {}", config_path.display());
        }

        Ok(())
    }

    pub fn config_dir(&self) -> &Path {
        &self.config_dir
    }
}

/// Helper function to create a ConfigManager instance
pub fn init_config(config_dir: impl AsRef<Path>) -> ConfigResult<Arc<ConfigManager>> {
    ConfigManager::new(config_dir).map(Arc::new)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn test_interval_range_policy() {
        assert!(!is_valid_interval_range(100, 3050));
        assert!(is_valid_interval_range(100, 4000));
        assert!(!is_valid_interval_range(99, 5000));
        assert!(!is_valid_interval_range(5000, 100));
        assert!(!is_valid_interval_range(1000, 4000));
        assert!(is_valid_interval_range(1000, 4001));
    }

    #[test]
    fn test_validated_substitutes_defaults() {
        let settings = Settings {
            min_interval_ms: 2000,
            max_interval_ms: 2500,
            download_order: DownloadOrder::Ascending,
        };
        let validated = settings.validated();
        assert_eq!(validated.min_interval_ms, DEFAULT_MIN_INTERVAL_MS);
        assert_eq!(validated.max_interval_ms, DEFAULT_MAX_INTERVAL_MS);
        assert_eq!(validated.download_order, DownloadOrder::Ascending);
    }

    #[test]
    fn test_validated_raises_floor_before_checking() {
        let settings = Settings {
            min_interval_ms: 20,
            max_interval_ms: 5000,
            download_order: DownloadOrder::Reverse,
        };
        let validated = settings.validated();
        assert_eq!(validated.min_interval_ms, 100);
        assert_eq!(validated.max_interval_ms, 5000);
    }

    #[test]
    fn test_download_order_parsing() {
        assert_eq!(DownloadOrder::from("asc"), DownloadOrder::Ascending);
        assert_eq!(DownloadOrder::from("reverse"), DownloadOrder::Reverse);
        assert_eq!(DownloadOrder::from("sideways"), DownloadOrder::Reverse);
        assert_eq!(String::from(DownloadOrder::Ascending), "asc");
    }

    #[test]
    fn test_default_config_is_written() {
        let dir = tempdir().unwrap();
        let manager = ConfigManager::new(dir.path()).unwrap();

        assert!(dir.path().join(CONFIG_FILE_NAME).exists());
        assert_eq!(manager.get_app_config().pools.download_concurrency, 4);
        assert_eq!(manager.settings().download_order, DownloadOrder::Reverse);
    }

    #[test]
    fn test_save_settings_round_trips_through_file() {
        let dir = tempdir().unwrap();
        let manager = ConfigManager::new(dir.path()).unwrap();
        let settings = Settings {
            min_interval_ms: 500,
            max_interval_ms: 4000,
            download_order: DownloadOrder::Ascending,
        };
        manager.save_settings(&settings).unwrap();

        let reloaded = ConfigManager::new(dir.path()).unwrap();
        assert_eq!(reloaded.settings(), settings);
    }

    #[test]
    fn test_save_settings_rejects_invalid_interval() {
        let dir = tempdir().unwrap();
        let manager = ConfigManager::new(dir.path()).unwrap();
        let settings = Settings {
            min_interval_ms: 100,
            max_interval_ms: 3050,
            download_order: DownloadOrder::Ascending,
        };

        let err = manager.save_settings(&settings).unwrap_err();
        assert!(matches!(err, ConfigError::InvalidInterval { min: 100, max: 3050 }));
        assert_eq!(manager.settings(), Settings::default().validated());
    }

    #[test]
    fn test_corrupted_config_is_backed_up() {
        let dir = tempdir().unwrap();
        fs::write(dir.path().join(CONFIG_FILE_NAME), "this is [not toml").unwrap();

        let manager = ConfigManager::new(dir.path()).unwrap();
        assert!(dir.path().join("config.toml.backup").exists());
        assert_eq!(manager.get_app_config().retry.rounds, 2);
    }
}
