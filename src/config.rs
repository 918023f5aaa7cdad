//! Configuration loading with Figment.
//!
//! Configuration is layered from:
//! 1. `config/stdf.toml` (or any file given to [`AppConfig::load_from`])
//! 2. Environment variables prefixed with `STDF_`, nested keys split on `__`
//!
//! Every key has a default, so an absent file yields a usable configuration.
//!
//! # Example
//! ```no_run
//! use stdf_analytics::config::AppConfig;
//!
//! let config = AppConfig::load()?;
//! println!("Data directory: {}", config.data.data_dir.display());
//! # Ok::<(), stdf_analytics::error::StdfError>(())
//! ```

use crate::error::{AppResult, StdfError};
use figment::{
    providers::{Env, Format, Serialized, Toml},
    Figment,
};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Default configuration file location, relative to the working directory.
pub const DEFAULT_CONFIG_PATH: &str = "config/stdf.toml";

/// Top-level configuration
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AppConfig {
    /// Name and log level
    #[serde(default)]
    pub application: ApplicationConfig,
    /// Input file location
    #[serde(default)]
    pub data: DataConfig,
    /// Persistent cache location
    #[serde(default)]
    pub cache: CacheConfig,
    /// Paging and summary limits
    #[serde(default)]
    pub analytics: AnalyticsConfig,
}

/// Application-level settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ApplicationConfig {
    /// Service name, used in log output
    #[serde(default = "default_name")]
    pub name: String,
    /// Logging level (trace, debug, info, warn, error)
    #[serde(default = "default_log_level")]
    pub log_level: String,
}

/// Where input files live
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DataConfig {
    /// Directory scanned for input files
    #[serde(default = "default_data_dir")]
    pub data_dir: PathBuf,
    /// Accepted file extensions, compared case-insensitively, without the dot
    #[serde(default = "default_extensions")]
    pub extensions: Vec<String>,
}

/// Persistent cache location
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CacheConfig {
    /// SQLite file, created on first open
    #[serde(default = "default_database_path")]
    pub database_path: PathBuf,
}

/// Analytics tuning
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AnalyticsConfig {
    /// Page size when a query gives none
    #[serde(default = "default_page_size")]
    pub default_page_size: usize,
    /// Largest accepted page size
    #[serde(default = "default_max_page_size")]
    pub max_page_size: usize,
    /// Failing test names kept per hard bin in the summary
    #[serde(default = "default_top_failed_tests")]
    pub top_failed_tests: usize,
}

fn default_name() -> String {
    "STDF Analytics".to_string()
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_data_dir() -> PathBuf {
    PathBuf::from("data")
}

fn default_extensions() -> Vec<String> {
    vec!["stdf".to_string(), "std".to_string()]
}

fn default_database_path() -> PathBuf {
    PathBuf::from("stdf_cache.db")
}

fn default_page_size() -> usize {
    100
}

fn default_max_page_size() -> usize {
    5000
}

fn default_top_failed_tests() -> usize {
    10
}

impl Default for ApplicationConfig {
    fn default() -> Self {
        Self {
            name: default_name(),
            log_level: default_log_level(),
        }
    }
}

impl Default for DataConfig {
    fn default() -> Self {
        Self {
            data_dir: default_data_dir(),
            extensions: default_extensions(),
        }
    }
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            database_path: default_database_path(),
        }
    }
}

impl Default for AnalyticsConfig {
    fn default() -> Self {
        Self {
            default_page_size: default_page_size(),
            max_page_size: default_max_page_size(),
            top_failed_tests: default_top_failed_tests(),
        }
    }
}

impl AppConfig {
    /// Load configuration from `config/stdf.toml` and environment variables
    ///
    /// Example override: `STDF_APPLICATION__LOG_LEVEL=debug`
    pub fn load() -> AppResult<Self> {
        Self::load_from(DEFAULT_CONFIG_PATH)
    }

    /// Load configuration from a specific file path, then validate it
    pub fn load_from<P: AsRef<Path>>(path: P) -> AppResult<Self> {
        let config: Self = Self::figment(path.as_ref()).extract()?;
        config.validate()?;
        Ok(config)
    }

    fn figment(path: &Path) -> Figment {
        Figment::from(Serialized::defaults(AppConfig::default()))
            .merge(Toml::file(path))
            .merge(Env::prefixed("STDF_").split("__"))
    }

    /// Validate configuration after loading
    pub fn validate(&self) -> AppResult<()> {
        let valid_levels = ["trace", "debug", "info", "warn", "error"];
        if !valid_levels.contains(&self.application.log_level.to_lowercase().as_str()) {
            return Err(StdfError::Configuration(format!(
                "Invalid log_level '{}'. Must be one of: {}",
                self.application.log_level,
                valid_levels.join(", ")
            )));
        }

        if self.data.extensions.is_empty() {
            return Err(StdfError::Configuration(
                "data.extensions must list at least one extension".into(),
            ));
        }

        let analytics = &self.analytics;
        if analytics.max_page_size == 0 {
            return Err(StdfError::Configuration(
                "analytics.max_page_size must be greater than 0".into(),
            ));
        }
        if analytics.default_page_size == 0 || analytics.default_page_size > analytics.max_page_size
        {
            return Err(StdfError::Configuration(format!(
                "analytics.default_page_size {} must be between 1 and max_page_size {}",
                analytics.default_page_size, analytics.max_page_size
            )));
        }
        if analytics.top_failed_tests == 0 {
            return Err(StdfError::Configuration(
                "analytics.top_failed_tests must be greater than 0".into(),
            ));
        }

        Ok(())
    }

    /// True when `path` carries one of the configured extensions.
    pub fn accepts_extension(&self, path: &Path) -> bool {
        path.extension()
            .and_then(|ext| ext.to_str())
            .is_some_and(|ext| {
                self.data
                    .extensions
                    .iter()
                    .any(|allowed| allowed.eq_ignore_ascii_case(ext))
            })
    }
}
