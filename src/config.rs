use crate::core::{DbxError, Result};
use serde::Deserialize;
use std::fs;
use std::path::Path;

/// Top-level configuration structure parsed from a TOML file.
#[derive(Debug, Deserialize)]
pub struct Config {
    pub database: DatabaseConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
}

/// Connection settings.
#[derive(Debug, Clone, Deserialize)]
pub struct DatabaseConfig {
    /// Driver name, e.g. "sqlite3"
    #[serde(default = "default_driver")]
    pub driver: String,
    /// Connection string; a file path for SQLite
    pub dsn: String,
    /// Logical database name (ignored by SQLite)
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub read_only: bool,
}

/// Logging configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct LoggingConfig {
    /// Maximum level: trace, debug, info, warn or error
    #[serde(default = "default_level")]
    pub level: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        LoggingConfig {
            level: default_level(),
        }
    }
}

fn default_driver() -> String {
    "sqlite3".to_string()
}

fn default_level() -> String {
    "info".to_string()
}

impl Config {
    /// Parses configuration from TOML text.
    pub fn from_toml(content: &str) -> Result<Self> {
        toml::from_str(content).map_err(|e| DbxError::Config(e.to_string()))
    }

    /// A configuration for `dsn` with every other setting at its default.
    pub fn for_dsn(dsn: &str) -> Self {
        Config {
            database: DatabaseConfig {
                driver: default_driver(),
                dsn: dsn.to_string(),
                name: String::new(),
                read_only: false,
            },
            logging: LoggingConfig::default(),
        }
    }
}

impl LoggingConfig {
    pub fn max_level(&self) -> Result<tracing::Level> {
        self.level
            .parse()
            .map_err(|_| DbxError::Config(format!("Invalid log level '{}'", self.level)))
    }
}

/// Loads configuration from a TOML file at the given path.
///
/// # Arguments
///
/// * `path` - The file path to the TOML configuration file.
///
/// # Example
///
/// ```no_run
/// let config = dbx::config::load_config("dbx.toml").expect("Failed to load config");
/// println!("{:?}", config);
/// ```
pub fn load_config<P: AsRef<Path>>(path: P) -> Result<Config> {
    let path = path.as_ref();
    let content = fs::read_to_string(path)
        .map_err(|e| DbxError::Config(format!("Failed to read {}: {}", path.display(), e)))?;
    Config::from_toml(&content)
}
