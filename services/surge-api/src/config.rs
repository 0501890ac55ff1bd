//! Configuration management for the Surge API server.
//!
//! Precedence: environment variables override the TOML file, which overrides
//! the built-in defaults.

use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Top-level configuration for the server binary.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub server: ServerConfig,

    #[serde(default)]
    pub database: DatabaseConfig,

    #[serde(default)]
    pub logging: LoggingConfig,
}

/// Listening address.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    /// Bind host (default: "0.0.0.0").
    #[serde(default = "default_host")]
    pub host: String,

    /// Listening port (default: 8080).
    #[serde(default = "default_port")]
    pub port: u16,
}

/// SQLite database settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatabaseConfig {
    /// Database file path (default: "./data/surge.db").
    #[serde(default = "default_db_path")]
    pub path: String,

    /// Max connections in the pool (default: 8).
    #[serde(default = "default_max_connections")]
    pub max_connections: u32,
}

/// Logging configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Log level: trace, debug, info, warn, error (default: "info").
    #[serde(default = "default_log_level")]
    pub level: String,

    /// Log format: json or pretty (default: "pretty").
    #[serde(default = "default_log_format")]
    pub format: String,
}

fn default_host() -> String {
    "0.0.0.0".to_string()
}

fn default_port() -> u16 {
    8080
}

fn default_db_path() -> String {
    "./data/surge.db".to_string()
}

fn default_max_connections() -> u32 {
    8
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_log_format() -> String {
    "pretty".to_string()
}

impl Default for Config {
    fn default() -> Self {
        Self {
            server: ServerConfig::default(),
            database: DatabaseConfig::default(),
            logging: LoggingConfig::default(),
        }
    }
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
        }
    }
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            path: default_db_path(),
            max_connections: default_max_connections(),
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            format: default_log_format(),
        }
    }
}

impl Config {
    /// Loads configuration from a TOML file.
    ///
    /// # Errors
    ///
    /// Fails when the file cannot be read or contains invalid TOML.
    pub fn from_file(path: impl Into<PathBuf>) -> Result<Self, ConfigError> {
        let path = path.into();
        let contents = std::fs::read_to_string(&path).map_err(|e| ConfigError::IoError {
            path: path.clone(),
            source: e,
        })?;

        toml::from_str(&contents).map_err(|e| ConfigError::TomlError { path, source: e })
    }

    /// Loads configuration with environment-variable overrides.
    ///
    /// Reads `config.toml` when present, otherwise starts from defaults.
    ///
    /// Supported environment variables: `SURGE_HOST`, `SURGE_PORT`,
    /// `SURGE_DB_PATH`, `SURGE_DB_MAX_CONNECTIONS`, `SURGE_LOG_LEVEL`,
    /// `SURGE_LOG_FORMAT`.
    ///
    /// # Errors
    ///
    /// Fails when `config.toml` exists but cannot be parsed.
    pub fn load() -> Result<Self, ConfigError> {
        let mut config = if std::path::Path::new("config.toml").exists() {
            Self::from_file("config.toml")?
        } else {
            Self::default()
        };

        config.apply_env_overrides();
        Ok(config)
    }

    /// Applies environment-variable overrides to the configuration.
    pub fn apply_env_overrides(&mut self) {
        if let Ok(host) = std::env::var("SURGE_HOST") {
            self.server.host = host;
        }

        if let Ok(port) = std::env::var("SURGE_PORT") {
            if let Ok(port) = port.parse() {
                self.server.port = port;
            }
        }

        if let Ok(path) = std::env::var("SURGE_DB_PATH") {
            self.database.path = path;
        }

        if let Ok(max) = std::env::var("SURGE_DB_MAX_CONNECTIONS") {
            if let Ok(max) = max.parse() {
                self.database.max_connections = max;
            }
        }

        if let Ok(level) = std::env::var("SURGE_LOG_LEVEL") {
            self.logging.level = level;
        }

        if let Ok(format) = std::env::var("SURGE_LOG_FORMAT") {
            self.logging.format = format;
        }
    }

    /// Validates the configuration.
    ///
    /// # Errors
    ///
    /// Returns `ConfigError::ValidationError` for invalid values.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.server.port == 0 {
            return Err(ConfigError::ValidationError(
                "server.port must be non-zero".to_string(),
            ));
        }

        if self.database.path.is_empty() {
            return Err(ConfigError::ValidationError(
                "database.path cannot be empty".to_string(),
            ));
        }

        if self.database.max_connections == 0 {
            return Err(ConfigError::ValidationError(
                "database.max_connections must be > 0".to_string(),
            ));
        }

        let valid_levels = ["trace", "debug", "info", "warn", "error"];
        if !valid_levels.contains(&self.logging.level.as_str()) {
            return Err(ConfigError::ValidationError(format!(
                "logging.level must be one of: {}",
                valid_levels.join(", ")
            )));
        }

        let valid_formats = ["json", "pretty"];
        if !valid_formats.contains(&self.logging.format.as_str()) {
            return Err(ConfigError::ValidationError(format!(
                "logging.format must be one of: {}",
                valid_formats.join(", ")
            )));
        }

        Ok(())
    }

    /// Connection URL for the SQLite pool.
    #[must_use]
    pub fn database_url(&self) -> String {
        format!("sqlite://{}", self.database.path)
    }
}

/// Configuration error types.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// I/O error reading the configuration file.
    #[error("failed to read config file {path:?}: {source}")]
    IoError {
        path: PathBuf,
        source: std::io::Error,
    },

    /// TOML parsing error.
    #[error("failed to parse TOML in {path:?}: {source}")]
    TomlError {
        path: PathBuf,
        source: toml::de::Error,
    },

    /// Validation error.
    #[error("configuration validation failed: {0}")]
    ValidationError(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_is_valid() {
        let config = Config::default();
        assert_eq!(config.server.host, "0.0.0.0");
        assert_eq!(config.server.port, 8080);
        assert_eq!(config.database.path, "./data/surge.db");
        assert!(config.validate().is_ok());
    }

    #[test]
    fn rejects_zero_port_and_empty_db_path() {
        let mut config = Config::default();
        config.server.port = 0;
        assert!(config.validate().is_err());

        config.server.port = 8080;
        config.database.path = String::new();
        assert!(config.validate().is_err());
    }

    #[test]
    fn rejects_unknown_log_settings() {
        let mut config = Config::default();
        config.logging.level = "loud".to_string();
        assert!(config.validate().is_err());

        config.logging.level = "info".to_string();
        config.logging.format = "xml".to_string();
        assert!(config.validate().is_err());
    }

    #[test]
    fn toml_round_trip() {
        let toml_str = r#"
            [server]
            host = "127.0.0.1"
            port = 9090

            [database]
            path = "/tmp/surge-test.db"

            [logging]
            level = "debug"
            format = "json"
        "#;

        let config: Config = toml::from_str(toml_str).unwrap();
        assert_eq!(config.server.host, "127.0.0.1");
        assert_eq!(config.server.port, 9090);
        assert_eq!(config.database.path, "/tmp/surge-test.db");
        assert_eq!(config.logging.level, "debug");
        assert_eq!(config.database.max_connections, 8);
        assert_eq!(config.database_url(), "sqlite:///tmp/surge-test.db");
    }

    #[test]
    fn env_overrides_apply() {
        std::env::set_var("SURGE_PORT", "9999");
        std::env::set_var("SURGE_DB_PATH", "/tmp/override.db");

        let mut config = Config::default();
        config.apply_env_overrides();

        assert_eq!(config.server.port, 9999);
        assert_eq!(config.database.path, "/tmp/override.db");

        std::env::remove_var("SURGE_PORT");
        std::env::remove_var("SURGE_DB_PATH");
    }
}
