//! Builds a [`KeystoneConfig`](crate::KeystoneConfig) from stacked sources.
//!
//! Later layers override earlier ones:
//! 1. Default values (built into the code)
//! 2. Configuration file (TOML or JSON)
//! 3. Environment variables (`PREFIX__SECTION__KEY`)

use std::collections::HashMap;
use std::env;
use std::fs;
use std::path::{Path, PathBuf};
use std::str::FromStr;

use crate::{ConfigError, KeystoneConfig, LogFormat};

/// Default environment variable prefix.
pub const DEFAULT_ENV_PREFIX: &str = "APP";

/// Environment variable naming the directory that holds `config.toml`.
pub const CONFIG_PATH_ENV: &str = "CONFIG_PATH";

/// File name looked up inside `CONFIG_PATH`.
pub const CONFIG_FILE_NAME: &str = "config.toml";

/// Stacks presets, files and environment overrides, then validates.
///
/// # Example
///
/// ```no_run
/// use keystone_config::ConfigLoader;
///
/// # fn main() -> Result<(), keystone_config::ConfigError> {
/// let config = ConfigLoader::new()
///     .with_dotenv()?
///     .with_config_path_env()?
///     .with_env_prefix("APP")
///     .load()?;
/// # Ok(())
/// # }
/// ```
#[derive(Debug)]
pub struct ConfigLoader {
    config: KeystoneConfig,
    env_prefix: Option<String>,
}

impl Default for ConfigLoader {
    fn default() -> Self {
        Self::new()
    }
}

impl ConfigLoader {
    /// Create a new configuration loader seeded with defaults.
    #[must_use]
    pub fn new() -> Self {
        Self {
            config: KeystoneConfig::default(),
            env_prefix: None,
        }
    }

    /// Reset to default configuration values.
    #[must_use]
    pub fn with_defaults(mut self) -> Self {
        self.config = KeystoneConfig::default();
        self
    }

    /// Start with the development preset.
    ///
    /// ```
    /// use keystone_config::{ConfigLoader, LogFormat};
    ///
    /// let config = ConfigLoader::new().with_development().load().unwrap();
    /// assert_eq!(config.logging.format, LogFormat::Pretty);
    /// ```
    #[must_use]
    pub fn with_development(mut self) -> Self {
        self.config = KeystoneConfig::development();
        self
    }

    /// Start with the production preset.
    #[must_use]
    pub fn with_production(mut self) -> Self {
        self.config = KeystoneConfig::production();
        self
    }

    /// Load configuration from a file. The format follows the extension.
    ///
    /// # Errors
    ///
    /// Returns `ConfigError` if the file is missing, unreadable, malformed or
    /// contains unknown fields.
    pub fn with_file<P: AsRef<Path>>(mut self, path: P) -> Result<Self, ConfigError> {
        let path = path.as_ref();

        if !path.exists() {
            return Err(ConfigError::Missing {
                path: path.to_path_buf(),
            });
        }

        let content = fs::read_to_string(path).map_err(|source| ConfigError::Unreadable {
            path: path.to_path_buf(),
            source,
        })?;
        self.config = Self::parse_file(&content, path)?;
        Ok(self)
    }

    /// Load configuration from a file if it exists.
    ///
    /// # Errors
    ///
    /// Returns `ConfigError` if the file exists but cannot be loaded.
    pub fn with_optional_file<P: AsRef<Path>>(self, path: P) -> Result<Self, ConfigError> {
        if path.as_ref().exists() {
            self.with_file(path)
        } else {
            Ok(self)
        }
    }

    /// Load `config.toml` from the directory named by `CONFIG_PATH`
    /// (default `./`). A missing file is not an error.
    ///
    /// # Errors
    ///
    /// Returns `ConfigError` if the file exists but cannot be loaded.
    pub fn with_config_path_env(self) -> Result<Self, ConfigError> {
        let dir = env::var(CONFIG_PATH_ENV).unwrap_or_else(|_| "./".to_string());
        self.with_optional_file(config_file_in(&dir))
    }

    /// Load configuration from a string in `"toml"` or `"json"` format.
    ///
    /// # Errors
    ///
    /// Returns `ConfigError` if parsing fails or the format is unknown.
    ///
    /// # Example
    ///
    /// ```
    /// use keystone_config::ConfigLoader;
    ///
    /// let toml = r#"
    ///     [database]
    ///     host = "db.internal"
    /// "#;
    ///
    /// let config = ConfigLoader::new()
    ///     .with_string(toml, "toml")
    ///     .unwrap()
    ///     .load()
    ///     .unwrap();
    ///
    /// assert_eq!(config.database.host, "db.internal");
    /// ```
    pub fn with_string(mut self, content: &str, format: &str) -> Result<Self, ConfigError> {
        self.config = match format.to_lowercase().as_str() {
            "toml" => toml::from_str(content)?,
            "json" => serde_json::from_str(content)?,
            _ => return Err(ConfigError::UnsupportedFormat(format.to_string())),
        };
        Ok(self)
    }

    /// Enable environment overrides of the form `PREFIX__SECTION__KEY`,
    /// e.g. `APP__DATABASE__HOST=db`.
    #[must_use]
    pub fn with_env_prefix(mut self, prefix: &str) -> Self {
        self.env_prefix = Some(prefix.to_uppercase());
        self
    }

    /// Load a `.env` file into the process environment if present.
    ///
    /// # Errors
    ///
    /// Returns `ConfigError` if a `.env` file exists but is malformed.
    pub fn with_dotenv(self) -> Result<Self, ConfigError> {
        match dotenvy::dotenv() {
            Ok(_) => Ok(self),
            Err(e) if e.not_found() => Ok(self),
            Err(e) => Err(e.into()),
        }
    }

    /// Apply environment overrides and validate.
    ///
    /// # Errors
    ///
    /// Returns `ConfigError` if an override cannot be parsed or validation
    /// fails.
    pub fn load(mut self) -> Result<KeystoneConfig, ConfigError> {
        if let Some(prefix) = self.env_prefix.take() {
            self.apply_env_overrides(&prefix)?;
        }

        self.config.validate()?;
        Ok(self.config)
    }

    /// Return the configuration without environment overrides or validation.
    #[must_use]
    pub fn load_unvalidated(self) -> KeystoneConfig {
        self.config
    }

    fn parse_file(content: &str, path: &Path) -> Result<KeystoneConfig, ConfigError> {
        let extension = path
            .extension()
            .and_then(|e| e.to_str())
            .map(str::to_lowercase);

        match extension.as_deref() {
            Some("toml") => Ok(toml::from_str(content)?),
            Some("json") => Ok(serde_json::from_str(content)?),
            _ => Err(ConfigError::UnsupportedFormat(path.display().to_string())),
        }
    }

    fn apply_env_overrides(&mut self, prefix: &str) -> Result<(), ConfigError> {
        let env_vars: HashMap<String, String> = env::vars()
            .filter(|(k, _)| k.starts_with(prefix))
            .collect();

        for (key, value) in env_vars {
            self.apply_env_var(&key, &value, prefix)?;
        }

        Ok(())
    }

    fn apply_env_var(&mut self, key: &str, value: &str, prefix: &str) -> Result<(), ConfigError> {
        let Some(rest) = key.strip_prefix(prefix).and_then(|k| k.strip_prefix("__")) else {
            // Shares the prefix but not the separator (e.g. APPLICATION_X).
            return Ok(());
        };

        let parts: Vec<&str> = rest.split("__").collect();
        let config = &mut self.config;

        match parts.as_slice() {
            ["APP", "NAME"] => config.app.name = value.to_string(),
            ["APP", "ENV"] => config.app.env = value.to_string(),
            ["APP", "PORT"] => config.app.port = parse_num(key, value)?,
            ["APP", "VERSION"] => config.app.version = value.to_string(),

            ["SERVER", "SHUTDOWN_TIMEOUT_SECS"] => {
                config.server.shutdown_timeout_secs = parse_num(key, value)?;
            }
            ["SERVER", "REQUEST_TIMEOUT_MS"] => {
                config.server.request_timeout_ms = parse_num(key, value)?;
            }

            ["DATABASE", "URL"] => {
                config.database.url = if value.is_empty() {
                    None
                } else {
                    Some(value.to_string())
                };
            }
            ["DATABASE", "HOST"] => config.database.host = value.to_string(),
            ["DATABASE", "PORT"] => config.database.port = parse_num(key, value)?,
            ["DATABASE", "NAME"] => config.database.name = value.to_string(),
            ["DATABASE", "USER"] => config.database.user = value.to_string(),
            ["DATABASE", "PASSWORD"] => config.database.password = value.to_string(),
            ["DATABASE", "MAX_CONNECTIONS"] => {
                config.database.max_connections = parse_num(key, value)?;
            }
            ["DATABASE", "TIMEOUT_SECS"] => config.database.timeout_secs = parse_num(key, value)?,
            ["DATABASE", "CONNECT_RETRIES"] => {
                config.database.connect_retries = parse_num(key, value)?;
            }

            ["BROKER", "URL"] => config.broker.url = value.to_string(),
            ["BROKER", "REQUEST_TIMEOUT_MS"] => {
                config.broker.request_timeout_ms = parse_num(key, value)?;
            }
            ["BROKER", "CONNECT_RETRIES"] => {
                config.broker.connect_retries = parse_num(key, value)?;
            }

            ["LOGGING", "LEVEL"] => config.logging.level = value.to_string(),
            ["LOGGING", "FORMAT"] => {
                config.logging.format = match value.to_lowercase().as_str() {
                    "json" => LogFormat::Json,
                    "pretty" => LogFormat::Pretty,
                    _ => {
                        return Err(ConfigError::bad_override(key, "expected json or pretty"))
                    }
                };
            }
            ["LOGGING", "SENSITIVE_FIELDS", field] => {
                config
                    .logging
                    .sensitive_fields
                    .insert(field.to_lowercase(), value.to_string());
            }

            // Unknown key
            _ => {}
        }

        Ok(())
    }
}

fn config_file_in(dir: &str) -> PathBuf {
    Path::new(dir).join(CONFIG_FILE_NAME)
}

fn parse_num<T: FromStr>(key: &str, value: &str) -> Result<T, ConfigError> {
    value
        .trim()
        .parse()
        .map_err(|_| ConfigError::bad_override(key, "expected integer"))
}
