//! Root configuration type.

use serde::{Deserialize, Serialize};

use crate::{
    AppConfig, BrokerConfig, ConfigError, DatabaseConfig, LogFormat, LoggingConfig, ServerConfig,
};

/// Environment name that enables production behavior.
pub const PRODUCTION_ENV: &str = "production";

/// Complete service configuration.
///
/// Every section is optional in files; missing sections take their defaults.
///
/// # Example
///
/// ```
/// use keystone_config::KeystoneConfig;
///
/// let config = KeystoneConfig::default();
/// assert!(!config.is_prod_env());
/// assert_eq!(config.broker.request_timeout_ms, 2000);
/// ```
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(deny_unknown_fields)]
pub struct KeystoneConfig {
    /// Application identity.
    #[serde(default)]
    pub app: AppConfig,

    /// Platform lifecycle settings.
    #[serde(default)]
    pub server: ServerConfig,

    /// Relational database.
    #[serde(default)]
    pub database: DatabaseConfig,

    /// Message broker.
    #[serde(default)]
    pub broker: BrokerConfig,

    /// Logging.
    #[serde(default)]
    pub logging: LoggingConfig,
}

impl KeystoneConfig {
    /// Preset for local development: pretty debug logs.
    #[must_use]
    pub fn development() -> Self {
        Self {
            logging: LoggingConfig {
                level: "debug".to_string(),
                format: LogFormat::Pretty,
                ..Default::default()
            },
            ..Default::default()
        }
    }

    /// Preset for production: JSON info logs, `app.env = "production"`.
    #[must_use]
    pub fn production() -> Self {
        Self {
            app: AppConfig {
                env: PRODUCTION_ENV.to_string(),
                ..Default::default()
            },
            logging: LoggingConfig {
                level: "info".to_string(),
                format: LogFormat::Json,
                ..Default::default()
            },
            ..Default::default()
        }
    }

    /// Returns `true` when `app.env` is `production`.
    #[must_use]
    pub fn is_prod_env(&self) -> bool {
        self.app.env == PRODUCTION_ENV
    }

    /// Validate the configuration.
    ///
    /// # Errors
    ///
    /// Returns `ConfigError::Invalid` if:
    /// - `app.name` is empty
    /// - `database.max_connections` is zero
    /// - `database.url` is set but empty
    /// - `broker.request_timeout_ms` is zero
    /// - `server.shutdown_timeout_secs` is zero
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.app.name.trim().is_empty() {
            return Err(ConfigError::invalid("app.name", "must not be empty"));
        }

        if self.database.max_connections == 0 {
            return Err(ConfigError::invalid(
                "database.max_connections",
                "must be at least 1",
            ));
        }

        if matches!(&self.database.url, Some(url) if url.trim().is_empty()) {
            return Err(ConfigError::invalid(
                "database.url",
                "must not be empty when set",
            ));
        }

        if self.broker.request_timeout_ms == 0 {
            return Err(ConfigError::invalid(
                "broker.request_timeout_ms",
                "must be greater than zero",
            ));
        }

        if self.server.shutdown_timeout_secs == 0 {
            return Err(ConfigError::invalid(
                "server.shutdown_timeout_secs",
                "must be greater than zero",
            ));
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_is_valid() {
        assert!(KeystoneConfig::default().validate().is_ok());
        assert!(KeystoneConfig::development().validate().is_ok());
        assert!(KeystoneConfig::production().validate().is_ok());
    }

    #[test]
    fn test_is_prod_env() {
        assert!(KeystoneConfig::production().is_prod_env());
        assert!(!KeystoneConfig::development().is_prod_env());

        let mut config = KeystoneConfig::default();
        config.app.env = "Production".to_string();
        assert!(!config.is_prod_env());
    }

    #[test]
    fn test_validate_rejects_zero_pool() {
        let mut config = KeystoneConfig::default();
        config.database.max_connections = 0;
        let err = config.validate().unwrap_err();
        assert!(err.to_string().contains("database.max_connections"));
    }

    #[test]
    fn test_validate_rejects_empty_url() {
        let mut config = KeystoneConfig::default();
        config.database.url = Some(String::new());
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_sections_are_optional() {
        let config: KeystoneConfig = toml::from_str("[app]\nname = \"orders\"\n").unwrap();
        assert_eq!(config.app.name, "orders");
        assert_eq!(config.database, DatabaseConfig::default());
    }
}
