//! Sections of the configuration file.

use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Application identity section.
///
/// # Example
///
/// ```
/// use keystone_config::AppConfig;
///
/// let app = AppConfig::default();
/// assert_eq!(app.env, "development");
/// assert_eq!(app.listen_addr(), "0.0.0.0:8080");
/// ```
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(deny_unknown_fields)]
pub struct AppConfig {
    /// Service name, used in logs and health reports.
    #[serde(default = "default_app_name")]
    pub name: String,

    /// Deployment environment (`development`, `staging`, `production`).
    #[serde(default = "default_env")]
    pub env: String,

    /// Listen port for the service's transport.
    #[serde(default = "default_port")]
    pub port: u16,

    /// Service version reported by health checks.
    #[serde(default = "default_version")]
    pub version: String,
}

impl AppConfig {
    /// Returns `0.0.0.0:<port>`.
    #[must_use]
    pub fn listen_addr(&self) -> String {
        format!("0.0.0.0:{}", self.port)
    }
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            name: default_app_name(),
            env: default_env(),
            port: default_port(),
            version: default_version(),
        }
    }
}

fn default_app_name() -> String {
    "keystone-service".to_string()
}

fn default_env() -> String {
    "development".to_string()
}

const fn default_port() -> u16 {
    8080
}

fn default_version() -> String {
    "0.1.0".to_string()
}

/// Platform lifecycle section.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(deny_unknown_fields)]
pub struct ServerConfig {
    /// Upper bound for graceful shutdown, in seconds.
    #[serde(default = "default_shutdown_timeout")]
    pub shutdown_timeout_secs: u64,

    /// Per-request deadline in milliseconds. `0` disables it.
    #[serde(default = "default_request_timeout")]
    pub request_timeout_ms: u64,
}

impl ServerConfig {
    /// Returns the shutdown bound as a duration.
    #[must_use]
    pub const fn shutdown_timeout(&self) -> Duration {
        Duration::from_secs(self.shutdown_timeout_secs)
    }

    /// Returns the request deadline, or `None` when disabled.
    #[must_use]
    pub const fn request_timeout(&self) -> Option<Duration> {
        if self.request_timeout_ms == 0 {
            None
        } else {
            Some(Duration::from_millis(self.request_timeout_ms))
        }
    }
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            shutdown_timeout_secs: default_shutdown_timeout(),
            request_timeout_ms: default_request_timeout(),
        }
    }
}

const fn default_shutdown_timeout() -> u64 {
    30
}

const fn default_request_timeout() -> u64 {
    30_000
}

/// Relational database section.
///
/// Either set `url` directly (`postgres://...` or `sqlite:...`) or set the
/// individual parts, from which a PostgreSQL URL is built.
///
/// # Example
///
/// ```
/// use keystone_config::DatabaseConfig;
///
/// let db = DatabaseConfig {
///     host: "db".to_string(),
///     user: "app".to_string(),
///     password: "secret".to_string(),
///     name: "orders".to_string(),
///     ..Default::default()
/// };
/// assert_eq!(
///     db.dsn(),
///     "host=db port=5432 user=app password=secret dbname=orders sslmode=disable"
/// );
/// assert_eq!(db.url(), "postgres://app:secret@db:5432/orders?sslmode=disable");
/// ```
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(deny_unknown_fields)]
pub struct DatabaseConfig {
    /// Full connection URL. Takes precedence over the individual parts.
    #[serde(default)]
    pub url: Option<String>,

    /// Database host.
    #[serde(default = "default_db_host")]
    pub host: String,

    /// Database port.
    #[serde(default = "default_db_port")]
    pub port: u16,

    /// Database name.
    #[serde(default)]
    pub name: String,

    /// Database user.
    #[serde(default)]
    pub user: String,

    /// Database password.
    #[serde(default)]
    pub password: String,

    /// Maximum pool size.
    #[serde(default = "default_max_connections")]
    pub max_connections: u32,

    /// Connection acquire timeout in seconds.
    #[serde(default = "default_db_timeout")]
    pub timeout_secs: u64,

    /// Connection attempts after the first failure.
    #[serde(default = "default_retries")]
    pub connect_retries: usize,
}

impl DatabaseConfig {
    /// Returns the key/value DSN (`host=.. port=.. user=.. password=.. dbname=.. sslmode=disable`).
    #[must_use]
    pub fn dsn(&self) -> String {
        format!(
            "host={} port={} user={} password={} dbname={} sslmode=disable",
            self.host, self.port, self.user, self.password, self.name
        )
    }

    /// Returns the connection URL: `url` if set, otherwise a PostgreSQL URL.
    #[must_use]
    pub fn url(&self) -> String {
        self.url.clone().unwrap_or_else(|| {
            format!(
                "postgres://{}:{}@{}:{}/{}?sslmode=disable",
                self.user, self.password, self.host, self.port, self.name
            )
        })
    }

    /// Returns the acquire timeout as a duration.
    #[must_use]
    pub const fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            url: None,
            host: default_db_host(),
            port: default_db_port(),
            name: String::new(),
            user: String::new(),
            password: String::new(),
            max_connections: default_max_connections(),
            timeout_secs: default_db_timeout(),
            connect_retries: default_retries(),
        }
    }
}

fn default_db_host() -> String {
    "localhost".to_string()
}

const fn default_db_port() -> u16 {
    5432
}

const fn default_max_connections() -> u32 {
    10
}

const fn default_db_timeout() -> u64 {
    5
}

const fn default_retries() -> usize {
    5
}

/// Message broker section.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(deny_unknown_fields)]
pub struct BrokerConfig {
    /// Broker URL.
    #[serde(default = "default_broker_url")]
    pub url: String,

    /// Request/reply timeout in milliseconds.
    #[serde(default = "default_broker_timeout")]
    pub request_timeout_ms: u64,

    /// Connection attempts after the first failure.
    #[serde(default = "default_retries")]
    pub connect_retries: usize,
}

impl BrokerConfig {
    /// Returns the request/reply timeout as a duration.
    #[must_use]
    pub const fn request_timeout(&self) -> Duration {
        Duration::from_millis(self.request_timeout_ms)
    }
}

impl Default for BrokerConfig {
    fn default() -> Self {
        Self {
            url: default_broker_url(),
            request_timeout_ms: default_broker_timeout(),
            connect_retries: default_retries(),
        }
    }
}

fn default_broker_url() -> String {
    "nats://localhost:4222".to_string()
}

const fn default_broker_timeout() -> u64 {
    2_000
}

/// Log output format.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    /// JSON lines.
    #[default]
    Json,
    /// Human-readable.
    Pretty,
}

/// Logging section.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(deny_unknown_fields)]
pub struct LoggingConfig {
    /// Filter directive (e.g., "info", "keystone_data=debug").
    #[serde(default = "default_log_level")]
    pub level: String,

    /// Output format.
    #[serde(default)]
    pub format: LogFormat,

    /// Field masking rules: field name to `""`, `"MASKALL"` or a regex with
    /// a `MASK` group.
    #[serde(default)]
    pub sensitive_fields: std::collections::BTreeMap<String, String>,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            format: LogFormat::default(),
            sensitive_fields: std::collections::BTreeMap::new(),
        }
    }
}

fn default_log_level() -> String {
    "info".to_string()
}
