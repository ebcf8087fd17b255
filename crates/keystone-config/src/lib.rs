//! # Keystone Config
//!
//! Typed, layered configuration for Keystone services.
//!
//! Configuration is loaded from, in order of increasing precedence:
//!
//! 1. Built-in defaults
//! 2. A TOML or JSON file (by default `$CONFIG_PATH/config.toml`)
//! 3. Environment variables: `APP__SECTION__KEY`
//!
//! ## Example
//!
//! ```
//! use keystone_config::{ConfigLoader, KeystoneConfig};
//!
//! let config: KeystoneConfig = ConfigLoader::new()
//!     .with_string("[app]\nname = \"orders\"", "toml")
//!     .unwrap()
//!     .with_env_prefix("APP")
//!     .load()
//!     .unwrap();
//!
//! assert_eq!(config.app.name, "orders");
//! ```
//!
//! Unknown fields are rejected so typos surface at startup.

#![doc(html_root_url = "https://docs.rs/keystone-config/0.1.0")]

mod config;
mod error;
mod loader;
mod schema;

pub use config::{KeystoneConfig, PRODUCTION_ENV};
pub use error::ConfigError;
pub use loader::{ConfigLoader, CONFIG_FILE_NAME, CONFIG_PATH_ENV, DEFAULT_ENV_PREFIX};
pub use schema::{
    AppConfig, BrokerConfig, DatabaseConfig, LogFormat, LoggingConfig, ServerConfig,
};
