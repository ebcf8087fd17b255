//! Configuration errors.

use std::path::PathBuf;
use thiserror::Error;

/// Why a configuration could not be produced.
#[derive(Error, Debug)]
pub enum ConfigError {
    /// A required file does not exist.
    #[error("config file {} does not exist", path.display())]
    Missing {
        /// The path that was looked up.
        path: PathBuf,
    },

    /// A file exists but could not be read.
    #[error("cannot read config file {}: {source}", path.display())]
    Unreadable {
        /// The file.
        path: PathBuf,
        /// I/O cause.
        #[source]
        source: std::io::Error,
    },

    /// Neither TOML nor JSON.
    #[error("unsupported config format '{0}' (expected toml or json)")]
    UnsupportedFormat(String),

    /// Malformed TOML, or a field the schema does not know.
    #[error("invalid TOML config: {0}")]
    Toml(#[from] toml::de::Error),

    /// Malformed JSON, or a field the schema does not know.
    #[error("invalid JSON config: {0}")]
    Json(#[from] serde_json::Error),

    /// A `.env` file exists but could not be loaded.
    #[error("cannot load .env: {0}")]
    Dotenv(#[from] dotenvy::Error),

    /// An environment override has the wrong shape.
    #[error("bad override {var}: {reason}")]
    Override {
        /// The environment variable.
        var: String,
        /// What was expected.
        reason: &'static str,
    },

    /// A loaded value fails validation.
    #[error("{field} {reason}")]
    Invalid {
        /// Dotted path of the field, e.g. `database.port`.
        field: &'static str,
        /// What is wrong with it.
        reason: String,
    },
}

impl ConfigError {
    pub(crate) fn invalid(field: &'static str, reason: impl Into<String>) -> Self {
        Self::Invalid {
            field,
            reason: reason.into(),
        }
    }

    pub(crate) fn bad_override(var: &str, reason: &'static str) -> Self {
        Self::Override {
            var: var.to_string(),
            reason,
        }
    }
}
