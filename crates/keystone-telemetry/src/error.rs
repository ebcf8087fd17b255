//! Telemetry errors.

use thiserror::Error;
use tracing_subscriber::filter::ParseError;
use tracing_subscriber::util::TryInitError;

/// Setup failures. Nothing here occurs after startup.
#[derive(Debug, Error)]
pub enum TelemetryError {
    /// The log filter directive does not parse.
    #[error("invalid log filter: {0}")]
    InvalidFilter(#[from] ParseError),

    /// A global subscriber is already installed.
    #[error("logging already initialized: {0}")]
    AlreadyInitialized(#[from] TryInitError),

    /// A masking pattern does not compile.
    #[error("mask rule for '{field}' does not compile: {source}")]
    InvalidMaskRule {
        /// Field the rule applies to.
        field: String,
        /// Regex error.
        #[source]
        source: regex::Error,
    },
}
