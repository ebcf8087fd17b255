//! Observability for Keystone services.
//!
//! - **Logging**: structured JSON or pretty output through `tracing-subscriber`
//! - **Metrics**: call sites through the `metrics` facade
//! - **Masking**: redaction of sensitive JSON fields before they reach logs
//!
//! # Example
//!
//! ```rust,ignore
//! use keystone_telemetry::{init_telemetry, LogConfig};
//!
//! init_telemetry(&LogConfig::for_env(config.is_prod_env()))?;
//! ```

#![warn(missing_docs)]

pub mod error;
pub mod logging;
pub mod masking;
pub mod metrics;

pub use error::TelemetryError;
pub use logging::{init_logging, LogConfig};
pub use masking::{mask_sensitive, MaskRule, SensitiveFields};
pub use metrics::{describe_metrics, InFlightGuard, Outcome};

/// Result type for telemetry operations.
pub type TelemetryResult<T> = Result<T, TelemetryError>;

/// Initializes logging and registers metric descriptions.
///
/// # Errors
///
/// Returns `TelemetryError` if logging fails to initialize.
pub fn init_telemetry(logging: &LogConfig) -> TelemetryResult<()> {
    init_logging(logging)?;
    describe_metrics();
    Ok(())
}
