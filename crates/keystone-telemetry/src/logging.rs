//! Global `tracing` subscriber setup.
//!
//! JSON lines in production, pretty multi-line output in development. A
//! `RUST_LOG` variable in the environment overrides the configured filter.
//!
//! ```rust,ignore
//! use keystone_telemetry::{init_logging, LogConfig};
//!
//! init_logging(&LogConfig::new("info,sqlx=warn").json(true))?;
//! tracing::info!(subject = "users.get", "Listening");
//! ```

use tracing_subscriber::fmt::format::FmtSpan;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{EnvFilter, Layer, Registry};

use crate::TelemetryResult;

type BoxedLayer = Box<dyn Layer<Registry> + Send + Sync>;

/// How the process logs.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LogConfig {
    /// `EnvFilter` directive, e.g. `"info,keystone_data=debug"`.
    pub filter: String,
    /// JSON lines instead of pretty output.
    pub json: bool,
    /// Emit an event when each span closes, with its busy time.
    pub span_events: bool,
    /// Attach file and line to each event.
    pub source_location: bool,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self::production()
    }
}

impl LogConfig {
    /// Pretty output at `filter`.
    pub fn new(filter: impl Into<String>) -> Self {
        Self {
            filter: filter.into(),
            json: false,
            span_events: false,
            source_location: false,
        }
    }

    /// JSON at `info`.
    #[must_use]
    pub fn production() -> Self {
        Self::new("info").json(true)
    }

    /// Pretty at `debug`, with span timings and source locations.
    #[must_use]
    pub fn development() -> Self {
        Self {
            span_events: true,
            source_location: true,
            ..Self::new("debug")
        }
    }

    /// [`production`](Self::production) or [`development`](Self::development).
    #[must_use]
    pub fn for_env(is_production: bool) -> Self {
        if is_production {
            Self::production()
        } else {
            Self::development()
        }
    }

    /// Switches JSON output on or off.
    #[must_use]
    pub fn json(mut self, json: bool) -> Self {
        self.json = json;
        self
    }

    /// Replaces the filter directive.
    #[must_use]
    pub fn with_filter(mut self, filter: impl Into<String>) -> Self {
        self.filter = filter.into();
        self
    }

    fn env_filter(&self) -> TelemetryResult<EnvFilter> {
        match std::env::var(EnvFilter::DEFAULT_ENV) {
            Ok(directive) if !directive.trim().is_empty() => Ok(EnvFilter::try_new(directive)?),
            _ => Ok(EnvFilter::try_new(&self.filter)?),
        }
    }

    fn layer(&self) -> BoxedLayer {
        let spans = if self.span_events {
            FmtSpan::CLOSE
        } else {
            FmtSpan::NONE
        };
        let base = tracing_subscriber::fmt::layer()
            .with_span_events(spans)
            .with_file(self.source_location)
            .with_line_number(self.source_location);

        if self.json {
            base.json().boxed()
        } else {
            base.pretty().boxed()
        }
    }
}

/// Installs the global subscriber.
///
/// # Errors
///
/// [`TelemetryError::InvalidFilter`](crate::TelemetryError::InvalidFilter)
/// for a malformed directive,
/// [`TelemetryError::AlreadyInitialized`](crate::TelemetryError::AlreadyInitialized)
/// if another subscriber is installed.
pub fn init_logging(config: &LogConfig) -> TelemetryResult<()> {
    let filter = config.env_filter()?;
    tracing_subscriber::registry()
        .with(config.layer().with_filter(filter))
        .try_init()?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::TelemetryError;

    #[test]
    fn test_presets() {
        let prod = LogConfig::production();
        assert!(prod.json);
        assert_eq!(prod.filter, "info");
        assert!(!prod.source_location);

        let dev = LogConfig::for_env(false);
        assert!(!dev.json);
        assert!(dev.span_events);
        assert_eq!(dev, LogConfig::development());
    }

    #[test]
    fn test_builder() {
        let config = LogConfig::new("warn").json(true).with_filter("info,sqlx=warn");
        assert!(config.json);
        assert_eq!(config.filter, "info,sqlx=warn");
    }

    #[test]
    fn test_bad_directive_is_rejected() {
        std::env::remove_var(EnvFilter::DEFAULT_ENV);
        let err = init_logging(&LogConfig::new("keystone=notalevel")).unwrap_err();
        assert!(matches!(err, TelemetryError::InvalidFilter(_)));
    }
}
