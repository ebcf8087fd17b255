//! Built-in middleware.
//!
//! | Middleware | Purpose |
//! |---|---|
//! | [`CorrelationMiddleware`] | Propagate or generate the correlation ID |
//! | [`LoggingMiddleware`] | One structured log event per call |
//! | [`MetricsMiddleware`] | Request count, latency, in-flight gauge |
//! | [`DeadlineMiddleware`] | Abort calls whose context is cancelled or expired |

pub mod correlation;
pub mod deadline;
pub mod logging;
pub mod metrics;

pub use correlation::CorrelationMiddleware;
pub use deadline::DeadlineMiddleware;
pub use logging::LoggingMiddleware;
pub use metrics::MetricsMiddleware;
