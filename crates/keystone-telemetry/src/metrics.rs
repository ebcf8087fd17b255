//! Metric call sites for Keystone.
//!
//! Metrics are emitted through the `metrics` facade. Installing a recorder
//! (Prometheus, OTLP, ...) is left to the embedding application; without one,
//! every call here is a no-op.
//!
//! # Standard Metrics
//!
//! | Metric | Type | Labels |
//! |--------|------|--------|
//! | `keystone_requests_total` | Counter | `protocol`, `method`, `outcome` |
//! | `keystone_request_duration_seconds` | Histogram | `protocol`, `method` |
//! | `keystone_in_flight_requests` | Gauge | `protocol` |
//! | `keystone_broker_messages_total` | Counter | `direction`, `subject`, `outcome` |
//! | `keystone_db_queries_total` | Counter | `operation`, `outcome` |

use metrics::{counter, describe_counter, describe_gauge, describe_histogram, gauge, histogram};
use std::time::Duration;

/// Registers descriptions for all standard metrics.
pub fn describe_metrics() {
    describe_counter!(
        "keystone_requests_total",
        "Total number of requests processed by the middleware chain"
    );
    describe_histogram!(
        "keystone_request_duration_seconds",
        "Request duration in seconds"
    );
    describe_gauge!(
        "keystone_in_flight_requests",
        "Number of requests currently being processed"
    );
    describe_counter!(
        "keystone_broker_messages_total",
        "Total broker messages sent and received"
    );
    describe_counter!(
        "keystone_db_queries_total",
        "Total repository statements executed"
    );
}

/// Request outcome label.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    /// Completed successfully.
    Success,
    /// Failed with a domain error.
    ClientError,
    /// Failed with an internal error.
    ServerError,
}

impl Outcome {
    /// Returns the label value.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Success => "success",
            Self::ClientError => "client_error",
            Self::ServerError => "server_error",
        }
    }

    /// Classifies a transport status.
    #[must_use]
    pub const fn from_status(status: u16) -> Self {
        match status {
            500..=599 => Self::ServerError,
            400..=499 => Self::ClientError,
            _ => Self::Success,
        }
    }
}

/// Records a completed request.
pub fn record_request(protocol: &str, method: &str, outcome: Outcome, duration: Duration) {
    counter!(
        "keystone_requests_total",
        "protocol" => protocol.to_string(),
        "method" => method.to_string(),
        "outcome" => outcome.as_str()
    )
    .increment(1);

    histogram!(
        "keystone_request_duration_seconds",
        "protocol" => protocol.to_string(),
        "method" => method.to_string()
    )
    .record(duration.as_secs_f64());
}

/// Records a broker message.
///
/// `direction` is `"out"` for publish/request and `"in"` for deliveries.
pub fn record_broker_message(direction: &'static str, subject: &str, success: bool) {
    counter!(
        "keystone_broker_messages_total",
        "direction" => direction,
        "subject" => subject.to_string(),
        "outcome" => if success { "success" } else { "error" }
    )
    .increment(1);
}

/// Records a repository statement.
pub fn record_query(operation: &'static str, success: bool) {
    counter!(
        "keystone_db_queries_total",
        "operation" => operation,
        "outcome" => if success { "success" } else { "error" }
    )
    .increment(1);
}

/// Guard that tracks an in-flight request.
///
/// Increments the gauge on creation and decrements it on drop, so the gauge
/// stays accurate even when the request future is cancelled.
#[derive(Debug)]
pub struct InFlightGuard {
    protocol: &'static str,
}

impl InFlightGuard {
    /// Creates a new guard and increments the in-flight gauge.
    #[must_use]
    pub fn new(protocol: &'static str) -> Self {
        gauge!("keystone_in_flight_requests", "protocol" => protocol).increment(1.0);
        Self { protocol }
    }
}

impl Drop for InFlightGuard {
    fn drop(&mut self) {
        gauge!("keystone_in_flight_requests", "protocol" => self.protocol).decrement(1.0);
    }
}
