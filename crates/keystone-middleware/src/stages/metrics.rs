//! Request metrics middleware.

use crate::middleware::{Middleware, Next};
use keystone_core::{BoxFuture, HandlerResult, Request};
use keystone_telemetry::metrics::{record_request, InFlightGuard, Outcome};
use std::time::Instant;

/// Middleware that records request count, latency and in-flight gauge.
///
/// Requests whose path is listed in the skip list (health probes, metrics
/// scrapes) are passed through unrecorded.
#[derive(Debug, Clone)]
pub struct MetricsMiddleware {
    skip_paths: Vec<String>,
}

impl Default for MetricsMiddleware {
    fn default() -> Self {
        Self {
            skip_paths: vec!["/health".to_string(), "/metrics".to_string()],
        }
    }
}

impl MetricsMiddleware {
    /// Creates a metrics middleware skipping `/health` and `/metrics`.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Replaces the skip list.
    #[must_use]
    pub fn skip_paths<I, S>(mut self, paths: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.skip_paths = paths.into_iter().map(Into::into).collect();
        self
    }

    fn skips(&self, path: &str) -> bool {
        self.skip_paths.iter().any(|p| p == path)
    }
}

impl Middleware for MetricsMiddleware {
    fn name(&self) -> &'static str {
        "metrics"
    }

    fn process<'a>(&'a self, request: Request, next: Next<'a>) -> BoxFuture<'a, HandlerResult> {
        if self.skips(request.path()) {
            return next.run(request);
        }

        Box::pin(async move {
            let protocol = request.protocol().as_str();
            let method = request.method().to_string();
            let _in_flight = InFlightGuard::new(protocol);
            let start = Instant::now();

            let result = next.run(request).await;

            let outcome = match &result {
                Ok(response) => response
                    .error()
                    .map_or(Outcome::Success, |e| Outcome::from_status(e.status)),
                Err(err) => Outcome::from_status(err.status_code().as_u16()),
            };
            record_request(protocol, &method, outcome, start.elapsed());

            result
        })
    }
}
