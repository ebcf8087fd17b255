//! Request logging middleware.
//!
//! Emits one structured event per call. Successes are logged at `info`,
//! domain errors at `warn` and internal failures at `error` with their full
//! source chain. Payloads are only logged at `debug`, after masking.

use crate::middleware::{Middleware, Next};
use keystone_core::{BoxFuture, Error, HandlerResult, Request};
use keystone_telemetry::SensitiveFields;
use std::time::Instant;
use tracing::{debug, error, info, warn};

/// Middleware that logs every call.
#[derive(Debug, Clone, Default)]
pub struct LoggingMiddleware {
    sensitive: SensitiveFields,
    log_payloads: bool,
}

impl LoggingMiddleware {
    /// Creates a logging middleware that does not log payloads.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Enables payload logging at `debug`, masked with `fields`.
    #[must_use]
    pub fn with_payloads(mut self, fields: SensitiveFields) -> Self {
        self.sensitive = fields;
        self.log_payloads = true;
        self
    }
}

impl Middleware for LoggingMiddleware {
    fn name(&self) -> &'static str {
        "logging"
    }

    fn process<'a>(&'a self, request: Request, next: Next<'a>) -> BoxFuture<'a, HandlerResult> {
        Box::pin(async move {
            let protocol = request.protocol();
            let method = request.method().to_string();
            let path = request.path().to_string();
            let request_id = request.context().request_id();
            let correlation_id = request
                .context()
                .correlation_id()
                .unwrap_or_default()
                .to_string();

            if self.log_payloads {
                if let Some(bytes) = request.payload().as_bytes() {
                    debug!(
                        %protocol, %method, %path, %request_id,
                        payload = %self.sensitive.mask_json_bytes(bytes),
                        "Request received"
                    );
                }
            }

            let start = Instant::now();
            let result = next.run(request).await;
            let duration_ms = u64::try_from(start.elapsed().as_millis()).unwrap_or(u64::MAX);

            match &result {
                Ok(_) => info!(
                    %protocol, %method, %path, %request_id, %correlation_id, duration_ms,
                    "Request succeeded"
                ),
                Err(Error::App(err)) => warn!(
                    %protocol, %method, %path, %request_id, %correlation_id, duration_ms,
                    status = err.status, code = %err.code, error = %err.message,
                    "Request failed"
                ),
                Err(err @ Error::Internal { source, .. }) => error!(
                    %protocol, %method, %path, %request_id, %correlation_id, duration_ms,
                    error = %err, source = ?source,
                    "Request failed"
                ),
            }

            result
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use keystone_core::{AppError, FnHandler, Payload, Protocol, Response};

    #[tokio::test]
    async fn test_passes_result_through() {
        let mw = LoggingMiddleware::new()
            .with_payloads(SensitiveFields::new().mask_all("password"));
        let ok = FnHandler::new(|_req| async { HandlerResult::Ok(Response::empty()) });
        let req = Request::new(
            Protocol::Http,
            "POST",
            "/login",
            Payload::from(br#"{"password":"pw"}"#.to_vec()),
        );
        assert!(mw.process(req, Next::handler(&ok)).await.is_ok());

        let failing = FnHandler::new(|_req| async {
            HandlerResult::Err(AppError::query_not_found("none").into())
        });
        let req = Request::new(Protocol::Http, "GET", "/x", Payload::Empty);
        let err = mw.process(req, Next::handler(&failing)).await.unwrap_err();
        assert_eq!(err.status_code().as_u16(), 404);

        let internal = FnHandler::new(|_req| async {
            HandlerResult::Err(Error::internal("boom"))
        });
        let req = Request::new(Protocol::Rpc, "Get", "/Get", Payload::Empty);
        assert!(mw.process(req, Next::handler(&internal)).await.is_err());
    }
}
