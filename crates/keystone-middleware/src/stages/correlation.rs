//! Correlation ID middleware.
//!
//! Every call gets a correlation identifier that follows it across services:
//! into logs, onto outgoing broker messages and back onto the response.
//!
//! ## Correlation ID Sources
//!
//! 1. **`correlation-id` metadata**: set by upstream services and brokers
//! 2. **`x-request-id` metadata**: set by HTTP clients and proxies
//! 3. **Generated UUID v7**: if neither is present or trusted
//!
//! The identifier is written back into the request metadata, the request
//! context and the response metadata.

use crate::middleware::{Middleware, Next};
use keystone_core::{BoxFuture, HandlerResult, Request, CORRELATION_ID_KEY};
use uuid::Uuid;

/// Alternative metadata key accepted for inbound HTTP calls.
pub const REQUEST_ID_HEADER: &str = "x-request-id";

const MAX_LEN: usize = 128;

/// Middleware that propagates or generates correlation IDs.
///
/// # Example
///
/// ```
/// use keystone_middleware::CorrelationMiddleware;
///
/// // Edge services facing untrusted clients:
/// let middleware = CorrelationMiddleware::always_generate();
/// ```
#[derive(Debug, Clone)]
pub struct CorrelationMiddleware {
    trust_incoming: bool,
}

impl Default for CorrelationMiddleware {
    fn default() -> Self {
        Self {
            trust_incoming: true,
        }
    }
}

impl CorrelationMiddleware {
    /// Creates a middleware that reuses well-formed inbound identifiers.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a middleware that ignores inbound identifiers.
    #[must_use]
    pub fn always_generate() -> Self {
        Self {
            trust_incoming: false,
        }
    }

    fn extract(&self, request: &Request) -> Option<String> {
        if !self.trust_incoming {
            return None;
        }
        [CORRELATION_ID_KEY, REQUEST_ID_HEADER]
            .iter()
            .filter_map(|key| request.metadata_value(key))
            .find(|value| is_valid(value))
            .map(str::to_string)
    }
}

fn is_valid(value: &str) -> bool {
    !value.is_empty()
        && value.len() <= MAX_LEN
        && value
            .bytes()
            .all(|b| b.is_ascii_alphanumeric() || matches!(b, b'-' | b'_' | b'.' | b':'))
}

impl Middleware for CorrelationMiddleware {
    fn name(&self) -> &'static str {
        "correlation"
    }

    fn process<'a>(&'a self, mut request: Request, next: Next<'a>) -> BoxFuture<'a, HandlerResult> {
        Box::pin(async move {
            let correlation_id = self
                .extract(&request)
                .unwrap_or_else(|| Uuid::now_v7().to_string());

            request
                .metadata_mut()
                .insert(CORRELATION_ID_KEY.to_string(), correlation_id.clone());
            request
                .context_mut()
                .set_correlation_id(correlation_id.clone());

            let mut response = next.run(request).await?;
            response
                .metadata_mut()
                .insert(CORRELATION_ID_KEY.to_string(), correlation_id);
            Ok(response)
        })
    }
}
