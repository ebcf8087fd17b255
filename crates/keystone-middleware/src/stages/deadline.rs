//! Deadline and cancellation middleware.
//!
//! Races the rest of the chain against the request context. If the context
//! is cancelled or its deadline passes first, the in-flight future is
//! dropped and a typed error is returned.

use crate::middleware::{Middleware, Next};
use keystone_core::{AppError, BoxFuture, HandlerResult, Request};
use std::time::Duration;
use tracing::warn;

/// Middleware that enforces the request deadline.
#[derive(Debug, Clone, Default)]
pub struct DeadlineMiddleware {
    timeout: Option<Duration>,
}

impl DeadlineMiddleware {
    /// Creates a middleware that honors only deadlines already on the context.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a middleware that also caps every request at `timeout`.
    #[must_use]
    pub const fn with_timeout(timeout: Duration) -> Self {
        Self {
            timeout: Some(timeout),
        }
    }
}

impl Middleware for DeadlineMiddleware {
    fn name(&self) -> &'static str {
        "deadline"
    }

    fn process<'a>(&'a self, mut request: Request, next: Next<'a>) -> BoxFuture<'a, HandlerResult> {
        Box::pin(async move {
            if let Some(timeout) = self.timeout {
                let ctx = request.context().clone().with_timeout(timeout);
                *request.context_mut() = ctx;
            }
            let ctx = request.context().clone();
            let path = request.path().to_string();

            tokio::select! {
                result = next.run(request) => result,
                () = ctx.cancelled() => {
                    let cancelled = ctx.token().is_cancelled();
                    warn!(%path, cancelled, "Request aborted before completion");
                    if cancelled {
                        Err(AppError::cancelled().into())
                    } else {
                        Err(AppError::deadline_exceeded().into())
                    }
                }
            }
        })
    }
}
