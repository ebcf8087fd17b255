//! Middleware composition.
//!
//! [`compose`] wraps a handler with an ordered list of middleware, producing
//! a handler equivalent to `m[0](m[1](...m[n-1](handler)))`: the first
//! middleware registered is the outermost wrapper, observing the request
//! first and the result last.

use crate::middleware::{Middleware, Next};
use keystone_core::{BoxFuture, Handler, HandlerResult, Request};
use std::sync::Arc;

/// A type-erased middleware that can be stored in a vector.
pub type BoxedMiddleware = Arc<dyn Middleware>;

/// A handler wrapped by an ordered list of middleware.
///
/// `Chain` is itself a [`Handler`], so chains can be stored wherever a
/// handler is expected.
///
/// # Example
///
/// ```
/// use keystone_core::{FnHandler, HandlerResult, Response};
/// use keystone_middleware::{Chain, CorrelationMiddleware};
///
/// let chain = Chain::builder()
///     .middleware(CorrelationMiddleware::new())
///     .handler(FnHandler::new(|_req| async { HandlerResult::Ok(Response::empty()) }));
/// assert_eq!(chain.len(), 1);
/// ```
#[derive(Clone)]
pub struct Chain {
    middlewares: Arc<[BoxedMiddleware]>,
    handler: Arc<dyn Handler>,
}

impl Chain {
    /// Creates a new chain builder.
    #[must_use]
    pub fn builder() -> ChainBuilder {
        ChainBuilder::new()
    }

    /// Returns the number of middleware in the chain.
    #[must_use]
    pub fn len(&self) -> usize {
        self.middlewares.len()
    }

    /// Returns `true` if the chain wraps no middleware.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.middlewares.is_empty()
    }

    /// Returns the names of the middleware, outermost first.
    #[must_use]
    pub fn names(&self) -> Vec<&'static str> {
        self.middlewares.iter().map(|m| m.name()).collect()
    }

    fn build_next(&self) -> Next<'_> {
        let mut next = Next::handler(self.handler.as_ref());
        for middleware in self.middlewares.iter().rev() {
            next = Next::new(middleware.as_ref(), next);
        }
        next
    }
}

impl Handler for Chain {
    fn call(&self, request: Request) -> BoxFuture<'_, HandlerResult> {
        self.build_next().run(request)
    }
}

impl std::fmt::Debug for Chain {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Chain")
            .field("middlewares", &self.names())
            .finish_non_exhaustive()
    }
}

/// Wraps `handler` with `middlewares`, preserving registration order.
#[must_use]
pub fn compose(handler: Arc<dyn Handler>, middlewares: &[BoxedMiddleware]) -> Chain {
    Chain {
        middlewares: middlewares.iter().cloned().collect(),
        handler,
    }
}

/// Builder for [`Chain`].
#[derive(Default)]
pub struct ChainBuilder {
    middlewares: Vec<BoxedMiddleware>,
}

impl ChainBuilder {
    /// Creates an empty builder.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends a middleware; earlier calls wrap later ones.
    #[must_use]
    pub fn middleware<M: Middleware>(mut self, middleware: M) -> Self {
        self.middlewares.push(Arc::new(middleware));
        self
    }

    /// Appends already shared middleware.
    #[must_use]
    pub fn middlewares(mut self, middlewares: impl IntoIterator<Item = BoxedMiddleware>) -> Self {
        self.middlewares.extend(middlewares);
        self
    }

    /// Finishes the chain with its terminal handler.
    #[must_use]
    pub fn handler<H: Handler>(self, handler: H) -> Chain {
        compose(Arc::new(handler), &self.middlewares)
    }
}

impl std::fmt::Debug for ChainBuilder {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ChainBuilder")
            .field("len", &self.middlewares.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::middleware::FnMiddleware;
    use keystone_core::{FnHandler, Payload, Protocol, Response};

    fn ok_handler() -> Arc<dyn Handler> {
        Arc::new(FnHandler::new(|_req| async {
            HandlerResult::Ok(Response::empty())
        }))
    }

    #[tokio::test]
    async fn test_empty_chain_calls_handler() {
        let chain = compose(ok_handler(), &[]);
        assert!(chain.is_empty());
        let req = Request::new(Protocol::Rpc, "Ping", "/Ping", Payload::Empty);
        assert!(chain.call(req).await.is_ok());
    }

    #[tokio::test]
    async fn test_names_are_outermost_first() {
        let a: BoxedMiddleware = Arc::new(FnMiddleware::new("a", |req, next| next.run(req)));
        let b: BoxedMiddleware = Arc::new(FnMiddleware::new("b", |req, next| next.run(req)));
        let chain = compose(ok_handler(), &[a, b]);
        assert_eq!(chain.names(), vec!["a", "b"]);
        assert_eq!(chain.len(), 2);
    }

    #[tokio::test]
    async fn test_chain_is_reusable() {
        let chain = Chain::builder()
            .middleware(FnMiddleware::new("pass", |req, next| next.run(req)))
            .handler(FnHandler::new(|_req| async {
                HandlerResult::Ok(Response::empty())
            }));

        for _ in 0..3 {
            let req = Request::new(Protocol::Broker, "", "user.get", Payload::Empty);
            assert!(chain.call(req).await.is_ok());
        }
    }
}
