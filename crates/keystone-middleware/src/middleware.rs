//! The [`Middleware`] trait and the [`Next`] continuation it receives.
//! A middleware sees the request on its way to the handler and the result on
//! its way back, and may short-circuit the chain by returning without calling
//! [`Next::run`].
//!
//! # Example
//!
//! ```
//! use keystone_core::{BoxFuture, HandlerResult, Request};
//! use keystone_middleware::{Middleware, Next};
//!
//! struct Tenant;
//!
//! impl Middleware for Tenant {
//!     fn name(&self) -> &'static str {
//!         "tenant"
//!     }
//!
//!     fn process<'a>(
//!         &'a self,
//!         mut request: Request,
//!         next: Next<'a>,
//!     ) -> BoxFuture<'a, HandlerResult> {
//!         Box::pin(async move {
//!             request.metadata_mut().insert("tenant".into(), "acme".into());
//!             next.run(request).await
//!         })
//!     }
//! }
//! ```

use keystone_core::{BoxFuture, Handler, HandlerResult, Request};

/// A stage wrapped around every handler call.
///
/// # Invariants
///
/// - Middleware calls `next.run()` at most once
/// - Middleware mutates only request metadata and context, never the payload
/// - Middleware honors the request context's cancellation
pub trait Middleware: Send + Sync + 'static {
    /// Returns the name of this middleware, used in logs.
    fn name(&self) -> &'static str;

    /// Processes the request, delegating to `next` to continue the chain.
    fn process<'a>(&'a self, request: Request, next: Next<'a>) -> BoxFuture<'a, HandlerResult>;
}

/// Callback to invoke the rest of the chain.
///
/// Consumed by [`Next::run`], so it can be called at most once.
pub struct Next<'a> {
    inner: NextInner<'a>,
}

enum NextInner<'a> {
    /// More middleware to process
    Chain {
        middleware: &'a dyn Middleware,
        next: Box<Next<'a>>,
    },
    /// End of chain
    Handler(&'a dyn Handler),
}

impl<'a> Next<'a> {
    /// Creates a `Next` that invokes `middleware` before `next`.
    pub(crate) fn new(middleware: &'a dyn Middleware, next: Next<'a>) -> Self {
        Self {
            inner: NextInner::Chain {
                middleware,
                next: Box::new(next),
            },
        }
    }

    /// Creates a terminal `Next` that invokes the handler.
    #[must_use]
    pub fn handler(handler: &'a dyn Handler) -> Self {
        Self {
            inner: NextInner::Handler(handler),
        }
    }

    /// Invokes the next middleware or the handler.
    pub fn run(self, request: Request) -> BoxFuture<'a, HandlerResult> {
        match self.inner {
            NextInner::Chain { middleware, next } => middleware.process(request, *next),
            NextInner::Handler(handler) => handler.call(request),
        }
    }
}

impl std::fmt::Debug for Next<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match &self.inner {
            NextInner::Chain { middleware, .. } => {
                f.debug_tuple("Next").field(&middleware.name()).finish()
            }
            NextInner::Handler(_) => f.write_str("Next(handler)"),
        }
    }
}

/// A middleware built from a closure.
///
/// # Example
///
/// ```
/// use keystone_middleware::FnMiddleware;
///
/// let middleware = FnMiddleware::new("noop", |req, next| next.run(req));
/// ```
pub struct FnMiddleware<F> {
    name: &'static str,
    func: F,
}

impl<F> FnMiddleware<F>
where
    F: for<'a> Fn(Request, Next<'a>) -> BoxFuture<'a, HandlerResult> + Send + Sync + 'static,
{
    /// Creates a new function-based middleware.
    pub const fn new(name: &'static str, func: F) -> Self {
        Self { name, func }
    }
}

impl<F> Middleware for FnMiddleware<F>
where
    F: for<'a> Fn(Request, Next<'a>) -> BoxFuture<'a, HandlerResult> + Send + Sync + 'static,
{
    fn name(&self) -> &'static str {
        self.name
    }

    fn process<'a>(&'a self, request: Request, next: Next<'a>) -> BoxFuture<'a, HandlerResult> {
        (self.func)(request, next)
    }
}

impl<F> std::fmt::Debug for FnMiddleware<F> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FnMiddleware")
            .field("name", &self.name)
            .finish_non_exhaustive()
    }
}
