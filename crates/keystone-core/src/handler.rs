//! Handler trait for request processing.
//!
//! The [`Handler`] trait is the terminal unit of the middleware chain: it maps
//! a protocol-neutral [`Request`] to a [`Response`] or an [`Error`].

use crate::error::Error;
use crate::request::{Request, Response};
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

/// A boxed, sendable future.
pub type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

/// Result of handling a request.
pub type HandlerResult = Result<Response, Error>;

/// A type-erased request handler.
///
/// Handlers are object-safe so that a middleware chain can wrap any of them
/// behind an `Arc<dyn Handler>`.
///
/// # Example
///
/// ```rust
/// use keystone_core::{BoxFuture, Handler, HandlerResult, Request, Response};
///
/// struct Health;
///
/// impl Handler for Health {
///     fn call(&self, _req: Request) -> BoxFuture<'_, HandlerResult> {
///         Box::pin(async { Ok(Response::empty()) })
///     }
/// }
/// ```
pub trait Handler: Send + Sync + 'static {
    /// Handles a request.
    fn call(&self, request: Request) -> BoxFuture<'_, HandlerResult>;
}

impl<H: Handler + ?Sized> Handler for Arc<H> {
    fn call(&self, request: Request) -> BoxFuture<'_, HandlerResult> {
        (**self).call(request)
    }
}

impl<H: Handler + ?Sized> Handler for Box<H> {
    fn call(&self, request: Request) -> BoxFuture<'_, HandlerResult> {
        (**self).call(request)
    }
}

/// A function-based handler wrapper.
///
/// This allows using async closures directly as handlers.
///
/// # Example
///
/// ```rust
/// use keystone_core::{FnHandler, Response};
///
/// let handler = FnHandler::new(|_req| async { Ok::<_, keystone_core::Error>(Response::empty()) });
/// ```
pub struct FnHandler<F> {
    func: F,
}

impl<F, Fut> FnHandler<F>
where
    F: Fn(Request) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = HandlerResult> + Send + 'static,
{
    /// Wraps a closure as a handler.
    pub const fn new(func: F) -> Self {
        Self { func }
    }
}

impl<F, Fut> Handler for FnHandler<F>
where
    F: Fn(Request) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = HandlerResult> + Send + 'static,
{
    fn call(&self, request: Request) -> BoxFuture<'_, HandlerResult> {
        Box::pin((self.func)(request))
    }
}

impl<F> std::fmt::Debug for FnHandler<F> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FnHandler").finish_non_exhaustive()
    }
}
