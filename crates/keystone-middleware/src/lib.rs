//! # Keystone Middleware
//!
//! Protocol-neutral middleware for the Keystone platform toolkit.
//!
//! A [`Middleware`] wraps a [`Handler`](keystone_core::Handler). [`compose`]
//! applies an ordered list of middleware so that the first one registered
//! is the outermost: it sees the request first and the result last.
//!
//! ```text
//! request  ──► m[0] ──► m[1] ──► ... ──► m[n-1] ──► handler
//! result   ◄── m[0] ◄── m[1] ◄── ... ◄── m[n-1] ◄──┘
//! ```
//!
//! The same chain serves HTTP, RPC and broker calls; middleware only touch
//! request metadata and context, never the payload.

#![doc(html_root_url = "https://docs.rs/keystone-middleware/0.1.0")]
#![warn(missing_docs)]
#![forbid(unsafe_code)]

pub mod chain;
pub mod middleware;
pub mod stages;

pub use chain::{compose, BoxedMiddleware, Chain, ChainBuilder};
pub use middleware::{FnMiddleware, Middleware, Next};
pub use stages::{CorrelationMiddleware, DeadlineMiddleware, LoggingMiddleware, MetricsMiddleware};
