//! Protocol adapters.
//!
//! An adapter is a [`Service`](crate::Service) that turns its protocol's
//! calls into [`Request`](keystone_core::Request)s and runs them through the
//! platform's middleware chain.

pub mod http;
pub mod rpc;

pub use self::http::HttpService;
pub use self::rpc::{unary, RpcService};
