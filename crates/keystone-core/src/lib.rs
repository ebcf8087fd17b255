//! # Keystone Core
//!
//! Core types and traits for the Keystone platform toolkit.
//!
//! This crate provides the protocol-neutral vocabulary every other Keystone
//! crate speaks:
//!
//! - [`Context`] - Cancellable execution context carrying identity and deadline
//! - [`RequestId`] - UUID v7 request identifier
//! - [`Principal`] - Authenticated caller attached to a context
//! - [`Request`] / [`Response`] - Protocol-neutral call envelope
//! - [`AppError`] / [`Error`] - Typed domain errors and handler failures
//! - [`Handler`] - Core handler trait

#![doc(html_root_url = "https://docs.rs/keystone-core/0.1.0")]
#![warn(missing_docs)]
#![forbid(unsafe_code)]

mod context;
mod error;
mod handler;
mod request;
pub mod retry;

pub use context::{Context, Principal, RequestId};
pub use error::{codes, AppError, AppResult, Error, ErrorBody, SuccessBody};
pub use handler::{BoxFuture, FnHandler, Handler, HandlerResult};
pub use request::{Metadata, Payload, Protocol, Request, Response};

/// Metadata key carrying the correlation identifier across protocols.
pub const CORRELATION_ID_KEY: &str = "correlation-id";
