//! # Keystone Broker
//!
//! Request/reply and publish/subscribe messaging for the Keystone toolkit.
//!
//! - [`MessageClient`] - JSON requests with a bounded wait, events with a
//!   fresh correlation id, queue-group subscriptions
//! - [`use_case`] / [`subscriber`] - typed adapters for subscription callbacks
//! - [`BrokerService`] - subscriptions as a platform [`Service`](keystone_server::Service)
//! - [`Transport`] - NATS in production, in-memory for tests
//!
//! ## Example
//!
//! ```rust
//! use keystone_broker::{decode_reply, use_case, MemoryTransport, MessageClient};
//! use keystone_core::{AppError, Context};
//!
//! # tokio_test::block_on(async {
//! let client = MessageClient::new(MemoryTransport::new());
//! let _echo = client
//!     .subscribe_operation("echo", use_case(|_ctx, s: String| async move { Ok::<_, AppError>(s) }))
//!     .await
//!     .unwrap();
//!
//! let reply = client
//!     .request_operation(&Context::new(), "echo", "hello")
//!     .await
//!     .unwrap();
//! assert_eq!(decode_reply::<String>(&reply).unwrap(), "hello");
//! # });
//! ```

#![doc(html_root_url = "https://docs.rs/keystone-broker/0.1.0")]
#![warn(missing_docs)]
#![forbid(unsafe_code)]

mod client;
mod error;
mod handler;
mod message;
mod service;
pub mod transport;
mod worker;

pub use client::{
    MessageClient, SubscriptionHandle, DEFAULT_REQUEST_TIMEOUT, GATEWAY_QUEUE, INDEX_QUEUE,
};
pub use error::{BrokerError, BrokerResult};
pub use handler::{decode_reply, subscriber, use_case, EventHandler, OperationHandler};
pub use message::Message;
pub use service::BrokerService;
pub use transport::{MemoryTransport, NatsTransport, Subscription, Transport};
pub use worker::WorkerPool;
