//! Broker transports.
//!
//! The [`MessageClient`](crate::MessageClient) speaks to the broker through
//! the [`Transport`] trait. Two implementations ship with the crate:
//!
//! - [`NatsTransport`] for a real NATS server
//! - [`MemoryTransport`] for tests and single-process deployments

use std::time::Duration;

use async_trait::async_trait;
use futures::stream::BoxStream;

use crate::error::BrokerResult;
use crate::message::Message;

mod memory;
mod nats;

pub use memory::MemoryTransport;
pub use nats::NatsTransport;

/// Stream of deliveries for one subscription. Dropping it unsubscribes.
pub type Subscription = BoxStream<'static, Message>;

/// Subject-based messaging primitives.
#[async_trait]
pub trait Transport: Send + Sync + 'static {
    /// Publishes one message. A reply subject on the message is forwarded.
    async fn publish(&self, message: Message) -> BrokerResult<()>;

    /// Sends a request and waits up to `timeout` for the first answer.
    async fn request(&self, message: Message, timeout: Duration) -> BrokerResult<Message>;

    /// Joins queue group `queue` on `subject`.
    ///
    /// Each message is delivered to one member of the group.
    async fn queue_subscribe(&self, subject: &str, queue: &str) -> BrokerResult<Subscription>;

    /// Waits until buffered messages reached the broker.
    async fn flush(&self) -> BrokerResult<()> {
        Ok(())
    }
}
