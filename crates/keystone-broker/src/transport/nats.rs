//! NATS transport on `async-nats`.

use std::time::Duration;

use async_nats::{Client, HeaderMap, RequestErrorKind};
use async_trait::async_trait;
use futures::StreamExt;
use keystone_core::retry::{connect_with_retry, RetryPolicy};
use tracing::info;

use super::{Subscription, Transport};
use crate::error::{BrokerError, BrokerResult};
use crate::message::Message;

/// A [`Transport`] backed by a NATS connection.
#[derive(Debug, Clone)]
pub struct NatsTransport {
    client: Client,
}

impl NatsTransport {
    /// Connects to `url`, retrying with backoff per `policy`.
    pub async fn connect(url: &str, policy: &RetryPolicy) -> BrokerResult<Self> {
        let client = connect_with_retry("nats", policy, || async_nats::connect(url))
            .await
            .map_err(|err| BrokerError::Connect {
                url: url.to_string(),
                message: err.to_string(),
            })?;
        info!(url, "Connected to NATS");
        Ok(Self { client })
    }

    /// Wraps an existing connection.
    #[must_use]
    pub const fn from_client(client: Client) -> Self {
        Self { client }
    }

    /// Returns the underlying connection.
    #[must_use]
    pub const fn client(&self) -> &Client {
        &self.client
    }
}

fn to_headers(message: &Message) -> HeaderMap {
    let mut headers = HeaderMap::new();
    for (key, value) in &message.headers {
        headers.insert(key.as_str(), value.as_str());
    }
    headers
}

fn from_nats(message: async_nats::Message) -> Message {
    let mut converted = Message::new(message.subject.to_string(), message.payload);
    converted.reply = message.reply.map(|reply| reply.to_string());
    if let Some(headers) = message.headers {
        for (name, values) in headers.iter() {
            if let Some(value) = values.first() {
                converted
                    .headers
                    .insert(name.to_string(), value.as_str().to_string());
            }
        }
    }
    converted
}

#[async_trait]
impl Transport for NatsTransport {
    async fn publish(&self, message: Message) -> BrokerResult<()> {
        let headers = to_headers(&message);
        let result = match message.reply {
            Some(reply) => {
                self.client
                    .publish_with_reply_and_headers(
                        message.subject.clone(),
                        reply,
                        headers,
                        message.payload,
                    )
                    .await
            }
            None => {
                self.client
                    .publish_with_headers(message.subject.clone(), headers, message.payload)
                    .await
            }
        };
        result.map_err(|err| BrokerError::Publish {
            subject: message.subject,
            message: err.to_string(),
        })
    }

    async fn request(&self, message: Message, timeout: Duration) -> BrokerResult<Message> {
        let request = async_nats::Request::new()
            .payload(message.payload.clone())
            .headers(to_headers(&message))
            .timeout(Some(timeout));

        match self.client.send_request(message.subject.clone(), request).await {
            Ok(reply) => Ok(from_nats(reply)),
            Err(err) => Err(match err.kind() {
                RequestErrorKind::TimedOut => BrokerError::Timeout {
                    subject: message.subject,
                    timeout,
                },
                RequestErrorKind::NoResponders => BrokerError::NoResponders(message.subject),
                _ => BrokerError::Request {
                    subject: message.subject,
                    message: err.to_string(),
                },
            }),
        }
    }

    async fn queue_subscribe(&self, subject: &str, queue: &str) -> BrokerResult<Subscription> {
        let subscriber = self
            .client
            .queue_subscribe(subject.to_string(), queue.to_string())
            .await
            .map_err(|err| BrokerError::Subscribe {
                subject: subject.to_string(),
                message: err.to_string(),
            })?;
        Ok(subscriber.map(from_nats).boxed())
    }

    async fn flush(&self) -> BrokerResult<()> {
        self.client
            .flush()
            .await
            .map_err(|err| BrokerError::Publish {
                subject: String::new(),
                message: err.to_string(),
            })
    }
}
