//! Broker message envelope.

use bytes::Bytes;
use keystone_core::{Metadata, CORRELATION_ID_KEY};

/// A message as seen by every [`Transport`](crate::Transport).
///
/// `reply` is set on requests; answering means publishing to that subject.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Message {
    /// Subject the message was published on.
    pub subject: String,
    /// Inbox awaiting an answer, for requests.
    pub reply: Option<String>,
    /// Header map.
    pub headers: Metadata,
    /// Raw payload.
    pub payload: Bytes,
}

impl Message {
    /// Creates a message without headers or reply subject.
    pub fn new(subject: impl Into<String>, payload: impl Into<Bytes>) -> Self {
        Self {
            subject: subject.into(),
            reply: None,
            headers: Metadata::new(),
            payload: payload.into(),
        }
    }

    /// Adds a header.
    #[must_use]
    pub fn with_header(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.insert(key.into(), value.into());
        self
    }

    /// Sets the reply subject.
    #[must_use]
    pub fn with_reply(mut self, reply: impl Into<String>) -> Self {
        self.reply = Some(reply.into());
        self
    }

    /// Returns a header value.
    pub fn header(&self, key: &str) -> Option<&str> {
        self.headers.get(key).map(String::as_str)
    }

    /// Returns the `correlation-id` header.
    pub fn correlation_id(&self) -> Option<&str> {
        self.header(CORRELATION_ID_KEY)
    }
}
