//! Protocol-neutral request and response envelopes.

use crate::context::Context;
use crate::error::AppError;
use bytes::Bytes;
use http::StatusCode;
use serde::Serialize;
use std::any::Any;
use std::collections::HashMap;
use std::fmt;

/// String-keyed metadata carried by requests and responses.
///
/// HTTP headers, RPC metadata and broker headers all land here.
pub type Metadata = HashMap<String, String>;

/// The protocol an inbound call arrived on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Protocol {
    /// HTTP request.
    Http,
    /// Unary RPC call.
    Rpc,
    /// Message delivered by a broker subscription.
    Broker,
}

impl Protocol {
    /// Returns the lowercase protocol tag.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Http => "http",
            Self::Rpc => "rpc",
            Self::Broker => "broker",
        }
    }
}

impl fmt::Display for Protocol {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Opaque call payload.
///
/// Byte-oriented transports (HTTP, broker) use [`Payload::Bytes`]; object
/// transports (RPC) hand the already-decoded message over as
/// [`Payload::Native`].
#[derive(Default)]
pub enum Payload {
    /// No payload.
    #[default]
    Empty,
    /// Raw bytes.
    Bytes(Bytes),
    /// A typed value owned by the transport.
    Native(Box<dyn Any + Send + Sync>),
}

impl Payload {
    /// Wraps a typed value.
    pub fn native<T: Any + Send + Sync>(value: T) -> Self {
        Self::Native(Box::new(value))
    }

    /// Serializes a value to JSON bytes.
    pub fn json<T: Serialize>(value: &T) -> serde_json::Result<Self> {
        serde_json::to_vec(value).map(|v| Self::Bytes(Bytes::from(v)))
    }

    /// Returns the bytes, if this is a byte payload.
    #[must_use]
    pub const fn as_bytes(&self) -> Option<&Bytes> {
        match self {
            Self::Bytes(b) => Some(b),
            _ => None,
        }
    }

    /// Borrows the typed value, if this is a native payload of type `T`.
    #[must_use]
    pub fn downcast_ref<T: Any>(&self) -> Option<&T> {
        match self {
            Self::Native(v) => v.downcast_ref::<T>(),
            _ => None,
        }
    }

    /// Takes the typed value out of a native payload of type `T`.
    ///
    /// Returns the payload unchanged on mismatch.
    pub fn downcast<T: Any>(self) -> Result<T, Self> {
        match self {
            Self::Native(v) => v.downcast::<T>().map(|b| *b).map_err(Self::Native),
            other => Err(other),
        }
    }

    /// Consumes the payload into bytes; non-byte payloads become empty.
    #[must_use]
    pub fn into_bytes(self) -> Bytes {
        match self {
            Self::Bytes(b) => b,
            _ => Bytes::new(),
        }
    }

    /// Returns `true` for [`Payload::Empty`].
    #[must_use]
    pub const fn is_empty(&self) -> bool {
        matches!(self, Self::Empty)
    }
}

impl fmt::Debug for Payload {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Empty => f.write_str("Empty"),
            Self::Bytes(b) => f.debug_tuple("Bytes").field(&b.len()).finish(),
            Self::Native(_) => f.write_str("Native(..)"),
        }
    }
}

impl From<Bytes> for Payload {
    fn from(bytes: Bytes) -> Self {
        Self::Bytes(bytes)
    }
}

impl From<Vec<u8>> for Payload {
    fn from(bytes: Vec<u8>) -> Self {
        Self::Bytes(Bytes::from(bytes))
    }
}

/// An inbound call, independent of the protocol it arrived on.
///
/// The payload is read-only once the request is built. Middleware may only
/// augment the metadata and the context.
#[derive(Debug)]
pub struct Request {
    context: Context,
    protocol: Protocol,
    method: String,
    path: String,
    payload: Payload,
    metadata: Metadata,
}

impl Request {
    /// Creates a request with a fresh context and empty metadata.
    #[must_use]
    pub fn new(
        protocol: Protocol,
        method: impl Into<String>,
        path: impl Into<String>,
        payload: Payload,
    ) -> Self {
        Self {
            context: Context::new(),
            protocol,
            method: method.into(),
            path: path.into(),
            payload,
            metadata: Metadata::new(),
        }
    }

    /// Returns the request with the given context.
    #[must_use]
    pub fn with_context(mut self, context: Context) -> Self {
        self.context = context;
        self
    }

    /// Returns the request with an additional metadata entry.
    #[must_use]
    pub fn with_metadata(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.metadata.insert(key.into(), value.into());
        self
    }

    /// Returns the execution context.
    #[must_use]
    pub const fn context(&self) -> &Context {
        &self.context
    }

    /// Returns the execution context mutably.
    pub fn context_mut(&mut self) -> &mut Context {
        &mut self.context
    }

    /// Returns the protocol tag.
    #[must_use]
    pub const fn protocol(&self) -> Protocol {
        self.protocol
    }

    /// Returns the method or operation identifier.
    #[must_use]
    pub fn method(&self) -> &str {
        &self.method
    }

    /// Returns the path or subject.
    #[must_use]
    pub fn path(&self) -> &str {
        &self.path
    }

    /// Returns the payload.
    #[must_use]
    pub const fn payload(&self) -> &Payload {
        &self.payload
    }

    /// Consumes the request and returns its payload.
    #[must_use]
    pub fn into_payload(self) -> Payload {
        self.payload
    }

    /// Consumes the request into its context and payload.
    #[must_use]
    pub fn into_parts(self) -> (Context, Payload) {
        (self.context, self.payload)
    }

    /// Returns the metadata.
    #[must_use]
    pub const fn metadata(&self) -> &Metadata {
        &self.metadata
    }

    /// Returns the metadata mutably.
    pub fn metadata_mut(&mut self) -> &mut Metadata {
        &mut self.metadata
    }

    /// Returns a single metadata value.
    #[must_use]
    pub fn metadata_value(&self, key: &str) -> Option<&str> {
        self.metadata.get(key).map(String::as_str)
    }
}

/// The result of a call, independent of protocol.
#[derive(Debug, Default)]
pub struct Response {
    payload: Payload,
    error: Option<AppError>,
    metadata: Metadata,
    status: Option<StatusCode>,
}

impl Response {
    /// Creates a response with the given payload.
    #[must_use]
    pub fn new(payload: Payload) -> Self {
        Self {
            payload,
            ..Self::default()
        }
    }

    /// Creates an empty response.
    #[must_use]
    pub fn empty() -> Self {
        Self::default()
    }

    /// Creates a response carrying a typed value.
    pub fn native<T: std::any::Any + Send + Sync>(value: T) -> Self {
        Self::new(Payload::native(value))
    }

    /// Creates a response whose payload is `value` serialized as JSON.
    pub fn json<T: Serialize>(value: &T) -> serde_json::Result<Self> {
        Payload::json(value).map(Self::new)
    }

    /// Creates a response carrying a domain error.
    #[must_use]
    pub fn from_error(error: AppError) -> Self {
        let status = error.status_code();
        Self {
            error: Some(error),
            status: Some(status),
            ..Self::default()
        }
    }

    /// Returns the response with the given transport status.
    #[must_use]
    pub fn with_status(mut self, status: StatusCode) -> Self {
        self.status = Some(status);
        self
    }

    /// Returns the response with an additional metadata entry.
    #[must_use]
    pub fn with_metadata(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.metadata.insert(key.into(), value.into());
        self
    }

    /// Returns the payload.
    #[must_use]
    pub const fn payload(&self) -> &Payload {
        &self.payload
    }

    /// Consumes the response and returns its payload.
    #[must_use]
    pub fn into_payload(self) -> Payload {
        self.payload
    }

    /// Returns the carried domain error, if any.
    #[must_use]
    pub const fn error(&self) -> Option<&AppError> {
        self.error.as_ref()
    }

    /// Returns the metadata.
    #[must_use]
    pub const fn metadata(&self) -> &Metadata {
        &self.metadata
    }

    /// Returns the metadata mutably.
    pub fn metadata_mut(&mut self) -> &mut Metadata {
        &mut self.metadata
    }

    /// Returns the transport status, if one was set.
    #[must_use]
    pub const fn status(&self) -> Option<StatusCode> {
        self.status
    }

    /// Consumes the response into its parts.
    #[must_use]
    pub fn into_parts(self) -> (Payload, Option<AppError>, Metadata, Option<StatusCode>) {
        (self.payload, self.error, self.metadata, self.status)
    }
}
