//! Broker error types.

use std::time::Duration;

use keystone_core::{AppError, Error};
use thiserror::Error;

/// Failure of a broker operation.
#[derive(Error, Debug)]
pub enum BrokerError {
    /// The broker could not be reached.
    #[error("failed to connect to {url}: {message}")]
    Connect {
        /// Broker URL.
        url: String,
        /// Cause.
        message: String,
    },

    /// A message could not be published.
    #[error("failed to publish to {subject}: {message}")]
    Publish {
        /// Target subject.
        subject: String,
        /// Cause.
        message: String,
    },

    /// No reply arrived within the bound.
    #[error("request to {subject} timed out after {timeout:?}")]
    Timeout {
        /// Target subject.
        subject: String,
        /// Bound that elapsed.
        timeout: Duration,
    },

    /// Nobody is subscribed to the subject.
    #[error("no responders for {0}")]
    NoResponders(String),

    /// A request failed for another reason.
    #[error("request to {subject} failed: {message}")]
    Request {
        /// Target subject.
        subject: String,
        /// Cause.
        message: String,
    },

    /// A subscription could not be created.
    #[error("failed to subscribe to {subject}: {message}")]
    Subscribe {
        /// Subject.
        subject: String,
        /// Cause.
        message: String,
    },

    /// A payload could not be encoded or decoded.
    #[error("invalid payload: {0}")]
    Codec(#[from] serde_json::Error),

    /// The caller's context was cancelled while waiting.
    #[error("request cancelled")]
    Cancelled,
}

impl BrokerError {
    /// Returns `true` for [`BrokerError::Timeout`].
    #[must_use]
    pub const fn is_timeout(&self) -> bool {
        matches!(self, Self::Timeout { .. })
    }
}

impl From<BrokerError> for Error {
    fn from(err: BrokerError) -> Self {
        match err {
            BrokerError::Timeout { .. } => Self::App(AppError::mq_timeout()),
            BrokerError::Cancelled => Self::App(AppError::cancelled()),
            other => Self::internal_with_source("broker failure", other),
        }
    }
}

/// Result type for broker operations.
pub type BrokerResult<T> = Result<T, BrokerError>;

#[cfg(test)]
mod tests {
    use super::*;
    use keystone_core::codes;

    #[test]
    fn test_timeout_maps_to_mq_timeout() {
        let err: Error = BrokerError::Timeout {
            subject: "users.get".into(),
            timeout: Duration::from_secs(2),
        }
        .into();
        let app = err.as_app().unwrap();
        assert_eq!(app.code, codes::MQ_TIMEOUT);
        assert_eq!(app.status, 504);
    }

    #[test]
    fn test_transport_faults_are_internal() {
        let err: Error = BrokerError::NoResponders("users.get".into()).into();
        assert!(err.as_app().is_none());
        assert_eq!(err.public_message(), Error::INTERNAL_MESSAGE);
    }
}
