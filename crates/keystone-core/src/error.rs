//! Error types for Keystone.
//!
//! Two layers of error exist:
//!
//! - [`AppError`] is a typed, client-visible domain error. It carries a
//!   transport status, a stable dotted code, a message and optional data, and
//!   it survives serialization so it can travel inside broker replies.
//! - [`Error`] is what handlers and middleware return. It is either a domain
//!   error or an opaque internal failure whose details stay in the logs.
//!
//! # Error codes
//!
//! | Constructor | Code | Status |
//! |---|---|---|
//! | [`AppError::query_not_found`] | `query.001` | 404 |
//! | [`AppError::query_invalid`] | `query.002` | 500 |
//! | [`AppError::mq_timeout`] | `mq.001` | 504 |
//! | [`AppError::mq_unauthorized`] | `mq.002` | 401 |
//! | [`AppError::mq_access_denied`] | `mq.003` | 403 |
//! | [`AppError::mq_wrong_access`] | `mq.004` | 403 |
//! | [`AppError::deadline_exceeded`] | `request.001` | 504 |
//! | [`AppError::cancelled`] | `request.002` | 499 |

use http::StatusCode;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Result type alias using [`AppError`].
pub type AppResult<T> = Result<T, AppError>;

/// Stable error codes.
pub mod codes {
    /// Entity not found.
    pub const QUERY_NOT_FOUND: &str = "query.001";
    /// Store failure or malformed query.
    pub const QUERY_INVALID: &str = "query.002";
    /// Broker reply did not arrive in time.
    pub const MQ_TIMEOUT: &str = "mq.001";
    /// Broker request needs an authenticated caller.
    pub const MQ_UNAUTHORIZED: &str = "mq.002";
    /// Broker request needs specific roles.
    pub const MQ_ACCESS_DENIED: &str = "mq.003";
    /// Broker request made with the wrong user type.
    pub const MQ_WRONG_ACCESS: &str = "mq.004";
    /// Request deadline elapsed.
    pub const REQUEST_TIMEOUT: &str = "request.001";
    /// Request cancelled by the caller or by shutdown.
    pub const REQUEST_CANCELLED: &str = "request.002";
}

/// Typed domain error.
///
/// # Example
///
/// ```
/// use keystone_core::AppError;
///
/// let err = AppError::query_not_found("user 42 not found");
/// assert!(err.is_query_not_found());
/// assert_eq!(err.to_string(), "query.001:user 42 not found");
/// ```
#[derive(Error, Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[error("{code}:{message}")]
pub struct AppError {
    /// Transport status (HTTP semantics).
    pub status: u16,

    /// Stable dotted error code.
    pub code: String,

    /// Human-readable message.
    pub message: String,

    /// Optional extra payload for the client.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<String>,
}

impl AppError {
    /// Creates an error with an arbitrary status, code and message.
    #[must_use]
    pub fn new(status: u16, code: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            status,
            code: code.into(),
            message: message.into(),
            data: None,
        }
    }

    /// Creates a not-found error (`query.001`, 404).
    #[must_use]
    pub fn query_not_found(message: impl Into<String>) -> Self {
        Self::new(404, codes::QUERY_NOT_FOUND, message)
    }

    /// Creates a store failure error (`query.002`, 500).
    #[must_use]
    pub fn query_invalid(message: impl Into<String>) -> Self {
        Self::new(500, codes::QUERY_INVALID, message)
    }

    /// Creates a broker timeout error (`mq.001`, 504).
    #[must_use]
    pub fn mq_timeout() -> Self {
        Self::new(
            504,
            codes::MQ_TIMEOUT,
            "response from MQ took more than 2 seconds.",
        )
    }

    /// Creates an unauthenticated broker request error (`mq.002`, 401).
    #[must_use]
    pub fn mq_unauthorized() -> Self {
        Self::new(401, codes::MQ_UNAUTHORIZED, "need authenticated for request.")
    }

    /// Creates a missing-role broker request error (`mq.003`, 403).
    #[must_use]
    pub fn mq_access_denied() -> Self {
        Self::new(403, codes::MQ_ACCESS_DENIED, "need specific roles for request")
    }

    /// Creates a wrong-user-type broker request error (`mq.004`, 403).
    #[must_use]
    pub fn mq_wrong_access() -> Self {
        Self::new(403, codes::MQ_WRONG_ACCESS, "access with wrong user type")
    }

    /// Creates a deadline error (`request.001`, 504).
    #[must_use]
    pub fn deadline_exceeded() -> Self {
        Self::new(504, codes::REQUEST_TIMEOUT, "request deadline exceeded")
    }

    /// Creates a cancellation error (`request.002`, 499).
    #[must_use]
    pub fn cancelled() -> Self {
        Self::new(499, codes::REQUEST_CANCELLED, "request cancelled")
    }

    /// Returns this error with attached data.
    #[must_use]
    pub fn with_data(mut self, data: impl Into<String>) -> Self {
        self.data = Some(data.into());
        self
    }

    /// Returns `true` for the not-found error (code and status both match).
    #[must_use]
    pub fn is_query_not_found(&self) -> bool {
        self.code == codes::QUERY_NOT_FOUND && self.status == 404
    }

    /// Returns the HTTP status, falling back to 500 for out-of-range values.
    #[must_use]
    pub fn status_code(&self) -> StatusCode {
        StatusCode::from_u16(self.status).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR)
    }
}

/// Failure returned by handlers and middleware.
///
/// Transport adapters render [`Error::App`] with its own status and message,
/// and render [`Error::Internal`] as a generic 500 without leaking details.
#[derive(Error, Debug)]
pub enum Error {
    /// Typed, client-visible domain error.
    #[error(transparent)]
    App(#[from] AppError),

    /// Unexpected failure. Details are for logs only.
    #[error("internal error: {message}")]
    Internal {
        /// Description for logs.
        message: String,
        /// Underlying cause.
        #[source]
        source: Option<anyhow::Error>,
    },
}

impl Error {
    /// Message shown to clients for any non-domain failure.
    pub const INTERNAL_MESSAGE: &'static str = "internal server error";

    /// Creates an internal error.
    #[must_use]
    pub fn internal(message: impl Into<String>) -> Self {
        Self::Internal {
            message: message.into(),
            source: None,
        }
    }

    /// Creates an internal error with a source.
    #[must_use]
    pub fn internal_with_source(
        message: impl Into<String>,
        source: impl Into<anyhow::Error>,
    ) -> Self {
        Self::Internal {
            message: message.into(),
            source: Some(source.into()),
        }
    }

    /// Returns the domain error, if this is one.
    #[must_use]
    pub const fn as_app(&self) -> Option<&AppError> {
        match self {
            Self::App(err) => Some(err),
            Self::Internal { .. } => None,
        }
    }

    /// Returns the status a transport should report.
    #[must_use]
    pub fn status_code(&self) -> StatusCode {
        match self {
            Self::App(err) => err.status_code(),
            Self::Internal { .. } => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// Returns the message safe to show to clients.
    #[must_use]
    pub fn public_message(&self) -> &str {
        match self {
            Self::App(err) => &err.message,
            Self::Internal { .. } => Self::INTERNAL_MESSAGE,
        }
    }

    /// Returns the JSON failure body for this error.
    #[must_use]
    pub fn to_body(&self) -> ErrorBody {
        ErrorBody::new(self.public_message())
    }
}

impl From<anyhow::Error> for Error {
    fn from(err: anyhow::Error) -> Self {
        Self::Internal {
            message: err.to_string(),
            source: Some(err),
        }
    }
}

/// JSON failure envelope: `{"success":false,"error":"..."}`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorBody {
    /// Always `false`.
    pub success: bool,
    /// Client-visible message.
    pub error: String,
}

impl ErrorBody {
    /// Creates a failure body.
    #[must_use]
    pub fn new(error: impl Into<String>) -> Self {
        Self {
            success: false,
            error: error.into(),
        }
    }
}

/// JSON success envelope: `{"success":true,"data":...}`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SuccessBody<T> {
    /// Always `true`.
    pub success: bool,
    /// Response data.
    pub data: T,
}

impl<T> SuccessBody<T> {
    /// Wraps data in a success body.
    pub const fn new(data: T) -> Self {
        Self {
            success: true,
            data,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_constructors_codes_and_statuses() {
        let cases = [
            (AppError::query_not_found("x"), codes::QUERY_NOT_FOUND, 404),
            (AppError::query_invalid("x"), codes::QUERY_INVALID, 500),
            (AppError::mq_timeout(), codes::MQ_TIMEOUT, 504),
            (AppError::mq_unauthorized(), codes::MQ_UNAUTHORIZED, 401),
            (AppError::mq_access_denied(), codes::MQ_ACCESS_DENIED, 403),
            (AppError::mq_wrong_access(), codes::MQ_WRONG_ACCESS, 403),
            (AppError::deadline_exceeded(), codes::REQUEST_TIMEOUT, 504),
            (AppError::cancelled(), codes::REQUEST_CANCELLED, 499),
        ];
        for (err, code, status) in cases {
            assert_eq!(err.code, code);
            assert_eq!(err.status, status);
        }
    }

    #[test]
    fn test_display_is_code_colon_message() {
        let err = AppError::mq_timeout();
        assert_eq!(
            err.to_string(),
            "mq.001:response from MQ took more than 2 seconds."
        );
    }

    #[test]
    fn test_is_query_not_found_requires_code_and_status() {
        assert!(AppError::query_not_found("gone").is_query_not_found());
        assert!(!AppError::query_invalid("bad").is_query_not_found());
        assert!(!AppError::new(500, codes::QUERY_NOT_FOUND, "odd").is_query_not_found());
    }

    #[test]
    fn test_serialization_skips_empty_data() {
        let json = serde_json::to_value(AppError::query_invalid("boom")).unwrap();
        assert_eq!(json["code"], "query.002");
        assert!(json.get("data").is_none());

        let json = serde_json::to_value(AppError::query_invalid("boom").with_data("d")).unwrap();
        assert_eq!(json["data"], "d");
    }

    #[test]
    fn test_round_trip_through_json() {
        let err = AppError::mq_access_denied().with_data("role=admin");
        let bytes = serde_json::to_vec(&err).unwrap();
        let back: AppError = serde_json::from_slice(&bytes).unwrap();
        assert_eq!(back, err);
    }

    #[test]
    fn test_status_code_fallback() {
        assert_eq!(
            AppError::new(42, "x", "y").status_code(),
            StatusCode::INTERNAL_SERVER_ERROR
        );
        assert_eq!(
            AppError::mq_unauthorized().status_code(),
            StatusCode::UNAUTHORIZED
        );
    }

    #[test]
    fn test_internal_error_hides_details() {
        let err = Error::internal_with_source("db exploded", anyhow::anyhow!("socket closed"));
        assert_eq!(err.status_code(), StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(err.public_message(), "internal server error");
        assert!(err.to_string().contains("db exploded"));
        assert!(err.as_app().is_none());
    }

    #[test]
    fn test_app_error_converts_into_error() {
        let err: Error = AppError::query_not_found("nope").into();
        assert_eq!(err.status_code(), StatusCode::NOT_FOUND);
        assert_eq!(err.public_message(), "nope");
        assert_eq!(err.to_body(), ErrorBody::new("nope"));
    }

    #[test]
    fn test_success_body_shape() {
        let json = serde_json::to_value(SuccessBody::new(7)).unwrap();
        assert_eq!(json, serde_json::json!({"success": true, "data": 7}));
    }
}
