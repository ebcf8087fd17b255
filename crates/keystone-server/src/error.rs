//! Server error types.

use std::time::Duration;

use thiserror::Error;

use crate::lifecycle::LifecycleError;

/// Failure reported by a [`Service`](crate::Service).
#[derive(Error, Debug)]
pub enum ServiceError {
    /// The listener could not be bound.
    #[error("failed to bind {addr}: {source}")]
    Bind {
        /// Requested address.
        addr: String,
        /// I/O cause.
        #[source]
        source: std::io::Error,
    },

    /// `start` was called before a successful `init`.
    #[error("service '{0}' was not initialized")]
    NotInitialized(String),

    /// Any other failure.
    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl ServiceError {
    /// Creates an error from a message.
    pub fn msg(message: impl std::fmt::Display + std::fmt::Debug + Send + Sync + 'static) -> Self {
        Self::Other(anyhow::Error::msg(message))
    }
}

/// Result type for service operations.
pub type ServiceResult<T = ()> = Result<T, ServiceError>;

/// Failure reported by the [`Platform`](crate::Platform).
#[derive(Error, Debug)]
pub enum PlatformError {
    /// A startup or shutdown hook failed.
    #[error(transparent)]
    Lifecycle(#[from] LifecycleError),

    /// A service failed to initialize; nothing was started.
    #[error("service '{service}' failed to initialize: {source}")]
    Init {
        /// Service name.
        service: String,
        /// Cause.
        #[source]
        source: ServiceError,
    },

    /// Services did not stop within the shutdown window.
    #[error("shutdown deadline of {0:?} exceeded")]
    ShutdownTimeout(Duration),

    /// `run` was called twice or configuration changed after `run`.
    #[error("platform is already running")]
    AlreadyRunning,
}

/// Result type for platform operations.
pub type PlatformResult<T = ()> = Result<T, PlatformError>;
