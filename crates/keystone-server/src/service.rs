//! The unit of work the platform supervises.

use std::collections::BTreeMap;
use std::fmt;

use keystone_core::{BoxFuture, Context, Protocol};
use keystone_middleware::BoxedMiddleware;
use serde::{Deserialize, Serialize};

use crate::error::ServiceResult;

/// Lifecycle state of a [`Service`].
///
/// ```text
/// Starting ──► Running ──► Stopping ──► Stopped
///     │           │            │
///     └───────────┴────────────┴──► Failed
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ServiceState {
    /// Registered, being initialized.
    Starting,
    /// Serving.
    Running,
    /// Stop requested, draining.
    Stopping,
    /// Stopped cleanly.
    Stopped,
    /// Failed during init, start or stop.
    Failed,
}

impl ServiceState {
    /// Returns the lowercase state name.
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Starting => "starting",
            Self::Running => "running",
            Self::Stopping => "stopping",
            Self::Stopped => "stopped",
            Self::Failed => "failed",
        }
    }

    /// Returns `true` for `Stopped` and `Failed`.
    pub const fn is_terminal(&self) -> bool {
        matches!(self, Self::Stopped | Self::Failed)
    }
}

impl fmt::Display for ServiceState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A protocol server driven by the [`Platform`](crate::Platform).
///
/// The platform calls the methods in this order:
///
/// 1. [`init`](Service::init) on every service; any failure aborts startup
/// 2. [`use_middlewares`](Service::use_middlewares) with the uniform chain
/// 3. [`start`](Service::start) on its own task; it returns when the service
///    has finished serving
/// 4. [`stop`](Service::stop) on shutdown; it asks `start` to return. Its
///    context expires with the platform's shutdown window
///
/// Methods take `&self` so the platform can stop a service while its
/// `start` future is still running on another task.
pub trait Service: Send + Sync + 'static {
    /// Unique service name.
    fn name(&self) -> &str;

    /// Protocol this service accepts calls on.
    fn protocol(&self) -> Protocol;

    /// Extra fields reported by health checks.
    fn metadata(&self) -> BTreeMap<String, String> {
        BTreeMap::new()
    }

    /// Acquires what the service needs before anything starts.
    fn init(&self) -> BoxFuture<'_, ServiceResult> {
        Box::pin(async { Ok(()) })
    }

    /// Installs the middleware every call must pass through, outermost first.
    fn use_middlewares(&self, middlewares: &[BoxedMiddleware]);

    /// Serves until stopped.
    fn start(&self) -> BoxFuture<'_, ServiceResult>;

    /// Requests `start` to return.
    ///
    /// `ctx` carries the deadline of the shutdown window; a service that
    /// waits on its own cleanup should give up when it is cancelled.
    fn stop(&self, ctx: Context) -> BoxFuture<'_, ServiceResult>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_state_serializes_lowercase() {
        assert_eq!(serde_json::to_string(&ServiceState::Running).unwrap(), "\"running\"");
        assert_eq!(ServiceState::Failed.to_string(), "failed");
        assert!(ServiceState::Stopped.is_terminal());
        assert!(!ServiceState::Stopping.is_terminal());
    }
}
