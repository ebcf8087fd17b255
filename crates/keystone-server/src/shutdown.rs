//! Shutdown coordination.
//!
//! [`ShutdownSignal`] is what the [`Platform`](crate::Platform) blocks on.
//! SIGINT/SIGTERM fire it when OS signals are enabled; any clone can fire it
//! with [`ShutdownSignal::trigger`]. It is a [`CancellationToken`] underneath,
//! so request contexts derived from it with [`ShutdownSignal::context`] are
//! cancelled with the process.
//!
//! [`ConnectionTracker`] counts in-flight connections so an adapter can drain
//! them before it reports itself stopped.

use std::sync::{Arc, OnceLock};

use keystone_core::Context;
use tokio::sync::watch;
use tokio_util::sync::{CancellationToken, WaitForCancellationFutureOwned};
use tracing::{error, info};

/// Future returned by [`ShutdownSignal::recv`].
pub type ShutdownReceiver = WaitForCancellationFutureOwned;

/// A cloneable, idempotent shutdown trigger.
///
/// ```rust
/// use keystone_server::ShutdownSignal;
///
/// let shutdown = ShutdownSignal::new();
/// let remote = shutdown.clone();
///
/// remote.trigger();
/// remote.trigger();
/// assert!(shutdown.is_triggered());
/// assert_eq!(shutdown.cause(), Some("trigger"));
/// ```
#[derive(Debug, Clone, Default)]
pub struct ShutdownSignal {
    token: CancellationToken,
    cause: Arc<OnceLock<&'static str>>,
}

impl ShutdownSignal {
    /// Creates a signal that has not fired.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Fires the signal. Later calls are no-ops.
    pub fn trigger(&self) {
        self.fire("trigger");
    }

    fn fire(&self, cause: &'static str) {
        if self.cause.set(cause).is_ok() {
            self.token.cancel();
        }
    }

    /// Returns `true` once the signal has fired.
    #[must_use]
    pub fn is_triggered(&self) -> bool {
        self.token.is_cancelled()
    }

    /// Returns what fired the signal: `"trigger"`, `"SIGINT"` or `"SIGTERM"`.
    #[must_use]
    pub fn cause(&self) -> Option<&'static str> {
        self.cause.get().copied()
    }

    /// Resolves once the signal fires, immediately if it already has.
    pub fn recv(&self) -> ShutdownReceiver {
        self.token.clone().cancelled_owned()
    }

    /// Returns a fresh request context cancelled by this signal.
    #[must_use]
    pub fn context(&self) -> Context {
        Context::with_token(self.token.child_token())
    }

    /// Fires this signal on SIGINT or SIGTERM.
    ///
    /// Must be called inside a tokio runtime. If the handlers cannot be
    /// installed the failure is logged and only [`ShutdownSignal::trigger`]
    /// can stop the platform.
    pub fn listen_os_signals(&self) {
        let signal = self.clone();
        tokio::spawn(async move {
            tokio::select! {
                received = os_signal() => match received {
                    Ok(name) => {
                        info!(signal = name, "Received signal, shutting down");
                        signal.fire(name);
                    }
                    Err(err) => error!(error = %err, "Failed to install signal handlers"),
                },
                () = signal.token.cancelled() => {}
            }
        });
    }
}

#[cfg(unix)]
async fn os_signal() -> std::io::Result<&'static str> {
    use tokio::signal::unix::{signal, SignalKind};

    let mut terminate = signal(SignalKind::terminate())?;
    let mut interrupt = signal(SignalKind::interrupt())?;
    tokio::select! {
        _ = terminate.recv() => Ok("SIGTERM"),
        _ = interrupt.recv() => Ok("SIGINT"),
    }
}

#[cfg(not(unix))]
async fn os_signal() -> std::io::Result<&'static str> {
    tokio::signal::ctrl_c().await?;
    Ok("SIGINT")
}

/// Counts live connections.
///
/// ```rust
/// use keystone_server::ConnectionTracker;
///
/// let tracker = ConnectionTracker::new();
/// let token = tracker.acquire();
/// assert_eq!(tracker.active_connections(), 1);
///
/// drop(token);
/// assert_eq!(tracker.active_connections(), 0);
/// ```
#[derive(Debug, Clone)]
pub struct ConnectionTracker {
    active: Arc<watch::Sender<usize>>,
}

impl ConnectionTracker {
    /// Creates a tracker with no connections.
    #[must_use]
    pub fn new() -> Self {
        Self {
            active: Arc::new(watch::Sender::new(0)),
        }
    }

    /// Registers a connection until the token is dropped.
    #[must_use]
    pub fn acquire(&self) -> ConnectionToken {
        self.active.send_modify(|n| *n += 1);
        ConnectionToken {
            active: Arc::clone(&self.active),
        }
    }

    /// Returns the number of live connections.
    #[must_use]
    pub fn active_connections(&self) -> usize {
        *self.active.borrow()
    }

    /// Waits until every token is dropped.
    pub async fn wait_idle(&self) {
        let mut idle = self.active.subscribe();
        // The sender lives in `self`, so the channel cannot close here.
        let _ = idle.wait_for(|n| *n == 0).await;
    }
}

impl Default for ConnectionTracker {
    fn default() -> Self {
        Self::new()
    }
}

/// A live connection registered with a [`ConnectionTracker`].
#[derive(Debug)]
pub struct ConnectionToken {
    active: Arc<watch::Sender<usize>>,
}

impl Drop for ConnectionToken {
    fn drop(&mut self) {
        self.active.send_modify(|n| *n -= 1);
    }
}
