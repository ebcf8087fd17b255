//! Startup and shutdown hooks.
//!
//! Hooks own the process-scoped collaborators: a startup hook opens the
//! database pool or the broker connection, usually into a
//! [`Resource`], and the matching shutdown hook closes it.
//! [`Lifecycle::resource`] registers such a pair in one call.
//!
//! Startup hooks run in registration order before any service is
//! initialized; the first failure aborts startup. Shutdown hooks run in
//! reverse order after every service has stopped; each one runs even if an
//! earlier one failed, and the failures are reported together.
//!
//! ```rust,ignore
//! let db: Resource<Database> = Resource::new("database");
//!
//! let lifecycle = Lifecycle::new().resource(
//!     &db,
//!     move || Database::connect(&config.database),
//!     |db| async move {
//!         if let Some(db) = db.get() {
//!             db.close().await;
//!         }
//!         Ok(())
//!     },
//! );
//! ```

use std::fmt;
use std::future::Future;
use std::sync::Arc;

use keystone_core::BoxFuture;
use thiserror::Error;
use tracing::{debug, error, info};

use crate::resource::Resource;

/// Outcome of a single hook.
pub type HookResult = anyhow::Result<()>;

/// A registered hook.
pub type LifecycleHook = Arc<dyn Fn() -> BoxFuture<'static, HookResult> + Send + Sync>;

/// Hook failure reported to the [`Platform`](crate::Platform).
#[derive(Error, Debug)]
pub enum LifecycleError {
    /// A startup hook failed; later hooks did not run.
    #[error("startup hook '{hook}' failed: {source:#}")]
    Startup {
        /// Hook name.
        hook: String,
        /// Cause.
        #[source]
        source: anyhow::Error,
    },

    /// Shutdown hooks failed; every hook still ran.
    #[error("shutdown hooks failed: {}", summarize(.0))]
    Shutdown(Vec<(String, anyhow::Error)>),
}

impl LifecycleError {
    /// Returns the names of the hooks that failed.
    pub fn hooks(&self) -> Vec<&str> {
        match self {
            Self::Startup { hook, .. } => vec![hook.as_str()],
            Self::Shutdown(failures) => failures.iter().map(|(name, _)| name.as_str()).collect(),
        }
    }
}

fn summarize(failures: &[(String, anyhow::Error)]) -> String {
    failures
        .iter()
        .map(|(name, err)| format!("{name} ({err:#})"))
        .collect::<Vec<_>>()
        .join(", ")
}

/// Result type for lifecycle runs.
pub type LifecycleResult<T = ()> = Result<T, LifecycleError>;

/// Named startup and shutdown hooks.
///
/// ```rust
/// use keystone_server::Lifecycle;
///
/// let lifecycle = Lifecycle::new()
///     .on_startup("warm-cache", || async { Ok(()) })
///     .on_shutdown("flush-cache", || async { Ok(()) });
/// assert_eq!(lifecycle.startup_hooks().collect::<Vec<_>>(), ["warm-cache"]);
/// ```
#[must_use]
#[derive(Default, Clone)]
pub struct Lifecycle {
    startup: Vec<(String, LifecycleHook)>,
    shutdown: Vec<(String, LifecycleHook)>,
}

fn boxed<F, Fut>(hook: F) -> LifecycleHook
where
    F: Fn() -> Fut + Send + Sync + 'static,
    Fut: Future<Output = HookResult> + Send + 'static,
{
    Arc::new(move || Box::pin(hook()))
}

impl Lifecycle {
    /// Creates a lifecycle without hooks.
    pub fn new() -> Self {
        Self::default()
    }

    /// Runs `hook` at startup.
    pub fn on_startup<F, Fut>(mut self, name: impl Into<String>, hook: F) -> Self
    where
        F: Fn() -> Fut + Send + Sync + 'static,
        Fut: Future<Output = HookResult> + Send + 'static,
    {
        self.startup.push((name.into(), boxed(hook)));
        self
    }

    /// Runs `hook` at shutdown.
    pub fn on_shutdown<F, Fut>(mut self, name: impl Into<String>, hook: F) -> Self
    where
        F: Fn() -> Fut + Send + Sync + 'static,
        Fut: Future<Output = HookResult> + Send + 'static,
    {
        self.shutdown.push((name.into(), boxed(hook)));
        self
    }

    /// Opens `resource` at startup and hands it to `close` at shutdown.
    ///
    /// Both hooks are named after the resource.
    pub fn resource<T, E, Open, OpenFut, Close, CloseFut>(
        self,
        resource: &Resource<T>,
        open: Open,
        close: Close,
    ) -> Self
    where
        T: Send + Sync + 'static,
        E: Into<anyhow::Error>,
        Open: Fn() -> OpenFut + Send + Sync + 'static,
        OpenFut: Future<Output = Result<T, E>> + Send + 'static,
        Close: Fn(Resource<T>) -> CloseFut + Send + Sync + 'static,
        CloseFut: Future<Output = HookResult> + Send + 'static,
    {
        let name = resource.name();
        let open = Arc::new(open);
        let opened = resource.clone();
        let closed = resource.clone();

        self.on_startup(name, move || {
            let open = Arc::clone(&open);
            let resource = opened.clone();
            async move {
                resource
                    .get_or_try_init(|| open())
                    .await
                    .map(|_| ())
                    .map_err(Into::into)
            }
        })
        .on_shutdown(name, move || close(closed.clone()))
    }

    /// Returns the startup hook names in run order.
    pub fn startup_hooks(&self) -> impl Iterator<Item = &str> {
        self.startup.iter().map(|(name, _)| name.as_str())
    }

    /// Returns the shutdown hook names in run order.
    pub fn shutdown_hooks(&self) -> impl Iterator<Item = &str> {
        self.shutdown.iter().rev().map(|(name, _)| name.as_str())
    }

    /// Appends the hooks of `other`.
    pub fn merge(mut self, other: Lifecycle) -> Self {
        self.startup.extend(other.startup);
        self.shutdown.extend(other.shutdown);
        self
    }

    /// Runs the startup hooks, stopping at the first failure.
    pub async fn run_startup(&self) -> LifecycleResult {
        for (name, hook) in &self.startup {
            debug!(hook = %name, "Running startup hook");
            if let Err(source) = hook().await {
                error!(hook = %name, error = ?source, "Startup hook failed");
                return Err(LifecycleError::Startup {
                    hook: name.clone(),
                    source,
                });
            }
        }
        if !self.startup.is_empty() {
            info!(hooks = self.startup.len(), "Startup hooks completed");
        }
        Ok(())
    }

    /// Runs every shutdown hook, last registered first.
    pub async fn run_shutdown(&self) -> LifecycleResult {
        let mut failures = Vec::new();
        for (name, hook) in self.shutdown.iter().rev() {
            debug!(hook = %name, "Running shutdown hook");
            if let Err(err) = hook().await {
                error!(hook = %name, error = ?err, "Shutdown hook failed");
                failures.push((name.clone(), err));
            }
        }

        if failures.is_empty() {
            Ok(())
        } else {
            Err(LifecycleError::Shutdown(failures))
        }
    }
}

impl fmt::Debug for Lifecycle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Lifecycle")
            .field("startup", &self.startup_hooks().collect::<Vec<_>>())
            .field("shutdown", &self.shutdown_hooks().collect::<Vec<_>>())
            .finish()
    }
}
