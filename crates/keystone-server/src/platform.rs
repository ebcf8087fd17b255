//! Service orchestration.
//!
//! The [`Platform`] owns every [`Service`] of a process. It runs the
//! startup hooks, initializes the services (fail-fast), installs the
//! uniform middleware chain, starts each service on its own task and then
//! waits for the [`ShutdownSignal`]. [`Platform::shutdown`] stops every
//! service within a bounded window and runs the shutdown hooks.
//!
//! # Example
//!
//! ```rust,ignore
//! use keystone_server::{HttpService, Platform};
//! use keystone_middleware::{CorrelationMiddleware, LoggingMiddleware};
//!
//! let platform = Platform::builder()
//!     .config(&config)
//!     .service(HttpService::new("api", config.app.listen_addr(), router))
//!     .middleware(CorrelationMiddleware::new())
//!     .middleware(LoggingMiddleware::new())
//!     .build();
//!
//! platform.serve().await?;
//! ```

use std::collections::HashMap;
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use futures::future::join_all;
use keystone_config::KeystoneConfig;
use keystone_core::Context;
use keystone_middleware::{BoxedMiddleware, Middleware};
use parking_lot::{Mutex, RwLock};
use tokio::task::JoinHandle;
use tracing::{error, info, warn};

use crate::error::{PlatformError, PlatformResult};
use crate::health::{HealthReport, HealthStatus};
use crate::lifecycle::Lifecycle;
use crate::service::{Service, ServiceState};
use crate::shutdown::ShutdownSignal;

/// Default bound on [`Platform::shutdown`].
pub const DEFAULT_SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(30);

/// Callback fired on every state transition with `(service, old, new)`.
pub type StateListener = Arc<dyn Fn(&str, ServiceState, ServiceState) + Send + Sync>;

struct Entry {
    state: ServiceState,
    started: Option<(DateTime<Utc>, Instant)>,
}

struct Registry {
    entries: RwLock<HashMap<String, Entry>>,
    listeners: Vec<StateListener>,
}

impl Registry {
    fn register(&self, name: &str) {
        let previous = self.entries.write().insert(
            name.to_string(),
            Entry {
                state: ServiceState::Starting,
                started: None,
            },
        );
        if previous.is_some() {
            warn!(service = name, "Duplicate service name; health reports will merge them");
        }
    }

    fn state(&self, name: &str) -> Option<ServiceState> {
        self.entries.read().get(name).map(|e| e.state)
    }

    /// Moves `name` to `to` if `allowed` accepts the current state.
    fn transition_if(&self, name: &str, to: ServiceState, allowed: fn(ServiceState) -> bool) {
        let from = {
            let mut entries = self.entries.write();
            let Some(entry) = entries.get_mut(name) else {
                return;
            };
            if entry.state == to || !allowed(entry.state) {
                return;
            }
            let from = entry.state;
            entry.state = to;
            if to == ServiceState::Running {
                entry.started = Some((Utc::now(), Instant::now()));
            }
            from
        };

        info!(service = name, from = %from, to = %to, "Service state changed");
        for listener in &self.listeners {
            listener(name, from, to);
        }
    }

    fn transition(&self, name: &str, to: ServiceState) {
        self.transition_if(name, to, |_| true);
    }
}

/// Top-level orchestrator of a process's services.
///
/// Built with [`Platform::builder`]. `run` and `shutdown` take `&self`, so a
/// platform shared through an `Arc` can be stopped from another task.
pub struct Platform {
    services: Vec<Arc<dyn Service>>,
    middlewares: Mutex<Vec<BoxedMiddleware>>,
    lifecycle: Lifecycle,
    shutdown_timeout: Duration,
    signal: ShutdownSignal,
    os_signals: bool,
    version: String,
    registry: Arc<Registry>,
    tasks: Mutex<Vec<(String, JoinHandle<()>)>>,
    running: AtomicBool,
}

impl Platform {
    /// Creates a builder.
    #[must_use]
    pub fn builder() -> PlatformBuilder {
        PlatformBuilder::new()
    }

    /// Appends middleware to the chain every service is wrapped with.
    ///
    /// Fails with [`PlatformError::AlreadyRunning`] once `run` was called.
    pub fn use_middlewares(
        &self,
        middlewares: impl IntoIterator<Item = BoxedMiddleware>,
    ) -> PlatformResult {
        if self.running.load(Ordering::SeqCst) {
            return Err(PlatformError::AlreadyRunning);
        }
        self.middlewares.lock().extend(middlewares);
        Ok(())
    }

    /// Appends one middleware; see [`Platform::use_middlewares`].
    pub fn use_middleware<M: Middleware>(&self, middleware: M) -> PlatformResult {
        self.use_middlewares([Arc::new(middleware) as BoxedMiddleware])
    }

    /// Returns a handle that stops [`Platform::run`] when triggered.
    #[must_use]
    pub fn shutdown_signal(&self) -> ShutdownSignal {
        self.signal.clone()
    }

    /// Returns the shutdown window.
    #[must_use]
    pub const fn shutdown_timeout(&self) -> Duration {
        self.shutdown_timeout
    }

    /// Starts every service and waits for the shutdown signal.
    ///
    /// Startup hooks run first, then `init` on every service. Any failure in
    /// either aborts before a single service is started. A service whose
    /// `start` fails is marked [`ServiceState::Failed`] without affecting
    /// the others.
    pub async fn run(&self) -> PlatformResult {
        if self.running.swap(true, Ordering::SeqCst) {
            return Err(PlatformError::AlreadyRunning);
        }
        if self.os_signals {
            self.signal.listen_os_signals();
        }

        info!(services = self.services.len(), version = %self.version, "Starting platform");
        self.lifecycle.run_startup().await?;

        for service in &self.services {
            if let Err(source) = service.init().await {
                error!(service = service.name(), error = %source, "Service failed to initialize");
                self.registry.transition(service.name(), ServiceState::Failed);
                if let Err(err) = self.lifecycle.run_shutdown().await {
                    warn!(error = %err, "Shutdown hooks failed after aborted startup");
                }
                return Err(PlatformError::Init {
                    service: service.name().to_string(),
                    source,
                });
            }
        }

        let middlewares = self.middlewares.lock().clone();
        for service in &self.services {
            service.use_middlewares(&middlewares);
        }

        {
            let mut tasks = self.tasks.lock();
            for service in &self.services {
                let name = service.name().to_string();
                tasks.push((name, self.spawn(Arc::clone(service))));
            }
        }

        info!("Platform running");
        self.signal.recv().await;
        info!(cause = self.signal.cause().unwrap_or("unknown"), "Shutdown signal received");
        Ok(())
    }

    fn spawn(&self, service: Arc<dyn Service>) -> JoinHandle<()> {
        let registry = Arc::clone(&self.registry);
        registry.transition(service.name(), ServiceState::Running);

        tokio::spawn(async move {
            match service.start().await {
                Ok(()) => registry.transition_if(service.name(), ServiceState::Stopped, |s| {
                    s != ServiceState::Failed
                }),
                Err(err) => {
                    error!(service = service.name(), error = %err, "Service failed");
                    registry.transition(service.name(), ServiceState::Failed);
                }
            }
        })
    }

    /// Stops every service within the shutdown window.
    ///
    /// `stop` is called on all services concurrently with a context whose
    /// deadline is the end of the window; a failure is logged and marks that
    /// service [`ServiceState::Failed`] without interrupting the others.
    /// Returns [`PlatformError::ShutdownTimeout`] if the services have not
    /// all finished when the window elapses. Services still running at that
    /// point are abandoned, not killed: their tasks stay detached and run to
    /// completion on their own. Shutdown hooks run afterwards either way.
    pub async fn shutdown(&self) -> PlatformResult {
        self.signal.trigger();
        info!(timeout = ?self.shutdown_timeout, "Shutting down platform");

        let tasks = std::mem::take(&mut *self.tasks.lock());
        let window = Context::new().with_timeout(self.shutdown_timeout);

        let stop_all = async {
            let stops = self.services.iter().map(|service| {
                let ctx = window.child();
                async move {
                    self.registry
                        .transition_if(service.name(), ServiceState::Stopping, |s| {
                            s == ServiceState::Running
                        });
                    if let Err(err) = service.stop(ctx).await {
                        error!(service = service.name(), error = %err, "Service failed to stop");
                        self.registry.transition(service.name(), ServiceState::Failed);
                    }
                }
            });
            join_all(stops).await;

            let names: Vec<_> = tasks.iter().map(|(name, _)| name.clone()).collect();
            let results = join_all(tasks.into_iter().map(|(_, task)| task)).await;
            for (name, result) in names.iter().zip(results) {
                if let Err(err) = result {
                    error!(service = %name, error = %err, "Service task panicked");
                    self.registry.transition(name, ServiceState::Failed);
                }
            }
        };

        let outcome = match tokio::time::timeout(self.shutdown_timeout, stop_all).await {
            Ok(()) => Ok(()),
            Err(_) => {
                let pending: Vec<_> = self
                    .states()
                    .into_iter()
                    .filter(|(_, state)| !state.is_terminal())
                    .map(|(name, _)| name)
                    .collect();
                error!(?pending, "Shutdown deadline exceeded, abandoning services");
                Err(PlatformError::ShutdownTimeout(self.shutdown_timeout))
            }
        };

        let hooks = self.lifecycle.run_shutdown().await;
        self.running.store(false, Ordering::SeqCst);

        outcome?;
        hooks?;
        info!("Platform stopped");
        Ok(())
    }

    /// Runs until the shutdown signal, then shuts down.
    pub async fn serve(&self) -> PlatformResult {
        self.run().await?;
        self.shutdown().await
    }

    /// Returns the state of one service.
    #[must_use]
    pub fn service_state(&self, name: &str) -> Option<ServiceState> {
        self.registry.state(name)
    }

    /// Returns every service's state in registration order.
    #[must_use]
    pub fn states(&self) -> Vec<(String, ServiceState)> {
        self.services
            .iter()
            .filter_map(|s| {
                self.registry
                    .state(s.name())
                    .map(|state| (s.name().to_string(), state))
            })
            .collect()
    }

    /// Reports the health of every service.
    #[must_use]
    pub fn health(&self) -> HealthReport {
        let entries = self.registry.entries.read();
        let statuses = self
            .services
            .iter()
            .map(|service| {
                let entry = entries.get(service.name());
                let state = entry.map_or(ServiceState::Starting, |e| e.state);
                let status = HealthStatus::new(
                    service.name(),
                    state,
                    service.protocol().as_str(),
                    self.version.as_str(),
                )
                .with_metadata(service.metadata());
                match entry.and_then(|e| e.started) {
                    Some((at, instant)) => status.with_uptime(at, instant.elapsed()),
                    None => status,
                }
            })
            .collect();
        HealthReport::new(statuses)
    }
}

impl fmt::Debug for Platform {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Platform")
            .field("services", &self.services.iter().map(|s| s.name()).collect::<Vec<_>>())
            .field("middlewares", &self.middlewares.lock().len())
            .field("shutdown_timeout", &self.shutdown_timeout)
            .field("lifecycle", &self.lifecycle)
            .finish_non_exhaustive()
    }
}

/// Builder for [`Platform`].
#[must_use]
pub struct PlatformBuilder {
    services: Vec<Arc<dyn Service>>,
    middlewares: Vec<BoxedMiddleware>,
    lifecycle: Lifecycle,
    shutdown_timeout: Duration,
    signal: Option<ShutdownSignal>,
    listeners: Vec<StateListener>,
    version: String,
}

impl Default for PlatformBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl PlatformBuilder {
    /// Creates a builder with the default shutdown window and OS signals.
    pub fn new() -> Self {
        Self {
            services: Vec::new(),
            middlewares: Vec::new(),
            lifecycle: Lifecycle::new(),
            shutdown_timeout: DEFAULT_SHUTDOWN_TIMEOUT,
            signal: None,
            listeners: Vec::new(),
            version: env!("CARGO_PKG_VERSION").to_string(),
        }
    }

    /// Applies the shutdown window and version from configuration.
    pub fn config(mut self, config: &KeystoneConfig) -> Self {
        self.shutdown_timeout = config.server.shutdown_timeout();
        self.version = config.app.version.clone();
        self
    }

    /// Adds a service.
    pub fn service<S: Service>(self, service: S) -> Self {
        self.service_arc(Arc::new(service))
    }

    /// Adds a shared service.
    pub fn service_arc(mut self, service: Arc<dyn Service>) -> Self {
        self.services.push(service);
        self
    }

    /// Appends a middleware to the uniform chain.
    pub fn middleware<M: Middleware>(mut self, middleware: M) -> Self {
        self.middlewares.push(Arc::new(middleware));
        self
    }

    /// Sets the bound on [`Platform::shutdown`].
    pub fn shutdown_timeout(mut self, timeout: Duration) -> Self {
        self.shutdown_timeout = timeout;
        self
    }

    /// Uses `signal` instead of SIGINT/SIGTERM.
    pub fn shutdown_signal(mut self, signal: ShutdownSignal) -> Self {
        self.signal = Some(signal);
        self
    }

    /// Registers a state-change callback.
    pub fn on_state_change<F>(mut self, listener: F) -> Self
    where
        F: Fn(&str, ServiceState, ServiceState) + Send + Sync + 'static,
    {
        self.listeners.push(Arc::new(listener));
        self
    }

    /// Adds startup and shutdown hooks.
    pub fn lifecycle(mut self, lifecycle: Lifecycle) -> Self {
        self.lifecycle = self.lifecycle.merge(lifecycle);
        self
    }

    /// Sets the version reported by health checks.
    pub fn version(mut self, version: impl Into<String>) -> Self {
        self.version = version.into();
        self
    }

    /// Builds the platform.
    pub fn build(self) -> Platform {
        let registry = Registry {
            entries: RwLock::new(HashMap::new()),
            listeners: self.listeners,
        };
        for service in &self.services {
            registry.register(service.name());
        }

        let os_signals = self.signal.is_none();
        Platform {
            services: self.services,
            middlewares: Mutex::new(self.middlewares),
            lifecycle: self.lifecycle,
            shutdown_timeout: self.shutdown_timeout,
            signal: self.signal.unwrap_or_default(),
            os_signals,
            version: self.version,
            registry: Arc::new(registry),
            tasks: Mutex::new(Vec::new()),
            running: AtomicBool::new(false),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_builder_defaults() {
        let platform = Platform::builder().build();
        assert_eq!(platform.shutdown_timeout(), DEFAULT_SHUTDOWN_TIMEOUT);
        assert!(platform.states().is_empty());
        assert_eq!(platform.health().status(), "unhealthy");
    }

    #[test]
    fn test_builder_reads_config() {
        let mut config = KeystoneConfig::default();
        config.server.shutdown_timeout_secs = 5;
        config.app.version = "2.3.4".into();

        let platform = Platform::builder().config(&config).build();
        assert_eq!(platform.shutdown_timeout(), Duration::from_secs(5));
        assert_eq!(platform.version, "2.3.4");
    }
}
