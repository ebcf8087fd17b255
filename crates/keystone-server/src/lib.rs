//! # Keystone Server
//!
//! Service lifecycle orchestration for the Keystone toolkit.
//!
//! A [`Platform`] supervises any number of [`Service`]s:
//!
//! - startup hooks run, then every service is initialized; any failure
//!   aborts before a single service starts
//! - the platform's middleware is injected into every service
//! - each service runs on its own task, so one failing does not stop the rest
//! - on SIGINT/SIGTERM (or a programmatic [`ShutdownSignal`]) every service
//!   is stopped concurrently inside one shutdown window, then shutdown hooks
//!   run in reverse order
//!
//! [`HttpService`] and [`RpcService`] adapt HTTP and in-process typed calls
//! to the protocol-neutral handler model from `keystone-core`.
//!
//! ## Example
//!
//! ```rust,no_run
//! use keystone_core::{FnHandler, HandlerResult, Response};
//! use keystone_middleware::{CorrelationMiddleware, LoggingMiddleware};
//! use keystone_server::{HttpService, Platform};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let handler = FnHandler::new(|_req| async { HandlerResult::Ok(Response::empty()) });
//!
//!     let platform = Platform::builder()
//!         .middleware(CorrelationMiddleware::new())
//!         .middleware(LoggingMiddleware::new())
//!         .service(HttpService::new("api", "0.0.0.0:8080", handler))
//!         .build();
//!
//!     platform.serve().await?;
//!     Ok(())
//! }
//! ```

#![doc(html_root_url = "https://docs.rs/keystone-server/0.1.0")]
#![warn(missing_docs)]
#![forbid(unsafe_code)]

pub mod adapters;
mod error;
mod health;
mod lifecycle;
mod platform;
mod resource;
mod service;
mod shutdown;

pub use adapters::http::{into_http_response, json_success, to_request, HttpBody};
pub use adapters::{unary, HttpService, RpcService};
pub use error::{PlatformError, PlatformResult, ServiceError, ServiceResult};
pub use health::{HealthReport, HealthStatus};
pub use lifecycle::{HookResult, Lifecycle, LifecycleError, LifecycleHook, LifecycleResult};
pub use platform::{Platform, PlatformBuilder, StateListener, DEFAULT_SHUTDOWN_TIMEOUT};
pub use resource::Resource;
pub use service::{Service, ServiceState};
pub use shutdown::{ConnectionToken, ConnectionTracker, ShutdownReceiver, ShutdownSignal};
