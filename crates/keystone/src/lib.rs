//! # Keystone
//!
//! **Multi-protocol backend service toolkit**
//!
//! Keystone bundles the pieces a backend service is usually built from:
//!
//! - **Protocol-neutral handlers** - one [`Request`](core::Request) /
//!   [`Response`](core::Response) model for HTTP, RPC and broker calls
//! - **Composable middleware** - correlation ids, structured logs, metrics
//!   and deadlines applied uniformly to every service
//! - **Supervised lifecycle** - a [`Platform`](server::Platform) that starts
//!   services concurrently and stops them inside a bounded window
//! - **Transactional repositories** - generic CRUD over PostgreSQL and SQLite
//!   with audit stamping and soft delete
//! - **Messaging** - NATS request/reply and publish/subscribe with
//!   correlation ids and bounded waits
//!
//! ## Quick Start
//!
//! ```rust,ignore
//! use keystone::prelude::*;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let config = ConfigLoader::new().with_defaults().with_env_prefix("APP").load()?;
//!     let json = config.logging.format == LogFormat::Json;
//!     init_logging(&LogConfig::new(config.logging.level.clone()).json(json))?;
//!
//!     let client = MessageClient::connect(&config.broker).await?;
//!     let users = BrokerService::new("users", client)
//!         .operation("users.get", use_case(get_user));
//!
//!     Platform::builder()
//!         .config(&config)
//!         .middleware(CorrelationMiddleware::new())
//!         .middleware(LoggingMiddleware::new())
//!         .service(users)
//!         .build()
//!         .serve()
//!         .await?;
//!     Ok(())
//! }
//! ```
//!
//! ## Request flow
//!
//! ```text
//! transport -> Request -> m[0] -> m[1] -> ... -> handler
//!                                                  |
//! transport <- Response <- m[0] <- m[1] <- ... <---+
//! ```

#![doc(html_root_url = "https://docs.rs/keystone/0.1.0")]
#![warn(missing_docs)]
#![forbid(unsafe_code)]

// Re-export core types
pub use keystone_core as core;

// Re-export platform and transport adapters
pub use keystone_server as server;

// Re-export middleware types
pub use keystone_middleware as middleware;

// Re-export repositories
pub use keystone_data as data;

// Re-export messaging
pub use keystone_broker as broker;

// Re-export configuration
pub use keystone_config as config;

// Re-export logging and metrics
pub use keystone_telemetry as telemetry;

/// Prelude module for convenient imports.
///
/// # Example
///
/// ```rust
/// use keystone::prelude::*;
///
/// let err = AppError::query_not_found("user not found");
/// assert!(err.is_query_not_found());
/// ```
pub mod prelude {
    pub use keystone_core::{
        AppError, AppResult, BoxFuture, Context, Error, FnHandler, Handler, HandlerResult,
        Payload, Principal, Protocol, Request, Response, CORRELATION_ID_KEY,
    };

    pub use keystone_middleware::{
        compose, CorrelationMiddleware, DeadlineMiddleware, FnMiddleware, LoggingMiddleware,
        MetricsMiddleware, Middleware, Next,
    };

    pub use keystone_server::{
        unary, HttpService, Lifecycle, Platform, Resource, RpcService, Service, ServiceState,
        ShutdownSignal,
    };

    pub use keystone_data::{
        Auditable, Database, Entity, Executor, FindOption, FromDbRow, PaginationQuery,
        Repository, Transaction, WhereOption,
    };

    pub use keystone_broker::{
        decode_reply, subscriber, use_case, BrokerService, MessageClient, SubscriptionHandle,
    };

    pub use keystone_config::{ConfigLoader, KeystoneConfig, LogFormat};

    pub use keystone_telemetry::{init_logging, LogConfig};
}
