//! # Keystone Data
//!
//! Generic repositories and units of work over PostgreSQL and SQLite.
//!
//! - [`Database`] - Connection pool opened from [`keystone_config::DatabaseConfig`]
//! - [`Entity`] - Table mapping, with opt-in audit and soft-delete columns
//! - [`Repository`] - CRUD, paging, counting and eager loading for one entity
//! - [`Transaction`] - Commit-or-rollback unit of work
//!
//! Statements are built with `sea-query` and executed through `sqlx`.
//! Every repository operation takes the request [`keystone_core::Context`],
//! honours its cancellation and reports failures as `query.*` errors.
//!
//! # Example
//!
//! ```rust,ignore
//! use keystone_data::{Database, FindOption, Repository, WhereOption};
//!
//! let db = Database::connect(&config.database).await?;
//! let users = Repository::<User>::new(&db);
//! let (total, page) = users
//!     .pagination(&ctx, FindOption::new().filter(WhereOption::new("age > ?").bind(18)).page(1, 20))
//!     .await?;
//! ```

#![doc(html_root_url = "https://docs.rs/keystone-data/0.1.0")]
#![warn(missing_docs)]
#![forbid(unsafe_code)]

mod database;
mod entity;
mod executor;
mod options;
mod preload;
mod query;
mod repository;
mod transaction;

pub use database::{Database, DbPool, Dialect};
pub use entity::{columns, Auditable, Entity, FromDbRow, HasMany};
pub use executor::Executor;
pub use options::{FindOption, Join, JoinKind, PaginationQuery, ValueMap, WhereOption};
pub use preload::Preload;
pub use repository::Repository;
pub use transaction::Transaction;

pub use sea_query::Value;
