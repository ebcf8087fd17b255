//! Connection pools.

use std::borrow::Cow;
use std::fmt;

use keystone_config::DatabaseConfig;
use keystone_core::retry::{connect_with_retry, RetryPolicy};
use keystone_core::{AppError, Error};
use sqlx::postgres::PgPoolOptions;
use sqlx::sqlite::SqlitePoolOptions;
use sqlx::{PgPool, SqlitePool};
use tracing::{info, warn};

/// SQL dialect of a pool.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Dialect {
    /// PostgreSQL.
    Postgres,
    /// SQLite.
    Sqlite,
}

impl Dialect {
    /// Picks the dialect from a connection URL scheme.
    ///
    /// ```
    /// use keystone_data::Dialect;
    ///
    /// assert_eq!(Dialect::from_url("postgres://u@h/db"), Some(Dialect::Postgres));
    /// assert_eq!(Dialect::from_url("sqlite::memory:"), Some(Dialect::Sqlite));
    /// assert_eq!(Dialect::from_url("mysql://h/db"), None);
    /// ```
    #[must_use]
    pub fn from_url(url: &str) -> Option<Self> {
        if url.starts_with("postgres://") || url.starts_with("postgresql://") {
            Some(Self::Postgres)
        } else if url.starts_with("sqlite:") {
            Some(Self::Sqlite)
        } else {
            None
        }
    }

    /// Returns the dialect name.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Postgres => "postgres",
            Self::Sqlite => "sqlite",
        }
    }

    /// Rewrites `?` placeholders into this dialect's form.
    ///
    /// PostgreSQL takes numbered `$n` placeholders; SQLite keeps `?`.
    /// Placeholders inside quoted literals and identifiers are left alone.
    ///
    /// ```
    /// use keystone_data::Dialect;
    ///
    /// assert_eq!(
    ///     Dialect::Postgres.placeholders("a = ? AND b = '?' AND c = ?"),
    ///     "a = $1 AND b = '?' AND c = $2"
    /// );
    /// assert_eq!(Dialect::Sqlite.placeholders("a = ?"), "a = ?");
    /// ```
    #[must_use]
    pub fn placeholders(self, sql: &str) -> Cow<'_, str> {
        if self == Self::Sqlite {
            return Cow::Borrowed(sql);
        }
        let offsets = placeholder_offsets(sql);
        if offsets.is_empty() {
            return Cow::Borrowed(sql);
        }

        let mut out = String::with_capacity(sql.len() + offsets.len() * 2);
        let mut rest = 0;
        for (index, at) in offsets.into_iter().enumerate() {
            out.push_str(&sql[rest..at]);
            out.push('$');
            out.push_str(&(index + 1).to_string());
            rest = at + 1;
        }
        out.push_str(&sql[rest..]);
        Cow::Owned(out)
    }
}

/// Number of `?` placeholders in `sql`, ignoring quoted literals.
pub(crate) fn placeholder_count(sql: &str) -> usize {
    placeholder_offsets(sql).len()
}

fn placeholder_offsets(sql: &str) -> Vec<usize> {
    let mut quote: Option<char> = None;
    let mut offsets = Vec::new();
    for (at, c) in sql.char_indices() {
        match (quote, c) {
            (Some(q), _) if c == q => quote = None,
            (Some(_), _) => {}
            (None, '\'' | '"') => quote = Some(c),
            (None, '?') => offsets.push(at),
            (None, _) => {}
        }
    }
    offsets
}

impl fmt::Display for Dialect {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A connection pool for one of the supported backends.
#[derive(Debug, Clone)]
pub enum DbPool {
    /// PostgreSQL pool.
    Postgres(PgPool),
    /// SQLite pool.
    Sqlite(SqlitePool),
}

/// The process-wide database handle.
///
/// Cheap to clone; clones share the pool.
#[derive(Debug, Clone)]
pub struct Database {
    pool: DbPool,
}

impl Database {
    /// Connects using `config`, retrying with exponential backoff up to
    /// `config.connect_retries` times.
    ///
    /// The dialect follows the URL scheme of [`DatabaseConfig::url`].
    pub async fn connect(config: &DatabaseConfig) -> Result<Self, Error> {
        let url = config.url();
        let dialect = Dialect::from_url(&url).ok_or_else(|| {
            Error::internal(format!(
                "unsupported database url scheme: {}",
                url.split(':').next().unwrap_or_default()
            ))
        })?;
        let policy = RetryPolicy::with_max_retries(config.connect_retries);

        let pool = connect_with_retry("database", &policy, || open(dialect, &url, config))
            .await
            .map_err(|e| Error::internal_with_source("failed to connect to database", e))?;

        info!(
            %dialect,
            max_connections = config.max_connections,
            "Database connected"
        );
        Ok(Self { pool })
    }

    /// Wraps an existing pool.
    #[must_use]
    pub const fn from_pool(pool: DbPool) -> Self {
        Self { pool }
    }

    /// Wraps an existing PostgreSQL pool.
    #[must_use]
    pub const fn from_postgres(pool: PgPool) -> Self {
        Self::from_pool(DbPool::Postgres(pool))
    }

    /// Wraps an existing SQLite pool.
    #[must_use]
    pub const fn from_sqlite(pool: SqlitePool) -> Self {
        Self::from_pool(DbPool::Sqlite(pool))
    }

    /// Returns the underlying pool.
    #[must_use]
    pub const fn pool(&self) -> &DbPool {
        &self.pool
    }

    /// Returns the pool's dialect.
    #[must_use]
    pub const fn dialect(&self) -> Dialect {
        match self.pool {
            DbPool::Postgres(_) => Dialect::Postgres,
            DbPool::Sqlite(_) => Dialect::Sqlite,
        }
    }

    /// Returns `true` once [`Database::close`] has been called.
    #[must_use]
    pub fn is_closed(&self) -> bool {
        match &self.pool {
            DbPool::Postgres(pool) => pool.is_closed(),
            DbPool::Sqlite(pool) => pool.is_closed(),
        }
    }

    /// Closes the pool, waiting for checked-out connections to return.
    pub async fn close(&self) {
        match &self.pool {
            DbPool::Postgres(pool) => pool.close().await,
            DbPool::Sqlite(pool) => pool.close().await,
        }
        info!(dialect = %self.dialect(), "Database closed");
    }
}

async fn open(dialect: Dialect, url: &str, config: &DatabaseConfig) -> Result<DbPool, sqlx::Error> {
    match dialect {
        Dialect::Postgres => PgPoolOptions::new()
            .max_connections(config.max_connections)
            .acquire_timeout(config.timeout())
            .connect(url)
            .await
            .map(DbPool::Postgres),
        Dialect::Sqlite => SqlitePoolOptions::new()
            .max_connections(config.max_connections)
            .acquire_timeout(config.timeout())
            .connect(url)
            .await
            .map(DbPool::Sqlite),
    }
}

/// Maps a driver failure to `query.002`, keeping the driver message.
pub(crate) fn query_error(err: sqlx::Error) -> AppError {
    warn!(error = %err, "Database statement failed");
    AppError::query_invalid(err.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_placeholders_numbering() {
        assert_eq!(
            Dialect::Postgres.placeholders("(name = ? OR email = ?)"),
            "(name = $1 OR email = $2)"
        );
        assert_eq!(
            Dialect::Postgres.placeholders("\"weird?col\" = ?"),
            "\"weird?col\" = $1"
        );
        assert!(matches!(
            Dialect::Postgres.placeholders("id = 1"),
            Cow::Borrowed(_)
        ));
    }

    #[tokio::test]
    async fn test_connect_sqlite_memory() {
        let config = DatabaseConfig {
            url: Some("sqlite::memory:".to_string()),
            max_connections: 1,
            connect_retries: 0,
            ..Default::default()
        };
        let db = Database::connect(&config).await.unwrap();
        assert_eq!(db.dialect(), Dialect::Sqlite);
        db.close().await;
        assert!(db.is_closed());
    }

    #[tokio::test]
    async fn test_connect_rejects_unknown_scheme() {
        let config = DatabaseConfig {
            url: Some("mysql://localhost/db".to_string()),
            ..Default::default()
        };
        let err = Database::connect(&config).await.unwrap_err();
        assert!(err.to_string().contains("unsupported database url scheme"));
    }
}
