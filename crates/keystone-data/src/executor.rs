//! Statement execution against a pool or a transaction.

use keystone_core::{AppError, AppResult};
use sea_query::{PostgresQueryBuilder, SqliteQueryBuilder, Value, Values};
use sea_query_binder::{SqlxBinder, SqlxValues};

use crate::database::{query_error, Database, DbPool, Dialect};
use crate::entity::FromDbRow;
use crate::transaction::{Transaction, TxConn, FINISHED};

/// Where repository statements run.
///
/// Build one from the shared [`Database`] for standalone statements, or from
/// a [`Transaction`] to run every statement inside that unit of work.
#[derive(Debug, Clone)]
pub enum Executor {
    /// The shared pool.
    Pool(Database),
    /// A live transaction.
    Transaction(Transaction),
}

impl Executor {
    /// Returns the dialect statements must be rendered in.
    #[must_use]
    pub const fn dialect(&self) -> Dialect {
        match self {
            Self::Pool(db) => db.dialect(),
            Self::Transaction(tx) => tx.dialect(),
        }
    }

    /// Returns `true` for transaction-scoped executors.
    #[must_use]
    pub const fn is_transaction(&self) -> bool {
        matches!(self, Self::Transaction(_))
    }
}

impl From<Database> for Executor {
    fn from(db: Database) -> Self {
        Self::Pool(db)
    }
}

impl From<&Database> for Executor {
    fn from(db: &Database) -> Self {
        Self::Pool(db.clone())
    }
}

impl From<Transaction> for Executor {
    fn from(tx: Transaction) -> Self {
        Self::Transaction(tx)
    }
}

impl From<&Transaction> for Executor {
    fn from(tx: &Transaction) -> Self {
        Self::Transaction(tx.clone())
    }
}

/// SQL text with its bound values, rendered for one dialect.
#[derive(Debug)]
pub(crate) struct Prepared {
    pub(crate) sql: String,
    values: SqlxValues,
}

impl Prepared {
    pub(crate) fn build<S: SqlxBinder>(dialect: Dialect, stmt: &S) -> Self {
        let (sql, values) = match dialect {
            Dialect::Postgres => stmt.build_sqlx(PostgresQueryBuilder),
            Dialect::Sqlite => stmt.build_sqlx(SqliteQueryBuilder),
        };
        Self { sql, values }
    }

    /// Raw SQL with `?` placeholders, one per value in `params`.
    pub(crate) fn raw(dialect: Dialect, sql: &str, params: Vec<Value>) -> AppResult<Self> {
        crate::query::check_params(sql, params.len())?;
        Ok(Self {
            sql: dialect.placeholders(sql).into_owned(),
            values: SqlxValues(Values(params)),
        })
    }
}

// Expands `$body` once per backend, with `$conn` bound to the pool or the
// transaction's connection.
macro_rules! dispatch {
    ($exec:expr, |$conn:ident| $body:expr) => {
        match $exec {
            Executor::Pool(db) => match db.pool() {
                DbPool::Postgres($conn) => $body,
                DbPool::Sqlite($conn) => $body,
            },
            Executor::Transaction(tx) => {
                let mut guard = tx.lock().await;
                match guard.as_mut() {
                    Some(TxConn::Postgres(tx)) => {
                        let $conn = &mut **tx;
                        $body
                    }
                    Some(TxConn::Sqlite(tx)) => {
                        let $conn = &mut **tx;
                        $body
                    }
                    None => return Err(AppError::query_invalid(FINISHED)),
                }
            }
        }
    };
}

impl Executor {
    /// Runs a statement, returning the number of affected rows.
    pub(crate) async fn execute(&self, prepared: Prepared) -> AppResult<u64> {
        let Prepared { sql, values } = prepared;
        tracing::trace!(%sql, "execute");
        let affected = dispatch!(self, |conn| sqlx::query_with(&sql, values)
            .execute(conn)
            .await
            .map(|r| r.rows_affected()));
        affected.map_err(query_error)
    }

    /// Fetches every row.
    pub(crate) async fn fetch_all<R: FromDbRow>(&self, prepared: Prepared) -> AppResult<Vec<R>> {
        let Prepared { sql, values } = prepared;
        tracing::trace!(%sql, "fetch_all");
        let rows = dispatch!(self, |conn| sqlx::query_as_with::<_, R, _>(&sql, values)
            .fetch_all(conn)
            .await);
        rows.map_err(query_error)
    }

    /// Fetches at most one row.
    pub(crate) async fn fetch_optional<R: FromDbRow>(
        &self,
        prepared: Prepared,
    ) -> AppResult<Option<R>> {
        let Prepared { sql, values } = prepared;
        tracing::trace!(%sql, "fetch_optional");
        let row = dispatch!(self, |conn| sqlx::query_as_with::<_, R, _>(&sql, values)
            .fetch_optional(conn)
            .await);
        row.map_err(query_error)
    }

    /// Fetches the first column of every row as `i64`.
    pub(crate) async fn fetch_i64s(&self, prepared: Prepared) -> AppResult<Vec<i64>> {
        let Prepared { sql, values } = prepared;
        tracing::trace!(%sql, "fetch_i64s");
        let ids = dispatch!(self, |conn| sqlx::query_scalar_with::<_, i64, _>(&sql, values)
            .fetch_all(conn)
            .await);
        ids.map_err(query_error)
    }

    /// Fetches a single `COUNT(*)`-style value.
    pub(crate) async fn fetch_count(&self, prepared: Prepared) -> AppResult<u64> {
        let Prepared { sql, values } = prepared;
        tracing::trace!(%sql, "fetch_count");
        let count = dispatch!(self, |conn| sqlx::query_scalar_with::<_, i64, _>(&sql, values)
            .fetch_optional(conn)
            .await);
        count
            .map(|c| c.map_or(0, |c| u64::try_from(c).unwrap_or(0)))
            .map_err(query_error)
    }
}
