//! Units of work.
//!
//! A [`Transaction`] is a cloneable handle to one live database transaction.
//! Repositories built from it run every statement on the transaction's
//! connection. [`Transaction::execute`] wraps a closure in a unit of work:
//! commit on success, rollback on error or panic.

use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;

use futures::FutureExt;
use keystone_core::{AppError, AppResult};
use sqlx::{Postgres, Sqlite};
use tokio::sync::{Mutex, MutexGuard};
use tracing::{debug, error, info, warn};

use crate::database::{query_error, Database, DbPool, Dialect};

pub(crate) const FINISHED: &str = "transaction already finished";

pub(crate) enum TxConn {
    Postgres(sqlx::Transaction<'static, Postgres>),
    Sqlite(sqlx::Transaction<'static, Sqlite>),
}

/// Handle to a live transaction.
///
/// Clones share the same transaction. Once committed or rolled back, every
/// further statement through the handle fails with `query.002`. A
/// transaction dropped while still open is rolled back by the driver.
#[derive(Clone)]
pub struct Transaction {
    conn: Arc<Mutex<Option<TxConn>>>,
    dialect: Dialect,
}

impl Transaction {
    /// Begins a transaction on `db`.
    pub async fn begin(db: &Database) -> AppResult<Self> {
        let conn = match db.pool() {
            DbPool::Postgres(pool) => TxConn::Postgres(pool.begin().await.map_err(query_error)?),
            DbPool::Sqlite(pool) => TxConn::Sqlite(pool.begin().await.map_err(query_error)?),
        };
        debug!(dialect = %db.dialect(), "Transaction begun");

        Ok(Self {
            conn: Arc::new(Mutex::new(Some(conn))),
            dialect: db.dialect(),
        })
    }

    /// Returns the dialect of the underlying connection.
    #[must_use]
    pub const fn dialect(&self) -> Dialect {
        self.dialect
    }

    /// Returns `true` until the transaction is committed or rolled back.
    pub async fn is_active(&self) -> bool {
        self.conn.lock().await.is_some()
    }

    pub(crate) async fn lock(&self) -> MutexGuard<'_, Option<TxConn>> {
        self.conn.lock().await
    }

    /// Commits the transaction.
    pub async fn commit(&self) -> AppResult<()> {
        match self.conn.lock().await.take() {
            Some(TxConn::Postgres(tx)) => tx.commit().await.map_err(query_error),
            Some(TxConn::Sqlite(tx)) => tx.commit().await.map_err(query_error),
            None => Err(AppError::query_invalid(FINISHED)),
        }
    }

    /// Rolls the transaction back.
    pub async fn rollback(&self) -> AppResult<()> {
        match self.conn.lock().await.take() {
            Some(TxConn::Postgres(tx)) => tx.rollback().await.map_err(query_error),
            Some(TxConn::Sqlite(tx)) => tx.rollback().await.map_err(query_error),
            None => Err(AppError::query_invalid(FINISHED)),
        }
    }

    /// Runs `f` inside a new transaction.
    ///
    /// - `Ok` commits; a commit failure is returned as `query.002`. If `f`
    ///   already committed or rolled back the handle itself, its decision
    ///   stands and the value is returned as is.
    /// - `Err` rolls back and returns the error unchanged.
    /// - A panic rolls back, then resumes unwinding.
    ///
    /// A failure to begin is returned as `query.002` without calling `f`.
    ///
    /// # Example
    ///
    /// ```no_run
    /// use keystone_core::{AppError, Context};
    /// use keystone_data::{Database, Transaction};
    ///
    /// # async fn demo(db: Database) -> Result<(), AppError> {
    /// let ctx = Context::new();
    /// let moved = Transaction::execute(&db, &ctx, |tx| async move {
    ///     // Build repositories with `Repository::new(&tx)` here.
    ///     let _ = tx;
    ///     Ok::<_, AppError>(2)
    /// })
    /// .await?;
    /// assert_eq!(moved, 2);
    /// # Ok(())
    /// # }
    /// ```
    pub async fn execute<F, Fut, R, E>(
        db: &Database,
        ctx: &keystone_core::Context,
        f: F,
    ) -> Result<R, E>
    where
        F: FnOnce(Transaction) -> Fut,
        Fut: Future<Output = Result<R, E>>,
        E: From<AppError> + std::fmt::Display,
    {
        let request_id = ctx.request_id();
        let tx = match Self::begin(db).await {
            Ok(tx) => tx,
            Err(err) => {
                error!(%request_id, error = %err, "Failed to begin transaction");
                return Err(err.into());
            }
        };
        info!(%request_id, "Transaction started");

        let handle = tx.clone();
        let outcome = AssertUnwindSafe(async move { f(handle).await })
            .catch_unwind()
            .await;

        match outcome {
            Ok(Ok(value)) => {
                if !tx.is_active().await {
                    debug!(%request_id, "Transaction already finished by the unit of work");
                    return Ok(value);
                }
                tx.commit().await.map_err(|err| {
                    error!(%request_id, error = %err, "Transaction commit failed");
                    E::from(err)
                })?;
                info!(%request_id, "Transaction committed");
                Ok(value)
            }
            Ok(Err(err)) => {
                info!(%request_id, error = %err, "Transaction rolled back");
                tx.rollback_quietly().await;
                Err(err)
            }
            Err(panic) => {
                warn!(%request_id, "Transaction rolled back after panic");
                tx.rollback_quietly().await;
                std::panic::resume_unwind(panic)
            }
        }
    }

    async fn rollback_quietly(&self) {
        if let Err(err) = self.rollback().await {
            if err.message != FINISHED {
                warn!(error = %err, "Rollback failed");
            }
        }
    }
}

impl std::fmt::Debug for Transaction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Transaction")
            .field("dialect", &self.dialect)
            .finish_non_exhaustive()
    }
}
