//! Generic repositories.

use std::future::Future;
use std::marker::PhantomData;

use chrono::Utc;
use keystone_core::{AppError, AppResult, Context};
use keystone_telemetry::metrics::record_query;
use sea_query::{
    Alias, Asterisk, ConditionalStatement, Expr, OnConflict, Query, SimpleExpr, Value,
};
use tracing::debug;

use crate::entity::{columns, Entity, FromDbRow};
use crate::executor::{Executor, Prepared};
use crate::options::{FindOption, PaginationQuery, ValueMap, WhereOption};
use crate::query;

const NOT_FOUND: &str = "record not found";
const CANCELLED: &str = "context canceled";

/// CRUD operations for entity type `T`.
///
/// A repository is bound to an [`Executor`]: build it from the shared
/// [`Database`](crate::Database) for standalone statements, or from a
/// [`Transaction`](crate::Transaction) so every statement joins that unit of
/// work.
///
/// Every operation takes the request [`Context`] first. A cancelled context
/// aborts the in-flight statement with `query.002`, and the context's
/// principal drives audit stamping.
///
/// Soft-deletable entities (those declaring `deleted_at`) never see deleted
/// rows through reads, updates, deletes or counts unless the options
/// explicitly include them.
pub struct Repository<T> {
    executor: Executor,
    _entity: PhantomData<fn() -> T>,
}

impl<T> Clone for Repository<T> {
    fn clone(&self) -> Self {
        Self {
            executor: self.executor.clone(),
            _entity: PhantomData,
        }
    }
}

impl<T> std::fmt::Debug for Repository<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Repository")
            .field("entity", &std::any::type_name::<T>())
            .field("executor", &self.executor)
            .finish()
    }
}

impl<T: Entity> Repository<T> {
    /// Creates a repository on a pool or a transaction.
    pub fn new(executor: impl Into<Executor>) -> Self {
        Self {
            executor: executor.into(),
            _entity: PhantomData,
        }
    }

    /// Returns the executor statements run on.
    pub const fn executor(&self) -> &Executor {
        &self.executor
    }

    fn prepare<S: sea_query_binder::SqlxBinder>(&self, stmt: &S) -> Prepared {
        Prepared::build(self.executor.dialect(), stmt)
    }

    fn cond(&self, filter: &WhereOption, include_deleted: bool) -> AppResult<sea_query::Condition> {
        query::condition::<T>(self.executor.dialect(), filter, include_deleted, false)
    }

    // ---- create ----------------------------------------------------------

    /// Inserts one entity and returns the stored row.
    pub async fn create_one(&self, ctx: &Context, entity: T) -> AppResult<T> {
        let mut rows = self.create(ctx, vec![entity]).await?;
        rows.pop()
            .ok_or_else(|| AppError::query_invalid("insert returned no row"))
    }

    /// Inserts entities in one statement and returns the stored rows.
    pub async fn create(&self, ctx: &Context, entities: Vec<T>) -> AppResult<Vec<T>> {
        self.insert(ctx, "create", entities, None).await
    }

    /// Inserts entities, resolving key collisions.
    ///
    /// On a collision over `conflict_columns` the row is left untouched when
    /// `update_columns` is empty, otherwise exactly `update_columns` are
    /// overwritten with the incoming values. Untouched rows are not returned.
    pub async fn create_with_on_conflicting(
        &self,
        ctx: &Context,
        conflict_columns: &[&str],
        update_columns: &[&str],
        entities: Vec<T>,
    ) -> AppResult<Vec<T>> {
        let mut on_conflict =
            OnConflict::columns(conflict_columns.iter().map(|c| Alias::new(*c)));
        if update_columns.is_empty() {
            on_conflict.do_nothing();
        } else {
            on_conflict.update_columns(update_columns.iter().map(|c| Alias::new(*c)));
        }
        self.insert(ctx, "create", entities, Some(on_conflict)).await
    }

    async fn insert(
        &self,
        ctx: &Context,
        operation: &'static str,
        mut entities: Vec<T>,
        on_conflict: Option<OnConflict>,
    ) -> AppResult<Vec<T>> {
        if entities.is_empty() {
            return Ok(Vec::new());
        }

        if let Some(principal) = ctx.principal() {
            let now = Utc::now();
            for entity in &mut entities {
                entity.set_created(now, &principal.id);
                entity.set_updated(now, &principal.id);
            }
        }

        let mut stmt = Query::insert();
        stmt.into_table(Alias::new(T::TABLE));

        let mut columns_set = false;
        for entity in &entities {
            let (cols, vals): (Vec<&'static str>, Vec<Value>) = entity.values().into_iter().unzip();
            if !columns_set {
                stmt.columns(cols.into_iter().map(Alias::new));
                columns_set = true;
            }
            stmt.values(vals.into_iter().map(SimpleExpr::from))
                .map_err(|e| AppError::query_invalid(e.to_string()))?;
        }
        if let Some(on_conflict) = on_conflict {
            stmt.on_conflict(on_conflict);
        }
        stmt.returning_all();

        let prepared = self.prepare(&stmt);
        self.run(ctx, operation, self.executor.fetch_all(prepared)).await
    }

    // ---- update ----------------------------------------------------------

    /// Updates the row with primary key `id` from `entity`'s update values.
    ///
    /// Stamps `updated_at`/`updated_by` on `entity` when the context carries
    /// a principal. Returns the number of rows changed.
    pub async fn update_by_id(&self, ctx: &Context, id: i64, entity: &mut T) -> AppResult<u64> {
        stamp_updated(ctx, entity);
        let cond = query::by_id::<T>(id, false);
        self.update_with(ctx, entity.update_values(), cond).await
    }

    /// Updates every live row matching `filter` from `entity`'s update values.
    pub async fn update_by(
        &self,
        ctx: &Context,
        entity: &mut T,
        filter: &WhereOption,
    ) -> AppResult<u64> {
        stamp_updated(ctx, entity);
        let cond = self.cond(filter, false)?;
        self.update_with(ctx, entity.update_values(), cond).await
    }

    /// Updates the named columns of every live row matching `filter`.
    ///
    /// Adds `updated_at` (and `updated_by` with a principal) when the entity
    /// declares those columns.
    pub async fn update_by_map(
        &self,
        ctx: &Context,
        mut values: ValueMap,
        filter: &WhereOption,
    ) -> AppResult<u64> {
        if T::has_column(columns::UPDATED_AT) {
            values.insert(columns::UPDATED_AT.to_string(), Utc::now().into());
        }
        if let Some(principal) = ctx.principal() {
            if T::has_column(columns::UPDATED_BY) {
                values.insert(columns::UPDATED_BY.to_string(), principal.id.clone().into());
            }
        }

        let cond = self.cond(filter, false)?;
        let mut stmt = Query::update();
        stmt.table(Alias::new(T::TABLE))
            .values(values.into_iter().map(|(c, v)| (Alias::new(c), SimpleExpr::from(v))));
        if !cond.is_empty() {
            stmt.cond_where(cond);
        }

        let prepared = self.prepare(&stmt);
        self.run(ctx, "update", self.executor.execute(prepared)).await
    }

    async fn update_with(
        &self,
        ctx: &Context,
        values: Vec<(&'static str, Value)>,
        cond: sea_query::Condition,
    ) -> AppResult<u64> {
        if values.is_empty() {
            return Ok(0);
        }

        let mut stmt = Query::update();
        stmt.table(Alias::new(T::TABLE))
            .values(values.into_iter().map(|(c, v)| (Alias::new(c), SimpleExpr::from(v))));
        if !cond.is_empty() {
            stmt.cond_where(cond);
        }

        let prepared = self.prepare(&stmt);
        self.run(ctx, "update", self.executor.execute(prepared)).await
    }

    // ---- delete ----------------------------------------------------------

    /// Deletes the row with primary key `id`.
    ///
    /// Fails with `query.001` if no live row has that id. Soft-deletable
    /// entities get `deleted_at` (and `deleted_by` with a principal) set
    /// instead of being removed.
    pub async fn delete_by_id(&self, ctx: &Context, id: i64) -> AppResult<u64> {
        self.find_by_id(ctx, id).await?;
        self.delete_where(ctx, query::by_id::<T>(id, false)).await
    }

    /// Deletes every live row matching `filter`.
    pub async fn delete_by(&self, ctx: &Context, filter: &WhereOption) -> AppResult<u64> {
        let cond = self.cond(filter, false)?;
        self.delete_where(ctx, cond).await
    }

    async fn delete_where(&self, ctx: &Context, cond: sea_query::Condition) -> AppResult<u64> {
        let prepared = if T::soft_deletable() {
            let mut values = vec![(
                Alias::new(columns::DELETED_AT),
                SimpleExpr::from(Utc::now()),
            )];
            if let Some(principal) = ctx.principal() {
                if T::has_column(columns::DELETED_BY) {
                    values.push((
                        Alias::new(columns::DELETED_BY),
                        SimpleExpr::from(principal.id.clone()),
                    ));
                }
            }

            let mut stmt = Query::update();
            stmt.table(Alias::new(T::TABLE)).values(values);
            if !cond.is_empty() {
                stmt.cond_where(cond);
            }
            self.prepare(&stmt)
        } else {
            let mut stmt = Query::delete();
            stmt.from_table(Alias::new(T::TABLE));
            if !cond.is_empty() {
                stmt.cond_where(cond);
            }
            self.prepare(&stmt)
        };

        self.run(ctx, "delete", self.executor.execute(prepared)).await
    }

    // ---- read ------------------------------------------------------------

    /// Returns the live row with primary key `id`, or `query.001`.
    pub async fn find_by_id(&self, ctx: &Context, id: i64) -> AppResult<T> {
        let mut stmt = Query::select();
        stmt.column((Alias::new(T::TABLE), Asterisk))
            .from(Alias::new(T::TABLE))
            .cond_where(query::by_id::<T>(id, true))
            .limit(1);

        let prepared = self.prepare(&stmt);
        self.run(ctx, "find", self.executor.fetch_optional(prepared))
            .await?
            .ok_or_else(|| AppError::query_not_found(NOT_FOUND))
    }

    /// Returns every live row.
    pub async fn find_all(&self, ctx: &Context) -> AppResult<Vec<T>> {
        self.find_by(ctx, FindOption::new()).await
    }

    /// Returns the first row matching `option`, or `query.001`.
    pub async fn find_one_by(&self, ctx: &Context, option: FindOption<T>) -> AppResult<T> {
        let option = FindOption { take: 1, page: 0, ..option };
        self.find_by(ctx, option)
            .await?
            .into_iter()
            .next()
            .ok_or_else(|| AppError::query_not_found(NOT_FOUND))
    }

    /// Returns every row matching `option`; no match is an empty vector.
    pub async fn find_by(&self, ctx: &Context, option: FindOption<T>) -> AppResult<Vec<T>> {
        let stmt = query::select::<T>(self.executor.dialect(), &option)?;
        let prepared = self.prepare(&stmt);
        let mut rows = self
            .run(ctx, "find", self.executor.fetch_all(prepared))
            .await?;

        for preload in &option.preloads {
            debug!(table = T::TABLE, relation = preload.name(), "Preloading relation");
            self.run(ctx, "preload", preload.load(&self.executor, &mut rows))
                .await?;
        }

        Ok(rows)
    }

    /// Returns the first match, or `entity` unsaved.
    pub async fn first_or_init_by(
        &self,
        ctx: &Context,
        option: FindOption<T>,
        entity: T,
    ) -> AppResult<T> {
        match self.find_one_by(ctx, option).await {
            Ok(found) => Ok(found),
            Err(err) if err.is_query_not_found() => Ok(entity),
            Err(err) => Err(err),
        }
    }

    /// Returns the first match, or inserts `entity` and returns it.
    pub async fn first_or_create_by(
        &self,
        ctx: &Context,
        option: FindOption<T>,
        entity: T,
    ) -> AppResult<T> {
        match self.find_one_by(ctx, option).await {
            Ok(found) => Ok(found),
            Err(err) if err.is_query_not_found() => self.create_one(ctx, entity).await,
            Err(err) => Err(err),
        }
    }

    // ---- paging ----------------------------------------------------------

    /// Counts matching rows, then fetches one page.
    ///
    /// When nothing matches, or the page starts past the last row, the row
    /// query is skipped and `(total, [])` is returned.
    pub async fn pagination(&self, ctx: &Context, option: FindOption<T>) -> AppResult<(u64, Vec<T>)> {
        let total = self
            .count_matching(ctx, &option.filter, option.include_deleted)
            .await?;

        if total == 0 || total < option.offset() {
            return Ok((total, Vec::new()));
        }

        let items = self.find_by(ctx, option).await?;
        Ok((total, items))
    }

    /// Runs a caller-written count and row query as one page.
    ///
    /// Rows are decoded into `I` through its `FromRow` implementation. The
    /// short-circuit rules of [`Repository::pagination`] apply.
    pub async fn pagination_query<I: FromDbRow>(
        &self,
        ctx: &Context,
        query: PaginationQuery,
    ) -> AppResult<(u64, Vec<I>)> {
        let dialect = self.executor.dialect();
        let count = Prepared::raw(dialect, &query.count_sql, query.params.clone())?;
        let total = self.run(ctx, "count", self.executor.fetch_count(count)).await?;

        let offset = query.offset();
        if total == 0 || total < offset {
            return Ok((total, Vec::new()));
        }

        let sql = format!("{} LIMIT {} OFFSET {}", query.query_sql, query.take, offset);
        let rows = Prepared::raw(dialect, &sql, query.params)?;
        let items = self.run(ctx, "find", self.executor.fetch_all(rows)).await?;
        Ok((total, items))
    }

    // ---- counting --------------------------------------------------------

    /// Counts live rows.
    pub async fn count_all(&self, ctx: &Context) -> AppResult<u64> {
        self.count_matching(ctx, &WhereOption::default(), false).await
    }

    /// Counts live rows matching `filter`.
    pub async fn count_by(&self, ctx: &Context, filter: &WhereOption) -> AppResult<u64> {
        self.count_matching(ctx, filter, false).await
    }

    async fn count_matching(
        &self,
        ctx: &Context,
        filter: &WhereOption,
        include_deleted: bool,
    ) -> AppResult<u64> {
        let cond = self.cond(filter, include_deleted)?;
        let mut stmt = Query::select();
        stmt.expr(Expr::col(Asterisk).count())
            .from(Alias::new(T::TABLE));
        if !cond.is_empty() {
            stmt.cond_where(cond);
        }

        let prepared = self.prepare(&stmt);
        self.run(ctx, "count", self.executor.fetch_count(prepared)).await
    }

    /// Returns which of `ids` belong to live rows.
    pub async fn get_exists_ids_by_ids(&self, ctx: &Context, ids: &[i64]) -> AppResult<Vec<i64>> {
        if ids.is_empty() {
            return Ok(Vec::new());
        }

        let mut cond = sea_query::Condition::all()
            .add(Expr::col(Alias::new(T::PRIMARY_KEY)).is_in(ids.iter().copied()));
        if T::soft_deletable() {
            cond = cond.add(query::live::<T>(false));
        }

        let mut stmt = Query::select();
        stmt.column(Alias::new(T::PRIMARY_KEY))
            .from(Alias::new(T::TABLE))
            .cond_where(cond);

        let prepared = self.prepare(&stmt);
        self.run(ctx, "find", self.executor.fetch_i64s(prepared)).await
    }

    /// Returns `true` if a live row has primary key `id`.
    pub async fn is_exist_by_id(&self, ctx: &Context, id: i64) -> AppResult<bool> {
        let mut stmt = Query::select();
        stmt.expr(Expr::col(Asterisk).count())
            .from(Alias::new(T::TABLE))
            .cond_where(query::by_id::<T>(id, false));

        let prepared = self.prepare(&stmt);
        let count = self.run(ctx, "count", self.executor.fetch_count(prepared)).await?;
        Ok(count > 0)
    }

    // ---- plumbing --------------------------------------------------------

    /// Races `fut` against the context and records the outcome.
    async fn run<R, F>(&self, ctx: &Context, operation: &'static str, fut: F) -> AppResult<R>
    where
        F: Future<Output = AppResult<R>>,
    {
        let result = tokio::select! {
            biased;
            () = ctx.cancelled() => Err(AppError::query_invalid(CANCELLED)),
            result = fut => result,
        };

        match &result {
            Ok(_) => record_query(operation, true),
            Err(err) => {
                record_query(operation, false);
                debug!(
                    table = T::TABLE,
                    operation,
                    request_id = %ctx.request_id(),
                    error = %err,
                    "Repository operation failed"
                );
            }
        }

        result
    }
}

fn stamp_updated<T: Entity>(ctx: &Context, entity: &mut T) {
    if let Some(principal) = ctx.principal() {
        entity.set_updated(Utc::now(), &principal.id);
    }
}
