//! Eager loading of related collections.

use std::collections::HashMap;
use std::fmt;
use std::marker::PhantomData;
use std::sync::Arc;

use keystone_core::{AppResult, BoxFuture};
use sea_query::{Alias, ConditionalStatement, Expr};

use crate::entity::{Entity, HasMany};
use crate::executor::{Executor, Prepared};
use crate::options::{FindOption, WhereOption};
use crate::query;

trait Loader<P>: Send + Sync {
    fn load<'a>(&'a self, exec: &'a Executor, parents: &'a mut [P]) -> BoxFuture<'a, AppResult<()>>;
}

/// A relation to load after the parent rows are fetched.
///
/// Children are fetched in one `IN (...)` query per relation, honoring the
/// child's soft delete, and attached through [`HasMany::attach`].
///
/// # Example
///
/// ```ignore
/// let users = repo
///     .find_by(&ctx, FindOption::new().preload(Preload::has_many::<Post>()))
///     .await?;
/// ```
pub struct Preload<P> {
    name: &'static str,
    loader: Arc<dyn Loader<P>>,
}

impl<P: Entity> Preload<P> {
    /// Loads every live `C` belonging to each parent.
    pub fn has_many<C>() -> Self
    where
        P: HasMany<C>,
        C: Entity,
    {
        Self::build::<C>(None)
    }

    /// Loads the live `C` rows matching `filter` for each parent.
    pub fn has_many_where<C>(filter: WhereOption) -> Self
    where
        P: HasMany<C>,
        C: Entity,
    {
        Self::build::<C>(Some(filter))
    }

    fn build<C>(filter: Option<WhereOption>) -> Self
    where
        P: HasMany<C>,
        C: Entity,
    {
        Self {
            name: C::TABLE,
            loader: Arc::new(HasManyLoader::<C> {
                filter,
                _child: PhantomData,
            }),
        }
    }

    /// Returns the child table name.
    pub const fn name(&self) -> &'static str {
        self.name
    }

    pub(crate) fn load<'a>(
        &'a self,
        exec: &'a Executor,
        parents: &'a mut [P],
    ) -> BoxFuture<'a, AppResult<()>> {
        self.loader.load(exec, parents)
    }
}

impl<P> Clone for Preload<P> {
    fn clone(&self) -> Self {
        Self {
            name: self.name,
            loader: Arc::clone(&self.loader),
        }
    }
}

impl<P> fmt::Debug for Preload<P> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Preload").field("name", &self.name).finish()
    }
}

struct HasManyLoader<C> {
    filter: Option<WhereOption>,
    _child: PhantomData<fn() -> C>,
}

impl<P, C> Loader<P> for HasManyLoader<C>
where
    P: HasMany<C>,
    C: Entity,
{
    fn load<'a>(&'a self, exec: &'a Executor, parents: &'a mut [P]) -> BoxFuture<'a, AppResult<()>> {
        Box::pin(async move {
            if parents.is_empty() {
                return Ok(());
            }

            let ids: Vec<i64> = parents.iter().map(Entity::id).collect();
            let option: FindOption<C> =
                FindOption::new().filter(self.filter.clone().unwrap_or_default());
            let mut stmt = query::select::<C>(exec.dialect(), &option)?;
            stmt.cond_where(
                Expr::col((Alias::new(C::TABLE), Alias::new(P::FOREIGN_KEY))).is_in(ids),
            );

            let children: Vec<C> = exec
                .fetch_all(Prepared::build(exec.dialect(), &stmt))
                .await?;

            let mut grouped: HashMap<i64, Vec<C>> = HashMap::new();
            for child in children {
                grouped.entry(P::parent_id(&child)).or_default().push(child);
            }
            for parent in parents.iter_mut() {
                let children = grouped.remove(&parent.id()).unwrap_or_default();
                parent.attach(children);
            }

            Ok(())
        })
    }
}
