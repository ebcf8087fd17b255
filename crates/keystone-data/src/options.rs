//! Query options.

use std::collections::BTreeMap;
use std::fmt;

use sea_query::{JoinType, Value};

use crate::preload::Preload;

/// Column/value pairs for map updates.
pub type ValueMap = BTreeMap<String, Value>;

/// A raw WHERE fragment with `?` placeholders and its parameters.
///
/// The fragment is always wrapped in parentheses before any implicit
/// predicate (such as `deleted_at IS NULL`) is AND-ed on, so `OR` clauses
/// keep their meaning.
///
/// # Example
///
/// ```
/// use keystone_data::WhereOption;
///
/// let filter = WhereOption::new("status = ? OR owner = ?")
///     .bind("open")
///     .bind(42_i64);
/// assert_eq!(filter.params.len(), 2);
/// ```
#[derive(Debug, Clone, Default, PartialEq)]
pub struct WhereOption {
    /// SQL fragment with `?` placeholders.
    pub clause: String,
    /// Values bound in placeholder order.
    pub params: Vec<Value>,
}

impl WhereOption {
    /// Creates a filter without parameters.
    pub fn new(clause: impl Into<String>) -> Self {
        Self {
            clause: clause.into(),
            params: Vec::new(),
        }
    }

    /// Binds the next placeholder.
    #[must_use]
    pub fn bind(mut self, value: impl Into<Value>) -> Self {
        self.params.push(value.into());
        self
    }

    /// Returns `true` if there is no fragment.
    pub fn is_empty(&self) -> bool {
        self.clause.trim().is_empty()
    }
}

/// Join flavor.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum JoinKind {
    /// `INNER JOIN`.
    #[default]
    Inner,
    /// `LEFT JOIN`.
    Left,
}

impl From<JoinKind> for JoinType {
    fn from(kind: JoinKind) -> Self {
        match kind {
            JoinKind::Inner => Self::InnerJoin,
            JoinKind::Left => Self::LeftJoin,
        }
    }
}

/// A join clause: `<kind> JOIN <table> ON <on>`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Join {
    /// Join flavor.
    pub kind: JoinKind,
    /// Joined table.
    pub table: String,
    /// Raw `ON` condition.
    pub on: String,
}

impl Join {
    /// Creates an inner join.
    pub fn inner(table: impl Into<String>, on: impl Into<String>) -> Self {
        Self {
            kind: JoinKind::Inner,
            table: table.into(),
            on: on.into(),
        }
    }

    /// Creates a left join.
    pub fn left(table: impl Into<String>, on: impl Into<String>) -> Self {
        Self {
            kind: JoinKind::Left,
            table: table.into(),
            on: on.into(),
        }
    }
}

/// Options for `find_by`, `find_one_by` and `pagination`.
///
/// `page` is 1-based and only applies when `take` is non-zero.
pub struct FindOption<T> {
    /// Row filter.
    pub filter: WhereOption,
    /// 1-based page number.
    pub page: u64,
    /// Page size; `0` means unlimited.
    pub take: u64,
    /// Raw ordering, e.g. `"created_at DESC, id"`.
    pub order: Option<String>,
    /// Columns to select instead of every column of the entity table.
    pub select: Option<Vec<String>>,
    /// Join clauses.
    pub joins: Vec<Join>,
    /// Related collections to load after the main query.
    pub preloads: Vec<Preload<T>>,
    /// Also return soft-deleted rows.
    pub include_deleted: bool,
}

impl<T> FindOption<T> {
    /// Creates empty options matching every live row.
    pub fn new() -> Self {
        Self {
            filter: WhereOption::default(),
            page: 0,
            take: 0,
            order: None,
            select: None,
            joins: Vec::new(),
            preloads: Vec::new(),
            include_deleted: false,
        }
    }

    /// Sets the row filter.
    #[must_use]
    pub fn filter(mut self, filter: WhereOption) -> Self {
        self.filter = filter;
        self
    }

    /// Sets the page and page size.
    #[must_use]
    pub fn page(mut self, page: u64, take: u64) -> Self {
        self.page = page;
        self.take = take;
        self
    }

    /// Sets the ordering.
    #[must_use]
    pub fn order(mut self, order: impl Into<String>) -> Self {
        self.order = Some(order.into());
        self
    }

    /// Restricts the selected columns.
    #[must_use]
    pub fn select<I, S>(mut self, columns: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.select = Some(columns.into_iter().map(Into::into).collect());
        self
    }

    /// Adds a join.
    #[must_use]
    pub fn join(mut self, join: Join) -> Self {
        self.joins.push(join);
        self
    }

    /// Adds an eager-loaded relation.
    #[must_use]
    pub fn preload(mut self, preload: Preload<T>) -> Self {
        self.preloads.push(preload);
        self
    }

    /// Includes soft-deleted rows.
    #[must_use]
    pub fn include_deleted(mut self) -> Self {
        self.include_deleted = true;
        self
    }

    /// Returns the row offset for the current page.
    pub fn offset(&self) -> u64 {
        self.page.saturating_sub(1).saturating_mul(self.take)
    }
}

impl<T> Default for FindOption<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> Clone for FindOption<T> {
    fn clone(&self) -> Self {
        Self {
            filter: self.filter.clone(),
            page: self.page,
            take: self.take,
            order: self.order.clone(),
            select: self.select.clone(),
            joins: self.joins.clone(),
            preloads: self.preloads.clone(),
            include_deleted: self.include_deleted,
        }
    }
}

impl<T> fmt::Debug for FindOption<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FindOption")
            .field("filter", &self.filter)
            .field("page", &self.page)
            .field("take", &self.take)
            .field("order", &self.order)
            .field("select", &self.select)
            .field("joins", &self.joins)
            .field("preloads", &self.preloads)
            .field("include_deleted", &self.include_deleted)
            .finish()
    }
}

/// A caller-written paged query.
///
/// `count_sql` must return a single integer. `query_sql` gets
/// `LIMIT take OFFSET (page-1)*take` appended. Both share `params`.
#[derive(Debug, Clone, Default)]
pub struct PaginationQuery {
    /// Count statement.
    pub count_sql: String,
    /// Row statement without `LIMIT`/`OFFSET`.
    pub query_sql: String,
    /// Values bound to both statements.
    pub params: Vec<Value>,
    /// 1-based page number.
    pub page: u64,
    /// Page size.
    pub take: u64,
}

impl PaginationQuery {
    /// Creates a paged query.
    pub fn new(count_sql: impl Into<String>, query_sql: impl Into<String>) -> Self {
        Self {
            count_sql: count_sql.into(),
            query_sql: query_sql.into(),
            ..Self::default()
        }
    }

    /// Binds the next placeholder of both statements.
    #[must_use]
    pub fn bind(mut self, value: impl Into<Value>) -> Self {
        self.params.push(value.into());
        self
    }

    /// Sets the page and page size.
    #[must_use]
    pub fn page(mut self, page: u64, take: u64) -> Self {
        self.page = page;
        self.take = take;
        self
    }

    /// Returns the row offset for the current page.
    pub fn offset(&self) -> u64 {
        self.page.saturating_sub(1).saturating_mul(self.take)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Row;

    #[test]
    fn test_offset_is_one_based() {
        let opt: FindOption<Row> = FindOption::new().page(3, 20);
        assert_eq!(opt.offset(), 40);
        let opt: FindOption<Row> = FindOption::new().page(0, 20);
        assert_eq!(opt.offset(), 0);
        assert_eq!(PaginationQuery::new("", "").page(2, 5).offset(), 5);
    }

    #[test]
    fn test_where_option_empty() {
        assert!(WhereOption::default().is_empty());
        assert!(WhereOption::new("  ").is_empty());
        assert!(!WhereOption::new("id = ?").bind(1_i64).is_empty());
    }
}
