//! Statement building shared by repositories and loaders.

use sea_query::{
    Alias, Asterisk, Condition, ConditionalStatement, Expr, Order, Query, SelectStatement,
};

use keystone_core::{AppError, AppResult};

use crate::database::{placeholder_count, Dialect};
use crate::entity::{columns, Entity};
use crate::options::{FindOption, WhereOption};

/// Builds the WHERE condition for `T`.
///
/// The caller's fragment is parenthesized, then `deleted_at IS NULL` is
/// AND-ed on for soft-deletable entities unless `include_deleted` is set.
/// With `qualified`, the soft-delete column is prefixed by the table name so
/// it stays unambiguous under joins. A fragment whose placeholders do not
/// match its bound values is `query.002`.
pub(crate) fn condition<T: Entity>(
    dialect: Dialect,
    filter: &WhereOption,
    include_deleted: bool,
    qualified: bool,
) -> AppResult<Condition> {
    let mut cond = Condition::all();

    if !filter.is_empty() {
        check_params(&filter.clause, filter.params.len())?;
        let clause = format!("({})", dialect.placeholders(&filter.clause));
        cond = cond.add(Expr::cust_with_values(clause, filter.params.iter().cloned()));
    }

    if T::soft_deletable() && !include_deleted {
        cond = cond.add(live::<T>(qualified));
    }

    Ok(cond)
}

/// Fails unless `sql` has one `?` per bound value.
pub(crate) fn check_params(sql: &str, bound: usize) -> AppResult<()> {
    let expected = placeholder_count(sql);
    if expected == bound {
        Ok(())
    } else {
        Err(AppError::query_invalid(format!(
            "expected {expected} parameters, got {bound}"
        )))
    }
}

/// `deleted_at IS NULL` for `T`.
pub(crate) fn live<T: Entity>(qualified: bool) -> sea_query::SimpleExpr {
    if qualified {
        Expr::col((Alias::new(T::TABLE), Alias::new(columns::DELETED_AT))).is_null()
    } else {
        Expr::col(Alias::new(columns::DELETED_AT)).is_null()
    }
}

/// Primary key equality, optionally live-only.
pub(crate) fn by_id<T: Entity>(id: i64, qualified: bool) -> Condition {
    let pk = if qualified {
        Expr::col((Alias::new(T::TABLE), Alias::new(T::PRIMARY_KEY)))
    } else {
        Expr::col(Alias::new(T::PRIMARY_KEY))
    };
    let mut cond = Condition::all().add(pk.eq(id));
    if T::soft_deletable() {
        cond = cond.add(live::<T>(qualified));
    }
    cond
}

/// Parses `"a DESC, b, t.c asc"` into column/direction pairs.
pub(crate) fn parse_order(order: &str) -> Vec<(String, Order)> {
    order
        .split(',')
        .filter_map(|part| {
            let mut words = part.split_whitespace();
            let column = words.next()?.to_string();
            let direction = match words.next().map(str::to_ascii_lowercase).as_deref() {
                Some("desc") => Order::Desc,
                _ => Order::Asc,
            };
            Some((column, direction))
        })
        .collect()
}

/// Builds the SELECT for a [`FindOption`] on `T`.
pub(crate) fn select<T: Entity>(
    dialect: Dialect,
    option: &FindOption<T>,
) -> AppResult<SelectStatement> {
    let table = Alias::new(T::TABLE);
    let mut stmt = Query::select();
    stmt.from(table.clone());

    match &option.select {
        Some(cols) if !cols.is_empty() => {
            for col in cols {
                stmt.column((table.clone(), Alias::new(col.as_str())));
            }
        }
        _ => {
            stmt.column((table.clone(), Asterisk));
        }
    }

    for join in &option.joins {
        stmt.join(
            join.kind.into(),
            Alias::new(join.table.as_str()),
            Expr::cust(join.on.as_str()),
        );
    }

    let cond = condition::<T>(dialect, &option.filter, option.include_deleted, true)?;
    if !cond.is_empty() {
        stmt.cond_where(cond);
    }

    if let Some(order) = &option.order {
        for (column, direction) in parse_order(order) {
            match column.split_once('.') {
                Some((tbl, col)) => {
                    stmt.order_by((Alias::new(tbl), Alias::new(col)), direction);
                }
                None => {
                    stmt.order_by((table.clone(), Alias::new(column)), direction);
                }
            }
        }
    }

    if option.take > 0 {
        stmt.limit(option.take);
        if option.page > 0 {
            stmt.offset(option.offset());
        }
    }

    Ok(stmt)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::entity::Auditable;
    use sea_query::{SqliteQueryBuilder, Value};

    #[derive(sqlx::FromRow)]
    struct Note {
        id: i64,
    }

    impl Auditable for Note {}

    impl Entity for Note {
        const TABLE: &'static str = "notes";
        const COLUMNS: &'static [&'static str] = &["id", "body", "deleted_at"];

        fn id(&self) -> i64 {
            self.id
        }

        fn values(&self) -> Vec<(&'static str, Value)> {
            Vec::new()
        }
    }

    #[test]
    fn test_parse_order() {
        let parsed = parse_order("created_at DESC, id,  t.name asc ,");
        let cols: Vec<_> = parsed.iter().map(|(c, _)| c.as_str()).collect();
        assert_eq!(cols, vec!["created_at", "id", "t.name"]);
        assert!(matches!(parsed[0].1, Order::Desc));
        assert!(matches!(parsed[1].1, Order::Asc));
    }

    #[test]
    fn test_or_filter_is_parenthesized() {
        let option: FindOption<Note> =
            FindOption::new().filter(WhereOption::new("body = ? OR body = ?").bind("a").bind("b"));
        let sql = select(Dialect::Sqlite, &option)
            .unwrap()
            .to_string(SqliteQueryBuilder);
        let or_at = sql.find("(body = 'a' OR body = 'b')").expect(&sql);
        let live_at = sql.find(r#""notes"."deleted_at" IS NULL"#).expect(&sql);
        assert!(or_at < live_at, "{sql}");
        assert!(sql[or_at..live_at].contains("AND"), "{sql}");
    }

    #[test]
    fn test_include_deleted_drops_predicate() {
        let option: FindOption<Note> = FindOption::new().include_deleted();
        let sql = select(Dialect::Sqlite, &option)
            .unwrap()
            .to_string(SqliteQueryBuilder);
        assert!(!sql.contains("deleted_at"), "{sql}");
    }

    #[test]
    fn test_unbound_placeholder_is_query_invalid() {
        let option: FindOption<Note> =
            FindOption::new().filter(WhereOption::new("body = ? OR body = ?").bind("a"));
        let err = select(Dialect::Sqlite, &option).unwrap_err();
        assert_eq!(err.code, "query.002");
        assert_eq!(err.message, "expected 2 parameters, got 1");

        let quoted = WhereOption::new("body = '?' AND id = ?").bind(1);
        assert!(condition::<Note>(Dialect::Postgres, &quoted, false, false).is_ok());
        assert!(check_params("id = ?", 2).is_err());
    }
}
