//! Entity traits.
//!
//! An [`Entity`] is a persisted record with an `i64` primary key. The
//! convention columns in [`columns`] are optional; an entity opts into a
//! behavior by listing the column in [`Entity::COLUMNS`]:
//!
//! - `deleted_at` makes the entity soft-deletable
//! - `updated_at` / `updated_by` are re-stamped on map updates
//! - `deleted_by` records who soft-deleted a row
//!
//! Typed audit stamping goes through [`Auditable`].

use chrono::{DateTime, Utc};
use sea_query::Value;
use sqlx::postgres::PgRow;
use sqlx::sqlite::SqliteRow;
use sqlx::FromRow;

/// Convention column names.
pub mod columns {
    /// Primary key.
    pub const ID: &str = "id";
    /// Creation instant.
    pub const CREATED_AT: &str = "created_at";
    /// Creator principal id.
    pub const CREATED_BY: &str = "created_by";
    /// Last update instant.
    pub const UPDATED_AT: &str = "updated_at";
    /// Last updater principal id.
    pub const UPDATED_BY: &str = "updated_by";
    /// Soft-delete marker.
    pub const DELETED_AT: &str = "deleted_at";
    /// Principal that soft-deleted the row.
    pub const DELETED_BY: &str = "deleted_by";

    /// Columns never written by updates.
    pub const IMMUTABLE: &[&str] = &[ID, CREATED_AT, CREATED_BY, DELETED_AT, DELETED_BY];
}

/// Rows decodable from both supported backends.
///
/// `#[derive(sqlx::FromRow)]` satisfies this for any struct whose field
/// types are supported by PostgreSQL and SQLite.
pub trait FromDbRow:
    for<'r> FromRow<'r, PgRow> + for<'r> FromRow<'r, SqliteRow> + Send + Unpin
{
}

impl<T> FromDbRow for T where
    T: for<'r> FromRow<'r, PgRow> + for<'r> FromRow<'r, SqliteRow> + Send + Unpin
{
}

/// Typed setters for the audit convention columns.
///
/// The defaults do nothing, so entities without audit columns implement it
/// with an empty block.
pub trait Auditable {
    /// Stamps `created_at` / `created_by`.
    fn set_created(&mut self, _at: DateTime<Utc>, _by: &str) {}

    /// Stamps `updated_at` / `updated_by`.
    fn set_updated(&mut self, _at: DateTime<Utc>, _by: &str) {}
}

/// A persisted record type.
///
/// # Example
///
/// ```
/// use keystone_data::{columns, Auditable, Entity};
/// use sea_query::Value;
///
/// #[derive(Debug, sqlx::FromRow)]
/// struct Tag {
///     id: i64,
///     label: String,
/// }
///
/// impl Auditable for Tag {}
///
/// impl Entity for Tag {
///     const TABLE: &'static str = "tags";
///     const COLUMNS: &'static [&'static str] = &[columns::ID, "label"];
///
///     fn id(&self) -> i64 {
///         self.id
///     }
///
///     fn values(&self) -> Vec<(&'static str, Value)> {
///         vec![("label", self.label.clone().into())]
///     }
/// }
///
/// assert!(!Tag::soft_deletable());
/// ```
pub trait Entity: Auditable + FromDbRow + Sync + 'static {
    /// Table name.
    const TABLE: &'static str;

    /// Every column of the table, including convention columns.
    const COLUMNS: &'static [&'static str];

    /// Primary key column.
    const PRIMARY_KEY: &'static str = columns::ID;

    /// Returns the primary key value.
    fn id(&self) -> i64;

    /// Column values written on insert.
    ///
    /// Leave out database-generated columns such as an auto-increment id.
    fn values(&self) -> Vec<(&'static str, Value)>;

    /// Column values written by entity updates.
    ///
    /// Defaults to [`Entity::values`] without the primary key, creation
    /// stamps and soft-delete markers.
    fn update_values(&self) -> Vec<(&'static str, Value)> {
        self.values()
            .into_iter()
            .filter(|(column, _)| {
                *column != Self::PRIMARY_KEY && !columns::IMMUTABLE.contains(column)
            })
            .collect()
    }

    /// Returns `true` if the table declares `name`.
    fn has_column(name: &str) -> bool {
        Self::COLUMNS.contains(&name)
    }

    /// Returns `true` if the table declares `deleted_at`.
    fn soft_deletable() -> bool {
        Self::has_column(columns::DELETED_AT)
    }
}

/// A one-to-many relation from `Self` to `C`, used for eager loading.
pub trait HasMany<C: Entity>: Entity {
    /// Column on `C` referencing `Self`'s primary key.
    const FOREIGN_KEY: &'static str;

    /// Returns the parent id stored on a child row.
    fn parent_id(child: &C) -> i64;

    /// Stores the loaded children on the parent.
    fn attach(&mut self, children: Vec<C>);
}
