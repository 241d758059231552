//! Entity trait for the relational adapter

use std::future::Future;

use sqlx::postgres::PgRow;
use sqlx::{FromRow, PgPool};

use crate::repository::{FieldValue, RepositoryError, RepositoryOperation, RepositoryResult};

/// A record type stored in a PostgreSQL table
///
/// The adapter stays generic over the record shape: the entity declares its
/// table, key column, and how its fields map to column values. Insert and
/// update values must be scalar (`List` is not a column type).
///
/// # Example
///
/// ```rust,ignore
/// #[derive(sqlx::FromRow)]
/// struct Account {
///     id: i64,
///     email: String,
///     balance: i64,
/// }
///
/// impl SqlEntity for Account {
///     fn table() -> &'static str {
///         "accounts"
///     }
///
///     fn insert_columns() -> &'static [&'static str] {
///         &["email", "balance"]
///     }
///
///     fn insert_values(&self) -> Vec<FieldValue> {
///         vec![self.email.clone().into(), self.balance.into()]
///     }
///
///     fn update_pairs(&self) -> Vec<(&'static str, FieldValue)> {
///         vec![("email", self.email.clone().into()), ("balance", self.balance.into())]
///     }
/// }
/// ```
pub trait SqlEntity: Sized + for<'r> FromRow<'r, PgRow> + Send + Sync + Unpin {
    /// Table name
    fn table() -> &'static str;

    /// Primary-key column; the external string form of an identifier must
    /// parse as a 64-bit integer for this column
    fn id_column() -> &'static str {
        "id"
    }

    /// Columns written on insert, excluding the generated key
    fn insert_columns() -> &'static [&'static str];

    /// Values written on insert, aligned with
    /// [`insert_columns`](Self::insert_columns)
    fn insert_values(&self) -> Vec<FieldValue>;

    /// Column/value pairs written on update
    ///
    /// Entities decide which fields participate; pairs for unset optional
    /// fields may be omitted to leave stored values untouched.
    fn update_pairs(&self) -> Vec<(&'static str, FieldValue)>;

    /// Batch-load the named relation into already-fetched rows
    ///
    /// Called once per relation requested through `with()`. Implementations
    /// should issue one query for all rows rather than one per row. Relation
    /// prefetch always reads through the read pool, even under a bound
    /// transaction.
    ///
    /// The default knows no relations and reports the name as unknown.
    fn load_relation(
        pool: &PgPool,
        rows: &mut [Self],
        relation: &str,
    ) -> impl Future<Output = RepositoryResult<()>> + Send {
        let _ = (pool, rows);
        let message = format!("unknown relation `{relation}` for {}", Self::table());
        async move { Err(RepositoryError::backend(RepositoryOperation::Find, message)) }
    }
}
