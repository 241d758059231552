//! Repository and query trait definitions
//!
//! Generic contracts for single-entity CRUD, chainable querying, bulk and
//! atomic mutation, and transaction scoping, implemented independently by the
//! relational ([`crate::sql`]) and document ([`crate::document`]) adapters.
//! Both traits use RPITIT (Return Position Impl Trait In Traits), available
//! since Rust 1.75, so no `async_trait` is required.
//!
//! # Example
//!
//! ```rust,ignore
//! use polystore::repository::{Query, Repository};
//!
//! let admins_or_mods = repo
//!     .where_eq("role", "admin")
//!     .or_where("role", "moderator")
//!     .order_by_desc("created_at")
//!     .find()
//!     .await?;
//!
//! let (meta, page) = repo
//!     .where_eq("is_active", true)
//!     .paginate(2, 20)
//!     .execute()
//!     .await?;
//! ```

use std::future::Future;

use super::error::RepositoryError;
use super::filter::{FieldValue, FilterCondition, GroupOp, OrderDirection};
use super::pagination::Paginator;
use super::transaction::TransactionHandle;

/// Result type for repository operations
pub type RepositoryResult<T> = std::result::Result<T, RepositoryError>;

/// Generic per-entity-type repository contract
///
/// A repository is bound to one backend at construction and is immutable
/// afterward, so it is safe to share across concurrent callers; every call
/// chain gets its own [`Query`] builder. Identifiers cross this API in their
/// external string form; each adapter owns the conversion to its native
/// identifier type and reports [`RepositoryErrorKind::InvalidId`] on
/// malformed input.
///
/// [`RepositoryErrorKind::InvalidId`]: super::error::RepositoryErrorKind
pub trait Repository<T>: Send + Sync {
    /// The query builder type produced by the query-entry methods
    type Query: Query<T>;

    /// The entity (table or collection) name, used in error context
    fn entity_name(&self) -> &str;

    /// Find a record by its identifier
    ///
    /// Returns a `NotFound` error when no record matches and `InvalidId` when
    /// the identifier cannot be converted to the adapter's native form.
    fn find_by_id(&self, id: &str) -> impl Future<Output = RepositoryResult<T>> + Send;

    /// [`find_by_id`](Self::find_by_id) with a descriptive not-found message;
    /// the error kind is preserved
    fn find_or_fail(&self, id: &str) -> impl Future<Output = RepositoryResult<T>> + Send {
        async move {
            self.find_by_id(id).await.map_err(|e| {
                if e.is_not_found() {
                    let message = format!("{} with id {} not found", self.entity_name(), id);
                    e.with_message(message)
                } else {
                    e
                }
            })
        }
    }

    /// Fetch the first record
    fn first(&self) -> impl Future<Output = RepositoryResult<T>> + Send;

    /// [`first`](Self::first) with a descriptive not-found message
    fn first_or_fail(&self) -> impl Future<Output = RepositoryResult<T>> + Send {
        async move {
            self.first().await.map_err(|e| {
                if e.is_not_found() {
                    let message = format!("no {} found", self.entity_name());
                    e.with_message(message)
                } else {
                    e
                }
            })
        }
    }

    /// Fetch all records
    fn find_all(&self) -> impl Future<Output = RepositoryResult<Vec<T>>> + Send;

    /// Insert a new record, returning the stored identifier in its external
    /// string form; the returned identifier is accepted unchanged by
    /// [`find_by_id`](Self::find_by_id)
    fn create(&self, data: &T) -> impl Future<Output = RepositoryResult<String>> + Send;

    /// Insert multiple records
    ///
    /// The relational adapter batches the insert in fixed-size chunks on the
    /// active connection; the document adapter issues one multi-document
    /// insert call.
    fn create_batch(&self, data: &[T]) -> impl Future<Output = RepositoryResult<()>> + Send;

    /// Update the identified record; `NotFound` when nothing matched
    fn update(&self, id: &str, data: &T) -> impl Future<Output = RepositoryResult<()>> + Send;

    /// Delete the identified record; `NotFound` when nothing matched
    fn delete(&self, id: &str) -> impl Future<Output = RepositoryResult<()>> + Send;

    /// Update multiple records pairwise by identifier
    ///
    /// Atomicity differs by adapter: the relational adapter wraps the batch
    /// in a single transaction (all-or-nothing), the document adapter applies
    /// updates sequentially and leaves earlier updates committed when a later
    /// one fails. Callers that need all-or-nothing semantics on the document
    /// adapter must not use this method.
    fn update_batch(
        &self,
        ids: &[String],
        data: &[T],
    ) -> impl Future<Output = RepositoryResult<()>> + Send;

    /// Delete multiple records by identifier (same atomicity split as
    /// [`update_batch`](Self::update_batch))
    fn delete_batch(&self, ids: &[String]) -> impl Future<Output = RepositoryResult<()>> + Send;

    /// A fresh, unfiltered query builder
    fn query(&self) -> Self::Query;

    /// Start a query with an equality condition
    fn where_eq(&self, field: impl Into<String>, value: impl Into<FieldValue>) -> Self::Query {
        self.query().where_eq(field, value)
    }

    /// Start a query with an IN condition
    fn where_in(&self, field: impl Into<String>, values: impl Into<FieldValue>) -> Self::Query {
        self.query().where_in(field, values)
    }

    /// Start a query with a NOT IN condition
    fn where_not_in(
        &self,
        field: impl Into<String>,
        values: impl Into<FieldValue>,
    ) -> Self::Query {
        self.query().where_not_in(field, values)
    }

    /// Start a query with an inclusive range condition
    fn where_between(
        &self,
        field: impl Into<String>,
        start: impl Into<FieldValue>,
        end: impl Into<FieldValue>,
    ) -> Self::Query {
        self.query().where_between(field, start, end)
    }

    /// Start a query with an is-null condition
    fn where_null(&self, field: impl Into<String>) -> Self::Query {
        self.query().where_null(field)
    }

    /// Start a query with an is-not-null condition
    fn where_not_null(&self, field: impl Into<String>) -> Self::Query {
        self.query().where_not_null(field)
    }

    /// Start a query that eager-loads the named relation
    fn with(&self, relation: impl Into<String>) -> Self::Query {
        self.query().with(relation)
    }

    /// Start a query with one sort term
    fn order_by(&self, field: impl Into<String>, direction: OrderDirection) -> Self::Query {
        self.query().order_by(field, direction)
    }

    /// Start a query with a result limit
    fn limit(&self, limit: i64) -> Self::Query {
        self.query().limit(limit)
    }

    /// Start a query with a result offset
    fn offset(&self, offset: i64) -> Self::Query {
        self.query().offset(offset)
    }

    /// True when the store holds at least one record
    fn exists(&self) -> impl Future<Output = RepositoryResult<bool>> + Send {
        let query = self.query();
        async move { query.exists().await }
    }

    /// True when the store holds no records
    fn does_not_exist(&self) -> impl Future<Output = RepositoryResult<bool>> + Send {
        async move { Ok(!self.exists().await?) }
    }

    /// Count all records
    fn count(&self) -> impl Future<Output = RepositoryResult<i64>> + Send {
        let query = self.query();
        async move { query.count().await }
    }

    /// Project a single field from every record
    fn pluck(&self, field: &str) -> impl Future<Output = RepositoryResult<Vec<FieldValue>>> + Send {
        let query = self.query();
        let field = field.to_string();
        async move { query.pluck(&field).await }
    }

    /// [`pluck`](Self::pluck) narrowed to strings; values that are not
    /// strings are silently dropped
    fn pluck_string(
        &self,
        field: &str,
    ) -> impl Future<Output = RepositoryResult<Vec<String>>> + Send {
        let values = self.pluck(field);
        async move {
            Ok(values
                .await?
                .into_iter()
                .filter_map(|v| match v {
                    FieldValue::String(s) => Some(s),
                    _ => None,
                })
                .collect())
        }
    }

    /// [`pluck`](Self::pluck) narrowed to integers; values that are not
    /// integers are silently dropped
    fn pluck_int(&self, field: &str) -> impl Future<Output = RepositoryResult<Vec<i64>>> + Send {
        let values = self.pluck(field);
        async move {
            Ok(values
                .await?
                .into_iter()
                .filter_map(|v| v.as_int())
                .collect())
        }
    }

    /// Atomically add `delta` to a numeric field server-side
    fn increment(
        &self,
        id: &str,
        field: &str,
        delta: i64,
    ) -> impl Future<Output = RepositoryResult<()>> + Send;

    /// Atomically subtract `delta` from a numeric field; defined as
    /// increment by the negated delta
    fn decrement(
        &self,
        id: &str,
        field: &str,
        delta: i64,
    ) -> impl Future<Output = RepositoryResult<()>> + Send {
        self.increment(id, field, -delta)
    }

    /// A copy of this repository bound to the supplied transaction handle
    ///
    /// # Panics
    ///
    /// Panics when the handle was produced for the other backend; binding a
    /// foreign handle is a programmer error, not a runtime condition.
    fn with_transaction(&self, tx: &TransactionHandle) -> Self
    where
        Self: Sized;
}

/// Chainable query builder
///
/// Builder calls take and return the builder by value, accumulating filter,
/// sort, and paging state until a terminal method executes against the bound
/// store. A builder is exclusively owned by the call chain that created it:
/// it must not be retained and reused across concurrent logical queries —
/// start each query from a fresh repository entry call instead.
pub trait Query<T>: Send + Sync + Sized {
    /// Add a conjunctive (AND-ed) condition
    fn filter(self, condition: FilterCondition) -> Self;

    /// Add `condition` as an alternative branch of the `op` combinator group
    /// (see [`QueryState::push_group`](super::filter::QueryState::push_group))
    fn combine(self, op: GroupOp, condition: FilterCondition) -> Self;

    /// Add an equality condition
    fn where_eq(self, field: impl Into<String>, value: impl Into<FieldValue>) -> Self {
        self.filter(FilterCondition::eq(field, value))
    }

    /// Add an IN condition
    fn where_in(self, field: impl Into<String>, values: impl Into<FieldValue>) -> Self {
        self.filter(FilterCondition::is_in(field, values))
    }

    /// Add a NOT IN condition
    fn where_not_in(self, field: impl Into<String>, values: impl Into<FieldValue>) -> Self {
        self.filter(FilterCondition::not_in(field, values))
    }

    /// Add an inclusive range condition
    fn where_between(
        self,
        field: impl Into<String>,
        start: impl Into<FieldValue>,
        end: impl Into<FieldValue>,
    ) -> Self {
        self.filter(FilterCondition::between(field, start, end))
    }

    /// Add an is-null condition
    fn where_null(self, field: impl Into<String>) -> Self {
        self.filter(FilterCondition::is_null(field))
    }

    /// Add an is-not-null condition
    fn where_not_null(self, field: impl Into<String>) -> Self {
        self.filter(FilterCondition::is_not_null(field))
    }

    /// Add an equality condition as an OR alternative, regrouping previously
    /// accumulated predicates into the first alternative on the first call
    fn or_where(self, field: impl Into<String>, value: impl Into<FieldValue>) -> Self {
        self.combine(GroupOp::Or, FilterCondition::eq(field, value))
    }

    /// Add an equality condition as a NOR alternative (none of the
    /// alternatives may match)
    fn nor_where(self, field: impl Into<String>, value: impl Into<FieldValue>) -> Self {
        self.combine(GroupOp::Nor, FilterCondition::eq(field, value))
    }

    /// Add an equality condition conjunctively; the AND regrouping of
    /// previously accumulated predicates is the identity, so this is
    /// equivalent to [`where_eq`](Self::where_eq)
    fn and_where(self, field: impl Into<String>, value: impl Into<FieldValue>) -> Self {
        self.filter(FilterCondition::eq(field, value))
    }

    /// Eager-load the named relation (relational adapter; the document
    /// adapter documents this as unsupported and ignores it)
    fn with(self, relation: impl Into<String>) -> Self;

    /// Append one sort term; the first term has priority
    fn order_by(self, field: impl Into<String>, direction: OrderDirection) -> Self;

    /// Append an ascending sort term
    fn order_by_asc(self, field: impl Into<String>) -> Self {
        self.order_by(field, OrderDirection::Ascending)
    }

    /// Append a descending sort term
    fn order_by_desc(self, field: impl Into<String>) -> Self {
        self.order_by(field, OrderDirection::Descending)
    }

    /// Limit the number of results
    fn limit(self, limit: i64) -> Self;

    /// Skip the first `offset` results
    fn offset(self, offset: i64) -> Self;

    /// Execute and return all matching records
    fn find(&self) -> impl Future<Output = RepositoryResult<Vec<T>>> + Send;

    /// Execute and return the first matching record; `NotFound` when none
    fn first(&self) -> impl Future<Output = RepositoryResult<T>> + Send;

    /// [`first`](Self::first) with a descriptive not-found message
    fn first_or_fail(&self) -> impl Future<Output = RepositoryResult<T>> + Send {
        async move {
            self.first().await.map_err(|e| {
                if e.is_not_found() {
                    e.with_message("no records found matching query")
                } else {
                    e
                }
            })
        }
    }

    /// Count matching records, ignoring limit and offset
    fn count(&self) -> impl Future<Output = RepositoryResult<i64>> + Send;

    /// True when at least one record matches
    fn exists(&self) -> impl Future<Output = RepositoryResult<bool>> + Send {
        async move { Ok(self.count().await? > 0) }
    }

    /// True when no record matches
    fn does_not_exist(&self) -> impl Future<Output = RepositoryResult<bool>> + Send {
        async move { Ok(!self.exists().await?) }
    }

    /// Project a single field from every matching record
    fn pluck(&self, field: &str) -> impl Future<Output = RepositoryResult<Vec<FieldValue>>> + Send;

    /// [`pluck`](Self::pluck) narrowed to strings; non-strings are dropped
    fn pluck_string(
        &self,
        field: &str,
    ) -> impl Future<Output = RepositoryResult<Vec<String>>> + Send {
        let values = self.pluck(field);
        async move {
            Ok(values
                .await?
                .into_iter()
                .filter_map(|v| match v {
                    FieldValue::String(s) => Some(s),
                    _ => None,
                })
                .collect())
        }
    }

    /// [`pluck`](Self::pluck) narrowed to integers; non-integers are dropped
    fn pluck_int(&self, field: &str) -> impl Future<Output = RepositoryResult<Vec<i64>>> + Send {
        let values = self.pluck(field);
        async move {
            Ok(values
                .await?
                .into_iter()
                .filter_map(|v| v.as_int())
                .collect())
        }
    }

    /// Delete every matching record, returning how many were removed
    fn delete(&self) -> impl Future<Output = RepositoryResult<u64>> + Send;

    /// Set the given fields on every matching record, returning how many
    /// were written
    fn update(
        &self,
        fields: Vec<(String, FieldValue)>,
    ) -> impl Future<Output = RepositoryResult<u64>> + Send;

    /// Wrap this query in the backend-agnostic pagination executor
    fn paginate(self, page: i64, per_page: i64) -> Paginator<T, Self> {
        Paginator::new(self, page, per_page)
    }
}
