//! Repository implementation for the relational adapter

use std::marker::PhantomData;

use sqlx::postgres::PgRow;
use sqlx::{Postgres, QueryBuilder};

use crate::repository::{
    FieldValue, HandleKind, QueryState, Repository, RepositoryError, RepositoryErrorKind,
    RepositoryOperation, RepositoryResult, SharedPgTransaction, TransactionHandle,
};

use super::entity::SqlEntity;
use super::query::{bind_scalar, validate_field, SqlQuery};
use super::SqlPools;

/// Rows inserted per statement by `create_batch`
const INSERT_CHUNK_SIZE: usize = 100;

/// Connection to route an operation through
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Route {
    /// Read pool, unless a transaction is bound
    Read,
    /// Write pool; always used under a bound transaction
    Write,
}

/// [`Repository`] over a PostgreSQL table
///
/// Immutable after construction and cheap to clone; every query chain starts
/// from a fresh builder. A transaction-bound copy (see
/// [`with_transaction`](Repository::with_transaction)) routes every operation
/// through the bound transaction instead of the pools.
pub struct SqlRepository<T: SqlEntity> {
    pools: SqlPools,
    tx: Option<SharedPgTransaction>,
    _record: PhantomData<fn() -> T>,
}

impl<T: SqlEntity> Clone for SqlRepository<T> {
    fn clone(&self) -> Self {
        Self {
            pools: self.pools.clone(),
            tx: self.tx.clone(),
            _record: PhantomData,
        }
    }
}

impl<T: SqlEntity> SqlRepository<T> {
    /// Bind the adapter to a configured connection pair
    pub fn new(pools: SqlPools) -> Self {
        Self {
            pools,
            tx: None,
            _record: PhantomData,
        }
    }

    pub(crate) fn read_pool(&self) -> &sqlx::PgPool {
        &self.pools.read
    }

    fn parse_id(id: &str) -> RepositoryResult<i64> {
        id.trim()
            .parse()
            .map_err(|_| RepositoryError::invalid_id(T::table(), id))
    }

    fn completed_tx(op: RepositoryOperation) -> RepositoryError {
        RepositoryError::backend(op, "bound transaction already committed or rolled back")
            .with_entity(T::table())
    }

    pub(crate) async fn fetch_all(
        &self,
        qb: &mut QueryBuilder<'static, Postgres>,
        route: Route,
        op: RepositoryOperation,
    ) -> RepositoryResult<Vec<T>> {
        let result = if let Some(tx) = &self.tx {
            let mut guard = tx.lock().await;
            let tx = guard.as_mut().ok_or_else(|| Self::completed_tx(op))?;
            qb.build_query_as::<T>().fetch_all(&mut **tx).await
        } else {
            let pool = self.route(route);
            qb.build_query_as::<T>().fetch_all(pool).await
        };
        result.map_err(|e| map_sqlx_error(op, T::table(), e))
    }

    pub(crate) async fn fetch_optional(
        &self,
        qb: &mut QueryBuilder<'static, Postgres>,
        route: Route,
        op: RepositoryOperation,
    ) -> RepositoryResult<Option<T>> {
        let result = if let Some(tx) = &self.tx {
            let mut guard = tx.lock().await;
            let tx = guard.as_mut().ok_or_else(|| Self::completed_tx(op))?;
            qb.build_query_as::<T>().fetch_optional(&mut **tx).await
        } else {
            let pool = self.route(route);
            qb.build_query_as::<T>().fetch_optional(pool).await
        };
        result.map_err(|e| map_sqlx_error(op, T::table(), e))
    }

    pub(crate) async fn fetch_scalar(
        &self,
        qb: &mut QueryBuilder<'static, Postgres>,
        route: Route,
        op: RepositoryOperation,
    ) -> RepositoryResult<i64> {
        let result = if let Some(tx) = &self.tx {
            let mut guard = tx.lock().await;
            let tx = guard.as_mut().ok_or_else(|| Self::completed_tx(op))?;
            qb.build_query_scalar::<i64>().fetch_one(&mut **tx).await
        } else {
            let pool = self.route(route);
            qb.build_query_scalar::<i64>().fetch_one(pool).await
        };
        result.map_err(|e| map_sqlx_error(op, T::table(), e))
    }

    pub(crate) async fn fetch_rows(
        &self,
        qb: &mut QueryBuilder<'static, Postgres>,
        route: Route,
        op: RepositoryOperation,
    ) -> RepositoryResult<Vec<PgRow>> {
        let result = if let Some(tx) = &self.tx {
            let mut guard = tx.lock().await;
            let tx = guard.as_mut().ok_or_else(|| Self::completed_tx(op))?;
            qb.build().fetch_all(&mut **tx).await
        } else {
            let pool = self.route(route);
            qb.build().fetch_all(pool).await
        };
        result.map_err(|e| map_sqlx_error(op, T::table(), e))
    }

    /// Execute a statement, returning the number of affected rows
    pub(crate) async fn execute(
        &self,
        qb: &mut QueryBuilder<'static, Postgres>,
        op: RepositoryOperation,
    ) -> RepositoryResult<u64> {
        let result = if let Some(tx) = &self.tx {
            let mut guard = tx.lock().await;
            let tx = guard.as_mut().ok_or_else(|| Self::completed_tx(op))?;
            qb.build().execute(&mut **tx).await
        } else {
            qb.build().execute(&self.pools.write).await
        };
        result
            .map(|done| done.rows_affected())
            .map_err(|e| map_sqlx_error(op, T::table(), e))
    }

    /// Escape hatch for store-specific SQL the generic contract does not
    /// cover; rows decode as the entity type. Positional parameters bind
    /// from `binds` in order.
    pub async fn raw(&self, sql: &str, binds: Vec<FieldValue>) -> RepositoryResult<Vec<T>> {
        let mut query = sqlx::query_as::<sqlx::Postgres, T>(sql);
        for value in binds {
            query = match value {
                FieldValue::String(s) => query.bind(s),
                FieldValue::Int(n) => query.bind(n),
                FieldValue::Float(x) => query.bind(x),
                FieldValue::Bool(b) => query.bind(b),
                FieldValue::DateTime(ts) => query.bind(ts),
                FieldValue::Null => query.bind(Option::<String>::None),
                FieldValue::List(_) => {
                    return Err(RepositoryError::backend(
                        RepositoryOperation::Find,
                        "list value in scalar position",
                    )
                    .with_entity(T::table()))
                }
            };
        }
        let result = if let Some(tx) = &self.tx {
            let mut guard = tx.lock().await;
            let tx = guard
                .as_mut()
                .ok_or_else(|| Self::completed_tx(RepositoryOperation::Find))?;
            query.fetch_all(&mut **tx).await
        } else {
            query.fetch_all(&self.pools.read).await
        };
        result.map_err(|e| map_sqlx_error(RepositoryOperation::Find, T::table(), e))
    }

    fn route(&self, route: Route) -> &sqlx::PgPool {
        match route {
            Route::Read => &self.pools.read,
            Route::Write => &self.pools.write,
        }
    }

    fn insert_builder(records: &[T]) -> QueryBuilder<'static, Postgres> {
        let mut qb = QueryBuilder::new(format!(
            "INSERT INTO {} ({}) ",
            T::table(),
            T::insert_columns().join(", ")
        ));
        qb.push_values(records, |mut row, record| {
            for value in record.insert_values() {
                match value {
                    FieldValue::String(s) => {
                        row.push_bind(s);
                    }
                    FieldValue::Int(n) => {
                        row.push_bind(n);
                    }
                    FieldValue::Float(x) => {
                        row.push_bind(x);
                    }
                    FieldValue::Bool(b) => {
                        row.push_bind(b);
                    }
                    FieldValue::DateTime(ts) => {
                        row.push_bind(ts);
                    }
                    FieldValue::Null | FieldValue::List(_) => {
                        row.push("NULL");
                    }
                }
            }
        });
        qb
    }

    fn update_builder(id: i64, record: &T) -> RepositoryResult<QueryBuilder<'static, Postgres>> {
        let pairs = record.update_pairs();
        if pairs.is_empty() {
            return Err(RepositoryError::backend(
                RepositoryOperation::Update,
                "no updatable fields",
            )
            .with_entity(T::table()));
        }
        let mut qb = QueryBuilder::new(format!("UPDATE {} SET ", T::table()));
        for (i, (column, value)) in pairs.iter().enumerate() {
            if i > 0 {
                qb.push(", ");
            }
            qb.push(*column);
            qb.push(" = ");
            bind_scalar(&mut qb, value)?;
        }
        qb.push(format!(" WHERE {} = ", T::id_column()));
        qb.push_bind(id);
        Ok(qb)
    }
}

impl<T: SqlEntity> Repository<T> for SqlRepository<T> {
    type Query = SqlQuery<T>;

    fn entity_name(&self) -> &str {
        T::table()
    }

    async fn find_by_id(&self, id: &str) -> RepositoryResult<T> {
        let key = Self::parse_id(id)?;
        let mut qb = QueryBuilder::new(format!(
            "SELECT * FROM {} WHERE {} = ",
            T::table(),
            T::id_column()
        ));
        qb.push_bind(key);
        self.fetch_optional(&mut qb, Route::Read, RepositoryOperation::FindById)
            .await?
            .ok_or_else(|| RepositoryError::not_found(T::table(), id))
    }

    async fn first(&self) -> RepositoryResult<T> {
        let mut qb = QueryBuilder::new(format!(
            "SELECT * FROM {} ORDER BY {} LIMIT 1",
            T::table(),
            T::id_column()
        ));
        self.fetch_optional(&mut qb, Route::Read, RepositoryOperation::First)
            .await?
            .ok_or_else(|| {
                RepositoryError::new(
                    RepositoryOperation::First,
                    RepositoryErrorKind::NotFound,
                    "record not found",
                )
                .with_entity(T::table())
            })
    }

    async fn find_all(&self) -> RepositoryResult<Vec<T>> {
        let mut qb = QueryBuilder::new(format!("SELECT * FROM {}", T::table()));
        self.fetch_all(&mut qb, Route::Read, RepositoryOperation::Find)
            .await
    }

    async fn create(&self, data: &T) -> RepositoryResult<String> {
        let mut qb = Self::insert_builder(std::slice::from_ref(data));
        qb.push(format!(" RETURNING {}", T::id_column()));
        let id = self
            .fetch_scalar(&mut qb, Route::Write, RepositoryOperation::Create)
            .await?;
        tracing::debug!(table = T::table(), id, "record created");
        Ok(id.to_string())
    }

    async fn create_batch(&self, data: &[T]) -> RepositoryResult<()> {
        if data.is_empty() {
            return Ok(());
        }
        for chunk in data.chunks(INSERT_CHUNK_SIZE) {
            let mut qb = Self::insert_builder(chunk);
            self.execute(&mut qb, RepositoryOperation::CreateBatch)
                .await?;
        }
        Ok(())
    }

    async fn update(&self, id: &str, data: &T) -> RepositoryResult<()> {
        let key = Self::parse_id(id)?;
        let mut qb = Self::update_builder(key, data)?;
        let affected = self.execute(&mut qb, RepositoryOperation::Update).await?;
        if affected == 0 {
            return Err(RepositoryError::not_found(T::table(), id)
                .with_operation(RepositoryOperation::Update));
        }
        Ok(())
    }

    async fn delete(&self, id: &str) -> RepositoryResult<()> {
        let key = Self::parse_id(id)?;
        let mut qb = QueryBuilder::new(format!(
            "DELETE FROM {} WHERE {} = ",
            T::table(),
            T::id_column()
        ));
        qb.push_bind(key);
        let affected = self.execute(&mut qb, RepositoryOperation::Delete).await?;
        if affected == 0 {
            return Err(RepositoryError::not_found(T::table(), id)
                .with_operation(RepositoryOperation::Delete));
        }
        Ok(())
    }

    /// All-or-nothing: every per-id update runs inside one transaction, and
    /// any failure rolls the whole batch back. Under an already-bound
    /// transaction the updates join it instead, and the enclosing transaction
    /// governs atomicity.
    async fn update_batch(&self, ids: &[String], data: &[T]) -> RepositoryResult<()> {
        if ids.len() != data.len() {
            return Err(RepositoryError::backend(
                RepositoryOperation::UpdateBatch,
                "ids and data must have the same length",
            )
            .with_entity(T::table()));
        }
        let mut keys = Vec::with_capacity(ids.len());
        for id in ids {
            keys.push(Self::parse_id(id)?);
        }

        if self.tx.is_some() {
            for (key, record) in keys.iter().zip(data) {
                let mut qb = Self::update_builder(*key, record)?;
                self.execute(&mut qb, RepositoryOperation::UpdateBatch)
                    .await?;
            }
            return Ok(());
        }

        let mut tx = self.pools.write.begin().await.map_err(|e| {
            map_sqlx_error(RepositoryOperation::UpdateBatch, T::table(), e)
        })?;
        for (key, record) in keys.iter().zip(data) {
            let mut qb = Self::update_builder(*key, record)?;
            if let Err(e) = qb.build().execute(&mut *tx).await {
                tx.rollback().await.map_err(|e| {
                    map_sqlx_error(RepositoryOperation::UpdateBatch, T::table(), e)
                })?;
                tracing::debug!(table = T::table(), "batch update rolled back");
                return Err(map_sqlx_error(
                    RepositoryOperation::UpdateBatch,
                    T::table(),
                    e,
                ));
            }
        }
        tx.commit()
            .await
            .map_err(|e| map_sqlx_error(RepositoryOperation::UpdateBatch, T::table(), e))
    }

    async fn delete_batch(&self, ids: &[String]) -> RepositoryResult<()> {
        if ids.is_empty() {
            return Ok(());
        }
        let mut keys = Vec::with_capacity(ids.len());
        for id in ids {
            keys.push(Self::parse_id(id)?);
        }
        let mut qb = QueryBuilder::new(format!(
            "DELETE FROM {} WHERE {} = ANY(",
            T::table(),
            T::id_column()
        ));
        qb.push_bind(keys);
        qb.push(")");
        self.execute(&mut qb, RepositoryOperation::DeleteBatch)
            .await?;
        Ok(())
    }

    fn query(&self) -> Self::Query {
        SqlQuery::new(self.clone(), QueryState::default())
    }

    /// Single `SET field = field + delta` statement; no read-modify-write
    async fn increment(&self, id: &str, field: &str, delta: i64) -> RepositoryResult<()> {
        validate_field(field)?;
        let key = Self::parse_id(id)?;
        let mut qb = QueryBuilder::new(format!(
            "UPDATE {table} SET {field} = {field} + ",
            table = T::table(),
        ));
        qb.push_bind(delta);
        qb.push(format!(" WHERE {} = ", T::id_column()));
        qb.push_bind(key);
        self.execute(&mut qb, RepositoryOperation::Increment)
            .await?;
        Ok(())
    }

    fn with_transaction(&self, tx: &TransactionHandle) -> Self {
        let HandleKind::Sql(shared) = &tx.kind else {
            panic!("invalid transaction handle for relational repository");
        };
        Self {
            pools: self.pools.clone(),
            tx: Some(shared.clone()),
            _record: PhantomData,
        }
    }
}

/// Normalize a driver error into the repository taxonomy
pub(crate) fn map_sqlx_error(
    op: RepositoryOperation,
    entity: &str,
    err: sqlx::Error,
) -> RepositoryError {
    match &err {
        sqlx::Error::RowNotFound => RepositoryError::new(
            op,
            RepositoryErrorKind::NotFound,
            "record not found",
        )
        .with_entity(entity),
        sqlx::Error::Database(db) if db.is_unique_violation() => {
            RepositoryError::duplicate(entity, db.message().to_string()).with_operation(op)
        }
        _ => RepositoryError::backend(op, err.to_string()).with_entity(entity),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(sqlx::FromRow)]
    struct Probe {
        #[allow(dead_code)]
        id: i64,
    }

    impl SqlEntity for Probe {
        fn table() -> &'static str {
            "probes"
        }

        fn insert_columns() -> &'static [&'static str] {
            &["name"]
        }

        fn insert_values(&self) -> Vec<FieldValue> {
            vec![FieldValue::String("probe".to_string())]
        }

        fn update_pairs(&self) -> Vec<(&'static str, FieldValue)> {
            vec![("name", FieldValue::String("probe".to_string()))]
        }
    }

    #[test]
    fn id_parsing() {
        assert_eq!(SqlRepository::<Probe>::parse_id("42").unwrap(), 42);
        assert_eq!(SqlRepository::<Probe>::parse_id(" 7 ").unwrap(), 7);

        let err = SqlRepository::<Probe>::parse_id("not-a-number").unwrap_err();
        assert!(err.is_invalid_id());
        assert_eq!(err.entity, Some("probes".to_string()));

        let err = SqlRepository::<Probe>::parse_id("64f1b1b1b1b1b1b1b1b1b1b1").unwrap_err();
        assert!(err.is_invalid_id());
    }

    #[test]
    fn insert_builder_renders_multi_row_values() {
        let records = vec![Probe { id: 1 }, Probe { id: 2 }];
        let qb = SqlRepository::<Probe>::insert_builder(&records);
        assert_eq!(qb.sql(), "INSERT INTO probes (name) VALUES ($1), ($2)");
    }

    #[test]
    fn update_builder_targets_one_row() {
        let qb = SqlRepository::<Probe>::update_builder(9, &Probe { id: 9 }).unwrap();
        assert_eq!(qb.sql(), "UPDATE probes SET name = $1 WHERE id = $2");
    }
}
