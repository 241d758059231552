//! Relational adapter: [`Repository`]/[`Query`] over PostgreSQL via `sqlx`
//!
//! Builder state is translated into SQL clauses with bound parameters at
//! execution time. Reads route to the read pool when one is configured and no
//! transaction is bound; writes and every transaction-bound operation use the
//! write connection.
//!
//! [`Repository`]: crate::repository::Repository
//! [`Query`]: crate::repository::Query

mod entity;
mod query;
mod repository;

pub use entity::SqlEntity;
pub use query::SqlQuery;
pub use repository::SqlRepository;

use sqlx::PgPool;

/// Read/write connection pair consumed by the adapter
///
/// Constructed by the connection-management layer ([`crate::database`]); the
/// adapter never builds pools itself.
#[derive(Debug, Clone)]
pub struct SqlPools {
    /// Pool for writes and transactions
    pub write: PgPool,
    /// Pool for reads outside a transaction
    pub read: PgPool,
}

impl SqlPools {
    /// Pair a write pool with a read-replica pool
    pub fn new(write: PgPool, read: PgPool) -> Self {
        Self { write, read }
    }

    /// Use one pool for both roles (no replica configured)
    pub fn single(pool: PgPool) -> Self {
        Self {
            write: pool.clone(),
            read: pool,
        }
    }
}
