//! # polystore
//!
//! Polymorphic repository and query layer over PostgreSQL and MongoDB.
//!
//! One generic [`Repository`]/[`Query`] contract — filter, sort, paginate,
//! mutate — implemented independently against a relational store (`sqlx`)
//! and a document store (`mongodb`), so domain services issue identical
//! calls regardless of which backend is configured. Semantics that cannot
//! be unified (batch-mutation atomicity, relation prefetch) are explicit,
//! documented divergences rather than silent ones.
//!
//! [`Repository`]: repository::Repository
//! [`Query`]: repository::Query
//!
//! ## Example
//!
//! ```rust,no_run
//! use polystore::prelude::*;
//! use polystore::users::UserRepository;
//!
//! #[tokio::main]
//! async fn main() -> std::result::Result<(), Box<dyn std::error::Error>> {
//!     let config = StoreConfig::load()?;
//!     let db = Database::connect(&config).await?;
//!
//!     // Bound once to the configured backend; identical calls either way.
//!     let users = UserRepository::new(&db)?;
//!     let admins = users.find_by_role("admin").await?;
//!     let (meta, page) = users.list(1, 20).await?;
//!     println!("{} admins, {} users total", admins.len(), meta.total);
//!     Ok(())
//! }
//! ```

pub mod config;
pub mod database;
pub mod document;
pub mod error;
pub mod repository;
pub mod sql;
pub mod users;

/// Commonly used types
pub mod prelude {
    pub use crate::config::{StorageBackend, StoreConfig};
    pub use crate::database::Database;
    pub use crate::document::{DocumentEntity, DocumentRepository};
    pub use crate::error::{Result, StoreError};
    pub use crate::repository::{
        FieldValue, FilterCondition, OrderDirection, PaginationMeta, Query, Repository,
        RepositoryError, RepositoryErrorKind, RepositoryResult, TransactionHandle,
    };
    pub use crate::sql::{SqlEntity, SqlPools, SqlRepository};
}
