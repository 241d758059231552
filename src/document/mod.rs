//! Document adapter: [`Repository`]/[`Query`] over MongoDB
//!
//! Builder state is translated into BSON filter and update documents at
//! execution time. Identifiers are `ObjectId`s: the external string form is
//! the 24-character hex encoding, and malformed input surfaces as
//! `InvalidId`, never a driver error.
//!
//! Relation prefetch (`with`) is not supported: the store has no join
//! primitive, and the call is ignored (and logged) rather than emulated.
//! Batch mutation is weaker here than on the relational adapter: per-id
//! operations run sequentially with no enclosing transaction, so a failure
//! partway through leaves earlier writes committed.
//!
//! [`Repository`]: crate::repository::Repository
//! [`Query`]: crate::repository::Query

mod entity;
mod query;
mod repository;

pub use entity::DocumentEntity;
pub use query::DocumentQuery;
pub use repository::DocumentRepository;

pub(crate) use query::bson_value;
