//! Generic repository and query contracts
//!
//! One set of semantics over two structurally different storage backends:
//! predicate composition, pagination arithmetic, error normalization,
//! transaction scoping, atomic counters, and batch mutation behave the same
//! through [`Repository`] and [`Query`] regardless of whether the relational
//! ([`crate::sql`]) or document ([`crate::document`]) adapter is bound —
//! except where the contract explicitly documents a divergence (batch
//! mutation atomicity, relation prefetch).

mod error;
mod filter;
mod pagination;
mod traits;
mod transaction;

pub use error::{RepositoryError, RepositoryErrorKind, RepositoryOperation};
pub use filter::{
    BoolGroup, FieldValue, FilterCondition, FilterOperator, GroupOp, OrderDirection, QueryState,
};
pub use pagination::{PaginationMeta, Paginator};
pub use traits::{Query, Repository, RepositoryResult};
pub use transaction::TransactionHandle;

pub(crate) use transaction::{HandleKind, SharedPgTransaction, SharedSession};
