//! Opaque transaction handles
//!
//! A [`TransactionHandle`] is a tagged capability over one backend's native
//! transaction object, exposing only commit and rollback. Handles are
//! constructed exclusively by the connection-management layer
//! ([`crate::database`]); repositories receive one through
//! [`Repository::with_transaction`](super::traits::Repository::with_transaction)
//! and never fabricate their own.
//!
//! A handle is owned by exactly one logical operation. It must not be shared
//! or used concurrently from more than one task.

use std::fmt;
use std::sync::Arc;

use mongodb::ClientSession;
use sqlx::{Postgres, Transaction};
use tokio::sync::Mutex;

use super::error::{RepositoryError, RepositoryOperation};
use super::traits::RepositoryResult;

/// A PostgreSQL transaction shared between a handle and its bound
/// repository copies; `None` once committed or rolled back
pub(crate) type SharedPgTransaction = Arc<Mutex<Option<Transaction<'static, Postgres>>>>;

/// A MongoDB client session shared between a handle and its bound
/// repository copies
pub(crate) type SharedSession = Arc<Mutex<ClientSession>>;

#[derive(Clone)]
pub(crate) enum HandleKind {
    Sql(SharedPgTransaction),
    Document(SharedSession),
}

/// Opaque backend-specific transaction capability
pub struct TransactionHandle {
    pub(crate) kind: HandleKind,
}

impl TransactionHandle {
    pub(crate) fn sql(tx: Transaction<'static, Postgres>) -> Self {
        Self {
            kind: HandleKind::Sql(Arc::new(Mutex::new(Some(tx)))),
        }
    }

    pub(crate) fn document(session: ClientSession) -> Self {
        Self {
            kind: HandleKind::Document(Arc::new(Mutex::new(session))),
        }
    }

    /// Commit the transaction, consuming the handle
    pub async fn commit(self) -> RepositoryResult<()> {
        match self.kind {
            HandleKind::Sql(tx) => {
                let mut guard = tx.lock().await;
                let tx = guard.take().ok_or_else(Self::completed)?;
                tx.commit().await.map_err(|e| {
                    RepositoryError::backend(RepositoryOperation::Transaction, e.to_string())
                })
            }
            HandleKind::Document(session) => {
                let mut guard = session.lock().await;
                guard.commit_transaction().await.map_err(|e| {
                    RepositoryError::backend(RepositoryOperation::Transaction, e.to_string())
                })
            }
        }
    }

    /// Roll the transaction back, consuming the handle
    pub async fn rollback(self) -> RepositoryResult<()> {
        match self.kind {
            HandleKind::Sql(tx) => {
                let mut guard = tx.lock().await;
                let tx = guard.take().ok_or_else(Self::completed)?;
                tx.rollback().await.map_err(|e| {
                    RepositoryError::backend(RepositoryOperation::Transaction, e.to_string())
                })
            }
            HandleKind::Document(session) => {
                let mut guard = session.lock().await;
                guard.abort_transaction().await.map_err(|e| {
                    RepositoryError::backend(RepositoryOperation::Transaction, e.to_string())
                })
            }
        }
    }

    fn completed() -> RepositoryError {
        RepositoryError::backend(
            RepositoryOperation::Transaction,
            "transaction already committed or rolled back",
        )
    }
}

impl fmt::Debug for TransactionHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.kind {
            HandleKind::Sql(_) => f.write_str("TransactionHandle::Sql"),
            HandleKind::Document(_) => f.write_str("TransactionHandle::Document"),
        }
    }
}
