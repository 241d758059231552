//! Repository error taxonomy
//!
//! Every adapter normalizes its driver errors into [`RepositoryError`] before
//! returning, so callers can branch on [`RepositoryErrorKind`] without knowing
//! which backend is bound. The taxonomy is deliberately small: not-found,
//! invalid identifier, duplicate record, and a generic wrapped backend error
//! for everything else.

use std::fmt;

/// Operation being performed when the repository error occurred
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RepositoryOperation {
    /// Finding a single record by identifier
    FindById,
    /// Finding records with filters
    Find,
    /// Fetching the first matching record
    First,
    /// Counting records matching filters
    Count,
    /// Checking if any record matches
    Exists,
    /// Projecting a single field
    Pluck,
    /// Inserting a new record
    Create,
    /// Inserting multiple records
    CreateBatch,
    /// Updating an existing record
    Update,
    /// Updating multiple records by identifier
    UpdateBatch,
    /// Deleting a record
    Delete,
    /// Deleting multiple records by identifier
    DeleteBatch,
    /// Atomic server-side counter arithmetic
    Increment,
    /// Executing a paginated fetch
    Paginate,
    /// Transaction scoping (begin/commit/rollback)
    Transaction,
}

impl fmt::Display for RepositoryOperation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::FindById => write!(f, "find_by_id"),
            Self::Find => write!(f, "find"),
            Self::First => write!(f, "first"),
            Self::Count => write!(f, "count"),
            Self::Exists => write!(f, "exists"),
            Self::Pluck => write!(f, "pluck"),
            Self::Create => write!(f, "create"),
            Self::CreateBatch => write!(f, "create_batch"),
            Self::Update => write!(f, "update"),
            Self::UpdateBatch => write!(f, "update_batch"),
            Self::Delete => write!(f, "delete"),
            Self::DeleteBatch => write!(f, "delete_batch"),
            Self::Increment => write!(f, "increment"),
            Self::Paginate => write!(f, "paginate"),
            Self::Transaction => write!(f, "transaction"),
        }
    }
}

/// Category of repository error
///
/// `NotFound`, `InvalidId`, and `Duplicate` are the only kinds the contract
/// itself defines; `Backend` wraps everything the underlying driver reports
/// that the contract does not interpret.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RepositoryErrorKind {
    /// No matching row or document
    NotFound,
    /// Identifier is malformed or the wrong shape for the bound adapter
    InvalidId,
    /// Unique-constraint violation reported by the store
    Duplicate,
    /// Wrapped driver error, left for the caller to interpret
    Backend,
}

impl fmt::Display for RepositoryErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::NotFound => write!(f, "not_found"),
            Self::InvalidId => write!(f, "invalid_id"),
            Self::Duplicate => write!(f, "duplicate"),
            Self::Backend => write!(f, "backend"),
        }
    }
}

/// Structured repository error with operation context
///
/// # Example
///
/// ```rust
/// use polystore::repository::{RepositoryError, RepositoryErrorKind};
///
/// let error = RepositoryError::not_found("users", "42");
/// assert_eq!(error.kind, RepositoryErrorKind::NotFound);
/// assert!(error.to_string().contains("users"));
/// ```
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RepositoryError {
    /// The operation being performed when the error occurred
    pub operation: RepositoryOperation,
    /// The category of error
    pub kind: RepositoryErrorKind,
    /// Human-readable error message
    pub message: String,
    /// The entity (table or collection) involved
    pub entity: Option<String>,
    /// The external string form of the identifier involved
    pub record_id: Option<String>,
}

impl RepositoryError {
    /// Create a new repository error
    pub fn new(
        operation: RepositoryOperation,
        kind: RepositoryErrorKind,
        message: impl Into<String>,
    ) -> Self {
        Self {
            operation,
            kind,
            message: message.into(),
            entity: None,
            record_id: None,
        }
    }

    /// No matching record for the given identifier
    pub fn not_found(entity: impl Into<String>, record_id: impl Into<String>) -> Self {
        Self {
            operation: RepositoryOperation::FindById,
            kind: RepositoryErrorKind::NotFound,
            message: "record not found".to_string(),
            entity: Some(entity.into()),
            record_id: Some(record_id.into()),
        }
    }

    /// The identifier could not be converted to the adapter's native form
    pub fn invalid_id(entity: impl Into<String>, raw: impl Into<String>) -> Self {
        let raw = raw.into();
        Self {
            operation: RepositoryOperation::FindById,
            kind: RepositoryErrorKind::InvalidId,
            message: format!("invalid id `{raw}`"),
            entity: Some(entity.into()),
            record_id: Some(raw),
        }
    }

    /// The store reported a unique-constraint violation
    pub fn duplicate(entity: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            operation: RepositoryOperation::Create,
            kind: RepositoryErrorKind::Duplicate,
            message: message.into(),
            entity: Some(entity.into()),
            record_id: None,
        }
    }

    /// Wrap an uninterpreted driver error with operation context
    pub fn backend(operation: RepositoryOperation, message: impl Into<String>) -> Self {
        Self {
            operation,
            kind: RepositoryErrorKind::Backend,
            message: message.into(),
            entity: None,
            record_id: None,
        }
    }

    /// Attach entity context
    #[must_use]
    pub fn with_entity(mut self, entity: impl Into<String>) -> Self {
        self.entity = Some(entity.into());
        self
    }

    /// Attach the identifier involved
    #[must_use]
    pub fn with_record_id(mut self, record_id: impl Into<String>) -> Self {
        self.record_id = Some(record_id.into());
        self
    }

    /// Set the operation that caused the error
    #[must_use]
    pub fn with_operation(mut self, operation: RepositoryOperation) -> Self {
        self.operation = operation;
        self
    }

    /// Replace the message, preserving kind and context
    ///
    /// Used by the `*_or_fail` wrappers, which add a descriptive message but
    /// must keep the `NotFound` kind intact.
    #[must_use]
    pub fn with_message(mut self, message: impl Into<String>) -> Self {
        self.message = message.into();
        self
    }

    /// True when the error is the not-found sentinel
    pub fn is_not_found(&self) -> bool {
        self.kind == RepositoryErrorKind::NotFound
    }

    /// True when the error reports a malformed identifier
    pub fn is_invalid_id(&self) -> bool {
        self.kind == RepositoryErrorKind::InvalidId
    }

    /// True when the error reports a unique-constraint violation
    pub fn is_duplicate(&self) -> bool {
        self.kind == RepositoryErrorKind::Duplicate
    }
}

impl fmt::Display for RepositoryError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "repository {} error during {}: {}",
            self.kind, self.operation, self.message
        )?;
        match (&self.entity, &self.record_id) {
            (Some(entity), Some(id)) => write!(f, " [{entity}: {id}]"),
            (Some(entity), None) => write!(f, " [{entity}]"),
            _ => Ok(()),
        }
    }
}

impl std::error::Error for RepositoryError {}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn operation_display() {
        assert_eq!(format!("{}", RepositoryOperation::FindById), "find_by_id");
        assert_eq!(format!("{}", RepositoryOperation::UpdateBatch), "update_batch");
        assert_eq!(format!("{}", RepositoryOperation::Increment), "increment");
        assert_eq!(format!("{}", RepositoryOperation::Transaction), "transaction");
    }

    #[test]
    fn kind_display() {
        assert_eq!(format!("{}", RepositoryErrorKind::NotFound), "not_found");
        assert_eq!(format!("{}", RepositoryErrorKind::InvalidId), "invalid_id");
        assert_eq!(format!("{}", RepositoryErrorKind::Duplicate), "duplicate");
        assert_eq!(format!("{}", RepositoryErrorKind::Backend), "backend");
    }

    #[test]
    fn not_found_carries_context() {
        let error = RepositoryError::not_found("users", "42");
        assert_eq!(error.kind, RepositoryErrorKind::NotFound);
        assert_eq!(error.entity, Some("users".to_string()));
        assert_eq!(error.record_id, Some("42".to_string()));
        assert!(error.is_not_found());
    }

    #[test]
    fn invalid_id_keeps_raw_input() {
        let error = RepositoryError::invalid_id("users", "not-a-number");
        assert_eq!(error.kind, RepositoryErrorKind::InvalidId);
        assert_eq!(error.record_id, Some("not-a-number".to_string()));
        assert!(error.message.contains("not-a-number"));
    }

    #[test]
    fn with_message_preserves_kind() {
        let error = RepositoryError::not_found("users", "42")
            .with_message("users with id 42 not found");
        assert!(error.is_not_found());
        assert_eq!(error.message, "users with id 42 not found");
    }

    #[test]
    fn display_includes_entity_and_id() {
        let error = RepositoryError::not_found("users", "42");
        let display = error.to_string();
        assert!(display.contains("not_found"));
        assert!(display.contains("find_by_id"));
        assert!(display.contains("[users: 42]"));
    }

    #[test]
    fn display_without_context() {
        let error = RepositoryError::backend(RepositoryOperation::Count, "connection reset");
        let display = error.to_string();
        assert!(display.contains("backend"));
        assert!(!display.contains('['));
    }

    #[test]
    fn duplicate_predicate() {
        let error = RepositoryError::duplicate("users", "email already taken");
        assert!(error.is_duplicate());
        assert!(!error.is_not_found());
    }
}
