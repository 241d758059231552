//! Crate-level errors for configuration and connection management
//!
//! Repository operations have their own taxonomy
//! ([`crate::repository::RepositoryError`]); this type covers everything
//! before a repository exists: loading configuration and establishing
//! connections.

use thiserror::Error;

/// Result type for configuration and connection management
pub type Result<T> = std::result::Result<T, StoreError>;

/// Configuration or connection error
#[derive(Debug, Error)]
pub enum StoreError {
    /// Configuration could not be loaded or deserialized
    #[error("configuration error: {0}")]
    Config(#[from] figment::Error),

    /// The selected backend has no matching configuration section
    #[error("missing `{0}` configuration section for the selected backend")]
    MissingConfig(&'static str),

    /// PostgreSQL connection could not be established
    #[error("failed to connect to PostgreSQL: {0}")]
    PostgresConnection(#[source] sqlx::Error),

    /// MongoDB connection could not be established
    #[error("failed to connect to MongoDB: {0}")]
    MongoConnection(#[source] mongodb::error::Error),
}
