//! Error types for credit engine storage.

/// Result type for storage operations.
pub type Result<T> = std::result::Result<T, StoreError>;

/// Errors that can occur in storage operations.
///
/// Expected races (a stale version, a reused key, a hold that already settled)
/// are not errors; they are reported through [`crate::MutationOutcome`].
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    /// Database operation failed.
    #[error("database error: {0}")]
    Database(String),

    /// Serialization/deserialization failed.
    #[error("serialization error: {0}")]
    Serialization(String),

    /// Record not found.
    #[error("not found")]
    NotFound,

    /// Record already exists.
    #[error("already exists")]
    AlreadyExists,

    /// The ledger entry could not be written after the account row was locked.
    #[error("ledger write failed: {0}")]
    LedgerWrite(String),
}

impl From<sqlx::Error> for StoreError {
    fn from(err: sqlx::Error) -> Self {
        match err {
            sqlx::Error::RowNotFound => Self::NotFound,
            sqlx::Error::ColumnDecode { .. } | sqlx::Error::Decode(_) => {
                Self::Serialization(err.to_string())
            }
            _ => Self::Database(err.to_string()),
        }
    }
}

impl From<StoreError> for credit_engine_core::EngineError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::LedgerWrite(message) => Self::LedgerInsertFailed(message),
            other => Self::Storage(other.to_string()),
        }
    }
}
