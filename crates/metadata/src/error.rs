//! Metadata store error types.

use thiserror::Error;

/// Metadata store operation errors.
#[derive(Debug, Error)]
pub enum MetadataError {
    #[error("not found: {0}")]
    NotFound(String),

    #[error("already exists: {0}")]
    AlreadyExists(String),

    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("configuration error: {0}")]
    Config(String),

    /// A stored row could not be mapped back to a domain record.
    #[error("corrupt row: {0}")]
    Corrupt(String),

    #[error("internal error: {0}")]
    Internal(String),
}

impl MetadataError {
    /// Whether retrying the same operation may succeed.
    pub fn is_transient(&self) -> bool {
        match self {
            Self::Database(sqlx::Error::PoolTimedOut)
            | Self::Database(sqlx::Error::Io(_)) => true,
            Self::Database(sqlx::Error::Database(db_err)) => {
                // SQLITE_BUSY (5) and SQLITE_LOCKED (6), including extended codes.
                let code_busy = db_err
                    .code()
                    .and_then(|c| c.parse::<i32>().ok())
                    .is_some_and(|c| matches!(c & 0xff, 5 | 6));
                let msg = db_err.message();
                code_busy || msg.contains("database is locked") || msg.contains("database is busy")
            }
            _ => false,
        }
    }
}

impl From<std::io::Error> for MetadataError {
    fn from(e: std::io::Error) -> Self {
        Self::Database(sqlx::Error::Io(e))
    }
}

impl From<arbor_core::Error> for MetadataError {
    fn from(e: arbor_core::Error) -> Self {
        Self::Corrupt(e.to_string())
    }
}

/// Result type for metadata operations.
pub type MetadataResult<T> = std::result::Result<T, MetadataError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_transient_classification() {
        assert!(MetadataError::Database(sqlx::Error::PoolTimedOut).is_transient());
        assert!(!MetadataError::NotFound("ws-1".to_string()).is_transient());
        assert!(!MetadataError::Database(sqlx::Error::RowNotFound).is_transient());
    }
}
