//! Error types for the core domain.

use thiserror::Error;

/// Core domain error type.
#[derive(Debug, Error)]
pub enum Error {
    #[error("invalid entity id: {0}")]
    InvalidId(String),

    #[error("invalid hash: {0}")]
    InvalidHash(String),

    #[error("invalid name: {0}")]
    InvalidName(String),

    #[error("invalid blob location: {0}")]
    InvalidLocation(String),

    #[error("payload index mismatch: expected digest {expected}, got {actual}")]
    IndexMismatch { expected: String, actual: String },

    #[error("missing attribute: {0}")]
    MissingAttribute(String),

    #[error("invalid attribute {name}: {reason}")]
    InvalidAttribute { name: String, reason: String },

    #[error("unknown entity kind: {0}")]
    UnknownEntityKind(String),

    #[error("serialization error: {0}")]
    Serialization(String),
}

/// Result type alias for core operations.
pub type Result<T> = std::result::Result<T, Error>;
