//! Error types for store operations.

use std::io;
use thiserror::Error;

/// Result type for store operations.
pub type StoreResult<T> = Result<T, StoreError>;

/// Errors that can occur in the graph, credential or binary stores.
#[derive(Debug, Error)]
pub enum StoreError {
    /// An I/O error occurred.
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// The referenced node or relationship does not exist.
    #[error("not found: {0}")]
    NotFound(String),

    /// An entity with this id already exists.
    #[error("already exists: {0}")]
    AlreadyExists(String),

    /// A relative path escapes the store root or is otherwise unusable.
    #[error("invalid path: {0}")]
    InvalidPath(String),

    /// The persisted graph could not be encoded or decoded.
    #[error("snapshot codec error: {0}")]
    Codec(String),

    /// File content was incomplete when it was finalized.
    #[error("incomplete content: {0}")]
    Incomplete(String),
}

impl StoreError {
    /// Returns true if the error refers to a missing entity.
    pub fn is_not_found(&self) -> bool {
        matches!(self, StoreError::NotFound(_))
    }
}
