//! Store Error Types
//!
//! Failure taxonomy reported by every [`DocumentStore`](super::DocumentStore) backend

use thiserror::Error;

/// Errors returned by document store operations
#[derive(Error, Debug)]
pub enum StoreError {
    /// A uniqueness constraint blocked an insert. For conditional upserts this
    /// means the document exists but did not match the rest of the filter.
    #[error("E11000 duplicate key error: {0}")]
    DuplicateKey(String),

    #[error("Operation not acknowledged by store: {0}")]
    NotAcknowledged(String),

    #[error("Store I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Document serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Store backend error: {0}")]
    Backend(String),
}

impl StoreError {
    /// Check whether this is the duplicate-key signal used to detect lost lock races
    pub fn is_duplicate_key(&self) -> bool {
        matches!(self, StoreError::DuplicateKey(_))
    }
}

/// Result type for store operations
pub type StoreResult<T> = Result<T, StoreError>;
