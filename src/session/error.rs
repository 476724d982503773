//! Session Error Types

use crate::store::StoreError;
use std::time::Duration;
use thiserror::Error;

/// Errors surfaced by session operations
#[derive(Error, Debug)]
pub enum SessionError {
    /// The lock could not be acquired within the configured budget.
    /// Callers should report the session as temporarily unavailable.
    #[error("Could not get session lock for {id} after {waited:?}")]
    LockUnavailable { id: String, waited: Duration },

    #[error("Session store error: {0}")]
    Store(#[from] StoreError),
}

impl SessionError {
    /// True when the request should be answered with "session temporarily unavailable"
    pub fn is_temporarily_unavailable(&self) -> bool {
        matches!(self, SessionError::LockUnavailable { .. })
    }
}

pub type SessionResult<T> = Result<T, SessionError>;
