//! Lock-protected session storage
//!
//! - `lock` - per-session exclusive lock kept in the session document
//! - `backoff` - retry schedule used while waiting for a lock
//! - `store` - session read/write/destroy/gc on top of a [`DocumentStore`](crate::store::DocumentStore)
//!
//! A request reads its session (taking the lock) and writes it back at the
//! end (releasing the lock in the same atomic replace). The read/write pair
//! is one critical section per session id across every process sharing the
//! store.

pub mod backoff;
pub mod error;
pub mod lock;
pub mod store;

pub use backoff::{Backoff, BackoffPolicy};
pub use error::{SessionError, SessionResult};
pub use lock::LockManager;
pub use store::SessionStore;

use async_trait::async_trait;
use std::time::Duration;

/// Default idle lifetime stamped on every write (24 minutes)
pub const DEFAULT_MAX_LIFETIME: Duration = Duration::from_secs(1440);

/// Runtime settings for a [`SessionStore`]
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionConfig {
    /// Prefix applied to session ids (`{namespace}:{id}`); empty for none
    pub namespace: String,
    /// Idle lifetime; each write sets `expire = now + max_lifetime`
    pub max_lifetime: Duration,
    /// Retry schedule for lock acquisition
    pub backoff: BackoffPolicy,
    /// Locks held longer than this may be taken over. `None` never steals.
    pub stale_lock_after: Option<Duration>,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            namespace: String::new(),
            max_lifetime: DEFAULT_MAX_LIFETIME,
            backoff: BackoffPolicy::default(),
            stale_lock_after: None,
        }
    }
}

/// Session lifecycle hooks a request-handling framework drives.
///
/// Hand an `Arc<dyn SessionHandler>` to the request integration instead of
/// registering a process-wide handler.
#[async_trait]
pub trait SessionHandler: Send + Sync {
    async fn open(&self) -> SessionResult<()>;

    async fn close(&self) -> SessionResult<()>;

    /// Lock the session and return its payload (empty for a new session)
    async fn read(&self, id: &str) -> SessionResult<String>;

    /// Store the payload and release the lock
    async fn write(&self, id: &str, payload: &str) -> SessionResult<()>;

    async fn destroy(&self, id: &str) -> SessionResult<()>;

    /// Remove expired sessions. Never fails; returns how many were removed.
    async fn gc(&self, max_lifetime: Duration) -> usize;
}
