// Clippy allows for reasonable defaults
#![allow(clippy::new_without_default)] // Default not always appropriate for stateful types
#![allow(clippy::unnecessary_map_or)] // map_or can be clearer than alternatives

//! Distributed session store with per-session mutual exclusion.
//!
//! Many server processes can share one document store. Reading a session
//! takes an exclusive lock kept in the session document itself; writing it
//! back stores the new payload and releases the lock in the same atomic
//! replace.
//!
//! ```no_run
//! use docstore_session_lib::store::file::FileStore;
//! use docstore_session_lib::{SessionConfig, SessionStore};
//! use std::sync::Arc;
//!
//! # async fn demo() -> Result<(), Box<dyn std::error::Error>> {
//! let store = Arc::new(FileStore::open("/var/lib/sessions")?);
//! let sessions = SessionStore::new(store, SessionConfig::default());
//! sessions.ensure_indexes().await?;
//!
//! let data = sessions.read("abc123").await?; // locks "abc123"
//! sessions.write("abc123", &format!("{}visits=1;", data)).await?; // unlocks
//! # Ok(())
//! # }
//! ```

// Module declarations
pub mod config;
pub mod session;
pub mod shutdown;
pub mod store;
pub mod sweeper;
mod utils;

pub use session::{
    BackoffPolicy, LockManager, SessionConfig, SessionError, SessionHandler, SessionResult,
    SessionStore,
};
pub use store::{DocumentStore, StoreError};
pub use sweeper::{GcSweeper, SweepReport};
