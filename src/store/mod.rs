//! Document store capability
//!
//! The session store never talks to a database driver directly. Everything goes
//! through [`DocumentStore`], which exposes only single-document atomic
//! operations:
//!
//! - conditional update with optional upsert (reports duplicate key on a lost race)
//! - find one document by filter
//! - delete every document matching a filter
//! - idempotent index creation
//!
//! Two backends ship with the crate:
//! - [`memory::MemoryStore`] - in-process, for tests and single-process embedding
//! - [`file::FileStore`] - one JSON file per document, safe across processes

pub mod error;
pub mod file;
pub mod memory;

pub use error::{StoreError, StoreResult};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Lock flag stored inside the session document (`0` = unlocked, `1` = held)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(into = "u8", try_from = "u8")]
pub enum LockState {
    #[default]
    Unlocked,
    Locked,
}

impl From<LockState> for u8 {
    fn from(state: LockState) -> Self {
        match state {
            LockState::Unlocked => 0,
            LockState::Locked => 1,
        }
    }
}

impl TryFrom<u8> for LockState {
    type Error = String;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            0 => Ok(LockState::Unlocked),
            1 => Ok(LockState::Locked),
            other => Err(format!("Invalid lock flag {}, expected 0 or 1", other)),
        }
    }
}

/// One session record as it is persisted in the store
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SessionDocument {
    /// Primary key
    #[serde(rename = "_id")]
    pub id: String,
    /// Lock flag, mutated only by the lock manager and by writes
    #[serde(rename = "lock", default)]
    pub lock_state: LockState,
    /// Serialized session state, replaced wholesale on every write
    #[serde(rename = "d", default, skip_serializing_if = "Option::is_none")]
    pub payload: Option<String>,
    /// Absolute expiry deadline, read only by garbage collection
    #[serde(rename = "expire", default, skip_serializing_if = "Option::is_none")]
    pub expires_at: Option<DateTime<Utc>>,
    /// When the current lock was taken
    #[serde(rename = "lockedAt", default, skip_serializing_if = "Option::is_none")]
    pub locked_at: Option<DateTime<Utc>>,
}

impl SessionDocument {
    /// Create an empty, unlocked document
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            lock_state: LockState::Unlocked,
            payload: None,
            expires_at: None,
            locked_at: None,
        }
    }

    pub fn is_locked(&self) -> bool {
        self.lock_state == LockState::Locked
    }
}

/// Conjunctive document filter. Unset fields match anything.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Filter {
    pub id: Option<String>,
    pub lock_state: Option<LockState>,
    /// Matches documents whose `expire` is strictly before this instant
    pub expires_before: Option<DateTime<Utc>>,
    /// Matches documents whose `lockedAt` is strictly before this instant
    pub locked_before: Option<DateTime<Utc>>,
}

impl Filter {
    /// Match a single document by primary key
    pub fn by_id(id: impl Into<String>) -> Self {
        Self {
            id: Some(id.into()),
            ..Default::default()
        }
    }

    /// Match every document that expired before `instant`
    pub fn expired_before(instant: DateTime<Utc>) -> Self {
        Self {
            expires_before: Some(instant),
            ..Default::default()
        }
    }

    pub fn with_lock_state(mut self, state: LockState) -> Self {
        self.lock_state = Some(state);
        self
    }

    pub fn with_locked_before(mut self, instant: DateTime<Utc>) -> Self {
        self.locked_before = Some(instant);
        self
    }

    /// Evaluate the filter against a document.
    ///
    /// Range conditions never match a document that lacks the field.
    pub fn matches(&self, doc: &SessionDocument) -> bool {
        if let Some(ref id) = self.id {
            if &doc.id != id {
                return false;
            }
        }
        if let Some(state) = self.lock_state {
            if doc.lock_state != state {
                return false;
            }
        }
        if let Some(cutoff) = self.expires_before {
            if !doc.expires_at.map_or(false, |at| at < cutoff) {
                return false;
            }
        }
        if let Some(cutoff) = self.locked_before {
            if !doc.locked_at.map_or(false, |at| at < cutoff) {
                return false;
            }
        }
        true
    }
}

/// Mutation applied by [`DocumentStore::update_one`]
#[derive(Debug, Clone, PartialEq)]
pub enum Update {
    /// Set the lock fields, leaving payload and expiry untouched
    SetLock {
        state: LockState,
        locked_at: Option<DateTime<Utc>>,
    },
    /// Replace the whole document (the primary key is kept)
    Replace(SessionDocument),
}

impl Update {
    /// Apply this update to an existing document in place
    pub fn apply(&self, doc: &mut SessionDocument) {
        match self {
            Update::SetLock { state, locked_at } => {
                doc.lock_state = *state;
                doc.locked_at = *locked_at;
            }
            Update::Replace(replacement) => {
                let id = std::mem::take(&mut doc.id);
                *doc = replacement.clone();
                doc.id = id;
            }
        }
    }

    /// Build the document an upsert inserts when nothing matched.
    ///
    /// The new document takes its key and lock flag from the filter's equality
    /// conditions and then has the update applied on top.
    pub fn upsert_document(&self, filter: &Filter) -> StoreResult<SessionDocument> {
        let id = match (&filter.id, self) {
            (Some(id), _) => id.clone(),
            (None, Update::Replace(doc)) => doc.id.clone(),
            (None, Update::SetLock { .. }) => {
                return Err(StoreError::Backend(
                    "Upsert requires an _id in the filter".to_string(),
                ))
            }
        };

        let mut doc = SessionDocument::new(id);
        if let Some(state) = filter.lock_state {
            doc.lock_state = state;
        }
        self.apply(&mut doc);
        Ok(doc)
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct UpdateOptions {
    /// Insert a new document when nothing matches the filter
    pub upsert: bool,
}

impl UpdateOptions {
    pub fn upsert() -> Self {
        Self { upsert: true }
    }
}

/// Result of a single-document update
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct UpdateOutcome {
    /// Number of existing documents that matched and were modified (0 or 1)
    pub matched: u64,
    /// Whether a new document was inserted
    pub upserted: bool,
}

impl UpdateOutcome {
    /// True when exactly one document was affected or created
    pub fn acknowledged(&self) -> bool {
        self.matched > 0 || self.upserted
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DeleteOutcome {
    pub deleted: u64,
}

/// Secondary index declaration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IndexSpec {
    pub name: String,
    pub keys: Vec<String>,
}

impl IndexSpec {
    /// Create an index spec, deriving the name from its keys (`_id_1_lock_1`)
    pub fn new(keys: &[&str]) -> Self {
        let name = keys
            .iter()
            .map(|k| format!("{}_1", k))
            .collect::<Vec<_>>()
            .join("_");
        Self {
            name,
            keys: keys.iter().map(|k| k.to_string()).collect(),
        }
    }
}

/// Single-document atomic operations the session store is built on.
///
/// Implementations must make `update_one` atomic with respect to every other
/// operation on the same document: evaluating the filter and applying the
/// update (or inserting on upsert) happens without a window for another
/// caller to interleave.
#[async_trait]
pub trait DocumentStore: Send + Sync {
    /// Update the first document matching `filter`.
    ///
    /// With `upsert`, a miss inserts [`Update::upsert_document`]. If a document
    /// with the same `_id` already exists the insert fails with
    /// [`StoreError::DuplicateKey`].
    async fn update_one(
        &self,
        filter: &Filter,
        update: &Update,
        options: UpdateOptions,
    ) -> StoreResult<UpdateOutcome>;

    async fn find_one(&self, filter: &Filter) -> StoreResult<Option<SessionDocument>>;

    async fn delete_many(&self, filter: &Filter) -> StoreResult<DeleteOutcome>;

    /// Declare an index. Declaring the same index twice is a no-op.
    async fn create_index(&self, spec: &IndexSpec) -> StoreResult<()>;
}
