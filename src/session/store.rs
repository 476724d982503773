// Session store: document lifecycle and expiry sweeping

use super::error::SessionResult;
use super::lock::LockManager;
use super::{SessionConfig, SessionHandler};
use crate::store::{
    DocumentStore, Filter, IndexSpec, LockState, SessionDocument, StoreError, Update,
    UpdateOptions,
};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::sync::Arc;
use std::time::Duration;

/// Session storage with cross-process mutual exclusion per session id
#[derive(Clone)]
pub struct SessionStore {
    store: Arc<dyn DocumentStore>,
    locks: LockManager,
    config: SessionConfig,
}

impl SessionStore {
    pub fn new(store: Arc<dyn DocumentStore>, config: SessionConfig) -> Self {
        let locks = LockManager::new(store.clone(), config.backoff)
            .with_stale_after(config.stale_lock_after);
        Self {
            store,
            locks,
            config,
        }
    }

    pub fn config(&self) -> &SessionConfig {
        &self.config
    }

    /// Primary key of the document backing session `id`
    pub fn document_id(&self, id: &str) -> String {
        if self.config.namespace.is_empty() {
            id.to_string()
        } else {
            format!("{}:{}", self.config.namespace, id)
        }
    }

    /// Create the `(_id, lock)` and `(expire)` indexes. Safe to call on every startup.
    pub async fn ensure_indexes(&self) -> SessionResult<()> {
        self.store
            .create_index(&IndexSpec::new(&["_id", "lock"]))
            .await?;
        self.store.create_index(&IndexSpec::new(&["expire"])).await?;
        Ok(())
    }

    /// Lock session `id` and return its payload.
    ///
    /// A missing document, or one without a payload, reads as an empty string.
    /// The lock stays held until the next [`write`](Self::write) or [`unlock`](Self::unlock).
    pub async fn read(&self, id: &str) -> SessionResult<String> {
        let doc_id = self.document_id(id);
        self.locks.acquire(&doc_id).await?;

        let payload = self
            .store
            .find_one(&Filter::by_id(&doc_id))
            .await?
            .and_then(|doc| doc.payload)
            .unwrap_or_default();
        log::debug!("Read session {} ({} bytes)", doc_id, payload.len());
        Ok(payload)
    }

    /// Replace the session document and clear its lock in one atomic upsert.
    ///
    /// Does not check that the caller holds the lock: any write releases it.
    pub async fn write(&self, id: &str, payload: &str) -> SessionResult<()> {
        let doc_id = self.document_id(id);
        let doc = SessionDocument {
            id: doc_id.clone(),
            lock_state: LockState::Unlocked,
            payload: Some(payload.to_string()),
            expires_at: Some(expiry_after(Utc::now(), self.config.max_lifetime)),
            locked_at: None,
        };

        let outcome = self
            .store
            .update_one(
                &Filter::by_id(&doc_id),
                &Update::Replace(doc),
                UpdateOptions::upsert(),
            )
            .await?;
        if !outcome.acknowledged() {
            return Err(StoreError::NotAcknowledged(format!("write of session {}", doc_id)).into());
        }

        log::debug!("Wrote session {} ({} bytes)", doc_id, payload.len());
        Ok(())
    }

    /// Delete the session document. Neither requires nor checks the lock.
    pub async fn destroy(&self, id: &str) -> SessionResult<()> {
        let doc_id = self.document_id(id);
        let outcome = self.store.delete_many(&Filter::by_id(&doc_id)).await?;
        log::debug!("Destroyed session {} ({} removed)", doc_id, outcome.deleted);
        Ok(())
    }

    /// Delete every document whose expiry is strictly in the past.
    ///
    /// `_max_lifetime` is accepted for lifecycle compatibility; expiry was
    /// already stamped on each document when it was written. Failures are
    /// logged and reported as zero removals.
    pub async fn gc(&self, _max_lifetime: Duration) -> usize {
        match self
            .store
            .delete_many(&Filter::expired_before(Utc::now()))
            .await
        {
            Ok(outcome) => {
                log::debug!("Session gc removed {} expired sessions", outcome.deleted);
                outcome.deleted as usize
            }
            Err(e) => {
                log::warn!("Session gc failed: {}", e);
                0
            }
        }
    }

    /// Release the lock on session `id` without writing it
    pub async fn unlock(&self, id: &str) {
        self.locks.release(&self.document_id(id)).await;
    }

    /// Fetch the raw document for session `id` without locking it
    pub async fn peek(&self, id: &str) -> SessionResult<Option<SessionDocument>> {
        Ok(self
            .store
            .find_one(&Filter::by_id(self.document_id(id)))
            .await?)
    }
}

#[async_trait]
impl SessionHandler for SessionStore {
    async fn open(&self) -> SessionResult<()> {
        Ok(())
    }

    async fn close(&self) -> SessionResult<()> {
        Ok(())
    }

    async fn read(&self, id: &str) -> SessionResult<String> {
        SessionStore::read(self, id).await
    }

    async fn write(&self, id: &str, payload: &str) -> SessionResult<()> {
        SessionStore::write(self, id, payload).await
    }

    async fn destroy(&self, id: &str) -> SessionResult<()> {
        SessionStore::destroy(self, id).await
    }

    async fn gc(&self, max_lifetime: Duration) -> usize {
        SessionStore::gc(self, max_lifetime).await
    }
}

/// `now + lifetime`, saturating at the latest representable instant
fn expiry_after(now: DateTime<Utc>, lifetime: Duration) -> DateTime<Utc> {
    chrono::Duration::from_std(lifetime)
        .ok()
        .and_then(|lifetime| now.checked_add_signed(lifetime))
        .unwrap_or(DateTime::<Utc>::MAX_UTC)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::session::BackoffPolicy;
    use crate::store::memory::MemoryStore;
    use crate::store::{DeleteOutcome, StoreResult, UpdateOutcome};

    fn test_config() -> SessionConfig {
        SessionConfig {
            backoff: BackoffPolicy {
                total_timeout: Duration::from_millis(100),
                ..Default::default()
            },
            ..Default::default()
        }
    }

    fn create_sessions() -> (Arc<MemoryStore>, SessionStore) {
        let store = Arc::new(MemoryStore::new());
        let sessions = SessionStore::new(store.clone(), test_config());
        (store, sessions)
    }

    /// Store that acknowledges no update and refuses deletes
    struct UnacknowledgedStore;

    #[async_trait]
    impl DocumentStore for UnacknowledgedStore {
        async fn update_one(
            &self,
            _filter: &Filter,
            _update: &Update,
            _options: UpdateOptions,
        ) -> StoreResult<UpdateOutcome> {
            Ok(UpdateOutcome::default())
        }

        async fn find_one(&self, _filter: &Filter) -> StoreResult<Option<SessionDocument>> {
            Ok(None)
        }

        async fn delete_many(&self, _filter: &Filter) -> StoreResult<DeleteOutcome> {
            Err(StoreError::Backend("delete refused".to_string()))
        }

        async fn create_index(&self, _spec: &IndexSpec) -> StoreResult<()> {
            Ok(())
        }
    }

    #[tokio::test]
    async fn test_read_missing_session_is_empty_and_locked() {
        let (store, sessions) = create_sessions();
        assert_eq!(sessions.read("new").await.unwrap(), "");
        assert!(store.get("new").unwrap().is_locked());
    }

    #[tokio::test]
    async fn test_write_then_read() {
        let (store, sessions) = create_sessions();
        sessions.read("abc").await.unwrap();
        sessions.write("abc", "hello").await.unwrap();

        let doc = store.get("abc").unwrap();
        assert!(!doc.is_locked());
        assert!(doc.locked_at.is_none());
        assert_eq!(doc.payload.as_deref(), Some("hello"));

        assert_eq!(sessions.read("abc").await.unwrap(), "hello");
    }

    #[tokio::test]
    async fn test_write_stamps_expiry() {
        let (store, sessions) = create_sessions();
        let before = Utc::now();
        sessions.write("abc", "data").await.unwrap();

        let expires_at = store.get("abc").unwrap().expires_at.unwrap();
        let lifetime = chrono::Duration::seconds(1440);
        assert!(expires_at >= before + lifetime);
        assert!(expires_at <= Utc::now() + lifetime);
    }

    #[tokio::test]
    async fn test_write_without_lock_succeeds() {
        let (store, sessions) = create_sessions();
        sessions.write("abc", "unlocked").await.unwrap();
        assert_eq!(store.get("abc").unwrap().payload.as_deref(), Some("unlocked"));
    }

    #[tokio::test]
    async fn test_document_without_payload_reads_empty() {
        let (store, sessions) = create_sessions();
        store.seed(SessionDocument::new("bare"));
        assert_eq!(sessions.read("bare").await.unwrap(), "");
    }

    #[tokio::test]
    async fn test_read_while_locked_times_out() {
        let (_store, sessions) = create_sessions();
        sessions.read("abc").await.unwrap();

        let err = sessions.read("abc").await.unwrap_err();
        assert!(err.is_temporarily_unavailable());
    }

    #[tokio::test]
    async fn test_destroy_then_read_is_empty() {
        let (store, sessions) = create_sessions();
        sessions.write("abc", "hello").await.unwrap();
        sessions.destroy("abc").await.unwrap();
        assert!(store.get("abc").is_none());

        assert_eq!(sessions.read("abc").await.unwrap(), "");
    }

    #[tokio::test]
    async fn test_destroy_ignores_lock_and_missing_document() {
        let (store, sessions) = create_sessions();
        sessions.read("abc").await.unwrap();
        sessions.destroy("abc").await.unwrap();
        sessions.destroy("abc").await.unwrap();
        assert!(store.is_empty());
    }

    #[tokio::test]
    async fn test_gc_removes_only_expired() {
        let (store, sessions) = create_sessions();
        let now = Utc::now();
        store.seed(SessionDocument {
            payload: Some("stale".to_string()),
            expires_at: Some(now - chrono::Duration::seconds(10)),
            lock_state: LockState::Locked,
            ..SessionDocument::new("expired")
        });
        store.seed(SessionDocument {
            payload: Some("live".to_string()),
            expires_at: Some(now + chrono::Duration::seconds(600)),
            ..SessionDocument::new("active")
        });

        assert_eq!(sessions.gc(Duration::from_secs(1440)).await, 1);
        assert!(store.get("expired").is_none());
        assert_eq!(store.get("active").unwrap().payload.as_deref(), Some("live"));
    }

    #[tokio::test]
    async fn test_unacknowledged_write_is_surfaced() {
        let sessions = SessionStore::new(Arc::new(UnacknowledgedStore), test_config());
        let err = sessions.write("abc", "data").await.unwrap_err();
        assert!(!err.is_temporarily_unavailable());
        assert!(err.to_string().contains("not acknowledged"));
    }

    #[tokio::test]
    async fn test_gc_failure_is_swallowed() {
        let sessions = SessionStore::new(Arc::new(UnacknowledgedStore), test_config());
        assert_eq!(sessions.gc(Duration::from_secs(1)).await, 0);
    }

    #[tokio::test]
    async fn test_namespace_prefixes_document_id() {
        let store = Arc::new(MemoryStore::new());
        let sessions = SessionStore::new(
            store.clone(),
            SessionConfig {
                namespace: "app".to_string(),
                ..test_config()
            },
        );

        sessions.write("abc", "hello").await.unwrap();
        assert!(store.get("app:abc").is_some());
        assert!(store.get("abc").is_none());
        assert_eq!(sessions.peek("abc").await.unwrap().unwrap().id, "app:abc");
    }

    #[tokio::test]
    async fn test_unlock_releases_without_writing() {
        let (store, sessions) = create_sessions();
        sessions.write("abc", "kept").await.unwrap();
        sessions.read("abc").await.unwrap();
        sessions.unlock("abc").await;

        let doc = store.get("abc").unwrap();
        assert!(!doc.is_locked());
        assert_eq!(doc.payload.as_deref(), Some("kept"));
    }

    #[tokio::test]
    async fn test_ensure_indexes() {
        let (store, sessions) = create_sessions();
        sessions.ensure_indexes().await.unwrap();
        sessions.ensure_indexes().await.unwrap();

        let names: Vec<String> = store.indexes().into_iter().map(|i| i.name).collect();
        assert_eq!(names, vec!["_id_1_lock_1", "expire_1"]);
    }

    #[tokio::test]
    async fn test_handler_trait_object() {
        let (_store, sessions) = create_sessions();
        let handler: Arc<dyn SessionHandler> = Arc::new(sessions);

        handler.open().await.unwrap();
        assert_eq!(handler.read("abc").await.unwrap(), "");
        handler.write("abc", "via trait").await.unwrap();
        assert_eq!(handler.read("abc").await.unwrap(), "via trait");
        handler.destroy("abc").await.unwrap();
        handler.close().await.unwrap();
    }

    #[test]
    fn test_expiry_saturates() {
        let now = Utc::now();
        assert_eq!(
            expiry_after(now, Duration::from_secs(u64::MAX)),
            DateTime::<Utc>::MAX_UTC
        );
        assert_eq!(
            expiry_after(now, Duration::from_secs(60)),
            now + chrono::Duration::seconds(60)
        );
    }
}
