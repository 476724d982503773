//! File-backed document store
//!
//! Stores one document per file in a collection directory:
//!
//! ```text
//! {dir}/
//!   .collection.lock   - advisory lock serializing every operation
//!   .indexes.json      - declared indexes
//!   {escaped id}.json  - one session document
//!   ~{sha256 of id}.json - one session document whose escaped id is too long
//! ```
//!
//! Every operation holds an exclusive `fs2` lock on `.collection.lock`, so
//! conditional updates stay atomic across processes sharing the directory.
//! Documents are written to a temp file and renamed into place.

use super::{
    DeleteOutcome, DocumentStore, Filter, IndexSpec, SessionDocument, StoreError, StoreResult,
    Update, UpdateOptions, UpdateOutcome,
};
use async_trait::async_trait;
use fs2::FileExt;
use sha2::{Digest, Sha256};
use std::fs::{self, File, OpenOptions};
use std::io;
use std::path::{Path, PathBuf};

const LOCK_FILE: &str = ".collection.lock";
const INDEX_FILE: &str = ".indexes.json";
const DOCUMENT_EXTENSION: &str = "json";
/// Longest escaped id used as a file stem; longer ids are stored under a digest
const MAX_STEM_LEN: usize = 200;

/// Document store persisted as JSON files in a shared directory
#[derive(Debug, Clone)]
pub struct FileStore {
    dir: PathBuf,
}

impl FileStore {
    /// Open (and create if needed) a collection directory
    pub fn open(dir: impl AsRef<Path>) -> StoreResult<Self> {
        let dir = dir.as_ref().to_path_buf();
        fs::create_dir_all(&dir)?;
        log::debug!("Opened file store at {:?}", dir);
        Ok(Self { dir })
    }

    /// Path of the file holding the document with this primary key
    pub fn document_path(&self, id: &str) -> PathBuf {
        self.dir
            .join(format!("{}.{}", file_stem(id), DOCUMENT_EXTENSION))
    }

    /// Run `op` while holding the collection-wide exclusive lock
    fn with_collection_lock<T>(&self, op: impl FnOnce() -> StoreResult<T>) -> StoreResult<T> {
        let lock_file = OpenOptions::new()
            .create(true)
            .read(true)
            .write(true)
            .truncate(false)
            .open(self.dir.join(LOCK_FILE))?;
        lock_file.lock_exclusive()?;

        let result = op();

        if let Err(e) = lock_file.unlock() {
            log::warn!("Failed to unlock collection {:?}: {}", self.dir, e);
        }
        result
    }

    fn read_document(path: &Path) -> StoreResult<Option<SessionDocument>> {
        if !path.exists() {
            return Ok(None);
        }
        let content = fs::read_to_string(path)?;
        Ok(Some(serde_json::from_str(&content)?))
    }

    /// Document stored under primary key `id`. The stored `_id` must match,
    /// since digest file names are not reversible.
    fn read_keyed(&self, id: &str) -> StoreResult<Option<(PathBuf, SessionDocument)>> {
        let path = self.document_path(id);
        match Self::read_document(&path)? {
            Some(doc) if doc.id != id => Err(StoreError::Backend(format!(
                "{:?} holds document {} instead of {}",
                path, doc.id, id
            ))),
            doc => Ok(doc.map(|doc| (path, doc))),
        }
    }

    /// Document read during a collection scan; unparsable files are skipped
    fn read_scanned(path: &Path) -> StoreResult<Option<SessionDocument>> {
        match Self::read_document(path) {
            Err(StoreError::Serialization(e)) => {
                log::warn!("Skipping unreadable document {:?}: {}", path, e);
                Ok(None)
            }
            Err(StoreError::Io(e)) if e.kind() == io::ErrorKind::InvalidData => {
                log::warn!("Skipping unreadable document {:?}: {}", path, e);
                Ok(None)
            }
            other => other,
        }
    }

    fn write_document(&self, doc: &SessionDocument) -> StoreResult<()> {
        let content = serde_json::to_string_pretty(doc)?;
        atomic_write(&self.document_path(&doc.id), &content)
    }

    /// Every document file in the collection
    fn document_paths(&self) -> StoreResult<Vec<PathBuf>> {
        let mut paths = Vec::new();
        for entry in fs::read_dir(&self.dir)? {
            let path = entry?.path();
            let is_document = path.extension().map_or(false, |ext| ext == DOCUMENT_EXTENSION)
                && path
                    .file_name()
                    .and_then(|n| n.to_str())
                    .map_or(false, |n| !n.starts_with('.'));
            if is_document {
                paths.push(path);
            }
        }
        Ok(paths)
    }

    /// First document matching the filter, with the path it lives at
    fn find_matching(&self, filter: &Filter) -> StoreResult<Option<(PathBuf, SessionDocument)>> {
        if let Some(ref id) = filter.id {
            return Ok(self.read_keyed(id)?.filter(|(_, doc)| filter.matches(doc)));
        }

        for path in self.document_paths()? {
            if let Some(doc) = Self::read_scanned(&path)? {
                if filter.matches(&doc) {
                    return Ok(Some((path, doc)));
                }
            }
        }
        Ok(None)
    }

    fn update_one_blocking(
        &self,
        filter: &Filter,
        update: &Update,
        options: UpdateOptions,
    ) -> StoreResult<UpdateOutcome> {
        self.with_collection_lock(|| {
            if let Some((_, mut doc)) = self.find_matching(filter)? {
                update.apply(&mut doc);
                self.write_document(&doc)?;
                return Ok(UpdateOutcome {
                    matched: 1,
                    upserted: false,
                });
            }

            if !options.upsert {
                return Ok(UpdateOutcome::default());
            }

            let doc = update.upsert_document(filter)?;
            if self.read_keyed(&doc.id)?.is_some() {
                return Err(StoreError::DuplicateKey(format!(
                    "dup key: {{ _id: \"{}\" }}",
                    doc.id
                )));
            }
            self.write_document(&doc)?;
            Ok(UpdateOutcome {
                matched: 0,
                upserted: true,
            })
        })
    }

    fn find_one_blocking(&self, filter: &Filter) -> StoreResult<Option<SessionDocument>> {
        self.with_collection_lock(|| Ok(self.find_matching(filter)?.map(|(_, doc)| doc)))
    }

    fn delete_many_blocking(&self, filter: &Filter) -> StoreResult<DeleteOutcome> {
        self.with_collection_lock(|| {
            let candidates: Vec<(PathBuf, SessionDocument)> = match filter.id {
                Some(ref id) => self.read_keyed(id)?.into_iter().collect(),
                None => {
                    let mut docs = Vec::new();
                    for path in self.document_paths()? {
                        if let Some(doc) = Self::read_scanned(&path)? {
                            docs.push((path, doc));
                        }
                    }
                    docs
                }
            };

            let mut deleted = 0;
            for (path, doc) in candidates {
                if filter.matches(&doc) {
                    fs::remove_file(&path)?;
                    deleted += 1;
                }
            }
            Ok(DeleteOutcome { deleted })
        })
    }

    fn create_index_blocking(&self, spec: &IndexSpec) -> StoreResult<()> {
        self.with_collection_lock(|| {
            let path = self.dir.join(INDEX_FILE);
            let mut indexes: Vec<IndexSpec> = if path.exists() {
                serde_json::from_str(&fs::read_to_string(&path)?)?
            } else {
                Vec::new()
            };

            if indexes.iter().any(|i| i.name == spec.name) {
                return Ok(());
            }
            indexes.push(spec.clone());
            atomic_write(&path, &serde_json::to_string_pretty(&indexes)?)?;
            log::info!("Created index {} in {:?}", spec.name, self.dir);
            Ok(())
        })
    }

    /// Indexes declared so far
    pub fn indexes(&self) -> StoreResult<Vec<IndexSpec>> {
        let path = self.dir.join(INDEX_FILE);
        if !path.exists() {
            return Ok(Vec::new());
        }
        Ok(serde_json::from_str(&fs::read_to_string(&path)?)?)
    }

    /// Run a blocking operation on the tokio blocking pool
    async fn run_blocking<T, F>(&self, op: F) -> StoreResult<T>
    where
        T: Send + 'static,
        F: FnOnce(FileStore) -> StoreResult<T> + Send + 'static,
    {
        let store = self.clone();
        tokio::task::spawn_blocking(move || op(store))
            .await
            .map_err(|e| StoreError::Backend(format!("File store task failed: {}", e)))?
    }
}

#[async_trait]
impl DocumentStore for FileStore {
    async fn update_one(
        &self,
        filter: &Filter,
        update: &Update,
        options: UpdateOptions,
    ) -> StoreResult<UpdateOutcome> {
        let filter = filter.clone();
        let update = update.clone();
        self.run_blocking(move |store| store.update_one_blocking(&filter, &update, options))
            .await
    }

    async fn find_one(&self, filter: &Filter) -> StoreResult<Option<SessionDocument>> {
        let filter = filter.clone();
        self.run_blocking(move |store| store.find_one_blocking(&filter))
            .await
    }

    async fn delete_many(&self, filter: &Filter) -> StoreResult<DeleteOutcome> {
        let filter = filter.clone();
        self.run_blocking(move |store| store.delete_many_blocking(&filter))
            .await
    }

    async fn create_index(&self, spec: &IndexSpec) -> StoreResult<()> {
        let spec = spec.clone();
        self.run_blocking(move |store| store.create_index_blocking(&spec))
            .await
    }
}

/// Write data to a file atomically (temp file + rename)
fn atomic_write(path: &Path, content: &str) -> StoreResult<()> {
    let temp_path = path.with_extension("tmp");
    {
        let mut file = File::create(&temp_path)?;
        std::io::Write::write_all(&mut file, content.as_bytes())?;
        file.sync_all()?;
    }
    fs::rename(&temp_path, path)?;
    Ok(())
}

/// File stem for a primary key: the escaped id, or a digest of the id when
/// the escaped form would exceed file name limits
fn file_stem(id: &str) -> String {
    let escaped = escape_id(id);
    if escaped.len() <= MAX_STEM_LEN {
        escaped
    } else {
        format!("~{:x}", Sha256::digest(id.as_bytes()))
    }
}

/// Map a primary key to a file stem. Characters outside `[A-Za-z0-9_-]` are
/// written as `%XX` byte escapes, so ids never collide and never start with a dot.
fn escape_id(id: &str) -> String {
    let mut escaped = String::with_capacity(id.len());
    for byte in id.bytes() {
        if byte.is_ascii_alphanumeric() || byte == b'_' || byte == b'-' {
            escaped.push(byte as char);
        } else {
            escaped.push_str(&format!("%{:02X}", byte));
        }
    }
    escaped
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::LockState;
    use chrono::{Duration, Utc};
    use std::sync::Arc;
    use tempfile::TempDir;

    fn create_test_store() -> (TempDir, FileStore) {
        let temp_dir = TempDir::new().unwrap();
        let store = FileStore::open(temp_dir.path().join("sessions")).unwrap();
        (temp_dir, store)
    }

    fn lock_filter(id: &str) -> Filter {
        Filter::by_id(id).with_lock_state(LockState::Unlocked)
    }

    fn lock_update() -> Update {
        Update::SetLock {
            state: LockState::Locked,
            locked_at: Some(Utc::now()),
        }
    }

    #[test]
    fn test_escape_id() {
        assert_eq!(escape_id("abc-123_X"), "abc-123_X");
        assert_eq!(escape_id("app:abc"), "app%3Aabc");
        assert_eq!(escape_id("../etc"), "%2E%2E%2Fetc");
    }

    #[test]
    fn test_long_ids_use_digest_stem() {
        let short = "a".repeat(MAX_STEM_LEN);
        assert_eq!(file_stem(&short), short);

        let long = "a".repeat(256);
        let stem = file_stem(&long);
        assert!(stem.starts_with('~'));
        assert_eq!(stem.len(), 65);
        assert_ne!(file_stem(&"a".repeat(257)), stem);

        // 70 colons escape to 210 bytes
        assert!(file_stem(&":".repeat(70)).starts_with('~'));
    }

    #[tokio::test]
    async fn test_long_id_round_trip() {
        let (_temp_dir, store) = create_test_store();
        let id = format!("app:{}", "a".repeat(256));
        store
            .update_one(&lock_filter(&id), &lock_update(), UpdateOptions::upsert())
            .await
            .unwrap();

        let err = store
            .update_one(&lock_filter(&id), &lock_update(), UpdateOptions::upsert())
            .await
            .unwrap_err();
        assert!(err.is_duplicate_key());

        let found = store.find_one(&Filter::by_id(&id)).await.unwrap().unwrap();
        assert_eq!(found.id, id);
        assert!(found.is_locked());

        let outcome = store.delete_many(&Filter::by_id(&id)).await.unwrap();
        assert_eq!(outcome.deleted, 1);
        assert!(!store.document_path(&id).exists());
    }

    #[tokio::test]
    async fn test_mismatched_id_in_digest_file_is_rejected() {
        let (_temp_dir, store) = create_test_store();
        let id = "b".repeat(300);
        let intruder = SessionDocument::new("someone-else");
        fs::write(
            store.document_path(&id),
            serde_json::to_string(&intruder).unwrap(),
        )
        .unwrap();

        let err = store.find_one(&Filter::by_id(&id)).await.unwrap_err();
        assert!(!err.is_duplicate_key());
        assert!(err.to_string().contains("instead of"));
    }

    #[tokio::test]
    async fn test_scans_skip_unreadable_files() {
        let (_temp_dir, store) = create_test_store();
        let now = Utc::now();
        let expired = SessionDocument {
            expires_at: Some(now - Duration::seconds(30)),
            ..SessionDocument::new("expired")
        };
        store
            .update_one(
                &Filter::by_id("expired"),
                &Update::Replace(expired),
                UpdateOptions::upsert(),
            )
            .await
            .unwrap();
        let garbage = store.dir.join("garbage.json");
        fs::write(&garbage, "{ not json").unwrap();
        fs::write(store.dir.join("binary.json"), [0xff, 0xfe, 0x00]).unwrap();

        let found = store
            .find_one(&Filter::expired_before(now))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(found.id, "expired");

        let outcome = store.delete_many(&Filter::expired_before(now)).await.unwrap();
        assert_eq!(outcome.deleted, 1);
        assert!(!store.document_path("expired").exists());
        // Foreign files are left in place
        assert!(garbage.exists());
    }

    #[tokio::test]
    async fn test_upsert_writes_document_file() {
        let (_temp_dir, store) = create_test_store();
        let outcome = store
            .update_one(&lock_filter("abc"), &lock_update(), UpdateOptions::upsert())
            .await
            .unwrap();
        assert!(outcome.upserted);

        let path = store.document_path("abc");
        assert!(path.exists());
        let doc: SessionDocument =
            serde_json::from_str(&fs::read_to_string(path).unwrap()).unwrap();
        assert!(doc.is_locked());
    }

    #[tokio::test]
    async fn test_locked_document_reports_duplicate_key() {
        let (_temp_dir, store) = create_test_store();
        store
            .update_one(&lock_filter("abc"), &lock_update(), UpdateOptions::upsert())
            .await
            .unwrap();

        let err = store
            .update_one(&lock_filter("abc"), &lock_update(), UpdateOptions::upsert())
            .await
            .unwrap_err();
        assert!(err.is_duplicate_key());
    }

    #[tokio::test]
    async fn test_replace_and_find() {
        let (_temp_dir, store) = create_test_store();
        let doc = SessionDocument {
            payload: Some("hello".to_string()),
            ..SessionDocument::new("app:abc")
        };
        store
            .update_one(
                &Filter::by_id("app:abc"),
                &Update::Replace(doc),
                UpdateOptions::upsert(),
            )
            .await
            .unwrap();

        let found = store.find_one(&Filter::by_id("app:abc")).await.unwrap().unwrap();
        assert_eq!(found.payload.as_deref(), Some("hello"));
        assert!(store.find_one(&Filter::by_id("other")).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_delete_many_scans_collection() {
        let (_temp_dir, store) = create_test_store();
        let now = Utc::now();
        for (id, offset) in [("old", -30), ("older", -60), ("fresh", 30)] {
            let doc = SessionDocument {
                expires_at: Some(now + Duration::seconds(offset)),
                ..SessionDocument::new(id)
            };
            store
                .update_one(&Filter::by_id(id), &Update::Replace(doc), UpdateOptions::upsert())
                .await
                .unwrap();
        }
        store.create_index(&IndexSpec::new(&["expire"])).await.unwrap();

        let outcome = store.delete_many(&Filter::expired_before(now)).await.unwrap();
        assert_eq!(outcome.deleted, 2);
        assert!(store.document_path("fresh").exists());
        assert!(!store.document_path("old").exists());
        // Index metadata is not a document
        assert_eq!(store.indexes().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_create_index_is_idempotent() {
        let (_temp_dir, store) = create_test_store();
        let spec = IndexSpec::new(&["_id", "lock"]);
        store.create_index(&spec).await.unwrap();
        store.create_index(&spec).await.unwrap();
        assert_eq!(store.indexes().unwrap(), vec![spec]);
    }

    #[tokio::test]
    async fn test_two_handles_on_one_directory_race_for_lock() {
        let (temp_dir, store) = create_test_store();
        let other = FileStore::open(temp_dir.path().join("sessions")).unwrap();
        let handles: Vec<Arc<FileStore>> = vec![Arc::new(store), Arc::new(other)];

        let mut tasks = Vec::new();
        for _ in 0..8 {
            for handle in &handles {
                let handle = Arc::clone(handle);
                tasks.push(tokio::spawn(async move {
                    handle
                        .update_one(&lock_filter("shared"), &lock_update(), UpdateOptions::upsert())
                        .await
                }));
            }
        }

        let mut winners = 0;
        for task in tasks {
            match task.await.unwrap() {
                Ok(outcome) if outcome.acknowledged() => winners += 1,
                Ok(_) => panic!("upsert must either succeed or report duplicate key"),
                Err(e) => assert!(e.is_duplicate_key(), "unexpected error: {}", e),
            }
        }
        assert_eq!(winners, 1);
    }
}
