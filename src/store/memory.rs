//! In-process document store
//!
//! Every operation runs under one mutex, which gives the same single-document
//! atomicity a database provides. Useful for tests and for embedding the
//! session store in a single process.

use super::{
    DeleteOutcome, DocumentStore, Filter, IndexSpec, SessionDocument, StoreError, StoreResult,
    Update, UpdateOptions, UpdateOutcome,
};
use crate::utils::lock_mutex_recover;
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Mutex;

#[derive(Debug, Default)]
struct Collection {
    documents: HashMap<String, SessionDocument>,
    indexes: Vec<IndexSpec>,
}

/// Document store held entirely in memory
#[derive(Debug, Default)]
pub struct MemoryStore {
    collection: Mutex<Collection>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert or overwrite a document directly, bypassing update semantics
    pub fn seed(&self, doc: SessionDocument) {
        let mut collection = lock_mutex_recover(&self.collection);
        collection.documents.insert(doc.id.clone(), doc);
    }

    /// Snapshot of a document by primary key
    pub fn get(&self, id: &str) -> Option<SessionDocument> {
        lock_mutex_recover(&self.collection).documents.get(id).cloned()
    }

    pub fn len(&self) -> usize {
        lock_mutex_recover(&self.collection).documents.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Indexes declared so far
    pub fn indexes(&self) -> Vec<IndexSpec> {
        lock_mutex_recover(&self.collection).indexes.clone()
    }
}

#[async_trait]
impl DocumentStore for MemoryStore {
    async fn update_one(
        &self,
        filter: &Filter,
        update: &Update,
        options: UpdateOptions,
    ) -> StoreResult<UpdateOutcome> {
        let mut collection = lock_mutex_recover(&self.collection);

        let target = match filter.id {
            Some(ref id) => collection
                .documents
                .get(id)
                .filter(|doc| filter.matches(doc))
                .map(|doc| doc.id.clone()),
            None => collection
                .documents
                .values()
                .find(|doc| filter.matches(doc))
                .map(|doc| doc.id.clone()),
        };

        if let Some(id) = target {
            if let Some(doc) = collection.documents.get_mut(&id) {
                update.apply(doc);
            }
            return Ok(UpdateOutcome {
                matched: 1,
                upserted: false,
            });
        }

        if !options.upsert {
            return Ok(UpdateOutcome::default());
        }

        let doc = update.upsert_document(filter)?;
        if collection.documents.contains_key(&doc.id) {
            return Err(StoreError::DuplicateKey(format!(
                "dup key: {{ _id: \"{}\" }}",
                doc.id
            )));
        }
        collection.documents.insert(doc.id.clone(), doc);

        Ok(UpdateOutcome {
            matched: 0,
            upserted: true,
        })
    }

    async fn find_one(&self, filter: &Filter) -> StoreResult<Option<SessionDocument>> {
        let collection = lock_mutex_recover(&self.collection);
        let found = match filter.id {
            Some(ref id) => collection.documents.get(id).filter(|doc| filter.matches(doc)),
            None => collection.documents.values().find(|doc| filter.matches(doc)),
        };
        Ok(found.cloned())
    }

    async fn delete_many(&self, filter: &Filter) -> StoreResult<DeleteOutcome> {
        let mut collection = lock_mutex_recover(&self.collection);
        let before = collection.documents.len();
        collection.documents.retain(|_, doc| !filter.matches(doc));
        Ok(DeleteOutcome {
            deleted: (before - collection.documents.len()) as u64,
        })
    }

    async fn create_index(&self, spec: &IndexSpec) -> StoreResult<()> {
        let mut collection = lock_mutex_recover(&self.collection);
        if !collection.indexes.iter().any(|i| i.name == spec.name) {
            collection.indexes.push(spec.clone());
        }
        Ok(())
    }
}
