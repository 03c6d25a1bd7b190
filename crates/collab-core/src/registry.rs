//! Registry of live documents, keyed by name.
//!
//! Documents are created on first use and dropped when their last subscriber
//! leaves. The map lock is only held for in-memory lookups; hydration and
//! broadcasts happen under each document's own lock.
//!
//! Lock order is document, then registry: eviction marks the document evicted
//! and removes it from the map in one critical section, and `resolve` never
//! touches a document lock while holding the map.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};
use tracing::{debug, info};

use crate::document::{Document, DocumentError};
use crate::store::{validate_document_name, RevisionStore, StoreError};
use crate::subscriber::Subscriber;

pub struct DocumentRegistry {
    store: RevisionStore,
    documents: Mutex<HashMap<String, Arc<Document>>>,
}

impl DocumentRegistry {
    pub fn new(store: RevisionStore) -> Self {
        Self {
            store,
            documents: Mutex::new(HashMap::new()),
        }
    }

    pub fn store(&self) -> &RevisionStore {
        &self.store
    }

    fn documents(&self) -> MutexGuard<'_, HashMap<String, Arc<Document>>> {
        self.documents.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Get the live document for `name`, creating and hydrating it if needed.
    ///
    /// Concurrent callers for the same unknown name get the same instance.
    pub async fn resolve(&self, name: &str) -> Result<Arc<Document>, StoreError> {
        validate_document_name(name)?;

        let document = {
            let mut documents = self.documents();
            match documents.get(name) {
                Some(document) => Arc::clone(document),
                None => {
                    debug!("Creating document {}", name);
                    let document = Arc::new(Document::new(name, self.store.clone()));
                    documents.insert(name.to_string(), Arc::clone(&document));
                    document
                }
            }
        };

        document.hydrate().await;
        Ok(document)
    }

    /// Resolve `name` and subscribe to it, retrying if the resolved instance
    /// was evicted in between.
    pub async fn join(
        &self,
        name: &str,
        subscriber: Arc<dyn Subscriber>,
    ) -> Result<Arc<Document>, DocumentError> {
        loop {
            let document = self.resolve(name).await?;
            match document.subscribe(Arc::clone(&subscriber)).await {
                Ok(()) => return Ok(document),
                Err(DocumentError::Evicted(_)) => {
                    debug!("{} was evicted during join, resolving again", name);
                    continue;
                }
                Err(e) => return Err(e),
            }
        }
    }

    /// Drop `name` from the registry if it has no subscribers.
    ///
    /// Emptiness is re-checked under the document lock, so a subscriber that
    /// raced in keeps the document alive. Returns whether it was evicted.
    pub async fn evict(&self, name: &str) -> bool {
        let Some(document) = self.get(name) else {
            return false;
        };

        let evicted = document
            .evict_if_idle(|| {
                let mut documents = self.documents();
                if documents
                    .get(name)
                    .is_some_and(|current| Arc::ptr_eq(current, &document))
                {
                    documents.remove(name);
                }
            })
            .await;

        if evicted {
            info!("Evicted idle document {}", name);
        }
        evicted
    }

    pub fn get(&self, name: &str) -> Option<Arc<Document>> {
        self.documents().get(name).cloned()
    }

    pub fn contains(&self, name: &str) -> bool {
        self.documents().contains_key(name)
    }

    pub fn len(&self) -> usize {
        self.documents().len()
    }

    pub fn is_empty(&self) -> bool {
        self.documents().is_empty()
    }
}
