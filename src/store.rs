//! Open documents, their versions and their result channels.
//!
//! The table is a `DashMap`, so unrelated documents live in independent
//! shards. Mutations of one document additionally run under that document's
//! own lock, which serializes open/change/close per identity without any
//! global lock.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use parking_lot::Mutex;
use tracing::debug;

use crate::error::{CoordinatorError, Result};
use crate::model::{AnalysisResult, DocumentId, DocumentSnapshot, Version};
use crate::queue::AnalysisQueue;
use crate::results::{Published, ResultChannel, ResultWaiter};

struct DocumentState {
    content: Arc<str>,
    version: Version,
}

struct DocumentEntry<P> {
    generation: u64,
    state: Mutex<DocumentState>,
    results: ResultChannel<P>,
}

pub struct DocumentStore<P> {
    documents: DashMap<DocumentId, DocumentEntry<P>>,
    queue: Arc<AnalysisQueue>,
    generations: AtomicU64,
}

impl<P> DocumentStore<P> {
    pub fn new(queue: Arc<AnalysisQueue>) -> Self {
        Self {
            documents: DashMap::new(),
            queue,
            generations: AtomicU64::new(0),
        }
    }

    /// Register a new document at the baseline version and queue it
    pub fn open(&self, id: &DocumentId, content: &str) -> Result<Version> {
        match self.documents.entry(id.clone()) {
            Entry::Occupied(_) => Err(CoordinatorError::AlreadyOpen(id.clone())),
            Entry::Vacant(vacant) => {
                let generation = self.generations.fetch_add(1, Ordering::Relaxed) + 1;
                let _entry = vacant.insert(DocumentEntry {
                    generation,
                    state: Mutex::new(DocumentState {
                        content: Arc::from(content),
                        version: Version::BASELINE,
                    }),
                    results: ResultChannel::new(),
                });
                debug!(document = %id, generation, "opened");
                self.queue.enqueue(id);
                Ok(Version::BASELINE)
            }
        }
    }

    /// Replace the content, bump the version by one and queue the document
    pub fn change(&self, id: &DocumentId, content: &str) -> Result<Version> {
        let entry = self
            .documents
            .get(id)
            .ok_or_else(|| CoordinatorError::NotOpen(id.clone()))?;
        let version = {
            let mut state = entry.state.lock();
            state.version = state.version.next();
            state.content = Arc::from(content);
            state.version
        };
        // Enqueue while the shard guard is held so a concurrent close cannot
        // slip in between accepting the edit and queueing it.
        self.queue.enqueue(id);
        drop(entry);
        debug!(document = %id, %version, "changed");
        Ok(version)
    }

    /// Remove the document. Its pending waiters resolve with `DocumentClosed`.
    pub fn close(&self, id: &DocumentId) -> Result<()> {
        let (_, entry) = self
            .documents
            .remove(id)
            .ok_or_else(|| CoordinatorError::NotOpen(id.clone()))?;
        self.queue.remove(id);
        entry.results.close();
        debug!(document = %id, generation = entry.generation, "closed");
        Ok(())
    }

    /// Current content and version
    pub fn get(&self, id: &DocumentId) -> Result<(Arc<str>, Version)> {
        let entry = self
            .documents
            .get(id)
            .ok_or_else(|| CoordinatorError::NotOpen(id.clone()))?;
        let state = entry.state.lock();
        Ok((Arc::clone(&state.content), state.version))
    }

    pub fn version(&self, id: &DocumentId) -> Result<Version> {
        self.get(id).map(|(_, version)| version)
    }

    pub fn snapshot(&self, id: &DocumentId) -> Result<DocumentSnapshot> {
        let entry = self
            .documents
            .get(id)
            .ok_or_else(|| CoordinatorError::NotOpen(id.clone()))?;
        let state = entry.state.lock();
        Ok(DocumentSnapshot {
            id: id.clone(),
            content: Arc::clone(&state.content),
            version: state.version,
            generation: entry.generation,
        })
    }

    /// Register a waiter together with the version current at registration
    pub fn subscribe(&self, id: &DocumentId) -> Result<(Version, ResultWaiter<P>)> {
        let entry = self
            .documents
            .get(id)
            .ok_or_else(|| CoordinatorError::NotOpen(id.clone()))?;
        let version = entry.state.lock().version;
        Ok((version, entry.results.waiter(id.clone())))
    }

    /// Publish a payload computed from `snapshot`.
    ///
    /// Dropped when the document was closed since the snapshot was taken,
    /// including when it has been re-opened in the meantime.
    pub fn publish(&self, snapshot: &DocumentSnapshot, payload: P) -> Published {
        let Some(entry) = self.documents.get(&snapshot.id) else {
            return Published::Closed;
        };
        if entry.generation != snapshot.generation {
            return Published::Closed;
        }
        entry.results.publish(AnalysisResult {
            id: snapshot.id.clone(),
            version: snapshot.version,
            payload,
            computed_at: chrono::Utc::now(),
        })
    }

    pub fn latest(&self, id: &DocumentId) -> Result<Option<Arc<AnalysisResult<P>>>> {
        let entry = self
            .documents
            .get(id)
            .ok_or_else(|| CoordinatorError::NotOpen(id.clone()))?;
        Ok(entry.results.latest())
    }

    pub fn contains(&self, id: &DocumentId) -> bool {
        self.documents.contains_key(id)
    }

    /// Identities currently open, sorted
    pub fn ids(&self) -> Vec<DocumentId> {
        let mut ids: Vec<DocumentId> = self.documents.iter().map(|e| e.key().clone()).collect();
        ids.sort();
        ids
    }

    pub fn len(&self) -> usize {
        self.documents.len()
    }

    pub fn is_empty(&self) -> bool {
        self.documents.is_empty()
    }
}
