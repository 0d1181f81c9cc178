//! Long-term tier — embedded, semantically searchable memory.
//!
//! Each owner maps to one vector collection (`npc_{owner}_longterm`).
//! Memories arrive here only through a buffer flush: the owner's staged
//! entries are embedded as one batch, written to the index, and only then
//! removed from the buffer.  A failure at any step leaves the buffer intact
//! so nothing is lost.
//!
//! Search scores are derived from L2 distance between normalized vectors:
//! `similarity = clamp(1 - d^2 / 2, 0, 1)`, so 1.0 means identical and 0.0
//! means unrelated.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use parking_lot::Mutex;
use serde_json::json;
use tracing::{info, warn};

use crate::buffer::BufferStore;
use crate::embedding::Embedder;
use crate::error::Result;
use crate::types::{Embedding, MemoryEntry, MemoryId, OwnerId, SimilarMemory};
use crate::vector_store::{VectorRecord, VectorStore};

const COLLECTION_PREFIX: &str = "npc_";
const COLLECTION_SUFFIX: &str = "_longterm";

/// Vector-indexed long-term memory over a [`VectorStore`].
pub struct LongTermMemory {
    store: Arc<dyn VectorStore>,
    embedder: Arc<Embedder>,
    // Serializes flushes per owner so two threads cannot embed the same
    // buffer contents twice.
    flush_locks: DashMap<OwnerId, Arc<Mutex<()>>>,
}

impl std::fmt::Debug for LongTermMemory {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LongTermMemory").finish_non_exhaustive()
    }
}

fn collection_name(owner: &OwnerId) -> String {
    format!("{COLLECTION_PREFIX}{}{COLLECTION_SUFFIX}", owner.as_str())
}

fn owner_from_collection(collection: &str) -> Option<OwnerId> {
    collection
        .strip_prefix(COLLECTION_PREFIX)?
        .strip_suffix(COLLECTION_SUFFIX)
        .map(OwnerId::from)
}

/// Convert L2 distance between unit vectors to a `[0, 1]` similarity.
fn distance_to_similarity(distance: f32) -> f32 {
    (1.0 - (distance * distance) / 2.0).clamp(0.0, 1.0)
}

/// Rebuild a [`MemoryEntry`] from the metadata stored alongside a vector.
///
/// Caller-supplied metadata is not stored in the index, so reconstructed
/// entries always carry `metadata: None`.
fn entry_from_metadata(metadata: &serde_json::Value) -> Option<MemoryEntry> {
    let npc_id = metadata.get("npc_id")?.as_str()?;
    let memory_id = metadata.get("memory_id")?.as_str()?;
    let content = metadata.get("content")?.as_str()?;
    let timestamp = metadata
        .get("timestamp")
        .and_then(|t| t.as_str())
        .and_then(|t| DateTime::parse_from_rfc3339(t).ok())
        .map_or_else(Utc::now, |t| t.with_timezone(&Utc));

    Some(MemoryEntry {
        id: MemoryId::from(memory_id),
        owner_id: OwnerId::from(npc_id),
        content: content.to_string(),
        created_at: timestamp,
        metadata: None,
    })
}

fn record_for(entry: &MemoryEntry, embedding: Embedding) -> VectorRecord {
    VectorRecord {
        id: entry.id.clone(),
        embedding,
        metadata: json!({
            "npc_id": entry.owner_id.as_str(),
            "memory_id": entry.id.0,
            "timestamp": entry.created_at.to_rfc3339(),
            "content": entry.content,
        }),
        document: entry.content.clone(),
    }
}

impl LongTermMemory {
    /// Create the long-term tier over a vector store and embedding service.
    #[must_use]
    pub fn new(store: Arc<dyn VectorStore>, embedder: Arc<Embedder>) -> Self {
        Self {
            store,
            embedder,
            flush_locks: DashMap::new(),
        }
    }

    fn flush_lock(&self, owner: &OwnerId) -> Arc<Mutex<()>> {
        self.flush_locks
            .entry(owner.clone())
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone()
    }

    /// Flush an owner's entire staged buffer into the vector index.
    ///
    /// All staged entries are embedded in a single batch and written to the
    /// index before the buffer is cleared.  Returns the number of memories
    /// moved (0 for an empty buffer).
    ///
    /// # Errors
    ///
    /// Returns an embedding or storage error; the buffer is left untouched
    /// in that case and the flush can simply be retried.
    pub fn flush_buffer(&self, buffer: &BufferStore, owner: &OwnerId) -> Result<usize> {
        let lock = self.flush_lock(owner);
        let _guard = lock.lock();

        let staged = buffer.get_all(owner);
        if staged.is_empty() {
            return Ok(0);
        }

        let texts: Vec<&str> = staged.iter().map(|e| e.content.as_str()).collect();
        let embeddings = self.embedder.embed_batch(&texts)?;

        let records: Vec<VectorRecord> = staged
            .iter()
            .zip(embeddings)
            .map(|(entry, embedding)| record_for(entry, embedding))
            .collect();

        let count = records.len();
        self.store.add(&collection_name(owner), records)?;
        buffer.clear(owner)?;

        info!(owner = %owner, count, "Flushed buffer into long-term memory");
        Ok(count)
    }

    /// Search an owner's long-term memories by semantic similarity.
    ///
    /// Results are ordered by descending similarity, at most `k` of them.
    /// An empty or missing collection returns `[]` without ever invoking
    /// the embedding model.
    ///
    /// # Errors
    ///
    /// Returns an embedding or storage error.
    pub fn search(&self, owner: &OwnerId, query: &str, k: usize) -> Result<Vec<SimilarMemory>> {
        let collection = collection_name(owner);
        if self.store.count(&collection)? == 0 {
            return Ok(Vec::new());
        }

        let query_embedding = self.embedder.embed(query)?;
        let matches = self.store.query(&collection, &query_embedding, k)?;

        let mut results = Vec::with_capacity(matches.len());
        for m in matches {
            let Some(memory) = entry_from_metadata(&m.metadata) else {
                warn!(owner = %owner, memory_id = %m.id, "Skipping record with malformed metadata");
                continue;
            };
            results.push(SimilarMemory {
                memory,
                similarity_score: distance_to_similarity(m.distance),
            });
        }
        Ok(results)
    }

    /// All of an owner's long-term memories (unordered).
    ///
    /// # Errors
    /// Returns a storage error.
    pub fn get_all(&self, owner: &OwnerId) -> Result<Vec<MemoryEntry>> {
        let records = self.store.get(&collection_name(owner), None)?;
        Ok(records
            .iter()
            .filter_map(|r| entry_from_metadata(&r.metadata))
            .collect())
    }

    /// Number of memories indexed for an owner.
    ///
    /// # Errors
    /// Returns a storage error.
    pub fn count(&self, owner: &OwnerId) -> Result<usize> {
        self.store.count(&collection_name(owner))
    }

    /// Find one indexed memory by id.
    ///
    /// # Errors
    /// Returns a storage error.
    pub fn find(&self, owner: &OwnerId, id: &MemoryId) -> Result<Option<MemoryEntry>> {
        let records = self
            .store
            .get(&collection_name(owner), Some(std::slice::from_ref(id)))?;
        Ok(records.first().and_then(|r| entry_from_metadata(&r.metadata)))
    }

    /// Rewrite an indexed memory's content, re-embedding it.
    ///
    /// The stored timestamp is refreshed to now.  Returns `false` when the
    /// id is not in this owner's collection.
    ///
    /// # Errors
    /// Returns an embedding or storage error.
    pub fn update(&self, owner: &OwnerId, id: &MemoryId, content: &str) -> Result<bool> {
        let embedding = self.embedder.embed(content)?;
        let entry = MemoryEntry {
            id: id.clone(),
            owner_id: owner.clone(),
            content: content.to_string(),
            created_at: Utc::now(),
            metadata: None,
        };
        self.store
            .update(&collection_name(owner), record_for(&entry, embedding))
    }

    /// Delete one indexed memory by id.  Returns `false` when absent.
    ///
    /// # Errors
    /// Returns a storage error.
    pub fn delete(&self, owner: &OwnerId, id: &MemoryId) -> Result<bool> {
        let removed = self
            .store
            .delete(&collection_name(owner), std::slice::from_ref(id))?;
        Ok(removed > 0)
    }

    /// Drop an owner's entire collection; returns how many memories it held.
    ///
    /// # Errors
    /// Returns a storage error.
    pub fn clear(&self, owner: &OwnerId) -> Result<usize> {
        self.store.delete_collection(&collection_name(owner))
    }

    /// Owners that have a long-term collection in the index.
    ///
    /// # Errors
    /// Returns a storage error.
    pub fn owners(&self) -> Result<Vec<OwnerId>> {
        Ok(self
            .store
            .list_collections()?
            .iter()
            .filter_map(|c| owner_from_collection(c))
            .collect())
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
