//! Memory manager — orchestrates the three tiers as one lifecycle.
//!
//! All external callers go through [`MemoryManager`]; the tiers never call
//! each other directly.  A new memory always enters the recent queue; the
//! manager handles the eviction cascade (recent -> buffer) and triggers a
//! synchronous flush into the vector index whenever the buffer reaches its
//! threshold.

use crate::buffer::BufferStore;
use crate::error::{EngramError, Result};
use crate::longterm::LongTermMemory;
use crate::recent::RecentMemory;
use crate::types::{
    AddMemoryOutcome, ClearReport, ImportItem, ImportReport, LocatedMemory, MemoryContext,
    MemoryEntry, MemoryId, MemoryLocation, Metadata, OwnerId, OwnerMemoryStats, SimilarMemory,
    SystemStats,
};
use tracing::{debug, info};

/// Coordinates the recent queue, staging buffer, and vector index.
#[derive(Debug)]
pub struct MemoryManager {
    recent: RecentMemory,
    buffer: BufferStore,
    longterm: LongTermMemory,
    buffer_threshold: usize,
    max_content_chars: usize,
    default_top_k: usize,
}

impl MemoryManager {
    /// Assemble a manager from its three tiers.
    #[must_use]
    pub fn new(
        recent: RecentMemory,
        buffer: BufferStore,
        longterm: LongTermMemory,
        buffer_threshold: usize,
        max_content_chars: usize,
        default_top_k: usize,
    ) -> Self {
        Self {
            recent,
            buffer,
            longterm,
            buffer_threshold,
            max_content_chars,
            default_top_k,
        }
    }

    /// The recent tier, exposed for snapshot persistence.
    #[must_use]
    pub fn recent(&self) -> &RecentMemory {
        &self.recent
    }

    fn validate_content(&self, content: &str) -> Result<()> {
        let length = content.chars().count();
        if content.trim().is_empty() {
            return Err(EngramError::InvalidContent {
                reason: "content is empty".to_string(),
                length,
            });
        }
        if length > self.max_content_chars {
            return Err(EngramError::InvalidContent {
                reason: format!("content exceeds {} characters", self.max_content_chars),
                length,
            });
        }
        Ok(())
    }

    // -----------------------------------------------------------------------
    // Lifecycle
    // -----------------------------------------------------------------------

    /// Record a new memory for an owner.
    ///
    /// The memory always lands in the recent queue.  If that displaces the
    /// oldest recent memory it is staged into the buffer, and if the buffer
    /// then reaches its threshold the whole batch is embedded into the
    /// vector index before this call returns.
    ///
    /// # Errors
    ///
    /// Returns [`EngramError::InvalidContent`] for blank or oversized
    /// content, an I/O error if the eviction cannot be staged, or an
    /// embedding/storage error when the threshold flush fails.  A flush
    /// error leaves consistent state behind: the new memory is in the
    /// recent queue, the eviction is staged, and the next threshold
    /// crossing (or [`force_embed_buffer`](Self::force_embed_buffer))
    /// retries.
    pub fn add_memory(
        &self,
        owner: &OwnerId,
        content: &str,
        metadata: Option<Metadata>,
    ) -> Result<AddMemoryOutcome> {
        self.validate_content(content)?;

        let entry = MemoryEntry::new(owner.clone(), content, metadata);
        let memory_id = entry.id.clone();
        let evicted = self.recent.add(entry);

        let mut evicted_to_buffer = false;
        let mut buffer_auto_embedded = false;

        if let Some(old) = evicted {
            let staged = self.buffer.append(old)?;
            evicted_to_buffer = true;

            if staged >= self.buffer_threshold {
                let flushed = self.longterm.flush_buffer(&self.buffer, owner)?;
                buffer_auto_embedded = flushed > 0;
            }
        }

        debug!(
            owner = %owner,
            memory_id = %memory_id,
            evicted = evicted_to_buffer,
            flushed = buffer_auto_embedded,
            "Added memory"
        );

        Ok(AddMemoryOutcome {
            memory_id,
            stored_in: MemoryLocation::Recent,
            evicted_to_buffer,
            buffer_auto_embedded,
        })
    }

    /// Embed an owner's staged buffer right now, regardless of threshold.
    ///
    /// Returns the number of memories moved into the vector index.
    ///
    /// # Errors
    ///
    /// Returns an embedding or storage error; the buffer is untouched then.
    pub fn force_embed_buffer(&self, owner: &OwnerId) -> Result<usize> {
        self.longterm.flush_buffer(&self.buffer, owner)
    }

    /// Build the prompt context for an owner: verbatim recent memories plus,
    /// when a query is given, semantically relevant long-term memories.
    ///
    /// # Errors
    ///
    /// Returns an embedding or storage error from the semantic search.
    pub fn get_context(
        &self,
        owner: &OwnerId,
        query: Option<&str>,
        top_k: Option<usize>,
    ) -> Result<MemoryContext> {
        let recent = self.recent.get_all(owner);
        let relevant = match query {
            Some(query) if !query.trim().is_empty() => {
                let k = top_k.unwrap_or(self.default_top_k);
                self.longterm.search(owner, query, k)?
            }
            _ => Vec::new(),
        };

        Ok(MemoryContext {
            recent_count: recent.len(),
            relevant_count: relevant.len(),
            recent,
            relevant,
        })
    }

    /// Search an owner's long-term memories directly.
    ///
    /// # Errors
    ///
    /// Returns an embedding or storage error.
    pub fn search_memories(
        &self,
        owner: &OwnerId,
        query: &str,
        top_k: Option<usize>,
    ) -> Result<Vec<SimilarMemory>> {
        self.longterm
            .search(owner, query, top_k.unwrap_or(self.default_top_k))
    }

    // -----------------------------------------------------------------------
    // Statistics
    // -----------------------------------------------------------------------

    /// Per-owner counts across all three tiers.
    ///
    /// # Errors
    /// Returns a storage error.
    pub fn get_stats(&self, owner: &OwnerId) -> Result<OwnerMemoryStats> {
        let recent_count = self.recent.count(owner);
        let buffer_count = self.buffer.count(owner);
        let longterm_count = self.longterm.count(owner)?;

        Ok(OwnerMemoryStats {
            owner_id: owner.clone(),
            recent_count,
            buffer_count,
            longterm_count,
            total_count: recent_count + buffer_count + longterm_count,
            last_memory_at: self.recent.last_memory_at(owner),
        })
    }

    /// Every owner with at least one memory in any tier.
    ///
    /// # Errors
    /// Returns a storage error.
    pub fn get_all_owners(&self) -> Result<Vec<OwnerId>> {
        let mut owners = self.recent.owners();
        owners.extend(self.buffer.owners());
        owners.extend(self.longterm.owners()?);
        owners.sort();
        owners.dedup();
        Ok(owners)
    }

    /// System-wide statistics, aggregated over every known owner.
    ///
    /// # Errors
    /// Returns a storage error.
    pub fn get_all_stats(&self) -> Result<SystemStats> {
        let owner_ids = self.get_all_owners()?;
        let mut stats = SystemStats {
            total_owners: owner_ids.len(),
            ..SystemStats::default()
        };

        for owner in owner_ids {
            let s = self.get_stats(&owner)?;
            stats.total_recent += s.recent_count;
            stats.total_buffer += s.buffer_count;
            stats.total_longterm += s.longterm_count;
            stats.total_memories += s.total_count;
            stats.owners.push(s);
        }
        Ok(stats)
    }

    // -----------------------------------------------------------------------
    // Administration
    // -----------------------------------------------------------------------

    /// Wipe every memory an owner has, in all three tiers.
    ///
    /// # Errors
    /// Returns an I/O or storage error.
    pub fn clear_owner(&self, owner: &OwnerId) -> Result<ClearReport> {
        self.recent.clear(owner);
        let buffer = self.buffer.clear(owner)?;
        let longterm = self.longterm.clear(owner)?;

        info!(owner = %owner, buffer, longterm, "Cleared all memories");
        Ok(ClearReport {
            recent: 0,
            buffer,
            longterm,
            total: buffer + longterm,
        })
    }

    /// Locate a memory by id, searching recent, then buffer, then long-term.
    ///
    /// # Errors
    /// Returns a storage error.
    pub fn find_memory(&self, owner: &OwnerId, id: &MemoryId) -> Result<Option<LocatedMemory>> {
        if let Some(entry) = self.recent.find(owner, id) {
            return Ok(Some(LocatedMemory {
                entry,
                location: MemoryLocation::Recent,
            }));
        }
        if let Some(entry) = self.buffer.find(owner, id) {
            return Ok(Some(LocatedMemory {
                entry,
                location: MemoryLocation::Buffer,
            }));
        }
        if let Some(entry) = self.longterm.find(owner, id)? {
            return Ok(Some(LocatedMemory {
                entry,
                location: MemoryLocation::LongTerm,
            }));
        }
        Ok(None)
    }

    /// Rewrite a memory's content wherever it currently lives.
    ///
    /// Long-term memories are re-embedded; the entry's timestamp is
    /// refreshed in every tier.  Returns the tier that held the memory.
    ///
    /// # Errors
    ///
    /// Returns [`EngramError::InvalidContent`] for invalid new content,
    /// [`EngramError::MemoryNotFound`] when no tier holds the id, or an
    /// embedding/storage error.
    pub fn update_memory(
        &self,
        owner: &OwnerId,
        id: &MemoryId,
        content: &str,
        metadata: Option<Metadata>,
    ) -> Result<MemoryLocation> {
        self.validate_content(content)?;

        if self.recent.update(owner, id, content, metadata.clone()) {
            return Ok(MemoryLocation::Recent);
        }
        if self.buffer.update(owner, id, content, metadata)? {
            return Ok(MemoryLocation::Buffer);
        }
        if self.longterm.update(owner, id, content)? {
            return Ok(MemoryLocation::LongTerm);
        }
        Err(EngramError::MemoryNotFound(id.clone()))
    }

    /// Delete a memory by id wherever it currently lives.
    ///
    /// Returns the tier it was removed from.
    ///
    /// # Errors
    ///
    /// Returns [`EngramError::MemoryNotFound`] when no tier holds the id,
    /// or an I/O/storage error.
    pub fn delete_memory(&self, owner: &OwnerId, id: &MemoryId) -> Result<MemoryLocation> {
        if self.recent.delete(owner, id) {
            return Ok(MemoryLocation::Recent);
        }
        if self.buffer.delete(owner, id)? {
            return Ok(MemoryLocation::Buffer);
        }
        if self.longterm.delete(owner, id)? {
            return Ok(MemoryLocation::LongTerm);
        }
        Err(EngramError::MemoryNotFound(id.clone()))
    }

    /// Export every memory an owner has, each tagged with its tier.
    ///
    /// # Errors
    /// Returns a storage error.
    pub fn export_memories(&self, owner: &OwnerId) -> Result<Vec<LocatedMemory>> {
        let mut out = Vec::new();
        for entry in self.recent.get_all(owner) {
            out.push(LocatedMemory {
                entry,
                location: MemoryLocation::Recent,
            });
        }
        for entry in self.buffer.get_all(owner) {
            out.push(LocatedMemory {
                entry,
                location: MemoryLocation::Buffer,
            });
        }
        for entry in self.longterm.get_all(owner)? {
            out.push(LocatedMemory {
                entry,
                location: MemoryLocation::LongTerm,
            });
        }
        Ok(out)
    }

    /// Bulk-import memories through the normal add path.
    ///
    /// Items are processed in order; invalid items are skipped and reported
    /// while the rest import normally.
    ///
    /// # Errors
    /// Returns an I/O error if staging an eviction fails.
    pub fn import_memories(&self, owner: &OwnerId, items: Vec<ImportItem>) -> Result<ImportReport> {
        let mut report = ImportReport::default();
        for (index, item) in items.into_iter().enumerate() {
            match self.add_memory(owner, &item.content, item.metadata) {
                Ok(_) => report.imported += 1,
                Err(e @ EngramError::InvalidContent { .. }) => {
                    report.failed += 1;
                    report.errors.push(format!("item {index}: {e}"));
                }
                Err(e) => return Err(e),
            }
        }
        info!(owner = %owner, imported = report.imported, failed = report.failed, "Bulk import finished");
        Ok(report)
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::embedding::{Embedder, EmbeddingModel, FailingEmbeddingModel, HashedEmbeddingModel};
    use crate::vector_store::SqliteVectorStore;
    use std::sync::Arc;

    fn manager_with(
        capacity: usize,
        threshold: usize,
        model: Arc<dyn EmbeddingModel>,
    ) -> (tempfile::TempDir, MemoryManager) {
        let dir = tempfile::tempdir().expect("tempdir");
        let buffer = BufferStore::new(dir.path().join("buffers")).expect("buffer");
        let store = Arc::new(SqliteVectorStore::open_in_memory().expect("store"));
        let embedder = Arc::new(Embedder::with_model(model));
        let longterm = LongTermMemory::new(store, embedder);
        let manager = MemoryManager::new(
            RecentMemory::new(capacity),
            buffer,
            longterm,
            threshold,
            10_000,
            3,
        );
        (dir, manager)
    }

    fn manager(capacity: usize, threshold: usize) -> (tempfile::TempDir, MemoryManager) {
        manager_with(capacity, threshold, Arc::new(HashedEmbeddingModel::new(64)))
    }

    fn owner() -> OwnerId {
        OwnerId::from("blacksmith_001")
    }

    #[test]
    fn rejects_empty_and_oversized_content() {
        let (_dir, m) = manager(5, 10);
        assert!(matches!(
            m.add_memory(&owner(), "", None),
            Err(EngramError::InvalidContent { .. })
        ));
        assert!(matches!(
            m.add_memory(&owner(), "   \n\t ", None),
            Err(EngramError::InvalidContent { .. })
        ));
        let oversized = "x".repeat(10_001);
        assert!(matches!(
            m.add_memory(&owner(), &oversized, None),
            Err(EngramError::InvalidContent { .. })
        ));
        // Nothing was stored.
        assert_eq!(m.get_stats(&owner()).expect("stats").total_count, 0);
    }

    #[test]
    fn content_at_the_limit_is_accepted() {
        let (_dir, m) = manager(5, 10);
        let max = "x".repeat(10_000);
        assert!(m.add_memory(&owner(), &max, None).is_ok());
    }

    #[test]
    fn sixth_add_evicts_oldest_into_buffer() {
        let (_dir, m) = manager(5, 10);
        for c in ["A", "B", "C", "D", "E"] {
            let outcome = m.add_memory(&owner(), c, None).expect("add");
            assert!(!outcome.evicted_to_buffer);
        }

        let outcome = m.add_memory(&owner(), "F", None).expect("add");
        assert!(outcome.evicted_to_buffer);
        assert!(!outcome.buffer_auto_embedded);
        assert_eq!(outcome.stored_in, MemoryLocation::Recent);

        let ctx = m.get_context(&owner(), None, None).expect("context");
        let recent: Vec<_> = ctx.recent.iter().map(|e| e.content.as_str()).collect();
        assert_eq!(recent, vec!["B", "C", "D", "E", "F"]);

        let stats = m.get_stats(&owner()).expect("stats");
        assert_eq!(stats.buffer_count, 1);
        let buffered = m.export_memories(&owner()).expect("export");
        let staged: Vec<_> = buffered
            .iter()
            .filter(|l| l.location == MemoryLocation::Buffer)
            .map(|l| l.entry.content.as_str())
            .collect();
        assert_eq!(staged, vec!["A"]);
    }

    #[test]
    fn fifteenth_add_triggers_auto_embed() {
        let (_dir, m) = manager(5, 10);
        let mut last = None;
        for i in 0..15 {
            last = Some(
                m.add_memory(&owner(), &format!("conversation turn {i}"), None)
                    .expect("add"),
            );
        }

        let last = last.expect("outcome");
        assert!(last.evicted_to_buffer);
        assert!(last.buffer_auto_embedded);

        let stats = m.get_stats(&owner()).expect("stats");
        assert_eq!(stats.recent_count, 5);
        assert_eq!(stats.buffer_count, 0);
        assert_eq!(stats.longterm_count, 10);
        assert_eq!(stats.total_count, 15);
    }

    #[test]
    fn failed_auto_flush_surfaces_and_loses_nothing() {
        let (_dir, m) = manager_with(1, 2, Arc::new(FailingEmbeddingModel));
        m.add_memory(&owner(), "one", None).expect("add");
        m.add_memory(&owner(), "two", None).expect("add");
        // Third add pushes the buffer to the threshold; the flush error
        // surfaces to the caller.
        let err = m.add_memory(&owner(), "three", None).expect_err("flush should fail");
        assert!(matches!(err, EngramError::Embedding(_)));

        // State is still consistent: the new memory made it into the recent
        // queue, the eviction is staged, and nothing reached the index.
        let stats = m.get_stats(&owner()).expect("stats");
        assert_eq!(stats.recent_count, 1);
        assert_eq!(stats.buffer_count, 2);
        assert_eq!(stats.longterm_count, 0);
        let ctx = m.get_context(&owner(), None, None).expect("context");
        assert_eq!(ctx.recent[0].content, "three");
    }

    #[test]
    fn flush_error_propagates_even_at_threshold_one() {
        let (_dir, m) = manager_with(1, 1, Arc::new(FailingEmbeddingModel));
        m.add_memory(&owner(), "first", None).expect("add");
        assert!(m.add_memory(&owner(), "second", None).is_err());
        assert_eq!(m.get_stats(&owner()).expect("stats").buffer_count, 1);
    }

    #[test]
    fn force_embed_flushes_below_threshold() {
        let (_dir, m) = manager(2, 10);
        for c in ["a", "b", "c", "d"] {
            m.add_memory(&owner(), c, None).expect("add");
        }
        assert_eq!(m.get_stats(&owner()).expect("stats").buffer_count, 2);

        assert_eq!(m.force_embed_buffer(&owner()).expect("flush"), 2);
        let stats = m.get_stats(&owner()).expect("stats");
        assert_eq!(stats.buffer_count, 0);
        assert_eq!(stats.longterm_count, 2);

        assert_eq!(m.force_embed_buffer(&owner()).expect("reflush"), 0);
    }

    #[test]
    fn context_without_query_has_no_relevant_memories() {
        let (_dir, m) = manager(5, 10);
        m.add_memory(&owner(), "hello", None).expect("add");

        let ctx = m.get_context(&owner(), None, None).expect("context");
        assert_eq!(ctx.recent_count, 1);
        assert_eq!(ctx.relevant_count, 0);
        assert!(ctx.relevant.is_empty());

        let ctx = m.get_context(&owner(), Some("   "), None).expect("context");
        assert!(ctx.relevant.is_empty());
    }

    #[test]
    fn context_with_query_searches_longterm() {
        let (_dir, m) = manager(2, 2);
        // Push enough memories through to land some in the index.
        for c in [
            "the dragon burned the mill",
            "a merchant sold rare spices",
            "the dragon returned at dusk",
            "rain flooded the cellar",
            "the harvest was plentiful",
            "wolves howled at the gate",
        ] {
            m.add_memory(&owner(), c, None).expect("add");
        }
        m.force_embed_buffer(&owner()).expect("flush");

        let ctx = m
            .get_context(&owner(), Some("dragon"), Some(2))
            .expect("context");
        assert_eq!(ctx.recent_count, 2);
        assert!(ctx.relevant_count >= 1);
        assert!(ctx.relevant[0].memory.content.contains("dragon"));
    }

    #[test]
    fn find_update_delete_across_tiers() {
        let (_dir, m) = manager(1, 100);
        let first = m.add_memory(&owner(), "goes to longterm", None).expect("add");
        let second = m.add_memory(&owner(), "goes to buffer", None).expect("add");
        m.force_embed_buffer(&owner()).expect("flush");
        let third = m.add_memory(&owner(), "stays recent", None).expect("add");
        // Layout now: first -> longterm, second -> buffer, third -> recent.

        let found = m
            .find_memory(&owner(), &first.memory_id)
            .expect("find")
            .expect("present");
        assert_eq!(found.location, MemoryLocation::LongTerm);
        let found = m
            .find_memory(&owner(), &second.memory_id)
            .expect("find")
            .expect("present");
        assert_eq!(found.location, MemoryLocation::Buffer);
        let found = m
            .find_memory(&owner(), &third.memory_id)
            .expect("find")
            .expect("present");
        assert_eq!(found.location, MemoryLocation::Recent);

        assert_eq!(
            m.update_memory(&owner(), &second.memory_id, "rewritten", None)
                .expect("update"),
            MemoryLocation::Buffer
        );
        assert_eq!(
            m.delete_memory(&owner(), &first.memory_id).expect("delete"),
            MemoryLocation::LongTerm
        );
        assert!(matches!(
            m.delete_memory(&owner(), &first.memory_id),
            Err(EngramError::MemoryNotFound(_))
        ));
        assert!(matches!(
            m.update_memory(&owner(), &MemoryId::from("ghost"), "x", None),
            Err(EngramError::MemoryNotFound(_))
        ));
    }

    #[test]
    fn clear_owner_wipes_every_tier() {
        let (_dir, m) = manager(2, 3);
        for i in 0..8 {
            m.add_memory(&owner(), &format!("memory {i}"), None).expect("add");
        }
        let before = m.get_stats(&owner()).expect("stats");
        assert!(before.total_count > 0);

        let report = m.clear_owner(&owner()).expect("clear");
        assert_eq!(report.total, report.buffer + report.longterm);

        let after = m.get_stats(&owner()).expect("stats");
        assert_eq!(after.recent_count, 0);
        assert_eq!(after.buffer_count, 0);
        assert_eq!(after.longterm_count, 0);
        assert_eq!(after.total_count, 0);
        assert!(after.last_memory_at.is_none());
    }

    #[test]
    fn owners_union_all_three_tiers() {
        let (_dir, m) = manager(1, 100);
        // recent only
        m.add_memory(&OwnerId::from("recent_only"), "a", None).expect("add");
        // buffer: two adds with capacity 1 stages the first
        m.add_memory(&OwnerId::from("buffered"), "a", None).expect("add");
        m.add_memory(&OwnerId::from("buffered"), "b", None).expect("add");
        // longterm: flush after staging
        m.add_memory(&OwnerId::from("indexed"), "a", None).expect("add");
        m.add_memory(&OwnerId::from("indexed"), "b", None).expect("add");
        m.force_embed_buffer(&OwnerId::from("indexed")).expect("flush");

        let owners = m.get_all_owners().expect("owners");
        assert!(owners.contains(&OwnerId::from("recent_only")));
        assert!(owners.contains(&OwnerId::from("buffered")));
        assert!(owners.contains(&OwnerId::from("indexed")));
    }

    #[test]
    fn system_stats_aggregate_over_owners() {
        let (_dir, m) = manager(5, 10);
        m.add_memory(&OwnerId::from("alice"), "a1", None).expect("add");
        m.add_memory(&OwnerId::from("alice"), "a2", None).expect("add");
        m.add_memory(&OwnerId::from("bob"), "b1", None).expect("add");

        let stats = m.get_all_stats().expect("stats");
        assert_eq!(stats.total_owners, 2);
        assert_eq!(stats.total_memories, 3);
        assert_eq!(stats.total_recent, 3);
        assert_eq!(stats.total_buffer, 0);
        assert_eq!(stats.total_longterm, 0);
        assert_eq!(stats.owners.len(), 2);
    }

    #[test]
    fn import_allows_partial_success() {
        let (_dir, m) = manager(5, 10);
        let items = vec![
            ImportItem {
                content: "valid one".to_string(),
                metadata: None,
            },
            ImportItem {
                content: String::new(),
                metadata: None,
            },
            ImportItem {
                content: "valid two".to_string(),
                metadata: None,
            },
        ];

        let report = m.import_memories(&owner(), items).expect("import");
        assert_eq!(report.imported, 2);
        assert_eq!(report.failed, 1);
        assert_eq!(report.errors.len(), 1);
        assert!(report.errors[0].starts_with("item 1:"));
        assert_eq!(m.get_stats(&owner()).expect("stats").total_count, 2);
    }

    #[test]
    fn export_tags_memories_with_their_tier() {
        let (_dir, m) = manager(1, 100);
        m.add_memory(&owner(), "old", None).expect("add");
        m.add_memory(&owner(), "new", None).expect("add");

        let exported = m.export_memories(&owner()).expect("export");
        assert_eq!(exported.len(), 2);
        let locations: Vec<_> = exported.iter().map(|l| l.location).collect();
        assert!(locations.contains(&MemoryLocation::Recent));
        assert!(locations.contains(&MemoryLocation::Buffer));
    }
}
