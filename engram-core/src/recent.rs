//! Recent tier — bounded per-owner FIFO working memory.
//!
//! Each owner gets an independent queue of at most `capacity` entries.
//! Adding to a full queue evicts the oldest entry and hands it back to the
//! caller, which stages it into the buffer.  The whole tier can be
//! snapshotted to a single JSON file and restored on startup.

use std::collections::{HashMap, VecDeque};
use std::path::Path;

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use tracing::{debug, info, warn};

use crate::error::Result;
use crate::types::{MemoryEntry, MemoryId, Metadata, OwnerId};

/// In-memory FIFO working tier for all owners.
#[derive(Debug)]
pub struct RecentMemory {
    capacity: usize,
    queues: Mutex<HashMap<OwnerId, VecDeque<MemoryEntry>>>,
}

impl RecentMemory {
    /// Create an empty tier with the given per-owner capacity.
    ///
    /// The minimum meaningful capacity is 1 (a queue must hold the entry it
    /// is about to evict for); 0 is coerced to 1.
    #[must_use]
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity: capacity.max(1),
            queues: Mutex::new(HashMap::new()),
        }
    }

    /// Per-owner queue capacity.
    #[must_use]
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Append an entry to its owner's queue.
    ///
    /// Returns the evicted oldest entry when the queue was already full,
    /// `None` otherwise.
    pub fn add(&self, entry: MemoryEntry) -> Option<MemoryEntry> {
        let mut queues = self.queues.lock();
        let queue = queues.entry(entry.owner_id.clone()).or_default();

        let evicted = if queue.len() >= self.capacity {
            queue.pop_front()
        } else {
            None
        };
        queue.push_back(entry);

        if let Some(old) = &evicted {
            debug!(owner = %old.owner_id, memory_id = %old.id, "Evicted oldest recent memory");
        }
        evicted
    }

    /// All of an owner's recent memories, oldest first.
    #[must_use]
    pub fn get_all(&self, owner: &OwnerId) -> Vec<MemoryEntry> {
        self.queues
            .lock()
            .get(owner)
            .map(|q| q.iter().cloned().collect())
            .unwrap_or_default()
    }

    /// Number of recent memories held for an owner.
    #[must_use]
    pub fn count(&self, owner: &OwnerId) -> usize {
        self.queues.lock().get(owner).map_or(0, VecDeque::len)
    }

    /// Creation time of the newest recent memory, if any.
    #[must_use]
    pub fn last_memory_at(&self, owner: &OwnerId) -> Option<DateTime<Utc>> {
        self.queues
            .lock()
            .get(owner)
            .and_then(|q| q.back().map(|e| e.created_at))
    }

    /// Find a memory by id in an owner's queue.
    #[must_use]
    pub fn find(&self, owner: &OwnerId, id: &MemoryId) -> Option<MemoryEntry> {
        self.queues
            .lock()
            .get(owner)
            .and_then(|q| q.iter().find(|e| &e.id == id).cloned())
    }

    /// Rewrite a memory's content (and optionally metadata) in place.
    ///
    /// The entry's timestamp is refreshed to now.  Returns `false` when the
    /// id is not in this owner's queue.
    pub fn update(
        &self,
        owner: &OwnerId,
        id: &MemoryId,
        content: &str,
        metadata: Option<Metadata>,
    ) -> bool {
        let mut queues = self.queues.lock();
        let Some(queue) = queues.get_mut(owner) else {
            return false;
        };
        let Some(entry) = queue.iter_mut().find(|e| &e.id == id) else {
            return false;
        };
        entry.content = content.to_string();
        entry.created_at = Utc::now();
        if metadata.is_some() {
            entry.metadata = metadata;
        }
        true
    }

    /// Remove a memory by id.  Returns `false` when absent.
    pub fn delete(&self, owner: &OwnerId, id: &MemoryId) -> bool {
        let mut queues = self.queues.lock();
        let Some(queue) = queues.get_mut(owner) else {
            return false;
        };
        let before = queue.len();
        queue.retain(|e| &e.id != id);
        queue.len() < before
    }

    /// Drop an owner's entire queue; returns how many entries it held.
    pub fn clear(&self, owner: &OwnerId) -> usize {
        self.queues
            .lock()
            .remove(owner)
            .map_or(0, |q| q.len())
    }

    /// Owners that currently have at least one recent memory.
    #[must_use]
    pub fn owners(&self) -> Vec<OwnerId> {
        self.queues
            .lock()
            .iter()
            .filter(|(_, q)| !q.is_empty())
            .map(|(owner, _)| owner.clone())
            .collect()
    }

    // -----------------------------------------------------------------------
    // Snapshot persistence
    // -----------------------------------------------------------------------

    /// Write the whole tier to a JSON snapshot file.
    ///
    /// # Errors
    /// Returns an error if the file cannot be written.
    pub fn save_snapshot(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let snapshot: HashMap<OwnerId, Vec<MemoryEntry>> = self
            .queues
            .lock()
            .iter()
            .filter(|(_, q)| !q.is_empty())
            .map(|(owner, q)| (owner.clone(), q.iter().cloned().collect()))
            .collect();

        let json = serde_json::to_string_pretty(&snapshot)
            .map_err(|e| crate::EngramError::Serialization(e.to_string()))?;
        std::fs::write(path, json)?;
        info!(path = %path.display(), owners = snapshot.len(), "Saved recent-tier snapshot");
        Ok(())
    }

    /// Restore queues from a JSON snapshot file.
    ///
    /// A missing file is a normal first run.  A corrupt file is logged and
    /// skipped so a bad snapshot never blocks startup; queues longer than
    /// the configured capacity are truncated to their newest entries.
    pub fn load_snapshot(&self, path: &Path) {
        let content = match std::fs::read_to_string(path) {
            Ok(content) => content,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                debug!(path = %path.display(), "No recent-tier snapshot to restore");
                return;
            }
            Err(e) => {
                warn!(path = %path.display(), error = %e, "Failed to read snapshot, starting empty");
                return;
            }
        };

        let snapshot: HashMap<OwnerId, Vec<MemoryEntry>> = match serde_json::from_str(&content) {
            Ok(snapshot) => snapshot,
            Err(e) => {
                warn!(path = %path.display(), error = %e, "Corrupt snapshot, starting empty");
                return;
            }
        };

        let mut queues = self.queues.lock();
        let owners = snapshot.len();
        for (owner, mut entries) in snapshot {
            if entries.len() > self.capacity {
                entries.drain(..entries.len() - self.capacity);
            }
            queues.insert(owner, entries.into_iter().collect());
        }
        info!(path = %path.display(), owners, "Restored recent-tier snapshot");
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    fn entry(owner: &str, content: &str) -> MemoryEntry {
        MemoryEntry::new(OwnerId::from(owner), content, None)
    }

    #[test]
    fn add_under_capacity_evicts_nothing() {
        let tier = RecentMemory::new(5);
        for i in 0..5 {
            assert!(tier.add(entry("npc", &format!("m{i}"))).is_none());
        }
        assert_eq!(tier.count(&OwnerId::from("npc")), 5);
    }

    #[test]
    fn add_over_capacity_evicts_oldest() {
        let tier = RecentMemory::new(3);
        tier.add(entry("npc", "a"));
        tier.add(entry("npc", "b"));
        tier.add(entry("npc", "c"));

        let evicted = tier.add(entry("npc", "d")).expect("should evict");
        assert_eq!(evicted.content, "a");

        let remaining: Vec<_> = tier
            .get_all(&OwnerId::from("npc"))
            .into_iter()
            .map(|e| e.content)
            .collect();
        assert_eq!(remaining, vec!["b", "c", "d"]);
    }

    #[test]
    fn zero_capacity_is_coerced_to_one() {
        let tier = RecentMemory::new(0);
        assert_eq!(tier.capacity(), 1);

        assert!(tier.add(entry("npc", "a")).is_none());
        let evicted = tier.add(entry("npc", "b")).expect("should evict");
        assert_eq!(evicted.content, "a");
        assert_eq!(tier.count(&OwnerId::from("npc")), 1);
    }

    #[test]
    fn owners_are_isolated() {
        let tier = RecentMemory::new(2);
        tier.add(entry("alice", "a1"));
        tier.add(entry("bob", "b1"));
        tier.add(entry("alice", "a2"));
        tier.add(entry("alice", "a3"));

        assert_eq!(tier.count(&OwnerId::from("alice")), 2);
        assert_eq!(tier.count(&OwnerId::from("bob")), 1);
        assert_eq!(tier.get_all(&OwnerId::from("bob"))[0].content, "b1");
    }

    #[test]
    fn update_rewrites_content_and_refreshes_timestamp() {
        let tier = RecentMemory::new(5);
        let e = entry("npc", "original");
        let id = e.id.clone();
        let created = e.created_at;
        tier.add(e);

        assert!(tier.update(&OwnerId::from("npc"), &id, "rewritten", None));
        let found = tier.find(&OwnerId::from("npc"), &id).expect("present");
        assert_eq!(found.content, "rewritten");
        assert!(found.created_at >= created);

        assert!(!tier.update(&OwnerId::from("npc"), &MemoryId::from("ghost"), "x", None));
    }

    #[test]
    fn delete_and_clear() {
        let tier = RecentMemory::new(5);
        let e = entry("npc", "a");
        let id = e.id.clone();
        tier.add(e);
        tier.add(entry("npc", "b"));

        assert!(tier.delete(&OwnerId::from("npc"), &id));
        assert!(!tier.delete(&OwnerId::from("npc"), &id));
        assert_eq!(tier.count(&OwnerId::from("npc")), 1);

        assert_eq!(tier.clear(&OwnerId::from("npc")), 1);
        assert_eq!(tier.count(&OwnerId::from("npc")), 0);
        assert_eq!(tier.clear(&OwnerId::from("npc")), 0);
    }

    #[test]
    fn snapshot_round_trip() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("recent.json");

        let tier = RecentMemory::new(5);
        tier.add(entry("alice", "a1"));
        tier.add(entry("alice", "a2"));
        tier.add(entry("bob", "b1"));
        tier.save_snapshot(&path).expect("save");

        let restored = RecentMemory::new(5);
        restored.load_snapshot(&path);
        assert_eq!(restored.count(&OwnerId::from("alice")), 2);
        assert_eq!(restored.count(&OwnerId::from("bob")), 1);
        let contents: Vec<_> = restored
            .get_all(&OwnerId::from("alice"))
            .into_iter()
            .map(|e| e.content)
            .collect();
        assert_eq!(contents, vec!["a1", "a2"]);
    }

    #[test]
    fn load_truncates_oversized_snapshot_queues() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("recent.json");

        let big = RecentMemory::new(10);
        for i in 0..6 {
            big.add(entry("npc", &format!("m{i}")));
        }
        big.save_snapshot(&path).expect("save");

        let small = RecentMemory::new(3);
        small.load_snapshot(&path);
        let contents: Vec<_> = small
            .get_all(&OwnerId::from("npc"))
            .into_iter()
            .map(|e| e.content)
            .collect();
        assert_eq!(contents, vec!["m3", "m4", "m5"]);
    }

    #[test]
    fn corrupt_snapshot_starts_empty() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("recent.json");
        std::fs::write(&path, "{not valid json").expect("write");

        let tier = RecentMemory::new(5);
        tier.load_snapshot(&path);
        assert!(tier.owners().is_empty());
    }

    #[test]
    fn missing_snapshot_is_a_clean_start() {
        let tier = RecentMemory::new(5);
        tier.load_snapshot(Path::new("/nonexistent/recent.json"));
        assert!(tier.owners().is_empty());
    }
}
