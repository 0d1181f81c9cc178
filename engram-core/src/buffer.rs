//! Buffer tier — durable staging for memories evicted from the recent queue.
//!
//! Each owner's pending memories live in one JSON file under the buffer
//! directory (`{owner}_buffer.json`).  Entries wait here until the flush
//! threshold is reached and they are embedded into the vector index as a
//! batch.  Files are written via a temp-file rename so a crash mid-write
//! never leaves a half-written buffer.

use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::error::Result;
use crate::types::{MemoryEntry, MemoryId, Metadata, OwnerId};

const BUFFER_SUFFIX: &str = "_buffer.json";

/// On-disk shape of one owner's buffer file.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
struct BufferFile {
    memories: Vec<MemoryEntry>,
    count: usize,
    last_updated: Option<DateTime<Utc>>,
}

/// File-backed staging buffer for all owners.
#[derive(Debug)]
pub struct BufferStore {
    dir: PathBuf,
}

impl BufferStore {
    /// Create a buffer store rooted at `dir`, creating the directory.
    ///
    /// # Errors
    /// Returns an error if the directory cannot be created.
    pub fn new<P: AsRef<Path>>(dir: P) -> Result<Self> {
        let dir = dir.as_ref().to_path_buf();
        std::fs::create_dir_all(&dir)?;
        Ok(Self { dir })
    }

    fn file_path(&self, owner: &OwnerId) -> PathBuf {
        self.dir.join(format!("{}{BUFFER_SUFFIX}", owner.as_str()))
    }

    fn load(&self, owner: &OwnerId) -> BufferFile {
        let path = self.file_path(owner);
        let content = match std::fs::read_to_string(&path) {
            Ok(content) => content,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return BufferFile::default(),
            Err(e) => {
                warn!(owner = %owner, error = %e, "Failed to read buffer file, treating as empty");
                return BufferFile::default();
            }
        };
        match serde_json::from_str(&content) {
            Ok(file) => file,
            Err(e) => {
                warn!(owner = %owner, error = %e, "Corrupt buffer file, treating as empty");
                BufferFile::default()
            }
        }
    }

    fn save(&self, owner: &OwnerId, mut file: BufferFile) -> Result<()> {
        file.count = file.memories.len();
        file.last_updated = Some(Utc::now());

        let path = self.file_path(owner);
        let json = serde_json::to_string_pretty(&file)
            .map_err(|e| crate::EngramError::Serialization(e.to_string()))?;

        let tmp = path.with_extension("json.tmp");
        std::fs::write(&tmp, json)?;
        std::fs::rename(&tmp, &path)?;
        Ok(())
    }

    /// Append an evicted entry to its owner's buffer.
    ///
    /// Returns the buffered count after the append.
    ///
    /// # Errors
    /// Returns an error if the buffer file cannot be written.
    pub fn append(&self, entry: MemoryEntry) -> Result<usize> {
        let owner = entry.owner_id.clone();
        let mut file = self.load(&owner);
        file.memories.push(entry);
        let count = file.memories.len();
        self.save(&owner, file)?;
        debug!(owner = %owner, count, "Buffered evicted memory");
        Ok(count)
    }

    /// All buffered entries for an owner, in eviction order.
    #[must_use]
    pub fn get_all(&self, owner: &OwnerId) -> Vec<MemoryEntry> {
        self.load(owner).memories
    }

    /// Number of buffered entries for an owner.
    #[must_use]
    pub fn count(&self, owner: &OwnerId) -> usize {
        self.load(owner).memories.len()
    }

    /// Find a buffered entry by id.
    #[must_use]
    pub fn find(&self, owner: &OwnerId, id: &MemoryId) -> Option<MemoryEntry> {
        self.load(owner).memories.into_iter().find(|e| &e.id == id)
    }

    /// Rewrite a buffered entry's content (and optionally metadata),
    /// refreshing its timestamp.  Returns `false` when the id is absent.
    ///
    /// # Errors
    /// Returns an error if the buffer file cannot be written.
    pub fn update(
        &self,
        owner: &OwnerId,
        id: &MemoryId,
        content: &str,
        metadata: Option<Metadata>,
    ) -> Result<bool> {
        let mut file = self.load(owner);
        let Some(entry) = file.memories.iter_mut().find(|e| &e.id == id) else {
            return Ok(false);
        };
        entry.content = content.to_string();
        entry.created_at = Utc::now();
        if metadata.is_some() {
            entry.metadata = metadata;
        }
        self.save(owner, file)?;
        Ok(true)
    }

    /// Remove a buffered entry by id.  Returns `false` when absent.
    ///
    /// # Errors
    /// Returns an error if the buffer file cannot be written.
    pub fn delete(&self, owner: &OwnerId, id: &MemoryId) -> Result<bool> {
        let mut file = self.load(owner);
        let before = file.memories.len();
        file.memories.retain(|e| &e.id != id);
        if file.memories.len() == before {
            return Ok(false);
        }
        self.save(owner, file)?;
        Ok(true)
    }

    /// Delete an owner's entire buffer file; returns how many entries it held.
    ///
    /// # Errors
    /// Returns an error if the file exists but cannot be removed.
    pub fn clear(&self, owner: &OwnerId) -> Result<usize> {
        let count = self.count(owner);
        let path = self.file_path(owner);
        match std::fs::remove_file(&path) {
            Ok(()) => Ok(count),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(0),
            Err(e) => Err(e.into()),
        }
    }

    /// Owners that currently have a non-empty buffer, derived from the
    /// files on disk.
    #[must_use]
    pub fn owners(&self) -> Vec<OwnerId> {
        let Ok(entries) = std::fs::read_dir(&self.dir) else {
            return Vec::new();
        };
        let mut owners = Vec::new();
        for entry in entries.flatten() {
            let name = entry.file_name();
            let Some(name) = name.to_str() else { continue };
            if let Some(owner) = name.strip_suffix(BUFFER_SUFFIX) {
                let owner = OwnerId::from(owner);
                if self.count(&owner) > 0 {
                    owners.push(owner);
                }
            }
        }
        owners
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
