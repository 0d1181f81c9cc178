//! Core type definitions for the ENGRAM memory engine.
//!
//! All types are serializable; persisted records use RFC 3339 timestamps
//! via `chrono`'s serde support.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

// ---------------------------------------------------------------------------
// Identity Types
// ---------------------------------------------------------------------------

/// Identifier of the character (NPC) a memory belongs to.
///
/// Owner ids are caller-supplied strings (e.g. `"blacksmith_001"`) and are
/// used verbatim to key queues, buffer files, and vector collections.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct OwnerId(pub String);

impl OwnerId {
    /// Create an owner id from any string-like value.
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Borrow the raw id string.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<&str> for OwnerId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

impl From<String> for OwnerId {
    fn from(s: String) -> Self {
        Self(s)
    }
}

impl fmt::Display for OwnerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Unique identifier for a memory entry.
///
/// Generated once at creation (`mem_` + UUID v4 hex) and never reused;
/// opaque to every tier.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct MemoryId(pub String);

impl MemoryId {
    /// Generate a fresh random memory id.
    #[must_use]
    pub fn generate() -> Self {
        Self(format!("mem_{}", Uuid::new_v4().simple()))
    }
}

impl From<&str> for MemoryId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

impl fmt::Display for MemoryId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

// ---------------------------------------------------------------------------
// Memory Entry
// ---------------------------------------------------------------------------

/// Open key-value metadata attached to a memory.
///
/// The engine never inspects its contents; any JSON-compatible map is valid.
pub type Metadata = serde_json::Map<String, serde_json::Value>;

/// A single memory record — the atomic unit moved between tiers.
///
/// At any point in time a given `id` lives in exactly one of the recent
/// queue, the staging buffer, or the vector index.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MemoryEntry {
    /// Unique, immutable identifier.
    pub id: MemoryId,
    /// The character this memory belongs to.
    pub owner_id: OwnerId,
    /// Memory text, 1–10000 characters after validation.
    pub content: String,
    /// Creation time; refreshed only by explicit update operations.
    pub created_at: DateTime<Utc>,
    /// Optional caller-supplied metadata, opaque to the engine.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub metadata: Option<Metadata>,
}

impl MemoryEntry {
    /// Construct a new entry with a fresh id and the current timestamp.
    #[must_use]
    pub fn new(owner_id: OwnerId, content: impl Into<String>, metadata: Option<Metadata>) -> Self {
        Self {
            id: MemoryId::generate(),
            owner_id,
            content: content.into(),
            created_at: Utc::now(),
            metadata,
        }
    }
}

// ---------------------------------------------------------------------------
// Embedding Vector
// ---------------------------------------------------------------------------

/// A dense vector embedding for semantic similarity search.
/// Typically 384 dimensions (all-MiniLM-L6-v2), L2-normalized.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Embedding(pub Vec<f32>);

impl Embedding {
    /// Dimensionality of the embedding.
    #[must_use]
    pub fn dimensions(&self) -> usize {
        self.0.len()
    }

    /// Dot product with another embedding.
    /// Returns 0.0 on dimension mismatch.
    #[must_use]
    pub fn dot(&self, other: &Self) -> f32 {
        if self.0.len() != other.0.len() {
            return 0.0;
        }
        self.0.iter().zip(other.0.iter()).map(|(a, b)| a * b).sum()
    }

    /// Euclidean (L2) distance to another embedding.
    ///
    /// Returns `f32::MAX` on dimension mismatch so mismatched records sort
    /// last in nearest-neighbor results.
    #[must_use]
    pub fn l2_distance(&self, other: &Self) -> f32 {
        if self.0.len() != other.0.len() {
            return f32::MAX;
        }
        self.0
            .iter()
            .zip(other.0.iter())
            .map(|(a, b)| {
                let d = a - b;
                d * d
            })
            .sum::<f32>()
            .sqrt()
    }

    /// Return an L2-normalized copy. A zero vector is returned unchanged.
    #[must_use]
    pub fn normalized(&self) -> Self {
        let mag: f32 = self.0.iter().map(|x| x * x).sum::<f32>().sqrt();
        if mag < f32::EPSILON {
            return self.clone();
        }
        Self(self.0.iter().map(|x| x / mag).collect())
    }
}

// ---------------------------------------------------------------------------
// Search Results
// ---------------------------------------------------------------------------

/// A memory returned from semantic search with its relevance score.
///
/// Produced only by search; never persisted.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SimilarMemory {
    /// The matching memory, reconstructed from vector-store metadata.
    pub memory: MemoryEntry,
    /// Normalized similarity in `[0.0, 1.0]`; 1.0 means identical.
    pub similarity_score: f32,
}

// ---------------------------------------------------------------------------
// Tier Location
// ---------------------------------------------------------------------------

/// Which storage tier currently holds a memory.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MemoryLocation {
    /// Bounded FIFO working memory.
    Recent,
    /// Durable staging buffer awaiting batch embedding.
    Buffer,
    /// Embedded, semantically searchable vector index.
    LongTerm,
}

impl fmt::Display for MemoryLocation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Recent => write!(f, "recent"),
            Self::Buffer => write!(f, "buffer"),
            Self::LongTerm => write!(f, "longterm"),
        }
    }
}

/// A memory tagged with its current storage tier, for export and admin use.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LocatedMemory {
    /// The memory itself.
    pub entry: MemoryEntry,
    /// The tier it was found in.
    pub location: MemoryLocation,
}

// ---------------------------------------------------------------------------
// Operation Outcomes
// ---------------------------------------------------------------------------

/// Result of adding a new memory through the manager.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AddMemoryOutcome {
    /// Id assigned to the newly created memory.
    pub memory_id: MemoryId,
    /// Where the new memory landed (always the recent tier).
    pub stored_in: MemoryLocation,
    /// Whether this add displaced the oldest recent memory into the buffer.
    pub evicted_to_buffer: bool,
    /// Whether that displacement pushed the buffer over its threshold and
    /// triggered a flush into the vector index.
    pub buffer_auto_embedded: bool,
}

/// Combined memory context for prompt construction.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MemoryContext {
    /// Verbatim recent memories, oldest first.
    pub recent: Vec<MemoryEntry>,
    /// Semantically relevant long-term memories; empty without a query.
    pub relevant: Vec<SimilarMemory>,
    /// Number of recent memories.
    pub recent_count: usize,
    /// Number of relevant memories.
    pub relevant_count: usize,
}

/// Per-owner memory statistics across all three tiers.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OwnerMemoryStats {
    /// The owner these statistics describe.
    pub owner_id: OwnerId,
    /// Memories in the recent FIFO queue (at most the queue capacity).
    pub recent_count: usize,
    /// Memories staged in the buffer, pending embedding.
    pub buffer_count: usize,
    /// Memories in the vector index.
    pub longterm_count: usize,
    /// Sum of the three tier counts.
    pub total_count: usize,
    /// Timestamp of the newest recent-tier memory; `None` when the recent
    /// queue is empty (buffer and index timestamps are not consulted).
    pub last_memory_at: Option<DateTime<Utc>>,
}

/// Counts removed by a full owner clear.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClearReport {
    /// Recent-tier count after clearing — always 0, reported for symmetry.
    pub recent: usize,
    /// Memories removed from the buffer.
    pub buffer: usize,
    /// Memories removed from the vector index.
    pub longterm: usize,
    /// Total removed from durable storage (buffer + longterm).
    pub total: usize,
}

/// One item of a bulk import request.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ImportItem {
    /// Memory text; validated per item.
    pub content: String,
    /// Optional metadata for the item.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub metadata: Option<Metadata>,
}

/// Outcome of a bulk import; partial success is allowed.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ImportReport {
    /// Items successfully added.
    pub imported: usize,
    /// Items rejected.
    pub failed: usize,
    /// One message per rejected item, prefixed with its index.
    pub errors: Vec<String>,
}

/// System-wide statistics aggregated over every known owner.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SystemStats {
    /// Number of owners with any memory in any tier.
    pub total_owners: usize,
    /// Total memories across all owners and tiers.
    pub total_memories: usize,
    /// Total recent-tier memories.
    pub total_recent: usize,
    /// Total buffered memories.
    pub total_buffer: usize,
    /// Total vector-indexed memories.
    pub total_longterm: usize,
    /// Per-owner breakdown.
    pub owners: Vec<OwnerMemoryStats>,
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
