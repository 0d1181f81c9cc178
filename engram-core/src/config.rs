//! Configuration for the ENGRAM memory engine.
//!
//! Maps directly to `engram.toml`; every field has a serde default so a
//! missing section or file yields the stock tier sizes (recent 5, buffer 10).

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Top-level ENGRAM configuration, loadable from TOML.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct EngramConfig {
    /// Tier capacities and content validation bounds.
    #[serde(default)]
    pub memory: MemoryTierConfig,
    /// Semantic retrieval settings.
    #[serde(default)]
    pub retrieval: RetrievalConfig,
    /// On-disk layout for snapshots, buffers, and the vector store.
    #[serde(default)]
    pub persistence: PersistenceConfig,
}

impl EngramConfig {
    /// Load configuration from a TOML string.
    ///
    /// # Errors
    /// Returns `EngramError::Config` if the TOML is invalid.
    pub fn from_toml(toml_str: &str) -> crate::error::Result<Self> {
        toml::from_str(toml_str).map_err(|e| crate::EngramError::Config(e.to_string()))
    }

    /// Load configuration from a TOML file.
    ///
    /// # Errors
    /// Returns an error if the file cannot be read or parsed.
    pub fn from_file(path: &Path) -> crate::error::Result<Self> {
        let content = std::fs::read_to_string(path)?;
        Self::from_toml(&content)
    }
}

// ---------------------------------------------------------------------------
// Sub-configs
// ---------------------------------------------------------------------------

/// Tier capacity and validation configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MemoryTierConfig {
    /// FIFO working-memory capacity per owner.  Minimum 1; a configured 0
    /// is treated as 1.
    #[serde(default = "default_recent_capacity")]
    pub recent_capacity: usize,
    /// Buffered memories that trigger an automatic flush into the index.
    #[serde(default = "default_buffer_threshold")]
    pub buffer_threshold: usize,
    /// Maximum memory content length in characters.  Content must also
    /// contain at least one non-whitespace character; blank strings are
    /// rejected regardless of length.
    #[serde(default = "default_max_content_chars")]
    pub max_content_chars: usize,
}

impl Default for MemoryTierConfig {
    fn default() -> Self {
        Self {
            recent_capacity: 5,
            buffer_threshold: 10,
            max_content_chars: 10_000,
        }
    }
}

/// Semantic retrieval settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetrievalConfig {
    /// Default number of relevant memories returned per context query.
    #[serde(default = "default_top_k")]
    pub top_k: usize,
    /// Embedding model name.
    #[serde(default = "default_embedding_model")]
    pub embedding_model: String,
    /// Embedding vector dimensions.
    #[serde(default = "default_dimensions")]
    pub embedding_dimensions: usize,
}

impl Default for RetrievalConfig {
    fn default() -> Self {
        Self {
            top_k: 3,
            embedding_model: "all-MiniLM-L6-v2".to_string(),
            embedding_dimensions: 384,
        }
    }
}

/// On-disk layout configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PersistenceConfig {
    /// Root directory for all engine state.
    #[serde(default = "default_data_dir")]
    pub data_dir: PathBuf,
    /// File name (under `data_dir`) of the recent-tier snapshot.
    #[serde(default = "default_snapshot_file")]
    pub snapshot_file: String,
    /// Subdirectory (under `data_dir`) holding per-owner buffer files.
    #[serde(default = "default_buffer_dir")]
    pub buffer_dir: String,
    /// File name (under `data_dir`) of the SQLite vector store.
    #[serde(default = "default_vector_db_file")]
    pub vector_db_file: String,
    /// Whether to open the vector store in WAL mode.
    #[serde(default = "default_true")]
    pub wal_mode: bool,
}

impl Default for PersistenceConfig {
    fn default() -> Self {
        Self {
            data_dir: PathBuf::from("./data"),
            snapshot_file: "recent_memories.json".to_string(),
            buffer_dir: "buffers".to_string(),
            vector_db_file: "vector_store.db".to_string(),
            wal_mode: true,
        }
    }
}

impl PersistenceConfig {
    /// Full path of the recent-tier snapshot file.
    #[must_use]
    pub fn snapshot_path(&self) -> PathBuf {
        self.data_dir.join(&self.snapshot_file)
    }

    /// Full path of the per-owner buffer directory.
    #[must_use]
    pub fn buffer_path(&self) -> PathBuf {
        self.data_dir.join(&self.buffer_dir)
    }

    /// Full path of the SQLite vector store.
    #[must_use]
    pub fn vector_db_path(&self) -> PathBuf {
        self.data_dir.join(&self.vector_db_file)
    }
}

// ---------------------------------------------------------------------------
// Serde default helpers
// ---------------------------------------------------------------------------

fn default_recent_capacity() -> usize {
    5
}

fn default_buffer_threshold() -> usize {
    10
}

fn default_max_content_chars() -> usize {
    10_000
}

fn default_top_k() -> usize {
    3
}

fn default_embedding_model() -> String {
    "all-MiniLM-L6-v2".to_string()
}

fn default_dimensions() -> usize {
    384
}

fn default_data_dir() -> PathBuf {
    PathBuf::from("./data")
}

fn default_snapshot_file() -> String {
    "recent_memories.json".to_string()
}

fn default_buffer_dir() -> String {
    "buffers".to_string()
}

fn default_vector_db_file() -> String {
    "vector_store.db".to_string()
}

fn default_true() -> bool {
    true
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
