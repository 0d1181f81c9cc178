//! Engine assembly — wires configuration, embedding, and the three tiers
//! into one ready-to-use [`MemoryEngine`].
//!
//! The engine owns startup and shutdown: on construction it opens the
//! vector store and buffer directory from the configured data layout and
//! restores the recent-tier snapshot; [`persist`](MemoryEngine::persist)
//! writes the snapshot back out so recent memories survive a restart.

use std::sync::Arc;

use tracing::info;

use crate::buffer::BufferStore;
use crate::config::EngramConfig;
use crate::embedding::Embedder;
use crate::error::Result;
use crate::longterm::LongTermMemory;
use crate::manager::MemoryManager;
use crate::recent::RecentMemory;
use crate::vector_store::{SqliteVectorStore, VectorStore};

/// A fully assembled tiered memory engine.
#[derive(Debug)]
pub struct MemoryEngine {
    config: EngramConfig,
    manager: MemoryManager,
    embedder: Arc<Embedder>,
}

impl MemoryEngine {
    /// Open the engine with the configured on-disk layout.
    ///
    /// Creates the data directory, opens the SQLite vector store and the
    /// buffer directory, and restores the recent-tier snapshot if present.
    ///
    /// # Errors
    ///
    /// Returns an I/O or storage error if the data layout cannot be opened.
    pub fn new(config: EngramConfig, embedder: Arc<Embedder>) -> Result<Self> {
        std::fs::create_dir_all(&config.persistence.data_dir)?;
        let store = Arc::new(SqliteVectorStore::open(
            config.persistence.vector_db_path(),
            config.persistence.wal_mode,
        )?);
        Self::with_store(config, embedder, store)
    }

    /// Open the engine over a caller-supplied vector store.
    ///
    /// Used by tests (in-memory store) and by deployments with their own
    /// [`VectorStore`] backend.
    ///
    /// # Errors
    ///
    /// Returns an I/O error if the buffer directory cannot be created.
    pub fn with_store(
        config: EngramConfig,
        embedder: Arc<Embedder>,
        store: Arc<dyn VectorStore>,
    ) -> Result<Self> {
        let recent = RecentMemory::new(config.memory.recent_capacity);
        recent.load_snapshot(&config.persistence.snapshot_path());

        let buffer = BufferStore::new(config.persistence.buffer_path())?;
        let longterm = LongTermMemory::new(store, Arc::clone(&embedder));

        let manager = MemoryManager::new(
            recent,
            buffer,
            longterm,
            config.memory.buffer_threshold,
            config.memory.max_content_chars,
            config.retrieval.top_k,
        );

        info!(
            data_dir = %config.persistence.data_dir.display(),
            recent_capacity = config.memory.recent_capacity,
            buffer_threshold = config.memory.buffer_threshold,
            "Memory engine ready"
        );

        Ok(Self {
            config,
            manager,
            embedder,
        })
    }

    /// The memory manager; all lifecycle and admin operations live here.
    #[must_use]
    pub fn manager(&self) -> &MemoryManager {
        &self.manager
    }

    /// The shared embedding service, for warmup and lifecycle control.
    #[must_use]
    pub fn embedder(&self) -> &Embedder {
        &self.embedder
    }

    /// The configuration the engine was built with.
    #[must_use]
    pub fn config(&self) -> &EngramConfig {
        &self.config
    }

    /// Write the recent-tier snapshot so working memory survives a restart.
    ///
    /// Buffer files and the vector store are already durable; only the
    /// recent tier needs an explicit save.
    ///
    /// # Errors
    ///
    /// Returns an I/O error if the snapshot cannot be written.
    pub fn persist(&self) -> Result<()> {
        self.manager
            .recent()
            .save_snapshot(&self.config.persistence.snapshot_path())
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
