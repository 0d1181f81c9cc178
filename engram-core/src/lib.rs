//! # ENGRAM Core Library
//!
//! Tiered conversational memory for game characters.
//!
//! Every character (owner) gets three memory tiers modeled on human memory
//! consolidation:
//!
//! - **Recent** — bounded FIFO working memory, returned verbatim
//! - **Buffer** — durable staging for evicted memories awaiting embedding
//! - **Long-term** — vector-indexed memories retrieved by semantic search
//!
//! New memories enter the recent queue; overflow cascades into the buffer,
//! and full buffers are embedded in one batch into the vector index.  The
//! [`MemoryManager`] orchestrates the cascade; [`MemoryEngine`] assembles
//! the tiers from an [`EngramConfig`] and an [`Embedder`].
//!
//! ## Lifecycle at a glance
//!
//! ```text
//! add ──▶ recent (FIFO, cap 5) ──evict──▶ buffer (cap 10) ──flush──▶ vector index
//! ```

#![deny(clippy::unwrap_used)]
#![deny(missing_docs)]
#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]

pub mod buffer;
pub mod config;
pub mod embedding;
pub mod engine;
pub mod error;
pub mod longterm;
pub mod manager;
pub mod recent;
pub mod types;
pub mod vector_store;

pub use config::EngramConfig;
pub use embedding::{Embedder, EmbeddingModel};
pub use engine::MemoryEngine;
pub use error::{EngramError, Result};
pub use manager::MemoryManager;
pub use types::*;
