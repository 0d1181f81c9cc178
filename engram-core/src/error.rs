//! Error types for the ENGRAM core library.

use thiserror::Error;

/// Top-level error type for all ENGRAM operations.
#[derive(Error, Debug)]
pub enum EngramError {
    /// Memory content failed validation at the manager boundary.
    #[error("Invalid content: {reason} (length: {length})")]
    InvalidContent {
        /// Why the content was rejected.
        reason: String,
        /// Character count of the rejected content.
        length: usize,
    },

    /// A memory with the given ID was not found in any tier.
    #[error("Memory not found: {0}")]
    MemoryNotFound(crate::MemoryId),

    /// The embedding model could not be loaded.
    #[error("Embedding model unavailable: {0}")]
    ModelUnavailable(String),

    /// The embedding model failed to produce a vector.
    #[error("Embedding failed: {0}")]
    Embedding(String),

    /// Vector-store (SQLite) error.
    #[error("Vector store error: {0}")]
    Database(#[from] rusqlite::Error),

    /// Serialization or deserialization failure.
    #[error("Serialization error: {0}")]
    Serialization(String),

    /// Configuration error.
    #[error("Configuration error: {0}")]
    Config(String),

    /// Generic I/O error (snapshot or buffer files).
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Convenience Result type alias.
pub type Result<T> = std::result::Result<T, EngramError>;
