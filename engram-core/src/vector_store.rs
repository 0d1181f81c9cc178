//! Vector store — per-owner named collections of embedded memories.
//!
//! [`VectorStore`] is the trait boundary to the external vector database;
//! the engine only ever talks to this interface.  [`SqliteVectorStore`] is
//! the in-process default: one SQLite table holding (collection, id,
//! embedding, metadata, document) rows, queried with an exact L2 scan.
//!
//! ```sql
//! CREATE TABLE IF NOT EXISTS vector_records (
//!     collection TEXT NOT NULL,
//!     id         TEXT NOT NULL,
//!     embedding  BLOB NOT NULL,
//!     metadata   TEXT NOT NULL,
//!     document   TEXT NOT NULL,
//!     created_at TEXT NOT NULL,
//!     PRIMARY KEY (collection, id)
//! );
//! ```
//!
//! Embedding vectors are stored as `bincode`-encoded `Vec<f32>` BLOBs;
//! metadata is a JSON TEXT column so the schema stays stable as metadata
//! fields evolve.

use std::path::{Path, PathBuf};

use chrono::Utc;
use ordered_float::OrderedFloat;
use parking_lot::Mutex;
use rusqlite::{Connection, OpenFlags, params};
use tracing::{debug, info};

use crate::error::{EngramError, Result};
use crate::types::{Embedding, MemoryId};

// ---------------------------------------------------------------------------
// Records
// ---------------------------------------------------------------------------

/// One embedded memory as stored in a collection.
#[derive(Debug, Clone)]
pub struct VectorRecord {
    /// Memory id; unique within a collection.
    pub id: MemoryId,
    /// The embedding vector.
    pub embedding: Embedding,
    /// JSON metadata (owner id, original timestamp, raw content).
    pub metadata: serde_json::Value,
    /// Raw document text.
    pub document: String,
}

/// One nearest-neighbor match from a query.
#[derive(Debug, Clone)]
pub struct QueryMatch {
    /// Memory id of the match.
    pub id: MemoryId,
    /// Stored metadata for reconstruction.
    pub metadata: serde_json::Value,
    /// L2 distance to the query vector (smaller is nearer).
    pub distance: f32,
}

// ---------------------------------------------------------------------------
// Trait
// ---------------------------------------------------------------------------

/// A persistent collection-keyed vector database.
///
/// Collections are created implicitly on first `add`; operations on an
/// unknown collection behave as if it were empty rather than erroring.
pub trait VectorStore: Send + Sync {
    /// Upsert a batch of records into a collection in one call.
    ///
    /// # Errors
    /// Returns [`EngramError::Database`] on storage failure; no records are
    /// committed in that case.
    fn add(&self, collection: &str, records: Vec<VectorRecord>) -> Result<()>;

    /// Return up to `k` nearest neighbors, ascending by distance.
    ///
    /// # Errors
    /// Returns [`EngramError::Database`] on storage failure.
    fn query(&self, collection: &str, query: &Embedding, k: usize) -> Result<Vec<QueryMatch>>;

    /// Fetch records by id, or every record in the collection when `ids`
    /// is `None`.  Missing ids are silently skipped.
    ///
    /// # Errors
    /// Returns [`EngramError::Database`] on storage failure.
    fn get(&self, collection: &str, ids: Option<&[MemoryId]>) -> Result<Vec<VectorRecord>>;

    /// Replace an existing record.  Returns `false` if the id is absent.
    ///
    /// # Errors
    /// Returns [`EngramError::Database`] on storage failure.
    fn update(&self, collection: &str, record: VectorRecord) -> Result<bool>;

    /// Delete records by id; returns how many were actually removed.
    ///
    /// # Errors
    /// Returns [`EngramError::Database`] on storage failure.
    fn delete(&self, collection: &str, ids: &[MemoryId]) -> Result<usize>;

    /// Number of records in the collection (0 for unknown collections).
    ///
    /// # Errors
    /// Returns [`EngramError::Database`] on storage failure.
    fn count(&self, collection: &str) -> Result<usize>;

    /// Drop an entire collection; returns how many records it held.
    ///
    /// # Errors
    /// Returns [`EngramError::Database`] on storage failure.
    fn delete_collection(&self, collection: &str) -> Result<usize>;

    /// Names of all non-empty collections.
    ///
    /// # Errors
    /// Returns [`EngramError::Database`] on storage failure.
    fn list_collections(&self) -> Result<Vec<String>>;
}

// ---------------------------------------------------------------------------
// SqliteVectorStore
// ---------------------------------------------------------------------------

/// SQLite-backed [`VectorStore`] implementation.
pub struct SqliteVectorStore {
    conn: Mutex<Connection>,
    db_path: PathBuf,
}

impl std::fmt::Debug for SqliteVectorStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SqliteVectorStore")
            .field("db_path", &self.db_path)
            .finish_non_exhaustive()
    }
}

const SCHEMA: &str = "CREATE TABLE IF NOT EXISTS vector_records (
    collection TEXT NOT NULL,
    id         TEXT NOT NULL,
    embedding  BLOB NOT NULL,
    metadata   TEXT NOT NULL,
    document   TEXT NOT NULL,
    created_at TEXT NOT NULL,
    PRIMARY KEY (collection, id)
);
CREATE INDEX IF NOT EXISTS idx_vector_records_collection
    ON vector_records (collection);";

impl SqliteVectorStore {
    /// Open (or create) the vector store at `path`.
    ///
    /// The schema is created automatically; WAL mode is enabled when
    /// `wal_mode` is true.
    ///
    /// # Errors
    ///
    /// Returns [`EngramError::Database`] on SQLite failures.
    pub fn open<P: AsRef<Path>>(path: P, wal_mode: bool) -> Result<Self> {
        let db_path = path.as_ref().to_path_buf();
        if let Some(parent) = db_path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let flags = OpenFlags::SQLITE_OPEN_READ_WRITE
            | OpenFlags::SQLITE_OPEN_CREATE
            | OpenFlags::SQLITE_OPEN_NO_MUTEX;
        let conn = Connection::open_with_flags(&db_path, flags)?;

        if wal_mode {
            conn.execute_batch("PRAGMA journal_mode = WAL;")?;
        }
        conn.execute_batch("PRAGMA synchronous = NORMAL;")?;
        conn.execute_batch("PRAGMA busy_timeout = 5000;")?;
        conn.execute_batch(SCHEMA)?;

        info!(path = %db_path.display(), wal = wal_mode, "Vector store opened");

        Ok(Self {
            conn: Mutex::new(conn),
            db_path,
        })
    }

    /// Open an in-memory store (useful for tests).
    ///
    /// # Errors
    ///
    /// Returns [`EngramError::Database`] on SQLite failures.
    pub fn open_in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory()?;
        conn.execute_batch(SCHEMA)?;
        Ok(Self {
            conn: Mutex::new(conn),
            db_path: PathBuf::from(":memory:"),
        })
    }

    /// Path of the backing database file (`:memory:` for in-memory stores).
    #[must_use]
    pub fn db_path(&self) -> &Path {
        &self.db_path
    }
}

fn encode_vector(embedding: &Embedding) -> Result<Vec<u8>> {
    bincode::serialize(&embedding.0).map_err(|e| EngramError::Serialization(e.to_string()))
}

fn decode_vector(blob: &[u8]) -> Result<Embedding> {
    let raw: Vec<f32> =
        bincode::deserialize(blob).map_err(|e| EngramError::Serialization(e.to_string()))?;
    Ok(Embedding(raw))
}

fn decode_metadata(text: &str) -> Result<serde_json::Value> {
    serde_json::from_str(text).map_err(|e| EngramError::Serialization(e.to_string()))
}

impl VectorStore for SqliteVectorStore {
    fn add(&self, collection: &str, records: Vec<VectorRecord>) -> Result<()> {
        let count = records.len();
        let now = Utc::now().to_rfc3339();

        let mut conn = self.conn.lock();
        let tx = conn.transaction()?;
        {
            let mut stmt = tx.prepare_cached(
                "INSERT OR REPLACE INTO vector_records
                     (collection, id, embedding, metadata, document, created_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
            )?;
            for record in records {
                let blob = encode_vector(&record.embedding)?;
                let metadata = record.metadata.to_string();
                stmt.execute(params![
                    collection,
                    record.id.0,
                    blob,
                    metadata,
                    record.document,
                    now
                ])?;
            }
        }
        tx.commit()?;

        debug!(collection, count, "Upserted vector records");
        Ok(())
    }

    fn query(&self, collection: &str, query: &Embedding, k: usize) -> Result<Vec<QueryMatch>> {
        let conn = self.conn.lock();
        let mut stmt = conn.prepare_cached(
            "SELECT id, embedding, metadata FROM vector_records WHERE collection = ?1",
        )?;
        let rows = stmt.query_map(params![collection], |row| {
            let id: String = row.get(0)?;
            let blob: Vec<u8> = row.get(1)?;
            let metadata: String = row.get(2)?;
            Ok((id, blob, metadata))
        })?;

        let mut matches = Vec::new();
        for row in rows {
            let (id, blob, metadata) = row?;
            let embedding = decode_vector(&blob)?;
            matches.push(QueryMatch {
                id: MemoryId(id),
                metadata: decode_metadata(&metadata)?,
                distance: query.l2_distance(&embedding),
            });
        }

        matches.sort_by_key(|m| OrderedFloat(m.distance));
        matches.truncate(k);
        Ok(matches)
    }

    fn get(&self, collection: &str, ids: Option<&[MemoryId]>) -> Result<Vec<VectorRecord>> {
        let conn = self.conn.lock();
        let mut records = Vec::new();

        let mut push_row = |id: String, blob: Vec<u8>, metadata: String, document: String| {
            let embedding = decode_vector(&blob)?;
            records.push(VectorRecord {
                id: MemoryId(id),
                embedding,
                metadata: decode_metadata(&metadata)?,
                document,
            });
            Ok::<(), EngramError>(())
        };

        match ids {
            None => {
                let mut stmt = conn.prepare_cached(
                    "SELECT id, embedding, metadata, document
                     FROM vector_records WHERE collection = ?1",
                )?;
                let rows = stmt.query_map(params![collection], |row| {
                    Ok((row.get(0)?, row.get(1)?, row.get(2)?, row.get(3)?))
                })?;
                for row in rows {
                    let (id, blob, metadata, document) = row?;
                    push_row(id, blob, metadata, document)?;
                }
            }
            Some(ids) => {
                let mut stmt = conn.prepare_cached(
                    "SELECT id, embedding, metadata, document
                     FROM vector_records WHERE collection = ?1 AND id = ?2",
                )?;
                for wanted in ids {
                    let mut rows = stmt.query_map(params![collection, wanted.0], |row| {
                        Ok((row.get(0)?, row.get(1)?, row.get(2)?, row.get(3)?))
                    })?;
                    if let Some(row) = rows.next() {
                        let (id, blob, metadata, document) = row?;
                        push_row(id, blob, metadata, document)?;
                    }
                }
            }
        }

        Ok(records)
    }

    fn update(&self, collection: &str, record: VectorRecord) -> Result<bool> {
        let blob = encode_vector(&record.embedding)?;
        let metadata = record.metadata.to_string();
        let now = Utc::now().to_rfc3339();

        let conn = self.conn.lock();
        let changed = conn.execute(
            "UPDATE vector_records
             SET embedding = ?3, metadata = ?4, document = ?5, created_at = ?6
             WHERE collection = ?1 AND id = ?2",
            params![collection, record.id.0, blob, metadata, record.document, now],
        )?;
        Ok(changed > 0)
    }

    fn delete(&self, collection: &str, ids: &[MemoryId]) -> Result<usize> {
        let conn = self.conn.lock();
        let mut deleted = 0;
        for id in ids {
            deleted += conn.execute(
                "DELETE FROM vector_records WHERE collection = ?1 AND id = ?2",
                params![collection, id.0],
            )?;
        }
        Ok(deleted)
    }

    fn count(&self, collection: &str) -> Result<usize> {
        let conn = self.conn.lock();
        let count: i64 = conn.query_row(
            "SELECT COUNT(*) FROM vector_records WHERE collection = ?1",
            params![collection],
            |row| row.get(0),
        )?;
        Ok(usize::try_from(count).unwrap_or(0))
    }

    fn delete_collection(&self, collection: &str) -> Result<usize> {
        let conn = self.conn.lock();
        let deleted = conn.execute(
            "DELETE FROM vector_records WHERE collection = ?1",
            params![collection],
        )?;
        if deleted > 0 {
            info!(collection, deleted, "Dropped vector collection");
        }
        Ok(deleted)
    }

    fn list_collections(&self) -> Result<Vec<String>> {
        let conn = self.conn.lock();
        let mut stmt = conn.prepare_cached("SELECT DISTINCT collection FROM vector_records")?;
        let rows = stmt.query_map([], |row| row.get::<_, String>(0))?;
        let mut collections = Vec::new();
        for row in rows {
            collections.push(row?);
        }
        Ok(collections)
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
