//! Vector embedding layer.
//!
//! [`EmbeddingModel`] is the trait boundary to the underlying text-embedding
//! model; [`Embedder`] wraps a model behind a lazy, process-wide load guard
//! so every tier shares one loaded instance.
//!
//! The production implementation uses ONNX Runtime (via `fastembed`) with
//! `all-MiniLM-L6-v2` behind the `onnx` cargo feature.  Deterministic and
//! random in-process models are provided for tests and development.

use std::sync::Arc;

use parking_lot::RwLock;
use tracing::{debug, info, warn};

use crate::error::{EngramError, Result};
use crate::types::Embedding;

// ---------------------------------------------------------------------------
// Trait
// ---------------------------------------------------------------------------

/// Generate vector embeddings from text.
///
/// Implementations must be `Send + Sync`; the model is read-only during
/// inference, so no locking is required around `embed_batch` itself.
pub trait EmbeddingModel: Send + Sync {
    /// Embed a batch of texts in a single call.
    ///
    /// Returns one L2-normalized vector of [`dimensions`](Self::dimensions)
    /// floats per input, in input order.
    ///
    /// # Errors
    ///
    /// Returns [`EngramError::Embedding`] if the model fails to produce an
    /// embedding for any input.
    fn embed_batch(&self, texts: &[&str]) -> Result<Vec<Embedding>>;

    /// The dimensionality of embeddings produced by this model.
    fn dimensions(&self) -> usize;

    /// A human-readable model name (e.g. `"all-MiniLM-L6-v2"`).
    fn model_name(&self) -> &str;
}

/// Factory that loads an [`EmbeddingModel`] on first use.
pub type ModelLoader = Box<dyn Fn() -> Result<Arc<dyn EmbeddingModel>> + Send + Sync>;

// ---------------------------------------------------------------------------
// Embedder — shared lazily-loaded model handle
// ---------------------------------------------------------------------------

/// Shared embedding service with explicit lifecycle control.
///
/// The model is loaded lazily on the first `embed` call (or eagerly via
/// [`warmup`](Self::warmup)).  Loading is guarded by a write lock with a
/// double check, so concurrent first callers block until one load completes
/// rather than loading twice.  Once loaded, `embed` calls proceed under a
/// read lock and may run concurrently.
///
/// Constructed explicitly and passed to the tiers that need it; there is no
/// hidden global instance.
pub struct Embedder {
    loader: ModelLoader,
    model: RwLock<Option<Arc<dyn EmbeddingModel>>>,
}

impl std::fmt::Debug for Embedder {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Embedder")
            .field("loaded", &self.is_loaded())
            .finish_non_exhaustive()
    }
}

impl Embedder {
    /// Create an embedder that loads its model on first use.
    #[must_use]
    pub fn new(loader: ModelLoader) -> Self {
        Self {
            loader,
            model: RwLock::new(None),
        }
    }

    /// Create an embedder over an already-constructed model.
    ///
    /// The model counts as loaded immediately; [`unload`](Self::unload)
    /// followed by `embed` re-obtains it from the original instance.
    #[must_use]
    pub fn with_model(model: Arc<dyn EmbeddingModel>) -> Self {
        let for_loader = Arc::clone(&model);
        Self {
            loader: Box::new(move || Ok(Arc::clone(&for_loader))),
            model: RwLock::new(Some(model)),
        }
    }

    /// Obtain the loaded model, loading it if necessary.
    fn model(&self) -> Result<Arc<dyn EmbeddingModel>> {
        if let Some(model) = self.model.read().as_ref() {
            return Ok(Arc::clone(model));
        }

        let mut slot = self.model.write();
        // Double-check: another caller may have finished loading while we
        // waited for the write lock.
        if let Some(model) = slot.as_ref() {
            return Ok(Arc::clone(model));
        }

        let model = (self.loader)()?;
        info!(
            model = model.model_name(),
            dims = model.dimensions(),
            "Embedding model loaded"
        );
        *slot = Some(Arc::clone(&model));
        Ok(model)
    }

    /// Embed a single text.
    ///
    /// # Errors
    ///
    /// Returns [`EngramError::ModelUnavailable`] if the model cannot be
    /// loaded, or [`EngramError::Embedding`] on inference failure.
    pub fn embed(&self, text: &str) -> Result<Embedding> {
        let mut vectors = self.embed_batch(&[text])?;
        vectors
            .pop()
            .ok_or_else(|| EngramError::Embedding("model returned no vectors".to_string()))
    }

    /// Embed a batch of texts in one model call.
    ///
    /// # Errors
    ///
    /// Same failure modes as [`embed`](Self::embed); additionally fails if
    /// the model returns a vector count different from the input count.
    pub fn embed_batch(&self, texts: &[&str]) -> Result<Vec<Embedding>> {
        let model = self.model()?;
        let vectors = model.embed_batch(texts)?;
        if vectors.len() != texts.len() {
            return Err(EngramError::Embedding(format!(
                "model returned {} vectors for {} inputs",
                vectors.len(),
                texts.len()
            )));
        }
        Ok(vectors)
    }

    /// Force the model to load and run a one-word self-test.
    ///
    /// # Errors
    ///
    /// Returns [`EngramError::ModelUnavailable`] on load failure, or
    /// [`EngramError::Embedding`] if the self-test output has the wrong
    /// dimensionality.
    pub fn warmup(&self) -> Result<()> {
        debug!("Warming up embedding service");
        let model = self.model()?;
        let vectors = model.embed_batch(&["ready"])?;
        let dims = vectors.first().map_or(0, Embedding::dimensions);
        if dims != model.dimensions() {
            return Err(EngramError::Embedding(format!(
                "self-test produced {dims}-dim vector, expected {}",
                model.dimensions()
            )));
        }
        info!(model = model.model_name(), "Embedding service warmed up");
        Ok(())
    }

    /// Whether the model is currently loaded. No side effects.
    #[must_use]
    pub fn is_loaded(&self) -> bool {
        self.model.read().is_some()
    }

    /// Drop the loaded model, freeing its memory.
    ///
    /// Safe to call when already unloaded (no-op).  The model is reloaded on
    /// the next `embed` call.
    pub fn unload(&self) {
        let mut slot = self.model.write();
        if slot.take().is_some() {
            info!("Embedding model unloaded");
        } else {
            warn!("Embedding model not loaded, nothing to unload");
        }
    }
}

// ---------------------------------------------------------------------------
// Hashed model — deterministic, for tests & development
// ---------------------------------------------------------------------------

/// Deterministic embedding model that hashes tokens into vector buckets.
///
/// Texts sharing tokens land near each other, so distance ordering is
/// meaningful in tests without loading a real model.  Output is
/// L2-normalized like the production model.
pub struct HashedEmbeddingModel {
    dims: usize,
}

impl HashedEmbeddingModel {
    /// Create a hashed model with the given dimensionality.
    #[must_use]
    pub fn new(dimensions: usize) -> Self {
        Self { dims: dimensions }
    }

    fn embed_one(&self, text: &str) -> Result<Embedding> {
        let mut raw = vec![0.0_f32; self.dims];
        let mut tokens = 0usize;
        for token in text.split_whitespace() {
            let h = fnv1a(token.to_lowercase().as_bytes());
            let bucket = (h % self.dims as u64) as usize;
            // Secondary hash bit decides the sign so buckets can cancel.
            let sign = if (h >> 32) & 1 == 0 { 1.0 } else { -1.0 };
            raw[bucket] += sign;
            tokens += 1;
        }
        if tokens == 0 {
            return Err(EngramError::Embedding(
                "cannot embed text with no tokens".to_string(),
            ));
        }
        Ok(Embedding(raw).normalized())
    }
}

impl Default for HashedEmbeddingModel {
    fn default() -> Self {
        Self::new(384)
    }
}

impl EmbeddingModel for HashedEmbeddingModel {
    fn embed_batch(&self, texts: &[&str]) -> Result<Vec<Embedding>> {
        texts.iter().map(|t| self.embed_one(t)).collect()
    }

    fn dimensions(&self) -> usize {
        self.dims
    }

    fn model_name(&self) -> &str {
        "hashed-token-buckets"
    }
}

/// FNV-1a hash over a byte slice.
fn fnv1a(data: &[u8]) -> u64 {
    const OFFSET: u64 = 0xcbf2_9ce4_8422_2325;
    const PRIME: u64 = 0x0000_0100_0000_01b3;
    let mut hash = OFFSET;
    for &byte in data {
        hash ^= u64::from(byte);
        hash = hash.wrapping_mul(PRIME);
    }
    hash
}

// ---------------------------------------------------------------------------
// Random model — non-deterministic unit vectors, for integration testing
// ---------------------------------------------------------------------------

/// Embedding model that returns random unit-length vectors.
///
/// Useful for tests that need diverse, non-zero embeddings where distance
/// ordering does not matter.
pub struct RandomEmbeddingModel {
    dims: usize,
}

impl RandomEmbeddingModel {
    /// Create a random model with the given dimensionality.
    #[must_use]
    pub fn new(dimensions: usize) -> Self {
        Self { dims: dimensions }
    }
}

impl EmbeddingModel for RandomEmbeddingModel {
    fn embed_batch(&self, texts: &[&str]) -> Result<Vec<Embedding>> {
        use rand::Rng;
        let mut rng = rand::thread_rng();
        Ok(texts
            .iter()
            .map(|_| {
                let raw: Vec<f32> = (0..self.dims).map(|_| rng.gen_range(-1.0..1.0)).collect();
                Embedding(raw).normalized()
            })
            .collect())
    }

    fn dimensions(&self) -> usize {
        self.dims
    }

    fn model_name(&self) -> &str {
        "random-unit-vector"
    }
}

// ---------------------------------------------------------------------------
// Failing model — failure injection for flush-atomicity tests
// ---------------------------------------------------------------------------

/// Embedding model that always fails.  For failure-injection tests only.
pub struct FailingEmbeddingModel;

impl EmbeddingModel for FailingEmbeddingModel {
    fn embed_batch(&self, _texts: &[&str]) -> Result<Vec<Embedding>> {
        Err(EngramError::Embedding("injected failure".to_string()))
    }

    fn dimensions(&self) -> usize {
        0
    }

    fn model_name(&self) -> &str {
        "always-fails"
    }
}

// ---------------------------------------------------------------------------
// ONNX model (feature: onnx)
// ---------------------------------------------------------------------------

/// Production embedding model backed by ONNX Runtime via `fastembed`.
#[cfg(feature = "onnx")]
pub struct OnnxEmbeddingModel {
    model: fastembed::TextEmbedding,
    dims: usize,
    name: String,
}

#[cfg(feature = "onnx")]
impl OnnxEmbeddingModel {
    /// Load `all-MiniLM-L6-v2` (~80 MB, downloaded on first use).
    ///
    /// # Errors
    ///
    /// Returns [`EngramError::ModelUnavailable`] if the model weights cannot
    /// be fetched or the ONNX session fails to initialize.
    pub fn new() -> Result<Self> {
        use fastembed::{EmbeddingModel as FastembedModel, InitOptions, TextEmbedding};

        let options = InitOptions::new(FastembedModel::AllMiniLML6V2);
        let model = TextEmbedding::try_new(options)
            .map_err(|e| EngramError::ModelUnavailable(e.to_string()))?;

        Ok(Self {
            model,
            dims: 384,
            name: "all-MiniLM-L6-v2".to_string(),
        })
    }
}

#[cfg(feature = "onnx")]
impl EmbeddingModel for OnnxEmbeddingModel {
    fn embed_batch(&self, texts: &[&str]) -> Result<Vec<Embedding>> {
        let vectors = self
            .model
            .embed(texts.to_vec(), None)
            .map_err(|e| EngramError::Embedding(e.to_string()))?;
        Ok(vectors
            .into_iter()
            .map(|v| Embedding(v).normalized())
            .collect())
    }

    fn dimensions(&self) -> usize {
        self.dims
    }

    fn model_name(&self) -> &str {
        &self.name
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
