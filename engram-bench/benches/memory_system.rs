//! ENGRAM benchmark suite.
//!
//! Tracks the hot paths of the tier lifecycle:
//!   add_memory_no_eviction ........ recent-queue insert only
//!   add_memory_with_eviction ...... insert + buffer staging write
//!   buffer_flush_10_memories ...... batch embed + index write
//!   search_top3_from_200 .......... query embed + exact scan of 200
//!   get_context_with_query ........ combined recent + search path

use std::sync::Arc;

use criterion::{Criterion, black_box, criterion_group, criterion_main};

use engram_core::embedding::HashedEmbeddingModel;
use engram_core::vector_store::SqliteVectorStore;
use engram_core::{Embedder, EngramConfig, MemoryEngine, OwnerId};

fn open_engine(dir: &std::path::Path, recent_capacity: usize) -> MemoryEngine {
    let mut config = EngramConfig::default();
    config.persistence.data_dir = dir.to_path_buf();
    config.memory.recent_capacity = recent_capacity;
    config.memory.buffer_threshold = usize::MAX; // flush manually in benches
    let embedder = Arc::new(Embedder::with_model(Arc::new(HashedEmbeddingModel::new(384))));
    let store = Arc::new(SqliteVectorStore::open_in_memory().expect("store"));
    MemoryEngine::with_store(config, embedder, store).expect("engine")
}

/// Benchmark: add into a non-full recent queue (no disk touched).
fn bench_add_no_eviction(c: &mut Criterion) {
    let dir = tempfile::tempdir().expect("tempdir");
    let engine = open_engine(dir.path(), usize::MAX);
    let owner = OwnerId::from("bench_npc");

    c.bench_function("add_memory_no_eviction", |b| {
        b.iter(|| {
            let outcome = engine
                .manager()
                .add_memory(
                    black_box(&owner),
                    black_box("the merchant haggled over the price of iron"),
                    None,
                )
                .expect("add");
            black_box(outcome);
        });
    });
}

/// Benchmark: add that evicts into the buffer (one staged file write).
fn bench_add_with_eviction(c: &mut Criterion) {
    let dir = tempfile::tempdir().expect("tempdir");
    let engine = open_engine(dir.path(), 5);
    let owner = OwnerId::from("bench_npc");
    for i in 0..5 {
        engine
            .manager()
            .add_memory(&owner, &format!("warmup memory {i}"), None)
            .expect("add");
    }

    c.bench_function("add_memory_with_eviction", |b| {
        b.iter(|| {
            let outcome = engine
                .manager()
                .add_memory(
                    black_box(&owner),
                    black_box("a stranger asked for directions to the keep"),
                    None,
                )
                .expect("add");
            black_box(outcome);
        });
    });
}

/// Benchmark: flushing a 10-memory buffer into the vector index.
fn bench_buffer_flush(c: &mut Criterion) {
    let dir = tempfile::tempdir().expect("tempdir");
    let engine = open_engine(dir.path(), 1);
    let owner = OwnerId::from("bench_npc");
    engine
        .manager()
        .add_memory(&owner, "prefill so every add below evicts", None)
        .expect("add");

    c.bench_function("buffer_flush_10_memories", |b| {
        b.iter_with_setup(
            || {
                for i in 0..10 {
                    engine
                        .manager()
                        .add_memory(&owner, &format!("staged conversation turn {i}"), None)
                        .expect("add");
                }
            },
            |()| {
                let flushed = engine
                    .manager()
                    .force_embed_buffer(black_box(&owner))
                    .expect("flush");
                black_box(flushed);
            },
        );
    });
}

/// Benchmark: top-3 semantic search over 200 indexed memories.
fn bench_search(c: &mut Criterion) {
    let dir = tempfile::tempdir().expect("tempdir");
    let engine = open_engine(dir.path(), 1);
    let owner = OwnerId::from("bench_npc");

    for i in 0..201 {
        engine
            .manager()
            .add_memory(&owner, &format!("event number {i} happened in the town square"), None)
            .expect("add");
    }
    engine.manager().force_embed_buffer(&owner).expect("flush");

    c.bench_function("search_top3_from_200", |b| {
        b.iter(|| {
            let results = engine
                .manager()
                .search_memories(black_box(&owner), black_box("town square events"), Some(3))
                .expect("search");
            black_box(results);
        });
    });
}

/// Benchmark: full context assembly (recent tier + semantic search).
fn bench_get_context(c: &mut Criterion) {
    let dir = tempfile::tempdir().expect("tempdir");
    let engine = open_engine(dir.path(), 5);
    let owner = OwnerId::from("bench_npc");

    for i in 0..105 {
        engine
            .manager()
            .add_memory(&owner, &format!("villager mentioned rumor number {i}"), None)
            .expect("add");
    }
    engine.manager().force_embed_buffer(&owner).expect("flush");

    c.bench_function("get_context_with_query", |b| {
        b.iter(|| {
            let ctx = engine
                .manager()
                .get_context(black_box(&owner), black_box(Some("rumors in the village")), None)
                .expect("context");
            black_box(ctx);
        });
    });
}

criterion_group!(
    benches,
    bench_add_no_eviction,
    bench_add_with_eviction,
    bench_buffer_flush,
    bench_search,
    bench_get_context,
);
criterion_main!(benches);
