// Copyright 2026 Layne Penney
// SPDX-License-Identifier: AGPL-3.0-or-later

//! Store-contract scenarios exercised against the embedded backend.
//!
//! The Qdrant backend shares the same trait and fusion helpers; these
//! scenarios define the behavior both must exhibit.

use codeweaver::config::StoreConfig;
use codeweaver::store::{MemoryStore, QueryVectors, VectorStore};
use codeweaver::types::{
    Chunk, ChunkKind, CollectionMetadata, SearchFilter, SearchMode, SparseVector,
};

const DIM: usize = 768;

fn dense_pattern(pattern: &[f32]) -> Vec<f32> {
    pattern.iter().copied().cycle().take(DIM).collect()
}

fn chunk(path: &str, symbol: &str, dense: Vec<f32>, sparse: Option<SparseVector>) -> Chunk {
    let mut chunk = Chunk::new(
        path,
        "python",
        1,
        4,
        format!("def {symbol}():\n    pass"),
        ChunkKind::Definition,
        Some(symbol),
    );
    chunk.embeddings.dense = Some(dense);
    chunk.embeddings.sparse = sparse;
    chunk.metadata.embedding_complete = chunk.embeddings.is_complete();
    chunk
}

fn metadata_for(provider: &str) -> CollectionMetadata {
    CollectionMetadata::new(provider, DIM, 65_536, "proj")
}

fn metadata() -> CollectionMetadata {
    metadata_for("memory")
}

#[tokio::test]
async fn hybrid_store_and_search() {
    let store = MemoryStore::ephemeral();
    store.ensure_collection("proj", &metadata()).await.unwrap();

    let dense = dense_pattern(&[0.1, 0.2, 0.3]);
    let sparse = SparseVector::new(vec![(1, 0.8), (5, 0.6), (10, 0.9), (23, 0.4)]);
    let point = chunk("auth.py", "authenticate", dense.clone(), Some(sparse));
    store.upsert("proj", &[point]).await.unwrap();

    // Dense-only with the stored vector: rank 1.
    let results = store
        .search(
            "proj",
            &QueryVectors::dense_only(dense.clone()),
            &SearchFilter::default(),
            10,
        )
        .await
        .unwrap();
    assert_eq!(results.len(), 1);
    assert_eq!(results[0].search_mode, SearchMode::Dense);
    assert_eq!(results[0].chunk.chunk_name, "auth.py:authenticate");
    assert!(results[0].score > 0.99);

    // Sparse-only with a subset of the stored indices.
    let query = SparseVector::new(vec![(1, 0.8), (5, 0.6), (10, 0.9)]);
    let results = store
        .search(
            "proj",
            &QueryVectors::sparse_only(query.clone()),
            &SearchFilter::default(),
            10,
        )
        .await
        .unwrap();
    assert_eq!(results.len(), 1);
    assert_eq!(results[0].search_mode, SearchMode::Sparse);
    assert_eq!(results[0].chunk.chunk_name, "auth.py:authenticate");

    // Hybrid with both: rank 1.
    let results = store
        .search(
            "proj",
            &QueryVectors {
                dense: Some(dense),
                sparse: Some(query),
            },
            &SearchFilter::default(),
            10,
        )
        .await
        .unwrap();
    assert_eq!(results[0].chunk.chunk_name, "auth.py:authenticate");
    assert_eq!(results[0].search_mode, SearchMode::Hybrid);
    assert!(results[0].dense_score.is_some());
    assert!(results[0].sparse_score.is_some());
}

#[tokio::test]
async fn persistence_across_restart() {
    let dir = tempfile::tempdir().unwrap();
    let config = StoreConfig {
        snapshot_path: Some(dir.path().join("index.json")),
        ..Default::default()
    };

    let dense = vec![0.5; DIM];
    {
        let store = MemoryStore::open(&config).unwrap();
        store.ensure_collection("proj", &metadata()).await.unwrap();
        store
            .upsert("proj", &[chunk("login.py", "validate", dense.clone(), None)])
            .await
            .unwrap();
        store.flush().await.unwrap();
    }

    let store = MemoryStore::open(&config).unwrap();
    let results = store
        .search(
            "proj",
            &QueryVectors::dense_only(dense),
            &SearchFilter::default(),
            10,
        )
        .await
        .unwrap();
    assert_eq!(results.len(), 1);
    assert_eq!(results[0].chunk.chunk_name, "login.py:validate");
}

#[tokio::test]
async fn ranking_orders_by_similarity() {
    let store = MemoryStore::ephemeral();
    store.ensure_collection("proj", &metadata()).await.unwrap();

    let chunks = vec![
        chunk("a.py", "exact", dense_pattern(&[1.0, 0.0, 0.0]), None),
        chunk("b.py", "partial", dense_pattern(&[0.5, 0.5, 0.0]), None),
        chunk("c.py", "orthogonal", dense_pattern(&[0.0, 0.0, 1.0]), None),
    ];
    store.upsert("proj", &chunks).await.unwrap();

    let results = store
        .search(
            "proj",
            &QueryVectors::dense_only(dense_pattern(&[1.0, 0.0, 0.0])),
            &SearchFilter::default(),
            10,
        )
        .await
        .unwrap();

    assert_eq!(results[0].chunk.chunk_name, "a.py:exact");
    assert_eq!(results[1].chunk.chunk_name, "b.py:partial");
    assert!(
        results[0].score > results[1].score,
        "exact match must strictly outrank the partial one"
    );
}

#[tokio::test]
async fn snapshot_roundtrip_on_disk() {
    let dir = tempfile::tempdir().unwrap();
    let snapshot = dir.path().join("snapshot.json");
    let config = StoreConfig {
        snapshot_path: Some(snapshot.clone()),
        ..Default::default()
    };

    let store = MemoryStore::open(&config).unwrap();
    store.ensure_collection("proj", &metadata()).await.unwrap();
    store
        .upsert(
            "proj",
            &[chunk("m.py", "snapshotted", vec![0.25; DIM], None)],
        )
        .await
        .unwrap();
    store.flush().await.unwrap();
    assert!(snapshot.exists(), "snapshot file must exist after flush");
    drop(store);

    let restored = MemoryStore::open(&config).unwrap();
    let results = restored
        .search(
            "proj",
            &QueryVectors::dense_only(vec![0.25; DIM]),
            &SearchFilter::default(),
            10,
        )
        .await
        .unwrap();
    assert_eq!(results.len(), 1);
    assert_eq!(results[0].chunk.chunk_name, "m.py:snapshotted");
}

#[tokio::test]
async fn incremental_update_replaces_file_chunks() {
    let store = MemoryStore::ephemeral();
    store.ensure_collection("proj", &metadata()).await.unwrap();

    store
        .upsert(
            "proj",
            &[chunk("src/file.py", "func_v1", vec![0.1; DIM], None)],
        )
        .await
        .unwrap();
    store.delete_by_file("proj", "src/file.py").await.unwrap();
    store
        .upsert(
            "proj",
            &[chunk("src/file.py", "func_v2", vec![0.9; DIM], None)],
        )
        .await
        .unwrap();

    let results = store
        .search(
            "proj",
            &QueryVectors::dense_only(vec![0.9; DIM]),
            &SearchFilter::default(),
            10,
        )
        .await
        .unwrap();
    assert!(results
        .iter()
        .any(|r| r.chunk.chunk_name == "src/file.py:func_v2"));
    assert!(results
        .iter()
        .all(|r| r.chunk.chunk_name != "src/file.py:func_v1"));

    // No filter combination can resurrect the deleted chunk.
    let filtered = store
        .search(
            "proj",
            &QueryVectors::dense_only(vec![0.1; DIM]),
            &SearchFilter {
                path_patterns: vec!["src/*.py".to_string()],
                ..Default::default()
            },
            10,
        )
        .await
        .unwrap();
    assert!(filtered
        .iter()
        .all(|r| r.chunk.chunk_name != "src/file.py:func_v1"));
}

#[tokio::test]
async fn provider_switch_is_refused() {
    let store = MemoryStore::ephemeral();
    let qdrant_meta = CollectionMetadata::new("qdrant", DIM, 65_536, "proj");
    store
        .ensure_collection("proj", &qdrant_meta)
        .await
        .unwrap();

    let memory_meta = CollectionMetadata::new("memory", DIM, 65_536, "proj");
    let err = store
        .ensure_collection("proj", &memory_meta)
        .await
        .unwrap_err();
    let remediation = err.remediation().expect("switch error carries remediation");
    assert!(remediation.contains("re-index"));
    assert!(remediation.contains("revert"));
    let message = err.to_string();
    assert!(message.contains("qdrant"));
    assert!(message.contains("memory"));
}

#[tokio::test]
async fn idempotent_upsert_preserves_state() {
    let store = MemoryStore::ephemeral();
    store.ensure_collection("proj", &metadata()).await.unwrap();

    let batch = vec![
        chunk("x.py", "one", dense_pattern(&[1.0, 0.0]), None),
        chunk("y.py", "two", dense_pattern(&[0.0, 1.0]), None),
    ];
    store.upsert("proj", &batch).await.unwrap();
    let before = store
        .search(
            "proj",
            &QueryVectors::dense_only(dense_pattern(&[1.0, 1.0])),
            &SearchFilter::default(),
            10,
        )
        .await
        .unwrap();

    store.upsert("proj", &batch).await.unwrap();
    let after = store
        .search(
            "proj",
            &QueryVectors::dense_only(dense_pattern(&[1.0, 1.0])),
            &SearchFilter::default(),
            10,
        )
        .await
        .unwrap();

    assert_eq!(before.len(), after.len());
    let names = |results: &[codeweaver::types::SearchResult]| {
        results
            .iter()
            .map(|r| r.chunk.chunk_name.clone())
            .collect::<Vec<_>>()
    };
    assert_eq!(names(&before), names(&after));
}

/// The same contract against a live Qdrant server.
///
/// Ignored by default; start a local Qdrant (or point `QDRANT_URL` at one)
/// and run `cargo test -- --ignored`. Collection names are salted per run
/// so repeated invocations do not collide.
mod qdrant_live {
    use super::*;
    use codeweaver::config::ProviderSettings;
    use codeweaver::store::QdrantStore;

    fn connect() -> QdrantStore {
        QdrantStore::connect(&ProviderSettings::default(), 64)
            .expect("qdrant client should build from QDRANT_URL or localhost")
    }

    fn unique_collection(prefix: &str) -> String {
        let nanos = std::time::SystemTime::now()
            .duration_since(std::time::UNIX_EPOCH)
            .expect("clock before epoch")
            .as_nanos();
        format!("{prefix}-{nanos}")
    }

    #[tokio::test]
    #[ignore = "requires a running Qdrant server"]
    async fn qdrant_hybrid_store_and_search() {
        let store = connect();
        let collection = unique_collection("cw-hybrid");
        store
            .ensure_collection(&collection, &metadata_for("qdrant"))
            .await
            .unwrap();

        let dense = dense_pattern(&[0.1, 0.2, 0.3]);
        let sparse = SparseVector::new(vec![(1, 0.8), (5, 0.6), (10, 0.9), (23, 0.4)]);
        let point = chunk("auth.py", "authenticate", dense.clone(), Some(sparse));
        store.upsert(&collection, &[point]).await.unwrap();

        let results = store
            .search(
                &collection,
                &QueryVectors::dense_only(dense.clone()),
                &SearchFilter::default(),
                10,
            )
            .await
            .unwrap();
        assert_eq!(results.len(), 1);
        assert_eq!(results[0].chunk.chunk_name, "auth.py:authenticate");

        // The named-sparse query path must work on its own.
        let query = SparseVector::new(vec![(1, 0.8), (5, 0.6), (10, 0.9)]);
        let results = store
            .search(
                &collection,
                &QueryVectors::sparse_only(query.clone()),
                &SearchFilter::default(),
                10,
            )
            .await
            .unwrap();
        assert_eq!(results.len(), 1);
        assert_eq!(results[0].search_mode, SearchMode::Sparse);
        assert_eq!(results[0].chunk.chunk_name, "auth.py:authenticate");

        let results = store
            .search(
                &collection,
                &QueryVectors {
                    dense: Some(dense),
                    sparse: Some(query),
                },
                &SearchFilter::default(),
                10,
            )
            .await
            .unwrap();
        assert_eq!(results[0].chunk.chunk_name, "auth.py:authenticate");
        assert_eq!(results[0].search_mode, SearchMode::Hybrid);
    }

    #[tokio::test]
    #[ignore = "requires a running Qdrant server"]
    async fn qdrant_incremental_update_replaces_file_chunks() {
        let store = connect();
        let collection = unique_collection("cw-incremental");
        store
            .ensure_collection(&collection, &metadata_for("qdrant"))
            .await
            .unwrap();

        store
            .upsert(
                &collection,
                &[chunk("src/file.py", "func_v1", vec![0.1; DIM], None)],
            )
            .await
            .unwrap();
        store
            .delete_by_file(&collection, "src/file.py")
            .await
            .unwrap();
        store
            .upsert(
                &collection,
                &[chunk("src/file.py", "func_v2", vec![0.9; DIM], None)],
            )
            .await
            .unwrap();

        let results = store
            .search(
                &collection,
                &QueryVectors::dense_only(vec![0.9; DIM]),
                &SearchFilter::default(),
                10,
            )
            .await
            .unwrap();
        assert!(results
            .iter()
            .any(|r| r.chunk.chunk_name == "src/file.py:func_v2"));
        assert!(results
            .iter()
            .all(|r| r.chunk.chunk_name != "src/file.py:func_v1"));
    }

    #[tokio::test]
    #[ignore = "requires a running Qdrant server"]
    async fn qdrant_provider_switch_is_refused() {
        let store = connect();
        let collection = unique_collection("cw-switch");
        store
            .ensure_collection(&collection, &metadata_for("qdrant"))
            .await
            .unwrap();

        let err = store
            .ensure_collection(&collection, &metadata_for("memory"))
            .await
            .unwrap_err();
        let remediation = err.remediation().expect("switch error carries remediation");
        assert!(remediation.contains("re-index"));
        assert!(remediation.contains("revert"));
    }

    #[tokio::test]
    #[ignore = "requires a running Qdrant server"]
    async fn qdrant_idempotent_upsert() {
        let store = connect();
        let collection = unique_collection("cw-idempotent");
        store
            .ensure_collection(&collection, &metadata_for("qdrant"))
            .await
            .unwrap();

        let batch = vec![chunk("x.py", "one", dense_pattern(&[1.0, 0.0]), None)];
        store.upsert(&collection, &batch).await.unwrap();
        store.upsert(&collection, &batch).await.unwrap();

        let results = store
            .search(
                &collection,
                &QueryVectors::dense_only(dense_pattern(&[1.0, 0.0])),
                &SearchFilter::default(),
                10,
            )
            .await
            .unwrap();
        assert_eq!(results.len(), 1);
    }
}

#[tokio::test]
async fn returned_chunks_satisfy_filters() {
    let store = MemoryStore::ephemeral();
    store.ensure_collection("proj", &metadata()).await.unwrap();

    let mut rust_chunk = chunk("src/lib.rs", "run", dense_pattern(&[1.0, 0.0]), None);
    rust_chunk.language = "rust".to_string();
    let mut incomplete = chunk("src/partial.py", "partial", dense_pattern(&[1.0, 0.0]), None);
    incomplete.metadata.embedding_complete = false;
    let complete = {
        let mut c = chunk(
            "src/whole.py",
            "whole",
            dense_pattern(&[1.0, 0.0]),
            Some(SparseVector::new(vec![(3, 1.0)])),
        );
        c.metadata.embedding_complete = true;
        c
    };
    store
        .upsert("proj", &[rust_chunk, incomplete, complete])
        .await
        .unwrap();

    let filter = SearchFilter {
        languages: vec!["python".to_string()],
        embedding_complete: Some(true),
        path_patterns: vec!["src/*.py".to_string()],
        ..Default::default()
    };
    let results = store
        .search(
            "proj",
            &QueryVectors::dense_only(dense_pattern(&[1.0, 0.0])),
            &filter,
            10,
        )
        .await
        .unwrap();
    assert_eq!(results.len(), 1);
    let hit = &results[0].chunk;
    assert_eq!(hit.language, "python");
    assert!(hit.metadata.embedding_complete);
    assert_eq!(hit.file_path, "src/whole.py");
}
