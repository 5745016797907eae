// Copyright 2026 Layne Penney
// SPDX-License-Identifier: AGPL-3.0-or-later

//! Vector store abstraction.
//!
//! One contract over two backends: a remote Qdrant service ([`qdrant`]) and
//! an embedded in-process index with snapshot persistence ([`memory`]).
//! Chunks are points keyed by `chunk_id` with named `dense` and `sparse`
//! vectors; hybrid search fuses per-vector rankings with reciprocal-rank
//! fusion so both backends rank identically.

mod memory;
mod qdrant;

use async_trait::async_trait;
use uuid::Uuid;

pub use memory::MemoryStore;
pub use qdrant::QdrantStore;

use crate::error::StoreError;
use crate::types::{CollectionMetadata, SearchFilter, SearchMode, SearchResult, SparseVector};

/// RRF rank constant. Shared by both backends; changing it reorders every
/// hybrid result set.
pub const RRF_K: f32 = 60.0;

/// Query vectors for a search; at least one side must be present.
#[derive(Debug, Clone, Default)]
pub struct QueryVectors {
    pub dense: Option<Vec<f32>>,
    pub sparse: Option<SparseVector>,
}

impl QueryVectors {
    pub fn dense_only(vector: Vec<f32>) -> Self {
        Self {
            dense: Some(vector),
            sparse: None,
        }
    }

    pub fn sparse_only(vector: SparseVector) -> Self {
        Self {
            dense: None,
            sparse: Some(vector),
        }
    }

    /// The search mode these vectors produce, if any vector is present.
    pub fn mode(&self) -> Option<SearchMode> {
        match (&self.dense, &self.sparse) {
            (Some(_), Some(_)) => Some(SearchMode::Hybrid),
            (Some(_), None) => Some(SearchMode::Dense),
            (None, Some(_)) => Some(SearchMode::Sparse),
            (None, None) => None,
        }
    }
}

/// Uniform persistence and retrieval contract for chunks.
///
/// Implementations are safe for concurrent use behind an `Arc`; upserts and
/// searches are linearizable per collection from the caller's view, and
/// deletes are visible to the next search without an explicit flush.
#[async_trait]
pub trait VectorStore: Send + Sync {
    /// Backend variant id ("qdrant", "memory").
    fn backend(&self) -> &'static str;

    /// Hint whether writes should wait for durable acknowledgment. Seeds and
    /// migrations run with `true`; incremental watch updates may use `false`.
    /// Default no-op for backends without the distinction.
    fn set_write_durability(&self, _wait: bool) {}

    /// Idempotently create the collection, or validate stored metadata
    /// against `metadata` when it already exists. Mismatched provider or
    /// schema fails with [`StoreError::ProviderSwitch`]; a different dense
    /// dimension fails with [`StoreError::DimensionMismatch`]. No write or
    /// query runs against an incompatible collection.
    async fn ensure_collection(
        &self,
        name: &str,
        metadata: &CollectionMetadata,
    ) -> Result<(), StoreError>;

    /// Batch write. Each chunk becomes one point carrying whichever named
    /// vectors are present plus the full payload. Atomic per batch.
    async fn upsert(&self, collection: &str, chunks: &[crate::types::Chunk])
        -> Result<(), StoreError>;

    /// Delete every chunk whose `file_path` payload equals `file_path`.
    /// Returns the number of deleted points when the backend reports it.
    async fn delete_by_file(&self, collection: &str, file_path: &str) -> Result<u64, StoreError>;

    /// Delete chunks by id.
    async fn delete_by_ids(&self, collection: &str, ids: &[Uuid]) -> Result<u64, StoreError>;

    /// Delete chunks by `chunk_name`. Returns the number of deleted points
    /// when the backend reports it.
    async fn delete_by_names(&self, collection: &str, names: &[String])
        -> Result<u64, StoreError>;

    /// Ids of every chunk stored for a file path. Used by incremental
    /// indexing to diff stored state against fresh chunker output.
    async fn ids_by_file(&self, collection: &str, file_path: &str)
        -> Result<Vec<Uuid>, StoreError>;

    /// Rewrite all chunks of `from` under path `to`, re-deriving chunk ids
    /// and names without touching the stored vectors. Returns the number of
    /// moved chunks.
    async fn move_file(&self, collection: &str, from: &str, to: &str) -> Result<u64, StoreError>;

    /// Search with any combination of dense and sparse query vectors.
    /// Single-mode searches rank by the corresponding similarity; hybrid
    /// searches fuse both rankings with normalized RRF. Results are sorted
    /// by `(score desc, file_path, line_start, chunk_id)` and satisfy
    /// `filter`.
    async fn search(
        &self,
        collection: &str,
        vectors: &QueryVectors,
        filter: &SearchFilter,
        limit: usize,
    ) -> Result<Vec<SearchResult>, StoreError>;

    /// Names of existing collections.
    async fn list_collections(&self) -> Result<Vec<String>, StoreError>;

    /// Stored metadata for a collection, if the collection exists.
    async fn collection_metadata(
        &self,
        collection: &str,
    ) -> Result<Option<CollectionMetadata>, StoreError>;

    /// Lightweight health probe.
    async fn healthy(&self) -> bool;

    /// Flush any durable state (snapshots). Default no-op.
    async fn flush(&self) -> Result<(), StoreError> {
        Ok(())
    }
}

/// Compile path globs from a filter, or `None` when the clause is absent.
pub(crate) fn compile_globs(
    patterns: &[String],
) -> Result<Option<globset::GlobSet>, StoreError> {
    if patterns.is_empty() {
        return Ok(None);
    }
    let mut builder = globset::GlobSetBuilder::new();
    for pattern in patterns {
        let glob = globset::Glob::new(pattern)
            .map_err(|e| StoreError::Backend(format!("bad path pattern '{pattern}': {e}")))?;
        builder.add(glob);
    }
    builder
        .build()
        .map(Some)
        .map_err(|e| StoreError::Backend(format!("failed to build glob set: {e}")))
}

/// Cosine similarity clamped to [0, 1]; negative similarity carries no
/// ranking value for retrieval.
pub(crate) fn cosine_score(a: &[f32], b: &[f32]) -> f32 {
    if a.len() != b.len() || a.is_empty() {
        return 0.0;
    }
    let mut dot = 0.0f32;
    let mut norm_a = 0.0f32;
    let mut norm_b = 0.0f32;
    for (x, y) in a.iter().zip(b.iter()) {
        dot += x * y;
        norm_a += x * x;
        norm_b += y * y;
    }
    if norm_a == 0.0 || norm_b == 0.0 {
        return 0.0;
    }
    (dot / (norm_a.sqrt() * norm_b.sqrt())).clamp(0.0, 1.0)
}

/// Sparse cosine score clamped to [0, 1].
pub(crate) fn sparse_score(query: &SparseVector, stored: &SparseVector) -> f32 {
    let denom = query.norm() * stored.norm();
    if denom == 0.0 {
        return 0.0;
    }
    (query.dot(stored) / denom).clamp(0.0, 1.0)
}

/// Reciprocal-rank fusion over per-mode rankings.
///
/// `score(id) = Σ_lists 1 / (RRF_K + rank)`, rank starting at 1, normalized
/// by the best achievable sum (`lists / (RRF_K + 1)`) so fused scores stay
/// in [0, 1]. Stable across providers because it only consumes ranks.
pub(crate) fn rrf_fuse(rankings: &[Vec<Uuid>]) -> Vec<(Uuid, f32)> {
    let lists = rankings.iter().filter(|r| !r.is_empty()).count().max(1) as f32;
    let mut scores: std::collections::HashMap<Uuid, f32> = std::collections::HashMap::new();
    for ranking in rankings {
        for (rank, id) in ranking.iter().enumerate() {
            *scores.entry(*id).or_insert(0.0) += 1.0 / (RRF_K + rank as f32 + 1.0);
        }
    }
    let max_sum = lists / (RRF_K + 1.0);
    let mut fused: Vec<(Uuid, f32)> = scores
        .into_iter()
        .map(|(id, s)| (id, (s / max_sum).clamp(0.0, 1.0)))
        .collect();
    fused.sort_by(|a, b| b.1.partial_cmp(&a.1).unwrap_or(std::cmp::Ordering::Equal));
    fused
}

/// Deterministic result ordering: score descending, then
/// `(file_path, line_start, chunk_id)`.
pub(crate) fn sort_results(results: &mut [SearchResult]) {
    results.sort_by(|a, b| {
        b.score
            .partial_cmp(&a.score)
            .unwrap_or(std::cmp::Ordering::Equal)
            .then_with(|| a.chunk.file_path.cmp(&b.chunk.file_path))
            .then_with(|| a.chunk.line_start.cmp(&b.chunk.line_start))
            .then_with(|| a.chunk.chunk_id.cmp(&b.chunk.chunk_id))
    });
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cosine_score_identity_and_orthogonal() {
        let a = vec![1.0, 0.0, 0.0];
        assert!((cosine_score(&a, &a) - 1.0).abs() < 1e-6);
        assert!(cosine_score(&a, &[0.0, 1.0, 0.0]) < 1e-6);
        // Negative similarity clamps to zero.
        assert_eq!(cosine_score(&a, &[-1.0, 0.0, 0.0]), 0.0);
    }

    #[test]
    fn test_query_vectors_mode() {
        assert_eq!(
            QueryVectors::dense_only(vec![0.1]).mode(),
            Some(SearchMode::Dense)
        );
        assert_eq!(
            QueryVectors::sparse_only(SparseVector::new(vec![(1, 1.0)])).mode(),
            Some(SearchMode::Sparse)
        );
        assert_eq!(QueryVectors::default().mode(), None);
        let hybrid = QueryVectors {
            dense: Some(vec![0.1]),
            sparse: Some(SparseVector::new(vec![(1, 1.0)])),
        };
        assert_eq!(hybrid.mode(), Some(SearchMode::Hybrid));
    }

    #[test]
    fn test_rrf_prefers_agreement() {
        let a = Uuid::new_v4();
        let b = Uuid::new_v4();
        let c = Uuid::new_v4();
        let fused = rrf_fuse(&[vec![a, b, c], vec![a, c, b]]);
        assert_eq!(fused[0].0, a);
        assert!(fused[0].1 > fused[1].1);
        // Top hit in both lists fuses to the maximum normalized score.
        assert!((fused[0].1 - 1.0).abs() < 1e-6);
    }

    #[test]
    fn test_rrf_single_list_keeps_order() {
        let ids: Vec<Uuid> = (0..4).map(|_| Uuid::new_v4()).collect();
        let fused = rrf_fuse(&[ids.clone(), Vec::new()]);
        let fused_ids: Vec<Uuid> = fused.iter().map(|(id, _)| *id).collect();
        assert_eq!(fused_ids, ids);
        assert!(fused.iter().all(|(_, s)| *s > 0.0 && *s <= 1.0));
    }
}
