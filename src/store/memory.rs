// Copyright 2026 Layne Penney
// SPDX-License-Identifier: AGPL-3.0-or-later

//! Embedded in-process vector store.
//!
//! Same contract as the Qdrant backend, no network: brute-force cosine over
//! dense vectors and normalized dot product over sparse vectors, with
//! periodic JSON snapshots for persistence across restarts. Intended for
//! development and tests; beyond ~10k chunks the remote backend is the
//! better home.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Weak};
use std::time::Duration;

use async_trait::async_trait;
use globset::GlobSet;
use serde::{Deserialize, Serialize};
use tokio::sync::RwLock;
use uuid::Uuid;

use crate::config::StoreConfig;
use crate::error::StoreError;
use crate::types::{
    Chunk, CollectionMetadata, SearchFilter, SearchMode, SearchResult, SCHEMA_VERSION,
};

use super::{compile_globs, cosine_score, rrf_fuse, sort_results, sparse_score, QueryVectors, VectorStore};

/// Chunk count past which migration to the remote backend is recommended.
const SOFT_CAP_CHUNKS: usize = 10_000;

#[derive(Debug, Clone, Serialize, Deserialize)]
struct DenseVectorConfig {
    size: usize,
    distance: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct SparseVectorConfig {
    max_dimension: u32,
}

/// One collection in the snapshot file. The vector configs mirror what the
/// Qdrant backend declares at creation so a snapshot documents its schema.
#[derive(Debug, Clone, Serialize, Deserialize)]
struct SnapshotCollection {
    metadata: CollectionMetadata,
    vectors_config: HashMap<String, DenseVectorConfig>,
    sparse_vectors_config: HashMap<String, SparseVectorConfig>,
    points: Vec<Chunk>,
}

#[derive(Debug, Serialize, Deserialize)]
struct SnapshotFile {
    version: String,
    collections: HashMap<String, SnapshotCollection>,
}

#[derive(Debug)]
struct CollectionData {
    metadata: CollectionMetadata,
    points: HashMap<Uuid, Chunk>,
    soft_cap_logged: bool,
}

#[derive(Debug, Default)]
struct MemoryState {
    collections: HashMap<String, CollectionData>,
}

/// In-process vector store with optional snapshot persistence.
#[derive(Debug)]
pub struct MemoryStore {
    state: Arc<RwLock<MemoryState>>,
    snapshot_path: Option<PathBuf>,
}

impl MemoryStore {
    /// Open a store, restoring from the configured snapshot when present,
    /// and start the periodic snapshot task.
    pub fn open(config: &StoreConfig) -> Result<Self, StoreError> {
        let mut state = MemoryState::default();
        if let Some(path) = &config.snapshot_path {
            if path.exists() {
                state = Self::restore(path)?;
                tracing::info!(
                    path = %path.display(),
                    collections = state.collections.len(),
                    "restored memory store snapshot"
                );
            }
        }

        let store = Self {
            state: Arc::new(RwLock::new(state)),
            snapshot_path: config.snapshot_path.clone(),
        };

        if let Some(path) = &config.snapshot_path {
            Self::spawn_snapshot_task(
                Arc::downgrade(&store.state),
                path.clone(),
                config.effective_snapshot_interval_secs(),
            );
        }
        Ok(store)
    }

    /// Ephemeral store with no persistence.
    pub fn ephemeral() -> Self {
        Self {
            state: Arc::new(RwLock::new(MemoryState::default())),
            snapshot_path: None,
        }
    }

    /// Periodic snapshot loop; exits when the store is dropped.
    fn spawn_snapshot_task(state: Weak<RwLock<MemoryState>>, path: PathBuf, interval_secs: u64) {
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(Duration::from_secs(interval_secs));
            interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            loop {
                interval.tick().await;
                let Some(state) = state.upgrade() else {
                    break;
                };
                let guard = state.read().await;
                if let Err(err) = Self::write_snapshot(&guard, &path) {
                    tracing::warn!(error = %err, "periodic snapshot failed");
                }
            }
        });
    }

    fn restore(path: &Path) -> Result<MemoryState, StoreError> {
        let raw = std::fs::read_to_string(path)
            .map_err(|e| StoreError::Snapshot(format!("read {}: {e}", path.display())))?;
        let file: SnapshotFile = serde_json::from_str(&raw)
            .map_err(|e| StoreError::Snapshot(format!("parse {}: {e}", path.display())))?;
        if file.version != SCHEMA_VERSION {
            return Err(StoreError::Snapshot(format!(
                "snapshot schema version '{}' is not supported (expected '{}')",
                file.version, SCHEMA_VERSION
            )));
        }
        let mut state = MemoryState::default();
        for (name, collection) in file.collections {
            let points = collection
                .points
                .into_iter()
                .map(|chunk| (chunk.chunk_id, chunk))
                .collect();
            state.collections.insert(
                name,
                CollectionData {
                    metadata: collection.metadata,
                    points,
                    soft_cap_logged: false,
                },
            );
        }
        Ok(state)
    }

    /// Atomic snapshot write: temp file in the target directory, then rename.
    fn write_snapshot(state: &MemoryState, path: &Path) -> Result<(), StoreError> {
        let mut collections = HashMap::new();
        for (name, data) in &state.collections {
            let mut vectors_config = HashMap::new();
            vectors_config.insert(
                "dense".to_string(),
                DenseVectorConfig {
                    size: data.metadata.dense_dimension,
                    distance: "Cosine".to_string(),
                },
            );
            let mut sparse_vectors_config = HashMap::new();
            sparse_vectors_config.insert(
                "sparse".to_string(),
                SparseVectorConfig {
                    max_dimension: data.metadata.max_sparse_dimension,
                },
            );
            let mut points: Vec<Chunk> = data.points.values().cloned().collect();
            points.sort_by_key(|c| c.chunk_id);
            collections.insert(
                name.clone(),
                SnapshotCollection {
                    metadata: data.metadata.clone(),
                    vectors_config,
                    sparse_vectors_config,
                    points,
                },
            );
        }
        let file = SnapshotFile {
            version: SCHEMA_VERSION.to_string(),
            collections,
        };

        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)
                .map_err(|e| StoreError::Snapshot(format!("create {}: {e}", parent.display())))?;
        }
        let tmp = path.with_extension("tmp");
        let json = serde_json::to_string(&file)
            .map_err(|e| StoreError::Snapshot(format!("serialize snapshot: {e}")))?;
        std::fs::write(&tmp, json)
            .map_err(|e| StoreError::Snapshot(format!("write {}: {e}", tmp.display())))?;
        std::fs::rename(&tmp, path)
            .map_err(|e| StoreError::Snapshot(format!("rename {}: {e}", path.display())))?;
        Ok(())
    }

    fn validate_chunk(metadata: &CollectionMetadata, chunk: &Chunk) -> Result<(), StoreError> {
        if !chunk.embeddings.has_any() {
            return Err(StoreError::InvalidChunk(format!(
                "chunk '{}' has neither dense nor sparse embedding",
                chunk.chunk_name
            )));
        }
        if let Some(dense) = &chunk.embeddings.dense {
            if dense.len() != metadata.dense_dimension {
                return Err(StoreError::DimensionMismatch {
                    collection: metadata.project_name.clone(),
                    stored: metadata.dense_dimension,
                    configured: dense.len(),
                });
            }
        }
        if let Some(sparse) = &chunk.embeddings.sparse {
            if !sparse.is_valid() {
                return Err(StoreError::InvalidChunk(format!(
                    "chunk '{}' has an invalid sparse vector",
                    chunk.chunk_name
                )));
            }
        }
        if chunk.line_start > chunk.line_end {
            return Err(StoreError::InvalidChunk(format!(
                "chunk '{}' has line_start > line_end",
                chunk.chunk_name
            )));
        }
        Ok(())
    }

    fn filter_matches(filter: &SearchFilter, globs: Option<&GlobSet>, chunk: &Chunk) -> bool {
        if let Some(globs) = globs {
            if !globs.is_match(&chunk.file_path) {
                return false;
            }
        }
        if !filter.languages.is_empty() && !filter.languages.contains(&chunk.language) {
            return false;
        }
        if let Some((start, end)) = filter.line_range {
            if chunk.line_end < start || chunk.line_start > end {
                return false;
            }
        }
        if let Some(complete) = filter.embedding_complete {
            if chunk.metadata.embedding_complete != complete {
                return false;
            }
        }
        if !filter.commit_hashes.is_empty() {
            match &chunk.metadata.git_commit {
                Some(commit) if filter.commit_hashes.contains(commit) => {}
                _ => return false,
            }
        }
        true
    }
}

#[async_trait]
impl VectorStore for MemoryStore {
    fn backend(&self) -> &'static str {
        "memory"
    }

    async fn ensure_collection(
        &self,
        name: &str,
        metadata: &CollectionMetadata,
    ) -> Result<(), StoreError> {
        let mut state = self.state.write().await;
        if let Some(existing) = state.collections.get(name) {
            if existing.metadata.provider != metadata.provider
                || existing.metadata.schema_version != metadata.schema_version
            {
                return Err(StoreError::ProviderSwitch {
                    collection: name.to_string(),
                    existing: existing.metadata.provider.clone(),
                    desired: metadata.provider.clone(),
                });
            }
            if existing.metadata.dense_dimension != metadata.dense_dimension {
                return Err(StoreError::DimensionMismatch {
                    collection: name.to_string(),
                    stored: existing.metadata.dense_dimension,
                    configured: metadata.dense_dimension,
                });
            }
            return Ok(());
        }
        state.collections.insert(
            name.to_string(),
            CollectionData {
                metadata: metadata.clone(),
                points: HashMap::new(),
                soft_cap_logged: false,
            },
        );
        tracing::debug!(collection = name, "created memory collection");
        Ok(())
    }

    async fn upsert(&self, collection: &str, chunks: &[Chunk]) -> Result<(), StoreError> {
        let mut state = self.state.write().await;
        let data = state
            .collections
            .get_mut(collection)
            .ok_or_else(|| StoreError::CollectionMissing(collection.to_string()))?;

        // Validate the whole batch before touching the map so a bad chunk
        // cannot leave a half-applied batch behind.
        for chunk in chunks {
            Self::validate_chunk(&data.metadata, chunk)?;
        }
        for chunk in chunks {
            data.points.insert(chunk.chunk_id, chunk.clone());
        }
        if data.points.len() > SOFT_CAP_CHUNKS && !data.soft_cap_logged {
            data.soft_cap_logged = true;
            tracing::warn!(
                collection,
                chunks = data.points.len(),
                "memory store exceeds the soft cap; consider the qdrant backend"
            );
        }
        Ok(())
    }

    async fn delete_by_file(&self, collection: &str, file_path: &str) -> Result<u64, StoreError> {
        let mut state = self.state.write().await;
        let data = state
            .collections
            .get_mut(collection)
            .ok_or_else(|| StoreError::CollectionMissing(collection.to_string()))?;
        let before = data.points.len();
        data.points.retain(|_, chunk| chunk.file_path != file_path);
        Ok((before - data.points.len()) as u64)
    }

    async fn delete_by_ids(&self, collection: &str, ids: &[Uuid]) -> Result<u64, StoreError> {
        let mut state = self.state.write().await;
        let data = state
            .collections
            .get_mut(collection)
            .ok_or_else(|| StoreError::CollectionMissing(collection.to_string()))?;
        let mut deleted = 0;
        for id in ids {
            if data.points.remove(id).is_some() {
                deleted += 1;
            }
        }
        Ok(deleted)
    }

    async fn delete_by_names(
        &self,
        collection: &str,
        names: &[String],
    ) -> Result<u64, StoreError> {
        let mut state = self.state.write().await;
        let data = state
            .collections
            .get_mut(collection)
            .ok_or_else(|| StoreError::CollectionMissing(collection.to_string()))?;
        let before = data.points.len();
        data.points
            .retain(|_, chunk| !names.contains(&chunk.chunk_name));
        Ok((before - data.points.len()) as u64)
    }

    async fn ids_by_file(
        &self,
        collection: &str,
        file_path: &str,
    ) -> Result<Vec<Uuid>, StoreError> {
        let state = self.state.read().await;
        let data = state
            .collections
            .get(collection)
            .ok_or_else(|| StoreError::CollectionMissing(collection.to_string()))?;
        let mut ids: Vec<Uuid> = data
            .points
            .values()
            .filter(|chunk| chunk.file_path == file_path)
            .map(|chunk| chunk.chunk_id)
            .collect();
        ids.sort();
        Ok(ids)
    }

    async fn move_file(&self, collection: &str, from: &str, to: &str) -> Result<u64, StoreError> {
        let mut state = self.state.write().await;
        let data = state
            .collections
            .get_mut(collection)
            .ok_or_else(|| StoreError::CollectionMissing(collection.to_string()))?;

        let old_ids: Vec<Uuid> = data
            .points
            .values()
            .filter(|chunk| chunk.file_path == from)
            .map(|chunk| chunk.chunk_id)
            .collect();
        let mut moved = 0u64;
        for id in old_ids {
            let Some(mut chunk) = data.points.remove(&id) else {
                continue;
            };
            let content_hash = crate::types::FileRecord::compute_hash(&chunk.content);
            let suffix = chunk
                .chunk_name
                .strip_prefix(&format!("{from}:"))
                .unwrap_or(&chunk.chunk_name)
                .to_string();
            chunk.file_path = to.to_string();
            chunk.chunk_name = format!("{to}:{suffix}");
            chunk.chunk_id =
                Chunk::derive_id(to, &content_hash, chunk.line_start, chunk.line_end);
            data.points.insert(chunk.chunk_id, chunk);
            moved += 1;
        }
        Ok(moved)
    }

    async fn search(
        &self,
        collection: &str,
        vectors: &QueryVectors,
        filter: &SearchFilter,
        limit: usize,
    ) -> Result<Vec<SearchResult>, StoreError> {
        let mode = vectors
            .mode()
            .ok_or_else(|| StoreError::Backend("search requires at least one vector".into()))?;
        let globs = compile_globs(&filter.path_patterns)?;

        let state = self.state.read().await;
        let data = state
            .collections
            .get(collection)
            .ok_or_else(|| StoreError::CollectionMissing(collection.to_string()))?;

        // Score every matching point per available mode.
        let mut dense_scored: Vec<(Uuid, f32)> = Vec::new();
        let mut sparse_scored: Vec<(Uuid, f32)> = Vec::new();
        for chunk in data.points.values() {
            if !Self::filter_matches(filter, globs.as_ref(), chunk) {
                continue;
            }
            if let (Some(query), Some(stored)) = (&vectors.dense, &chunk.embeddings.dense) {
                let score = cosine_score(query, stored);
                if score > 0.0 {
                    dense_scored.push((chunk.chunk_id, score));
                }
            }
            if let (Some(query), Some(stored)) = (&vectors.sparse, &chunk.embeddings.sparse) {
                let score = sparse_score(query, stored);
                if score > 0.0 {
                    sparse_scored.push((chunk.chunk_id, score));
                }
            }
        }

        let by_rank = |scored: &mut Vec<(Uuid, f32)>| {
            scored.sort_by(|a, b| b.1.partial_cmp(&a.1).unwrap_or(std::cmp::Ordering::Equal));
        };
        by_rank(&mut dense_scored);
        by_rank(&mut sparse_scored);

        let dense_lookup: HashMap<Uuid, f32> = dense_scored.iter().copied().collect();
        let sparse_lookup: HashMap<Uuid, f32> = sparse_scored.iter().copied().collect();

        let ranked: Vec<(Uuid, f32)> = match mode {
            SearchMode::Dense => dense_scored,
            SearchMode::Sparse => sparse_scored,
            SearchMode::Hybrid => {
                let dense_ids: Vec<Uuid> = dense_scored.iter().map(|(id, _)| *id).collect();
                let sparse_ids: Vec<Uuid> = sparse_scored.iter().map(|(id, _)| *id).collect();
                rrf_fuse(&[dense_ids, sparse_ids])
            }
        };

        let mut results: Vec<SearchResult> = ranked
            .into_iter()
            .filter_map(|(id, score)| {
                data.points.get(&id).map(|chunk| SearchResult {
                    chunk: chunk.clone(),
                    score,
                    dense_score: dense_lookup.get(&id).copied(),
                    sparse_score: sparse_lookup.get(&id).copied(),
                    rerank_score: None,
                    search_mode: mode,
                    file_exists: true,
                })
            })
            .collect();
        sort_results(&mut results);
        results.truncate(limit);
        Ok(results)
    }

    async fn list_collections(&self) -> Result<Vec<String>, StoreError> {
        let state = self.state.read().await;
        let mut names: Vec<String> = state.collections.keys().cloned().collect();
        names.sort();
        Ok(names)
    }

    async fn collection_metadata(
        &self,
        collection: &str,
    ) -> Result<Option<CollectionMetadata>, StoreError> {
        let state = self.state.read().await;
        Ok(state
            .collections
            .get(collection)
            .map(|data| data.metadata.clone()))
    }

    async fn healthy(&self) -> bool {
        true
    }

    /// Write a snapshot now. Also the shutdown hook: callers flush before
    /// dropping the store.
    async fn flush(&self) -> Result<(), StoreError> {
        let Some(path) = &self.snapshot_path else {
            return Ok(());
        };
        let state = self.state.read().await;
        Self::write_snapshot(&state, path)
    }
}
