// Copyright 2026 Layne Penney
// SPDX-License-Identifier: AGPL-3.0-or-later

//! Qdrant vector store backend.
//!
//! Named vectors `dense` (cosine) and `sparse` are declared at collection
//! creation; chunk payloads carry the full metadata with keyword indexes on
//! the hot filter fields. Collection metadata lives on a sentinel point that
//! every search excludes; `ensure_collection` reads it back and refuses to
//! reuse a collection created under a different provider configuration.
//!
//! Hybrid fusion runs client-side with the shared RRF helper so this backend
//! ranks identically to the in-memory one; sparse-only queries go through
//! the modern `query` API with `using("sparse")`.

use std::collections::HashMap;

use async_trait::async_trait;
use globset::GlobSet;
use qdrant_client::qdrant::{
    Condition, CreateCollectionBuilder, CreateFieldIndexCollectionBuilder, DeletePointsBuilder,
    Distance, FieldType, Filter, PointId, PointStruct, PointsIdsList, Query, QueryPointsBuilder,
    Range, ScoredPoint, ScrollPointsBuilder, SparseVectorParamsBuilder,
    SparseVectorsConfigBuilder, UpsertPointsBuilder, Value, Vector, VectorInput,
    VectorParamsBuilder, VectorsConfigBuilder,
};
use qdrant_client::{Payload, Qdrant};
use uuid::Uuid;

use crate::config::{ProviderSettings, QDRANT_API_KEY_VAR, QDRANT_URL_VAR};
use crate::error::StoreError;
use crate::types::{
    Chunk, ChunkEmbeddings, ChunkKind, ChunkMetadata, CollectionMetadata, SearchFilter,
    SearchMode, SearchResult, SparseVector,
};

use super::{rrf_fuse, sort_results, QueryVectors, VectorStore};

const DEFAULT_URL: &str = "http://localhost:6334";
const DENSE_VECTOR: &str = "dense";
const SPARSE_VECTOR: &str = "sparse";

/// Payload marker and fixed id for the metadata sentinel point.
const META_MARKER_KEY: &str = "point_kind";
const META_MARKER: &str = "meta";
const META_POINT_ID: Uuid = Uuid::from_u128(0x0000_0000_0000_0000_0000_0000_0000_0001);

/// Qdrant-backed vector store.
pub struct QdrantStore {
    client: Qdrant,
    upsert_batch_size: usize,
    wait_writes: std::sync::atomic::AtomicBool,
}

impl QdrantStore {
    /// Connect using settings, falling back to `QDRANT_URL` / `QDRANT_API_KEY`
    /// from the environment and finally localhost.
    pub fn connect(settings: &ProviderSettings, upsert_batch_size: usize) -> Result<Self, StoreError> {
        let url = settings
            .url
            .clone()
            .or_else(|| std::env::var(QDRANT_URL_VAR).ok().filter(|v| !v.is_empty()))
            .unwrap_or_else(|| DEFAULT_URL.to_string());

        let mut builder = Qdrant::from_url(&url)
            .timeout(std::time::Duration::from_millis(settings.timeout_ms));
        if let Some(key) = settings.resolve_api_key(QDRANT_API_KEY_VAR) {
            builder = builder.api_key(key);
        }
        let client = builder
            .build()
            .map_err(|e| StoreError::Backend(format!("qdrant connect {url}: {e}")))?;

        Ok(Self {
            client,
            upsert_batch_size: upsert_batch_size.max(1),
            wait_writes: std::sync::atomic::AtomicBool::new(true),
        })
    }

    fn wait(&self) -> bool {
        self.wait_writes.load(std::sync::atomic::Ordering::Relaxed)
    }

    fn map_err(context: &str, err: qdrant_client::QdrantError) -> StoreError {
        let text = err.to_string();
        if text.contains("Deadline") || text.contains("timed out") || text.contains("timeout") {
            StoreError::Timeout(0)
        } else {
            StoreError::Backend(format!("{context}: {text}"))
        }
    }

    /// Server-side filter from the pushdown-able clauses. Path globs are
    /// applied client-side after retrieval; the sentinel is always excluded.
    fn build_filter(filter: &SearchFilter) -> Filter {
        let mut must: Vec<Condition> = Vec::new();
        if !filter.languages.is_empty() {
            must.push(Condition::matches("language", filter.languages.clone()));
        }
        if let Some(complete) = filter.embedding_complete {
            must.push(Condition::matches("embedding_complete", complete));
        }
        if !filter.commit_hashes.is_empty() {
            must.push(Condition::matches("git_commit", filter.commit_hashes.clone()));
        }
        if let Some((start, end)) = filter.line_range {
            // Overlap: chunk.line_start <= end && chunk.line_end >= start.
            must.push(Condition::range(
                "line_start",
                Range {
                    lte: Some(f64::from(end)),
                    ..Default::default()
                },
            ));
            must.push(Condition::range(
                "line_end",
                Range {
                    gte: Some(f64::from(start)),
                    ..Default::default()
                },
            ));
        }
        Filter {
            must,
            must_not: vec![Condition::matches(META_MARKER_KEY, META_MARKER.to_string())],
            ..Default::default()
        }
    }

    fn chunk_payload(chunk: &Chunk) -> Result<Payload, StoreError> {
        let json = serde_json::json!({
            "chunk_name": chunk.chunk_name,
            "file_path": chunk.file_path,
            "language": chunk.language,
            "line_start": chunk.line_start,
            "line_end": chunk.line_end,
            "content": chunk.content,
            "kind": chunk.kind.as_str(),
            "embedding_complete": chunk.metadata.embedding_complete,
            "indexed_at": chunk.metadata.indexed_at.to_rfc3339(),
            "provider": chunk.metadata.provider,
            "git_commit": chunk.metadata.git_commit,
        });
        Payload::try_from(json)
            .map_err(|e| StoreError::Backend(format!("payload for '{}': {e}", chunk.chunk_name)))
    }

    fn chunk_point(chunk: &Chunk) -> Result<PointStruct, StoreError> {
        let mut vectors: HashMap<String, Vector> = HashMap::new();
        if let Some(dense) = &chunk.embeddings.dense {
            vectors.insert(DENSE_VECTOR.to_string(), Vector::new_dense(dense.clone()));
        }
        if let Some(sparse) = &chunk.embeddings.sparse {
            vectors.insert(
                SPARSE_VECTOR.to_string(),
                Vector::new_sparse(sparse.indices.clone(), sparse.values.clone()),
            );
        }
        if vectors.is_empty() {
            return Err(StoreError::InvalidChunk(format!(
                "chunk '{}' has neither dense nor sparse embedding",
                chunk.chunk_name
            )));
        }
        Ok(PointStruct::new(
            chunk.chunk_id.to_string(),
            vectors,
            Self::chunk_payload(chunk)?,
        ))
    }

    fn payload_str(payload: &HashMap<String, Value>, key: &str) -> Option<String> {
        payload
            .get(key)
            .and_then(|v| serde_json::Value::from(v.clone()).as_str().map(String::from))
    }

    fn payload_u32(payload: &HashMap<String, Value>, key: &str) -> Option<u32> {
        payload
            .get(key)
            .and_then(|v| serde_json::Value::from(v.clone()).as_u64())
            .and_then(|v| u32::try_from(v).ok())
    }

    fn payload_bool(payload: &HashMap<String, Value>, key: &str) -> Option<bool> {
        payload
            .get(key)
            .and_then(|v| serde_json::Value::from(v.clone()).as_bool())
    }

    /// Rebuild a chunk from a scored point's payload. Stored vectors are not
    /// read back; retrieval only needs payload and scores.
    fn point_to_chunk(point: &ScoredPoint) -> Option<Chunk> {
        let id = match point.id.as_ref()?.point_id_options.as_ref()? {
            qdrant_client::qdrant::point_id::PointIdOptions::Uuid(s) => Uuid::parse_str(s).ok()?,
            qdrant_client::qdrant::point_id::PointIdOptions::Num(_) => return None,
        };
        let payload = &point.payload;
        let indexed_at = Self::payload_str(payload, "indexed_at")
            .and_then(|s| chrono::DateTime::parse_from_rfc3339(&s).ok())
            .map(|t| t.with_timezone(&chrono::Utc))
            .unwrap_or_else(chrono::Utc::now);
        Some(Chunk {
            chunk_id: id,
            chunk_name: Self::payload_str(payload, "chunk_name")?,
            file_path: Self::payload_str(payload, "file_path")?,
            language: Self::payload_str(payload, "language").unwrap_or_default(),
            line_start: Self::payload_u32(payload, "line_start").unwrap_or(1),
            line_end: Self::payload_u32(payload, "line_end").unwrap_or(1),
            content: Self::payload_str(payload, "content").unwrap_or_default(),
            kind: ChunkKind::parse(
                &Self::payload_str(payload, "kind").unwrap_or_else(|| "other".to_string()),
            ),
            embeddings: ChunkEmbeddings::default(),
            metadata: ChunkMetadata {
                embedding_complete: Self::payload_bool(payload, "embedding_complete")
                    .unwrap_or(false),
                indexed_at,
                git_commit: Self::payload_str(payload, "git_commit"),
                provider: Self::payload_str(payload, "provider").unwrap_or_default(),
            },
        })
    }

    async fn create_payload_indexes(&self, collection: &str) -> Result<(), StoreError> {
        let keyword_fields = ["file_path", "language", "chunk_name"];
        for field in keyword_fields {
            self.client
                .create_field_index(
                    CreateFieldIndexCollectionBuilder::new(collection, field, FieldType::Keyword)
                        .wait(true),
                )
                .await
                .map_err(|e| Self::map_err("create_field_index", e))?;
        }
        self.client
            .create_field_index(
                CreateFieldIndexCollectionBuilder::new(
                    collection,
                    "embedding_complete",
                    FieldType::Bool,
                )
                .wait(true),
            )
            .await
            .map_err(|e| Self::map_err("create_field_index", e))?;
        Ok(())
    }

    async fn write_metadata_sentinel(
        &self,
        collection: &str,
        metadata: &CollectionMetadata,
    ) -> Result<(), StoreError> {
        let json = serde_json::json!({
            META_MARKER_KEY: META_MARKER,
            "metadata": serde_json::to_value(metadata)
                .map_err(|e| StoreError::Backend(format!("serialize metadata: {e}")))?,
        });
        let payload = Payload::try_from(json)
            .map_err(|e| StoreError::Backend(format!("metadata payload: {e}")))?;
        let mut vectors: HashMap<String, Vector> = HashMap::new();
        vectors.insert(
            DENSE_VECTOR.to_string(),
            Vector::new_dense(vec![0.0; metadata.dense_dimension]),
        );
        let point = PointStruct::new(META_POINT_ID.to_string(), vectors, payload);
        self.client
            .upsert_points(UpsertPointsBuilder::new(collection, vec![point]).wait(true))
            .await
            .map_err(|e| Self::map_err("write metadata", e))?;
        Ok(())
    }

    async fn read_metadata_sentinel(
        &self,
        collection: &str,
    ) -> Result<Option<CollectionMetadata>, StoreError> {
        let response = self
            .client
            .scroll(
                ScrollPointsBuilder::new(collection)
                    .filter(Filter::must([Condition::matches(
                        META_MARKER_KEY,
                        META_MARKER.to_string(),
                    )]))
                    .limit(1)
                    .with_payload(true),
            )
            .await
            .map_err(|e| Self::map_err("read metadata", e))?;

        let Some(point) = response.result.into_iter().next() else {
            return Ok(None);
        };
        let Some(value) = point.payload.get("metadata") else {
            return Ok(None);
        };
        let json = serde_json::Value::from(value.clone());
        serde_json::from_value(json)
            .map(Some)
            .map_err(|e| StoreError::Backend(format!("parse collection metadata: {e}")))
    }

    /// One single-mode ranking via the query API.
    async fn query_mode(
        &self,
        collection: &str,
        vector: VectorInput,
        using: &str,
        filter: Filter,
        limit: usize,
    ) -> Result<Vec<ScoredPoint>, StoreError> {
        let response = self
            .client
            .query(
                QueryPointsBuilder::new(collection)
                    .query(Query::new_nearest(vector))
                    .using(using)
                    .filter(filter)
                    .limit(limit as u64)
                    .with_payload(true),
            )
            .await
            .map_err(|e| Self::map_err("query", e))?;
        Ok(response.result)
    }

    fn glob_match(globs: Option<&GlobSet>, path: &str) -> bool {
        globs.is_none_or(|g| g.is_match(path))
    }
}

#[async_trait]
impl VectorStore for QdrantStore {
    fn backend(&self) -> &'static str {
        "qdrant"
    }

    fn set_write_durability(&self, wait: bool) {
        self.wait_writes
            .store(wait, std::sync::atomic::Ordering::Relaxed);
    }

    async fn ensure_collection(
        &self,
        name: &str,
        metadata: &CollectionMetadata,
    ) -> Result<(), StoreError> {
        let exists = self
            .client
            .collection_exists(name)
            .await
            .map_err(|e| Self::map_err("collection_exists", e))?;

        if exists {
            let stored = self.read_metadata_sentinel(name).await?.ok_or_else(|| {
                StoreError::Backend(format!(
                    "collection '{name}' exists but carries no metadata sentinel"
                ))
            })?;
            if stored.provider != metadata.provider
                || stored.schema_version != metadata.schema_version
            {
                return Err(StoreError::ProviderSwitch {
                    collection: name.to_string(),
                    existing: stored.provider,
                    desired: metadata.provider.clone(),
                });
            }
            if stored.dense_dimension != metadata.dense_dimension {
                return Err(StoreError::DimensionMismatch {
                    collection: name.to_string(),
                    stored: stored.dense_dimension,
                    configured: metadata.dense_dimension,
                });
            }
            return Ok(());
        }

        let mut vectors_config = VectorsConfigBuilder::default();
        vectors_config.add_named_vector_params(
            DENSE_VECTOR,
            VectorParamsBuilder::new(metadata.dense_dimension as u64, Distance::Cosine),
        );
        let mut sparse_config = SparseVectorsConfigBuilder::default();
        sparse_config.add_named_vector_params(SPARSE_VECTOR, SparseVectorParamsBuilder::default());

        self.client
            .create_collection(
                CreateCollectionBuilder::new(name)
                    .vectors_config(vectors_config)
                    .sparse_vectors_config(sparse_config),
            )
            .await
            .map_err(|e| Self::map_err("create_collection", e))?;

        self.create_payload_indexes(name).await?;
        self.write_metadata_sentinel(name, metadata).await?;
        tracing::info!(
            collection = name,
            dense_dimension = metadata.dense_dimension,
            "created qdrant collection"
        );
        Ok(())
    }

    async fn upsert(&self, collection: &str, chunks: &[Chunk]) -> Result<(), StoreError> {
        if chunks.is_empty() {
            return Ok(());
        }
        let wait = self.wait();
        for batch in chunks.chunks(self.upsert_batch_size) {
            let points: Vec<PointStruct> = batch
                .iter()
                .map(Self::chunk_point)
                .collect::<Result<_, _>>()?;
            self.client
                .upsert_points(UpsertPointsBuilder::new(collection, points).wait(wait))
                .await
                .map_err(|e| Self::map_err("upsert", e))?;
        }
        Ok(())
    }

    async fn delete_by_file(&self, collection: &str, file_path: &str) -> Result<u64, StoreError> {
        self.client
            .delete_points(
                DeletePointsBuilder::new(collection)
                    .points(Filter::must([Condition::matches(
                        "file_path",
                        file_path.to_string(),
                    )]))
                    .wait(true),
            )
            .await
            .map_err(|e| Self::map_err("delete_by_file", e))?;
        // Qdrant's delete result does not report a count for filter deletes.
        Ok(0)
    }

    async fn delete_by_ids(&self, collection: &str, ids: &[Uuid]) -> Result<u64, StoreError> {
        if ids.is_empty() {
            return Ok(0);
        }
        let point_ids: Vec<PointId> = ids.iter().map(|id| id.to_string().into()).collect();
        self.client
            .delete_points(
                DeletePointsBuilder::new(collection)
                    .points(PointsIdsList { ids: point_ids })
                    .wait(true),
            )
            .await
            .map_err(|e| Self::map_err("delete_by_ids", e))?;
        Ok(ids.len() as u64)
    }

    async fn delete_by_names(
        &self,
        collection: &str,
        names: &[String],
    ) -> Result<u64, StoreError> {
        if names.is_empty() {
            return Ok(0);
        }
        self.client
            .delete_points(
                DeletePointsBuilder::new(collection)
                    .points(Filter::must([Condition::matches(
                        "chunk_name",
                        names.to_vec(),
                    )]))
                    .wait(true),
            )
            .await
            .map_err(|e| Self::map_err("delete_by_names", e))?;
        // Qdrant's delete result does not report a count for filter deletes.
        Ok(0)
    }

    async fn ids_by_file(
        &self,
        collection: &str,
        file_path: &str,
    ) -> Result<Vec<Uuid>, StoreError> {
        let mut ids = Vec::new();
        let mut offset: Option<PointId> = None;
        loop {
            let mut builder = ScrollPointsBuilder::new(collection)
                .filter(Filter::must([Condition::matches(
                    "file_path",
                    file_path.to_string(),
                )]))
                .limit(256)
                .with_payload(false);
            if let Some(from) = offset.take() {
                builder = builder.offset(from);
            }
            let response = self
                .client
                .scroll(builder)
                .await
                .map_err(|e| Self::map_err("ids_by_file", e))?;
            for point in &response.result {
                if let Some(qdrant_client::qdrant::point_id::PointIdOptions::Uuid(s)) =
                    point.id.as_ref().and_then(|i| i.point_id_options.as_ref())
                {
                    if let Ok(id) = Uuid::parse_str(s) {
                        ids.push(id);
                    }
                }
            }
            match response.next_page_offset {
                Some(next) => offset = Some(next),
                None => break,
            }
        }
        ids.sort();
        Ok(ids)
    }

    async fn move_file(&self, collection: &str, from: &str, to: &str) -> Result<u64, StoreError> {
        use qdrant_client::qdrant::vectors_output::VectorsOptions;

        let mut moved_points: Vec<PointStruct> = Vec::new();
        let mut old_ids: Vec<Uuid> = Vec::new();
        let mut offset: Option<PointId> = None;
        loop {
            let mut builder = ScrollPointsBuilder::new(collection)
                .filter(Filter::must([Condition::matches(
                    "file_path",
                    from.to_string(),
                )]))
                .limit(128)
                .with_payload(true)
                .with_vectors(true);
            if let Some(at) = offset.take() {
                builder = builder.offset(at);
            }
            let response = self
                .client
                .scroll(builder)
                .await
                .map_err(|e| Self::map_err("move_file scroll", e))?;

            for point in response.result {
                let Some(qdrant_client::qdrant::point_id::PointIdOptions::Uuid(id_str)) =
                    point.id.as_ref().and_then(|i| i.point_id_options.as_ref())
                else {
                    continue;
                };
                let Ok(old_id) = Uuid::parse_str(id_str) else {
                    continue;
                };

                // Stored vectors carry over untouched; only identity fields
                // in the payload change.
                let mut vectors: HashMap<String, Vector> = HashMap::new();
                if let Some(VectorsOptions::Vectors(named)) =
                    point.vectors.as_ref().and_then(|v| v.vectors_options.as_ref())
                {
                    for (name, vector) in named.vectors.clone() {
                        use qdrant_client::qdrant::vector_output::Vector as VectorOutputInner;
                        let converted = match vector.into_vector() {
                            VectorOutputInner::Dense(v) => Vector::from(v),
                            VectorOutputInner::Sparse(v) => Vector::from(v),
                            VectorOutputInner::MultiDense(v) => Vector::from(v),
                        };
                        vectors.insert(name, converted);
                    }
                }
                if vectors.is_empty() {
                    continue;
                }

                let content = Self::payload_str(&point.payload, "content").unwrap_or_default();
                let line_start = Self::payload_u32(&point.payload, "line_start").unwrap_or(1);
                let line_end = Self::payload_u32(&point.payload, "line_end").unwrap_or(1);
                let old_name =
                    Self::payload_str(&point.payload, "chunk_name").unwrap_or_default();
                let suffix = old_name
                    .strip_prefix(&format!("{from}:"))
                    .unwrap_or(old_name.as_str())
                    .to_string();
                let content_hash = crate::types::FileRecord::compute_hash(&content);
                let new_id = Chunk::derive_id(to, &content_hash, line_start, line_end);

                let mut payload = point.payload.clone();
                payload.insert("file_path".to_string(), Value::from(to.to_string()));
                payload.insert("chunk_name".to_string(), Value::from(format!("{to}:{suffix}")));

                moved_points.push(PointStruct::new(
                    new_id.to_string(),
                    vectors,
                    Payload::from(payload),
                ));
                old_ids.push(old_id);
            }

            match response.next_page_offset {
                Some(next) => offset = Some(next),
                None => break,
            }
        }

        if moved_points.is_empty() {
            return Ok(0);
        }
        let moved = moved_points.len() as u64;
        self.client
            .upsert_points(UpsertPointsBuilder::new(collection, moved_points).wait(true))
            .await
            .map_err(|e| Self::map_err("move_file upsert", e))?;
        self.delete_by_ids(collection, &old_ids).await?;
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
        let server_filter = Self::build_filter(filter);
        let globs = super::compile_globs(&filter.path_patterns)?;
        // Overfetch so client-side glob filtering still fills `limit`.
        let fetch = if filter.path_patterns.is_empty() {
            limit
        } else {
            limit.saturating_mul(4).max(limit)
        };

        let dense_points = match &vectors.dense {
            Some(dense) => {
                self.query_mode(
                    collection,
                    VectorInput::new_dense(dense.clone()),
                    DENSE_VECTOR,
                    server_filter.clone(),
                    fetch,
                )
                .await?
            }
            None => Vec::new(),
        };
        let sparse_points = match &vectors.sparse {
            Some(sparse) => {
                self.query_mode(
                    collection,
                    VectorInput::new_sparse(sparse.indices.clone(), sparse.values.clone()),
                    SPARSE_VECTOR,
                    server_filter,
                    fetch,
                )
                .await?
            }
            None => Vec::new(),
        };

        let mut chunks: HashMap<Uuid, Chunk> = HashMap::new();
        let mut dense_ranked: Vec<(Uuid, f32)> = Vec::new();
        let mut sparse_ranked: Vec<(Uuid, f32)> = Vec::new();
        for point in &dense_points {
            if let Some(chunk) = Self::point_to_chunk(point) {
                if Self::glob_match(globs.as_ref(), &chunk.file_path) {
                    dense_ranked.push((chunk.chunk_id, point.score.clamp(0.0, 1.0)));
                    chunks.entry(chunk.chunk_id).or_insert(chunk);
                }
            }
        }
        for point in &sparse_points {
            if let Some(chunk) = Self::point_to_chunk(point) {
                if Self::glob_match(globs.as_ref(), &chunk.file_path) {
                    sparse_ranked.push((chunk.chunk_id, point.score.clamp(0.0, 1.0)));
                    chunks.entry(chunk.chunk_id).or_insert(chunk);
                }
            }
        }

        let dense_lookup: HashMap<Uuid, f32> = dense_ranked.iter().copied().collect();
        let sparse_lookup: HashMap<Uuid, f32> = sparse_ranked.iter().copied().collect();
        let ranked: Vec<(Uuid, f32)> = match mode {
            SearchMode::Dense => dense_ranked,
            SearchMode::Sparse => sparse_ranked,
            SearchMode::Hybrid => {
                let dense_ids: Vec<Uuid> = dense_ranked.iter().map(|(id, _)| *id).collect();
                let sparse_ids: Vec<Uuid> = sparse_ranked.iter().map(|(id, _)| *id).collect();
                rrf_fuse(&[dense_ids, sparse_ids])
            }
        };

        let mut results: Vec<SearchResult> = ranked
            .into_iter()
            .filter_map(|(id, score)| {
                chunks.get(&id).map(|chunk| SearchResult {
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
        let response = self
            .client
            .list_collections()
            .await
            .map_err(|e| Self::map_err("list_collections", e))?;
        Ok(response
            .collections
            .into_iter()
            .map(|c| c.name)
            .collect())
    }

    async fn collection_metadata(
        &self,
        collection: &str,
    ) -> Result<Option<CollectionMetadata>, StoreError> {
        let exists = self
            .client
            .collection_exists(collection)
            .await
            .map_err(|e| Self::map_err("collection_exists", e))?;
        if !exists {
            return Ok(None);
        }
        self.read_metadata_sentinel(collection).await
    }

    async fn healthy(&self) -> bool {
        self.client.health_check().await.is_ok()
    }
}
