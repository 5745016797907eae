// Copyright 2026 Layne Penney
// SPDX-License-Identifier: AGPL-3.0-or-later

//! The `find_code` query pipeline.
//!
//! Embeds the query, runs a hybrid search, filters and reranks candidates,
//! applies intent-based semantic weighting, and assembles a token-budgeted
//! response. This path is read-only and never panics: any stage failure
//! degrades to an empty response whose summary names the failure kind.

mod intent;

use std::path::Path;
use std::sync::Arc;
use std::time::Instant;

use tokio_util::sync::CancellationToken;

pub use intent::{derive_intent, kind_weight};

use crate::config::QueryConfig;
use crate::embedding::{DenseEmbedder, Reranker, SparseEmbedder};
use crate::error::{ErrorKind, ProviderError};
use crate::indexer::Indexer;
use crate::registry::{FromRegistry, Registry};
use crate::store::{QueryVectors, VectorStore};
use crate::tokenizer::{HeuristicTokenizer, TokenCounter};
use crate::types::{
    is_test_path, CodeMatch, FindOptions, FindResponse, QueryIntent, RepositoryDescriptor,
    SearchFilter, SearchResult,
};

/// Read-only query executor over an indexed repository.
pub struct QueryPipeline {
    store: Arc<dyn VectorStore>,
    dense: Arc<dyn DenseEmbedder>,
    sparse: Option<Arc<dyn SparseEmbedder>>,
    reranker: Option<Arc<dyn Reranker>>,
    tokenizer: Arc<dyn TokenCounter>,
    config: QueryConfig,
    /// Optional indexer used for `index_if_needed`; writes stay owned by it.
    indexer: Option<Arc<Indexer>>,
}

impl FromRegistry for QueryPipeline {
    fn construct(registry: &Registry) -> Result<Self, ProviderError> {
        Ok(Self {
            store: registry.resolve_store()?,
            dense: registry.resolve_dense()?,
            sparse: registry.resolve_sparse().ok(),
            reranker: registry.resolve_reranker()?,
            tokenizer: Arc::new(HeuristicTokenizer),
            config: registry.config().query.clone(),
            indexer: None,
        })
    }
}

impl QueryPipeline {
    /// Attach an indexer so `index_if_needed` can prime missing collections.
    pub fn with_indexer(mut self, indexer: Arc<Indexer>) -> Self {
        self.indexer = Some(indexer);
        self
    }

    /// Swap the token counter (the default is the heuristic estimator).
    pub fn with_tokenizer(mut self, tokenizer: Arc<dyn TokenCounter>) -> Self {
        self.tokenizer = tokenizer;
        self
    }

    /// Answer a query against the repository rooted at `cwd`.
    pub async fn find_code(&self, query: &str, cwd: &Path, options: FindOptions) -> FindResponse {
        self.find_code_cancellable(query, cwd, options, &CancellationToken::new())
            .await
    }

    /// `find_code` with cooperative cancellation between stages.
    pub async fn find_code_cancellable(
        &self,
        query: &str,
        cwd: &Path,
        options: FindOptions,
        cancel: &CancellationToken,
    ) -> FindResponse {
        let started = Instant::now();

        let normalized = query.trim();
        let intent = options
            .intent
            .unwrap_or_else(|| derive_intent(normalized));
        if normalized.is_empty() {
            return failure(intent, started, ErrorKind::BadQuery, "query string is empty");
        }

        let descriptor = RepositoryDescriptor::from_root(cwd);
        let collection = descriptor.collection_name();
        match self.store.collection_metadata(&collection).await {
            Ok(Some(_)) => {}
            Ok(None) => {
                if options.index_if_needed {
                    if let Some(indexer) = &self.indexer {
                        if let Err(err) = indexer.prime(None).await {
                            return failure(
                                intent,
                                started,
                                err.kind(),
                                &format!("on-demand indexing failed: {err}"),
                            );
                        }
                    } else {
                        return failure(
                            intent,
                            started,
                            ErrorKind::NotReady,
                            "collection does not exist and no indexer is attached",
                        );
                    }
                } else {
                    return failure(
                        intent,
                        started,
                        ErrorKind::NotReady,
                        &format!("collection '{collection}' has not been indexed"),
                    );
                }
            }
            Err(err) => {
                return failure(intent, started, err.kind(), &err.to_string());
            }
        }
        if cancel.is_cancelled() {
            return failure(intent, started, ErrorKind::Internal, "query cancelled");
        }

        // Embed the query: dense, and sparse when a provider is present.
        // A dense failure degrades to sparse-only rather than failing the
        // whole query.
        let dense_vector = match self.dense.embed_one(normalized).await {
            Ok(vector) => Some(vector),
            Err(err) => {
                tracing::warn!(error = %err, "query dense embedding failed");
                None
            }
        };
        let sparse_vector = match &self.sparse {
            Some(sparse) => match sparse.embed_sparse_one(normalized).await {
                Ok(vector) if !vector.is_empty() => Some(vector),
                Ok(_) => None,
                Err(err) => {
                    tracing::warn!(error = %err, "query sparse embedding failed");
                    None
                }
            },
            None => None,
        };
        let vectors = QueryVectors {
            dense: dense_vector,
            sparse: sparse_vector,
        };
        let Some(mode) = vectors.mode() else {
            return failure(
                intent,
                started,
                ErrorKind::ProviderUnavailable,
                "no embedding provider produced a query vector",
            );
        };
        if cancel.is_cancelled() {
            return failure(intent, started, ErrorKind::Internal, "query cancelled");
        }

        let filter = SearchFilter {
            path_patterns: options.path_filter.clone(),
            languages: options.languages.clone(),
            ..Default::default()
        };
        let limit = options.limit.max(1);
        let k_initial = (limit * self.config.overfetch_factor.max(1)).max(self.config.k_floor);

        let candidates = match self
            .store
            .search(&collection, &vectors, &filter, k_initial)
            .await
        {
            Ok(candidates) => candidates,
            Err(err) => {
                return failure(intent, started, err.kind(), &err.to_string());
            }
        };

        // Drop results whose files vanished and test paths unless requested.
        let mut filtered: Vec<SearchResult> = Vec::with_capacity(candidates.len());
        for mut candidate in candidates {
            if cancel.is_cancelled() {
                return failure(intent, started, ErrorKind::Internal, "query cancelled");
            }
            candidate.file_exists = cwd.join(&candidate.chunk.file_path).exists();
            if !candidate.file_exists {
                continue;
            }
            if !options.include_tests && is_test_path(&candidate.chunk.file_path) {
                continue;
            }
            if !options.languages.is_empty()
                && !options.languages.contains(&candidate.chunk.language)
            {
                continue;
            }
            filtered.push(candidate);
        }

        let mut strategies = vec![mode.as_str().to_string()];
        if let Some(reranker) = &self.reranker {
            if filtered.len() >= self.config.rerank_threshold && !cancel.is_cancelled() {
                let documents: Vec<String> =
                    filtered.iter().map(|r| r.chunk.content.clone()).collect();
                match reranker.rerank(normalized, &documents).await {
                    Ok(scores) => {
                        for (result, score) in filtered.iter_mut().zip(scores) {
                            result.rerank_score = Some(score);
                            result.score = score;
                        }
                        strategies.push("rerank".to_string());
                    }
                    Err(err) => {
                        tracing::warn!(error = %err, "rerank failed; keeping retrieval scores");
                    }
                }
            }
        }

        // Semantic weighting, bounded by the intent table.
        for result in &mut filtered {
            result.score = (result.score * kind_weight(intent, result.chunk.kind)).clamp(0.0, 1.0);
        }
        filtered.sort_by(|a, b| {
            b.score
                .partial_cmp(&a.score)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then_with(|| a.chunk.file_path.cmp(&b.chunk.file_path))
                .then_with(|| a.chunk.line_start.cmp(&b.chunk.line_start))
                .then_with(|| a.chunk.chunk_id.cmp(&b.chunk.chunk_id))
        });
        let total_matches = filtered.len();
        filtered.truncate(limit);

        // Token budget: include top-down, never split a chunk, always keep
        // at least one result when any matched.
        let budget = options
            .token_budget
            .unwrap_or(self.config.default_token_budget)
            .max(1);
        let mut results = Vec::new();
        let mut token_count = 0usize;
        for result in &filtered {
            let cost = self.tokenizer.count(&result.chunk.content);
            if !results.is_empty() && token_count + cost > budget {
                break;
            }
            token_count += cost;
            results.push(CodeMatch::from_result(result));
        }

        let mut languages_found: Vec<String> = results
            .iter()
            .map(|m| m.file.language.clone())
            .collect::<std::collections::BTreeSet<_>>()
            .into_iter()
            .collect();
        languages_found.retain(|l| !l.is_empty());

        let total_results = results.len();
        let summary = if total_results == 0 {
            format!("No matches for '{normalized}'")
        } else {
            format!(
                "Found {total_matches} match{} for '{normalized}', returning {total_results} within budget",
                if total_matches == 1 { "" } else { "es" }
            )
        };

        FindResponse {
            results,
            summary,
            query_intent: intent.as_str().to_string(),
            total_matches,
            total_results,
            token_count,
            execution_time_ms: started.elapsed().as_millis() as u64,
            search_strategy: strategies,
            languages_found,
        }
    }
}

/// Empty response naming the failure kind in the summary.
fn failure(intent: QueryIntent, started: Instant, kind: ErrorKind, detail: &str) -> FindResponse {
    FindResponse {
        results: Vec::new(),
        summary: format!("search failed ({kind}): {detail}"),
        query_intent: intent.as_str().to_string(),
        total_matches: 0,
        total_results: 0,
        token_count: 0,
        execution_time_ms: started.elapsed().as_millis() as u64,
        search_strategy: Vec::new(),
        languages_found: Vec::new(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::WeaverConfig;
    use crate::registry::ProviderInstance;
    use crate::store::MemoryStore;
    use crate::types::{Chunk, ChunkKind, CollectionMetadata, SparseVector};
    use async_trait::async_trait;

    /// Keyword-routed dense stub: queries and chunks about the same topic
    /// land on the same axis.
    struct TopicDense;

    fn topic_vector(text: &str) -> Vec<f32> {
        let t = text.to_lowercase();
        let mut v = vec![0.05; 4];
        if t.contains("auth") || t.contains("login") {
            v[0] = 1.0;
        }
        if t.contains("render") || t.contains("widget") {
            v[1] = 1.0;
        }
        if t.contains("parse") || t.contains("token") {
            v[2] = 1.0;
        }
        v
    }

    #[async_trait]
    impl DenseEmbedder for TopicDense {
        fn name(&self) -> &str {
            "topic"
        }
        fn model(&self) -> &str {
            "topic-4"
        }
        fn dimensions(&self) -> usize {
            4
        }
        async fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, ProviderError> {
            Ok(texts.iter().map(|t| topic_vector(t)).collect())
        }
    }

    struct FixedReranker;

    #[async_trait]
    impl Reranker for FixedReranker {
        fn name(&self) -> &str {
            "fixed-rerank"
        }
        async fn rerank(
            &self,
            _query: &str,
            documents: &[String],
        ) -> Result<Vec<f32>, ProviderError> {
            // Prefer shorter documents, deterministically.
            Ok(documents
                .iter()
                .map(|d| 1.0 / (1.0 + d.len() as f32 / 100.0))
                .collect())
        }
    }

    async fn seed_repo() -> (tempfile::TempDir, Registry, String) {
        let repo = tempfile::tempdir().unwrap();
        let registry = Registry::with_builtins(WeaverConfig::defaults());
        registry.set_override(ProviderInstance::Dense(Arc::new(TopicDense)));
        registry.set_override(ProviderInstance::Store(Arc::new(MemoryStore::ephemeral())));

        let descriptor = RepositoryDescriptor::from_root(repo.path());
        let collection = descriptor.collection_name();
        let store = registry.resolve_store().unwrap();
        store
            .ensure_collection(
                &collection,
                &CollectionMetadata::new("memory", 4, 65_536, &descriptor.project_name),
            )
            .await
            .unwrap();

        // Three source files plus one test file, written to disk so the
        // file-exists filter keeps them.
        let files = [
            ("src/auth.py", "def authenticate(user):\n    return user.token\n", ChunkKind::Definition),
            ("src/render.py", "def render(widget):\n    return widget.html\n", ChunkKind::Definition),
            ("src/auth_notes.py", "# auth login notes for the reviewer\n# keep tokens secret\n", ChunkKind::CommentBlock),
            ("tests/test_auth.py", "def test_authenticate():\n    assert login()\n", ChunkKind::Definition),
        ];
        let mut chunks = Vec::new();
        for (path, content, kind) in files {
            let full = repo.path().join(path);
            std::fs::create_dir_all(full.parent().unwrap()).unwrap();
            std::fs::write(&full, content).unwrap();
            let mut chunk = Chunk::new(
                path,
                "python",
                1,
                2,
                content,
                kind,
                Some(path.rsplit('/').next().unwrap()),
            );
            chunk.embeddings.dense = Some(topic_vector(content));
            chunk.embeddings.sparse = Some(SparseVector::new(vec![(1, 1.0)]));
            chunk.metadata.embedding_complete = true;
            chunks.push(chunk);
        }
        store.upsert(&collection, &chunks).await.unwrap();
        (repo, registry, collection)
    }

    #[tokio::test]
    async fn test_find_code_ranks_topic_matches_first() {
        let (repo, registry, _) = seed_repo().await;
        let pipeline: QueryPipeline = registry.construct().unwrap();

        let response = pipeline
            .find_code("authenticate login flow", repo.path(), FindOptions::default())
            .await;
        assert!(response.total_results >= 1);
        assert!(response.results[0].file.path.contains("auth"));
        assert!(response.search_strategy.contains(&"hybrid".to_string()));
        assert!(!response.languages_found.is_empty());
    }

    #[tokio::test]
    async fn test_test_paths_are_dropped_by_default() {
        let (repo, registry, _) = seed_repo().await;
        let pipeline: QueryPipeline = registry.construct().unwrap();

        let response = pipeline
            .find_code("authenticate login", repo.path(), FindOptions::default())
            .await;
        assert!(response
            .results
            .iter()
            .all(|m| !m.file.path.starts_with("tests/")));

        let with_tests = pipeline
            .find_code(
                "authenticate login",
                repo.path(),
                FindOptions {
                    include_tests: true,
                    ..Default::default()
                },
            )
            .await;
        assert!(with_tests
            .results
            .iter()
            .any(|m| m.file.path.starts_with("tests/")));
    }

    #[tokio::test]
    async fn test_limit_and_sorting() {
        let (repo, registry, _) = seed_repo().await;
        let pipeline: QueryPipeline = registry.construct().unwrap();

        let response = pipeline
            .find_code(
                "auth render parse everything",
                repo.path(),
                FindOptions {
                    limit: 2,
                    ..Default::default()
                },
            )
            .await;
        assert!(response.results.len() <= 2);
        for pair in response.results.windows(2) {
            assert!(pair[0].score >= pair[1].score);
        }
    }

    #[tokio::test]
    async fn test_token_budget_keeps_at_least_one() {
        let (repo, registry, _) = seed_repo().await;
        let pipeline: QueryPipeline = registry.construct().unwrap();

        let response = pipeline
            .find_code(
                "authenticate login",
                repo.path(),
                FindOptions {
                    token_budget: Some(1),
                    ..Default::default()
                },
            )
            .await;
        assert_eq!(response.total_results, 1);
        assert!(response.total_matches >= response.total_results);
    }

    #[tokio::test]
    async fn test_empty_query_is_bad_query() {
        let (repo, registry, _) = seed_repo().await;
        let pipeline: QueryPipeline = registry.construct().unwrap();

        let response = pipeline
            .find_code("   ", repo.path(), FindOptions::default())
            .await;
        assert!(response.results.is_empty());
        assert!(response.summary.contains("bad_query"));
    }

    #[tokio::test]
    async fn test_unindexed_collection_is_not_ready() {
        let registry = Registry::with_builtins(WeaverConfig::defaults());
        registry.set_override(ProviderInstance::Dense(Arc::new(TopicDense)));
        registry.set_override(ProviderInstance::Store(Arc::new(MemoryStore::ephemeral())));
        let pipeline: QueryPipeline = registry.construct().unwrap();

        let dir = tempfile::tempdir().unwrap();
        let response = pipeline
            .find_code("anything", dir.path(), FindOptions::default())
            .await;
        assert!(response.results.is_empty());
        assert_eq!(response.total_matches, 0);
        assert!(response.summary.contains("not_ready"));
    }

    #[tokio::test]
    async fn test_rerank_applies_above_threshold() {
        let (repo, registry, _) = seed_repo().await;
        registry.set_override(ProviderInstance::Rerank(Arc::new(FixedReranker)));
        let mut pipeline: QueryPipeline = registry.construct().unwrap();
        pipeline.config.rerank_threshold = 1;

        let response = pipeline
            .find_code("auth login token", repo.path(), FindOptions::default())
            .await;
        assert!(response.search_strategy.contains(&"rerank".to_string()));
    }

    #[tokio::test]
    async fn test_document_intent_boosts_comment_blocks() {
        let (repo, registry, _) = seed_repo().await;
        let pipeline: QueryPipeline = registry.construct().unwrap();

        let generic = pipeline
            .find_code(
                "auth login",
                repo.path(),
                FindOptions {
                    intent: Some(QueryIntent::Generic),
                    ..Default::default()
                },
            )
            .await;
        let document = pipeline
            .find_code(
                "auth login",
                repo.path(),
                FindOptions {
                    intent: Some(QueryIntent::Document),
                    ..Default::default()
                },
            )
            .await;
        assert_eq!(document.query_intent, "document");

        let rank_of = |resp: &FindResponse, needle: &str| {
            resp.results
                .iter()
                .position(|m| m.file.path.contains(needle))
        };
        let generic_rank = rank_of(&generic, "auth_notes");
        let document_rank = rank_of(&document, "auth_notes");
        if let (Some(g), Some(d)) = (generic_rank, document_rank) {
            assert!(d <= g, "document intent should not demote comment blocks");
        }
    }

    #[tokio::test]
    async fn test_cancellation_returns_early() {
        let (repo, registry, _) = seed_repo().await;
        let pipeline: QueryPipeline = registry.construct().unwrap();

        let cancel = CancellationToken::new();
        cancel.cancel();
        let response = pipeline
            .find_code_cancellable("auth login", repo.path(), FindOptions::default(), &cancel)
            .await;
        assert!(response.results.is_empty());
        assert!(response.summary.contains("cancelled"));
    }
}
