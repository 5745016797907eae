// Copyright 2026 Layne Penney
// SPDX-License-Identifier: AGPL-3.0-or-later

//! End-to-end pipeline tests: prime a scratch repository with stub
//! providers installed through registry overrides, then query it.

use std::path::Path;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;

use codeweaver::config::WeaverConfig;
use codeweaver::embedding::DenseEmbedder;
use codeweaver::error::ProviderError;
use codeweaver::indexer::Indexer;
use codeweaver::query::QueryPipeline;
use codeweaver::registry::{ProviderInstance, Registry};
use codeweaver::store::{MemoryStore, QueryVectors, VectorStore};
use codeweaver::types::{FindOptions, RepositoryDescriptor, SearchFilter};

/// Dense stub that routes texts onto topic axes so retrieval is decidable.
struct TopicDense;

fn topic_vector(text: &str) -> Vec<f32> {
    let t = text.to_lowercase();
    let mut v = vec![0.01; 8];
    if t.contains("auth") || t.contains("login") || t.contains("credential") {
        v[0] = 1.0;
    }
    if t.contains("render") || t.contains("template") || t.contains("html") {
        v[1] = 1.0;
    }
    if t.contains("retry") || t.contains("backoff") {
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
        "topic-8"
    }
    fn dimensions(&self) -> usize {
        8
    }
    async fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, ProviderError> {
        Ok(texts.iter().map(|t| topic_vector(t)).collect())
    }
}

/// Dense stub that fails its first `failures` calls, then behaves.
struct FlakyDense {
    calls: AtomicU32,
    failures: u32,
}

#[async_trait]
impl DenseEmbedder for FlakyDense {
    fn name(&self) -> &str {
        "flaky"
    }
    fn model(&self) -> &str {
        "flaky-8"
    }
    fn dimensions(&self) -> usize {
        8
    }
    async fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, ProviderError> {
        let call = self.calls.fetch_add(1, Ordering::SeqCst);
        if call < self.failures {
            return Err(ProviderError::Network("transient outage".to_string()));
        }
        Ok(texts.iter().map(|t| topic_vector(t)).collect())
    }
}

/// Opt-in test logging: `RUST_LOG=codeweaver=debug cargo test`.
fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .try_init();
}

fn write(root: &Path, rel: &str, content: &str) {
    let path = root.join(rel);
    std::fs::create_dir_all(path.parent().unwrap()).unwrap();
    std::fs::write(path, content).unwrap();
}

fn seed_sources(root: &Path) {
    write(
        root,
        "src/auth.py",
        "def authenticate(credentials):\n    return credentials.login()\n",
    );
    write(
        root,
        "src/render.py",
        "def render(template):\n    return template.html()\n",
    );
    write(
        root,
        "tests/test_auth.py",
        "def test_authenticate():\n    assert login_works()\n",
    );
}

fn registry_with(dense: Arc<dyn DenseEmbedder>, state: &Path) -> Registry {
    let mut config = WeaverConfig::defaults();
    config.indexer.checkpoint_path = Some(state.join("checkpoint.json"));
    config.pipeline.flush_interval_ms = 20;
    let registry = Registry::with_builtins(config);
    registry.set_override(ProviderInstance::Dense(dense));
    registry.set_override(ProviderInstance::Store(Arc::new(MemoryStore::ephemeral())));
    registry
}

#[tokio::test]
async fn prime_then_find_code() {
    init_tracing();
    let repo = tempfile::tempdir().unwrap();
    let state = tempfile::tempdir().unwrap();
    seed_sources(repo.path());

    let registry = registry_with(Arc::new(TopicDense), state.path());
    let indexer =
        Indexer::new(&registry, RepositoryDescriptor::from_root(repo.path())).unwrap();
    let report = indexer.prime(None).await.unwrap();
    assert!(report.files_indexed >= 3);
    assert!(report.chunks_upserted >= 3);

    let pipeline: QueryPipeline = registry.construct().unwrap();
    let response = pipeline
        .find_code(
            "where are login credentials checked",
            repo.path(),
            FindOptions::default(),
        )
        .await;

    assert!(response.total_results >= 1, "{}", response.summary);
    assert_eq!(response.results[0].file.path, "src/auth.py");
    assert_eq!(response.results[0].file.language, "python");
    assert!(response.results[0].score > 0.0);
    assert!(response.token_count > 0);
    assert!(!response.search_strategy.is_empty());
    // Test files stay out without include_tests.
    assert!(response
        .results
        .iter()
        .all(|m| !m.file.path.starts_with("tests/")));
}

#[tokio::test]
async fn find_code_honors_path_and_language_filters() {
    let repo = tempfile::tempdir().unwrap();
    let state = tempfile::tempdir().unwrap();
    seed_sources(repo.path());
    write(
        repo.path(),
        "src/auth.rs",
        "pub fn authenticate(login: &str) -> bool {\n    !login.is_empty()\n}\n",
    );

    let registry = registry_with(Arc::new(TopicDense), state.path());
    let indexer =
        Indexer::new(&registry, RepositoryDescriptor::from_root(repo.path())).unwrap();
    indexer.prime(None).await.unwrap();

    let pipeline: QueryPipeline = registry.construct().unwrap();
    let response = pipeline
        .find_code(
            "authenticate login",
            repo.path(),
            FindOptions {
                languages: vec!["rust".to_string()],
                path_filter: vec!["src/*.rs".to_string()],
                ..Default::default()
            },
        )
        .await;

    assert!(response.total_results >= 1, "{}", response.summary);
    for result in &response.results {
        assert_eq!(result.file.language, "rust");
        assert!(result.file.path.ends_with(".rs"));
    }
}

#[tokio::test]
async fn index_if_needed_primes_on_demand() {
    let repo = tempfile::tempdir().unwrap();
    let state = tempfile::tempdir().unwrap();
    seed_sources(repo.path());

    let registry = registry_with(Arc::new(TopicDense), state.path());
    let indexer = Arc::new(
        Indexer::new(&registry, RepositoryDescriptor::from_root(repo.path())).unwrap(),
    );
    let pipeline: QueryPipeline = registry.construct().unwrap();
    let pipeline = pipeline.with_indexer(Arc::clone(&indexer));

    let response = pipeline
        .find_code(
            "login credentials",
            repo.path(),
            FindOptions {
                index_if_needed: true,
                ..Default::default()
            },
        )
        .await;
    assert!(response.total_results >= 1, "{}", response.summary);
}

#[tokio::test]
async fn transient_dense_outage_converges_via_retry() {
    init_tracing();
    let repo = tempfile::tempdir().unwrap();
    let state = tempfile::tempdir().unwrap();
    write(
        repo.path(),
        "src/worker.py",
        "def retry_with_backoff(task):\n    return task.run()\n",
    );

    // First embed call fails (prime emits sparse-only and queues a retry);
    // the retry worker's attempt succeeds.
    let registry = registry_with(
        Arc::new(FlakyDense {
            calls: AtomicU32::new(0),
            failures: 1,
        }),
        state.path(),
    );
    let indexer =
        Indexer::new(&registry, RepositoryDescriptor::from_root(repo.path())).unwrap();
    let report = indexer.prime(None).await.unwrap();
    assert!(report.retries_pending > 0 || report.chunks_upserted > 0);

    // The background worker completes the dense side and re-upserts.
    let store = registry.resolve_store().unwrap();
    let collection = indexer.collection().to_string();
    let mut complete = false;
    for _ in 0..100 {
        let results = store
            .search(
                &collection,
                &QueryVectors::dense_only(topic_vector("retry backoff")),
                &SearchFilter::default(),
                10,
            )
            .await
            .unwrap();
        if results
            .iter()
            .any(|r| r.chunk.metadata.embedding_complete && r.chunk.file_path == "src/worker.py")
        {
            complete = true;
            break;
        }
        tokio::time::sleep(Duration::from_millis(50)).await;
    }
    assert!(complete, "retry worker should converge to complete embeddings");
    assert_eq!(indexer.retries_pending(), 0);
}

#[tokio::test]
async fn reprime_resumes_from_checkpoint() {
    let repo = tempfile::tempdir().unwrap();
    let state = tempfile::tempdir().unwrap();
    seed_sources(repo.path());

    let registry = registry_with(Arc::new(TopicDense), state.path());
    let indexer =
        Indexer::new(&registry, RepositoryDescriptor::from_root(repo.path())).unwrap();
    let first = indexer.prime(None).await.unwrap();
    assert!(first.files_indexed >= 3);

    // Unchanged repository: everything is skipped, nothing re-embedded.
    let second = indexer.prime(None).await.unwrap();
    assert_eq!(second.files_indexed, 0);
    assert_eq!(second.chunks_upserted, 0);
    assert!(second.files_skipped >= 3);

    // Touch one file; only that file is re-indexed.
    write(
        repo.path(),
        "src/auth.py",
        "def authenticate(credentials):\n    return credentials.verify()\n",
    );
    let third = indexer.prime(None).await.unwrap();
    assert_eq!(third.files_indexed, 1);
    assert!(third.files_skipped >= 2);
}
