// Copyright 2026 Layne Penney
// SPDX-License-Identifier: AGPL-3.0-or-later

//! Configuration surface for the search core.
//!
//! Config *files* and profile presets are loaded by the surrounding
//! application; this module defines the typed settings the core consumes,
//! with serde defaults so partial configurations deserialize cleanly.
//! Credentials are resolved from the environment unless explicitly set.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

/// Environment variable holding the dense-embedding API key.
pub const EMBED_API_KEY_VAR: &str = "CODEWEAVER_EMBED_API_KEY";
/// Environment variable holding the reranker API key.
pub const RERANK_API_KEY_VAR: &str = "CODEWEAVER_RERANK_API_KEY";
/// Environment variable holding the Qdrant URL.
pub const QDRANT_URL_VAR: &str = "QDRANT_URL";
/// Environment variable holding the Qdrant API key.
pub const QDRANT_API_KEY_VAR: &str = "QDRANT_API_KEY";

/// Connection settings accepted by every provider variant.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProviderSettings {
    pub url: Option<String>,
    /// Explicit key; when absent the variant's environment variable is used.
    pub api_key: Option<String>,
    pub model: Option<String>,
    /// Per-call deadline in milliseconds.
    pub timeout_ms: u64,
    /// Bounded retry attempts for transient failures.
    pub max_retries: u32,
}

impl Default for ProviderSettings {
    fn default() -> Self {
        Self {
            url: None,
            api_key: None,
            model: None,
            timeout_ms: 30_000,
            max_retries: 3,
        }
    }
}

impl ProviderSettings {
    /// Resolve the API key: explicit setting first, then the environment.
    pub fn resolve_api_key(&self, env_var: &str) -> Option<String> {
        self.api_key
            .clone()
            .or_else(|| std::env::var(env_var).ok().filter(|v| !v.is_empty()))
    }

    /// Resolve the URL with a fallback default.
    pub fn url_or<'a>(&'a self, default: &'a str) -> &'a str {
        self.url.as_deref().unwrap_or(default)
    }
}

/// Which vector store backend to bind.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StoreBackend {
    Qdrant,
    Memory,
}

impl StoreBackend {
    /// Variant id; also the provider tag recorded in collection metadata.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Qdrant => "qdrant",
            Self::Memory => "memory",
        }
    }
}

/// Embedding pipeline tunables.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PipelineConfig {
    /// Chunks per embed call.
    pub batch_size: usize,
    /// Parallel embed calls in flight.
    pub max_concurrency: usize,
    /// Reject chunks whose dense embedding cannot be produced.
    pub dense_required: bool,
    /// Flush a partial batch after this long without new chunks.
    pub flush_interval_ms: u64,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            batch_size: 32,
            max_concurrency: 4,
            dense_required: false,
            flush_interval_ms: 500,
        }
    }
}

/// Vector store tunables.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoreConfig {
    pub backend: StoreBackend,
    /// Qdrant connection; URL/key fall back to the environment, then
    /// localhost.
    pub qdrant: ProviderSettings,
    /// Snapshot file for the memory backend; defaults under the state dir.
    pub snapshot_path: Option<PathBuf>,
    /// Snapshot interval in seconds; floored at 10.
    pub snapshot_interval_secs: u64,
    /// Points per upsert request.
    pub upsert_batch_size: usize,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            backend: StoreBackend::Memory,
            qdrant: ProviderSettings::default(),
            snapshot_path: None,
            snapshot_interval_secs: 60,
            upsert_batch_size: 64,
        }
    }
}

impl StoreConfig {
    /// Effective snapshot interval; the floor keeps the persistence task from
    /// thrashing the disk.
    pub fn effective_snapshot_interval_secs(&self) -> u64 {
        self.snapshot_interval_secs.max(10)
    }
}

/// Indexer orchestration tunables.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IndexerConfig {
    /// Write a checkpoint after this many completed files.
    pub checkpoint_every_files: usize,
    /// Checkpoint file; defaults under the state dir.
    pub checkpoint_path: Option<PathBuf>,
    /// Debounce window for watch events, per path.
    pub debounce_ms: u64,
    /// Files larger than this are partitioned before chunking.
    pub max_file_size: u64,
}

impl Default for IndexerConfig {
    fn default() -> Self {
        Self {
            checkpoint_every_files: 25,
            checkpoint_path: None,
            debounce_ms: 250,
            max_file_size: 1_048_576,
        }
    }
}

/// Query pipeline tunables.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QueryConfig {
    /// Candidates requested = max(limit * overfetch_factor, k_floor).
    pub overfetch_factor: usize,
    pub k_floor: usize,
    /// Rerank only when at least this many candidates survived filtering.
    pub rerank_threshold: usize,
    /// Token budget applied when the request does not carry one.
    pub default_token_budget: usize,
}

impl Default for QueryConfig {
    fn default() -> Self {
        Self {
            overfetch_factor: 3,
            k_floor: 30,
            rerank_threshold: 5,
            default_token_budget: 4000,
        }
    }
}

/// Top-level configuration for the search core.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct WeaverConfig {
    /// Variant id of the active dense embedder.
    pub dense_variant: String,
    /// Variant id of the active sparse embedder.
    pub sparse_variant: String,
    /// Variant id of the reranker; empty disables reranking.
    pub rerank_variant: String,
    pub dense: ProviderSettings,
    pub sparse: ProviderSettings,
    pub rerank: ProviderSettings,
    pub pipeline: PipelineConfig,
    pub store: StoreConfig,
    pub indexer: IndexerConfig,
    pub query: QueryConfig,
}

impl WeaverConfig {
    /// Defaults: remote dense embedder, local lexical sparse embedder, no
    /// reranker, in-memory store.
    pub fn defaults() -> Self {
        Self {
            dense_variant: "remote-dense".to_string(),
            sparse_variant: "lexical".to_string(),
            rerank_variant: String::new(),
            ..Default::default()
        }
    }

    /// Provider tag recorded in collection metadata and checked on reopen.
    pub fn provider_tag(&self) -> String {
        self.store.backend.as_str().to_string()
    }
}

/// Per-project state directory for snapshots and checkpoints.
///
/// `~/.codeweaver/state/<project>-<hash8>`; the hash disambiguates projects
/// sharing a basename.
pub fn state_dir(project_root: &Path) -> PathBuf {
    let mut hasher = Sha256::new();
    hasher.update(project_root.to_string_lossy().as_bytes());
    let hash = format!("{:x}", hasher.finalize());
    let name = project_root
        .file_name()
        .and_then(|n| n.to_str())
        .unwrap_or("repository");
    dirs::home_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join(".codeweaver")
        .join("state")
        .join(format!("{}-{}", name, &hash[..8]))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = WeaverConfig::defaults();
        assert_eq!(config.dense_variant, "remote-dense");
        assert_eq!(config.sparse_variant, "lexical");
        assert!(config.rerank_variant.is_empty());
        assert_eq!(config.pipeline.batch_size, 32);
        assert_eq!(config.store.upsert_batch_size, 64);
        assert_eq!(config.query.overfetch_factor, 3);
    }

    #[test]
    fn test_snapshot_interval_floor() {
        let mut store = StoreConfig {
            snapshot_interval_secs: 3,
            ..Default::default()
        };
        assert_eq!(store.effective_snapshot_interval_secs(), 10);
        store.snapshot_interval_secs = 120;
        assert_eq!(store.effective_snapshot_interval_secs(), 120);
    }

    #[test]
    fn test_provider_settings_explicit_key_wins() {
        let settings = ProviderSettings {
            api_key: Some("explicit".to_string()),
            ..Default::default()
        };
        assert_eq!(
            settings.resolve_api_key("CODEWEAVER_TEST_UNSET_KEY"),
            Some("explicit".to_string())
        );
    }

    #[test]
    fn test_state_dir_distinguishes_roots() {
        let a = state_dir(Path::new("/work/app"));
        let b = state_dir(Path::new("/other/app"));
        assert_ne!(a, b);
        assert!(a.to_string_lossy().contains("app-"));
    }

    #[test]
    fn test_partial_config_deserializes() {
        let config: WeaverConfig = serde_json::from_str(r#"{"dense_variant":"remote-dense"}"#)
            .expect("partial config should deserialize");
        assert_eq!(config.pipeline.max_concurrency, 4);
        assert_eq!(config.store.backend, StoreBackend::Memory);
    }
}
