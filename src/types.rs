// Copyright 2026 Layne Penney
// SPDX-License-Identifier: AGPL-3.0-or-later

//! Core data model for the CodeWeaver search core.
//!
//! Everything that crosses a component boundary is a tagged record defined
//! here: chunks and their embeddings, search results and filters, collection
//! metadata, and the `find_code` request/response shapes.

use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use uuid::Uuid;

/// UUIDv5 namespace for chunk identity. Never change this value; chunk ids
/// derived under a different namespace would orphan every stored point.
pub const CHUNK_ID_NAMESPACE: Uuid = Uuid::from_u128(0x6d1f_a3c2_9b4e_4f08_8a71_2c5d_e904_13b7);

/// Schema version written into collection metadata and snapshots.
pub const SCHEMA_VERSION: &str = "1";

/// Identity of an indexed repository root.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RepositoryDescriptor {
    /// Absolute path of the repository root.
    pub root: PathBuf,
    /// Project name; defaults to the root's basename.
    pub project_name: String,
}

impl RepositoryDescriptor {
    /// Create a descriptor, deriving the project name from the root basename.
    pub fn from_root(root: impl Into<PathBuf>) -> Self {
        let root = root.into();
        let project_name = root
            .file_name()
            .and_then(|n| n.to_str())
            .unwrap_or("repository")
            .to_string();
        Self { root, project_name }
    }

    /// Stable collection name derived from the project name.
    ///
    /// Lowercased with non-alphanumerics folded to `-` so the same project
    /// always maps to the same collection regardless of filesystem quirks.
    pub fn collection_name(&self) -> String {
        let mut name = String::with_capacity(self.project_name.len());
        let mut prev_dash = false;
        for ch in self.project_name.chars() {
            if ch.is_ascii_alphanumeric() {
                name.push(ch.to_ascii_lowercase());
                prev_dash = false;
            } else if !prev_dash && !name.is_empty() {
                name.push('-');
                prev_dash = true;
            }
        }
        while name.ends_with('-') {
            name.pop();
        }
        if name.is_empty() {
            name.push_str("repository");
        }
        name
    }
}

/// Kind of filesystem change reported by the watcher.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FileChangeKind {
    Created,
    Modified,
    Deleted,
    /// The file moved; `from` is the previous repo-relative path.
    Moved { from: PathBuf },
}

/// A debounced filesystem change event.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileChangeEvent {
    /// Repo-relative path of the affected file.
    pub path: PathBuf,
    pub kind: FileChangeKind,
}

/// One discovered file.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FileRecord {
    /// Repo-relative path.
    pub path: PathBuf,
    /// Detected language tag (e.g. "rust", "python", "unknown").
    pub language: String,
    /// Size in bytes.
    pub size: u64,
    /// Last modification time.
    pub modified: DateTime<Utc>,
    /// Content hash; computed lazily on demand by the indexer.
    pub hash: Option<String>,
}

impl FileRecord {
    /// Compute the SHA-256 content hash used for change and move detection.
    pub fn compute_hash(content: &str) -> String {
        let mut hasher = Sha256::new();
        hasher.update(content.as_bytes());
        format!("{:x}", hasher.finalize())
    }
}

/// Structural classification of a chunk.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChunkKind {
    /// Function, method, class, struct, or other body-carrying definition.
    Definition,
    /// Signature-only or type-level declaration (trait, interface, constant).
    Declaration,
    /// Documentation or comment block.
    CommentBlock,
    /// Import / use / include group.
    Import,
    Other,
}

impl ChunkKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Definition => "definition",
            Self::Declaration => "declaration",
            Self::CommentBlock => "comment_block",
            Self::Import => "import",
            Self::Other => "other",
        }
    }

    pub fn parse(s: &str) -> Self {
        match s {
            "definition" => Self::Definition,
            "declaration" => Self::Declaration,
            "comment_block" => Self::CommentBlock,
            "import" => Self::Import,
            _ => Self::Other,
        }
    }
}

impl std::fmt::Display for ChunkKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Sparse embedding as parallel index/value arrays.
///
/// Indices are strictly increasing and `indices.len() == values.len()`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub struct SparseVector {
    pub indices: Vec<u32>,
    pub values: Vec<f32>,
}

impl SparseVector {
    /// Build a sparse vector, sorting by index and merging duplicates by sum.
    pub fn new(pairs: impl IntoIterator<Item = (u32, f32)>) -> Self {
        let mut pairs: Vec<(u32, f32)> = pairs.into_iter().collect();
        pairs.sort_by_key(|(i, _)| *i);
        let mut indices = Vec::with_capacity(pairs.len());
        let mut values: Vec<f32> = Vec::with_capacity(pairs.len());
        for (i, v) in pairs {
            if indices.last() == Some(&i) {
                *values.last_mut().unwrap() += v;
            } else {
                indices.push(i);
                values.push(v);
            }
        }
        Self { indices, values }
    }

    pub fn is_empty(&self) -> bool {
        self.indices.is_empty()
    }

    /// Whether the invariant holds: equal lengths, strictly increasing indices.
    pub fn is_valid(&self) -> bool {
        self.indices.len() == self.values.len()
            && self.indices.windows(2).all(|w| w[0] < w[1])
    }

    /// Dot product against another sparse vector (both index-sorted).
    pub fn dot(&self, other: &SparseVector) -> f32 {
        let mut sum = 0.0;
        let (mut a, mut b) = (0, 0);
        while a < self.indices.len() && b < other.indices.len() {
            match self.indices[a].cmp(&other.indices[b]) {
                std::cmp::Ordering::Less => a += 1,
                std::cmp::Ordering::Greater => b += 1,
                std::cmp::Ordering::Equal => {
                    sum += self.values[a] * other.values[b];
                    a += 1;
                    b += 1;
                }
            }
        }
        sum
    }

    /// Euclidean norm of the value array.
    pub fn norm(&self) -> f32 {
        self.values.iter().map(|v| v * v).sum::<f32>().sqrt()
    }
}

/// Dense and/or sparse embeddings attached to a chunk.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub struct ChunkEmbeddings {
    pub dense: Option<Vec<f32>>,
    pub sparse: Option<SparseVector>,
}

impl ChunkEmbeddings {
    /// At least one representation present, the minimum for upsert.
    pub fn has_any(&self) -> bool {
        self.dense.is_some() || self.sparse.is_some()
    }

    /// Both representations present.
    pub fn is_complete(&self) -> bool {
        self.dense.is_some() && self.sparse.is_some()
    }
}

/// Indexing metadata attached to a chunk.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChunkMetadata {
    /// True iff both dense and sparse embeddings are present.
    pub embedding_complete: bool,
    pub indexed_at: DateTime<Utc>,
    pub git_commit: Option<String>,
    /// Tag of the provider configuration that produced the embeddings.
    pub provider: String,
}

impl Default for ChunkMetadata {
    fn default() -> Self {
        Self {
            embedding_complete: false,
            indexed_at: Utc::now(),
            git_commit: None,
            provider: String::new(),
        }
    }
}

/// The atomic unit of indexing: a contiguous, non-overlapping segment of a
/// source file with enough metadata for retrieval.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Chunk {
    /// Stable UUIDv5 over `(file_path, content_hash, line_start, line_end)`.
    pub chunk_id: Uuid,
    /// Qualified identifier: file path plus symbol or section label.
    pub chunk_name: String,
    /// Repo-relative path of the source file.
    pub file_path: String,
    pub language: String,
    /// 1-based inclusive line span; `line_start <= line_end`.
    pub line_start: u32,
    pub line_end: u32,
    /// Exact source text, no normalization.
    pub content: String,
    pub kind: ChunkKind,
    #[serde(default)]
    pub embeddings: ChunkEmbeddings,
    #[serde(default)]
    pub metadata: ChunkMetadata,
}

impl Chunk {
    /// Create a chunk with a derived id. `label` is the symbol name when the
    /// chunker recognized one, otherwise a positional section label is used.
    pub fn new(
        file_path: impl Into<String>,
        language: impl Into<String>,
        line_start: u32,
        line_end: u32,
        content: impl Into<String>,
        kind: ChunkKind,
        label: Option<&str>,
    ) -> Self {
        debug_assert!(line_start <= line_end, "line_start must not exceed line_end");
        let file_path = file_path.into();
        let content = content.into();
        let content_hash = FileRecord::compute_hash(&content);
        let chunk_id = Self::derive_id(&file_path, &content_hash, line_start, line_end);
        let chunk_name = match label {
            Some(symbol) => format!("{file_path}:{symbol}"),
            None => format!("{file_path}:L{line_start}-L{line_end}"),
        };
        Self {
            chunk_id,
            chunk_name,
            file_path,
            language: language.into(),
            line_start,
            line_end,
            content,
            kind,
            embeddings: ChunkEmbeddings::default(),
            metadata: ChunkMetadata::default(),
        }
    }

    /// Derive the stable chunk id. Re-indexing identical bytes at the same
    /// location always yields the same id.
    pub fn derive_id(file_path: &str, content_hash: &str, line_start: u32, line_end: u32) -> Uuid {
        let seed = format!("{file_path}\u{1f}{content_hash}\u{1f}{line_start}\u{1f}{line_end}");
        Uuid::new_v5(&CHUNK_ID_NAMESPACE, seed.as_bytes())
    }

    /// Number of lines covered by this chunk.
    pub fn line_count(&self) -> u32 {
        self.line_end.saturating_sub(self.line_start) + 1
    }
}

/// Which vector spaces a search consulted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SearchMode {
    Dense,
    Sparse,
    Hybrid,
}

impl SearchMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Dense => "dense",
            Self::Sparse => "sparse",
            Self::Hybrid => "hybrid",
        }
    }
}

impl std::fmt::Display for SearchMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// One ranked retrieval hit.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SearchResult {
    pub chunk: Chunk,
    /// Final score in [0, 1].
    pub score: f32,
    /// Per-stage sub-scores, present when the stage ran.
    pub dense_score: Option<f32>,
    pub sparse_score: Option<f32>,
    pub rerank_score: Option<f32>,
    pub search_mode: SearchMode,
    /// Whether the referenced file still exists on disk. Populated by the
    /// query pipeline; backends leave it `true`.
    pub file_exists: bool,
}

/// Conjunction of optional filter clauses. Empty clauses match everything;
/// populated clauses are AND-combined.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SearchFilter {
    /// Glob patterns matched against the repo-relative file path.
    pub path_patterns: Vec<String>,
    /// Language tags; a chunk matches if its language is in the set.
    pub languages: Vec<String>,
    /// Inclusive line range that must overlap the chunk's span.
    pub line_range: Option<(u32, u32)>,
    pub embedding_complete: Option<bool>,
    pub commit_hashes: Vec<String>,
}

impl SearchFilter {
    pub fn is_empty(&self) -> bool {
        self.path_patterns.is_empty()
            && self.languages.is_empty()
            && self.line_range.is_none()
            && self.embedding_complete.is_none()
            && self.commit_hashes.is_empty()
    }
}

/// Metadata persisted with a collection; written once at creation and
/// validated on every reopen.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CollectionMetadata {
    /// Tag of the store/embedding provider configuration.
    pub provider: String,
    pub schema_version: String,
    pub created_at: DateTime<Utc>,
    pub dense_dimension: usize,
    pub max_sparse_dimension: u32,
    pub project_name: String,
}

impl CollectionMetadata {
    pub fn new(
        provider: impl Into<String>,
        dense_dimension: usize,
        max_sparse_dimension: u32,
        project_name: impl Into<String>,
    ) -> Self {
        Self {
            provider: provider.into(),
            schema_version: SCHEMA_VERSION.to_string(),
            created_at: Utc::now(),
            dense_dimension,
            max_sparse_dimension,
            project_name: project_name.into(),
        }
    }

    /// Compatibility check against another metadata record. Creation time is
    /// not part of identity.
    pub fn is_compatible_with(&self, other: &CollectionMetadata) -> bool {
        self.provider == other.provider
            && self.schema_version == other.schema_version
            && self.dense_dimension == other.dense_dimension
    }
}

/// Coarse classification of a query's purpose, used to bias ranking.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum QueryIntent {
    Understand,
    Debug,
    Refactor,
    Document,
    #[default]
    Generic,
}

impl QueryIntent {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Understand => "understand",
            Self::Debug => "debug",
            Self::Refactor => "refactor",
            Self::Document => "document",
            Self::Generic => "generic",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "understand" => Some(Self::Understand),
            "debug" => Some(Self::Debug),
            "refactor" => Some(Self::Refactor),
            "document" => Some(Self::Document),
            "generic" => Some(Self::Generic),
            _ => None,
        }
    }
}

impl std::fmt::Display for QueryIntent {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Options accepted by `find_code`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FindOptions {
    /// Maximum number of results to return.
    pub limit: usize,
    /// Explicit intent; derived from the query text when absent.
    pub intent: Option<QueryIntent>,
    /// Include chunks from test paths.
    pub include_tests: bool,
    /// Restrict to these language tags.
    pub languages: Vec<String>,
    /// Restrict to paths matching these globs.
    pub path_filter: Vec<String>,
    /// Token budget for the assembled response.
    pub token_budget: Option<usize>,
    /// Trigger an index prime when the collection does not exist yet.
    pub index_if_needed: bool,
}

impl Default for FindOptions {
    fn default() -> Self {
        Self {
            limit: 10,
            intent: None,
            include_tests: false,
            languages: Vec::new(),
            path_filter: Vec::new(),
            token_budget: None,
            index_if_needed: false,
        }
    }
}

/// File identity within a [`CodeMatch`].
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MatchFile {
    pub path: String,
    pub language: String,
}

/// Matched content within a [`CodeMatch`].
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MatchContent {
    pub text: String,
    pub line_start: u32,
    pub line_end: u32,
    pub kind: ChunkKind,
}

/// One entry in a `find_code` response.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CodeMatch {
    pub file: MatchFile,
    pub content: MatchContent,
    pub score: f32,
}

impl CodeMatch {
    pub fn from_result(result: &SearchResult) -> Self {
        Self {
            file: MatchFile {
                path: result.chunk.file_path.clone(),
                language: result.chunk.language.clone(),
            },
            content: MatchContent {
                text: result.chunk.content.clone(),
                line_start: result.chunk.line_start,
                line_end: result.chunk.line_end,
                kind: result.chunk.kind,
            },
            score: result.score,
        }
    }
}

/// Versioned `find_code` response.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FindResponse {
    pub results: Vec<CodeMatch>,
    pub summary: String,
    pub query_intent: String,
    /// Candidates surviving filters, before the token budget.
    pub total_matches: usize,
    /// Results actually returned after the token budget.
    pub total_results: usize,
    pub token_count: usize,
    pub execution_time_ms: u64,
    pub search_strategy: Vec<String>,
    pub languages_found: Vec<String>,
}

/// Aggregate index statistics for progress rendering.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct IndexStats {
    pub total_files: u32,
    pub total_chunks: u32,
    pub last_indexed: Option<DateTime<Utc>>,
    pub embedding_provider: String,
    pub is_indexing: bool,
    pub retries_pending: u32,
}

/// Progress event emitted during an indexing operation.
#[derive(Debug, Clone)]
pub struct IndexProgress {
    pub current_file: Option<PathBuf>,
    pub files_seen: u32,
    pub chunks_embedded: u32,
    pub chunks_upserted: u32,
    pub retries_pending: u32,
    pub is_complete: bool,
}

/// Whether a repo-relative path looks like test code.
pub fn is_test_path(path: &str) -> bool {
    let lower = path.to_ascii_lowercase();
    let components: Vec<&str> = lower.split(['/', '\\']).collect();
    if components.iter().any(|c| {
        matches!(
            *c,
            "tests" | "test" | "__tests__" | "testdata" | "spec" | "specs"
        )
    }) {
        return true;
    }
    let file = components.last().copied().unwrap_or("");
    file.starts_with("test_")
        || file.contains(".test.")
        || file.contains(".spec.")
        || Path::new(file)
            .file_stem()
            .and_then(|s| s.to_str())
            .is_some_and(|s| s.ends_with("_test") || s.ends_with("_tests"))
}
