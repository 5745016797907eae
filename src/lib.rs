// Copyright 2026 Layne Penney
// SPDX-License-Identifier: AGPL-3.0-or-later

//! CodeWeaver - semantic code search core.
//!
//! Ingests a source repository, segments it into structurally meaningful
//! chunks, attaches dense and sparse embeddings, stores them in a vector
//! index, and answers ranked retrieval queries over natural-language
//! intents. The CLI, config-file loading, and MCP/HTTP transports live in
//! the surrounding application; this crate is the engine they call.
//!
//! # Architecture
//!
//! The crate is organized into the following modules:
//!
//! - [`types`] - Core data model (Chunk, SearchResult, Filter, metadata)
//! - [`error`] - Error families with stable boundary kinds
//! - [`config`] - Provider settings and crate-wide tunables
//! - [`registry`] - Capability-typed provider registry and DI container
//! - [`discovery`] - Ignore-aware repository walking and watch events
//! - [`chunker`] - AST, delimiter, and sliding segmentation strategies
//! - [`embedding`] - Provider traits, batching pipeline, background retry
//! - [`store`] - Vector store contract with Qdrant and in-memory backends
//! - [`indexer`] - Prime / incremental / watch orchestration
//! - [`query`] - The `find_code` pipeline
//! - [`tokenizer`] - Token counting for response budgets
//!
//! # Data flow
//!
//! ```text
//! Discovery ──> Chunker ──> Embedding pipeline ──> Vector store
//!                                  │ (retry queue)       ▲
//!                                  └── retry worker ─────┘
//!
//! find_code: query ──> embed ──> hybrid search ──> filter ──> rerank
//!                 ──> semantic weighting ──> token budget ──> response
//! ```
//!
//! # Example
//!
//! ```rust,ignore
//! use codeweaver::config::WeaverConfig;
//! use codeweaver::indexer::Indexer;
//! use codeweaver::query::QueryPipeline;
//! use codeweaver::registry::Registry;
//! use codeweaver::types::{FindOptions, RepositoryDescriptor};
//!
//! let registry = Registry::with_builtins(WeaverConfig::defaults());
//! let indexer = Indexer::new(&registry, RepositoryDescriptor::from_root("/repo"))?;
//! indexer.prime(None).await?;
//!
//! let pipeline: QueryPipeline = registry.construct()?;
//! let response = pipeline
//!     .find_code("where is the retry backoff", "/repo".as_ref(), FindOptions::default())
//!     .await;
//! println!("{}", response.summary);
//! ```

pub mod chunker;
pub mod config;
pub mod discovery;
pub mod embedding;
pub mod error;
pub mod indexer;
pub mod query;
pub mod registry;
pub mod store;
pub mod tokenizer;
pub mod types;

// Re-export the types most callers touch.
pub use config::{ProviderSettings, WeaverConfig};
pub use error::{ErrorKind, IndexError, ProviderError, QueryError, Result, StoreError};
pub use indexer::{IndexState, Indexer, PrimeReport};
pub use query::QueryPipeline;
pub use registry::{Capability, FromRegistry, ProviderInstance, Registry};
pub use store::{MemoryStore, QdrantStore, QueryVectors, VectorStore};
pub use types::{
    Chunk, ChunkEmbeddings, ChunkKind, CodeMatch, CollectionMetadata, FindOptions, FindResponse,
    QueryIntent, RepositoryDescriptor, SearchFilter, SearchMode, SearchResult, SparseVector,
};

/// Crate version.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
