// Copyright 2026 Layne Penney
// SPDX-License-Identifier: AGPL-3.0-or-later

//! Embedding and reranking capabilities.
//!
//! Three provider traits (dense, sparse, rerank) sit behind the registry;
//! concrete vendors implement them and nothing else in the crate knows which
//! one is active. The batching pipeline that drives them lives in
//! [`pipeline`].

mod lexical;
mod pipeline;
mod remote;

use async_trait::async_trait;

pub use lexical::LexicalSparseEmbedder;
pub use pipeline::{EmbeddingPipeline, PipelineSummary, RetryItem, RetryQueue, RetryWorker};
pub(crate) use pipeline::embed_batch;
pub use remote::{RemoteDenseEmbedder, RemoteReranker};

use crate::error::ProviderError;
use crate::types::SparseVector;

/// Produces fixed-dimension dense embeddings.
#[async_trait]
pub trait DenseEmbedder: Send + Sync {
    /// Provider name for logging and metadata tags.
    fn name(&self) -> &str;

    /// Model identifier.
    fn model(&self) -> &str;

    /// Output dimension; every returned vector has exactly this length.
    fn dimensions(&self) -> usize;

    /// Embed a batch of texts, preserving order.
    async fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, ProviderError>;

    /// Embed a single text.
    async fn embed_one(&self, text: &str) -> Result<Vec<f32>, ProviderError> {
        let mut results = self.embed(std::slice::from_ref(&text.to_string())).await?;
        results
            .pop()
            .ok_or_else(|| ProviderError::Parse("empty embedding response".to_string()))
    }
}

/// Produces sparse (index/value) embeddings.
#[async_trait]
pub trait SparseEmbedder: Send + Sync {
    fn name(&self) -> &str;

    /// Upper bound on emitted indices, exclusive.
    fn max_dimension(&self) -> u32;

    /// Embed a batch of texts, preserving order.
    async fn embed_sparse(&self, texts: &[String]) -> Result<Vec<SparseVector>, ProviderError>;

    async fn embed_sparse_one(&self, text: &str) -> Result<SparseVector, ProviderError> {
        let mut results = self
            .embed_sparse(std::slice::from_ref(&text.to_string()))
            .await?;
        results
            .pop()
            .ok_or_else(|| ProviderError::Parse("empty sparse response".to_string()))
    }
}

/// Scores `(query, document)` pairs for second-stage ranking.
#[async_trait]
pub trait Reranker: Send + Sync {
    fn name(&self) -> &str;

    /// Return one relevance score in [0, 1] per document, preserving order.
    async fn rerank(&self, query: &str, documents: &[String]) -> Result<Vec<f32>, ProviderError>;
}
