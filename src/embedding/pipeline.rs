// Copyright 2026 Layne Penney
// SPDX-License-Identifier: AGPL-3.0-or-later

//! Batching embedding pipeline with partial-failure handling.
//!
//! Chunks stream in on a bounded channel, accumulate into batches, and the
//! dense and sparse embed calls for each batch run in parallel under a
//! concurrency semaphore. A chunk that got a sparse vector but no dense one
//! is still emitted (`embedding_complete = false`) and queued for background
//! retry; the retry worker re-embeds whatever side is missing and issues a
//! targeted upsert that replaces the stored point.

use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tokio::sync::{mpsc, Semaphore};
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;

use crate::config::PipelineConfig;
use crate::error::ProviderError;
use crate::store::VectorStore;
use crate::types::Chunk;

use super::{DenseEmbedder, SparseEmbedder};

/// A chunk awaiting background completion of its embeddings.
#[derive(Debug)]
pub struct RetryItem {
    pub chunk: Chunk,
    pub attempts: u32,
    pub reason: String,
}

/// Handle for enqueueing retries; tracks the pending count and chunk ids
/// shared with the indexer's state machine and checkpoints.
#[derive(Clone)]
pub struct RetryQueue {
    tx: mpsc::UnboundedSender<RetryItem>,
    pending: Arc<AtomicU32>,
    ids: Arc<std::sync::Mutex<std::collections::HashSet<uuid::Uuid>>>,
}

impl RetryQueue {
    pub fn push(&self, item: RetryItem) {
        self.pending.fetch_add(1, Ordering::SeqCst);
        self.ids
            .lock()
            .expect("retry id lock poisoned")
            .insert(item.chunk.chunk_id);
        if self.tx.send(item).is_err() {
            self.pending.fetch_sub(1, Ordering::SeqCst);
            tracing::warn!("retry queue receiver dropped; chunk quarantined");
        }
    }

    pub fn pending(&self) -> u32 {
        self.pending.load(Ordering::SeqCst)
    }

    pub fn pending_handle(&self) -> Arc<AtomicU32> {
        Arc::clone(&self.pending)
    }

    /// Chunk ids currently awaiting completion, for checkpointing.
    pub fn pending_ids(&self) -> Vec<uuid::Uuid> {
        let mut ids: Vec<uuid::Uuid> = self
            .ids
            .lock()
            .expect("retry id lock poisoned")
            .iter()
            .copied()
            .collect();
        ids.sort();
        ids
    }

    fn settle(&self, id: uuid::Uuid) {
        self.pending.fetch_sub(1, Ordering::SeqCst);
        self.ids.lock().expect("retry id lock poisoned").remove(&id);
    }
}

/// Outcome counters for one pipeline run.
#[derive(Debug, Default, Clone, Copy)]
pub struct PipelineSummary {
    pub batches: u32,
    pub chunks_complete: u32,
    pub chunks_partial: u32,
    pub chunks_rejected: u32,
}

/// Batching embedder that attaches vectors to a stream of chunks.
pub struct EmbeddingPipeline {
    dense: Arc<dyn DenseEmbedder>,
    sparse: Arc<dyn SparseEmbedder>,
    config: PipelineConfig,
}

impl EmbeddingPipeline {
    pub fn new(
        dense: Arc<dyn DenseEmbedder>,
        sparse: Arc<dyn SparseEmbedder>,
        config: PipelineConfig,
    ) -> Self {
        Self {
            dense,
            sparse,
            config,
        }
    }

    /// Consume chunks from `input` until it closes (or `cancel` fires),
    /// emitting embedded batches on `output`. Producers feel backpressure
    /// through the bounded channels; cancellation drains in-flight embed
    /// calls and discards their results.
    pub async fn run(
        &self,
        mut input: mpsc::Receiver<Chunk>,
        output: mpsc::Sender<Vec<Chunk>>,
        retry: RetryQueue,
        cancel: CancellationToken,
    ) -> PipelineSummary {
        let semaphore = Arc::new(Semaphore::new(self.config.max_concurrency.max(1)));
        let mut tasks: JoinSet<PipelineSummary> = JoinSet::new();
        let mut batch: Vec<Chunk> = Vec::with_capacity(self.config.batch_size);
        let flush_interval = Duration::from_millis(self.config.flush_interval_ms.max(1));
        let mut summary = PipelineSummary::default();

        loop {
            tokio::select! {
                biased;

                _ = cancel.cancelled() => {
                    batch.clear();
                    break;
                }

                chunk = input.recv() => {
                    match chunk {
                        Some(chunk) => {
                            batch.push(chunk);
                            if batch.len() >= self.config.batch_size {
                                self.spawn_batch(
                                    std::mem::take(&mut batch),
                                    &mut tasks,
                                    &semaphore,
                                    &output,
                                    &retry,
                                    &cancel,
                                );
                            }
                        }
                        None => break,
                    }
                }

                _ = tokio::time::sleep(flush_interval), if !batch.is_empty() => {
                    self.spawn_batch(
                        std::mem::take(&mut batch),
                        &mut tasks,
                        &semaphore,
                        &output,
                        &retry,
                        &cancel,
                    );
                }
            }
        }

        if !batch.is_empty() && !cancel.is_cancelled() {
            self.spawn_batch(batch, &mut tasks, &semaphore, &output, &retry, &cancel);
        }

        // Drain in-flight batches; cancelled runs discard their output inside
        // the task, so joining here is always safe.
        while let Some(result) = tasks.join_next().await {
            if let Ok(s) = result {
                summary.batches += s.batches;
                summary.chunks_complete += s.chunks_complete;
                summary.chunks_partial += s.chunks_partial;
                summary.chunks_rejected += s.chunks_rejected;
            }
        }
        summary
    }

    fn spawn_batch(
        &self,
        chunks: Vec<Chunk>,
        tasks: &mut JoinSet<PipelineSummary>,
        semaphore: &Arc<Semaphore>,
        output: &mpsc::Sender<Vec<Chunk>>,
        retry: &RetryQueue,
        cancel: &CancellationToken,
    ) {
        let dense = Arc::clone(&self.dense);
        let sparse = Arc::clone(&self.sparse);
        let dense_required = self.config.dense_required;
        let semaphore = Arc::clone(semaphore);
        let output = output.clone();
        let retry = retry.clone();
        let cancel = cancel.clone();

        tasks.spawn(async move {
            let Ok(_permit) = semaphore.acquire().await else {
                return PipelineSummary::default();
            };
            let (summary, ready) =
                embed_batch(&*dense, &*sparse, chunks, dense_required, &retry, &cancel).await;
            if !ready.is_empty() && !cancel.is_cancelled() {
                // Backpressure point: blocks while the upsert stage is busy.
                let _ = output.send(ready).await;
            }
            summary
        });
    }
}

/// Embed one batch, classifying each chunk per the partial-failure rules.
/// Shared with the incremental indexer, which embeds per-file diffs without
/// a streaming run.
pub(crate) async fn embed_batch(
    dense: &dyn DenseEmbedder,
    sparse: &dyn SparseEmbedder,
    mut chunks: Vec<Chunk>,
    dense_required: bool,
    retry: &RetryQueue,
    cancel: &CancellationToken,
) -> (PipelineSummary, Vec<Chunk>) {
    let mut summary = PipelineSummary {
        batches: 1,
        ..Default::default()
    };
    if cancel.is_cancelled() {
        return (summary, Vec::new());
    }

    let texts: Vec<String> = chunks.iter().map(|c| c.content.clone()).collect();
    let (dense_result, sparse_result) =
        tokio::join!(dense.embed(&texts), sparse.embed_sparse(&texts));
    let provider = dense.model().to_string();
    let now = Utc::now();

    match (dense_result, sparse_result) {
        (Ok(dense_vecs), Ok(sparse_vecs)) => {
            for ((chunk, d), s) in chunks.iter_mut().zip(dense_vecs).zip(sparse_vecs) {
                chunk.embeddings.dense = Some(d);
                chunk.embeddings.sparse = Some(s);
                chunk.metadata.embedding_complete = true;
                chunk.metadata.indexed_at = now;
                chunk.metadata.provider = provider.clone();
            }
            summary.chunks_complete = chunks.len() as u32;
            (summary, chunks)
        }
        (Err(err), Ok(sparse_vecs)) => {
            tracing::warn!(error = %err, "dense embedding failed; emitting sparse-only batch");
            for (chunk, s) in chunks.iter_mut().zip(sparse_vecs) {
                chunk.embeddings.sparse = Some(s);
                chunk.metadata.embedding_complete = false;
                chunk.metadata.indexed_at = now;
                chunk.metadata.provider = provider.clone();
            }
            for chunk in &chunks {
                retry.push(RetryItem {
                    chunk: chunk.clone(),
                    attempts: 0,
                    reason: format!("dense embedding failed: {err}"),
                });
            }
            summary.chunks_partial = chunks.len() as u32;
            (summary, chunks)
        }
        (dense_result, Err(sparse_err)) => {
            let dense_failed = dense_result.is_err();
            if dense_failed && dense_required {
                tracing::error!(
                    error = %sparse_err,
                    chunks = chunks.len(),
                    "both embedders failed with dense_required; rejecting batch"
                );
                summary.chunks_rejected = chunks.len() as u32;
                return (summary, Vec::new());
            }
            // Sparse failed: nothing is stored now; the retry worker owns
            // completing and upserting these chunks.
            tracing::warn!(
                error = %sparse_err,
                dense_failed,
                "sparse embedding failed; deferring batch to retry queue"
            );
            if let Ok(dense_vecs) = dense_result {
                for (chunk, d) in chunks.iter_mut().zip(dense_vecs) {
                    chunk.embeddings.dense = Some(d);
                    chunk.metadata.indexed_at = now;
                    chunk.metadata.provider = provider.clone();
                }
            }
            for chunk in &chunks {
                retry.push(RetryItem {
                    chunk: chunk.clone(),
                    attempts: 0,
                    reason: format!("sparse embedding failed: {sparse_err}"),
                });
            }
            summary.chunks_partial = chunks.len() as u32;
            (summary, Vec::new())
        }
    }
}

/// Background worker that drains the retry queue.
///
/// Re-embeds whichever vectors a chunk is missing and replaces the stored
/// point. Retryable failures re-enqueue with backoff up to `max_attempts`,
/// then the chunk is quarantined with a diagnostic.
pub struct RetryWorker {
    dense: Arc<dyn DenseEmbedder>,
    sparse: Arc<dyn SparseEmbedder>,
    store: Arc<dyn VectorStore>,
    collection: String,
    max_attempts: u32,
}

impl RetryWorker {
    /// Create the queue/worker pair and spawn the worker task.
    pub fn spawn(
        dense: Arc<dyn DenseEmbedder>,
        sparse: Arc<dyn SparseEmbedder>,
        store: Arc<dyn VectorStore>,
        collection: impl Into<String>,
        max_attempts: u32,
        cancel: CancellationToken,
    ) -> (RetryQueue, tokio::task::JoinHandle<()>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let queue = RetryQueue {
            tx,
            pending: Arc::new(AtomicU32::new(0)),
            ids: Arc::new(std::sync::Mutex::new(std::collections::HashSet::new())),
        };
        let worker = Self {
            dense,
            sparse,
            store,
            collection: collection.into(),
            max_attempts,
        };
        let handle = tokio::spawn(worker.run(rx, queue.clone(), cancel));
        (queue, handle)
    }

    async fn run(
        self,
        mut rx: mpsc::UnboundedReceiver<RetryItem>,
        queue: RetryQueue,
        cancel: CancellationToken,
    ) {
        loop {
            let item = tokio::select! {
                biased;
                _ = cancel.cancelled() => break,
                item = rx.recv() => match item {
                    Some(item) => item,
                    None => break,
                },
            };

            // Low-priority: back off by attempt count before touching the
            // embedders again.
            let delay = Duration::from_millis(250u64.saturating_mul(1 << item.attempts.min(6)));
            tokio::select! {
                _ = cancel.cancelled() => break,
                _ = tokio::time::sleep(delay) => {}
            }

            match self.complete_chunk(item.chunk.clone()).await {
                Ok(()) => {
                    queue.settle(item.chunk.chunk_id);
                    tracing::debug!(
                        chunk = %item.chunk.chunk_name,
                        "retry completed embeddings"
                    );
                }
                Err(err) if err.is_retryable() && item.attempts + 1 < self.max_attempts => {
                    queue.settle(item.chunk.chunk_id);
                    queue.push(RetryItem {
                        chunk: item.chunk,
                        attempts: item.attempts + 1,
                        reason: err.to_string(),
                    });
                }
                Err(err) => {
                    queue.settle(item.chunk.chunk_id);
                    tracing::error!(
                        chunk = %item.chunk.chunk_name,
                        attempts = item.attempts + 1,
                        kind = %err.kind(),
                        error = %err,
                        "retry quarantined chunk"
                    );
                }
            }
        }
    }

    async fn complete_chunk(&self, mut chunk: Chunk) -> Result<(), ProviderError> {
        let text = std::slice::from_ref(&chunk.content);
        if chunk.embeddings.dense.is_none() {
            let mut vectors = self.dense.embed(text).await?;
            chunk.embeddings.dense = vectors.pop();
        }
        if chunk.embeddings.sparse.is_none() {
            let mut vectors = self.sparse.embed_sparse(text).await?;
            chunk.embeddings.sparse = vectors.pop();
        }
        chunk.metadata.embedding_complete = chunk.embeddings.is_complete();
        chunk.metadata.indexed_at = Utc::now();
        chunk.metadata.provider = self.dense.model().to_string();

        self.store
            .upsert(&self.collection, std::slice::from_ref(&chunk))
            .await
            .map_err(|e| {
                if e.is_retryable() {
                    ProviderError::Network(format!("targeted upsert failed: {e}"))
                } else {
                    ProviderError::Api {
                        message: format!("targeted upsert failed: {e}"),
                        status_code: None,
                    }
                }
            })
    }
}
