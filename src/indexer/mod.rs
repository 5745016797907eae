// Copyright 2026 Layne Penney
// SPDX-License-Identifier: AGPL-3.0-or-later

//! Indexing orchestration.
//!
//! Binds discovery → chunker → embedding pipeline → store for one
//! repository. Three modes:
//!
//! - **Prime**: full walk with streaming embed/upsert and periodic
//!   checkpoints, resumable at chunk granularity (stable chunk ids mean
//!   unchanged chunks are never re-embedded).
//! - **Incremental**: per-change chunk-id diffing; only new or changed
//!   chunks are embedded, removed ones are deleted, and hash-equal moves
//!   rewrite payloads without touching vectors.
//! - **Watch**: a run-loop over debounced filesystem events dispatching to
//!   incremental updates.
//!
//! The session state machine is `Idle → Priming → Watching ⇄ Updating`;
//! `Degraded` is reported while the retry queue is non-empty, `Failed`
//! after an unrecoverable store error (queries may still serve stale data).

mod checkpoint;

use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use once_cell::sync::OnceCell;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

pub use checkpoint::{Checkpoint, CompletedFile};

use crate::chunker::{Chunker, ChunkerConfig};
use crate::config::{state_dir, WeaverConfig};
use crate::discovery::{Discovery, FileWatcher};
use crate::embedding::{
    embed_batch, DenseEmbedder, EmbeddingPipeline, RetryQueue, RetryWorker, SparseEmbedder,
};
use crate::error::{IndexError, ProviderError};
use crate::registry::Registry;
use crate::store::VectorStore;
use crate::types::{
    Chunk, CollectionMetadata, FileChangeEvent, FileChangeKind, FileRecord, IndexProgress,
    IndexStats, RepositoryDescriptor,
};

/// Progress callback for indexing operations.
pub type ProgressCallback = Box<dyn Fn(IndexProgress) + Send + Sync>;

/// Session lifecycle state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IndexState {
    Idle,
    Priming,
    Watching,
    Updating,
    Degraded,
    Failed,
}

/// Outcome of a prime run.
#[derive(Debug, Clone, Default)]
pub struct PrimeReport {
    pub files_indexed: u32,
    pub files_skipped: u32,
    pub files_errored: u32,
    pub chunks_upserted: u32,
    pub retries_pending: u32,
    pub duration_ms: u64,
}

/// Per-repository indexing orchestrator. The indexer exclusively owns
/// writes to its collection; the query pipeline only reads.
pub struct Indexer {
    descriptor: RepositoryDescriptor,
    collection: String,
    store: Arc<dyn VectorStore>,
    dense: Arc<dyn DenseEmbedder>,
    sparse: Arc<dyn SparseEmbedder>,
    config: WeaverConfig,
    chunker: std::sync::Mutex<Chunker>,
    state: std::sync::Mutex<IndexState>,
    busy: AtomicBool,
    failed: AtomicBool,
    cancel: CancellationToken,
    retry: OnceCell<RetryQueue>,
    checkpoint_path: PathBuf,
}

impl Indexer {
    /// Build an indexer for a repository, resolving providers through the
    /// registry.
    pub fn new(
        registry: &Registry,
        descriptor: RepositoryDescriptor,
    ) -> Result<Self, ProviderError> {
        let config = registry.config().clone();
        let checkpoint_path = config
            .indexer
            .checkpoint_path
            .clone()
            .unwrap_or_else(|| state_dir(&descriptor.root).join("checkpoint.json"));
        let collection = descriptor.collection_name();
        Ok(Self {
            descriptor,
            collection,
            store: registry.resolve_store()?,
            dense: registry.resolve_dense()?,
            sparse: registry.resolve_sparse()?,
            chunker: std::sync::Mutex::new(Chunker::new(ChunkerConfig {
                max_file_bytes: config.indexer.max_file_size as usize,
                ..ChunkerConfig::default()
            })),
            config,
            state: std::sync::Mutex::new(IndexState::Idle),
            busy: AtomicBool::new(false),
            failed: AtomicBool::new(false),
            cancel: CancellationToken::new(),
            retry: OnceCell::new(),
            checkpoint_path,
        })
    }

    pub fn collection(&self) -> &str {
        &self.collection
    }

    pub fn descriptor(&self) -> &RepositoryDescriptor {
        &self.descriptor
    }

    /// Effective session state. `Degraded` overlays the base state while
    /// retries are pending; `Failed` is sticky.
    pub fn state(&self) -> IndexState {
        if self.failed.load(Ordering::SeqCst) {
            return IndexState::Failed;
        }
        let base = *self.state.lock().expect("state lock poisoned");
        if base != IndexState::Priming && self.retries_pending() > 0 {
            return IndexState::Degraded;
        }
        base
    }

    pub fn retries_pending(&self) -> u32 {
        self.retry.get().map(RetryQueue::pending).unwrap_or(0)
    }

    /// Signal cancellation to every running stage.
    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    /// Cancel, flush durable state, and stop.
    pub async fn shutdown(&self) -> Result<(), IndexError> {
        self.cancel.cancel();
        self.store.flush().await?;
        Ok(())
    }

    pub async fn stats(&self) -> IndexStats {
        IndexStats {
            embedding_provider: self.dense.model().to_string(),
            is_indexing: self.busy.load(Ordering::SeqCst),
            retries_pending: self.retries_pending(),
            ..Default::default()
        }
    }

    fn set_state(&self, state: IndexState) {
        *self.state.lock().expect("state lock poisoned") = state;
    }

    fn metadata(&self) -> CollectionMetadata {
        CollectionMetadata::new(
            self.config.provider_tag(),
            self.dense.dimensions(),
            self.sparse.max_dimension(),
            self.descriptor.project_name.clone(),
        )
    }

    /// The session retry queue, spawning its worker on first use.
    fn retry_queue(&self) -> RetryQueue {
        self.retry
            .get_or_init(|| {
                let (queue, _handle) = RetryWorker::spawn(
                    Arc::clone(&self.dense),
                    Arc::clone(&self.sparse),
                    Arc::clone(&self.store),
                    self.collection.clone(),
                    self.config.dense.max_retries.max(1),
                    self.cancel.child_token(),
                );
                queue
            })
            .clone()
    }

    fn chunk_file(&self, path: &str, language: &str, content: &str) -> Result<Vec<Chunk>, IndexError> {
        self.chunker
            .lock()
            .expect("chunker lock poisoned")
            .chunk_file(path, language, content)
    }

    /// Full prime: walk, chunk, embed, upsert, checkpoint.
    pub async fn prime(&self, progress: Option<ProgressCallback>) -> Result<PrimeReport, IndexError> {
        if self
            .busy
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_err()
        {
            return Err(IndexError::Busy);
        }
        self.set_state(IndexState::Priming);
        let result = self.prime_inner(progress).await;
        self.busy.store(false, Ordering::SeqCst);
        self.set_state(IndexState::Idle);
        if let Err(err) = &result {
            if matches!(err, IndexError::Store(e) if !e.is_retryable()) {
                self.failed.store(true, Ordering::SeqCst);
            }
        }
        result
    }

    async fn prime_inner(
        &self,
        progress: Option<ProgressCallback>,
    ) -> Result<PrimeReport, IndexError> {
        let started = Instant::now();
        self.store
            .ensure_collection(&self.collection, &self.metadata())
            .await?;
        self.store.set_write_durability(true);

        let mut checkpoint = Checkpoint::load(&self.checkpoint_path, &self.collection)?
            .unwrap_or_else(|| Checkpoint::new(self.collection.clone()));
        let retry = self.retry_queue();
        let cancel = self.cancel.child_token();

        let (chunk_tx, chunk_rx) = mpsc::channel::<Chunk>(512);
        let (batch_tx, mut batch_rx) = mpsc::channel::<Vec<Chunk>>(8);
        // Expected chunk counts per file, so the consumer can tell when a
        // file is durably complete.
        let (meta_tx, mut meta_rx) = mpsc::unbounded_channel::<(String, String, usize)>();

        let progress = progress.map(Arc::new);
        let files_seen = Arc::new(AtomicU32::new(0));
        let chunks_upserted = Arc::new(AtomicU32::new(0));

        // Stage 2: embedding pipeline.
        let pipeline = EmbeddingPipeline::new(
            Arc::clone(&self.dense),
            Arc::clone(&self.sparse),
            self.config.pipeline.clone(),
        );
        let pipeline_cancel = cancel.clone();
        let pipeline_retry = retry.clone();
        let pipeline_task = tokio::spawn(async move {
            pipeline
                .run(chunk_rx, batch_tx, pipeline_retry, pipeline_cancel)
                .await
        });

        // Stage 3: upsert consumer, file completion accounting, checkpoints.
        let store = Arc::clone(&self.store);
        let collection = self.collection.clone();
        let checkpoint_path = self.checkpoint_path.clone();
        let checkpoint_every = self.config.indexer.checkpoint_every_files.max(1);
        let consumer_retry = retry.clone();
        let consumer_progress = progress.clone();
        let consumer_files_seen = Arc::clone(&files_seen);
        let consumer_upserted = Arc::clone(&chunks_upserted);
        let consumer_task = tokio::spawn(async move {
            let mut expected: HashMap<String, (String, usize)> = HashMap::new();
            // Chunks upserted before their file's count record arrived.
            let mut early: HashMap<String, usize> = HashMap::new();
            let mut completions_since_save = 0usize;
            let mut upsert_error: Option<IndexError> = None;

            loop {
                tokio::select! {
                    meta = meta_rx.recv() => {
                        match meta {
                            Some((path, hash, count)) => {
                                let already = early.remove(&path).unwrap_or(0);
                                if count <= already {
                                    checkpoint.mark_completed(path, hash);
                                    completions_since_save += 1;
                                } else {
                                    expected.insert(path, (hash, count - already));
                                }
                            }
                            None => break,
                        }
                    }
                    batch = batch_rx.recv() => {
                        let Some(batch) = batch else { break };
                        if upsert_error.is_some() {
                            continue;
                        }
                        if let Err(err) = store.upsert(&collection, &batch).await {
                            tracing::error!(error = %err, "batch upsert failed; halting prime stage");
                            upsert_error = Some(err.into());
                            continue;
                        }
                        consumer_upserted.fetch_add(batch.len() as u32, Ordering::SeqCst);
                        for chunk in &batch {
                            match expected.get_mut(&chunk.file_path) {
                                Some((hash, remaining)) => {
                                    *remaining -= 1;
                                    if *remaining == 0 {
                                        let hash = hash.clone();
                                        expected.remove(&chunk.file_path);
                                        checkpoint.mark_completed(chunk.file_path.clone(), hash);
                                        completions_since_save += 1;
                                    }
                                }
                                None => {
                                    *early.entry(chunk.file_path.clone()).or_insert(0) += 1;
                                }
                            }
                        }
                        if completions_since_save >= checkpoint_every {
                            checkpoint.set_retry_queue(consumer_retry.pending_ids());
                            if let Err(err) = checkpoint.save(&checkpoint_path) {
                                tracing::warn!(error = %err, "checkpoint save failed");
                            }
                            completions_since_save = 0;
                        }
                        if let Some(progress) = &consumer_progress {
                            progress(IndexProgress {
                                current_file: None,
                                files_seen: consumer_files_seen.load(Ordering::SeqCst),
                                chunks_embedded: consumer_upserted.load(Ordering::SeqCst),
                                chunks_upserted: consumer_upserted.load(Ordering::SeqCst),
                                retries_pending: consumer_retry.pending(),
                                is_complete: false,
                            });
                        }
                    }
                }
            }
            // Drain whatever channel is still open after the other closed.
            while let Some((path, hash, count)) = meta_rx.recv().await {
                let already = early.remove(&path).unwrap_or(0);
                if count <= already {
                    checkpoint.mark_completed(path, hash);
                } else {
                    expected.insert(path, (hash, count - already));
                }
            }
            while let Some(batch) = batch_rx.recv().await {
                if upsert_error.is_some() {
                    break;
                }
                if let Err(err) = store.upsert(&collection, &batch).await {
                    upsert_error = Some(err.into());
                    break;
                }
                consumer_upserted.fetch_add(batch.len() as u32, Ordering::SeqCst);
                for chunk in &batch {
                    if let Some((hash, remaining)) = expected.get_mut(&chunk.file_path) {
                        *remaining -= 1;
                        if *remaining == 0 {
                            let hash = hash.clone();
                            expected.remove(&chunk.file_path);
                            checkpoint.mark_completed(chunk.file_path.clone(), hash);
                        }
                    }
                }
            }
            checkpoint.set_retry_queue(consumer_retry.pending_ids());
            if let Err(err) = checkpoint.save(&checkpoint_path) {
                tracing::warn!(error = %err, "final checkpoint save failed");
            }
            match upsert_error {
                Some(err) => Err(err),
                None => Ok(checkpoint),
            }
        });

        // Stage 1: discovery producer (runs in this task).
        let discovery = Discovery::new(self.descriptor.clone());
        let mut report = PrimeReport::default();
        let resume = Checkpoint::load(&self.checkpoint_path, &self.collection)?;
        for record in discovery.walk() {
            if cancel.is_cancelled() {
                break;
            }
            files_seen.fetch_add(1, Ordering::SeqCst);
            let relative = record.path.to_string_lossy().to_string();
            if let Some(progress) = &progress {
                progress(IndexProgress {
                    current_file: Some(record.path.clone()),
                    files_seen: files_seen.load(Ordering::SeqCst),
                    chunks_embedded: chunks_upserted.load(Ordering::SeqCst),
                    chunks_upserted: chunks_upserted.load(Ordering::SeqCst),
                    retries_pending: retry.pending(),
                    is_complete: false,
                });
            }

            let absolute = discovery.absolute(&record.path);
            let content = match tokio::fs::read_to_string(&absolute).await {
                Ok(content) => content,
                Err(err) => {
                    tracing::debug!(path = %relative, error = %err, "skipping unreadable file");
                    report.files_errored += 1;
                    continue;
                }
            };
            let hash = FileRecord::compute_hash(&content);
            if resume
                .as_ref()
                .is_some_and(|c| c.is_completed(&relative, &hash))
            {
                report.files_skipped += 1;
                continue;
            }

            let chunks = match self.chunk_file(&relative, &record.language, &content) {
                Ok(chunks) => chunks,
                Err(err) => {
                    tracing::debug!(path = %relative, error = %err, "skipping unchunkable file");
                    report.files_errored += 1;
                    continue;
                }
            };

            // Diff against stored state so unchanged chunks are never
            // re-embedded, even on a cold resume.
            let new_ids: HashSet<Uuid> = chunks.iter().map(|c| c.chunk_id).collect();
            let stored = self.store.ids_by_file(&self.collection, &relative).await?;
            let stale: Vec<Uuid> = stored
                .iter()
                .copied()
                .filter(|id| !new_ids.contains(id))
                .collect();
            if !stale.is_empty() {
                self.store.delete_by_ids(&self.collection, &stale).await?;
            }
            let stored: HashSet<Uuid> = stored.into_iter().collect();
            let to_embed: Vec<Chunk> = chunks
                .into_iter()
                .filter(|c| !stored.contains(&c.chunk_id))
                .collect();

            let _ = meta_tx.send((relative.clone(), hash, to_embed.len()));
            for chunk in to_embed {
                if chunk_tx.send(chunk).await.is_err() {
                    break;
                }
            }
            report.files_indexed += 1;
        }
        drop(chunk_tx);
        drop(meta_tx);

        let summary = pipeline_task
            .await
            .map_err(|e| IndexError::Io(format!("pipeline task panicked: {e}")))?;
        let consumer = consumer_task
            .await
            .map_err(|e| IndexError::Io(format!("consumer task panicked: {e}")))?;
        consumer?;

        if let Some(progress) = &progress {
            progress(IndexProgress {
                current_file: None,
                files_seen: files_seen.load(Ordering::SeqCst),
                chunks_embedded: summary.chunks_complete + summary.chunks_partial,
                chunks_upserted: chunks_upserted.load(Ordering::SeqCst),
                retries_pending: retry.pending(),
                is_complete: true,
            });
        }
        if cancel.is_cancelled() {
            return Err(IndexError::Cancelled);
        }

        report.chunks_upserted = chunks_upserted.load(Ordering::SeqCst);
        report.retries_pending = retry.pending();
        report.duration_ms = started.elapsed().as_millis() as u64;
        tracing::info!(
            collection = %self.collection,
            files = report.files_indexed,
            skipped = report.files_skipped,
            chunks = report.chunks_upserted,
            retries = report.retries_pending,
            duration_ms = report.duration_ms,
            "prime complete"
        );
        Ok(report)
    }

    /// Apply one filesystem change event.
    pub async fn apply_change(&self, event: FileChangeEvent) -> Result<(), IndexError> {
        let relative = event.path.to_string_lossy().to_string();
        match event.kind {
            FileChangeKind::Deleted => {
                self.store
                    .delete_by_file(&self.collection, &relative)
                    .await?;
                tracing::debug!(path = %relative, "removed deleted file from index");
                Ok(())
            }
            FileChangeKind::Created | FileChangeKind::Modified => {
                self.reindex_file(&event.path).await
            }
            FileChangeKind::Moved { from } => {
                let from_str = from.to_string_lossy().to_string();
                if self.try_move(&from_str, &event.path).await? {
                    tracing::debug!(from = %from_str, to = %relative, "rewrote moved file in place");
                    Ok(())
                } else {
                    self.store
                        .delete_by_file(&self.collection, &from_str)
                        .await?;
                    self.reindex_file(&event.path).await
                }
            }
        }
    }

    /// Re-chunk one file and reconcile the store with the fresh output.
    async fn reindex_file(&self, path: &Path) -> Result<(), IndexError> {
        let relative = path.to_string_lossy().to_string();
        let absolute = self.descriptor.root.join(path);
        let content = match tokio::fs::read_to_string(&absolute).await {
            Ok(content) => content,
            Err(_) => {
                // Raced with a delete; treat as one.
                self.store
                    .delete_by_file(&self.collection, &relative)
                    .await?;
                return Ok(());
            }
        };
        let language = crate::discovery::detect_language(&absolute);
        let chunks = match self.chunk_file(&relative, &language, &content) {
            Ok(chunks) => chunks,
            Err(err) => {
                tracing::debug!(path = %relative, error = %err, "skipping unchunkable file");
                return Ok(());
            }
        };

        let new_ids: HashSet<Uuid> = chunks.iter().map(|c| c.chunk_id).collect();
        let stored = self.store.ids_by_file(&self.collection, &relative).await?;
        let stale: Vec<Uuid> = stored
            .iter()
            .copied()
            .filter(|id| !new_ids.contains(id))
            .collect();
        let stored: HashSet<Uuid> = stored.into_iter().collect();
        let to_embed: Vec<Chunk> = chunks
            .into_iter()
            .filter(|c| !stored.contains(&c.chunk_id))
            .collect();

        if !to_embed.is_empty() {
            let retry = self.retry_queue();
            let (_, ready) = embed_batch(
                &*self.dense,
                &*self.sparse,
                to_embed,
                self.config.pipeline.dense_required,
                &retry,
                &self.cancel,
            )
            .await;
            if !ready.is_empty() {
                self.store.upsert(&self.collection, &ready).await?;
            }
        }
        if !stale.is_empty() {
            self.store.delete_by_ids(&self.collection, &stale).await?;
        }
        Ok(())
    }

    /// Vector-preserving move: holds when the stored chunks for the old
    /// path match the new content exactly (chunk ids re-derived from the
    /// new bytes at the old path equal the stored set).
    async fn try_move(&self, from: &str, to: &Path) -> Result<bool, IndexError> {
        let absolute = self.descriptor.root.join(to);
        let Ok(content) = tokio::fs::read_to_string(&absolute).await else {
            return Ok(false);
        };
        let language = crate::discovery::detect_language(&absolute);
        let Ok(chunks) = self.chunk_file(from, &language, &content) else {
            return Ok(false);
        };
        let expected: HashSet<Uuid> = chunks.iter().map(|c| c.chunk_id).collect();
        let stored: HashSet<Uuid> = self
            .store
            .ids_by_file(&self.collection, from)
            .await?
            .into_iter()
            .collect();
        if expected.is_empty() || expected != stored {
            return Ok(false);
        }
        self.store
            .move_file(&self.collection, from, &to.to_string_lossy())
            .await?;
        Ok(true)
    }

    /// Long-lived watch loop dispatching debounced events to incremental
    /// updates. Returns when cancelled.
    pub async fn watch(&self) -> Result<(), IndexError> {
        let cancel = self.cancel.child_token();
        let mut watcher = FileWatcher::subscribe(
            &self.descriptor.root,
            Duration::from_millis(self.config.indexer.debounce_ms),
            cancel.clone(),
        )?;
        self.store.set_write_durability(false);
        self.set_state(IndexState::Watching);
        tracing::info!(root = %self.descriptor.root.display(), "watching for changes");

        loop {
            let event = tokio::select! {
                biased;
                _ = cancel.cancelled() => break,
                event = watcher.next() => match event {
                    Some(event) => event,
                    None => break,
                },
            };
            self.set_state(IndexState::Updating);
            let result = self.apply_change(event.clone()).await;
            self.set_state(IndexState::Watching);
            match result {
                Ok(()) => {}
                Err(IndexError::Store(err)) if !err.is_retryable() => {
                    self.failed.store(true, Ordering::SeqCst);
                    self.set_state(IndexState::Idle);
                    return Err(IndexError::Store(err));
                }
                Err(err) => {
                    tracing::warn!(path = %event.path.display(), error = %err, "incremental update failed");
                }
            }
        }
        self.store.set_write_durability(true);
        self.set_state(IndexState::Idle);
        Ok(())
    }
}
