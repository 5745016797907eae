// Copyright 2026 Layne Penney
// SPDX-License-Identifier: AGPL-3.0-or-later

//! Durable prime checkpoints.
//!
//! A checkpoint records which files were fully indexed (path + content hash)
//! plus the chunk ids still waiting in the retry queue, so an interrupted
//! prime resumes without re-embedding completed files. Written atomically
//! via temp-file + rename.

use std::collections::HashMap;
use std::path::Path;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::IndexError;

/// One completed file entry.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CompletedFile {
    pub path: String,
    pub hash: String,
}

/// Resume record for a prime run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Checkpoint {
    pub collection: String,
    pub completed_files: Vec<CompletedFile>,
    /// Chunk ids with incomplete embeddings at checkpoint time.
    pub retry_queue: Vec<Uuid>,
    #[serde(skip)]
    index: HashMap<String, String>,
}

impl Checkpoint {
    pub fn new(collection: impl Into<String>) -> Self {
        Self {
            collection: collection.into(),
            completed_files: Vec::new(),
            retry_queue: Vec::new(),
            index: HashMap::new(),
        }
    }

    /// Load a checkpoint for `collection`; `None` when the file is absent or
    /// belongs to a different collection.
    pub fn load(path: &Path, collection: &str) -> Result<Option<Self>, IndexError> {
        if !path.exists() {
            return Ok(None);
        }
        let raw = std::fs::read_to_string(path)
            .map_err(|e| IndexError::Checkpoint(format!("read {}: {e}", path.display())))?;
        let mut checkpoint: Checkpoint = serde_json::from_str(&raw)
            .map_err(|e| IndexError::Checkpoint(format!("parse {}: {e}", path.display())))?;
        if checkpoint.collection != collection {
            return Ok(None);
        }
        checkpoint.index = checkpoint
            .completed_files
            .iter()
            .map(|f| (f.path.clone(), f.hash.clone()))
            .collect();
        Ok(Some(checkpoint))
    }

    /// Atomic write.
    pub fn save(&self, path: &Path) -> Result<(), IndexError> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)
                .map_err(|e| IndexError::Checkpoint(format!("create {}: {e}", parent.display())))?;
        }
        let json = serde_json::to_string(self)
            .map_err(|e| IndexError::Checkpoint(format!("serialize checkpoint: {e}")))?;
        let tmp = path.with_extension("tmp");
        std::fs::write(&tmp, json)
            .map_err(|e| IndexError::Checkpoint(format!("write {}: {e}", tmp.display())))?;
        std::fs::rename(&tmp, path)
            .map_err(|e| IndexError::Checkpoint(format!("rename {}: {e}", path.display())))?;
        Ok(())
    }

    /// Whether `path` was completed with exactly this content hash.
    pub fn is_completed(&self, path: &str, hash: &str) -> bool {
        self.index.get(path).is_some_and(|stored| stored == hash)
    }

    /// Record completion, replacing any stale entry for the path.
    pub fn mark_completed(&mut self, path: impl Into<String>, hash: impl Into<String>) {
        let path = path.into();
        let hash = hash.into();
        if let Some(existing) = self.completed_files.iter_mut().find(|f| f.path == path) {
            existing.hash = hash.clone();
        } else {
            self.completed_files.push(CompletedFile {
                path: path.clone(),
                hash: hash.clone(),
            });
        }
        self.index.insert(path, hash);
    }

    /// Forget a file (it changed or was deleted).
    pub fn forget(&mut self, path: &str) {
        self.completed_files.retain(|f| f.path != path);
        self.index.remove(path);
    }

    pub fn set_retry_queue(&mut self, ids: Vec<Uuid>) {
        self.retry_queue = ids;
    }
}
