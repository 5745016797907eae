// Copyright 2026 Layne Penney
// SPDX-License-Identifier: AGPL-3.0-or-later

//! Local lexical sparse embedder.
//!
//! Tokenizes identifiers (with camelCase / snake_case splitting), weights by
//! log term frequency, and feature-hashes terms into a fixed index space.
//! Deterministic across processes so stored vectors stay comparable with
//! query vectors from any later run.

use async_trait::async_trait;

use crate::error::ProviderError;
use crate::types::SparseVector;

use super::SparseEmbedder;

/// Default index space; must fit the collection's max sparse dimension.
pub const DEFAULT_SPARSE_DIMENSION: u32 = 65_536;

/// FNV-1a, fixed parameters. Stability matters more than speed here; the
/// hash is part of the stored-vector format.
fn fnv1a_32(bytes: &[u8]) -> u32 {
    let mut hash: u32 = 0x811c_9dc5;
    for b in bytes {
        hash ^= u32::from(*b);
        hash = hash.wrapping_mul(0x0100_0193);
    }
    hash
}

/// Split source text into lowercase terms: identifier runs, then camelCase
/// and snake_case sub-words of at least two characters.
fn tokenize(text: &str) -> Vec<String> {
    let mut terms = Vec::new();
    for raw in text.split(|c: char| !c.is_ascii_alphanumeric() && c != '_') {
        if raw.len() < 2 {
            continue;
        }
        for part in raw.split('_') {
            if part.is_empty() {
                continue;
            }
            // camelCase boundaries
            let mut word = String::new();
            let mut prev_lower = false;
            for ch in part.chars() {
                if ch.is_ascii_uppercase() && prev_lower {
                    if word.len() >= 2 {
                        terms.push(word.to_ascii_lowercase());
                    }
                    word = String::new();
                }
                prev_lower = ch.is_ascii_lowercase() || ch.is_ascii_digit();
                word.push(ch);
            }
            if word.len() >= 2 {
                terms.push(word.to_ascii_lowercase());
            }
        }
        // Keep the whole identifier too so exact-name queries hit hard.
        if raw.contains('_') || raw.chars().any(|c| c.is_ascii_uppercase()) {
            terms.push(raw.to_ascii_lowercase());
        }
    }
    terms
}

/// Hashed bag-of-tokens sparse embedder.
pub struct LexicalSparseEmbedder {
    max_dimension: u32,
}

impl LexicalSparseEmbedder {
    pub fn new() -> Self {
        Self {
            max_dimension: DEFAULT_SPARSE_DIMENSION,
        }
    }

    pub fn with_dimension(max_dimension: u32) -> Self {
        Self { max_dimension }
    }

    fn embed_text(&self, text: &str) -> SparseVector {
        let mut counts: std::collections::HashMap<u32, f32> = std::collections::HashMap::new();
        for term in tokenize(text) {
            let index = fnv1a_32(term.as_bytes()) % self.max_dimension;
            *counts.entry(index).or_insert(0.0) += 1.0;
        }
        let mut vector = SparseVector::new(
            counts
                .into_iter()
                .map(|(index, tf)| (index, 1.0 + tf.ln())),
        );
        // L2-normalize so dot products behave like cosine similarity.
        let norm = vector.norm();
        if norm > 0.0 {
            for v in &mut vector.values {
                *v /= norm;
            }
        }
        vector
    }
}

impl Default for LexicalSparseEmbedder {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl SparseEmbedder for LexicalSparseEmbedder {
    fn name(&self) -> &str {
        "lexical"
    }

    fn max_dimension(&self) -> u32 {
        self.max_dimension
    }

    async fn embed_sparse(&self, texts: &[String]) -> Result<Vec<SparseVector>, ProviderError> {
        Ok(texts.iter().map(|t| self.embed_text(t)).collect())
    }
}
