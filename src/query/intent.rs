// Copyright 2026 Layne Penney
// SPDX-License-Identifier: AGPL-3.0-or-later

//! Query intent derivation and semantic score weighting.
//!
//! Intent comes from keyword heuristics over the normalized query text; the
//! weighting table biases ranking by chunk kind with multipliers bounded to
//! ±20% so intent can reorder near-ties but never bury a strong match.

use crate::types::{ChunkKind, QueryIntent};

/// Derive an intent from the query text.
pub fn derive_intent(query: &str) -> QueryIntent {
    let q = query.to_lowercase();
    let has = |terms: &[&str]| terms.iter().any(|t| q.contains(t));

    if has(&[
        "bug", "error", "crash", "panic", "exception", "traceback", "broken", "not working",
        "fails", "failing", "fix ",
    ]) {
        QueryIntent::Debug
    } else if has(&[
        "document", "docstring", "comment", "readme", "changelog", "describe", "explain",
    ]) {
        QueryIntent::Document
    } else if has(&[
        "refactor", "rename", "restructure", "clean up", "simplify", "extract", "deduplicate",
    ]) {
        QueryIntent::Refactor
    } else if has(&[
        "how does", "how do", "what does", "where is", "where does", "understand", "overview",
        "architecture", "flow of",
    ]) {
        QueryIntent::Understand
    } else {
        QueryIntent::Generic
    }
}

/// Intent-dependent multiplier for a chunk kind. Bounded to [0.8, 1.2].
pub fn kind_weight(intent: QueryIntent, kind: ChunkKind) -> f32 {
    use ChunkKind::{CommentBlock, Declaration, Definition, Import, Other};
    use QueryIntent::{Debug, Document, Generic, Refactor, Understand};

    match (intent, kind) {
        (Debug, Definition) => 1.15,
        (Debug, CommentBlock) => 0.85,
        (Debug, Import) => 0.9,

        (Document, CommentBlock) => 1.2,
        (Document, Declaration) => 1.05,
        (Document, Import) => 0.9,

        (Understand, Definition) => 1.1,
        (Understand, CommentBlock) => 1.1,
        (Understand, Declaration) => 1.05,

        (Refactor, Definition) => 1.15,
        (Refactor, Declaration) => 1.05,
        (Refactor, CommentBlock) => 0.9,
        (Refactor, Import) => 0.85,

        (Generic, _) => 1.0,
        (_, Other) => 1.0,
        _ => 1.0,
    }
}
