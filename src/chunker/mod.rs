// Copyright 2026 Layne Penney
// SPDX-License-Identifier: AGPL-3.0-or-later

//! Source chunking.
//!
//! Converts a file's text into a finite sequence of non-overlapping chunks
//! ordered by source position. Strategy selection per language:
//!
//! 1. Grammar-backed AST segmentation ([`ast`]) for languages with bundled
//!    tree-sitter grammars;
//! 2. delimiter profiles ([`delimiter`]) for brace/keyword language
//!    families;
//! 3. size-capped sliding segmentation with blank-line preference
//!    ([`sliding`]) for everything else.
//!
//! Strategies emit line-range segments; this module normalizes them: gaps
//! between significant nodes become `Other` segments, tiny adjacent
//! segments merge until a minimum size, oversize segments split at blank
//! lines, and whitespace-only tails are suppressed.

mod ast;
mod delimiter;
mod sliding;

use crate::error::IndexError;
use crate::types::{Chunk, ChunkKind};

pub use ast::AstChunker;

/// A half-materialized chunk: 0-based inclusive line range plus labels.
#[derive(Debug, Clone)]
pub(crate) struct Segment {
    pub start: usize,
    pub end: usize,
    pub kind: ChunkKind,
    pub label: Option<String>,
}

impl Segment {
    pub(crate) fn new(start: usize, end: usize, kind: ChunkKind, label: Option<String>) -> Self {
        Self {
            start,
            end,
            kind,
            label,
        }
    }
}

/// Chunker tunables.
#[derive(Debug, Clone)]
pub struct ChunkerConfig {
    /// Segments smaller than this merge into a neighbor.
    pub min_chunk_chars: usize,
    /// Segments larger than this split at internal boundaries.
    pub max_chunk_chars: usize,
    /// Files larger than this skip AST parsing and go straight to sliding
    /// segmentation.
    pub max_file_bytes: usize,
}

impl Default for ChunkerConfig {
    fn default() -> Self {
        Self {
            min_chunk_chars: 80,
            max_chunk_chars: 4000,
            max_file_bytes: 1_048_576,
        }
    }
}

/// Strategy-selecting chunker.
pub struct Chunker {
    config: ChunkerConfig,
    ast: AstChunker,
}

impl Chunker {
    pub fn new(config: ChunkerConfig) -> Self {
        Self {
            config,
            ast: AstChunker::new(),
        }
    }

    /// Chunk one file. `file_path` is the repo-relative path recorded on
    /// every produced chunk; `language` selects the strategy.
    pub fn chunk_file(
        &mut self,
        file_path: &str,
        language: &str,
        content: &str,
    ) -> Result<Vec<Chunk>, IndexError> {
        if content.as_bytes().contains(&0) {
            return Err(IndexError::data(file_path, "binary content"));
        }
        if content.trim().is_empty() {
            return Ok(Vec::new());
        }

        let lines: Vec<&str> = content.lines().collect();
        let oversize = content.len() > self.config.max_file_bytes;

        let segments = if oversize {
            sliding::segment(&lines, self.config.max_chunk_chars)
        } else if let Some(segments) = self.ast.segment(language, content, &lines) {
            segments
        } else if let Some(segments) = delimiter::segment(language, &lines) {
            segments
        } else {
            sliding::segment(&lines, self.config.max_chunk_chars)
        };

        let segments = self.normalize(segments, &lines);
        Ok(materialize(file_path, language, &segments, &lines))
    }

    /// Sort, clip, gap-fill, merge, and split segments into their final
    /// non-overlapping, ordered shape.
    fn normalize(&self, mut segments: Vec<Segment>, lines: &[&str]) -> Vec<Segment> {
        let last_line = lines.len().saturating_sub(1);
        segments.retain(|s| s.start <= last_line);
        for segment in &mut segments {
            segment.end = segment.end.min(last_line);
        }
        segments.sort_by_key(|s| (s.start, s.end));

        // Resolve overlaps in favor of the earlier segment.
        let mut clipped: Vec<Segment> = Vec::with_capacity(segments.len());
        for mut segment in segments {
            if let Some(prev) = clipped.last() {
                if segment.start <= prev.end {
                    if segment.end <= prev.end {
                        continue;
                    }
                    segment.start = prev.end + 1;
                }
            }
            clipped.push(segment);
        }

        let filled = fill_gaps(clipped, lines);
        let trimmed: Vec<Segment> = filled
            .into_iter()
            .filter_map(|s| trim_blank_edges(s, lines))
            .collect();
        let merged = self.merge_tiny(trimmed, lines);
        self.split_oversize(merged, lines)
    }

    /// Merge segments below the minimum size into an adjacent neighbor.
    fn merge_tiny(&self, segments: Vec<Segment>, lines: &[&str]) -> Vec<Segment> {
        let mut merged: Vec<Segment> = Vec::with_capacity(segments.len());
        for segment in segments {
            let size = segment_chars(&segment, lines);
            if size < self.config.min_chunk_chars {
                if let Some(prev) = merged.last_mut() {
                    if segment.start == prev.end + 1 {
                        // Absorb into the previous segment; the bigger side
                        // keeps its identity.
                        let prev_size = segment_chars(prev, lines);
                        prev.end = segment.end;
                        if size > prev_size {
                            prev.kind = segment.kind;
                            prev.label = segment.label;
                        }
                        continue;
                    }
                }
            }
            merged.push(segment);
        }
        merged
    }

    /// Split segments above the maximum size, preferring blank-line
    /// boundaries inside the body.
    fn split_oversize(&self, segments: Vec<Segment>, lines: &[&str]) -> Vec<Segment> {
        let mut out = Vec::with_capacity(segments.len());
        for segment in segments {
            if segment_chars(&segment, lines) <= self.config.max_chunk_chars {
                out.push(segment);
                continue;
            }
            let mut part = 0usize;
            let mut start = segment.start;
            while start <= segment.end {
                let end = self.split_point(start, segment.end, lines);
                let label = segment.label.as_ref().map(|name| {
                    if part == 0 && end == segment.end {
                        name.clone()
                    } else {
                        format!("{} (part {})", name, part + 1)
                    }
                });
                out.push(Segment::new(start, end, segment.kind, label));
                part += 1;
                start = end + 1;
            }
        }
        out
    }

    /// Furthest line from `start` keeping the piece under the size cap,
    /// pulled back to the last blank line when one exists past the midpoint.
    fn split_point(&self, start: usize, end: usize, lines: &[&str]) -> usize {
        let mut chars = 0usize;
        let mut hard_end = end;
        for (offset, line) in lines[start..=end].iter().enumerate() {
            chars += line.len() + 1;
            if chars > self.config.max_chunk_chars && offset > 0 {
                hard_end = start + offset - 1;
                break;
            }
        }
        if hard_end == end {
            return end;
        }
        let midpoint = start + (hard_end - start) / 2;
        for candidate in (midpoint..=hard_end).rev() {
            if lines[candidate].trim().is_empty() {
                return candidate;
            }
        }
        hard_end
    }
}

impl Default for Chunker {
    fn default() -> Self {
        Self::new(ChunkerConfig::default())
    }
}

fn segment_chars(segment: &Segment, lines: &[&str]) -> usize {
    lines[segment.start..=segment.end]
        .iter()
        .map(|l| l.len() + 1)
        .sum()
}

/// Cover non-blank regions the strategy left out with `Other` segments.
fn fill_gaps(segments: Vec<Segment>, lines: &[&str]) -> Vec<Segment> {
    let mut filled: Vec<Segment> = Vec::with_capacity(segments.len());
    let mut cursor = 0usize;
    for segment in segments {
        if segment.start > cursor {
            if let Some(gap) = gap_segment(cursor, segment.start - 1, lines) {
                filled.push(gap);
            }
        }
        cursor = segment.end + 1;
        filled.push(segment);
    }
    if cursor < lines.len() {
        if let Some(gap) = gap_segment(cursor, lines.len() - 1, lines) {
            filled.push(gap);
        }
    }
    filled
}

fn gap_segment(start: usize, end: usize, lines: &[&str]) -> Option<Segment> {
    let has_content = lines[start..=end].iter().any(|l| !l.trim().is_empty());
    has_content.then(|| Segment::new(start, end, ChunkKind::Other, None))
}

/// Drop blank leading/trailing lines; `None` when nothing remains.
fn trim_blank_edges(mut segment: Segment, lines: &[&str]) -> Option<Segment> {
    while segment.start <= segment.end && lines[segment.start].trim().is_empty() {
        segment.start += 1;
    }
    while segment.end > segment.start && lines[segment.end].trim().is_empty() {
        segment.end -= 1;
    }
    if segment.start > segment.end || lines[segment.start].trim().is_empty() {
        return None;
    }
    Some(segment)
}

/// Build the final chunks: 1-based inclusive lines, exact joined content.
fn materialize(
    file_path: &str,
    language: &str,
    segments: &[Segment],
    lines: &[&str],
) -> Vec<Chunk> {
    let mut chunks = Vec::with_capacity(segments.len());
    let mut previous_end = 0usize;
    for segment in segments {
        debug_assert!(
            chunks.is_empty() || segment.start + 1 > previous_end,
            "segments must not share lines"
        );
        let content = lines[segment.start..=segment.end].join("\n");
        chunks.push(Chunk::new(
            file_path,
            language,
            (segment.start + 1) as u32,
            (segment.end + 1) as u32,
            content,
            segment.kind,
            segment.label.as_deref(),
        ));
        previous_end = segment.end + 1;
    }
    chunks
}

#[cfg(test)]
mod tests {
    use super::*;

    fn assert_invariants(chunks: &[Chunk]) {
        for chunk in chunks {
            assert!(chunk.line_start <= chunk.line_end, "{}", chunk.chunk_name);
            assert!(!chunk.content.trim().is_empty());
        }
        for pair in chunks.windows(2) {
            assert!(
                pair[1].line_start > pair[0].line_end,
                "chunks share lines: {} / {}",
                pair[0].chunk_name,
                pair[1].chunk_name
            );
        }
    }

    #[test]
    fn test_empty_file_yields_nothing() {
        let mut chunker = Chunker::default();
        assert!(chunker.chunk_file("a.rs", "rust", "").unwrap().is_empty());
        assert!(chunker
            .chunk_file("a.rs", "rust", "\n\n  \n")
            .unwrap()
            .is_empty());
    }

    #[test]
    fn test_binary_is_a_data_error() {
        let mut chunker = Chunker::default();
        let err = chunker
            .chunk_file("blob.bin", "unknown", "abc\0def")
            .unwrap_err();
        assert!(matches!(err, IndexError::Data { .. }));
    }

    #[test]
    fn test_rust_definitions_are_chunked() {
        let mut chunker = Chunker::new(ChunkerConfig {
            min_chunk_chars: 10,
            ..Default::default()
        });
        let source = "use std::fmt;\n\n/// Greets.\npub fn greet(name: &str) -> String {\n    format!(\"hello {name}\")\n}\n\npub struct Greeter {\n    name: String,\n}\n";
        let chunks = chunker.chunk_file("src/lib.rs", "rust", source).unwrap();
        assert_invariants(&chunks);
        assert!(chunks
            .iter()
            .any(|c| c.kind == ChunkKind::Definition && c.chunk_name.ends_with(":greet")));
        assert!(chunks.iter().any(|c| c.kind == ChunkKind::Import));
    }

    #[test]
    fn test_reindexing_same_bytes_is_stable() {
        let mut chunker = Chunker::default();
        let source = "def a():\n    return 1\n\n\ndef b():\n    return 2\n";
        let first = chunker.chunk_file("m.py", "python", source).unwrap();
        let second = chunker.chunk_file("m.py", "python", source).unwrap();
        let first_ids: Vec<_> = first.iter().map(|c| c.chunk_id).collect();
        let second_ids: Vec<_> = second.iter().map(|c| c.chunk_id).collect();
        assert_eq!(first_ids, second_ids);
    }

    #[test]
    fn test_unknown_language_falls_back_to_sliding() {
        let mut chunker = Chunker::default();
        let source = "plain prose line\n".repeat(400);
        let chunks = chunker.chunk_file("notes.txt", "unknown", &source).unwrap();
        assert_invariants(&chunks);
        assert!(chunks.len() > 1);
        assert!(chunks.iter().all(|c| c.kind == ChunkKind::Other));
    }

    #[test]
    fn test_oversize_definition_splits() {
        let mut chunker = Chunker::new(ChunkerConfig {
            min_chunk_chars: 10,
            max_chunk_chars: 300,
            ..Default::default()
        });
        let mut body = String::from("pub fn big() {\n");
        for i in 0..60 {
            body.push_str(&format!("    let value_{i} = {i};\n"));
            if i % 10 == 9 {
                body.push('\n');
            }
        }
        body.push_str("}\n");
        let chunks = chunker.chunk_file("src/big.rs", "rust", &body).unwrap();
        assert_invariants(&chunks);
        assert!(chunks.len() > 1);
        assert!(chunks.iter().all(|c| c.content.len() <= 600));
    }

    #[test]
    fn test_tiny_siblings_merge() {
        let mut chunker = Chunker::new(ChunkerConfig {
            min_chunk_chars: 120,
            ..Default::default()
        });
        let source = "const A: u8 = 1;\nconst B: u8 = 2;\nconst C: u8 = 3;\nconst D: u8 = 4;\n";
        let chunks = chunker.chunk_file("src/consts.rs", "rust", source).unwrap();
        assert_invariants(&chunks);
        assert_eq!(chunks.len(), 1);
    }

    #[test]
    fn test_gap_statements_are_covered() {
        let mut chunker = Chunker::new(ChunkerConfig {
            min_chunk_chars: 10,
            ..Default::default()
        });
        let source = "import os\n\nprint(\"top level script line\")\n\ndef work():\n    return os.name\n";
        let chunks = chunker.chunk_file("script.py", "python", source).unwrap();
        assert_invariants(&chunks);
        let all_text: String = chunks.iter().map(|c| c.content.as_str()).collect();
        assert!(all_text.contains("top level script line"));
    }
}
