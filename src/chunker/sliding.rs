// Copyright 2026 Layne Penney
// SPDX-License-Identifier: AGPL-3.0-or-later

//! Size-capped sliding segmentation.
//!
//! Fallback for languages with neither a grammar nor a delimiter profile,
//! and for oversize files. Accumulates lines up to the size cap, preferring
//! to break at the last blank line (paragraph boundary) in the tail of the
//! window. Segments never overlap.

use crate::types::ChunkKind;

use super::Segment;

/// Fraction of the window in which a blank-line break is preferred.
const BREAK_WINDOW: f32 = 0.35;

pub(crate) fn segment(lines: &[&str], max_chars: usize) -> Vec<Segment> {
    let max_chars = max_chars.max(1);
    let mut segments = Vec::new();
    let mut start = 0usize;
    let mut chars = 0usize;
    let mut last_blank: Option<usize> = None;

    for (i, line) in lines.iter().enumerate() {
        chars += line.len() + 1;
        if line.trim().is_empty() {
            last_blank = Some(i);
        }
        if chars < max_chars || i == start {
            continue;
        }

        // Break at the most recent paragraph boundary when it falls inside
        // the tail of the window; otherwise hard-break here.
        let window_floor = start + ((i - start) as f32 * (1.0 - BREAK_WINDOW)) as usize;
        let end = match last_blank {
            Some(blank) if blank > start && blank >= window_floor => blank,
            _ => i,
        };
        segments.push(Segment::new(start, end, ChunkKind::Other, None));
        start = end + 1;
        chars = if start <= i {
            lines[start..=i].iter().map(|l| l.len() + 1).sum()
        } else {
            0
        };
        last_blank = None;
    }

    if start < lines.len() {
        segments.push(Segment::new(start, lines.len() - 1, ChunkKind::Other, None));
    }
    segments
}
