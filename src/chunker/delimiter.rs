// Copyright 2026 Layne Penney
// SPDX-License-Identifier: AGPL-3.0-or-later

//! Delimiter-based segmentation for languages without a bundled grammar.
//!
//! A per-family profile pairs definition-start regexes with a block style:
//! brace counting for C-family languages, keyword-led sections for
//! `end`-delimited and script languages. Comment runs and import lines
//! group into their own segments; unmatched lines are left for gap filling.

use once_cell::sync::Lazy;
use regex::Regex;

use crate::types::ChunkKind;

use super::Segment;

enum BlockStyle {
    /// Definition body runs to the matching closing brace.
    Braces,
    /// Definition runs until the next definition starts.
    Sections,
}

struct DelimiterProfile {
    starters: Vec<(Regex, ChunkKind)>,
    import: Regex,
    comment_prefixes: &'static [&'static str],
    style: BlockStyle,
}

fn regex(pattern: &str) -> Regex {
    Regex::new(pattern).expect("delimiter profile regex must compile")
}

static C_FAMILY: Lazy<DelimiterProfile> = Lazy::new(|| DelimiterProfile {
    starters: vec![
        (
            regex(r"^\s*(?:public|private|protected|static|final|abstract|virtual|inline|extern|constexpr|\s)*\s*(?:class|struct|interface|enum|record)\s+\w+"),
            ChunkKind::Definition,
        ),
        (
            regex(r"^\s*(?:public|private|protected|static|final|abstract|virtual|inline|extern|constexpr|unsafe|async|override|\s)*[\w:<>,\[\]\*&\s]+\s+[\w:~]+\s*\([^;]*$"),
            ChunkKind::Definition,
        ),
        (
            regex(r"^\s*(?:public|private|protected|static|final|abstract|virtual|inline|extern|constexpr|unsafe|async|override|\s)*[\w:<>,\[\]\*&\s]+\s+[\w:~]+\s*\([^)]*\)\s*(?:const)?\s*\{"),
            ChunkKind::Definition,
        ),
    ],
    import: regex(r"^\s*(?:#include|import\s|using\s|package\s)"),
    comment_prefixes: &["//", "/*", "*"],
    style: BlockStyle::Braces,
});

static SECTION_FAMILY: Lazy<DelimiterProfile> = Lazy::new(|| DelimiterProfile {
    starters: vec![
        (
            regex(r"^\s*(?:def|class|module)\s+\w+"),
            ChunkKind::Definition,
        ),
        (
            regex(r"^\s*(?:function\s+\w+|\w+\s*\(\)\s*\{)"),
            ChunkKind::Definition,
        ),
    ],
    import: regex(r#"^\s*(?:require|require_relative|load|source|\.)\s"#),
    comment_prefixes: &["#"],
    style: BlockStyle::Sections,
});

fn profile_for(language: &str) -> Option<&'static DelimiterProfile> {
    match language {
        "java" | "c" | "cpp" | "csharp" | "kotlin" | "swift" | "scala" | "php" => Some(&C_FAMILY),
        "ruby" | "shell" => Some(&SECTION_FAMILY),
        _ => None,
    }
}

/// Segment by delimiter profile, or `None` when the language has none.
pub(crate) fn segment(language: &str, lines: &[&str]) -> Option<Vec<Segment>> {
    let profile = profile_for(language)?;
    Some(run_profile(profile, lines))
}

fn is_comment(profile: &DelimiterProfile, line: &str) -> bool {
    let trimmed = line.trim_start();
    profile
        .comment_prefixes
        .iter()
        .any(|prefix| trimmed.starts_with(prefix))
}

fn starter_kind(profile: &DelimiterProfile, line: &str) -> Option<ChunkKind> {
    profile
        .starters
        .iter()
        .find(|(pattern, _)| pattern.is_match(line))
        .map(|(_, kind)| *kind)
}

/// Symbol guess: last identifier before an opening paren, or after a
/// class-like keyword.
fn extract_label(line: &str) -> Option<String> {
    static NAME: Lazy<Regex> = Lazy::new(|| {
        regex(r"(?:class|struct|interface|enum|record|module|def|function)\s+(\w+)|(\w+)\s*\(")
    });
    NAME.captures(line).and_then(|caps| {
        caps.get(1)
            .or_else(|| caps.get(2))
            .map(|m| m.as_str().to_string())
    })
}

fn run_profile(profile: &DelimiterProfile, lines: &[&str]) -> Vec<Segment> {
    let mut segments = Vec::new();
    let mut i = 0usize;
    while i < lines.len() {
        let line = lines[i];
        if line.trim().is_empty() {
            i += 1;
            continue;
        }

        if profile.import.is_match(line) {
            let start = i;
            while i + 1 < lines.len() && profile.import.is_match(lines[i + 1]) {
                i += 1;
            }
            segments.push(Segment::new(start, i, ChunkKind::Import, None));
            i += 1;
            continue;
        }

        if is_comment(profile, line) {
            let start = i;
            while i + 1 < lines.len() && is_comment(profile, lines[i + 1]) {
                i += 1;
            }
            // A comment run directly above a definition belongs to it.
            let next_is_starter = lines
                .get(i + 1)
                .is_some_and(|next| starter_kind(profile, next).is_some());
            if next_is_starter {
                let kind = starter_kind(profile, lines[i + 1]).unwrap_or(ChunkKind::Definition);
                let end = block_end(profile, lines, i + 1);
                let label = extract_label(lines[i + 1]);
                segments.push(Segment::new(start, end, kind, label));
                i = end + 1;
            } else {
                segments.push(Segment::new(start, i, ChunkKind::CommentBlock, None));
                i += 1;
            }
            continue;
        }

        if let Some(kind) = starter_kind(profile, line) {
            let end = block_end(profile, lines, i);
            segments.push(Segment::new(i, end, kind, extract_label(line)));
            i = end + 1;
            continue;
        }

        i += 1;
    }
    segments
}

fn block_end(profile: &DelimiterProfile, lines: &[&str], start: usize) -> usize {
    match profile.style {
        BlockStyle::Braces => brace_block_end(lines, start),
        BlockStyle::Sections => section_end(profile, lines, start),
    }
}

/// Scan forward counting braces outside string literals until the block
/// closes. A declaration that never opens a brace ends at its semicolon.
fn brace_block_end(lines: &[&str], start: usize) -> usize {
    let mut depth: i32 = 0;
    let mut opened = false;
    let mut in_string = false;
    let mut string_char = ' ';

    for (offset, line) in lines[start..].iter().enumerate() {
        let mut prev = ' ';
        for ch in line.chars() {
            if in_string {
                if ch == string_char && prev != '\\' {
                    in_string = false;
                }
            } else {
                match ch {
                    '"' | '\'' => {
                        in_string = true;
                        string_char = ch;
                    }
                    '{' => {
                        depth += 1;
                        opened = true;
                    }
                    '}' => depth -= 1,
                    _ => {}
                }
            }
            prev = ch;
        }
        in_string = false;
        if opened && depth <= 0 {
            return start + offset;
        }
        if !opened && line.trim_end().ends_with(';') {
            return start + offset;
        }
    }
    lines.len() - 1
}

/// Section runs until the next starter at the same or outer indentation.
fn section_end(profile: &DelimiterProfile, lines: &[&str], start: usize) -> usize {
    let indent = indent_of(lines[start]);
    for (offset, line) in lines[start + 1..].iter().enumerate() {
        if line.trim().is_empty() {
            continue;
        }
        if indent_of(line) <= indent && starter_kind(profile, line).is_some() {
            // Back up over the blank lines between sections.
            let mut end = start + offset;
            while end > start && lines[end].trim().is_empty() {
                end -= 1;
            }
            return end;
        }
    }
    lines.len() - 1
}

fn indent_of(line: &str) -> usize {
    line.len() - line.trim_start().len()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn segment_lines(language: &str, source: &str) -> Vec<Segment> {
        let lines: Vec<&str> = source.lines().collect();
        segment(language, &lines).expect("language should have a profile")
    }

    #[test]
    fn test_profile_selection() {
        assert!(profile_for("java").is_some());
        assert!(profile_for("ruby").is_some());
        assert!(profile_for("rust").is_none(), "grammar languages skip this");
        assert!(profile_for("unknown").is_none());
    }

    #[test]
    fn test_java_class_and_imports() {
        let source = "import java.util.List;\nimport java.util.Map;\n\npublic class Router {\n    private final List<Route> routes;\n\n    public Route match(String path) {\n        return routes.get(0);\n    }\n}\n";
        let segments = segment_lines("java", source);

        assert_eq!(segments[0].kind, ChunkKind::Import);
        assert_eq!((segments[0].start, segments[0].end), (0, 1));

        let class = segments
            .iter()
            .find(|s| s.kind == ChunkKind::Definition)
            .expect("class block");
        assert_eq!(class.label.as_deref(), Some("Router"));
        assert_eq!((class.start, class.end), (3, 9));
    }

    #[test]
    fn test_comment_above_definition_rides_along() {
        let source = "// Validates the token.\n// Returns false on expiry.\npublic boolean validate(String token) {\n    return token != null;\n}\n";
        let segments = segment_lines("java", source);
        assert_eq!(segments.len(), 1);
        assert_eq!(segments[0].start, 0);
        assert_eq!(segments[0].end, 4);
        assert_eq!(segments[0].kind, ChunkKind::Definition);
    }

    #[test]
    fn test_ruby_sections() {
        let source = "require 'json'\n\ndef parse(raw)\n  JSON.parse(raw)\nend\n\ndef dump(obj)\n  JSON.dump(obj)\nend\n";
        let segments = segment_lines("ruby", source);

        assert_eq!(segments[0].kind, ChunkKind::Import);
        let defs: Vec<_> = segments
            .iter()
            .filter(|s| s.kind == ChunkKind::Definition)
            .collect();
        assert_eq!(defs.len(), 2);
        assert_eq!(defs[0].label.as_deref(), Some("parse"));
        assert!(defs[0].end < defs[1].start);
    }

    #[test]
    fn test_standalone_comment_block() {
        let source = "// Copyright notice.\n// All rights reserved.\n\nint x = 1;\n";
        let segments = segment_lines("c", source);
        assert_eq!(segments[0].kind, ChunkKind::CommentBlock);
        assert_eq!((segments[0].start, segments[0].end), (0, 1));
    }

    #[test]
    fn test_brace_counting_ignores_strings() {
        let source = "public String render() {\n    return \"{ not a brace }\";\n}\n";
        let segments = segment_lines("java", source);
        assert_eq!(segments.len(), 1);
        assert_eq!(segments[0].end, 2);
    }
}
