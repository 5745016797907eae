// Copyright 2026 Layne Penney
// SPDX-License-Identifier: AGPL-3.0-or-later

//! Tree-sitter AST segmentation.
//!
//! Parses a file with the bundled grammar for its language and emits one
//! segment per significant top-level node: definitions, declarations,
//! import groups, and leading comment blocks. Doc comments and attributes
//! directly above an item travel with that item; everything unrecognized is
//! left for the caller's gap filling.

use std::collections::HashMap;

use tree_sitter::{Language, Node, Parser};

use crate::types::ChunkKind;

use super::Segment;

/// Raw classification of a top-level node before grouping.
#[derive(Debug, Clone, PartialEq)]
enum NodeClass {
    /// A definition/declaration with its kind and optional symbol name.
    Item(ChunkKind, Option<String>),
    Import,
    Comment,
    /// Attribute or decorator that belongs to the following item.
    Prefix,
}

fn grammar_for(language: &str) -> Option<Language> {
    match language {
        "rust" => Some(tree_sitter_rust::LANGUAGE.into()),
        "python" => Some(tree_sitter_python::LANGUAGE.into()),
        "typescript" => Some(tree_sitter_typescript::LANGUAGE_TYPESCRIPT.into()),
        "javascript" => Some(tree_sitter_javascript::LANGUAGE.into()),
        "go" => Some(tree_sitter_go::LANGUAGE.into()),
        _ => None,
    }
}

/// AST-backed chunking strategy. Parsers are created once per language and
/// reused across files.
pub struct AstChunker {
    parsers: HashMap<&'static str, Parser>,
}

impl AstChunker {
    pub fn new() -> Self {
        let mut parsers = HashMap::new();
        for language in ["rust", "python", "typescript", "javascript", "go"] {
            let Some(grammar) = grammar_for(language) else {
                continue;
            };
            let mut parser = Parser::new();
            match parser.set_language(&grammar) {
                Ok(()) => {
                    parsers.insert(language, parser);
                }
                Err(err) => {
                    tracing::warn!(language, error = %err, "grammar rejected; falling back");
                }
            }
        }
        Self { parsers }
    }

    /// Whether a grammar is registered for the language.
    pub fn supports(&self, language: &str) -> bool {
        self.parsers.contains_key(language)
    }

    /// Segment a file, or `None` when the language has no grammar or the
    /// parse fails (the caller falls back to the next strategy).
    pub(crate) fn segment(
        &mut self,
        language: &str,
        content: &str,
        lines: &[&str],
    ) -> Option<Vec<Segment>> {
        let parser = self.parsers.get_mut(language)?;
        let tree = parser.parse(content, None)?;
        let root = tree.root_node();
        if root.has_error() {
            tracing::debug!(language, "parse errors present; chunking best-effort");
        }

        let source = content.as_bytes();
        let mut classified: Vec<(usize, usize, NodeClass)> = Vec::new();
        let mut cursor = root.walk();
        for child in root.children(&mut cursor) {
            if let Some(class) = classify(language, &child, source) {
                classified.push((
                    child.start_position().row,
                    child.end_position().row,
                    class,
                ));
            }
        }
        drop(cursor);

        Some(group(classified, lines))
    }
}

impl Default for AstChunker {
    fn default() -> Self {
        Self::new()
    }
}

fn node_name(node: &Node, source: &[u8], field: &str) -> Option<String> {
    node.child_by_field_name(field)
        .and_then(|n| n.utf8_text(source).ok())
        .map(str::to_string)
}

/// Name of the first declarator in a JS/TS variable statement.
fn declarator_name(node: &Node, source: &[u8]) -> Option<String> {
    let mut cursor = node.walk();
    let found = node
        .named_children(&mut cursor)
        .find(|c| c.kind() == "variable_declarator")
        .and_then(|declarator| {
            declarator
                .child_by_field_name("name")
                .and_then(|n| n.utf8_text(source).ok())
                .map(str::to_string)
        });
    found
}

fn classify(language: &str, node: &Node, source: &[u8]) -> Option<NodeClass> {
    let kind = node.kind();
    // Comments are shared across every grammar we bundle.
    if matches!(kind, "comment" | "line_comment" | "block_comment") {
        return Some(NodeClass::Comment);
    }
    match language {
        "rust" => classify_rust(kind, node, source),
        "python" => classify_python(kind, node, source),
        "typescript" | "javascript" => classify_js(kind, node, source),
        "go" => classify_go(kind, node, source),
        _ => None,
    }
}

fn classify_rust(kind: &str, node: &Node, source: &[u8]) -> Option<NodeClass> {
    match kind {
        "function_item" | "struct_item" | "enum_item" | "union_item" | "mod_item"
        | "macro_definition" => Some(NodeClass::Item(
            ChunkKind::Definition,
            node_name(node, source, "name"),
        )),
        "impl_item" => Some(NodeClass::Item(
            ChunkKind::Definition,
            node_name(node, source, "type"),
        )),
        "trait_item" | "type_item" | "const_item" | "static_item" => Some(NodeClass::Item(
            ChunkKind::Declaration,
            node_name(node, source, "name"),
        )),
        "use_declaration" | "extern_crate_declaration" => Some(NodeClass::Import),
        "attribute_item" | "inner_attribute_item" => Some(NodeClass::Prefix),
        _ => None,
    }
}

fn classify_python(kind: &str, node: &Node, source: &[u8]) -> Option<NodeClass> {
    match kind {
        "function_definition" | "class_definition" => Some(NodeClass::Item(
            ChunkKind::Definition,
            node_name(node, source, "name"),
        )),
        "decorated_definition" => {
            let inner = node.child_by_field_name("definition")?;
            Some(NodeClass::Item(
                ChunkKind::Definition,
                node_name(&inner, source, "name"),
            ))
        }
        "import_statement" | "import_from_statement" | "future_import_statement" => {
            Some(NodeClass::Import)
        }
        // A bare string as the first statement is the module docstring.
        "expression_statement" => {
            let only = node.named_child(0)?;
            (only.kind() == "string" && node.start_position().row == 0)
                .then_some(NodeClass::Comment)
        }
        _ => None,
    }
}

fn classify_js(kind: &str, node: &Node, source: &[u8]) -> Option<NodeClass> {
    match kind {
        "function_declaration" | "generator_function_declaration" | "class_declaration"
        | "abstract_class_declaration" => Some(NodeClass::Item(
            ChunkKind::Definition,
            node_name(node, source, "name"),
        )),
        "interface_declaration" | "enum_declaration" | "type_alias_declaration" => Some(
            NodeClass::Item(ChunkKind::Declaration, node_name(node, source, "name")),
        ),
        "lexical_declaration" | "variable_declaration" => Some(NodeClass::Item(
            ChunkKind::Declaration,
            declarator_name(node, source),
        )),
        "import_statement" => Some(NodeClass::Import),
        "export_statement" => {
            let inner = node.child_by_field_name("declaration")?;
            let inner_class = classify("typescript", &inner, source)?;
            match inner_class {
                NodeClass::Item(kind, name) => Some(NodeClass::Item(kind, name)),
                other => Some(other),
            }
        }
        "decorator" => Some(NodeClass::Prefix),
        _ => None,
    }
}

fn classify_go(kind: &str, node: &Node, source: &[u8]) -> Option<NodeClass> {
    match kind {
        "function_declaration" | "method_declaration" => Some(NodeClass::Item(
            ChunkKind::Definition,
            node_name(node, source, "name"),
        )),
        "type_declaration" => {
            // `type Foo struct { ... }`: the name sits on the type_spec child.
            let mut cursor = node.walk();
            let name = node
                .named_children(&mut cursor)
                .find_map(|c| node_name(&c, source, "name"));
            Some(NodeClass::Item(ChunkKind::Declaration, name))
        }
        "const_declaration" | "var_declaration" => {
            Some(NodeClass::Item(ChunkKind::Declaration, None))
        }
        "import_declaration" => Some(NodeClass::Import),
        _ => None,
    }
}

/// Fold classified nodes into segments: consecutive imports and comments
/// group together; prefixes and comments adjacent to the next item extend
/// that item; a comment block at the top of the file stays its own chunk.
fn group(classified: Vec<(usize, usize, NodeClass)>, lines: &[&str]) -> Vec<Segment> {
    let mut segments: Vec<Segment> = Vec::new();
    let mut pending_prefix: Option<(usize, usize)> = None;
    let mut seen_item = false;

    let extend_pending = |pending: &mut Option<(usize, usize)>, start: usize, end: usize| {
        *pending = match pending.take() {
            Some((s, e)) if adjacent(e, start, lines) => Some((s, end)),
            Some((s, e)) => {
                // Detached prefix; it will surface through gap filling.
                let _ = (s, e);
                Some((start, end))
            }
            None => Some((start, end)),
        };
    };

    for (start, end, class) in classified {
        match class {
            NodeClass::Comment => {
                let top_of_file = !seen_item
                    && pending_prefix.is_none()
                    && segments.iter().all(|s| s.kind == ChunkKind::CommentBlock);
                match segments.last_mut() {
                    // Extend a strictly adjacent top-of-file block.
                    Some(last)
                        if top_of_file
                            && last.kind == ChunkKind::CommentBlock
                            && start == last.end + 1 =>
                    {
                        last.end = end;
                    }
                    None if top_of_file => {
                        segments.push(Segment::new(start, end, ChunkKind::CommentBlock, None));
                    }
                    // Detached comment: likely a doc block for the next item.
                    _ => extend_pending(&mut pending_prefix, start, end),
                }
            }
            NodeClass::Prefix => {
                extend_pending(&mut pending_prefix, start, end);
            }
            NodeClass::Import => {
                let start = attach_prefix(&mut pending_prefix, start, lines);
                match segments.last_mut() {
                    Some(last) if last.kind == ChunkKind::Import && adjacent(last.end, start, lines) => {
                        last.end = end;
                    }
                    _ => segments.push(Segment::new(start, end, ChunkKind::Import, None)),
                }
            }
            NodeClass::Item(kind, label) => {
                seen_item = true;
                let start = attach_prefix(&mut pending_prefix, start, lines);
                segments.push(Segment::new(start, end, kind, label));
            }
        }
    }

    // A trailing comment run becomes its own block.
    if let Some((start, end)) = pending_prefix {
        segments.push(Segment::new(start, end, ChunkKind::CommentBlock, None));
    }
    segments
}

/// Whether only blank lines separate `end` from `start`.
fn adjacent(end: usize, start: usize, lines: &[&str]) -> bool {
    if start <= end + 1 {
        return true;
    }
    lines[end + 1..start].iter().all(|l| l.trim().is_empty())
}

/// Consume a pending prefix run when it sits directly above `start`.
fn attach_prefix(pending: &mut Option<(usize, usize)>, start: usize, lines: &[&str]) -> usize {
    match pending.take() {
        Some((prefix_start, prefix_end)) if prefix_end < start && adjacent(prefix_end, start, lines) => {
            prefix_start
        }
        Some(_) | None => start,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn segment_source(language: &str, source: &str) -> Vec<Segment> {
        let mut chunker = AstChunker::new();
        let lines: Vec<&str> = source.lines().collect();
        chunker
            .segment(language, source, &lines)
            .expect("language should be supported")
    }

    #[test]
    fn test_supports_bundled_grammars() {
        let chunker = AstChunker::new();
        for language in ["rust", "python", "typescript", "javascript", "go"] {
            assert!(chunker.supports(language), "{language}");
        }
        assert!(!chunker.supports("cobol"));
    }

    #[test]
    fn test_rust_items_with_doc_comments() {
        let source = "//! Module docs.\n\nuse std::io;\nuse std::fmt;\n\n/// Adds.\n#[inline]\npub fn add(a: i32, b: i32) -> i32 {\n    a + b\n}\n\npub trait Sum {\n    fn sum(&self) -> i32;\n}\n";
        let segments = segment_source("rust", source);

        let import = segments
            .iter()
            .find(|s| s.kind == ChunkKind::Import)
            .expect("use group");
        assert_eq!((import.start, import.end), (2, 3));

        let add = segments
            .iter()
            .find(|s| s.label.as_deref() == Some("add"))
            .expect("fn add");
        assert_eq!(add.kind, ChunkKind::Definition);
        // Doc comment and attribute ride with the function.
        assert_eq!(add.start, 5);

        assert!(segments
            .iter()
            .any(|s| s.kind == ChunkKind::Declaration && s.label.as_deref() == Some("Sum")));
    }

    #[test]
    fn test_python_docstring_and_decorated() {
        let source = "\"\"\"Service module.\"\"\"\nimport os\n\n@cached\ndef load():\n    return os.environ\n\nclass App:\n    pass\n";
        let segments = segment_source("python", source);

        assert_eq!(segments[0].kind, ChunkKind::CommentBlock);
        assert!(segments.iter().any(|s| s.kind == ChunkKind::Import));
        let load = segments
            .iter()
            .find(|s| s.label.as_deref() == Some("load"))
            .expect("decorated def");
        assert_eq!(load.kind, ChunkKind::Definition);
        assert!(segments
            .iter()
            .any(|s| s.label.as_deref() == Some("App") && s.kind == ChunkKind::Definition));
    }

    #[test]
    fn test_typescript_exports_unwrap() {
        let source = "import { x } from './x';\n\nexport function run(): void {}\n\nexport interface Options {\n  limit: number;\n}\n\nexport const DEFAULTS = { limit: 10 };\n";
        let segments = segment_source("typescript", source);

        assert!(segments
            .iter()
            .any(|s| s.kind == ChunkKind::Definition && s.label.as_deref() == Some("run")));
        assert!(segments
            .iter()
            .any(|s| s.kind == ChunkKind::Declaration && s.label.as_deref() == Some("Options")));
        assert!(segments
            .iter()
            .any(|s| s.kind == ChunkKind::Declaration && s.label.as_deref() == Some("DEFAULTS")));
    }

    #[test]
    fn test_go_functions_and_types() {
        let source = "package main\n\nimport \"fmt\"\n\ntype Server struct {\n\taddr string\n}\n\nfunc (s *Server) Run() {\n\tfmt.Println(s.addr)\n}\n";
        let segments = segment_source("go", source);

        assert!(segments.iter().any(|s| s.kind == ChunkKind::Import));
        assert!(segments
            .iter()
            .any(|s| s.kind == ChunkKind::Declaration && s.label.as_deref() == Some("Server")));
        assert!(segments
            .iter()
            .any(|s| s.kind == ChunkKind::Definition && s.label.as_deref() == Some("Run")));
    }
}
