// Copyright 2026 Layne Penney
// SPDX-License-Identifier: AGPL-3.0-or-later

//! Repository discovery.
//!
//! Walks a repository root honoring project ignore files (`.gitignore`,
//! `.ignore`) plus a built-in set of vendor and build directories, emitting a
//! lazy, restartable stream of [`FileRecord`]s. Language detection uses the
//! extension with a shebang tiebreak for extensionless scripts. Content
//! hashes are computed on demand by the indexer, not here.

mod watcher;

use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use ignore::WalkBuilder;

pub use watcher::FileWatcher;

use crate::types::{FileRecord, RepositoryDescriptor};

/// Directory names never worth indexing, independent of ignore files.
const VENDOR_DIRS: &[&str] = &[
    "node_modules",
    "target",
    "dist",
    "build",
    "out",
    "vendor",
    "__pycache__",
    "venv",
    ".venv",
    ".git",
    ".hg",
    ".svn",
    ".idea",
    ".vscode",
];

/// Whether a directory name is in the built-in exclusion set.
pub(crate) fn is_vendor_dir(name: &str) -> bool {
    VENDOR_DIRS.contains(&name)
}

/// Map a file extension to a language tag.
fn language_for_extension(ext: &str) -> Option<&'static str> {
    match ext {
        "rs" => Some("rust"),
        "py" | "pyi" => Some("python"),
        "ts" | "tsx" | "mts" | "cts" => Some("typescript"),
        "js" | "jsx" | "mjs" | "cjs" => Some("javascript"),
        "go" => Some("go"),
        "java" => Some("java"),
        "c" | "h" => Some("c"),
        "cpp" | "cc" | "cxx" | "hpp" | "hxx" => Some("cpp"),
        "cs" => Some("csharp"),
        "rb" => Some("ruby"),
        "php" => Some("php"),
        "swift" => Some("swift"),
        "kt" | "kts" => Some("kotlin"),
        "scala" => Some("scala"),
        "sh" | "bash" | "zsh" => Some("shell"),
        "md" | "markdown" => Some("markdown"),
        "json" => Some("json"),
        "yaml" | "yml" => Some("yaml"),
        "toml" => Some("toml"),
        "sql" => Some("sql"),
        _ => None,
    }
}

/// Interpreter-name heuristics for shebang lines.
fn language_for_shebang(first_line: &str) -> Option<&'static str> {
    if !first_line.starts_with("#!") {
        return None;
    }
    let line = first_line.trim();
    if line.contains("python") {
        Some("python")
    } else if line.contains("node") {
        Some("javascript")
    } else if line.contains("bash") || line.contains("/sh") || line.contains("zsh") {
        Some("shell")
    } else if line.contains("ruby") {
        Some("ruby")
    } else {
        None
    }
}

/// Detect language from a path, reading the first line for the shebang
/// tiebreak only when the extension is missing or unknown.
pub fn detect_language(path: &Path) -> String {
    if let Some(lang) = path
        .extension()
        .and_then(|e| e.to_str())
        .map(str::to_ascii_lowercase)
        .as_deref()
        .and_then(language_for_extension)
    {
        return lang.to_string();
    }
    if let Ok(content) = std::fs::read_to_string(path) {
        if let Some(lang) = content.lines().next().and_then(language_for_shebang) {
            return lang.to_string();
        }
    }
    "unknown".to_string()
}

/// Lazy walker over a repository root.
pub struct Discovery {
    descriptor: RepositoryDescriptor,
}

impl Discovery {
    pub fn new(descriptor: RepositoryDescriptor) -> Self {
        Self { descriptor }
    }

    pub fn descriptor(&self) -> &RepositoryDescriptor {
        &self.descriptor
    }

    /// Walk the repository, yielding one record per candidate file. The
    /// iterator is lazy; calling `walk` again restarts from the beginning.
    pub fn walk(&self) -> impl Iterator<Item = FileRecord> + '_ {
        let root = self.descriptor.root.clone();
        WalkBuilder::new(&root)
            .follow_links(false)
            .hidden(true)
            .git_ignore(true)
            .require_git(false)
            .ignore(true)
            .filter_entry(|entry| {
                let name = entry.file_name().to_string_lossy();
                !(entry.file_type().is_some_and(|t| t.is_dir()) && is_vendor_dir(&name))
            })
            .build()
            .filter_map(move |entry| {
                let entry = match entry {
                    Ok(entry) => entry,
                    Err(err) => {
                        tracing::debug!(error = %err, "skipping unreadable entry");
                        return None;
                    }
                };
                if !entry.file_type().is_some_and(|t| t.is_file()) {
                    return None;
                }
                let path = entry.path();
                let metadata = entry.metadata().ok()?;
                let modified: DateTime<Utc> = metadata
                    .modified()
                    .map(DateTime::from)
                    .unwrap_or_else(|_| Utc::now());
                let relative = path.strip_prefix(&root).unwrap_or(path).to_path_buf();
                Some(FileRecord {
                    language: detect_language(path),
                    path: relative,
                    size: metadata.len(),
                    modified,
                    hash: None,
                })
            })
    }

    /// Absolute path for a repo-relative record path.
    pub fn absolute(&self, relative: &Path) -> PathBuf {
        self.descriptor.root.join(relative)
    }
}
