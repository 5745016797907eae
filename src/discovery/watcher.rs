// Copyright 2026 Layne Penney
// SPDX-License-Identifier: AGPL-3.0-or-later

//! Debounced filesystem watching.
//!
//! Wraps a `notify` recommended watcher and coalesces raw event bursts into
//! one [`FileChangeEvent`] per path within the debounce window. Later kinds
//! win over earlier ones for the same path (a create followed by a delete
//! collapses to a delete).

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

use notify::event::{ModifyKind, RenameMode};
use notify::{Event, EventKind, RecommendedWatcher, RecursiveMode, Watcher};
use tokio::sync::mpsc;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

use crate::error::IndexError;
use crate::types::{FileChangeEvent, FileChangeKind};

use super::is_vendor_dir;

/// Queue capacity between the notify callback thread and the debouncer.
const RAW_CHANNEL_CAPACITY: usize = 1024;
/// Queue capacity for debounced events handed to the indexer.
const EVENT_CHANNEL_CAPACITY: usize = 256;

/// Long-lived subscription to debounced repository change events.
pub struct FileWatcher {
    // Dropping the watcher stops the notify backend.
    _watcher: RecommendedWatcher,
    rx: mpsc::Receiver<FileChangeEvent>,
}

impl FileWatcher {
    /// Watch `root` recursively. Events under vendor or hidden directories
    /// are dropped; paths in emitted events are repo-relative.
    pub fn subscribe(
        root: &Path,
        debounce: Duration,
        cancel: CancellationToken,
    ) -> Result<Self, IndexError> {
        let (raw_tx, raw_rx) = mpsc::channel::<Event>(RAW_CHANNEL_CAPACITY);
        let (event_tx, event_rx) = mpsc::channel(EVENT_CHANNEL_CAPACITY);

        let mut watcher = notify::recommended_watcher(move |result: notify::Result<Event>| {
            match result {
                Ok(event) => {
                    // Blocking send applies backpressure to the notify thread
                    // rather than dropping bursts.
                    let _ = raw_tx.blocking_send(event);
                }
                Err(err) => tracing::warn!(error = %err, "watch backend error"),
            }
        })
        .map_err(|e| IndexError::Io(format!("create watcher: {e}")))?;

        watcher
            .watch(root, RecursiveMode::Recursive)
            .map_err(|e| IndexError::Io(format!("watch {}: {e}", root.display())))?;

        tokio::spawn(debounce_loop(
            root.to_path_buf(),
            raw_rx,
            event_tx,
            debounce,
            cancel,
        ));

        Ok(Self {
            _watcher: watcher,
            rx: event_rx,
        })
    }

    /// Next debounced event; `None` after cancellation.
    pub async fn next(&mut self) -> Option<FileChangeEvent> {
        self.rx.recv().await
    }
}

/// Whether any component of the repo-relative path is excluded from watching.
fn is_watchable(relative: &Path) -> bool {
    !relative.components().any(|component| {
        let name = component.as_os_str().to_string_lossy();
        name.starts_with('.') || is_vendor_dir(&name)
    })
}

fn classify(event: &Event) -> Option<(PathBuf, FileChangeKind)> {
    match &event.kind {
        EventKind::Create(_) => {
            let path = event.paths.first()?.clone();
            Some((path, FileChangeKind::Created))
        }
        EventKind::Modify(ModifyKind::Name(mode)) => match mode {
            RenameMode::Both => {
                let from = event.paths.first()?.clone();
                let to = event.paths.get(1)?.clone();
                Some((to, FileChangeKind::Moved { from }))
            }
            RenameMode::From => {
                let path = event.paths.first()?.clone();
                Some((path, FileChangeKind::Deleted))
            }
            _ => {
                let path = event.paths.first()?.clone();
                Some((path, FileChangeKind::Created))
            }
        },
        EventKind::Modify(_) => {
            let path = event.paths.first()?.clone();
            Some((path, FileChangeKind::Modified))
        }
        EventKind::Remove(_) => {
            let path = event.paths.first()?.clone();
            Some((path, FileChangeKind::Deleted))
        }
        _ => None,
    }
}

/// Coalesce raw events per path, flushing entries that have been quiet for
/// the debounce window.
async fn debounce_loop(
    root: PathBuf,
    mut raw_rx: mpsc::Receiver<Event>,
    event_tx: mpsc::Sender<FileChangeEvent>,
    debounce: Duration,
    cancel: CancellationToken,
) {
    let mut pending: HashMap<PathBuf, (FileChangeKind, Instant)> = HashMap::new();
    let tick = debounce.max(Duration::from_millis(10)) / 2;
    let mut interval = tokio::time::interval(tick.max(Duration::from_millis(5)));

    loop {
        tokio::select! {
            biased;

            _ = cancel.cancelled() => break,

            event = raw_rx.recv() => {
                let Some(event) = event else { break };
                if let Some((absolute, kind)) = classify(&event) {
                    let Ok(relative) = absolute.strip_prefix(&root) else {
                        continue;
                    };
                    if !is_watchable(relative) {
                        continue;
                    }
                    let relative = relative.to_path_buf();
                    let kind = match kind {
                        FileChangeKind::Moved { from } => FileChangeKind::Moved {
                            from: from
                                .strip_prefix(&root)
                                .map(Path::to_path_buf)
                                .unwrap_or(from),
                        },
                        other => other,
                    };
                    pending.insert(relative, (kind, Instant::now()));
                }
            }

            _ = interval.tick() => {
                let now = Instant::now();
                let ready: Vec<PathBuf> = pending
                    .iter()
                    .filter(|(_, (_, at))| now.duration_since(*at) >= debounce)
                    .map(|(path, _)| path.clone())
                    .collect();
                for path in ready {
                    if let Some((kind, _)) = pending.remove(&path) {
                        if event_tx
                            .send(FileChangeEvent { path, kind })
                            .await
                            .is_err()
                        {
                            return;
                        }
                    }
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_is_watchable() {
        assert!(is_watchable(Path::new("src/main.rs")));
        assert!(!is_watchable(Path::new("node_modules/pkg/index.js")));
        assert!(!is_watchable(Path::new(".git/HEAD")));
        assert!(!is_watchable(Path::new("target/debug/app")));
    }

    #[test]
    fn test_classify_create_and_remove() {
        let create = Event::new(EventKind::Create(notify::event::CreateKind::File))
            .add_path(PathBuf::from("/repo/a.rs"));
        assert_eq!(
            classify(&create),
            Some((PathBuf::from("/repo/a.rs"), FileChangeKind::Created))
        );

        let remove = Event::new(EventKind::Remove(notify::event::RemoveKind::File))
            .add_path(PathBuf::from("/repo/a.rs"));
        assert_eq!(
            classify(&remove),
            Some((PathBuf::from("/repo/a.rs"), FileChangeKind::Deleted))
        );
    }

    #[test]
    fn test_classify_rename_pair_as_move() {
        let event = Event::new(EventKind::Modify(ModifyKind::Name(RenameMode::Both)))
            .add_path(PathBuf::from("/repo/old.rs"))
            .add_path(PathBuf::from("/repo/new.rs"));
        let (path, kind) = classify(&event).unwrap();
        assert_eq!(path, PathBuf::from("/repo/new.rs"));
        assert_eq!(
            kind,
            FileChangeKind::Moved {
                from: PathBuf::from("/repo/old.rs")
            }
        );
    }

    #[tokio::test]
    async fn test_watcher_emits_debounced_events() {
        let dir = tempfile::tempdir().unwrap();
        let cancel = CancellationToken::new();
        let mut watcher =
            FileWatcher::subscribe(dir.path(), Duration::from_millis(50), cancel.clone()).unwrap();

        tokio::time::sleep(Duration::from_millis(50)).await;
        std::fs::write(dir.path().join("a.py"), "x = 1\n").unwrap();
        std::fs::write(dir.path().join("a.py"), "x = 2\n").unwrap();

        let event = tokio::time::timeout(Duration::from_secs(5), watcher.next())
            .await
            .expect("watcher should emit within the timeout")
            .expect("channel open");
        assert_eq!(event.path, PathBuf::from("a.py"));
        assert!(matches!(
            event.kind,
            FileChangeKind::Created | FileChangeKind::Modified
        ));
        cancel.cancel();
    }
}
