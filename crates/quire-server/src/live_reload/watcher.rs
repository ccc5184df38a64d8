//! Filesystem change detection.
//!
//! Directories are watched one by one, non-recursively. A [`WatchSet`] is a
//! snapshot of the directories that existed when it was collected; a
//! directory created afterwards is only observed once a new set is collected
//! and a new [`ChangeWatcher`] is established over it.

use std::path::{Path, PathBuf};

use notify::event::ModifyKind;
use notify::{Event, EventKind, RecommendedWatcher, RecursiveMode, Watcher};
use tokio::sync::mpsc;
use walkdir::WalkDir;

/// Kind of filesystem change.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ChangeKind {
    Created,
    Modified,
    Removed,
}

/// A single observed change.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ChangeEvent {
    pub path: PathBuf,
    pub kind: ChangeKind,
}

/// Watcher failure. Every variant is fatal to the dev loop.
#[derive(Debug, thiserror::Error)]
pub enum WatchError {
    #[error("failed to create file watcher: {0}")]
    Construct(#[source] notify::Error),

    #[error("failed to watch {}: {source}", path.display())]
    Watch {
        path: PathBuf,
        #[source]
        source: notify::Error,
    },

    #[error("failed to walk {}: {source}", path.display())]
    Walk {
        path: PathBuf,
        #[source]
        source: walkdir::Error,
    },

    #[error("file watcher error: {0}")]
    Notify(#[source] notify::Error),
}

/// Directories covered by one watcher registration.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct WatchSet {
    dirs: Vec<PathBuf>,
}

impl WatchSet {
    /// The template root plus every directory under the content root, as
    /// they exist right now.
    pub fn collect(templates_dir: &Path, content_dir: &Path) -> Result<Self, WatchError> {
        let mut dirs = vec![templates_dir.to_path_buf()];
        for entry in WalkDir::new(content_dir).sort_by_file_name() {
            let entry = entry.map_err(|source| WatchError::Walk {
                path: source
                    .path()
                    .map_or_else(|| content_dir.to_path_buf(), Path::to_path_buf),
                source,
            })?;
            if entry.file_type().is_dir() {
                dirs.push(entry.into_path());
            }
        }
        Ok(Self { dirs })
    }

    #[must_use]
    pub fn dirs(&self) -> &[PathBuf] {
        &self.dirs
    }

    #[must_use]
    pub fn contains(&self, dir: &Path) -> bool {
        self.dirs.iter().any(|d| d == dir)
    }
}

/// A live watch registration yielding [`ChangeEvent`]s.
///
/// Dropping it releases the underlying OS watches.
pub struct ChangeWatcher {
    _watcher: RecommendedWatcher,
    rx: mpsc::UnboundedReceiver<notify::Result<Event>>,
}

impl ChangeWatcher {
    /// Register a watch on every directory in `set`.
    pub fn establish(set: &WatchSet) -> Result<Self, WatchError> {
        let (tx, rx) = mpsc::unbounded_channel();
        let mut watcher = notify::recommended_watcher(move |res: notify::Result<Event>| {
            // Receiver gone means the watcher is being dropped.
            let _ = tx.send(res);
        })
        .map_err(WatchError::Construct)?;

        for dir in set.dirs() {
            watcher
                .watch(dir, RecursiveMode::NonRecursive)
                .map_err(|source| WatchError::Watch {
                    path: dir.clone(),
                    source,
                })?;
        }
        tracing::debug!(dirs = set.dirs().len(), "Watching for changes");

        Ok(Self {
            _watcher: watcher,
            rx,
        })
    }

    /// Wait for the next content change.
    ///
    /// Access and metadata-only events are skipped, so reading templates and
    /// content during a build never looks like a change.
    pub async fn next(&mut self) -> Option<Result<ChangeEvent, WatchError>> {
        loop {
            match self.rx.recv().await? {
                Ok(event) => {
                    if let Some(change) = to_change(event) {
                        return Some(Ok(change));
                    }
                }
                Err(source) => return Some(Err(WatchError::Notify(source))),
            }
        }
    }
}

fn to_change(event: Event) -> Option<ChangeEvent> {
    let kind = match event.kind {
        EventKind::Create(_) => ChangeKind::Created,
        EventKind::Modify(ModifyKind::Metadata(_)) => return None,
        EventKind::Modify(_) => ChangeKind::Modified,
        EventKind::Remove(_) => ChangeKind::Removed,
        _ => return None,
    };
    let path = event.paths.into_iter().next().unwrap_or_default();
    Some(ChangeEvent { path, kind })
}
