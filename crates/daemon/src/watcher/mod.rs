// Manifest watcher: raw FS event detection and filtering for the
// declarative resource directory. Downstream interpretation (what
// changed for which resource) is the runtime's job.

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use notify::{Event, EventKind, RecommendedWatcher, RecursiveMode, Watcher};
use tokio::sync::mpsc;
use tracing::{debug, error, trace, warn};

/// Raw filesystem event emitted by the watcher for a single manifest.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FsEventKind {
    /// Manifest was created or first detected.
    Create,
    /// Manifest content was modified.
    Modify,
    /// Manifest was deleted.
    Remove,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawFsEvent {
    pub kind: FsEventKind,
    pub path: PathBuf,
}

const EVENT_CHANNEL_CAPACITY: usize = 512;

/// Watches the manifest directory for `.json` changes using the OS-native
/// file watcher (fsevents on macOS, inotify on Linux).
///
/// Events are sent to the returned receiver. The watcher runs until
/// dropped.
pub struct ManifestWatcher {
    _watcher: RecommendedWatcher,
    root: PathBuf,
}

impl ManifestWatcher {
    /// Start watching `root` for `.json` manifest events.
    pub fn start(root: &Path) -> Result<(Self, mpsc::Receiver<RawFsEvent>)> {
        let root = root
            .canonicalize()
            .with_context(|| format!("failed to canonicalize manifest root: {}", root.display()))?;

        let (tx, rx) = mpsc::channel(EVENT_CHANNEL_CAPACITY);

        let root_for_filter = root.clone();
        let mut watcher = notify::recommended_watcher(move |res: notify::Result<Event>| {
            match res {
                Ok(event) => {
                    if let Some(raw_events) = translate_event(&event, &root_for_filter) {
                        for raw in raw_events {
                            if tx.blocking_send(raw).is_err() {
                                // Receiver dropped, nothing left to notify.
                                debug!("event channel closed, stopping event dispatch");
                                return;
                            }
                        }
                    }
                }
                Err(e) => {
                    error!(error = %e, "manifest watcher error");
                }
            }
        })
        .context("failed to create manifest watcher")?;

        watcher
            .watch(&root, RecursiveMode::Recursive)
            .with_context(|| format!("failed to watch directory: {}", root.display()))?;

        debug!(path = %root.display(), "manifest watcher started");

        Ok((Self { _watcher: watcher, root }, rx))
    }

    /// The canonicalized root directory being watched.
    pub fn root(&self) -> &Path {
        &self.root
    }
}

/// Returns true if the path has a `.json` extension (case-insensitive).
fn is_manifest(path: &Path) -> bool {
    path.extension().and_then(|ext| ext.to_str()).is_some_and(|ext| ext.eq_ignore_ascii_case("json"))
}

/// Returns true if the path is inside the watched root (guards against
/// symlink escapes).
fn is_inside_root(path: &Path, root: &Path) -> bool {
    path.starts_with(root)
}

/// Translate a `notify::Event` into zero or more `RawFsEvent`s.
/// Filters for `.json` files inside the root and maps event kinds.
fn translate_event(event: &Event, root: &Path) -> Option<Vec<RawFsEvent>> {
    let kind = match &event.kind {
        EventKind::Create(_) => FsEventKind::Create,
        EventKind::Modify(modify_kind) => {
            use notify::event::ModifyKind;
            match modify_kind {
                ModifyKind::Data(_) => FsEventKind::Modify,
                // Renames surface as modify events for the paths involved.
                ModifyKind::Name(_) => FsEventKind::Modify,
                // Metadata-only changes (permissions, timestamps) are noise.
                ModifyKind::Metadata(_) => {
                    trace!("skipping metadata-only modify event");
                    return None;
                }
                _ => FsEventKind::Modify,
            }
        }
        EventKind::Remove(_) => FsEventKind::Remove,
        // Access, Other, Any — not actionable for manifest tracking.
        _ => {
            trace!(kind = ?event.kind, "skipping non-content event");
            return None;
        }
    };

    let events: Vec<RawFsEvent> = event
        .paths
        .iter()
        .filter(|p| is_manifest(p))
        .filter(|p| {
            if is_inside_root(p, root) {
                true
            } else {
                warn!(path = %p.display(), "ignoring event outside watch root (possible symlink escape)");
                false
            }
        })
        .map(|p| RawFsEvent { kind: kind.clone(), path: p.clone() })
        .collect();

    if events.is_empty() {
        None
    } else {
        Some(events)
    }
}
