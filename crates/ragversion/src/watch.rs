//! Continuous tracking of a directory.
//!
//! [`DirectoryWatcher`] subscribes to file system notifications under a root
//! and runs every affected path through [`Tracker::track`] once the path has
//! been quiet for the debounce window, so a burst of writes to one file
//! becomes a single tracking pass. A rename is tracked as a deletion of the
//! old path and a creation of the new one.
//!
//! Notifications arrive on a `notify` thread and are forwarded over an
//! unbounded channel to a Tokio task that owns the debounce state.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

use notify::{Event, EventKind, RecommendedWatcher, RecursiveMode, Watcher};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::Instant;

use ragversion_core::models::Metadata;
use ragversion_core::{Error, Result};

use crate::detector::normalize_path;
use crate::scan::PathFilter;
use crate::tracker::Tracker;

pub const DEFAULT_DEBOUNCE: Duration = Duration::from_millis(500);

#[derive(Debug, Clone)]
pub struct WatchOptions {
    /// Same matching rules as directory runs. Empty means every file.
    pub patterns: Vec<String>,
    pub exclude: Vec<String>,
    pub recursive: bool,
    pub debounce: Duration,
    /// Attached to every version the watcher records.
    pub metadata: Option<Metadata>,
}

impl Default for WatchOptions {
    fn default() -> Self {
        Self {
            patterns: Vec::new(),
            exclude: Vec::new(),
            recursive: true,
            debounce: DEFAULT_DEBOUNCE,
            metadata: None,
        }
    }
}

/// Which notified paths belong to the watch.
struct Scope {
    root: PathBuf,
    canonical_root: Option<PathBuf>,
    filter: PathFilter,
    recursive: bool,
}

impl Scope {
    fn relative<'a>(&self, path: &'a Path) -> Option<&'a Path> {
        path.strip_prefix(&self.root).ok().or_else(|| {
            self.canonical_root
                .as_ref()
                .and_then(|root| path.strip_prefix(root).ok())
        })
    }

    /// Dot-files are skipped; editors use them for swap and lock files.
    fn wants(&self, path: &Path) -> bool {
        let Some(relative) = self.relative(path) else {
            return false;
        };
        if relative.as_os_str().is_empty() {
            return false;
        }
        if !self.recursive && relative.components().count() != 1 {
            return false;
        }
        let Some(name) = path.file_name() else {
            return false;
        };
        if name.to_string_lossy().starts_with('.') {
            return false;
        }
        self.filter.matches(relative, Path::new(name))
    }
}

/// Paths an event may have changed. Access and unclassified events yield none.
fn affected_paths(event: &Event) -> &[PathBuf] {
    match event.kind {
        EventKind::Any | EventKind::Create(_) | EventKind::Modify(_) | EventKind::Remove(_) => {
            event.paths.as_slice()
        }
        EventKind::Access(_) | EventKind::Other => &[],
    }
}

fn watch_error(path: &Path, err: notify::Error) -> Error {
    Error::io(path, std::io::Error::other(err.to_string()))
}

/// A running watch. Dropping it stops delivery immediately; [`stop`](Self::stop)
/// also tracks whatever was still waiting out its debounce window.
pub struct DirectoryWatcher {
    root: PathBuf,
    watcher: Option<RecommendedWatcher>,
    task: JoinHandle<()>,
}

impl DirectoryWatcher {
    /// Start watching `dir`. Must be called from within a Tokio runtime.
    pub fn start(tracker: Tracker, dir: impl AsRef<Path>, options: WatchOptions) -> Result<Self> {
        let root = normalize_path(dir.as_ref())?;
        if !root.is_dir() {
            return Err(Error::io(
                &root,
                std::io::Error::new(std::io::ErrorKind::NotFound, "directory does not exist"),
            ));
        }
        let scope = Scope {
            canonical_root: std::fs::canonicalize(&root).ok().filter(|c| *c != root),
            root: root.clone(),
            filter: PathFilter::new(&options.patterns, &options.exclude)?,
            recursive: options.recursive,
        };

        let (tx, rx) = mpsc::unbounded_channel();
        let mut watcher = notify::recommended_watcher(move |res: notify::Result<Event>| {
            // The receiver only goes away once the watch is being torn down.
            let _ = tx.send(res);
        })
        .map_err(|e| watch_error(&root, e))?;
        let mode = if options.recursive {
            RecursiveMode::Recursive
        } else {
            RecursiveMode::NonRecursive
        };
        watcher.watch(&root, mode).map_err(|e| watch_error(&root, e))?;

        tracing::info!(
            root = %root.display(),
            recursive = options.recursive,
            debounce_ms = options.debounce.as_millis() as u64,
            "watching directory"
        );
        let task = tokio::spawn(debounce_loop(
            tracker,
            scope,
            options.debounce,
            options.metadata,
            rx,
        ));

        Ok(Self {
            root,
            watcher: Some(watcher),
            task,
        })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Stop watching and wait until pending paths have been tracked.
    pub async fn stop(mut self) {
        self.watcher.take();
        if let Err(e) = (&mut self.task).await {
            tracing::error!(root = %self.root.display(), error = %e, "watch task ended abnormally");
        }
        tracing::info!(root = %self.root.display(), "stopped watching directory");
    }
}

impl Drop for DirectoryWatcher {
    fn drop(&mut self) {
        self.task.abort();
    }
}

async fn debounce_loop(
    tracker: Tracker,
    scope: Scope,
    debounce: Duration,
    metadata: Option<Metadata>,
    mut rx: mpsc::UnboundedReceiver<notify::Result<Event>>,
) {
    let mut pending: HashMap<PathBuf, Instant> = HashMap::new();
    loop {
        let next_due = pending.values().min().copied();
        tokio::select! {
            received = rx.recv() => match received {
                Some(Ok(event)) => {
                    let due = Instant::now() + debounce;
                    for path in affected_paths(&event) {
                        if scope.wants(path) {
                            pending.insert(path.clone(), due);
                        }
                    }
                }
                Some(Err(e)) => tracing::warn!(root = %scope.root.display(), error = %e, "watch error"),
                None => break,
            },
            _ = tokio::time::sleep_until(next_due.unwrap_or_else(Instant::now)), if next_due.is_some() => {
                let now = Instant::now();
                let mut ready: Vec<PathBuf> = pending
                    .iter()
                    .filter(|(_, due)| **due <= now)
                    .map(|(path, _)| path.clone())
                    .collect();
                ready.sort();
                for path in ready {
                    pending.remove(&path);
                    track_path(&tracker, &path, metadata.clone()).await;
                }
            }
        }
    }

    let mut rest: Vec<PathBuf> = pending.into_keys().collect();
    rest.sort();
    for path in rest {
        track_path(&tracker, &path, metadata.clone()).await;
    }
}

async fn track_path(tracker: &Tracker, path: &Path, metadata: Option<Metadata>) {
    if tokio::fs::metadata(path).await.is_ok_and(|m| m.is_dir()) {
        return;
    }
    match tracker.track(path, metadata).await {
        Ok(result) => {
            if let Some(event) = result.event {
                tracing::debug!(
                    path = %event.file_path,
                    version = event.version_number,
                    change = %event.change_kind,
                    "watched change tracked"
                );
            }
        }
        Err(e) => tracing::warn!(
            path = %path.display(),
            category = e.category().as_str(),
            error = %e,
            "failed to track watched file"
        ),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use notify::event::{AccessKind, CreateKind, ModifyKind, RemoveKind, RenameMode};

    fn event(kind: EventKind, paths: &[&str]) -> Event {
        let mut event = Event::new(kind);
        for path in paths {
            event = event.add_path(PathBuf::from(path));
        }
        event
    }

    fn scope(patterns: &[&str], recursive: bool) -> Scope {
        let patterns: Vec<String> = patterns.iter().map(|p| p.to_string()).collect();
        Scope {
            root: PathBuf::from("/data/docs"),
            canonical_root: None,
            filter: PathFilter::new(&patterns, &["drafts/**".to_string()]).unwrap(),
            recursive,
        }
    }

    #[test]
    fn test_changes_report_their_paths() {
        let created = event(EventKind::Create(CreateKind::File), &["/d/a.md"]);
        assert_eq!(affected_paths(&created), [PathBuf::from("/d/a.md")]);

        let removed = event(EventKind::Remove(RemoveKind::File), &["/d/a.md"]);
        assert_eq!(affected_paths(&removed).len(), 1);

        let renamed = event(
            EventKind::Modify(ModifyKind::Name(RenameMode::Both)),
            &["/d/old.md", "/d/new.md"],
        );
        assert_eq!(
            affected_paths(&renamed),
            [PathBuf::from("/d/old.md"), PathBuf::from("/d/new.md")]
        );
    }

    #[test]
    fn test_reads_are_ignored() {
        let read = event(EventKind::Access(AccessKind::Read), &["/d/a.md"]);
        assert!(affected_paths(&read).is_empty());
        assert!(affected_paths(&event(EventKind::Other, &["/d/a.md"])).is_empty());
    }

    #[test]
    fn test_scope_applies_patterns_and_depth() {
        let nested = scope(&["*.md"], true);
        assert!(nested.wants(Path::new("/data/docs/guide.md")));
        assert!(nested.wants(Path::new("/data/docs/sub/deep.md")));
        assert!(!nested.wants(Path::new("/data/docs/notes.txt")));
        assert!(!nested.wants(Path::new("/data/docs/drafts/wip.md")));
        assert!(!nested.wants(Path::new("/data/docs/.guide.md.swp")));
        assert!(!nested.wants(Path::new("/elsewhere/guide.md")));
        assert!(!nested.wants(Path::new("/data/docs")));

        let flat = scope(&[], false);
        assert!(flat.wants(Path::new("/data/docs/notes.txt")));
        assert!(!flat.wants(Path::new("/data/docs/sub/deep.md")));
    }

    #[tokio::test]
    async fn test_missing_directory_is_io_error() {
        let tracker = Tracker::open(crate::Config::in_memory()).await.unwrap();
        let err = DirectoryWatcher::start(tracker, "/no/such/dir", WatchOptions::default())
            .err()
            .unwrap();
        assert_eq!(err.category().as_str(), "io");
    }
}
