//! File system watcher for incremental graph updates.
//!
//! [`FileWatcher`] wraps a debounced `notify` watcher: repeated events for
//! one path inside the debounce window arrive as a single entry, and the
//! action for it is computed from the file's state at delivery time. A
//! path that exists is re-indexed, a path that is gone is removed, so a
//! rename becomes a removal of the old path plus an index of the new one.
//!
//! [`spawn_bridge`] runs a watcher on its own thread and hands every action
//! to a sink, typically one that submits jobs.

use std::collections::BTreeSet;
use std::path::{Component, Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::{Receiver, RecvTimeoutError, channel};
use std::thread::JoinHandle;
use std::time::Duration;

use ignore::gitignore::{Gitignore, GitignoreBuilder};
use notify::{RecommendedWatcher, RecursiveMode};
use notify_debouncer_mini::{DebounceEventResult, Debouncer, new_debouncer};
use tracing::{debug, info, warn};

use crate::builder::{IGNORE_FILE, is_dependency_path};
use crate::parser::Parser;

/// Error type for file watcher operations.
#[derive(Debug, thiserror::Error)]
pub enum WatchError {
    #[error("Notify error: {0}")]
    Notify(#[from] notify::Error),
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("Gitignore error: {0}")]
    Gitignore(#[from] ignore::Error),
    #[error("Not a directory: {}", .0.display())]
    NotADirectory(PathBuf),
}

pub type Result<T> = std::result::Result<T, WatchError>;

/// What to do about a changed path.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord)]
pub enum WatchAction {
    /// The file exists: index it.
    Index(PathBuf),
    /// The file is gone: remove it from the graph.
    Remove(PathBuf),
}

impl WatchAction {
    pub fn path(&self) -> &Path {
        match self {
            WatchAction::Index(p) | WatchAction::Remove(p) => p,
        }
    }
}

/// Result of one poll of the watcher.
#[derive(Debug)]
pub enum WatchEvent {
    Changes(Vec<WatchAction>),
    /// The underlying watcher reported a problem; watching continues.
    Error(String),
    Timeout,
    /// The watcher was dropped.
    Closed,
}

/// Configuration for the file watcher.
#[derive(Debug, Clone)]
pub struct WatcherConfig {
    /// Debounce duration for rapid events.
    pub debounce_duration: Duration,
    /// File extensions to watch (e.g., "rs", "py").
    pub extensions: Vec<String>,
    /// Whether to respect .gitignore and .codegraphignore files.
    pub use_gitignore: bool,
    /// Additional ignore patterns.
    pub ignore_patterns: Vec<String>,
    /// Watch dependency directories at the root as well.
    pub include_dependencies: bool,
}

impl WatcherConfig {
    pub fn with_debounce_ms(debounce_ms: u64) -> Self {
        Self {
            debounce_duration: Duration::from_millis(debounce_ms),
            ..Default::default()
        }
    }
}

impl Default for WatcherConfig {
    fn default() -> Self {
        Self {
            debounce_duration: Duration::from_millis(300),
            extensions: Parser::supported_extensions()
                .into_iter()
                .map(str::to_string)
                .collect(),
            use_gitignore: true,
            ignore_patterns: vec!["target".to_string(), "__pycache__".to_string()],
            include_dependencies: false,
        }
    }
}

/// File system watcher with debouncing and filtering.
pub struct FileWatcher {
    _debouncer: Debouncer<RecommendedWatcher>,
    rx: Receiver<DebounceEventResult>,
    config: WatcherConfig,
    gitignore: Option<Gitignore>,
    root: PathBuf,
}

impl FileWatcher {
    /// Create a new file watcher for the given root directory.
    pub fn new(root: &Path) -> Result<Self> {
        Self::with_config(root, WatcherConfig::default())
    }

    /// Create a new file watcher with custom configuration.
    pub fn with_config(root: &Path, config: WatcherConfig) -> Result<Self> {
        if !root.is_dir() {
            return Err(WatchError::NotADirectory(root.to_path_buf()));
        }
        let (tx, rx) = channel();

        let mut debouncer = new_debouncer(config.debounce_duration, tx)?;
        debouncer.watcher().watch(root, RecursiveMode::Recursive)?;

        let gitignore = if config.use_gitignore {
            match Self::build_gitignore(root, &config.ignore_patterns) {
                Ok(gitignore) => Some(gitignore),
                Err(e) => {
                    warn!(root = %root.display(), error = %e, "Ignoring unreadable ignore files");
                    None
                }
            }
        } else {
            None
        };
        debug!(root = %root.display(), "Watching for changes");

        Ok(Self {
            _debouncer: debouncer,
            rx,
            config,
            gitignore,
            root: root.to_path_buf(),
        })
    }

    /// Build a gitignore matcher from ignore files and custom patterns.
    fn build_gitignore(root: &Path, extra_patterns: &[String]) -> Result<Gitignore> {
        let mut builder = GitignoreBuilder::new(root);

        for name in [".gitignore", IGNORE_FILE] {
            let path = root.join(name);
            if path.exists() {
                if let Some(e) = builder.add(&path) {
                    return Err(e.into());
                }
            }
        }
        for pattern in extra_patterns {
            builder.add_line(None, pattern)?;
        }

        Ok(builder.build()?)
    }

    /// Check if a path should be ignored.
    fn should_ignore(&self, path: &Path) -> bool {
        if path.is_dir() {
            return true;
        }

        let supported = path
            .extension()
            .and_then(|e| e.to_str())
            .is_some_and(|ext| self.config.extensions.iter().any(|e| e.eq_ignore_ascii_case(ext)));
        if !supported {
            return true;
        }

        let Ok(relative) = path.strip_prefix(&self.root) else {
            return true;
        };
        // Dependency directories follow the include flag, not the ignore files.
        if is_dependency_path(&self.root, path) {
            return !self.config.include_dependencies;
        }
        let hidden = relative.components().any(|c| match c {
            Component::Normal(name) => name.to_str().is_some_and(|n| n.starts_with('.')),
            _ => false,
        });
        if hidden {
            return true;
        }

        if let Some(ref gi) = self.gitignore {
            if gi.matched_path_or_any_parents(path, false).is_ignore() {
                return true;
            }
        }

        false
    }

    /// Turn a batch of changed paths into actions, one per path.
    pub fn actions_for(&self, paths: impl IntoIterator<Item = PathBuf>) -> Vec<WatchAction> {
        let unique: BTreeSet<PathBuf> = paths
            .into_iter()
            .filter(|path| !self.should_ignore(path))
            .collect();
        unique
            .into_iter()
            .map(|path| {
                if path.is_file() {
                    WatchAction::Index(path)
                } else {
                    WatchAction::Remove(path)
                }
            })
            .collect()
    }

    /// Wait up to `timeout` for the next debounced batch.
    pub fn poll(&self, timeout: Duration) -> WatchEvent {
        match self.rx.recv_timeout(timeout) {
            Ok(Ok(events)) => {
                WatchEvent::Changes(self.actions_for(events.into_iter().map(|event| event.path)))
            }
            Ok(Err(error)) => WatchEvent::Error(error.to_string()),
            Err(RecvTimeoutError::Timeout) => WatchEvent::Timeout,
            Err(RecvTimeoutError::Disconnected) => WatchEvent::Closed,
        }
    }

    /// Get the root directory being watched.
    pub fn root(&self) -> &Path {
        &self.root
    }
}

/// What a bridge reports to its sink.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BridgeEvent {
    Action(WatchAction),
    /// Watching continues but may miss changes.
    Degraded(String),
}

/// A running watcher thread. Dropping the handle stops it.
pub struct WatchHandle {
    stop: Arc<AtomicBool>,
    thread: Option<JoinHandle<()>>,
    root: PathBuf,
}

impl WatchHandle {
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Stop the watcher and wait for its thread to exit.
    pub fn stop(mut self) {
        self.shutdown();
    }

    fn shutdown(&mut self) {
        self.stop.store(true, Ordering::SeqCst);
        if let Some(thread) = self.thread.take() {
            let _ = thread.join();
        }
    }
}

impl Drop for WatchHandle {
    fn drop(&mut self) {
        self.shutdown();
    }
}

const POLL_INTERVAL: Duration = Duration::from_millis(100);

/// Run `watcher` on a background thread, passing actions to `sink`.
pub fn spawn_bridge<F>(watcher: FileWatcher, mut sink: F) -> Result<WatchHandle>
where
    F: FnMut(BridgeEvent) + Send + 'static,
{
    let stop = Arc::new(AtomicBool::new(false));
    let root = watcher.root().to_path_buf();
    let flag = stop.clone();

    let thread = std::thread::Builder::new()
        .name("codegraph-watch".to_string())
        .spawn(move || {
            let mut root_missing = false;
            while !flag.load(Ordering::SeqCst) {
                match watcher.poll(POLL_INTERVAL) {
                    WatchEvent::Changes(actions) => {
                        for action in actions {
                            debug!(action = ?action, "Watch action");
                            sink(BridgeEvent::Action(action));
                        }
                    }
                    WatchEvent::Error(message) => {
                        warn!(root = %watcher.root().display(), error = %message, "Watcher error");
                        sink(BridgeEvent::Degraded(message));
                    }
                    WatchEvent::Timeout => {}
                    WatchEvent::Closed => {
                        sink(BridgeEvent::Degraded("watcher channel closed".to_string()));
                        break;
                    }
                }
                if !root_missing && !watcher.root().exists() {
                    root_missing = true;
                    let message = format!("watched root {} was removed", watcher.root().display());
                    warn!(root = %watcher.root().display(), "Watched root removed");
                    sink(BridgeEvent::Degraded(message));
                }
            }
            info!(root = %watcher.root().display(), "Watcher stopped");
        })?;

    Ok(WatchHandle {
        stop,
        thread: Some(thread),
        root,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use serial_test::serial;
    use std::fs;
    use std::sync::mpsc;
    use std::thread;
    use tempfile::tempdir;

    #[test]
    fn test_watcher_config_default() {
        let config = WatcherConfig::default();
        assert_eq!(config.debounce_duration, Duration::from_millis(300));
        assert!(config.extensions.contains(&"py".to_string()));
        assert!(config.extensions.contains(&"js".to_string()));
        assert!(config.use_gitignore);
        assert_eq!(
            WatcherConfig::with_debounce_ms(50).debounce_duration,
            Duration::from_millis(50)
        );
    }

    #[test]
    fn test_watch_action_path() {
        let path = PathBuf::from("/test/file.rs");
        assert_eq!(WatchAction::Index(path.clone()).path(), path.as_path());
        assert_eq!(WatchAction::Remove(path.clone()).path(), path.as_path());
    }

    #[test]
    #[serial]
    fn test_watcher_rejects_missing_root() {
        let temp_dir = tempdir().unwrap();
        let missing = temp_dir.path().join("nope");
        assert!(matches!(
            FileWatcher::new(&missing),
            Err(WatchError::NotADirectory(_))
        ));
    }

    #[test]
    #[serial]
    fn test_should_ignore() {
        let temp_dir = tempdir().unwrap();
        let root = temp_dir.path().canonicalize().unwrap();
        fs::write(root.join(IGNORE_FILE), "generated.py\n").unwrap();
        let config = WatcherConfig {
            ignore_patterns: vec!["ignored_dir".to_string()],
            ..Default::default()
        };
        let watcher = FileWatcher::with_config(&root, config).unwrap();

        assert!(!watcher.should_ignore(&root.join("main.py")));
        assert!(watcher.should_ignore(&root.join("notes.txt")));
        assert!(watcher.should_ignore(&root.join("generated.py")));
        assert!(watcher.should_ignore(&root.join("ignored_dir/a.py")));
        assert!(watcher.should_ignore(&root.join("node_modules/x/index.js")));
        assert!(watcher.should_ignore(&root.join(".git/hooks/x.py")));
    }

    #[test]
    #[serial]
    fn test_actions_collapse_and_follow_file_state() {
        let temp_dir = tempdir().unwrap();
        let root = temp_dir.path().canonicalize().unwrap();
        let watcher = FileWatcher::new(&root).unwrap();

        // A rename shows up as the old path (gone) and the new path (present).
        let old = root.join("old.py");
        let new = root.join("new.py");
        fs::write(&new, "x = 1").unwrap();

        let actions = watcher.actions_for(vec![
            new.clone(),
            old.clone(),
            new.clone(),
            root.join("readme.md"),
        ]);
        assert_eq!(
            actions,
            vec![WatchAction::Index(new), WatchAction::Remove(old)]
        );
    }

    #[test]
    #[serial]
    fn test_bridge_reports_changes() {
        let temp_dir = tempdir().unwrap();
        let root = temp_dir.path().canonicalize().unwrap();
        let watcher =
            FileWatcher::with_config(&root, WatcherConfig::with_debounce_ms(50)).unwrap();
        let (tx, rx) = mpsc::channel();
        let handle = spawn_bridge(watcher, move |event| {
            let _ = tx.send(event);
        })
        .unwrap();

        let file_path = root.join("test.rs");
        fs::write(&file_path, "fn main() {}").unwrap();

        let mut found = false;
        for _ in 0..50 {
            match rx.recv_timeout(Duration::from_millis(100)) {
                Ok(BridgeEvent::Action(WatchAction::Index(path))) if path == file_path => {
                    found = true;
                    break;
                }
                _ => thread::sleep(Duration::from_millis(10)),
            }
        }
        handle.stop();
        assert!(found, "Should detect file creation");
    }
}
