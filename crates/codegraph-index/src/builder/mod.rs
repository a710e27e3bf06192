//! Graph builder for constructing code graphs from source files.
//!
//! Indexing a repository runs in two phases: a pre-scan collects every
//! file's module-level definitions into a [`SymbolIndex`], then each file is
//! extracted and committed as one atomic batch. Files whose content hash
//! matches the stored File node are skipped, and files that disappeared
//! since the last run are removed.

pub mod commit;
mod discover;

use std::collections::{HashMap, HashSet};
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Instant;

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use tracing::{debug, info, warn};

use crate::extract::ParseIssue;
use crate::lang::extractor_for;
use crate::parser::{Language, ParseError, Parser};
use crate::prescan::SymbolIndex;
use crate::store::{GraphBackend, MutationBatch, StoreError};
use crate::symbols::{Node, NodeLabel, SCHEMA_VERSION, file_key, repo_key};

pub use commit::{CommitPlan, FileInput, plan_file, plan_removal};
pub use discover::{
    DEPENDENCY_DIRS, DiscoveredFile, IGNORE_FILE, discover_files, is_dependency_path,
};

/// Error type for graph building operations.
#[derive(Debug, thiserror::Error)]
pub enum BuildError {
    #[error("Path not found: {}", .0.display())]
    PathNotFound(PathBuf),
    #[error("Permission denied: {}", .0.display())]
    PermissionDenied(PathBuf),
    #[error("Parse error: {0}")]
    Parse(#[from] ParseError),
    #[error("Store error: {0}")]
    Store(#[from] StoreError),
    #[error("IO error: {0}")]
    Io(#[from] io::Error),
}

pub type Result<T> = std::result::Result<T, BuildError>;

/// Per-request indexing options.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct IndexOptions {
    /// Index files under `node_modules`, `venv` and similar directories.
    pub include_dependencies: bool,
    /// Extra gitignore-style patterns to skip.
    pub ignore_patterns: Vec<String>,
}

/// Statistics from a build operation.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct BuildStats {
    pub files_indexed: usize,
    /// Files skipped because their content hash was unchanged.
    pub files_skipped: usize,
    pub files_removed: usize,
    pub files_failed: usize,
    pub nodes_added: usize,
    pub nodes_updated: usize,
    pub nodes_removed: usize,
    pub edges_added: usize,
    pub edges_updated: usize,
    pub edges_removed: usize,
    /// Structural violations rejected (cyclic INHERITS edges).
    pub violations: usize,
}

impl BuildStats {
    /// Merge another BuildStats into this one.
    pub fn merge(&mut self, other: &BuildStats) {
        self.files_indexed += other.files_indexed;
        self.files_skipped += other.files_skipped;
        self.files_removed += other.files_removed;
        self.files_failed += other.files_failed;
        self.nodes_added += other.nodes_added;
        self.nodes_updated += other.nodes_updated;
        self.nodes_removed += other.nodes_removed;
        self.edges_added += other.edges_added;
        self.edges_updated += other.edges_updated;
        self.edges_removed += other.edges_removed;
        self.violations += other.violations;
    }
}

/// What happened to one file.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FileStatus {
    Indexed,
    Unchanged,
    Failed,
    Removed,
}

/// Per-file result of an index or removal.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FileOutcome {
    pub path: String,
    pub status: FileStatus,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub parse_errors: Vec<ParseIssue>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub violations: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    pub stats: BuildStats,
}

impl FileOutcome {
    fn new(path: String, status: FileStatus) -> Self {
        Self {
            path,
            status,
            parse_errors: Vec::new(),
            violations: Vec::new(),
            error: None,
            stats: BuildStats::default(),
        }
    }

    fn unchanged(path: String) -> Self {
        let mut outcome = Self::new(path, FileStatus::Unchanged);
        outcome.stats.files_skipped = 1;
        outcome
    }

    fn failed(path: String, error: impl ToString) -> Self {
        let mut outcome = Self::new(path, FileStatus::Failed);
        outcome.error = Some(error.to_string());
        outcome.stats.files_failed = 1;
        outcome
    }
}

/// Result of indexing a path.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct IndexReport {
    pub root: String,
    pub files_total: usize,
    pub stats: BuildStats,
    pub outcomes: Vec<FileOutcome>,
    pub cancelled: bool,
    pub duration_ms: u64,
}

impl IndexReport {
    fn record(&mut self, outcome: FileOutcome) {
        self.stats.merge(&outcome.stats);
        self.outcomes.push(outcome);
    }

    /// Paths of files that could not be read or parsed.
    pub fn failed_files(&self) -> Vec<&str> {
        self.outcomes
            .iter()
            .filter(|o| o.status == FileStatus::Failed)
            .map(|o| o.path.as_str())
            .collect()
    }

    /// Every file the run attempted failed.
    pub fn all_failed(&self) -> bool {
        self.stats.files_failed > 0
            && self.stats.files_indexed == 0
            && self.stats.files_skipped == 0
    }
}

/// Progress hooks for long-running builds.
pub trait IndexObserver: Send + Sync {
    fn started(&self, _total: usize) {}
    fn file_started(&self, _path: &Path) {}
    fn file_finished(&self, _outcome: &FileOutcome) {}
    /// Checked between files; a cancelled build stops after the current one.
    fn is_cancelled(&self) -> bool {
        false
    }
}

/// Observer that ignores every event.
pub struct NoopObserver;

impl IndexObserver for NoopObserver {}

/// Hex SHA-256 of file content.
pub fn content_hash(bytes: &[u8]) -> String {
    format!("{:x}", Sha256::digest(bytes))
}

/// Check that a path exists and is readable, returning its canonical form.
pub fn check_path(path: &Path) -> Result<PathBuf> {
    let denied = |e: io::Error| match e.kind() {
        io::ErrorKind::NotFound => BuildError::PathNotFound(path.to_path_buf()),
        io::ErrorKind::PermissionDenied => BuildError::PermissionDenied(path.to_path_buf()),
        _ => BuildError::Io(e),
    };
    let metadata = fs::metadata(path).map_err(denied)?;
    if metadata.is_dir() {
        fs::read_dir(path).map_err(denied)?;
    } else {
        fs::File::open(path).map_err(denied)?;
    }
    path.canonicalize().map_err(denied)
}

/// Canonical form of a path that may no longer exist.
pub fn canonical_lossy(path: &Path) -> PathBuf {
    if let Ok(canonical) = path.canonicalize() {
        return canonical;
    }
    let parent = path.parent().and_then(|p| p.canonicalize().ok());
    match (parent, path.file_name()) {
        (Some(parent), Some(name)) => parent.join(name),
        _ => std::path::absolute(path).unwrap_or_else(|_| path.to_path_buf()),
    }
}

/// Per-repository state kept between runs.
struct RepoState {
    root: PathBuf,
    key: String,
    options: IndexOptions,
    symbols: SymbolIndex,
}

/// Coordinates parsing and graph construction.
///
/// The builder is shared by every worker. Each repository's symbol index
/// sits behind its own lock, so files of one repository commit one at a
/// time while different repositories proceed in parallel.
pub struct GraphBuilder {
    backend: Arc<dyn GraphBackend>,
    repos: Mutex<HashMap<PathBuf, Arc<Mutex<RepoState>>>>,
}

impl GraphBuilder {
    pub fn new(backend: Arc<dyn GraphBackend>) -> Self {
        Self {
            backend,
            repos: Mutex::new(HashMap::new()),
        }
    }

    pub fn backend(&self) -> &Arc<dyn GraphBackend> {
        &self.backend
    }

    /// Index a directory (or a single file) and everything under it.
    pub fn index_path(
        &self,
        path: &Path,
        options: &IndexOptions,
        observer: &dyn IndexObserver,
    ) -> Result<IndexReport> {
        let started = Instant::now();
        let root = check_path(path)?;

        if root.is_file() {
            observer.started(1);
            observer.file_started(&root);
            let outcome = self.index_file(&root)?;
            observer.file_finished(&outcome);
            let mut report = IndexReport {
                root: root.to_string_lossy().into_owned(),
                files_total: 1,
                ..Default::default()
            };
            report.record(outcome);
            report.duration_ms = started.elapsed().as_millis() as u64;
            return Ok(report);
        }

        let files = discover_files(&root, options);
        info!(root = %root.display(), files = files.len(), "Indexing repository");
        let repo = self.register(root.clone(), options.clone(), &files);
        let mut state = repo.lock();
        self.ensure_repository(&state)?;

        let mut report = IndexReport {
            root: root.to_string_lossy().into_owned(),
            files_total: files.len(),
            ..Default::default()
        };
        observer.started(files.len());

        let mut parser = Parser::new();
        for file in &files {
            if observer.is_cancelled() {
                info!(root = %root.display(), done = report.outcomes.len(), "Indexing cancelled");
                report.cancelled = true;
                break;
            }
            observer.file_started(&file.path);
            let outcome = self.commit_file(&mut state, &mut parser, file)?;
            observer.file_finished(&outcome);
            report.record(outcome);
        }

        if !report.cancelled {
            let present: HashSet<String> = files
                .iter()
                .map(|f| f.path.to_string_lossy().into_owned())
                .collect();
            for path in self.stored_files(&state.key)? {
                if !present.contains(&path) {
                    let stats = self.remove_file_locked(&mut state, &path)?;
                    let mut outcome = FileOutcome::new(path, FileStatus::Removed);
                    outcome.stats = stats;
                    report.record(outcome);
                }
            }
        }

        report.duration_ms = started.elapsed().as_millis() as u64;
        info!(
            root = %root.display(),
            indexed = report.stats.files_indexed,
            skipped = report.stats.files_skipped,
            failed = report.stats.files_failed,
            removed = report.stats.files_removed,
            duration_ms = report.duration_ms,
            "Indexing finished"
        );
        Ok(report)
    }

    /// Re-index one file inside its repository.
    pub fn index_file(&self, path: &Path) -> Result<FileOutcome> {
        let path = check_path(path)?;
        let language = Language::from_path(&path).ok_or_else(|| {
            ParseError::UnsupportedExtension(
                path.extension()
                    .map(|e| e.to_string_lossy().into_owned())
                    .unwrap_or_else(|| "none".to_string()),
            )
        })?;

        let repo = self.repo_for(&path)?;
        let mut state = repo.lock();
        self.ensure_repository(&state)?;
        let file = DiscoveredFile {
            is_dependency: is_dependency_path(&state.root, &path),
            path,
            language,
        };
        let mut parser = Parser::new();
        self.commit_file(&mut state, &mut parser, &file)
    }

    /// Remove a file, a directory or a whole repository from the graph.
    pub fn remove_path(&self, path: &Path) -> Result<BuildStats> {
        let path = canonical_lossy(path);
        let target = path.to_string_lossy().into_owned();
        let repo = repo_key(&target);
        let is_repo = self.backend.has_node(&repo)?;

        let files: Vec<(String, Option<String>)> = self
            .backend
            .nodes_with_label(NodeLabel::File)?
            .into_iter()
            .filter_map(|node| {
                let file = node.file_path()?.to_string();
                let owner = node.prop_str("repo").map(str::to_string);
                Path::new(&file).starts_with(&path).then_some((file, owner))
            })
            .collect();
        if files.is_empty() && !is_repo {
            return Err(BuildError::PathNotFound(path));
        }

        let mut stats = BuildStats::default();
        for (file, owner) in &files {
            let state = match owner.as_deref().and_then(|k| k.strip_prefix("repo:")) {
                Some(root) => self.repo_at(PathBuf::from(root)),
                None => self.repo_for(Path::new(file))?,
            };
            let mut state = state.lock();
            stats.merge(&self.remove_file_locked(&mut state, file)?);
        }

        if is_repo {
            let mut batch = MutationBatch::new();
            batch.delete_nodes.push(repo);
            self.backend.apply(&batch)?;
            self.repos.lock().remove(&path);
            stats.nodes_removed += 1;
            info!(root = %target, "Removed repository from graph");
        }
        Ok(stats)
    }

    /// Pre-scan `files` and (re)register the repository at `root`.
    fn register(
        &self,
        root: PathBuf,
        options: IndexOptions,
        files: &[DiscoveredFile],
    ) -> Arc<Mutex<RepoState>> {
        let pairs: Vec<(PathBuf, Language)> =
            files.iter().map(|f| (f.path.clone(), f.language)).collect();
        let symbols = SymbolIndex::prescan(&pairs);

        let repo = self.repo_entry(root);
        {
            let mut state = repo.lock();
            state.symbols = symbols;
            state.options = options;
        }
        repo
    }

    fn repo_entry(&self, root: PathBuf) -> Arc<Mutex<RepoState>> {
        self.repos
            .lock()
            .entry(root.clone())
            .or_insert_with(|| {
                Arc::new(Mutex::new(RepoState {
                    key: repo_key(&root.to_string_lossy()),
                    root,
                    options: IndexOptions::default(),
                    symbols: SymbolIndex::new(),
                }))
            })
            .clone()
    }

    /// Registered repository at `root`, pre-scanning it on first use.
    fn repo_at(&self, root: PathBuf) -> Arc<Mutex<RepoState>> {
        if let Some(repo) = self.repos.lock().get(&root) {
            return repo.clone();
        }
        let options = IndexOptions::default();
        let files = discover_files(&root, &options);
        self.register(root, options, &files)
    }

    /// Repository containing `path`: the deepest registered root, else a
    /// root stored by an earlier run, else the file's directory.
    fn repo_for(&self, path: &Path) -> Result<Arc<Mutex<RepoState>>> {
        {
            let repos = self.repos.lock();
            let registered = repos
                .iter()
                .filter(|(root, _)| path.starts_with(root))
                .max_by_key(|(root, _)| root.as_os_str().len())
                .map(|(_, repo)| repo.clone());
            if let Some(repo) = registered {
                return Ok(repo);
            }
        }

        let stored = self
            .backend
            .nodes_with_label(NodeLabel::Repository)?
            .into_iter()
            .filter_map(|node| node.prop_str("root").map(PathBuf::from))
            .filter(|root| path.starts_with(root))
            .max_by_key(|root| root.as_os_str().len());
        let root = stored.unwrap_or_else(|| {
            path.parent()
                .map(Path::to_path_buf)
                .unwrap_or_else(|| path.to_path_buf())
        });
        Ok(self.repo_at(root))
    }

    fn ensure_repository(&self, state: &RepoState) -> Result<()> {
        if self.backend.has_node(&state.key)? {
            return Ok(());
        }
        let name = state
            .root
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();
        let mut batch = MutationBatch::new();
        batch.upsert_nodes.push(
            Node::new(state.key.clone(), NodeLabel::Repository)
                .with("root", state.root.to_string_lossy().into_owned())
                .with("name", name),
        );
        self.backend.apply(&batch)?;
        Ok(())
    }

    /// Paths of File nodes belonging to a repository.
    fn stored_files(&self, repo: &str) -> Result<Vec<String>> {
        Ok(self
            .backend
            .nodes_with_label(NodeLabel::File)?
            .into_iter()
            .filter(|node| node.prop_str("repo") == Some(repo))
            .filter_map(|node| node.file_path().map(str::to_string))
            .collect())
    }

    /// Extract one file and commit it as a single batch.
    ///
    /// Read and parse problems become a failed outcome; storage errors are
    /// returned so the whole job fails.
    fn commit_file(
        &self,
        state: &mut RepoState,
        parser: &mut Parser,
        file: &DiscoveredFile,
    ) -> Result<FileOutcome> {
        let path = file.path.to_string_lossy().into_owned();
        let bytes = match fs::read(&file.path) {
            Ok(bytes) => bytes,
            Err(e) => {
                warn!(path = %path, error = %e, "Failed to read file");
                return Ok(FileOutcome::failed(path, e));
            }
        };
        let hash = content_hash(&bytes);

        if let Some(existing) = self.backend.node(&file_key(&path))? {
            let unchanged = existing.prop_str("hash") == Some(hash.as_str())
                && existing.prop_u64("schema_version") == Some(u64::from(SCHEMA_VERSION))
                && existing.prop_str("repo") == Some(state.key.as_str());
            if unchanged {
                debug!(path = %path, "Content unchanged, skipping");
                return Ok(FileOutcome::unchanged(path));
            }
        }

        let source = String::from_utf8_lossy(&bytes);
        let parsed = match parser.parse_source(&source, file.language) {
            Ok(parsed) => parsed,
            Err(e) => {
                warn!(path = %path, error = %e, "Failed to parse file");
                return Ok(FileOutcome::failed(path, e));
            }
        };
        let extraction = extractor_for(file.language).extract(&parsed);
        if !extraction.parse_errors.is_empty() {
            debug!(path = %path, "File has syntax errors, indexing recovered constructs");
        }

        state.symbols.replace_file(&path, extraction.definitions());
        let plan = plan_file(
            self.backend.as_ref(),
            &state.symbols,
            &FileInput {
                path: &path,
                repo_key: &state.key,
                hash: &hash,
                is_dependency: file.is_dependency,
                extraction: &extraction,
            },
        )?;
        if !plan.batch.is_empty() {
            self.backend.apply(&plan.batch)?;
        }
        debug!(
            path = %path,
            functions = extraction.functions.len(),
            classes = extraction.classes.len(),
            calls = extraction.calls.len(),
            operations = plan.batch.len(),
            "Committed file"
        );

        let mut outcome = FileOutcome::new(path, FileStatus::Indexed);
        outcome.stats = plan.stats;
        outcome.stats.files_indexed = 1;
        outcome.violations = plan.violations;
        outcome.parse_errors = extraction.parse_errors;
        Ok(outcome)
    }

    fn remove_file_locked(&self, state: &mut RepoState, path: &str) -> Result<BuildStats> {
        state.symbols.remove_file(path);
        let plan = plan_removal(self.backend.as_ref(), &state.symbols, &state.key, path)?;
        if !plan.batch.is_empty() {
            self.backend.apply(&plan.batch)?;
        }
        info!(path, "Removed file from graph");
        let mut stats = plan.stats;
        stats.files_removed = 1;
        Ok(stats)
    }
}
