//! Entry point tying the builder, the job queue and the watcher together.
//!
//! Every mutating operation returns a job id immediately; callers poll
//! [`Indexer::status`] or block on [`Indexer::wait`].

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{debug, info};
use uuid::Uuid;

use crate::builder::{
    BuildError, FileStatus, GraphBuilder, IndexOptions, canonical_lossy, check_path,
};
use crate::jobs::{
    JobError, JobId, JobKind, JobManager, JobManagerConfig, JobStatus, TrackedJob,
};
use crate::store::{GraphBackend, GraphStats, StoreError};
use crate::watcher::{
    BridgeEvent, FileWatcher, WatchAction, WatchError, WatchHandle, WatcherConfig, spawn_bridge,
};

/// Error type for indexer operations.
#[derive(Debug, thiserror::Error)]
pub enum IndexerError {
    #[error(transparent)]
    Build(#[from] BuildError),
    #[error(transparent)]
    Job(#[from] JobError),
    #[error(transparent)]
    Watch(#[from] WatchError),
    #[error(transparent)]
    Store(#[from] StoreError),
    #[error("Watch not found: {0}")]
    WatchNotFound(String),
}

pub type Result<T> = std::result::Result<T, IndexerError>;

/// Indexer configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct IndexerConfig {
    pub jobs: JobManagerConfig,
    /// Debounce window for watch mode.
    pub debounce_ms: u64,
}

impl Default for IndexerConfig {
    fn default() -> Self {
        Self {
            jobs: JobManagerConfig::default(),
            debounce_ms: 300,
        }
    }
}

/// Request to index a directory or file.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IndexRequest {
    pub path: PathBuf,
    #[serde(default)]
    pub options: IndexOptions,
}

impl IndexRequest {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            options: IndexOptions::default(),
        }
    }
}

/// Reply to a watch request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WatchResponse {
    /// The long-running watch job.
    pub job_id: JobId,
    pub watch_id: String,
    /// The initial full index of the root.
    pub index_job_id: JobId,
}

struct ActiveWatch {
    job: TrackedJob,
    handle: WatchHandle,
}

/// Incremental code graph indexer.
pub struct Indexer {
    // Dropped first so bridge threads stop before the workers.
    watches: Mutex<HashMap<String, ActiveWatch>>,
    builder: Arc<GraphBuilder>,
    jobs: Arc<JobManager>,
    config: IndexerConfig,
}

impl Indexer {
    pub fn new(backend: Arc<dyn GraphBackend>, config: IndexerConfig) -> Self {
        Self {
            watches: Mutex::new(HashMap::new()),
            builder: Arc::new(GraphBuilder::new(backend)),
            jobs: Arc::new(JobManager::new(config.jobs.clone())),
            config,
        }
    }

    pub fn backend(&self) -> &Arc<dyn GraphBackend> {
        self.builder.backend()
    }

    /// Queue a full index of `request.path`.
    ///
    /// Missing or unreadable paths are rejected here, before a job exists.
    pub fn index_path(&self, request: IndexRequest) -> Result<JobId> {
        let root = check_path(&request.path)?;
        submit_index(&self.jobs, &self.builder, root, request.options)
    }

    /// Queue a re-index of a single file.
    pub fn index_file(&self, path: &Path) -> Result<JobId> {
        let path = check_path(path)?;
        submit_index_file(&self.jobs, &self.builder, path)
    }

    /// Queue removal of a file, directory or repository from the graph.
    pub fn remove_path(&self, path: &Path) -> Result<JobId> {
        submit_removal(&self.jobs, &self.builder, canonical_lossy(path), false)
    }

    /// Index `path` and keep the graph in sync with changes under it.
    pub fn watch(&self, path: &Path) -> Result<WatchResponse> {
        self.watch_with(IndexRequest::new(path))
    }

    /// [`Indexer::watch`] with explicit index options.
    pub fn watch_with(&self, request: IndexRequest) -> Result<WatchResponse> {
        let root = check_path(&request.path)?;
        let config = WatcherConfig {
            ignore_patterns: request.options.ignore_patterns.clone(),
            include_dependencies: request.options.include_dependencies,
            ..WatcherConfig::with_debounce_ms(self.config.debounce_ms)
        };
        let watcher = FileWatcher::with_config(&root, config)?;

        let job = self.jobs.track(JobKind::Watch, Some(root.clone()))?;
        let index_job_id = submit_index(&self.jobs, &self.builder, root.clone(), request.options)?;

        let sink = {
            let jobs = self.jobs.clone();
            let builder = self.builder.clone();
            let job = job.clone();
            move |event: BridgeEvent| match event {
                BridgeEvent::Action(_) if job.is_cancelled() => {}
                BridgeEvent::Action(action) => {
                    let submitted = match action {
                        WatchAction::Index(path) => submit_index_file(&jobs, &builder, path),
                        WatchAction::Remove(path) => submit_removal(&jobs, &builder, path, true),
                    };
                    match submitted {
                        Ok(id) => {
                            debug!(job_id = %id, "Queued watch update");
                            job.tick();
                        }
                        Err(e) => job.warn(format!("failed to queue update: {e}")),
                    }
                }
                BridgeEvent::Degraded(message) => job.warn(format!("degraded watch: {message}")),
            }
        };
        let handle = match spawn_bridge(watcher, sink) {
            Ok(handle) => handle,
            Err(e) => {
                job.fail(e.to_string());
                return Err(e.into());
            }
        };

        let watch_id = Uuid::new_v4().to_string();
        info!(watch_id = %watch_id, job_id = %job.id(), root = %root.display(), "Watch started");
        let response = WatchResponse {
            job_id: job.id().to_string(),
            watch_id: watch_id.clone(),
            index_job_id,
        };
        self.watches
            .lock()
            .insert(watch_id, ActiveWatch { job, handle });
        Ok(response)
    }

    /// Stop a watch and complete its job.
    pub fn unwatch(&self, watch_id: &str) -> Result<()> {
        let watch = self
            .watches
            .lock()
            .remove(watch_id)
            .ok_or_else(|| IndexerError::WatchNotFound(watch_id.to_string()))?;
        let root = watch.handle.root().to_path_buf();
        watch.handle.stop();
        watch.job.complete();
        info!(watch_id = %watch_id, root = %root.display(), "Watch stopped");
        Ok(())
    }

    /// Ids of active watches.
    pub fn watches(&self) -> Vec<String> {
        self.watches.lock().keys().cloned().collect()
    }

    /// Queue a Cypher query against the backend.
    pub fn query(&self, cypher: &str) -> Result<JobId> {
        let backend = self.builder.backend().clone();
        let cypher = cypher.to_string();
        Ok(self.jobs.submit(
            JobKind::Query,
            None,
            Box::new(move |_ctx| {
                let result = backend.cypher(&cypher).map_err(|e| e.to_string())?;
                serde_json::to_value(result).map_err(|e| e.to_string())
            }),
        )?)
    }

    pub fn stats(&self) -> Result<GraphStats> {
        Ok(self.builder.backend().stats()?)
    }

    pub fn status(&self, job_id: &str) -> Result<JobStatus> {
        Ok(self.jobs.status(job_id)?)
    }

    pub fn list(&self) -> Vec<JobStatus> {
        self.jobs.list()
    }

    /// Request cancellation. Cancelling a watch job also stops its watcher.
    pub fn cancel(&self, job_id: &str) -> Result<bool> {
        let cancelled = self.jobs.cancel(job_id)?;
        let watch_id = self
            .watches
            .lock()
            .iter()
            .find(|(_, watch)| watch.job.id() == job_id)
            .map(|(id, _)| id.clone());
        if let Some(watch_id) = watch_id {
            self.unwatch(&watch_id)?;
        }
        Ok(cancelled)
    }

    /// Block until the job finishes or `timeout` passes.
    pub fn wait(&self, job_id: &str, timeout: Duration) -> Result<JobStatus> {
        Ok(self.jobs.wait(job_id, timeout)?)
    }

    /// Drop finished jobs older than `max_age`.
    pub fn cleanup(&self, max_age: Duration) -> usize {
        self.jobs.cleanup(max_age)
    }
}

fn to_value<T: Serialize>(value: &T) -> std::result::Result<Value, String> {
    serde_json::to_value(value).map_err(|e| e.to_string())
}

fn submit_index(
    jobs: &JobManager,
    builder: &Arc<GraphBuilder>,
    root: PathBuf,
    options: IndexOptions,
) -> Result<JobId> {
    let builder = builder.clone();
    let path = root.clone();
    Ok(jobs.submit(
        JobKind::Index,
        Some(root),
        Box::new(move |ctx| {
            let report = builder
                .index_path(&path, &options, ctx)
                .map_err(|e| e.to_string())?;
            let value = to_value(&report)?;
            if report.all_failed() {
                ctx.set_result(value);
                return Err(format!(
                    "all {} attempted files failed",
                    report.stats.files_failed
                ));
            }
            Ok(value)
        }),
    )?)
}

fn submit_index_file(
    jobs: &JobManager,
    builder: &Arc<GraphBuilder>,
    path: PathBuf,
) -> Result<JobId> {
    let builder = builder.clone();
    let file = path.clone();
    Ok(jobs.submit(
        JobKind::Index,
        Some(path),
        Box::new(move |ctx| {
            let outcome = builder.index_file(&file).map_err(|e| e.to_string())?;
            let value = to_value(&outcome)?;
            if outcome.status == FileStatus::Failed {
                ctx.set_result(value);
                return Err(outcome
                    .error
                    .unwrap_or_else(|| format!("failed to index {}", outcome.path)));
            }
            Ok(value)
        }),
    )?)
}

/// With `lenient`, a path the graph never held is not an error; watch
/// removals of files that were never indexed land here.
fn submit_removal(
    jobs: &JobManager,
    builder: &Arc<GraphBuilder>,
    path: PathBuf,
    lenient: bool,
) -> Result<JobId> {
    let builder = builder.clone();
    let target = path.clone();
    Ok(jobs.submit(
        JobKind::Index,
        Some(path),
        Box::new(move |_ctx| match builder.remove_path(&target) {
            Ok(stats) => to_value(&stats),
            Err(BuildError::PathNotFound(_)) if lenient => Ok(Value::Null),
            Err(e) => Err(e.to_string()),
        }),
    )?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::jobs::JobState;
    use crate::store::MemoryStore;
    use std::fs;
    use tempfile::tempdir;

    const WAIT: Duration = Duration::from_secs(10);

    fn indexer() -> Indexer {
        Indexer::new(Arc::new(MemoryStore::new()), IndexerConfig::default())
    }

    #[test]
    fn test_index_job_completes_with_report() {
        let dir = tempdir().unwrap();
        fs::write(dir.path().join("a.py"), "def helper():\n    pass\n").unwrap();
        let indexer = indexer();

        let id = indexer.index_path(IndexRequest::new(dir.path())).unwrap();
        let status = indexer.wait(&id, WAIT).unwrap();
        assert_eq!(status.status, JobState::Completed);
        assert_eq!(status.kind, JobKind::Index);
        assert_eq!(status.processed, 1);
        let report = status.result.unwrap();
        assert_eq!(report["stats"]["files_indexed"], 1);
        assert!(indexer.stats().unwrap().node_count > 0);
    }

    #[test]
    fn test_missing_path_rejected_without_job() {
        let dir = tempdir().unwrap();
        let indexer = indexer();
        let err = indexer
            .index_path(IndexRequest::new(dir.path().join("missing")))
            .unwrap_err();
        assert!(matches!(err, IndexerError::Build(BuildError::PathNotFound(_))));
        assert!(indexer.list().is_empty());
    }

    #[test]
    fn test_remove_unknown_path_fails_job() {
        let dir = tempdir().unwrap();
        let indexer = indexer();
        let id = indexer.remove_path(&dir.path().join("gone.py")).unwrap();
        let status = indexer.wait(&id, WAIT).unwrap();
        assert_eq!(status.status, JobState::Failed);
        assert!(status.error.unwrap().contains("Path not found"));
    }

    #[test]
    fn test_query_unsupported_on_memory_backend() {
        let indexer = indexer();
        let id = indexer.query("MATCH (n) RETURN n").unwrap();
        let status = indexer.wait(&id, WAIT).unwrap();
        assert_eq!(status.kind, JobKind::Query);
        assert_eq!(status.status, JobState::Failed);
    }

    #[test]
    #[serial_test::serial]
    fn test_cancelling_watch_job_stops_watcher() {
        let dir = tempdir().unwrap();
        fs::write(dir.path().join("a.py"), "x = 1\n").unwrap();
        let indexer = indexer();

        let watch = indexer.watch(dir.path()).unwrap();
        assert_eq!(indexer.watches(), vec![watch.watch_id.clone()]);
        indexer.wait(&watch.index_job_id, WAIT).unwrap();

        assert!(indexer.cancel(&watch.job_id).unwrap());
        assert!(indexer.watches().is_empty());
        assert_eq!(
            indexer.status(&watch.job_id).unwrap().status,
            JobState::Cancelled
        );
    }

    #[test]
    #[serial_test::serial]
    fn test_removed_root_degrades_watch() {
        let dir = tempdir().unwrap();
        let root = dir.path().join("project");
        fs::create_dir(&root).unwrap();
        fs::write(root.join("a.py"), "def helper():\n    pass\n").unwrap();
        let indexer = Indexer::new(
            Arc::new(MemoryStore::new()),
            IndexerConfig {
                debounce_ms: 50,
                ..Default::default()
            },
        );

        let watch = indexer.watch(&root).unwrap();
        indexer.wait(&watch.index_job_id, WAIT).unwrap();
        fs::remove_dir_all(&root).unwrap();

        let deadline = std::time::Instant::now() + WAIT;
        let status = loop {
            let status = indexer.status(&watch.job_id).unwrap();
            if status.warnings.iter().any(|w| w.starts_with("degraded watch:")) {
                break status;
            }
            assert!(std::time::Instant::now() < deadline, "no degraded warning: {status:?}");
            std::thread::sleep(Duration::from_millis(50));
        };
        assert_eq!(status.status, JobState::Running);

        indexer.unwatch(&watch.watch_id).unwrap();
        assert_eq!(
            indexer.status(&watch.job_id).unwrap().status,
            JobState::Completed
        );
    }

    #[test]
    fn test_unknown_watch() {
        let indexer = indexer();
        assert!(matches!(
            indexer.unwatch("nope"),
            Err(IndexerError::WatchNotFound(_))
        ));
    }
}
