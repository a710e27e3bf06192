//! Background job management.
//!
//! Jobs run on a fixed pool of worker threads fed from a shared queue and
//! report into a status table that callers poll or block on with
//! [`JobManager::wait`]. Jobs whose paths overlap (one is an ancestor of the
//! other) never run at the same time; everything else runs in parallel.
//!
//! Job state machine: `queued -> running -> {completed, failed, cancelled}`.
//! A job cancelled while queued goes straight to `cancelled`; a running job
//! observes cancellation between files.

use std::collections::{HashMap, VecDeque};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use parking_lot::{Condvar, Mutex};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::builder::{FileOutcome, FileStatus, IndexObserver};

/// Identifier handed out by [`JobManager::submit`].
pub type JobId = String;

/// Error type for job operations.
#[derive(Debug, thiserror::Error)]
pub enum JobError {
    #[error("Job not found: {0}")]
    NotFound(JobId),
    #[error("Timed out waiting for job {0}")]
    Timeout(JobId),
    #[error("Job manager is shutting down")]
    ShuttingDown,
}

pub type Result<T> = std::result::Result<T, JobError>;

/// What a job does.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobKind {
    Index,
    Watch,
    #[serde(rename = "cypher")]
    Query,
}

/// Lifecycle state of a job.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobState {
    Queued,
    Running,
    Completed,
    Failed,
    Cancelled,
}

impl JobState {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            JobState::Completed | JobState::Failed | JobState::Cancelled
        )
    }
}

/// Snapshot of a job, serialized for callers.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobStatus {
    pub job_id: JobId,
    pub kind: JobKind,
    pub status: JobState,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub path: Option<String>,
    pub total: usize,
    pub processed: usize,
    pub failed_files: Vec<String>,
    pub error: Option<String>,
    pub warnings: Vec<String>,
    pub current_file: Option<String>,
    pub progress_percent: f64,
    pub estimated_seconds_remaining: Option<u64>,
    pub submitted_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub finished_at: Option<DateTime<Utc>>,
    pub result: Option<serde_json::Value>,
}

impl JobStatus {
    fn new(kind: JobKind, path: Option<&Path>) -> Self {
        Self {
            job_id: Uuid::new_v4().to_string(),
            kind,
            status: JobState::Queued,
            path: path.map(|p| p.to_string_lossy().into_owned()),
            total: 0,
            processed: 0,
            failed_files: Vec::new(),
            error: None,
            warnings: Vec::new(),
            current_file: None,
            progress_percent: 0.0,
            estimated_seconds_remaining: None,
            submitted_at: Utc::now(),
            started_at: None,
            finished_at: None,
            result: None,
        }
    }

    fn finish(&mut self, state: JobState) {
        self.status = state;
        self.finished_at = Some(Utc::now());
        self.current_file = None;
        self.estimated_seconds_remaining = None;
        if state == JobState::Completed {
            self.progress_percent = 100.0;
        }
    }
}

/// Job manager configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct JobManagerConfig {
    /// Worker threads; at least one.
    pub workers: usize,
}

impl Default for JobManagerConfig {
    fn default() -> Self {
        Self {
            workers: std::thread::available_parallelism()
                .map(|n| n.get().min(4))
                .unwrap_or(2),
        }
    }
}

/// Default age after which finished jobs are dropped.
pub const DEFAULT_RETENTION: Duration = Duration::from_secs(24 * 60 * 60);

/// Work a job performs. `Err` carries the failure message.
pub type Work = Box<dyn FnOnce(&JobContext) -> std::result::Result<serde_json::Value, String> + Send>;

struct JobEntry {
    status: JobStatus,
    cancel: Arc<AtomicBool>,
    path: Option<PathBuf>,
    work: Option<Work>,
    started: Option<Instant>,
}

#[derive(Default)]
struct JobTable {
    jobs: HashMap<JobId, JobEntry>,
    /// Submission order, for listing.
    order: Vec<JobId>,
    pending: VecDeque<JobId>,
    /// Paths of running jobs.
    running: HashMap<JobId, PathBuf>,
    shutdown: bool,
}

fn paths_overlap(a: &Path, b: &Path) -> bool {
    a.starts_with(b) || b.starts_with(a)
}

impl JobTable {
    fn path_of(&self, id: &str) -> Option<&Path> {
        self.jobs.get(id).and_then(|entry| entry.path.as_deref())
    }

    fn overlaps_running(&self, path: &Path) -> bool {
        self.running
            .values()
            .any(|running| paths_overlap(path, running))
    }

    /// Index in `pending` of the first job free to start.
    ///
    /// A job waits for running jobs on overlapping paths and for
    /// overlapping jobs queued before it, so overlapping jobs run in
    /// submission order.
    fn next_runnable(&self) -> Option<usize> {
        self.pending.iter().enumerate().position(|(index, id)| {
            let Some(path) = self.path_of(id) else {
                return true;
            };
            !self.overlaps_running(path)
                && !self
                    .pending
                    .iter()
                    .take(index)
                    .filter_map(|earlier| self.path_of(earlier))
                    .any(|earlier| paths_overlap(path, earlier))
        })
    }
}

struct Shared {
    table: Mutex<JobTable>,
    changed: Condvar,
}

impl Shared {
    fn update(&self, id: &str, f: impl FnOnce(&mut JobEntry)) {
        let mut table = self.table.lock();
        if let Some(entry) = table.jobs.get_mut(id) {
            f(entry);
        }
        drop(table);
        self.changed.notify_all();
    }
}

/// Handle a running job uses to report progress.
///
/// Implements [`IndexObserver`] so a build reports straight into the status
/// table and sees cancellation requests.
pub struct JobContext {
    id: JobId,
    cancel: Arc<AtomicBool>,
    shared: Arc<Shared>,
}

impl JobContext {
    pub fn id(&self) -> &str {
        &self.id
    }

    /// Attach a warning to the job.
    pub fn warn(&self, message: impl Into<String>) {
        let message = message.into();
        warn!(job_id = %self.id, warning = %message, "Job warning");
        self.shared.update(&self.id, |entry| entry.status.warnings.push(message));
    }

    /// Record a result, e.g. a partial report before failing.
    pub fn set_result(&self, value: serde_json::Value) {
        self.shared.update(&self.id, |entry| entry.status.result = Some(value));
    }
}

impl IndexObserver for JobContext {
    fn started(&self, total: usize) {
        self.shared.update(&self.id, |entry| entry.status.total = total);
    }

    fn file_started(&self, path: &Path) {
        let current = path.to_string_lossy().into_owned();
        self.shared
            .update(&self.id, |entry| entry.status.current_file = Some(current));
    }

    fn file_finished(&self, outcome: &FileOutcome) {
        self.shared.update(&self.id, |entry| {
            let status = &mut entry.status;
            status.processed += 1;
            if outcome.status == FileStatus::Failed {
                status.failed_files.push(outcome.path.clone());
            }
            status.warnings.extend(outcome.violations.iter().cloned());
            if status.total > 0 {
                status.progress_percent =
                    (status.processed as f64 / status.total as f64 * 100.0).min(100.0);
                if let Some(started) = entry.started {
                    let per_file = started.elapsed().as_secs_f64() / status.processed as f64;
                    let remaining = status.total.saturating_sub(status.processed) as f64;
                    status.estimated_seconds_remaining = Some((per_file * remaining).ceil() as u64);
                }
            }
        });
    }

    fn is_cancelled(&self) -> bool {
        self.cancel.load(Ordering::SeqCst)
    }
}

/// Handle for a long-lived job with no queued work (watch jobs).
#[derive(Clone)]
pub struct TrackedJob {
    id: JobId,
    shared: Arc<Shared>,
}

impl TrackedJob {
    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn warn(&self, message: impl Into<String>) {
        let message = message.into();
        warn!(job_id = %self.id, warning = %message, "Job warning");
        self.shared.update(&self.id, |entry| entry.status.warnings.push(message));
    }

    /// Count one more processed action.
    pub fn tick(&self) {
        self.shared.update(&self.id, |entry| {
            entry.status.processed += 1;
            entry.status.total = entry.status.total.max(entry.status.processed);
        });
    }

    /// Whether someone asked for this job to stop.
    pub fn is_cancelled(&self) -> bool {
        let table = self.shared.table.lock();
        table
            .jobs
            .get(&self.id)
            .is_none_or(|entry| entry.cancel.load(Ordering::SeqCst))
    }

    pub fn complete(&self) {
        let state = if self.is_cancelled() {
            JobState::Cancelled
        } else {
            JobState::Completed
        };
        self.finish(state, None);
        info!(job_id = %self.id, state = ?state, "Job finished");
    }

    pub fn fail(&self, message: impl Into<String>) {
        let message = message.into();
        warn!(job_id = %self.id, error = %message, "Job failed");
        self.finish(JobState::Failed, Some(message));
    }

    fn finish(&self, state: JobState, error: Option<String>) {
        self.shared.update(&self.id, |entry| {
            if !entry.status.status.is_terminal() {
                entry.status.error = error;
                entry.status.finish(state);
            }
        });
    }
}

/// Runs jobs on a fixed pool of worker threads.
pub struct JobManager {
    shared: Arc<Shared>,
    workers: Vec<JoinHandle<()>>,
}

impl JobManager {
    pub fn new(config: JobManagerConfig) -> Self {
        let shared = Arc::new(Shared {
            table: Mutex::new(JobTable::default()),
            changed: Condvar::new(),
        });
        let count = config.workers.max(1);
        let workers = (0..count)
            .map(|n| {
                let shared = shared.clone();
                std::thread::Builder::new()
                    .name(format!("codegraph-worker-{n}"))
                    .spawn(move || worker_loop(shared))
            })
            .filter_map(|spawned| match spawned {
                Ok(handle) => Some(handle),
                Err(e) => {
                    warn!(error = %e, "Failed to spawn worker thread");
                    None
                }
            })
            .collect();
        debug!(workers = count, "Job manager started");
        Self { shared, workers }
    }

    /// Queue a job and return its id without waiting.
    pub fn submit(&self, kind: JobKind, path: Option<PathBuf>, work: Work) -> Result<JobId> {
        let status = JobStatus::new(kind, path.as_deref());
        let id = status.job_id.clone();
        {
            let mut table = self.shared.table.lock();
            if table.shutdown {
                return Err(JobError::ShuttingDown);
            }
            table.jobs.insert(
                id.clone(),
                JobEntry {
                    status,
                    cancel: Arc::new(AtomicBool::new(false)),
                    path,
                    work: Some(work),
                    started: None,
                },
            );
            table.order.push(id.clone());
            table.pending.push_back(id.clone());
        }
        self.shared.changed.notify_all();
        info!(job_id = %id, kind = ?kind, "Job queued");
        Ok(id)
    }

    /// Register a job that is driven by its caller rather than a worker.
    pub fn track(&self, kind: JobKind, path: Option<PathBuf>) -> Result<TrackedJob> {
        let mut status = JobStatus::new(kind, path.as_deref());
        status.status = JobState::Running;
        status.started_at = Some(status.submitted_at);
        let id = status.job_id.clone();
        let mut table = self.shared.table.lock();
        if table.shutdown {
            return Err(JobError::ShuttingDown);
        }
        table.jobs.insert(
            id.clone(),
            JobEntry {
                status,
                cancel: Arc::new(AtomicBool::new(false)),
                path,
                work: None,
                started: Some(Instant::now()),
            },
        );
        table.order.push(id.clone());
        info!(job_id = %id, kind = ?kind, "Job started");
        Ok(TrackedJob {
            id,
            shared: self.shared.clone(),
        })
    }

    pub fn status(&self, id: &str) -> Result<JobStatus> {
        let table = self.shared.table.lock();
        table
            .jobs
            .get(id)
            .map(|entry| entry.status.clone())
            .ok_or_else(|| JobError::NotFound(id.to_string()))
    }

    /// Every known job in submission order.
    pub fn list(&self) -> Vec<JobStatus> {
        let table = self.shared.table.lock();
        table
            .order
            .iter()
            .filter_map(|id| table.jobs.get(id))
            .map(|entry| entry.status.clone())
            .collect()
    }

    /// Request cancellation. Returns false if the job already finished.
    pub fn cancel(&self, id: &str) -> Result<bool> {
        let mut table = self.shared.table.lock();
        let state = table
            .jobs
            .get(id)
            .map(|entry| entry.status.status)
            .ok_or_else(|| JobError::NotFound(id.to_string()))?;
        let cancelled = match state {
            JobState::Queued => {
                table.pending.retain(|pending| pending != id);
                if let Some(entry) = table.jobs.get_mut(id) {
                    entry.work = None;
                    entry.status.finish(JobState::Cancelled);
                }
                info!(job_id = %id, "Queued job cancelled");
                true
            }
            JobState::Running => {
                if let Some(entry) = table.jobs.get(id) {
                    entry.cancel.store(true, Ordering::SeqCst);
                }
                info!(job_id = %id, "Cancellation requested");
                true
            }
            _ => false,
        };
        drop(table);
        self.shared.changed.notify_all();
        Ok(cancelled)
    }

    /// Block until the job reaches a terminal state or `timeout` passes.
    pub fn wait(&self, id: &str, timeout: Duration) -> Result<JobStatus> {
        let deadline = Instant::now() + timeout;
        let mut table = self.shared.table.lock();
        loop {
            let status = table
                .jobs
                .get(id)
                .map(|entry| entry.status.clone())
                .ok_or_else(|| JobError::NotFound(id.to_string()))?;
            if status.status.is_terminal() {
                return Ok(status);
            }
            if self
                .shared
                .changed
                .wait_until(&mut table, deadline)
                .timed_out()
            {
                return Err(JobError::Timeout(id.to_string()));
            }
        }
    }

    /// Drop terminal jobs that finished more than `max_age` ago.
    pub fn cleanup(&self, max_age: Duration) -> usize {
        let cutoff = chrono::Duration::from_std(max_age)
            .ok()
            .and_then(|age| Utc::now().checked_sub_signed(age));
        let Some(cutoff) = cutoff else {
            return 0;
        };
        let mut table = self.shared.table.lock();
        let expired: Vec<JobId> = table
            .jobs
            .iter()
            .filter(|(_, entry)| {
                entry.status.status.is_terminal()
                    && entry.status.finished_at.is_some_and(|at| at <= cutoff)
            })
            .map(|(id, _)| id.clone())
            .collect();
        for id in &expired {
            table.jobs.remove(id);
        }
        table.order.retain(|id| !expired.contains(id));
        if !expired.is_empty() {
            debug!(removed = expired.len(), "Cleaned up finished jobs");
        }
        expired.len()
    }
}

impl Default for JobManager {
    fn default() -> Self {
        Self::new(JobManagerConfig::default())
    }
}

impl Drop for JobManager {
    fn drop(&mut self) {
        {
            let mut table = self.shared.table.lock();
            table.shutdown = true;
            for entry in table.jobs.values() {
                entry.cancel.store(true, Ordering::SeqCst);
            }
        }
        self.shared.changed.notify_all();
        for worker in self.workers.drain(..) {
            let _ = worker.join();
        }
    }
}

fn worker_loop(shared: Arc<Shared>) {
    loop {
        let (id, work, cancel) = {
            let mut table = shared.table.lock();
            let index = loop {
                if table.shutdown {
                    return;
                }
                match table.next_runnable() {
                    Some(index) => break index,
                    None => shared.changed.wait(&mut table),
                }
            };
            let Some(id) = table.pending.remove(index) else {
                continue;
            };
            let Some(entry) = table.jobs.get_mut(&id) else {
                continue;
            };
            let Some(work) = entry.work.take() else {
                continue;
            };
            entry.status.status = JobState::Running;
            entry.status.started_at = Some(Utc::now());
            entry.started = Some(Instant::now());
            let cancel = entry.cancel.clone();
            let path = entry.path.clone();
            if let Some(path) = path {
                table.running.insert(id.clone(), path);
            }
            (id, work, cancel)
        };
        info!(job_id = %id, "Job started");

        let context = JobContext {
            id: id.clone(),
            cancel: cancel.clone(),
            shared: shared.clone(),
        };
        let outcome = work(&context);

        let mut table = shared.table.lock();
        table.running.remove(&id);
        if let Some(entry) = table.jobs.get_mut(&id) {
            let status = &mut entry.status;
            match outcome {
                Ok(value) if cancel.load(Ordering::SeqCst) => {
                    status.result = Some(value);
                    status.finish(JobState::Cancelled);
                    info!(job_id = %id, processed = status.processed, "Job cancelled");
                }
                Ok(value) => {
                    status.result = Some(value);
                    status.finish(JobState::Completed);
                    info!(job_id = %id, processed = status.processed, "Job completed");
                }
                Err(message) => {
                    warn!(job_id = %id, error = %message, "Job failed");
                    status.error = Some(message);
                    status.finish(JobState::Failed);
                }
            }
        }
        drop(table);
        shared.changed.notify_all();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::mpsc;

    fn manager(workers: usize) -> JobManager {
        JobManager::new(JobManagerConfig { workers })
    }

    fn done(value: i64) -> Work {
        Box::new(move |_| Ok(serde_json::json!(value)))
    }

    #[test]
    fn test_job_completes_with_result() {
        let jobs = manager(1);
        let id = jobs.submit(JobKind::Index, None, done(7)).unwrap();
        let status = jobs.wait(&id, Duration::from_secs(5)).unwrap();
        assert_eq!(status.status, JobState::Completed);
        assert_eq!(status.result, Some(serde_json::json!(7)));
        assert!(status.started_at.is_some());
        assert!(status.finished_at.is_some());
        assert_eq!(status.progress_percent, 100.0);
    }

    #[test]
    fn test_job_failure_keeps_message() {
        let jobs = manager(1);
        let id = jobs
            .submit(JobKind::Index, None, Box::new(|_| Err("storage unreachable".to_string())))
            .unwrap();
        let status = jobs.wait(&id, Duration::from_secs(5)).unwrap();
        assert_eq!(status.status, JobState::Failed);
        assert_eq!(status.error.as_deref(), Some("storage unreachable"));
    }

    #[test]
    fn test_cancel_queued_job() {
        let jobs = manager(1);
        let (release, gate) = mpsc::channel::<()>();
        let blocker = jobs
            .submit(
                JobKind::Index,
                Some(PathBuf::from("/repo")),
                Box::new(move |_| {
                    let _ = gate.recv();
                    Ok(serde_json::Value::Null)
                }),
            )
            .unwrap();
        let queued = jobs
            .submit(JobKind::Index, Some(PathBuf::from("/repo/src")), done(1))
            .unwrap();

        assert!(jobs.cancel(&queued).unwrap());
        assert_eq!(jobs.status(&queued).unwrap().status, JobState::Cancelled);
        release.send(()).unwrap();
        assert_eq!(
            jobs.wait(&blocker, Duration::from_secs(5)).unwrap().status,
            JobState::Completed
        );
        assert!(!jobs.cancel(&blocker).unwrap());
    }

    #[test]
    fn test_running_job_observes_cancellation() {
        let jobs = manager(1);
        let (started_tx, started_rx) = mpsc::channel::<()>();
        let id = jobs
            .submit(
                JobKind::Index,
                None,
                Box::new(move |ctx| {
                    let _ = started_tx.send(());
                    while !ctx.is_cancelled() {
                        std::thread::sleep(Duration::from_millis(5));
                    }
                    Ok(serde_json::Value::Null)
                }),
            )
            .unwrap();
        started_rx.recv_timeout(Duration::from_secs(5)).unwrap();
        assert!(jobs.cancel(&id).unwrap());
        let status = jobs.wait(&id, Duration::from_secs(5)).unwrap();
        assert_eq!(status.status, JobState::Cancelled);
    }

    #[test]
    fn test_overlapping_paths_are_serialized() {
        let jobs = manager(2);
        let active = Arc::new(std::sync::atomic::AtomicUsize::new(0));
        let peak = Arc::new(std::sync::atomic::AtomicUsize::new(0));
        let mut ids = Vec::new();
        for path in ["/repo", "/repo/a.py"] {
            let active = active.clone();
            let peak = peak.clone();
            let id = jobs
                .submit(
                    JobKind::Index,
                    Some(PathBuf::from(path)),
                    Box::new(move |_| {
                        let now = active.fetch_add(1, Ordering::SeqCst) + 1;
                        peak.fetch_max(now, Ordering::SeqCst);
                        std::thread::sleep(Duration::from_millis(50));
                        active.fetch_sub(1, Ordering::SeqCst);
                        Ok(serde_json::Value::Null)
                    }),
                )
                .unwrap();
            ids.push(id);
        }
        for id in &ids {
            jobs.wait(id, Duration::from_secs(5)).unwrap();
        }
        assert_eq!(peak.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_overlapping_jobs_run_in_submission_order() {
        let jobs = manager(2);
        let (release_tx, release_rx) = mpsc::channel::<()>();
        let order = Arc::new(parking_lot::Mutex::new(Vec::new()));

        let first = jobs
            .submit(
                JobKind::Index,
                Some(PathBuf::from("/r/a")),
                Box::new(move |_| {
                    let _ = release_rx.recv_timeout(Duration::from_secs(5));
                    Ok(serde_json::Value::Null)
                }),
            )
            .unwrap();
        let deadline = Instant::now() + Duration::from_secs(5);
        while jobs.status(&first).unwrap().status != JobState::Running {
            assert!(Instant::now() < deadline, "first job never started");
            std::thread::sleep(Duration::from_millis(5));
        }

        let mut ids = Vec::new();
        for path in ["/r", "/r/b"] {
            let order = order.clone();
            ids.push(
                jobs.submit(
                    JobKind::Index,
                    Some(PathBuf::from(path)),
                    Box::new(move |_| {
                        order.lock().push(path);
                        Ok(serde_json::Value::Null)
                    }),
                )
                .unwrap(),
            );
        }
        // "/r/b" does not overlap "/r/a" but must still wait behind "/r".
        std::thread::sleep(Duration::from_millis(100));
        assert!(order.lock().is_empty());
        assert_eq!(jobs.status(&ids[1]).unwrap().status, JobState::Queued);

        release_tx.send(()).unwrap();
        for id in ids.iter().chain([&first]) {
            jobs.wait(id, Duration::from_secs(5)).unwrap();
        }
        assert_eq!(*order.lock(), vec!["/r", "/r/b"]);
    }

    #[test]
    fn test_progress_reporting() {
        let jobs = manager(1);
        let id = jobs
            .submit(
                JobKind::Index,
                None,
                Box::new(|ctx| {
                    ctx.started(4);
                    for i in 0..4 {
                        let status = if i == 2 { FileStatus::Failed } else { FileStatus::Indexed };
                        ctx.file_finished(&FileOutcome {
                            path: format!("f{i}.py"),
                            status,
                            parse_errors: Vec::new(),
                            violations: Vec::new(),
                            error: None,
                            stats: Default::default(),
                        });
                    }
                    ctx.warn("slow disk");
                    Ok(serde_json::Value::Null)
                }),
            )
            .unwrap();
        let status = jobs.wait(&id, Duration::from_secs(5)).unwrap();
        assert_eq!(status.total, 4);
        assert_eq!(status.processed, 4);
        assert_eq!(status.failed_files, vec!["f2.py"]);
        assert_eq!(status.warnings, vec!["slow disk"]);
    }

    #[test]
    fn test_list_cleanup_and_unknown_jobs() {
        let jobs = manager(1);
        let id = jobs.submit(JobKind::Query, None, done(1)).unwrap();
        jobs.wait(&id, Duration::from_secs(5)).unwrap();
        let tracked = jobs.track(JobKind::Watch, Some(PathBuf::from("/repo"))).unwrap();
        assert_eq!(jobs.list().len(), 2);

        assert_eq!(jobs.cleanup(DEFAULT_RETENTION), 0);
        assert_eq!(jobs.cleanup(Duration::ZERO), 1);
        assert_eq!(jobs.list().len(), 1);

        tracked.complete();
        assert_eq!(jobs.status(tracked.id()).unwrap().status, JobState::Completed);
        assert!(matches!(jobs.status("missing"), Err(JobError::NotFound(_))));
    }

    #[test]
    fn test_status_serializes_snake_case() {
        let status = JobStatus::new(JobKind::Query, None);
        let json = serde_json::to_value(&status).unwrap();
        assert_eq!(json["kind"], "cypher");
        assert_eq!(json["status"], "queued");
        assert!(json.get("estimated_seconds_remaining").is_some());
    }
}
