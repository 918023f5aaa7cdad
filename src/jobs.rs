//! Background parse jobs.
//!
//! [`JobManager`] turns "decode this file" requests into [`ParseJob`]s that run
//! on the blocking pool of an injected tokio runtime. It guarantees:
//!
//! - a file whose signature still matches the memory cache completes at once;
//! - at most one active decode per path (a second submit joins the first);
//! - progress observed through [`JobManager::poll`] never decreases;
//! - decode failures, decoder panics included, end the job in
//!   [`JobStatus::Error`] and never reach the caller of `submit` or `poll`.
//!
//! The job table, the path index and the [`MemoryCache`] share one
//! `parking_lot::Mutex`. It is only held for bookkeeping, never across I/O.
//! Finished jobs are never removed.

use crate::collector::Dataset;
use crate::decoder::{collect_file, RecordDecoder};
use crate::error::{AppResult, StdfError};
use crate::memory_cache::{FileSignature, MemoryCache};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::any::Any;
use std::collections::HashMap;
use std::panic::{self, AssertUnwindSafe};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Instant;
use tokio::runtime::Handle;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

/// Percent reported while a decode is still running.
const MAX_RUNNING_PERCENT: u8 = 99;

/// Lifecycle of a parse job.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JobStatus {
    /// Queued, decode not started.
    Pending,
    /// Decoding.
    Running,
    /// Dataset is in the memory cache.
    Done,
    /// Decode failed; see `error`.
    Error,
}

impl JobStatus {
    /// Pending and running jobs are active; done and error are terminal.
    pub fn is_active(self) -> bool {
        matches!(self, JobStatus::Pending | JobStatus::Running)
    }
}

/// Mutable job state, owned by the manager.
#[derive(Debug, Clone)]
pub struct ParseJob {
    /// Job id handed to callers.
    pub id: Uuid,
    /// Absolute path being decoded.
    pub file_path: PathBuf,
    /// Final path component.
    pub filename: String,
    /// Current lifecycle state.
    pub status: JobStatus,
    /// 0..=99 while active, 100 once done.
    pub percent: u8,
    /// Failure message, set with `JobStatus::Error`.
    pub error: Option<String>,
}

impl ParseJob {
    fn new(path: &Path) -> Self {
        Self {
            id: Uuid::new_v4(),
            file_path: path.to_path_buf(),
            filename: path
                .file_name()
                .map(|name| name.to_string_lossy().into_owned())
                .unwrap_or_default(),
            status: JobStatus::Pending,
            percent: 0,
            error: None,
        }
    }

    fn snapshot(&self) -> JobSnapshot {
        JobSnapshot {
            job_id: self.id,
            file_path: self.file_path.clone(),
            filename: self.filename.clone(),
            status: self.status,
            percent: self.percent,
            error: self.error.clone(),
        }
    }

    /// Max-merge so late or out-of-order callbacks cannot move progress back.
    fn advance(&mut self, percent: u8) {
        if self.status.is_active() && percent > self.percent {
            self.percent = percent;
        }
    }
}

/// Point-in-time copy of a job, as returned to callers.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JobSnapshot {
    /// Job id.
    pub job_id: Uuid,
    /// Path being decoded.
    pub file_path: PathBuf,
    /// Final path component.
    pub filename: String,
    /// Status at snapshot time.
    pub status: JobStatus,
    /// Progress at snapshot time.
    pub percent: u8,
    /// Failure message for errored jobs.
    pub error: Option<String>,
}

/// A dataset handed to the analytics layer.
#[derive(Debug, Clone)]
pub struct LoadedDataset {
    /// Shared with the memory cache.
    pub dataset: Arc<Dataset>,
    /// Decode time in seconds; `None` when served from the memory cache.
    pub parse_time: Option<f64>,
}

#[derive(Default)]
struct State {
    jobs: HashMap<Uuid, ParseJob>,
    by_path: HashMap<PathBuf, Uuid>,
    memory: MemoryCache,
}

struct Inner {
    state: Mutex<State>,
    decoder: Arc<dyn RecordDecoder>,
    runtime: Handle,
}

/// Deduplicating parse job manager. Cheap to clone; clones share state.
#[derive(Clone)]
pub struct JobManager {
    inner: Arc<Inner>,
}

impl std::fmt::Debug for JobManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let state = self.inner.state.lock();
        f.debug_struct("JobManager")
            .field("jobs", &state.jobs.len())
            .field("cached_datasets", &state.memory.len())
            .finish()
    }
}

fn signature_of(path: &Path) -> AppResult<FileSignature> {
    FileSignature::of(path).map_err(|e| match e.kind() {
        std::io::ErrorKind::NotFound => StdfError::file_not_found(path),
        _ => StdfError::Io(e),
    })
}

fn panic_message(payload: &(dyn Any + Send)) -> &str {
    payload
        .downcast_ref::<&str>()
        .copied()
        .or_else(|| payload.downcast_ref::<String>().map(String::as_str))
        .unwrap_or("unknown panic payload")
}

fn percent_of(bytes_read: u64, total_bytes: u64) -> u8 {
    if total_bytes == 0 {
        return 0;
    }
    let percent = u128::from(bytes_read) * 100 / u128::from(total_bytes);
    u8::try_from(percent.min(u128::from(MAX_RUNNING_PERCENT))).unwrap_or(MAX_RUNNING_PERCENT)
}

impl JobManager {
    /// Decodes run on `runtime`'s blocking pool.
    pub fn new(decoder: Arc<dyn RecordDecoder>, runtime: Handle) -> Self {
        Self {
            inner: Arc::new(Inner {
                state: Mutex::new(State::default()),
                decoder,
                runtime,
            }),
        }
    }

    /// Starts (or joins, or short-circuits) a decode of `path`.
    ///
    /// Fails only with `NotFound` when the file does not exist, or `Io` when
    /// its metadata cannot be read.
    pub fn submit(&self, path: &Path) -> AppResult<JobSnapshot> {
        let signature = signature_of(path)?;

        let mut state = self.inner.state.lock();

        if state.memory.get(path, &signature).is_some() {
            let mut job = ParseJob::new(path);
            job.status = JobStatus::Done;
            job.percent = 100;
            let snapshot = job.snapshot();
            state.jobs.insert(job.id, job);
            info!(job_id = %snapshot.job_id, path = %path.display(), "memory cache hit, job completed");
            return Ok(snapshot);
        }

        if let Some(active) = state
            .by_path
            .get(path)
            .and_then(|id| state.jobs.get(id))
            .filter(|job| job.status.is_active())
        {
            info!(job_id = %active.id, path = %path.display(), "joined active parse job");
            return Ok(active.snapshot());
        }

        let job = ParseJob::new(path);
        let job_id = job.id;
        let snapshot = job.snapshot();
        state.jobs.insert(job_id, job);
        state.by_path.insert(path.to_path_buf(), job_id);
        drop(state);

        info!(%job_id, path = %path.display(), "parse job spawned");
        let inner = Arc::clone(&self.inner);
        let path = path.to_path_buf();
        self.inner
            .runtime
            .spawn_blocking(move || inner.run(job_id, path));

        Ok(snapshot)
    }

    /// Current state of a job.
    pub fn poll(&self, job_id: Uuid) -> AppResult<JobSnapshot> {
        self.inner
            .state
            .lock()
            .jobs
            .get(&job_id)
            .map(ParseJob::snapshot)
            .ok_or_else(|| StdfError::NotFound(format!("job {job_id} does not exist")))
    }

    /// Returns the dataset for `path`, decoding synchronously on a memory miss.
    ///
    /// Unlike `submit`, decode errors propagate to the caller. This path does
    /// not consult the job table, so it sits outside the at-most-one-decode
    /// guarantee: a call made while a job for the same path is running decodes
    /// the file a second time.
    pub fn load(&self, path: &Path) -> AppResult<LoadedDataset> {
        let signature = signature_of(path)?;
        if let Some(dataset) = self.inner.state.lock().memory.get(path, &signature) {
            debug!(path = %path.display(), "dataset served from memory cache");
            return Ok(LoadedDataset {
                dataset,
                parse_time: None,
            });
        }

        let started = Instant::now();
        let dataset = Arc::new(collect_file(self.inner.decoder.as_ref(), path, None)?);
        let parse_time = started.elapsed().as_secs_f64();
        info!(
            path = %path.display(),
            records = dataset.record_count(),
            parse_time,
            "file decoded"
        );

        self.inner
            .state
            .lock()
            .memory
            .insert(path.to_path_buf(), signature, Arc::clone(&dataset));
        Ok(LoadedDataset {
            dataset,
            parse_time: Some(parse_time),
        })
    }

    /// Number of datasets held in the memory cache.
    pub fn cached_datasets(&self) -> usize {
        self.inner.state.lock().memory.len()
    }
}

impl Inner {
    fn run(&self, job_id: Uuid, path: PathBuf) {
        self.update(job_id, |job| job.status = JobStatus::Running);
        debug!(%job_id, path = %path.display(), "parse job running");
        let started = Instant::now();

        let outcome = panic::catch_unwind(AssertUnwindSafe(|| self.decode(job_id, &path)))
            .unwrap_or_else(|payload| {
                Err(StdfError::Task(format!(
                    "decoder panicked: {}",
                    panic_message(payload.as_ref())
                )))
            });

        match outcome {
            Ok((signature, dataset)) => {
                let records = dataset.record_count();
                let mut state = self.state.lock();
                state.memory.insert(path.clone(), signature, Arc::new(dataset));
                if let Some(job) = state.jobs.get_mut(&job_id) {
                    job.status = JobStatus::Done;
                    job.percent = 100;
                }
                drop(state);
                info!(
                    %job_id,
                    path = %path.display(),
                    records,
                    elapsed_ms = started.elapsed().as_millis() as u64,
                    "parse job done"
                );
            }
            Err(e) => {
                let message = e.to_string();
                error!(%job_id, path = %path.display(), error = %message, "parse job failed");
                self.update(job_id, |job| {
                    job.status = JobStatus::Error;
                    job.error = Some(message);
                });
            }
        }
    }

    /// The signature is taken before decoding, so a file rewritten mid-decode
    /// leaves an entry that can never match.
    fn decode(&self, job_id: Uuid, path: &Path) -> AppResult<(FileSignature, Dataset)> {
        let signature = signature_of(path)?;
        let total_bytes = signature.size;
        let mut report = |bytes_read: u64| {
            let percent = percent_of(bytes_read, total_bytes);
            self.update(job_id, |job| job.advance(percent));
        };
        let dataset = collect_file(self.decoder.as_ref(), path, Some(&mut report))?;
        Ok((signature, dataset))
    }

    fn update(&self, job_id: Uuid, apply: impl FnOnce(&mut ParseJob)) {
        match self.state.lock().jobs.get_mut(&job_id) {
            Some(job) => apply(job),
            None => warn!(%job_id, "update for unknown job"),
        }
    }
}
