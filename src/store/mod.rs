//! Durable progress store for pipeline jobs.
//!
//! Jobs are keyed by `job_id`. Updates are partial merges ([`JobUpdate`]):
//! only the fields a writer sets are touched, so the entry point and a
//! stage worker updating disjoint fields cannot clobber each other.
//! Updating a record that no longer exists is a silent no-op, which is
//! how the pipeline tolerates jobs deleted mid-flight.
//!
//! Two implementations: [`MemoryStore`] for tests and ephemeral runs, and
//! [`JsonStore`] persisting the full job table to a JSON file. Store
//! failures surface as [`PipelineError::Infrastructure`] so the worker
//! leaves the triggering message unacknowledged and the broker redelivers.

use parking_lot::Mutex;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

use crate::error::{PipelineError, Result};
use crate::types::{JobUpdate, PipelineJob, Stage};
use crate::utils::stage_output_path;

/// Key-value persistence for [`PipelineJob`] records.
pub trait ProgressStore: Send + Sync {
    /// Insert a fresh record. Fails if the `job_id` already exists.
    fn insert(&self, job: PipelineJob) -> Result<()>;

    /// Merge a partial update into an existing record.
    ///
    /// Returns the merged snapshot, or `None` (without error) when no
    /// record exists for `job_id`: the job was deleted and the update
    /// is dropped.
    fn upsert(&self, job_id: &str, update: &JobUpdate) -> Result<Option<PipelineJob>>;

    /// Fetch a record by id.
    fn get(&self, job_id: &str) -> Result<Option<PipelineJob>>;

    /// Remove a record and best-effort delete its dataset artifacts.
    ///
    /// Returns the removed record, or `None` if it did not exist.
    fn delete(&self, job_id: &str) -> Result<Option<PipelineJob>>;

    /// All stored records, in no particular order.
    fn list(&self) -> Result<Vec<PipelineJob>>;
}

/// Every artifact path a job may have produced: the original input plus
/// the deterministic per-stage outputs chained off it.
fn job_artifact_paths(job: &PipelineJob) -> Vec<PathBuf> {
    let mut paths = vec![job.input_path.clone()];
    let mut current = job.input_path.clone();
    for stage in Stage::ALL {
        current = stage_output_path(&current, stage);
        paths.push(current.clone());
    }
    paths
}

/// Best-effort removal of a job's artifacts. Missing files are fine;
/// anything else is logged and skipped.
fn remove_artifacts(job: &PipelineJob) {
    for path in job_artifact_paths(job) {
        match std::fs::remove_file(&path) {
            Ok(()) => debug!(job_id = %job.job_id, path = %path.display(), "removed artifact"),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => {
                warn!(job_id = %job.job_id, path = %path.display(), error = %e,
                    "could not remove artifact");
            }
        }
    }
}

/// In-memory store backed by a mutex-guarded map.
#[derive(Debug, Default)]
pub struct MemoryStore {
    jobs: Mutex<HashMap<String, PipelineJob>>,
}

static_assertions::assert_impl_all!(MemoryStore: Send, Sync);

impl MemoryStore {
    /// Create an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

impl ProgressStore for MemoryStore {
    fn insert(&self, job: PipelineJob) -> Result<()> {
        let mut jobs = self.jobs.lock();
        if jobs.contains_key(&job.job_id) {
            return Err(PipelineError::Validation(format!(
                "job '{}' already exists",
                job.job_id
            )));
        }
        jobs.insert(job.job_id.clone(), job);
        Ok(())
    }

    fn upsert(&self, job_id: &str, update: &JobUpdate) -> Result<Option<PipelineJob>> {
        let mut jobs = self.jobs.lock();
        match jobs.get_mut(job_id) {
            Some(job) => {
                update.apply(job);
                Ok(Some(job.clone()))
            }
            None => {
                debug!(job_id, "update for unknown job dropped");
                Ok(None)
            }
        }
    }

    fn get(&self, job_id: &str) -> Result<Option<PipelineJob>> {
        Ok(self.jobs.lock().get(job_id).cloned())
    }

    fn delete(&self, job_id: &str) -> Result<Option<PipelineJob>> {
        let removed = self.jobs.lock().remove(job_id);
        if let Some(ref job) = removed {
            remove_artifacts(job);
        }
        Ok(removed)
    }

    fn list(&self) -> Result<Vec<PipelineJob>> {
        Ok(self.jobs.lock().values().cloned().collect())
    }
}

/// File-backed store persisting the whole job table as pretty JSON.
///
/// Loads the table at open, rewrites the file on every mutation via a
/// temporary sibling and rename. Suited to the single-process deployment
/// this crate targets; persistence failures are reported as transient
/// infrastructure errors.
#[derive(Debug)]
pub struct JsonStore {
    path: PathBuf,
    jobs: Mutex<HashMap<String, PipelineJob>>,
}

static_assertions::assert_impl_all!(JsonStore: Send, Sync);

impl JsonStore {
    /// Open (or create) a store at `path`.
    pub fn open(path: impl Into<PathBuf>) -> Result<Self> {
        let path = path.into();
        let jobs = if path.exists() {
            let bytes = std::fs::read(&path).map_err(|e| {
                PipelineError::Infrastructure(format!(
                    "cannot read store file {}: {e}",
                    path.display()
                ))
            })?;
            serde_json::from_slice(&bytes).map_err(|e| {
                PipelineError::Infrastructure(format!(
                    "corrupt store file {}: {e}",
                    path.display()
                ))
            })?
        } else {
            HashMap::new()
        };
        Ok(Self {
            path,
            jobs: Mutex::new(jobs),
        })
    }

    fn persist(&self, jobs: &HashMap<String, PipelineJob>) -> Result<()> {
        let bytes = serde_json::to_vec_pretty(jobs).map_err(|e| {
            PipelineError::Infrastructure(format!("cannot serialize store: {e}"))
        })?;
        let tmp = self.path.with_extension("json.tmp");
        std::fs::write(&tmp, &bytes)
            .and_then(|()| std::fs::rename(&tmp, &self.path))
            .map_err(|e| {
                PipelineError::Infrastructure(format!(
                    "cannot write store file {}: {e}",
                    self.path.display()
                ))
            })
    }

    /// Path of the backing file.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl ProgressStore for JsonStore {
    fn insert(&self, job: PipelineJob) -> Result<()> {
        let mut jobs = self.jobs.lock();
        if jobs.contains_key(&job.job_id) {
            return Err(PipelineError::Validation(format!(
                "job '{}' already exists",
                job.job_id
            )));
        }
        jobs.insert(job.job_id.clone(), job);
        self.persist(&jobs)
    }

    fn upsert(&self, job_id: &str, update: &JobUpdate) -> Result<Option<PipelineJob>> {
        let mut jobs = self.jobs.lock();
        let snapshot = match jobs.get_mut(job_id) {
            Some(job) => {
                update.apply(job);
                job.clone()
            }
            None => {
                debug!(job_id, "update for unknown job dropped");
                return Ok(None);
            }
        };
        self.persist(&jobs)?;
        Ok(Some(snapshot))
    }

    fn get(&self, job_id: &str) -> Result<Option<PipelineJob>> {
        Ok(self.jobs.lock().get(job_id).cloned())
    }

    fn delete(&self, job_id: &str) -> Result<Option<PipelineJob>> {
        let mut jobs = self.jobs.lock();
        let removed = jobs.remove(job_id);
        if let Some(ref job) = removed {
            self.persist(&jobs)?;
            remove_artifacts(job);
        }
        Ok(removed)
    }

    fn list(&self) -> Result<Vec<PipelineJob>> {
        Ok(self.jobs.lock().values().cloned().collect())
    }
}
