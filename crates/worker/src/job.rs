#![forbid(unsafe_code)]

use crate::apply::ApplyJob;
use crate::args::{ConfigSource, JobKind};
use crate::discover::DiscoverJob;
use crate::error::error_chain;
use crate::JobError;
use crate::submit::{SubmitPolicy, TaskSystem};
use pr_core::ids::StoreName;
use pr_core::stat::{JOB_APPLY, JOB_DISCOVER, JOB_FAIL, StatSink};
use pr_core::{Config, Namespaces};
use pr_storage::{SqliteQueue, SqliteStore, StoreError};
use serde_json::Value as JsonValue;
use std::path::Path;
use std::sync::Arc;
use std::time::Instant;

/// One kind of queued job. `from_args` must reject bad arguments without
/// opening any store.
pub trait Job: Sized {
    const KIND: JobKind;

    fn from_args(args: &JsonValue) -> Result<Self, JobError>;

    /// Runs the job; the count is job specific (jobs submitted, subjects
    /// updated).
    fn execute(&self, ctx: &mut JobContext<'_>) -> Result<usize, JobError>;
}

/// Everything a running job may touch besides its own store.
pub struct JobContext<'a> {
    pub storage_dir: &'a Path,
    pub tasks: &'a mut dyn TaskSystem,
    pub stat: &'a dyn StatSink,
    pub policy: SubmitPolicy,
}

impl<'a> JobContext<'a> {
    pub fn resolve_config(&self, source: &ConfigSource) -> Result<Config, JobError> {
        match source {
            ConfigSource::Inline(raw) => Ok(Config::from_json_str(raw)?),
            ConfigSource::Generator(token) => {
                let raw = self
                    .tasks
                    .cached_config(token)?
                    .ok_or_else(|| JobError::Payload(format!("unknown config token {token}")))?;
                Ok(Config::from_json_str(&raw)?)
            }
        }
    }

    /// A lazily opened store; it does not borrow the context.
    pub fn store(&self, store_name: &StoreName, config: &Config) -> StoreHandle<'a> {
        StoreHandle::new(self.storage_dir, store_name.clone(), config.namespaces.clone())
    }
}

/// A store opened on first use and kept for the lifetime of the handle.
#[derive(Debug)]
pub struct StoreHandle<'a> {
    storage_dir: &'a Path,
    store_name: StoreName,
    namespaces: Namespaces,
    store: Option<SqliteStore>,
}

impl<'a> StoreHandle<'a> {
    pub fn new(storage_dir: &'a Path, store_name: StoreName, namespaces: Namespaces) -> Self {
        Self {
            storage_dir,
            store_name,
            namespaces,
            store: None,
        }
    }

    pub fn get(&mut self) -> Result<&mut SqliteStore, StoreError> {
        let store = match self.store.take() {
            Some(store) => store,
            None => {
                tracing::debug!(store = %self.store_name, "opening store");
                SqliteStore::open(self.storage_dir, &self.store_name)?
                    .with_namespaces(self.namespaces.clone())
            }
        };
        Ok(self.store.insert(store))
    }
}

fn run<J: Job>(ctx: &mut JobContext<'_>, args: &JsonValue) -> Result<usize, JobError> {
    let job = J::from_args(args)?;
    job.execute(ctx)
}

/// Validates and runs a job of kind `kind`.
pub fn run_job(
    ctx: &mut JobContext<'_>,
    kind: JobKind,
    args: &JsonValue,
) -> Result<usize, JobError> {
    match kind {
        JobKind::Discover => run::<DiscoverJob>(ctx, args),
        JobKind::Apply => run::<ApplyJob>(ctx, args),
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum TaskOutcome {
    Empty,
    Completed { token: String, count: usize },
    Failed { token: String, error: String },
}

/// Claims and runs jobs from one task queue.
pub struct TaskRunner<'a> {
    pub storage_dir: &'a Path,
    pub stat: Arc<dyn StatSink>,
    pub policy: SubmitPolicy,
}

impl TaskRunner<'_> {
    /// Runs the oldest queued job on `queue_name`. A job error marks the task
    /// failed and is reported in the outcome; only task queue errors are
    /// returned as `Err`.
    pub fn run_next(
        &self,
        queue: &mut SqliteQueue,
        queue_name: &str,
    ) -> Result<TaskOutcome, StoreError> {
        let Some(task) = queue.task_claim_next(queue_name)? else {
            return Ok(TaskOutcome::Empty);
        };
        let started = Instant::now();

        let result = match task.kind.parse::<JobKind>() {
            Ok(kind) => {
                let mut ctx = JobContext {
                    storage_dir: self.storage_dir,
                    tasks: &mut *queue,
                    stat: self.stat.as_ref(),
                    policy: self.policy,
                };
                run_job(&mut ctx, kind, &task.payload).map(|count| (kind, count))
            }
            Err(err) => Err(err),
        };

        match result {
            Ok((kind, count)) => {
                queue.task_complete(&task.token)?;
                let timer = match kind {
                    JobKind::Discover => JOB_DISCOVER,
                    JobKind::Apply => JOB_APPLY,
                };
                let elapsed = u64::try_from(started.elapsed().as_millis()).unwrap_or(u64::MAX);
                self.stat.timer(timer, elapsed);
                tracing::debug!(
                    token = %task.token,
                    job = %kind,
                    count,
                    elapsed_ms = elapsed,
                    "job done"
                );
                Ok(TaskOutcome::Completed {
                    token: task.token,
                    count,
                })
            }
            Err(err) => {
                let error = error_chain(&err);
                queue.task_fail(&task.token, &error)?;
                self.stat.increment(JOB_FAIL);
                tracing::error!(token = %task.token, kind = %task.kind, error = %error, "job failed");
                Ok(TaskOutcome::Failed {
                    token: task.token,
                    error,
                })
            }
        }
    }
}
