#![forbid(unsafe_code)]

use crate::JobError;
use crate::args::{JobKind, TRIPOD_CONFIG, TRIPOD_CONFIG_GENERATOR};
use pr_core::stat::{SUBMIT_RETRY, StatSink};
use pr_storage::{SqliteQueue, StoreError, TaskStatus};
use serde_json::Value as JsonValue;
use std::time::Duration;

/// The task queue as the submission layer sees it, plus the config cache
/// jobs resolve generator tokens against.
pub trait TaskSystem {
    fn enqueue(&mut self, queue: &str, kind: &str, payload: &JsonValue)
    -> Result<String, StoreError>;
    fn status(&self, token: &str) -> Result<Option<TaskStatus>, StoreError>;
    fn cache_config(&mut self, config_json: &str) -> Result<String, StoreError>;
    fn cached_config(&self, token: &str) -> Result<Option<String>, StoreError>;
}

impl TaskSystem for SqliteQueue {
    fn enqueue(
        &mut self,
        queue: &str,
        kind: &str,
        payload: &JsonValue,
    ) -> Result<String, StoreError> {
        self.task_enqueue(queue, kind, payload)
    }

    fn status(&self, token: &str) -> Result<Option<TaskStatus>, StoreError> {
        Ok(self.task_get(token)?.map(|task| task.status))
    }

    fn cache_config(&mut self, config_json: &str) -> Result<String, StoreError> {
        self.config_put(config_json)
    }

    fn cached_config(&self, token: &str) -> Result<Option<String>, StoreError> {
        self.config_get(token)
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct SubmitPolicy {
    pub attempts: u32,
    pub backoff: Duration,
}

impl Default for SubmitPolicy {
    fn default() -> Self {
        Self {
            attempts: 5,
            backoff: Duration::from_secs(1),
        }
    }
}

enum Attempt {
    Submitted(String),
    Retry(String),
}

/// Enqueues one job and returns its tracking token.
///
/// An inline configuration is swapped for a cache token first. Each attempt
/// enqueues and then checks the token resolves; a failed attempt sleeps
/// `policy.backoff` and tries again until `policy.attempts` are used up.
pub fn submit_job<T: TaskSystem + ?Sized>(
    tasks: &mut T,
    policy: SubmitPolicy,
    stat: &dyn StatSink,
    queue: &str,
    kind: JobKind,
    mut payload: JsonValue,
) -> Result<String, JobError> {
    cache_inline_config(tasks, &mut payload);

    let attempts = policy.attempts.max(1);
    let mut last_reason = String::new();
    for attempt in 1..=attempts {
        match attempt_submit(tasks, queue, kind, &payload) {
            Attempt::Submitted(token) => {
                tracing::debug!(%token, queue, job = %kind, attempt, "submitted job");
                return Ok(token);
            }
            Attempt::Retry(reason) => {
                stat.increment(SUBMIT_RETRY);
                tracing::warn!(
                    queue,
                    job = %kind,
                    attempt,
                    attempts,
                    reason = %reason,
                    "job submission failed"
                );
                last_reason = reason;
            }
        }
        if attempt < attempts && !policy.backoff.is_zero() {
            std::thread::sleep(policy.backoff);
        }
    }
    Err(JobError::Submission {
        attempts,
        reason: last_reason,
    })
}

fn attempt_submit<T: TaskSystem + ?Sized>(
    tasks: &mut T,
    queue: &str,
    kind: JobKind,
    payload: &JsonValue,
) -> Attempt {
    let token = match tasks.enqueue(queue, kind.as_str(), payload) {
        Ok(token) => token,
        Err(err) => return Attempt::Retry(err.to_string()),
    };
    match tasks.status(&token) {
        Ok(Some(_)) => Attempt::Submitted(token),
        Ok(None) => Attempt::Retry(format!("submitted job {token} could not be found")),
        Err(err) => Attempt::Retry(err.to_string()),
    }
}

/// Replaces `tripodConfig` with `tripodConfigGenerator`. On a cache failure
/// the payload keeps its inline copy.
fn cache_inline_config<T: TaskSystem + ?Sized>(tasks: &mut T, payload: &mut JsonValue) {
    let Some(args) = payload.as_object_mut() else {
        return;
    };
    let raw = match args.get(TRIPOD_CONFIG) {
        Some(JsonValue::String(raw)) => raw.clone(),
        Some(JsonValue::Object(_)) => args[TRIPOD_CONFIG].to_string(),
        _ => return,
    };
    match tasks.cache_config(&raw) {
        Ok(token) => {
            args.remove(TRIPOD_CONFIG);
            args.insert(TRIPOD_CONFIG_GENERATOR.to_string(), JsonValue::String(token));
        }
        Err(err) => {
            tracing::warn!(error = %err, "config cache unavailable, submitting inline config");
        }
    }
}
