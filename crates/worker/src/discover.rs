#![forbid(unsafe_code)]

use crate::args::{self, CHANGES, CONTEXT_ALIAS, ConfigSource, JobKind, OPERATIONS, SUBJECT};
use crate::job::{Job, JobContext};
use crate::submit::submit_job;
use crate::JobError;
use pr_core::ids::{PodName, StoreName};
use pr_core::{ChangedSubjects, Config, ImpactedSubject, OperationType};
use pr_storage::{AnyComposite, Composite, SqliteStore, StoreError};
use serde_json::{Map as JsonMap, Value as JsonValue};

/// Impacted subjects of `changes` across `operations`, in operation order.
pub fn discover_impacted_subjects(
    store: &SqliteStore,
    config: &Config,
    pod: &PodName,
    changes: &ChangedSubjects,
    operations: &[OperationType],
    context_alias: &str,
) -> Result<Vec<ImpactedSubject>, StoreError> {
    let mut subjects = Vec::new();
    for &operation in operations {
        let composite =
            AnyComposite::for_operation(operation, config, store.store_name().clone(), pod.clone());
        let found = composite.impacted_subjects(store, changes, context_alias, None)?;
        if found.is_empty() {
            tracing::debug!(operation = %operation, "nothing impacted");
        }
        subjects.extend(found);
    }
    Ok(subjects)
}

/// Finds the subjects a change set impacts and submits one apply job for
/// each of them.
#[derive(Clone, Debug)]
pub struct DiscoverJob {
    pub store_name: StoreName,
    pub pod_name: PodName,
    pub changes: ChangedSubjects,
    pub operations: Vec<OperationType>,
    pub context_alias: String,
    pub config: ConfigSource,
}

impl DiscoverJob {
    /// Payload of this job as it goes on the task queue.
    pub fn to_args(&self) -> Result<JsonValue, JobError> {
        let mut payload = JsonMap::new();
        payload.insert(args::STORE_NAME.to_string(), JsonValue::from(self.store_name.as_str()));
        payload.insert(args::POD_NAME.to_string(), JsonValue::from(self.pod_name.as_str()));
        payload.insert(CHANGES.to_string(), serde_json::to_value(&self.changes)?);
        payload.insert(OPERATIONS.to_string(), serde_json::to_value(&self.operations)?);
        payload.insert(CONTEXT_ALIAS.to_string(), JsonValue::from(self.context_alias.as_str()));
        self.config.write_to(&mut payload);
        Ok(JsonValue::Object(payload))
    }
}

impl Job for DiscoverJob {
    const KIND: JobKind = JobKind::Discover;

    fn from_args(payload: &JsonValue) -> Result<Self, JobError> {
        let config = args::validate(Self::KIND, payload)?;
        let store_name = args::string_arg(Self::KIND, payload, args::STORE_NAME)?;
        let pod_name = args::string_arg(Self::KIND, payload, args::POD_NAME)?;
        let context_alias = args::string_arg(Self::KIND, payload, CONTEXT_ALIAS)?;
        let bad_name = |key: &str, err: pr_core::ids::NameError| {
            JobError::Payload(format!("{}: {key}: {err}", Self::KIND))
        };
        Ok(Self {
            store_name: StoreName::try_new(store_name).map_err(|e| bad_name(args::STORE_NAME, e))?,
            pod_name: PodName::try_new(pod_name).map_err(|e| bad_name(args::POD_NAME, e))?,
            changes: serde_json::from_value(payload[CHANGES].clone())?,
            operations: serde_json::from_value(payload[OPERATIONS].clone())?,
            context_alias: context_alias.to_string(),
            config,
        })
    }

    fn execute(&self, ctx: &mut JobContext<'_>) -> Result<usize, JobError> {
        let config = ctx.resolve_config(&self.config)?;
        let mut store = ctx.store(&self.store_name, &config);
        let subjects = discover_impacted_subjects(
            store.get()?,
            &config,
            &self.pod_name,
            &self.changes,
            &self.operations,
            &self.context_alias,
        )?;
        if subjects.is_empty() {
            tracing::debug!(store = %self.store_name, pod = %self.pod_name, "no apply jobs needed");
            return Ok(0);
        }

        for subject in &subjects {
            let mut payload = JsonMap::new();
            payload.insert(SUBJECT.to_string(), subject.to_json()?);
            self.config.write_to(&mut payload);
            submit_job(
                &mut *ctx.tasks,
                ctx.policy,
                ctx.stat,
                &config.queues.apply,
                JobKind::Apply,
                JsonValue::Object(payload),
            )?;
        }
        tracing::info!(
            store = %self.store_name,
            pod = %self.pod_name,
            submitted = subjects.len(),
            "submitted apply jobs"
        );
        Ok(subjects.len())
    }
}
