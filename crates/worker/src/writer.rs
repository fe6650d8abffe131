#![forbid(unsafe_code)]

use crate::JobError;
use crate::args::ConfigSource;
use crate::discover::{DiscoverJob, discover_impacted_subjects};
use crate::job::Job;
use crate::submit::{SubmitPolicy, submit_job};
use pr_core::ids::{PodName, StoreName};
use pr_core::{ChangeSet, Config, OperationType};
use pr_storage::{AnyComposite, Composite, NewQueueItem, SaveOutcome, SqliteQueue, SqliteStore};

/// How asynchronous operations leave the write path.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum WriteMode {
    /// One work-queue item carrying the whole change set.
    #[default]
    Queue,
    /// One discover job on the task queue.
    DiscoverJob,
}

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct WriteReport {
    pub saved: SaveOutcome,
    /// Subjects regenerated before `save_changes` returned.
    pub updated_inline: usize,
    pub queue_item: Option<String>,
    pub discover_token: Option<String>,
}

/// The write path for one pod: store the change set, then bring the
/// artifacts up to date inline or hand that work off.
#[derive(Clone, Debug)]
pub struct Writer<'a> {
    config: &'a Config,
    pod: PodName,
    context_alias: String,
    mode: WriteMode,
    sync_operations: Vec<OperationType>,
    async_operations: Vec<OperationType>,
    policy: SubmitPolicy,
}

impl<'a> Writer<'a> {
    /// A writer that queues every operation.
    pub fn new(config: &'a Config, pod: PodName) -> Self {
        Self {
            context_alias: config.default_context.clone(),
            config,
            pod,
            mode: WriteMode::default(),
            sync_operations: Vec::new(),
            async_operations: OperationType::ALL.to_vec(),
            policy: SubmitPolicy::default(),
        }
    }

    pub fn with_context(mut self, context_alias: impl Into<String>) -> Self {
        self.context_alias = context_alias.into();
        self
    }

    pub fn with_mode(mut self, mode: WriteMode) -> Self {
        self.mode = mode;
        self
    }

    pub fn with_policy(mut self, policy: SubmitPolicy) -> Self {
        self.policy = policy;
        self
    }

    /// Operations in `sync` run inline; the rest of `OperationType::ALL`
    /// are handed off.
    pub fn with_sync_operations(mut self, sync: &[OperationType]) -> Self {
        self.sync_operations = sync.to_vec();
        self.async_operations = OperationType::ALL
            .into_iter()
            .filter(|op| !sync.contains(op))
            .collect();
        self
    }

    pub fn save_changes(
        &self,
        store: &mut SqliteStore,
        queue: &mut SqliteQueue,
        changes: &ChangeSet,
    ) -> Result<WriteReport, JobError> {
        let mut report = WriteReport {
            saved: store.save_changes(&self.pod, changes)?,
            ..WriteReport::default()
        };
        if changes.is_empty() {
            return Ok(report);
        }
        let store_name = store.store_name().clone();

        if !self.sync_operations.is_empty() {
            let subjects = discover_impacted_subjects(
                store,
                self.config,
                &self.pod,
                &changes.subjects_and_predicates_of_change(),
                &self.sync_operations,
                &self.context_alias,
            )?;
            for subject in &subjects {
                let composite = AnyComposite::for_operation(
                    subject.operation,
                    self.config,
                    store_name.clone(),
                    self.pod.clone(),
                );
                composite.update(store, subject)?;
            }
            report.updated_inline = subjects.len();
        }

        if self.async_operations.is_empty() {
            return Ok(report);
        }
        match self.mode {
            WriteMode::Queue => {
                let item = queue.add_item(NewQueueItem {
                    store_name,
                    pod_name: self.pod.clone(),
                    context_alias: self.context_alias.clone(),
                    operations: self.async_operations.clone(),
                    change_set: changes.clone(),
                    config_json: None,
                })?;
                report.queue_item = item.map(|item| item.id);
            }
            WriteMode::DiscoverJob => {
                report.discover_token = Some(self.submit_discover(queue, store_name, changes)?);
            }
        }
        Ok(report)
    }

    fn submit_discover(
        &self,
        queue: &mut SqliteQueue,
        store_name: StoreName,
        changes: &ChangeSet,
    ) -> Result<String, JobError> {
        let job = DiscoverJob {
            store_name,
            pod_name: self.pod.clone(),
            changes: changes.subjects_and_predicates_of_change(),
            operations: self.async_operations.clone(),
            context_alias: self.context_alias.clone(),
            config: ConfigSource::Inline(self.config.to_json_string()?),
        };
        let stat = queue.stat();
        submit_job(
            queue,
            self.policy,
            stat.as_ref(),
            &self.config.queues.discover,
            DiscoverJob::KIND,
            job.to_args()?,
        )
    }
}
