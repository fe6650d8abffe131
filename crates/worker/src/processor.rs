#![forbid(unsafe_code)]

use crate::JobError;
use crate::discover::discover_impacted_subjects;
use crate::error::error_chain;
use crate::job::StoreHandle;
use pr_core::stat::QUEUE_SUCCESS;
use pr_core::Config;
use pr_storage::{AnyComposite, Composite, QueueItem, SqliteQueue, StoreError, now_ms};
use std::path::Path;

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ProcessOutcome {
    Empty,
    Completed { id: String, updated: usize },
    Failed { id: String, error: String },
}

/// Works the queue one item at a time: claim, discover, update every
/// impacted subject, then remove the item.
#[derive(Clone, Copy, Debug)]
pub struct QueueProcessor<'a> {
    config: &'a Config,
    storage_dir: &'a Path,
}

impl<'a> QueueProcessor<'a> {
    pub fn new(config: &'a Config, storage_dir: &'a Path) -> Self {
        Self {
            config,
            storage_dir,
        }
    }

    /// Handles the oldest queued item. Errors while regenerating fail the
    /// item and come back as [`ProcessOutcome::Failed`]; errors of the queue
    /// itself are returned.
    pub fn process_next(&self, queue: &mut SqliteQueue) -> Result<ProcessOutcome, StoreError> {
        let Some(item) = queue.claim_next()? else {
            return Ok(ProcessOutcome::Empty);
        };

        match self.process_item(&item) {
            Ok(updated) => {
                queue.remove_item(&item.id)?;
                let stat = queue.stat();
                stat.increment(QUEUE_SUCCESS);
                let waited = now_ms().saturating_sub(item.created_on_ms);
                stat.timer(QUEUE_SUCCESS, u64::try_from(waited).unwrap_or(0));
                tracing::info!(
                    item_id = %item.id,
                    store = %item.store_name,
                    updated,
                    "queue item done"
                );
                Ok(ProcessOutcome::Completed {
                    id: item.id,
                    updated,
                })
            }
            Err(err) => {
                let error = error_chain(&err);
                queue.fail_item(&item.id, &error)?;
                tracing::error!(
                    item_id = %item.id,
                    store = %item.store_name,
                    error = %error,
                    "queue item failed"
                );
                Ok(ProcessOutcome::Failed { id: item.id, error })
            }
        }
    }

    fn process_item(&self, item: &QueueItem) -> Result<usize, JobError> {
        let item_config;
        let config = match &item.config_json {
            Some(raw) => {
                item_config = Config::from_json_str(raw)?;
                &item_config
            }
            None => self.config,
        };

        let mut store = StoreHandle::new(
            self.storage_dir,
            item.store_name.clone(),
            config.namespaces.clone(),
        );
        let changes = item.change_set.subjects_and_predicates_of_change();
        let subjects = discover_impacted_subjects(
            store.get()?,
            config,
            &item.pod_name,
            &changes,
            &item.operations,
            &item.context_alias,
        )?;

        for subject in &subjects {
            let composite = AnyComposite::for_operation(
                subject.operation,
                config,
                subject.store_name.clone(),
                subject.pod_name.clone(),
            );
            composite.update(store.get()?, subject)?;
        }
        Ok(subjects.len())
    }
}
