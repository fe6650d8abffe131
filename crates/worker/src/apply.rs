#![forbid(unsafe_code)]

use crate::JobError;
use crate::args::{self, ConfigSource, JobKind, SUBJECT};
use crate::job::{Job, JobContext};
use pr_core::ImpactedSubject;
use pr_storage::{AnyComposite, Composite};
use serde_json::{Map as JsonMap, Value as JsonValue};

/// Regenerates (or deletes) the artifacts of one impacted subject.
#[derive(Clone, Debug)]
pub struct ApplyJob {
    pub subject: ImpactedSubject,
    pub config: ConfigSource,
}

impl ApplyJob {
    pub fn to_args(&self) -> Result<JsonValue, JobError> {
        let mut payload = JsonMap::new();
        payload.insert(SUBJECT.to_string(), self.subject.to_json()?);
        self.config.write_to(&mut payload);
        Ok(JsonValue::Object(payload))
    }
}

impl Job for ApplyJob {
    const KIND: JobKind = JobKind::Apply;

    fn from_args(payload: &JsonValue) -> Result<Self, JobError> {
        let config = args::validate(Self::KIND, payload)?;
        let subject = ImpactedSubject::from_json(payload[SUBJECT].clone())?;
        Ok(Self { subject, config })
    }

    fn execute(&self, ctx: &mut JobContext<'_>) -> Result<usize, JobError> {
        let config = ctx.resolve_config(&self.config)?;
        let mut store = ctx.store(&self.subject.store_name, &config);
        let composite = AnyComposite::for_operation(
            self.subject.operation,
            &config,
            self.subject.store_name.clone(),
            self.subject.pod_name.clone(),
        );
        composite.update(store.get()?, &self.subject)?;
        tracing::debug!(
            operation = %self.subject.operation,
            resource = %self.subject.resource_id,
            delete = self.subject.delete,
            "applied operation"
        );
        Ok(1)
    }
}
