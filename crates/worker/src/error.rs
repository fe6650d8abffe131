#![forbid(unsafe_code)]

use crate::args::JobKind;
use pr_core::ConfigError;
use pr_storage::StoreError;

#[derive(Debug, thiserror::Error)]
pub enum JobError {
    #[error("argument {key} was not present in supplied job args for job {job}")]
    MissingArgument { key: &'static str, job: JobKind },
    #[error("job {job} needs tripodConfig or tripodConfigGenerator")]
    MissingConfig { job: JobKind },
    #[error("job {job} was given both tripodConfig and tripodConfigGenerator")]
    AmbiguousConfig { job: JobKind },
    #[error("job submission failed after {attempts} attempts: {reason}")]
    Submission { attempts: u32, reason: String },
    #[error("store: {0}")]
    Store(#[from] StoreError),
    #[error("config: {0}")]
    Config(#[from] ConfigError),
    #[error("invalid job payload: {0}")]
    Payload(String),
}

impl From<serde_json::Error> for JobError {
    fn from(value: serde_json::Error) -> Self {
        Self::Payload(value.to_string())
    }
}

/// `err` followed by each of its sources, separated by `": "`.
pub(crate) fn error_chain(err: &dyn std::error::Error) -> String {
    let mut out = err.to_string();
    let mut source = err.source();
    while let Some(next) = source {
        let text = next.to_string();
        if !out.ends_with(&text) {
            out.push_str(": ");
            out.push_str(&text);
        }
        source = next.source();
    }
    out
}
