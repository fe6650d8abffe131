#![forbid(unsafe_code)]

use crate::store::StoreError;
use serde::Serialize;
use serde_json::Value as JsonValue;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum TaskStatus {
    Queued,
    Running,
    Failed,
}

impl TaskStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Queued => "queued",
            Self::Running => "running",
            Self::Failed => "failed",
        }
    }

    pub(crate) fn parse(value: &str) -> Result<Self, StoreError> {
        match value {
            "queued" => Ok(Self::Queued),
            "running" => Ok(Self::Running),
            "failed" => Ok(Self::Failed),
            _ => Err(StoreError::InvalidInput("unknown task status")),
        }
    }
}

/// One job in the task queue, addressed by its tracking token.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct TaskRow {
    pub token: String,
    pub queue: String,
    pub kind: String,
    pub status: TaskStatus,
    pub payload: JsonValue,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_message: Option<String>,
    pub created_at_ms: i64,
    pub updated_at_ms: i64,
}
