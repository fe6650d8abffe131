#![forbid(unsafe_code)]

use crate::store::StoreError;
use pr_core::ChangeSet;
use pr_core::OperationType;
use pr_core::ids::{PodName, StoreName};
use serde::Serialize;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum QueueStatus {
    Queued,
    Processing,
    Failed,
}

impl QueueStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Queued => "queued",
            Self::Processing => "processing",
            Self::Failed => "failed",
        }
    }

    pub(crate) fn parse(value: &str) -> Result<Self, StoreError> {
        match value {
            "queued" => Ok(Self::Queued),
            "processing" => Ok(Self::Processing),
            "failed" => Ok(Self::Failed),
            _ => Err(StoreError::InvalidInput("unknown queue status")),
        }
    }
}

impl std::fmt::Display for QueueStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Which version of a claimed item `claim_next_as` hands back.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum ClaimView {
    /// The item as it was before the claim (status `queued`).
    Before,
    #[default]
    After,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct NewQueueItem {
    pub store_name: StoreName,
    pub pod_name: PodName,
    pub context_alias: String,
    pub operations: Vec<OperationType>,
    pub change_set: ChangeSet,
    /// Serialized configuration the worker should use for this item. `None`
    /// means the worker's own configuration.
    pub config_json: Option<String>,
}

/// A work-queue document.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct QueueItem {
    #[serde(rename = "_id")]
    pub id: String,
    pub status: QueueStatus,
    #[serde(rename = "createdOn")]
    pub created_on_ms: i64,
    #[serde(rename = "lastUpdated")]
    pub last_updated_ms: i64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_message: Option<String>,
    pub store_name: StoreName,
    pub pod_name: PodName,
    pub context_alias: String,
    pub operations: Vec<OperationType>,
    pub change_set: ChangeSet,
    pub deleted_subjects: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub config_json: Option<String>,
}
