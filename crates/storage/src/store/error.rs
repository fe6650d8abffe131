#![forbid(unsafe_code)]

use pr_core::OperationType;

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("io: {0}")]
    Io(#[from] std::io::Error),
    #[error("sqlite: {0}")]
    Sql(#[from] rusqlite::Error),
    #[error("json: {0}")]
    Json(#[from] serde_json::Error),
    #[error("invalid input: {0}")]
    InvalidInput(&'static str),
    #[error("unknown {operation} specification: {spec_id}")]
    UnknownSpec {
        operation: OperationType,
        spec_id: String,
    },
    #[error("unknown id")]
    UnknownId,
    /// A conditional update did not affect the row it targeted.
    #[error("queue command failed: {0}")]
    QueueCommand(String),
}
