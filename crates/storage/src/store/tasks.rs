#![forbid(unsafe_code)]

use super::queue::SqliteQueue;
use super::support::now_ms;
use super::types::{TaskRow, TaskStatus};
use super::StoreError;
use rusqlite::{OptionalExtension, TransactionBehavior, params};
use serde_json::Value as JsonValue;

const TASK_TOKEN_PREFIX: &str = "TASK-";
const MAX_QUEUE_NAME_LEN: usize = 64;
const TASK_COLUMNS: &str =
    "seq, queue, kind, status, payload_json, error_message, created_at_ms, updated_at_ms";

impl SqliteQueue {
    /// Adds a job to a named task queue and returns its tracking token.
    pub fn task_enqueue(
        &mut self,
        queue: &str,
        kind: &str,
        payload: &JsonValue,
    ) -> Result<String, StoreError> {
        let queue = normalize_queue_name(queue)?;
        let kind = kind.trim();
        if kind.is_empty() {
            return Err(StoreError::InvalidInput("task kind must not be empty"));
        }
        let payload_json = serde_json::to_string(payload)?;
        let now = now_ms();
        self.conn.execute(
            "INSERT INTO tasks(queue, kind, status, payload_json, error_message, created_at_ms, updated_at_ms) \
             VALUES (?1, ?2, ?3, ?4, NULL, ?5, ?5)",
            params![queue, kind, TaskStatus::Queued.as_str(), payload_json, now],
        )?;
        let token = format_task_token(self.conn.last_insert_rowid());
        tracing::debug!(%token, queue, kind, "enqueued task");
        Ok(token)
    }

    pub fn task_get(&self, token: &str) -> Result<Option<TaskRow>, StoreError> {
        let seq = parse_task_token(token)?;
        let row = self
            .conn
            .query_row(
                &format!("SELECT {TASK_COLUMNS} FROM tasks WHERE seq=?1"),
                params![seq],
                TaskRowRaw::read,
            )
            .optional()?;
        row.map(TaskRowRaw::decode).transpose()
    }

    /// Claims the oldest queued task on `queue`; same protocol as the work
    /// queue's `claim_next`.
    pub fn task_claim_next(&mut self, queue: &str) -> Result<Option<TaskRow>, StoreError> {
        let queue = normalize_queue_name(queue)?;
        let now = now_ms();
        let tx = self
            .conn
            .transaction_with_behavior(TransactionBehavior::Immediate)?;

        let row = tx
            .query_row(
                &format!(
                    "SELECT {TASK_COLUMNS} FROM tasks WHERE queue=?1 AND status=?2 ORDER BY seq ASC LIMIT 1"
                ),
                params![queue, TaskStatus::Queued.as_str()],
                TaskRowRaw::read,
            )
            .optional()?;
        let Some(row) = row else {
            return Ok(None);
        };

        let changed = tx.execute(
            "UPDATE tasks SET status=?2, updated_at_ms=?3 WHERE seq=?1 AND status=?4",
            params![
                row.seq,
                TaskStatus::Running.as_str(),
                now,
                TaskStatus::Queued.as_str()
            ],
        )?;
        if changed != 1 {
            return Err(StoreError::QueueCommand(format!(
                "claim of {} updated {changed} rows",
                format_task_token(row.seq)
            )));
        }
        tx.commit()?;

        let mut task = row.decode()?;
        task.status = TaskStatus::Running;
        task.updated_at_ms = now;
        Ok(Some(task))
    }

    /// Deletes a finished task; its token stops resolving.
    pub fn task_complete(&mut self, token: &str) -> Result<(), StoreError> {
        let seq = parse_task_token(token)?;
        let changed = self.conn.execute(
            "DELETE FROM tasks WHERE seq=?1 AND status=?2",
            params![seq, TaskStatus::Running.as_str()],
        )?;
        if changed != 1 {
            return Err(StoreError::QueueCommand(format!(
                "{token} is not running, cannot complete"
            )));
        }
        Ok(())
    }

    /// Marks a running task failed and keeps it for inspection.
    pub fn task_fail(&mut self, token: &str, error_message: &str) -> Result<(), StoreError> {
        let seq = parse_task_token(token)?;
        let changed = self.conn.execute(
            "UPDATE tasks SET status=?2, error_message=?3, updated_at_ms=?4 WHERE seq=?1 AND status=?5",
            params![
                seq,
                TaskStatus::Failed.as_str(),
                error_message,
                now_ms(),
                TaskStatus::Running.as_str()
            ],
        )?;
        if changed != 1 {
            return Err(StoreError::QueueCommand(format!(
                "{token} is not running, cannot mark failed"
            )));
        }
        Ok(())
    }

    /// Tasks on `queue` (all queues when `None`) in `status` (any when `None`).
    pub fn task_count(
        &self,
        queue: Option<&str>,
        status: Option<TaskStatus>,
    ) -> Result<usize, StoreError> {
        let count: i64 = self.conn.query_row(
            "SELECT COUNT(*) FROM tasks WHERE (?1 IS NULL OR queue=?1) AND (?2 IS NULL OR status=?2)",
            params![queue, status.map(TaskStatus::as_str)],
            |row| row.get(0),
        )?;
        Ok(usize::try_from(count).unwrap_or(0))
    }
}

fn format_task_token(seq: i64) -> String {
    format!("{TASK_TOKEN_PREFIX}{seq:06}")
}

fn parse_task_token(token: &str) -> Result<i64, StoreError> {
    token
        .trim()
        .strip_prefix(TASK_TOKEN_PREFIX)
        .and_then(|digits| digits.parse::<i64>().ok())
        .filter(|seq| *seq > 0)
        .ok_or(StoreError::InvalidInput("invalid task token"))
}

fn normalize_queue_name(value: &str) -> Result<&str, StoreError> {
    let value = value.trim();
    if value.is_empty() {
        return Err(StoreError::InvalidInput("queue name must not be empty"));
    }
    if value.len() > MAX_QUEUE_NAME_LEN {
        return Err(StoreError::InvalidInput("queue name is too long"));
    }
    Ok(value)
}

struct TaskRowRaw {
    seq: i64,
    queue: String,
    kind: String,
    status: String,
    payload_json: String,
    error_message: Option<String>,
    created_at_ms: i64,
    updated_at_ms: i64,
}

impl TaskRowRaw {
    fn read(row: &rusqlite::Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            seq: row.get(0)?,
            queue: row.get(1)?,
            kind: row.get(2)?,
            status: row.get(3)?,
            payload_json: row.get(4)?,
            error_message: row.get(5)?,
            created_at_ms: row.get(6)?,
            updated_at_ms: row.get(7)?,
        })
    }

    fn decode(self) -> Result<TaskRow, StoreError> {
        Ok(TaskRow {
            token: format_task_token(self.seq),
            queue: self.queue,
            kind: self.kind,
            status: TaskStatus::parse(&self.status)?,
            payload: serde_json::from_str(&self.payload_json)?,
            error_message: self.error_message,
            created_at_ms: self.created_at_ms,
            updated_at_ms: self.updated_at_ms,
        })
    }
}
