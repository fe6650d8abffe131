#![forbid(unsafe_code)]

use super::support::{install_queue_schema, now_ms};
use super::types::{ClaimView, NewQueueItem, QueueItem, QueueStatus};
use super::{StoreError, open_connection};
use pr_core::ids::{PodName, StoreName};
use pr_core::stat::{self, StatSink};
use pr_core::{ChangeSet, NoopStat, OperationType};
use rusqlite::{Connection, OptionalExtension, TransactionBehavior, params};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

const ITEM_ID_PREFIX: &str = "QI-";
const ITEM_COLUMNS: &str = "seq, status, store_name, pod_name, context_alias, operations_json, \
     change_set_json, deleted_subjects_json, config_json, error_message, created_on_ms, last_updated_ms";

/// Durable work queue, task queue and config cache, backed by
/// `<storage_dir>/queue.db`.
///
/// Item status only moves through the methods here: `claim_next` flips
/// `queued` to `processing` with a conditional update inside an immediate
/// transaction, so two connections never claim the same item.
pub struct SqliteQueue {
    pub(super) conn: Connection,
    storage_dir: PathBuf,
    stat: Arc<dyn StatSink>,
}

impl std::fmt::Debug for SqliteQueue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SqliteQueue")
            .field("storage_dir", &self.storage_dir)
            .finish_non_exhaustive()
    }
}

impl SqliteQueue {
    pub fn open(storage_dir: impl AsRef<Path>) -> Result<Self, StoreError> {
        let storage_dir = storage_dir.as_ref().to_path_buf();
        std::fs::create_dir_all(&storage_dir)?;

        let conn = open_connection(&storage_dir.join("queue.db"))?;
        install_queue_schema(&conn)?;

        Ok(Self {
            conn,
            storage_dir,
            stat: Arc::new(NoopStat),
        })
    }

    pub fn with_stat(mut self, stat: Arc<dyn StatSink>) -> Self {
        self.stat = stat;
        self
    }

    pub fn stat(&self) -> Arc<dyn StatSink> {
        Arc::clone(&self.stat)
    }

    pub fn storage_dir(&self) -> &Path {
        &self.storage_dir
    }

    /// Queues one item. An item without operations has nothing to do and is
    /// not stored.
    pub fn add_item(&mut self, item: NewQueueItem) -> Result<Option<QueueItem>, StoreError> {
        if item.operations.is_empty() {
            tracing::debug!(store = %item.store_name, "no operations, skipping queue item");
            return Ok(None);
        }
        let context_alias = item.context_alias.trim();
        if context_alias.is_empty() {
            return Err(StoreError::InvalidInput("context_alias must not be empty"));
        }

        let now = now_ms();
        let operations_json = serde_json::to_string(&item.operations)?;
        let change_set_json = item.change_set.to_json()?;
        let deleted_subjects_json = serde_json::to_string(item.change_set.deleted_subjects())?;

        self.conn.execute(
            "INSERT INTO queue_items(status, store_name, pod_name, context_alias, operations_json, \
             change_set_json, deleted_subjects_json, config_json, error_message, created_on_ms, last_updated_ms) \
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, NULL, ?9, ?9)",
            params![
                QueueStatus::Queued.as_str(),
                item.store_name.as_str(),
                item.pod_name.as_str(),
                context_alias,
                operations_json,
                change_set_json,
                deleted_subjects_json,
                item.config_json,
                now,
            ],
        )?;
        let seq = self.conn.last_insert_rowid();
        let id = format_item_id(seq);
        tracing::debug!(item_id = %id, store = %item.store_name, "queued item");

        Ok(Some(QueueItem {
            id,
            status: QueueStatus::Queued,
            created_on_ms: now,
            last_updated_ms: now,
            error_message: None,
            store_name: item.store_name,
            pod_name: item.pod_name,
            context_alias: context_alias.to_string(),
            operations: item.operations,
            deleted_subjects: item.change_set.deleted_subjects().to_vec(),
            change_set: item.change_set,
            config_json: item.config_json,
        }))
    }

    /// Claims the oldest queued item, returning it as it is after the claim.
    pub fn claim_next(&mut self) -> Result<Option<QueueItem>, StoreError> {
        self.claim_next_as(ClaimView::After)
    }

    /// Claims the oldest queued item. An empty queue is `Ok(None)`.
    pub fn claim_next_as(&mut self, view: ClaimView) -> Result<Option<QueueItem>, StoreError> {
        let now = now_ms();
        let tx = self
            .conn
            .transaction_with_behavior(TransactionBehavior::Immediate)?;

        let row = tx
            .query_row(
                &format!(
                    "SELECT {ITEM_COLUMNS} FROM queue_items WHERE status=?1 ORDER BY seq ASC LIMIT 1"
                ),
                params![QueueStatus::Queued.as_str()],
                ItemRow::read,
            )
            .optional()?;
        let Some(row) = row else {
            return Ok(None);
        };

        let changed = tx.execute(
            "UPDATE queue_items SET status=?2, last_updated_ms=?3 WHERE seq=?1 AND status=?4",
            params![
                row.seq,
                QueueStatus::Processing.as_str(),
                now,
                QueueStatus::Queued.as_str()
            ],
        )?;
        if changed != 1 {
            return Err(StoreError::QueueCommand(format!(
                "claim of {} updated {changed} rows",
                format_item_id(row.seq)
            )));
        }
        tx.commit()?;

        let mut item = row.decode()?;
        if view == ClaimView::After {
            item.status = QueueStatus::Processing;
            item.last_updated_ms = now;
        }
        tracing::debug!(item_id = %item.id, store = %item.store_name, "claimed queue item");
        Ok(Some(item))
    }

    /// Deletes a finished item.
    pub fn remove_item(&mut self, id: &str) -> Result<(), StoreError> {
        let seq = parse_item_id(id)?;
        let changed = self
            .conn
            .execute("DELETE FROM queue_items WHERE seq=?1", params![seq])?;
        if changed != 1 {
            return Err(StoreError::QueueCommand(format!("remove of {id} matched no item")));
        }
        Ok(())
    }

    /// Marks an item failed and keeps it for inspection.
    pub fn fail_item(&mut self, id: &str, error_message: &str) -> Result<(), StoreError> {
        let seq = parse_item_id(id)?;
        let changed = self.conn.execute(
            "UPDATE queue_items SET status=?2, last_updated_ms=?3, error_message=?4 WHERE seq=?1",
            params![seq, QueueStatus::Failed.as_str(), now_ms(), error_message],
        )?;
        if changed != 1 {
            return Err(StoreError::QueueCommand(format!("fail of {id} matched no item")));
        }
        self.stat.increment(stat::QUEUE_FAIL);
        tracing::warn!(item_id = %id, error = %error_message, "queue item failed");
        Ok(())
    }

    pub fn get_item(&self, id: &str) -> Result<Option<QueueItem>, StoreError> {
        let seq = parse_item_id(id)?;
        let row = self
            .conn
            .query_row(
                &format!("SELECT {ITEM_COLUMNS} FROM queue_items WHERE seq=?1"),
                params![seq],
                ItemRow::read,
            )
            .optional()?;
        row.map(ItemRow::decode).transpose()
    }

    /// Items in every status.
    pub fn count(&self) -> Result<usize, StoreError> {
        let count: i64 = self
            .conn
            .query_row("SELECT COUNT(*) FROM queue_items", [], |row| row.get(0))?;
        Ok(usize::try_from(count).unwrap_or(0))
    }

    pub fn count_by_status(&self) -> Result<BTreeMap<QueueStatus, usize>, StoreError> {
        let mut stmt = self
            .conn
            .prepare("SELECT status, COUNT(*) FROM queue_items GROUP BY status")?;
        let mut rows = stmt.query([])?;
        let mut out = BTreeMap::new();
        while let Some(row) = rows.next()? {
            let status = QueueStatus::parse(&row.get::<_, String>(0)?)?;
            let count: i64 = row.get(1)?;
            out.insert(status, usize::try_from(count).unwrap_or(0));
        }
        Ok(out)
    }

    /// Drops every item regardless of status.
    pub fn purge(&mut self) -> Result<usize, StoreError> {
        let removed = self.conn.execute("DELETE FROM queue_items", [])?;
        tracing::info!(removed, "purged work queue");
        Ok(removed)
    }

    /// Puts `processing` items untouched for at least `older_than_ms` back to
    /// `queued`. Operator command; the worker loop never calls it.
    pub fn requeue_stale(&mut self, older_than_ms: u64) -> Result<usize, StoreError> {
        let now = now_ms();
        let threshold = now.saturating_sub(i64::try_from(older_than_ms).unwrap_or(i64::MAX));
        let changed = self.conn.execute(
            "UPDATE queue_items SET status=?1, last_updated_ms=?2 WHERE status=?3 AND last_updated_ms <= ?4",
            params![
                QueueStatus::Queued.as_str(),
                now,
                QueueStatus::Processing.as_str(),
                threshold
            ],
        )?;
        if changed > 0 {
            tracing::warn!(requeued = changed, older_than_ms, "requeued stale processing items");
        }
        Ok(changed)
    }
}

pub(super) fn format_item_id(seq: i64) -> String {
    format!("{ITEM_ID_PREFIX}{seq:06}")
}

fn parse_item_id(id: &str) -> Result<i64, StoreError> {
    id.trim()
        .strip_prefix(ITEM_ID_PREFIX)
        .and_then(|digits| digits.parse::<i64>().ok())
        .filter(|seq| *seq > 0)
        .ok_or(StoreError::InvalidInput("invalid queue item id"))
}

struct ItemRow {
    seq: i64,
    status: String,
    store_name: String,
    pod_name: String,
    context_alias: String,
    operations_json: String,
    change_set_json: String,
    deleted_subjects_json: String,
    config_json: Option<String>,
    error_message: Option<String>,
    created_on_ms: i64,
    last_updated_ms: i64,
}

impl ItemRow {
    fn read(row: &rusqlite::Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            seq: row.get(0)?,
            status: row.get(1)?,
            store_name: row.get(2)?,
            pod_name: row.get(3)?,
            context_alias: row.get(4)?,
            operations_json: row.get(5)?,
            change_set_json: row.get(6)?,
            deleted_subjects_json: row.get(7)?,
            config_json: row.get(8)?,
            error_message: row.get(9)?,
            created_on_ms: row.get(10)?,
            last_updated_ms: row.get(11)?,
        })
    }

    fn decode(self) -> Result<QueueItem, StoreError> {
        let operations: Vec<OperationType> = serde_json::from_str(&self.operations_json)?;
        Ok(QueueItem {
            id: format_item_id(self.seq),
            status: QueueStatus::parse(&self.status)?,
            created_on_ms: self.created_on_ms,
            last_updated_ms: self.last_updated_ms,
            error_message: self.error_message,
            store_name: StoreName::try_new(self.store_name)
                .map_err(|_| StoreError::InvalidInput("stored store_name is invalid"))?,
            pod_name: PodName::try_new(self.pod_name)
                .map_err(|_| StoreError::InvalidInput("stored pod_name is invalid"))?,
            context_alias: self.context_alias,
            operations,
            change_set: ChangeSet::from_json(&self.change_set_json)?,
            deleted_subjects: serde_json::from_str(&self.deleted_subjects_json)?,
            config_json: self.config_json,
        })
    }
}
