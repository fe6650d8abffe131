#![forbid(unsafe_code)]

mod common;

use common::{RecordingStat, pod, store_name};
use pr_core::stat::QUEUE_FAIL;
use pr_core::{ChangeSet, OperationType, Term};
use pr_storage::{ClaimView, NewQueueItem, QueueStatus, SqliteQueue, StoreError, TaskStatus, config_token};
use std::sync::{Arc, Barrier};
use tempfile::TempDir;

fn new_item(operations: Vec<OperationType>) -> NewQueueItem {
    NewQueueItem {
        store_name: store_name(),
        pod_name: pod(),
        context_alias: common::CONTEXT.to_string(),
        operations,
        change_set: ChangeSet::builder()
            .add("baseData:1", "bibo:isbn13", Term::literal("9780393929691-3"), common::CONTEXT)
            .delete_subject("baseData:9")
            .build(),
        config_json: None,
    }
}

#[test]
fn item_lifecycle_queued_processing_removed() {
    let dir = TempDir::new().expect("temp dir");
    let mut queue = SqliteQueue::open(dir.path()).expect("open queue");

    let added = queue
        .add_item(new_item(vec![OperationType::Tables]))
        .expect("add")
        .expect("item stored");
    assert_eq!(added.status, QueueStatus::Queued);
    assert_eq!(added.deleted_subjects, vec!["baseData:9".to_string()]);
    assert_eq!(queue.count().expect("count"), 1);

    let claimed = queue.claim_next().expect("claim").expect("one item");
    assert_eq!(claimed.id, added.id);
    assert_eq!(claimed.status, QueueStatus::Processing);
    assert_eq!(claimed.change_set, added.change_set);
    assert!(queue.claim_next().expect("claim").is_none(), "nothing left to claim");

    queue.remove_item(&claimed.id).expect("remove");
    assert_eq!(queue.count().expect("count"), 0);
    assert!(queue.get_item(&claimed.id).expect("get").is_none());
}

#[test]
fn items_without_operations_are_not_stored() {
    let dir = TempDir::new().expect("temp dir");
    let mut queue = SqliteQueue::open(dir.path()).expect("open queue");
    assert!(queue.add_item(new_item(Vec::new())).expect("add").is_none());
    assert_eq!(queue.count().expect("count"), 0);
}

#[test]
fn claim_can_return_the_document_as_it_was() {
    let dir = TempDir::new().expect("temp dir");
    let mut queue = SqliteQueue::open(dir.path()).expect("open queue");
    queue.add_item(new_item(vec![OperationType::Views])).expect("add");

    let before = queue
        .claim_next_as(ClaimView::Before)
        .expect("claim")
        .expect("item");
    assert_eq!(before.status, QueueStatus::Queued);
    let stored = queue.get_item(&before.id).expect("get").expect("still there");
    assert_eq!(stored.status, QueueStatus::Processing);
}

#[test]
fn failed_items_stay_for_inspection_and_count_a_failure() {
    let dir = TempDir::new().expect("temp dir");
    let stat = Arc::new(RecordingStat::default());
    let mut queue = SqliteQueue::open(dir.path())
        .expect("open queue")
        .with_stat(stat.clone());
    queue.add_item(new_item(vec![OperationType::Tables])).expect("add");
    queue.add_item(new_item(vec![OperationType::Search])).expect("add");

    let claimed = queue.claim_next().expect("claim").expect("item");
    queue
        .fail_item(&claimed.id, "unknown generate_table_rows specification: t_gone")
        .expect("fail");

    let failed = queue.get_item(&claimed.id).expect("get").expect("kept");
    assert_eq!(failed.status, QueueStatus::Failed);
    assert_eq!(
        failed.error_message.as_deref(),
        Some("unknown generate_table_rows specification: t_gone")
    );
    assert_eq!(stat.increments_of(QUEUE_FAIL), 1);

    let by_status = queue.count_by_status().expect("count by status");
    assert_eq!(by_status.get(&QueueStatus::Failed), Some(&1));
    assert_eq!(by_status.get(&QueueStatus::Queued), Some(&1));
    assert_eq!(queue.count().expect("count"), 2);

    assert_eq!(queue.purge().expect("purge"), 2);
    assert_eq!(queue.count().expect("count"), 0);
}

#[test]
fn commands_on_missing_items_are_queue_errors() {
    let dir = TempDir::new().expect("temp dir");
    let mut queue = SqliteQueue::open(dir.path()).expect("open queue");
    assert!(matches!(
        queue.remove_item("QI-000042"),
        Err(StoreError::QueueCommand(_))
    ));
    assert!(matches!(
        queue.fail_item("QI-000042", "boom"),
        Err(StoreError::QueueCommand(_))
    ));
    assert!(matches!(
        queue.get_item("not-an-id"),
        Err(StoreError::InvalidInput(_))
    ));
}

#[test]
fn exactly_one_of_many_concurrent_claims_wins() {
    const WORKERS: usize = 8;
    let dir = TempDir::new().expect("temp dir");
    {
        let mut queue = SqliteQueue::open(dir.path()).expect("open queue");
        queue.add_item(new_item(vec![OperationType::Tables])).expect("add");
    }

    let barrier = Barrier::new(WORKERS);
    let claims: Vec<bool> = std::thread::scope(|scope| {
        let handles: Vec<_> = (0..WORKERS)
            .map(|_| {
                scope.spawn(|| {
                    let mut queue = SqliteQueue::open(dir.path()).expect("open queue");
                    barrier.wait();
                    queue.claim_next().expect("claim").is_some()
                })
            })
            .collect();
        handles
            .into_iter()
            .map(|handle| handle.join().expect("worker thread"))
            .collect()
    });

    assert_eq!(claims.iter().filter(|won| **won).count(), 1);
    assert_eq!(claims.iter().filter(|won| !**won).count(), WORKERS - 1);
}

#[test]
fn stale_processing_items_are_requeued_only_on_request() {
    let dir = TempDir::new().expect("temp dir");
    let mut queue = SqliteQueue::open(dir.path()).expect("open queue");
    queue.add_item(new_item(vec![OperationType::Tables])).expect("add");
    let claimed = queue.claim_next().expect("claim").expect("item");

    assert_eq!(queue.requeue_stale(60_000).expect("requeue"), 0, "lease still fresh");
    assert_eq!(queue.requeue_stale(0).expect("requeue"), 1);

    let again = queue.claim_next().expect("claim").expect("requeued item");
    assert_eq!(again.id, claimed.id);
}

#[test]
fn task_queue_tracks_jobs_by_token() {
    let dir = TempDir::new().expect("temp dir");
    let mut queue = SqliteQueue::open(dir.path()).expect("open queue");
    let payload = serde_json::json!({"storeName": common::STORE});

    let token = queue.task_enqueue("apply", "apply", &payload).expect("enqueue");
    let task = queue.task_get(&token).expect("get").expect("task");
    assert_eq!(task.status, TaskStatus::Queued);
    assert_eq!(task.payload, payload);

    assert!(queue.task_claim_next("discover").expect("claim").is_none());
    let claimed = queue.task_claim_next("apply").expect("claim").expect("task");
    assert_eq!(claimed.token, token);
    assert_eq!(claimed.status, TaskStatus::Running);

    queue.task_complete(&token).expect("complete");
    assert!(queue.task_get(&token).expect("get").is_none(), "completed tasks are deleted");
    assert!(matches!(
        queue.task_fail(&token, "late failure"),
        Err(StoreError::QueueCommand(_))
    ));
    assert!(matches!(
        queue.task_complete(&token),
        Err(StoreError::QueueCommand(_))
    ));
}

#[test]
fn completed_tasks_do_not_accumulate() {
    let dir = TempDir::new().expect("temp dir");
    let mut queue = SqliteQueue::open(dir.path()).expect("open queue");
    let payload = serde_json::json!({"storeName": common::STORE});

    for round in 0..100 {
        let token = queue.task_enqueue("apply", "apply", &payload).expect("enqueue");
        let claimed = queue.task_claim_next("apply").expect("claim").expect("task");
        assert_eq!(claimed.token, token, "round {round}");
        queue.task_complete(&token).expect("complete");
    }
    assert_eq!(queue.task_count(None, None).expect("count"), 0);

    let failed = queue.task_enqueue("apply", "apply", &payload).expect("enqueue");
    queue.task_claim_next("apply").expect("claim").expect("task");
    queue.task_fail(&failed, "boom").expect("fail");
    assert_eq!(
        queue.task_count(Some("apply"), Some(TaskStatus::Failed)).expect("count"),
        1,
        "failed tasks stay for inspection"
    );
}

#[test]
fn config_cache_is_content_addressed() {
    let dir = TempDir::new().expect("temp dir");
    let mut queue = SqliteQueue::open(dir.path()).expect("open queue");
    let raw = common::config().to_json_string().expect("config json");

    let token = queue.config_put(&raw).expect("put");
    assert_eq!(token, config_token(&raw));
    assert_eq!(token.len(), 64);
    assert_eq!(queue.config_put(&raw).expect("put again"), token);
    assert_eq!(queue.config_get(&token).expect("get").as_deref(), Some(raw.as_str()));
    assert!(queue.config_get("missing").expect("get").is_none());
}
