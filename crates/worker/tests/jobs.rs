#![forbid(unsafe_code)]

mod common;

use common::{
    CONFIG_JSON, CONTEXT, FlakyTasks, RecordingStat, base_data, config, isbn_change, open_store,
    pod, store_name,
};
use pr_core::stat::{JOB_FAIL, SUBMIT_RETRY};
use pr_core::{ImpactedSubject, OperationType, ResourceId};
use pr_storage::{SqliteQueue, TaskStatus};
use pr_worker::{
    ApplyJob, ConfigSource, DiscoverJob, Job, JobContext, JobError, JobKind, SubmitPolicy,
    TaskOutcome, TaskRunner, run_job, submit_job,
};
use serde_json::json;
use std::sync::Arc;
use std::time::Duration;
use tempfile::TempDir;

fn quick() -> SubmitPolicy {
    SubmitPolicy {
        attempts: 5,
        backoff: Duration::ZERO,
    }
}

fn discover_job(operations: Vec<OperationType>, changes: &pr_core::ChangeSet) -> DiscoverJob {
    DiscoverJob {
        store_name: store_name(),
        pod_name: pod(),
        changes: changes.subjects_and_predicates_of_change(),
        operations,
        context_alias: CONTEXT.to_string(),
        config: ConfigSource::Inline(CONFIG_JSON.to_string()),
    }
}

#[test]
fn missing_arguments_fail_before_any_store_is_opened() {
    let dir = TempDir::new().expect("temp dir");
    let storage = dir.path().join("stores");
    let mut tasks = FlakyTasks::default();
    let stat = RecordingStat::default();
    let mut ctx = JobContext {
        storage_dir: &storage,
        tasks: &mut tasks,
        stat: &stat,
        policy: quick(),
    };

    let full = discover_job(vec![OperationType::Tables], &isbn_change())
        .to_args()
        .expect("args");
    for key in JobKind::Discover.mandatory_keys() {
        let mut args = full.clone();
        args.as_object_mut().expect("object").remove(*key);
        let err = run_job(&mut ctx, JobKind::Discover, &args).expect_err("rejected");
        let message = err.to_string();
        assert!(message.contains(key), "{message}");
        assert!(message.contains("DiscoverImpactedSubjects"), "{message}");
    }

    let err = run_job(&mut ctx, JobKind::Apply, &json!({"tripodConfigGenerator": "abc"}))
        .expect_err("rejected");
    assert!(matches!(
        err,
        JobError::MissingArgument {
            key: "subject",
            job: JobKind::Apply
        }
    ));

    let mut args = full.clone();
    args.as_object_mut().expect("object").remove("tripodConfig");
    assert!(matches!(
        run_job(&mut ctx, JobKind::Discover, &args),
        Err(JobError::MissingConfig { .. })
    ));

    assert!(!storage.exists(), "validation must not touch storage");
}

#[test]
fn submission_survives_transient_failures() {
    let mut tasks = FlakyTasks::failing(3);
    let stat = RecordingStat::default();

    let token = submit_job(
        &mut tasks,
        quick(),
        &stat,
        "discover",
        JobKind::Discover,
        json!({"storeName": "s", "tripodConfig": CONFIG_JSON}),
    )
    .expect("submitted on the fourth attempt");

    assert_eq!(tasks.attempts, 4);
    assert_eq!(stat.increments_of(SUBMIT_RETRY), 3);
    let (queue, kind, payload) = tasks.jobs.get(&token).expect("job stored");
    assert_eq!(queue, "discover");
    assert_eq!(kind, "DiscoverImpactedSubjects");
    assert!(payload.get("tripodConfig").is_none(), "inline config is replaced");
    let generator = payload["tripodConfigGenerator"].as_str().expect("token");
    assert_eq!(tasks.configs.get(generator).map(String::as_str), Some(CONFIG_JSON));
}

#[test]
fn submission_gives_up_when_the_budget_is_spent() {
    let mut tasks = FlakyTasks::failing(5);
    let stat = RecordingStat::default();
    let err = submit_job(&mut tasks, quick(), &stat, "apply", JobKind::Apply, json!({}))
        .expect_err("budget exhausted");
    assert!(matches!(err, JobError::Submission { attempts: 5, .. }), "{err}");
    assert_eq!(tasks.attempts, 5);

    let mut lost = FlakyTasks {
        lose_tokens: true,
        ..FlakyTasks::default()
    };
    let err = submit_job(&mut lost, quick(), &stat, "apply", JobKind::Apply, json!({}))
        .expect_err("tokens never resolve");
    assert!(err.to_string().contains("could not be found"), "{err}");
}

#[test]
fn discovery_submits_one_apply_job_per_subject() {
    let dir = TempDir::new().expect("temp dir");
    let config = config();
    let mut store = open_store(dir.path(), &config);
    store.save_changes(&pod(), &base_data()).expect("seed");
    store.save_changes(&pod(), &isbn_change()).expect("change");
    drop(store);

    let mut tasks = FlakyTasks::default();
    let stat = RecordingStat::default();
    let mut ctx = JobContext {
        storage_dir: dir.path(),
        tasks: &mut tasks,
        stat: &stat,
        policy: quick(),
    };
    let job = discover_job(vec![OperationType::Tables, OperationType::Search], &isbn_change());
    let args = job.to_args().expect("args");
    assert_eq!(run_job(&mut ctx, JobKind::Discover, &args).expect("discover"), 1);

    let applied = tasks.payloads_on("apply");
    assert_eq!(applied.len(), 1);
    let subject = ImpactedSubject::from_json(applied[0]["subject"].clone()).expect("subject");
    assert_eq!(subject.operation, OperationType::Tables);
    assert_eq!(subject.resource_id, ResourceId::new("baseData:1", CONTEXT));
    assert!(applied[0]["tripodConfigGenerator"].is_string());
}

#[test]
fn unreferenced_changes_submit_nothing() {
    let dir = TempDir::new().expect("temp dir");
    let config = config();
    let mut store = open_store(dir.path(), &config);
    store.save_changes(&pod(), &base_data()).expect("seed");
    drop(store);

    let changes = pr_core::ChangeSet::builder()
        .add("baseData:1", "dct:subject", pr_core::Term::literal("Physics"), CONTEXT)
        .build();
    let mut tasks = FlakyTasks::default();
    let stat = RecordingStat::default();
    let mut ctx = JobContext {
        storage_dir: dir.path(),
        tasks: &mut tasks,
        stat: &stat,
        policy: quick(),
    };
    let job = discover_job(vec![OperationType::Tables], &changes);
    assert_eq!(job.execute(&mut ctx).expect("discover"), 0);
    assert!(tasks.jobs.is_empty());
}

#[test]
fn queued_jobs_run_through_to_table_rows() {
    let dir = TempDir::new().expect("temp dir");
    let config = config();
    let mut store = open_store(dir.path(), &config);
    store.save_changes(&pod(), &base_data()).expect("seed");
    store.save_changes(&pod(), &isbn_change()).expect("change");

    let stat = Arc::new(RecordingStat::default());
    let mut queue = SqliteQueue::open(dir.path()).expect("queue").with_stat(stat.clone());
    let args = discover_job(vec![OperationType::Tables], &isbn_change())
        .to_args()
        .expect("args");
    let discover_token = submit_job(
        &mut queue,
        quick(),
        stat.as_ref(),
        "discover",
        JobKind::Discover,
        args,
    )
    .expect("submit");

    let runner = TaskRunner {
        storage_dir: dir.path(),
        stat: stat.clone(),
        policy: quick(),
    };
    assert_eq!(
        runner.run_next(&mut queue, "discover").expect("run discover"),
        TaskOutcome::Completed {
            token: discover_token.clone(),
            count: 1
        }
    );
    assert!(matches!(
        runner.run_next(&mut queue, "apply").expect("run apply"),
        TaskOutcome::Completed { count: 1, .. }
    ));
    assert_eq!(runner.run_next(&mut queue, "apply").expect("drained"), TaskOutcome::Empty);

    assert!(queue.task_get(&discover_token).expect("get").is_none());
    assert_eq!(queue.task_count(None, None).expect("count"), 0);
    let row = store
        .artifact(OperationType::Tables, "t_resource", &ResourceId::new("baseData:1", CONTEXT))
        .expect("read")
        .expect("row");
    assert_eq!(
        row.document["value"]["isbn13"],
        json!(["9780393929691", "9780393929691-2", "9780393929691-3"])
    );
    assert_eq!(row.document["value"]["work_title"], "Physics Work");
}

#[test]
fn failing_apply_jobs_are_marked_failed() {
    let dir = TempDir::new().expect("temp dir");
    let stat = Arc::new(RecordingStat::default());
    let mut queue = SqliteQueue::open(dir.path()).expect("queue");

    let job = ApplyJob {
        subject: ImpactedSubject::new(
            ResourceId::new("baseData:1", CONTEXT),
            OperationType::Tables,
            store_name(),
            pod(),
        )
        .with_spec_types(["t_missing"]),
        config: ConfigSource::Inline(CONFIG_JSON.to_string()),
    };
    let token = submit_job(
        &mut queue,
        quick(),
        stat.as_ref(),
        "apply",
        ApplyJob::KIND,
        job.to_args().expect("args"),
    )
    .expect("submit");

    let runner = TaskRunner {
        storage_dir: dir.path(),
        stat: stat.clone(),
        policy: quick(),
    };
    let TaskOutcome::Failed { error, .. } = runner.run_next(&mut queue, "apply").expect("run") else {
        panic!("apply job should fail");
    };
    assert!(error.contains("t_missing"), "{error}");
    assert_eq!(stat.increments_of(JOB_FAIL), 1);

    let task = queue.task_get(&token).expect("get").expect("task");
    assert_eq!(task.status, TaskStatus::Failed);
    assert_eq!(task.error_message.as_deref(), Some(error.as_str()));
}
