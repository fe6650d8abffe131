#![forbid(unsafe_code)]

mod common;

use common::{CONTEXT, config, open_store, pod, seeded_store, store_name};
use pr_core::{ChangeSet, ImpactedSubject, OperationType, ResourceId, Term};
use pr_storage::{Composite, StoreError, Tables};
use std::sync::atomic::{AtomicBool, Ordering};
use tempfile::TempDir;

const ROUNDS: usize = 200;

fn retitle(round: usize) -> ChangeSet {
    let before = if round == 0 {
        "Chemistry".to_string()
    } else {
        format!("Chemistry {}", round - 1)
    };
    ChangeSet::builder()
        .delete_subject("baseData:9")
        .remove("baseData:3", "dct:title", Term::literal(before), CONTEXT)
        .add("baseData:3", "dct:title", Term::literal(format!("Chemistry {round}")), CONTEXT)
        .build()
}

#[test]
fn graph_writes_wait_for_concurrent_artifact_updates() {
    let dir = TempDir::new().expect("temp dir");
    let config = config();
    let mut writer = seeded_store(&dir, &config);
    let done = AtomicBool::new(false);

    let (worker_errors, writer_errors) = std::thread::scope(|scope| {
        let worker = scope.spawn(|| {
            let mut store = open_store(&dir, &config);
            let tables = Tables::new(&config, store_name(), pod());
            let subject = ImpactedSubject::new(
                ResourceId::new("baseData:1", CONTEXT),
                OperationType::Tables,
                store_name(),
                pod(),
            );
            let mut errors: Vec<StoreError> = Vec::new();
            while !done.load(Ordering::Acquire) {
                if let Err(err) = tables.update(&mut store, &subject) {
                    errors.push(err);
                }
            }
            errors
        });

        let mut errors: Vec<StoreError> = Vec::new();
        for round in 0..ROUNDS {
            if let Err(err) = writer.save_changes(&pod(), &retitle(round)) {
                errors.push(err);
            }
        }
        done.store(true, Ordering::Release);
        (worker.join().expect("worker thread"), errors)
    });

    assert!(worker_errors.is_empty(), "worker: {:?}", worker_errors.first());
    assert!(writer_errors.is_empty(), "writer: {:?}", writer_errors.first());

    let doc = writer
        .describe_resource(&pod(), "baseData:3", CONTEXT)
        .expect("describe")
        .expect("document");
    assert_eq!(
        doc.objects("dct:title"),
        [Term::literal(format!("Chemistry {}", ROUNDS - 1))]
    );
}
