#![forbid(unsafe_code)]
#![allow(dead_code)]

use pr_core::ids::{PodName, StoreName};
use pr_core::stat::StatSink;
use pr_core::{ChangeSet, Config, RDF_TYPE, Term};
use pr_storage::{SqliteStore, StoreError, TaskStatus};
use pr_worker::TaskSystem;
use serde_json::Value as JsonValue;
use std::collections::BTreeMap;
use std::path::Path;
use std::sync::Mutex;

pub const CONTEXT: &str = "http://talisaspire.com/";
pub const POD: &str = "CBD_testing";
pub const STORE: &str = "tripod_php_testing";

pub const CONFIG_JSON: &str = r#"{
    "namespaces": {
        "acorn": "http://talisaspire.com/schema#",
        "bibo": "http://purl.org/ontology/bibo/",
        "dct": "http://purl.org/dc/terms/",
        "rdf": "http://www.w3.org/1999/02/22-rdf-syntax-ns#",
        "baseData": "http://basedata.com/b/"
    },
    "defaultContext": "http://talisaspire.com/",
    "tableSpecifications": [
        {
            "_id": "t_resource",
            "type": "acorn:Resource",
            "from": "CBD_testing",
            "fields": [{"fieldName": "isbn13", "predicates": ["bibo:isbn13"]}],
            "joins": {
                "dct:isVersionOf": {
                    "fields": [{"fieldName": "work_title", "predicates": ["dct:title"]}]
                }
            }
        }
    ],
    "viewSpecifications": [
        {"_id": "v_resource", "type": "acorn:Resource", "from": "CBD_testing"}
    ],
    "searchSpecifications": [
        {
            "_id": "i_resource",
            "type": "acorn:Resource",
            "from": "CBD_testing",
            "fields": [{"fieldName": "title", "predicates": ["dct:title"]}],
            "indices": [{"fieldName": "title", "predicates": ["dct:title"]}]
        }
    ]
}"#;

pub fn config() -> Config {
    Config::from_json_str(CONFIG_JSON).expect("config")
}

pub fn store_name() -> StoreName {
    StoreName::try_new(STORE).expect("store name")
}

pub fn pod() -> PodName {
    PodName::try_new(POD).expect("pod name")
}

pub fn base_data() -> ChangeSet {
    ChangeSet::builder()
        .add("baseData:1", RDF_TYPE, Term::uri("acorn:Resource"), CONTEXT)
        .add("baseData:1", "bibo:isbn13", Term::literal("9780393929691"), CONTEXT)
        .add("baseData:1", "bibo:isbn13", Term::literal("9780393929691-2"), CONTEXT)
        .add("baseData:1", "dct:title", Term::literal("Physics: A Student Guide"), CONTEXT)
        .add("baseData:1", "dct:isVersionOf", Term::uri("baseData:2"), CONTEXT)
        .add("baseData:2", RDF_TYPE, Term::uri("acorn:Work"), CONTEXT)
        .add("baseData:2", "dct:title", Term::literal("Physics Work"), CONTEXT)
        .build()
}

pub fn open_store(dir: &Path, config: &Config) -> SqliteStore {
    SqliteStore::open(dir, &store_name())
        .expect("open store")
        .with_namespaces(config.namespaces.clone())
}

pub fn isbn_change() -> ChangeSet {
    ChangeSet::builder()
        .add("baseData:1", "bibo:isbn13", Term::literal("9780393929691-3"), CONTEXT)
        .build()
}

/// In-memory task system whose first `failures` enqueues fail. With
/// `lose_tokens`, enqueues succeed but the token never resolves.
#[derive(Debug, Default)]
pub struct FlakyTasks {
    pub failures: u32,
    pub lose_tokens: bool,
    pub attempts: u32,
    pub jobs: BTreeMap<String, (String, String, JsonValue)>,
    pub configs: BTreeMap<String, String>,
}

impl FlakyTasks {
    pub fn failing(failures: u32) -> Self {
        Self {
            failures,
            ..Self::default()
        }
    }

    pub fn payloads_on(&self, queue: &str) -> Vec<&JsonValue> {
        self.jobs
            .values()
            .filter(|(q, _, _)| q == queue)
            .map(|(_, _, payload)| payload)
            .collect()
    }
}

impl TaskSystem for FlakyTasks {
    fn enqueue(
        &mut self,
        queue: &str,
        kind: &str,
        payload: &JsonValue,
    ) -> Result<String, StoreError> {
        self.attempts += 1;
        if self.failures > 0 {
            self.failures -= 1;
            return Err(StoreError::QueueCommand("task system unreachable".to_string()));
        }
        let token = format!("TASK-{:06}", self.attempts);
        if !self.lose_tokens {
            self.jobs.insert(
                token.clone(),
                (queue.to_string(), kind.to_string(), payload.clone()),
            );
        }
        Ok(token)
    }

    fn status(&self, token: &str) -> Result<Option<TaskStatus>, StoreError> {
        Ok(self.jobs.get(token).map(|_| TaskStatus::Queued))
    }

    fn cache_config(&mut self, config_json: &str) -> Result<String, StoreError> {
        let token = pr_storage::config_token(config_json);
        self.configs.insert(token.clone(), config_json.to_string());
        Ok(token)
    }

    fn cached_config(&self, token: &str) -> Result<Option<String>, StoreError> {
        Ok(self.configs.get(token).cloned())
    }
}

#[derive(Debug, Default)]
pub struct RecordingStat {
    pub increments: Mutex<Vec<String>>,
    pub timers: Mutex<Vec<(String, u64)>>,
}

impl RecordingStat {
    pub fn increments_of(&self, operation: &str) -> usize {
        self.increments
            .lock()
            .expect("stat lock")
            .iter()
            .filter(|name| name.as_str() == operation)
            .count()
    }

    pub fn timers_of(&self, operation: &str) -> usize {
        self.timers
            .lock()
            .expect("stat lock")
            .iter()
            .filter(|(name, _)| name == operation)
            .count()
    }
}

impl StatSink for RecordingStat {
    fn increment(&self, operation: &str) {
        self.increments
            .lock()
            .expect("stat lock")
            .push(operation.to_string());
    }

    fn timer(&self, operation: &str, duration_ms: u64) {
        self.timers
            .lock()
            .expect("stat lock")
            .push((operation.to_string(), duration_ms));
    }
}
