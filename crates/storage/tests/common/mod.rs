#![forbid(unsafe_code)]
#![allow(dead_code)]

use pr_core::ids::{PodName, StoreName};
use pr_core::stat::StatSink;
use pr_core::{ChangeSet, Config, RDF_TYPE, Term};
use pr_storage::SqliteStore;
use std::sync::Mutex;
use tempfile::TempDir;

pub const CONTEXT: &str = "http://talisaspire.com/";
pub const POD: &str = "CBD_testing";
pub const STORE: &str = "tripod_php_testing";

pub fn config() -> Config {
    Config::from_json_str(
        r#"{
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
                    "fields": [
                        {"fieldName": "type", "predicates": ["rdf:type"]},
                        {"fieldName": "isbn", "predicates": ["bibo:isbn13"]}
                    ],
                    "joins": {
                        "dct:isVersionOf": {
                            "fields": [{"fieldName": "isbn13", "predicates": ["bibo:isbn13"]}]
                        }
                    }
                },
                {
                    "_id": "t_resource_isbns",
                    "type": "http://talisaspire.com/schema#Resource",
                    "from": "CBD_testing",
                    "fields": [
                        {"fieldName": "isbn13", "predicates": ["bibo:isbn13"]},
                        {"fieldName": "link", "value": "_link_"}
                    ]
                },
                {
                    "_id": "t_work",
                    "type": "acorn:Work",
                    "from": "CBD_testing",
                    "fields": [{"fieldName": "title", "predicates": ["dct:title"]}]
                }
            ],
            "viewSpecifications": [
                {
                    "_id": "v_resource_full",
                    "type": "acorn:Resource",
                    "from": "CBD_testing",
                    "joins": {"dct:isVersionOf": {}}
                },
                {
                    "_id": "v_resource_title",
                    "type": "acorn:Resource",
                    "from": "CBD_testing",
                    "include": ["dct:title"]
                }
            ],
            "searchSpecifications": [
                {
                    "_id": "i_resource",
                    "type": "acorn:Resource",
                    "from": "CBD_testing",
                    "fields": [{"fieldName": "title", "predicates": ["dct:title"]}],
                    "indices": [{"fieldName": "title", "predicates": ["dct:title"]}],
                    "joins": {
                        "dct:isVersionOf": {
                            "indices": [{"fieldName": "work_title", "predicates": ["dct:title"]}]
                        }
                    }
                }
            ]
        }"#,
    )
    .expect("config")
}

pub fn store_name() -> StoreName {
    StoreName::try_new(STORE).expect("store name")
}

pub fn pod() -> PodName {
    PodName::try_new(POD).expect("pod name")
}

/// Two resources and the work one of them is a version of. Subjects are
/// written as full uris to exercise normalisation on the way in.
pub fn base_data() -> ChangeSet {
    ChangeSet::builder()
        .add("http://basedata.com/b/1", RDF_TYPE, Term::uri("http://talisaspire.com/schema#Resource"), CONTEXT)
        .add("http://basedata.com/b/1", "bibo:isbn13", Term::literal("9780393929691"), CONTEXT)
        .add("http://basedata.com/b/1", "bibo:isbn13", Term::literal("9780393929691-2"), CONTEXT)
        .add("http://basedata.com/b/1", "dct:title", Term::literal("Physics: A Student Guide"), CONTEXT)
        .add("http://basedata.com/b/1", "dct:isVersionOf", Term::uri("http://basedata.com/b/2"), CONTEXT)
        .add("baseData:2", RDF_TYPE, Term::uri("acorn:Work"), CONTEXT)
        .add("baseData:2", "bibo:isbn13", Term::literal("9780393929690"), CONTEXT)
        .add("baseData:2", "dct:title", Term::literal("Physics Work"), CONTEXT)
        .add("baseData:3", RDF_TYPE, Term::uri("acorn:Resource"), CONTEXT)
        .add("baseData:3", "bibo:isbn13", Term::literal("9780393929690"), CONTEXT)
        .add("baseData:3", "dct:title", Term::literal("Chemistry"), CONTEXT)
        .build()
}

pub fn open_store(dir: &TempDir, config: &Config) -> SqliteStore {
    SqliteStore::open(dir.path(), &store_name())
        .expect("open store")
        .with_namespaces(config.namespaces.clone())
}

/// Opens a store holding `base_data`.
pub fn seeded_store(dir: &TempDir, config: &Config) -> SqliteStore {
    let mut store = open_store(dir, config);
    store.save_changes(&pod(), &base_data()).expect("seed");
    store
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
