#![forbid(unsafe_code)]

mod common;

use common::{CONTEXT, config, pod, seeded_store, store_name};
use pr_core::{ChangeSet, OperationType, ResourceId, Term};
use pr_storage::{AnyComposite, Composite, SearchIndexer, SqliteStore, Views};
use serde_json::json;
use tempfile::TempDir;

fn retitle_work(store: &mut SqliteStore, title: &str) -> ChangeSet {
    let changes = ChangeSet::builder()
        .remove("baseData:2", "dct:title", Term::literal("Physics Work"), CONTEXT)
        .add("baseData:2", "dct:title", Term::literal(title), CONTEXT)
        .build();
    store.save_changes(&pod(), &changes).expect("save");
    changes
}

#[test]
fn full_view_embeds_the_joined_work() {
    let dir = TempDir::new().expect("temp dir");
    let config = config();
    let mut store = seeded_store(&dir, &config);
    let views = Views::new(&config, store_name(), pod());

    assert_eq!(views.generate_views(&mut store, "v_resource_full", None).expect("generate"), 2);

    let view = views
        .get_view(&store, "v_resource_full", "http://basedata.com/b/1", None)
        .expect("get view")
        .expect("view exists");
    assert_eq!(view["_id"], json!({"r": "baseData:1", "c": CONTEXT, "type": "v_resource_full"}));
    let graphs = view["value"]["_graphs"].as_array().expect("graphs");
    assert_eq!(graphs.len(), 2);
    assert_eq!(graphs[0]["_id"]["r"], "baseData:1");
    assert_eq!(graphs[0]["bibo:isbn13"], json!([{"l": "9780393929691"}, {"l": "9780393929691-2"}]));
    assert_eq!(graphs[1]["_id"]["r"], "baseData:2");
    assert_eq!(graphs[1]["dct:title"], json!([{"l": "Physics Work"}]));

    let chemistry = views
        .get_view(&store, "v_resource_full", "baseData:3", Some(CONTEXT))
        .expect("get view")
        .expect("view exists");
    assert_eq!(chemistry["value"]["_graphs"].as_array().map(Vec::len), Some(1));
}

#[test]
fn include_list_restricts_the_view() {
    let dir = TempDir::new().expect("temp dir");
    let config = config();
    let mut store = seeded_store(&dir, &config);
    let views = Views::new(&config, store_name(), pod());
    views.generate_views(&mut store, "v_resource_title", Some(CONTEXT)).expect("generate");

    let view = views
        .get_view(&store, "v_resource_title", "baseData:1", None)
        .expect("get view")
        .expect("view exists");
    let graph = view["value"]["_graphs"][0].as_object().expect("graph");
    let mut keys: Vec<&str> = graph.keys().map(String::as_str).collect();
    keys.sort_unstable();
    assert_eq!(keys, vec!["_id", "dct:title", "rdf:type"]);
}

#[test]
fn work_title_change_reaches_the_resource_view() {
    let dir = TempDir::new().expect("temp dir");
    let config = config();
    let mut store = seeded_store(&dir, &config);
    let views = Views::new(&config, store_name(), pod());
    views.generate_views(&mut store, "v_resource_full", None).expect("generate");
    views.generate_views(&mut store, "v_resource_title", None).expect("generate");

    let changes = retitle_work(&mut store, "Physics, Revised");
    let subjects = views
        .impacted_subjects(&store, &changes.subjects_and_predicates_of_change(), CONTEXT, None)
        .expect("discover");
    assert_eq!(subjects.len(), 1);
    assert_eq!(subjects[0].resource_id, ResourceId::new("baseData:1", CONTEXT));
    assert_eq!(subjects[0].spec_types(), ["v_resource_full".to_string()]);

    for subject in &subjects {
        views.update(&mut store, subject).expect("update");
    }
    let view = views
        .get_view(&store, "v_resource_full", "baseData:1", None)
        .expect("get view")
        .expect("view exists");
    assert_eq!(view["value"]["_graphs"][1]["dct:title"], json!([{"l": "Physics, Revised"}]));
}

#[test]
fn any_predicate_on_an_unrestricted_view_root_is_a_change() {
    let dir = TempDir::new().expect("temp dir");
    let config = config();
    let mut store = seeded_store(&dir, &config);
    let composite = AnyComposite::for_operation(OperationType::Views, &config, store_name(), pod());
    assert_eq!(composite.operation_type(), OperationType::Views);

    let changes = ChangeSet::builder()
        .add("baseData:3", "dct:subject", Term::literal("Science"), CONTEXT)
        .build();
    store.save_changes(&pod(), &changes).expect("save");

    let subjects = composite
        .impacted_subjects(&store, &changes.subjects_and_predicates_of_change(), CONTEXT, None)
        .expect("discover");
    assert_eq!(subjects.len(), 1);
    assert_eq!(subjects[0].spec_types(), ["v_resource_full".to_string()]);
}

#[test]
fn search_matches_every_query_word() {
    let dir = TempDir::new().expect("temp dir");
    let config = config();
    let mut store = seeded_store(&dir, &config);
    let search = SearchIndexer::new(&config, store_name(), pod());
    assert_eq!(
        search.generate_search_index_docs(&mut store, "i_resource", None).expect("generate"),
        2
    );

    let found = search.search(&store, "i_resource", "Physics", 0).expect("search");
    assert_eq!(found.len(), 1);
    assert_eq!(found[0]["_id"]["r"], "baseData:1");
    assert_eq!(found[0]["result"]["title"], "Physics: A Student Guide");

    let found = search.search(&store, "i_resource", "chemistry", 10).expect("search");
    assert_eq!(found.len(), 1);
    assert_eq!(found[0]["_id"]["r"], "baseData:3");

    let found = search.search(&store, "i_resource", "physics work", 0).expect("search");
    assert_eq!(found.len(), 1, "joined titles are indexed too");
    assert_eq!(found[0]["_id"]["r"], "baseData:1");

    assert!(search.search(&store, "i_resource", "physics chemistry", 0).expect("search").is_empty());
    assert!(search.search(&store, "i_resource", "  ", 0).expect("search").is_empty());
    assert!(search.search(&store, "i_missing", "physics", 0).is_err());
}

#[test]
fn reindexing_after_a_joined_change_replaces_old_terms() {
    let dir = TempDir::new().expect("temp dir");
    let config = config();
    let mut store = seeded_store(&dir, &config);
    let search = SearchIndexer::new(&config, store_name(), pod());
    search.generate_search_index_docs(&mut store, "i_resource", None).expect("generate");

    let changes = retitle_work(&mut store, "Mechanics Treatise");
    let subjects = search
        .impacted_subjects(&store, &changes.subjects_and_predicates_of_change(), CONTEXT, None)
        .expect("discover");
    assert_eq!(subjects.len(), 1);
    for subject in &subjects {
        search.update(&mut store, subject).expect("update");
    }

    let found = search.search(&store, "i_resource", "treatise", 0).expect("search");
    assert_eq!(found.len(), 1);
    assert_eq!(found[0]["_id"]["r"], "baseData:1");
    assert!(search.search(&store, "i_resource", "work", 0).expect("search").is_empty());
    assert_eq!(store.artifact_count(OperationType::Search, None).expect("count"), 2);
}
