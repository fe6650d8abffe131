#![forbid(unsafe_code)]

mod artifacts;
mod graph;
mod queue;
mod tasks;

pub(super) fn store_schema_sql() -> String {
    [graph::SQL, artifacts::SQL].concat()
}

pub(super) fn queue_schema_sql() -> String {
    [queue::SQL, tasks::SQL].concat()
}
