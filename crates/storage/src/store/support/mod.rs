#![forbid(unsafe_code)]

mod schema;
mod time;

pub(super) use schema::{install_queue_schema, install_store_schema};
pub use time::now_ms;
