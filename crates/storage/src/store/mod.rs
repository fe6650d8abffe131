#![forbid(unsafe_code)]

mod artifacts;
mod config_cache;
mod error;
mod graph;
mod queue;
mod support;
mod table_query;
mod tasks;
mod types;

pub use artifacts::{Artifact, StoredArtifact};
pub use config_cache::config_token;
pub use error::StoreError;
pub(crate) use graph::GraphReader;
pub use graph::SaveOutcome;
pub use queue::SqliteQueue;
pub use support::now_ms;
pub use table_query::{SortDirection, TableHead, TableQuery, TableRows};
pub use types::*;

use pr_core::Namespaces;
use pr_core::ids::StoreName;
use rusqlite::Connection;
use std::path::{Path, PathBuf};
use std::time::Duration;

const BUSY_TIMEOUT: Duration = Duration::from_secs(5);

/// One logical store: resource documents for every pod plus the artifacts
/// derived from them. Backed by `<storage_dir>/<store_name>.db`.
#[derive(Debug)]
pub struct SqliteStore {
    conn: Connection,
    storage_dir: PathBuf,
    store_name: StoreName,
    namespaces: Namespaces,
}

impl SqliteStore {
    pub fn open(storage_dir: impl AsRef<Path>, store_name: &StoreName) -> Result<Self, StoreError> {
        let storage_dir = storage_dir.as_ref().to_path_buf();
        std::fs::create_dir_all(&storage_dir)?;

        let conn = open_connection(&storage_dir.join(format!("{store_name}.db")))?;
        support::install_store_schema(&conn)?;

        Ok(Self {
            conn,
            storage_dir,
            store_name: store_name.clone(),
            namespaces: Namespaces::default(),
        })
    }

    /// Namespaces used to normalise resources, contexts and predicates on the
    /// way in. Stored documents always use the qname form.
    pub fn with_namespaces(mut self, namespaces: Namespaces) -> Self {
        self.namespaces = namespaces;
        self
    }

    pub fn storage_dir(&self) -> &Path {
        &self.storage_dir
    }

    pub fn store_name(&self) -> &StoreName {
        &self.store_name
    }

    pub fn namespaces(&self) -> &Namespaces {
        &self.namespaces
    }
}

fn open_connection(path: &Path) -> Result<Connection, StoreError> {
    let conn = Connection::open(path)?;
    conn.busy_timeout(BUSY_TIMEOUT)?;
    let _mode: String = conn.query_row("PRAGMA journal_mode = WAL", [], |row| row.get(0))?;
    Ok(conn)
}
