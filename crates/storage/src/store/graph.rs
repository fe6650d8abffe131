#![forbid(unsafe_code)]

use super::support::now_ms;
use super::{SqliteStore, StoreError};
use pr_core::ids::PodName;
use pr_core::{ChangeSet, Namespaces, ResourceDoc, ResourceId, Statement, Term};
use rusqlite::{Connection, OptionalExtension, TransactionBehavior, params};
use std::collections::BTreeMap;
use std::collections::btree_map::Entry;

/// Documents touched by one `save_changes` call.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct SaveOutcome {
    pub written: Vec<ResourceId>,
    pub deleted: Vec<ResourceId>,
}

impl SaveOutcome {
    pub fn is_empty(&self) -> bool {
        self.written.is_empty() && self.deleted.is_empty()
    }
}

impl SqliteStore {
    /// Applies a change set to the resource documents of `pod` in one
    /// transaction that takes the write lock before its first read. Deleted
    /// subjects go first (in every context), then removals, then additions.
    /// Documents left without statements are dropped.
    pub fn save_changes(
        &mut self,
        pod: &PodName,
        changes: &ChangeSet,
    ) -> Result<SaveOutcome, StoreError> {
        let now = now_ms();
        let ns = &self.namespaces;
        let tx = self
            .conn
            .transaction_with_behavior(TransactionBehavior::Immediate)?;
        let mut outcome = SaveOutcome::default();

        for subject in changes.deleted_subjects() {
            let r = ns.normalize(subject);
            for id in contexts_of_subject_tx(&tx, pod.as_str(), &r)? {
                if delete_resource_tx(&tx, pod.as_str(), &id)? {
                    outcome.deleted.push(id);
                }
            }
        }

        let mut docs: BTreeMap<ResourceId, ResourceDoc> = BTreeMap::new();
        for statement in changes.removals() {
            let (id, predicate, object) = normalize_statement(ns, statement);
            doc_entry_tx(&tx, pod.as_str(), &mut docs, id)?.remove(&predicate, &object);
        }
        for statement in changes.additions() {
            let (id, predicate, object) = normalize_statement(ns, statement);
            doc_entry_tx(&tx, pod.as_str(), &mut docs, id)?.add(predicate, object);
        }

        for (id, doc) in docs {
            if doc.is_empty() {
                if delete_resource_tx(&tx, pod.as_str(), &id)? {
                    outcome.deleted.push(id);
                }
            } else {
                write_resource_tx(&tx, pod.as_str(), &doc, now)?;
                outcome.written.push(id);
            }
        }

        tx.commit()?;
        tracing::debug!(
            store = %self.store_name,
            pod = %pod,
            written = outcome.written.len(),
            deleted = outcome.deleted.len(),
            "saved graph changes"
        );
        Ok(outcome)
    }

    /// Current document for resource `r` in context `c`. Either may be given
    /// as a qname or a full uri.
    pub fn describe_resource(
        &self,
        pod: &PodName,
        r: &str,
        c: &str,
    ) -> Result<Option<ResourceDoc>, StoreError> {
        let id = ResourceId::new(self.namespaces.normalize(r), self.namespaces.normalize(c));
        describe_resource_tx(&self.conn, pod.as_str(), &id)
    }

    /// Resources carrying `rdf_type`, ordered by resource then context.
    /// `None` for the context means every context.
    pub fn resources_of_type(
        &self,
        pod: &PodName,
        rdf_type: &str,
        context: Option<&str>,
    ) -> Result<Vec<ResourceId>, StoreError> {
        let context = context.map(|c| self.namespaces.normalize(c));
        resources_of_type_tx(
            &self.conn,
            pod.as_str(),
            &self.namespaces.normalize(rdf_type),
            context.as_deref(),
        )
    }
}

/// Read access to resource documents inside whatever transaction the caller
/// holds.
pub(crate) struct GraphReader<'a> {
    conn: &'a Connection,
    pod: &'a str,
}

impl<'a> GraphReader<'a> {
    pub(crate) fn new(conn: &'a Connection, pod: &'a str) -> Self {
        Self { conn, pod }
    }

    pub(crate) fn describe(&self, id: &ResourceId) -> Result<Option<ResourceDoc>, StoreError> {
        describe_resource_tx(self.conn, self.pod, id)
    }

    pub(crate) fn resources_of_type(
        &self,
        rdf_type: &str,
        context: Option<&str>,
    ) -> Result<Vec<ResourceId>, StoreError> {
        resources_of_type_tx(self.conn, self.pod, rdf_type, context)
    }
}

fn normalize_statement(ns: &Namespaces, statement: &Statement) -> (ResourceId, String, Term) {
    let id = ResourceId::new(
        ns.normalize(&statement.subject),
        ns.normalize(&statement.context),
    );
    let object = match &statement.object {
        Term::Uri(value) => Term::uri(ns.normalize(value)),
        Term::Literal(value) => Term::literal(value.clone()),
    };
    (id, ns.normalize(&statement.predicate), object)
}

fn doc_entry_tx<'d>(
    conn: &Connection,
    pod: &str,
    docs: &'d mut BTreeMap<ResourceId, ResourceDoc>,
    id: ResourceId,
) -> Result<&'d mut ResourceDoc, StoreError> {
    match docs.entry(id) {
        Entry::Occupied(entry) => Ok(entry.into_mut()),
        Entry::Vacant(entry) => {
            let doc = describe_resource_tx(conn, pod, entry.key())?
                .unwrap_or_else(|| ResourceDoc::new(entry.key().clone()));
            Ok(entry.insert(doc))
        }
    }
}

pub(super) fn describe_resource_tx(
    conn: &Connection,
    pod: &str,
    id: &ResourceId,
) -> Result<Option<ResourceDoc>, StoreError> {
    let raw: Option<String> = conn
        .query_row(
            "SELECT doc_json FROM resources WHERE pod=?1 AND r=?2 AND c=?3",
            params![pod, id.r, id.c],
            |row| row.get(0),
        )
        .optional()?;
    match raw {
        Some(raw) => Ok(Some(serde_json::from_str(&raw)?)),
        None => Ok(None),
    }
}

fn resources_of_type_tx(
    conn: &Connection,
    pod: &str,
    rdf_type: &str,
    context: Option<&str>,
) -> Result<Vec<ResourceId>, StoreError> {
    let mut stmt = conn.prepare(
        "SELECT r, c FROM resource_types \
         WHERE pod=?1 AND rdf_type=?2 AND (?3 IS NULL OR c=?3) \
         ORDER BY r ASC, c ASC",
    )?;
    let rows = stmt.query_map(params![pod, rdf_type, context], |row| {
        Ok(ResourceId::new(row.get::<_, String>(0)?, row.get::<_, String>(1)?))
    })?;
    Ok(rows.collect::<Result<Vec<_>, _>>()?)
}

fn contexts_of_subject_tx(
    conn: &Connection,
    pod: &str,
    r: &str,
) -> Result<Vec<ResourceId>, StoreError> {
    let mut stmt = conn.prepare("SELECT c FROM resources WHERE pod=?1 AND r=?2 ORDER BY c ASC")?;
    let rows = stmt.query_map(params![pod, r], |row| {
        Ok(ResourceId::new(r, row.get::<_, String>(0)?))
    })?;
    Ok(rows.collect::<Result<Vec<_>, _>>()?)
}

fn write_resource_tx(
    conn: &Connection,
    pod: &str,
    doc: &ResourceDoc,
    now_ms: i64,
) -> Result<(), StoreError> {
    let doc_json = serde_json::to_string(doc)?;
    conn.execute(
        "INSERT INTO resources(pod, r, c, doc_json, updated_at_ms) VALUES (?1, ?2, ?3, ?4, ?5) \
         ON CONFLICT(pod, r, c) DO UPDATE SET doc_json=excluded.doc_json, updated_at_ms=excluded.updated_at_ms",
        params![pod, doc.id.r, doc.id.c, doc_json, now_ms],
    )?;
    conn.execute(
        "DELETE FROM resource_types WHERE pod=?1 AND r=?2 AND c=?3",
        params![pod, doc.id.r, doc.id.c],
    )?;
    for rdf_type in doc.types() {
        conn.execute(
            "INSERT OR IGNORE INTO resource_types(pod, r, c, rdf_type) VALUES (?1, ?2, ?3, ?4)",
            params![pod, doc.id.r, doc.id.c, rdf_type],
        )?;
    }
    Ok(())
}

fn delete_resource_tx(conn: &Connection, pod: &str, id: &ResourceId) -> Result<bool, StoreError> {
    conn.execute(
        "DELETE FROM resource_types WHERE pod=?1 AND r=?2 AND c=?3",
        params![pod, id.r, id.c],
    )?;
    let changed = conn.execute(
        "DELETE FROM resources WHERE pod=?1 AND r=?2 AND c=?3",
        params![pod, id.r, id.c],
    )?;
    Ok(changed > 0)
}
