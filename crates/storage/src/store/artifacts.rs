#![forbid(unsafe_code)]

use super::graph::GraphReader;
use super::support::now_ms;
use super::{SqliteStore, StoreError};
use pr_core::{OperationType, ResourceId};
use rusqlite::{Connection, OptionalExtension, TransactionBehavior, params};
use serde_json::Value as JsonValue;
use std::collections::{BTreeMap, BTreeSet};

/// `(spec_id, resource) -> (doc_json, created_at_ms)` of the rows about to be
/// replaced.
type Stamps = BTreeMap<(String, ResourceId), (String, i64)>;

/// A freshly built derived document, ready to be stored.
#[derive(Clone, Debug, PartialEq)]
pub struct Artifact {
    pub operation: OperationType,
    pub spec_id: String,
    pub id: ResourceId,
    pub document: JsonValue,
    /// Every resource document read while building this artifact, the root
    /// included.
    pub impacts: BTreeSet<ResourceId>,
    pub search_terms: Vec<String>,
}

#[derive(Clone, Debug, PartialEq)]
pub struct StoredArtifact {
    pub spec_id: String,
    pub id: ResourceId,
    pub document: JsonValue,
    pub created_at_ms: i64,
}

impl SqliteStore {
    pub fn artifact(
        &self,
        operation: OperationType,
        spec_id: &str,
        id: &ResourceId,
    ) -> Result<Option<StoredArtifact>, StoreError> {
        let raw: Option<(String, i64)> = self
            .conn
            .query_row(
                "SELECT doc_json, created_at_ms FROM artifacts \
                 WHERE kind=?1 AND spec_id=?2 AND r=?3 AND c=?4",
                params![operation.as_str(), spec_id, id.r, id.c],
                |row| Ok((row.get(0)?, row.get(1)?)),
            )
            .optional()?;
        let Some((doc_json, created_at_ms)) = raw else {
            return Ok(None);
        };
        Ok(Some(StoredArtifact {
            spec_id: spec_id.to_string(),
            id: id.clone(),
            document: serde_json::from_str(&doc_json)?,
            created_at_ms,
        }))
    }

    /// All artifacts of one specification, ordered by resource then context.
    pub fn artifacts(
        &self,
        operation: OperationType,
        spec_id: &str,
    ) -> Result<Vec<StoredArtifact>, StoreError> {
        let mut stmt = self.conn.prepare(
            "SELECT spec_id, r, c, doc_json, created_at_ms FROM artifacts \
             WHERE kind=?1 AND spec_id=?2 ORDER BY r ASC, c ASC",
        )?;
        let mut rows = stmt.query(params![operation.as_str(), spec_id])?;
        let mut out = Vec::new();
        while let Some(row) = rows.next()? {
            out.push(stored_artifact_from_row(row)?);
        }
        Ok(out)
    }

    /// Artifacts of every specification for one (resource, context).
    pub fn artifacts_for_resource(
        &self,
        operation: OperationType,
        id: &ResourceId,
    ) -> Result<Vec<StoredArtifact>, StoreError> {
        let mut stmt = self.conn.prepare(
            "SELECT spec_id, r, c, doc_json, created_at_ms FROM artifacts \
             WHERE kind=?1 AND r=?2 AND c=?3 ORDER BY spec_id ASC",
        )?;
        let mut rows = stmt.query(params![operation.as_str(), id.r, id.c])?;
        let mut out = Vec::new();
        while let Some(row) = rows.next()? {
            out.push(stored_artifact_from_row(row)?);
        }
        Ok(out)
    }

    pub fn artifact_count(
        &self,
        operation: OperationType,
        spec_id: Option<&str>,
    ) -> Result<usize, StoreError> {
        let count: i64 = self.conn.query_row(
            "SELECT COUNT(*) FROM artifacts WHERE kind=?1 AND (?2 IS NULL OR spec_id=?2)",
            params![operation.as_str(), spec_id],
            |row| row.get(0),
        )?;
        Ok(usize::try_from(count).unwrap_or(0))
    }

    /// Whether `id` already has an artifact for `spec_id`, optionally only
    /// counting artifacts created at or before `cutoff_ms`.
    pub(crate) fn artifact_exists(
        &self,
        operation: OperationType,
        spec_id: &str,
        id: &ResourceId,
        cutoff_ms: Option<i64>,
    ) -> Result<bool, StoreError> {
        let found: Option<i64> = self
            .conn
            .query_row(
                "SELECT 1 FROM artifacts \
                 WHERE kind=?1 AND spec_id=?2 AND r=?3 AND c=?4 \
                   AND (?5 IS NULL OR created_at_ms <= ?5)",
                params![operation.as_str(), spec_id, id.r, id.c, cutoff_ms],
                |row| row.get(0),
            )
            .optional()?;
        Ok(found.is_some())
    }

    /// Roots of the artifacts whose impact index mentions `dependency`.
    pub(crate) fn dependent_artifacts(
        &self,
        operation: OperationType,
        spec_id: &str,
        dependency: &ResourceId,
        cutoff_ms: Option<i64>,
    ) -> Result<Vec<ResourceId>, StoreError> {
        let mut stmt = self.conn.prepare(
            "SELECT i.r, i.c FROM artifact_impacts i \
             JOIN artifacts a ON a.kind=i.kind AND a.spec_id=i.spec_id AND a.r=i.r AND a.c=i.c \
             WHERE i.kind=?1 AND i.spec_id=?2 AND i.dep_r=?3 AND i.dep_c=?4 \
               AND (?5 IS NULL OR a.created_at_ms <= ?5) \
             ORDER BY i.r ASC, i.c ASC",
        )?;
        let rows = stmt.query_map(
            params![operation.as_str(), spec_id, dependency.r, dependency.c, cutoff_ms],
            |row| Ok(ResourceId::new(row.get::<_, String>(0)?, row.get::<_, String>(1)?)),
        )?;
        let out = rows.collect::<Result<Vec<_>, _>>()?;
        Ok(out)
    }

    /// Deletes the artifacts of `spec_ids` for `id`, then stores whatever
    /// `build` produces, all in one transaction. `build` sees the graph as
    /// of that transaction. A rebuilt row whose document did not change
    /// keeps its `created_at_ms`, so repeating the call leaves the row as it
    /// was.
    pub(crate) fn replace_artifacts<F>(
        &mut self,
        operation: OperationType,
        pod: &str,
        id: &ResourceId,
        spec_ids: &[String],
        build: F,
    ) -> Result<usize, StoreError>
    where
        F: FnOnce(&GraphReader<'_>) -> Result<Vec<Artifact>, StoreError>,
    {
        let now = now_ms();
        let tx = self
            .conn
            .transaction_with_behavior(TransactionBehavior::Immediate)?;
        let mut previous = Stamps::new();
        for spec_id in spec_ids {
            stamps_tx(&tx, operation, spec_id, Some(id), None, &mut previous)?;
            delete_artifacts_tx(&tx, operation, Some(spec_id.as_str()), id)?;
        }
        let built = build(&GraphReader::new(&tx, pod))?;
        for artifact in &built {
            insert_artifact_tx(&tx, artifact, now, &previous)?;
        }
        tx.commit()?;
        Ok(built.len())
    }

    /// Rebuilds every artifact of one specification, optionally limited to
    /// one context.
    pub(crate) fn replace_spec_artifacts<F>(
        &mut self,
        operation: OperationType,
        pod: &str,
        spec_id: &str,
        context: Option<&str>,
        build: F,
    ) -> Result<usize, StoreError>
    where
        F: FnOnce(&GraphReader<'_>) -> Result<Vec<Artifact>, StoreError>,
    {
        let now = now_ms();
        let tx = self
            .conn
            .transaction_with_behavior(TransactionBehavior::Immediate)?;
        let mut previous = Stamps::new();
        stamps_tx(&tx, operation, spec_id, None, context, &mut previous)?;
        delete_spec_artifacts_tx(&tx, operation, spec_id, context)?;
        let built = build(&GraphReader::new(&tx, pod))?;
        for artifact in &built {
            insert_artifact_tx(&tx, artifact, now, &previous)?;
        }
        tx.commit()?;
        Ok(built.len())
    }

    /// Removes every artifact of `operation` for (resource, context).
    pub fn delete_resource_artifacts(
        &mut self,
        operation: OperationType,
        id: &ResourceId,
    ) -> Result<usize, StoreError> {
        let tx = self
            .conn
            .transaction_with_behavior(TransactionBehavior::Immediate)?;
        let removed = delete_artifacts_tx(&tx, operation, None, id)?;
        tx.commit()?;
        Ok(removed)
    }

    /// Search artifacts of `spec_id` indexed under every one of `terms`.
    pub(crate) fn artifacts_with_terms(
        &self,
        spec_id: &str,
        terms: &[String],
        limit: usize,
    ) -> Result<Vec<StoredArtifact>, StoreError> {
        let mut matches: Option<BTreeSet<ResourceId>> = None;
        let mut stmt = self
            .conn
            .prepare("SELECT r, c FROM search_terms WHERE spec_id=?1 AND term=?2")?;
        for term in terms {
            let rows = stmt.query_map(params![spec_id, term], |row| {
                Ok(ResourceId::new(row.get::<_, String>(0)?, row.get::<_, String>(1)?))
            })?;
            let found = rows.collect::<Result<BTreeSet<_>, _>>()?;
            matches = Some(match matches {
                Some(previous) => previous.intersection(&found).cloned().collect(),
                None => found,
            });
        }

        let mut out = Vec::new();
        for id in matches.unwrap_or_default() {
            if limit > 0 && out.len() >= limit {
                break;
            }
            if let Some(artifact) = self.artifact(OperationType::Search, spec_id, &id)? {
                out.push(artifact);
            }
        }
        Ok(out)
    }
}

fn stored_artifact_from_row(row: &rusqlite::Row<'_>) -> Result<StoredArtifact, StoreError> {
    let doc_json: String = row.get(3)?;
    Ok(StoredArtifact {
        spec_id: row.get(0)?,
        id: ResourceId::new(row.get::<_, String>(1)?, row.get::<_, String>(2)?),
        document: serde_json::from_str(&doc_json)?,
        created_at_ms: row.get(4)?,
    })
}

fn stamps_tx(
    conn: &Connection,
    operation: OperationType,
    spec_id: &str,
    id: Option<&ResourceId>,
    context: Option<&str>,
    out: &mut Stamps,
) -> Result<(), StoreError> {
    let mut stmt = conn.prepare(
        "SELECT r, c, doc_json, created_at_ms FROM artifacts \
         WHERE kind=?1 AND spec_id=?2 AND (?3 IS NULL OR r=?3) AND (?4 IS NULL OR c=?4)",
    )?;
    let c = id.map(|id| id.c.as_str()).or(context);
    let rows = stmt.query_map(
        params![operation.as_str(), spec_id, id.map(|id| id.r.as_str()), c],
        |row| {
            Ok((
                ResourceId::new(row.get::<_, String>(0)?, row.get::<_, String>(1)?),
                row.get::<_, String>(2)?,
                row.get::<_, i64>(3)?,
            ))
        },
    )?;
    for row in rows {
        let (id, doc_json, created_at_ms) = row?;
        out.insert((spec_id.to_string(), id), (doc_json, created_at_ms));
    }
    Ok(())
}

fn insert_artifact_tx(
    conn: &Connection,
    artifact: &Artifact,
    now_ms: i64,
    previous: &Stamps,
) -> Result<(), StoreError> {
    let kind = artifact.operation.as_str();
    let doc_json = serde_json::to_string(&artifact.document)?;
    let created_at_ms = match previous.get(&(artifact.spec_id.clone(), artifact.id.clone())) {
        Some((old_json, stamp)) if *old_json == doc_json => *stamp,
        _ => now_ms,
    };
    conn.execute(
        "INSERT OR REPLACE INTO artifacts(kind, spec_id, r, c, doc_json, created_at_ms) \
         VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
        params![kind, artifact.spec_id, artifact.id.r, artifact.id.c, doc_json, created_at_ms],
    )?;
    for dep in &artifact.impacts {
        conn.execute(
            "INSERT OR IGNORE INTO artifact_impacts(kind, spec_id, r, c, dep_r, dep_c) \
             VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
            params![kind, artifact.spec_id, artifact.id.r, artifact.id.c, dep.r, dep.c],
        )?;
    }
    if artifact.operation == OperationType::Search {
        for term in &artifact.search_terms {
            conn.execute(
                "INSERT OR IGNORE INTO search_terms(spec_id, r, c, term) VALUES (?1, ?2, ?3, ?4)",
                params![artifact.spec_id, artifact.id.r, artifact.id.c, term],
            )?;
        }
    }
    Ok(())
}

fn delete_artifacts_tx(
    conn: &Connection,
    operation: OperationType,
    spec_id: Option<&str>,
    id: &ResourceId,
) -> Result<usize, StoreError> {
    let kind = operation.as_str();
    conn.execute(
        "DELETE FROM artifact_impacts WHERE kind=?1 AND (?2 IS NULL OR spec_id=?2) AND r=?3 AND c=?4",
        params![kind, spec_id, id.r, id.c],
    )?;
    if operation == OperationType::Search {
        conn.execute(
            "DELETE FROM search_terms WHERE (?1 IS NULL OR spec_id=?1) AND r=?2 AND c=?3",
            params![spec_id, id.r, id.c],
        )?;
    }
    let removed = conn.execute(
        "DELETE FROM artifacts WHERE kind=?1 AND (?2 IS NULL OR spec_id=?2) AND r=?3 AND c=?4",
        params![kind, spec_id, id.r, id.c],
    )?;
    Ok(removed)
}

fn delete_spec_artifacts_tx(
    conn: &Connection,
    operation: OperationType,
    spec_id: &str,
    context: Option<&str>,
) -> Result<usize, StoreError> {
    let kind = operation.as_str();
    conn.execute(
        "DELETE FROM artifact_impacts WHERE kind=?1 AND spec_id=?2 AND (?3 IS NULL OR c=?3)",
        params![kind, spec_id, context],
    )?;
    if operation == OperationType::Search {
        conn.execute(
            "DELETE FROM search_terms WHERE spec_id=?1 AND (?2 IS NULL OR c=?2)",
            params![spec_id, context],
        )?;
    }
    let removed = conn.execute(
        "DELETE FROM artifacts WHERE kind=?1 AND spec_id=?2 AND (?3 IS NULL OR c=?3)",
        params![kind, spec_id, context],
    )?;
    Ok(removed)
}
