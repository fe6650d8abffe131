#![forbid(unsafe_code)]

use super::fields::{FieldValues, search_terms, walk_joins};
use super::{Composite, CompositeTarget, artifact_id, discover, rebuild_spec, update_with};
use crate::store::{Artifact, GraphReader, SqliteStore, StoreError};
use pr_core::config::SearchSpec;
use pr_core::ids::{PodName, StoreName};
use pr_core::{ChangedSubjects, Config, ImpactedSubject, Namespaces, OperationType, ResourceId};
use std::collections::BTreeSet;

/// Search documents: `result` fields for display plus lowercase
/// `search_terms` drawn from the specification's `indices`.
#[derive(Clone, Debug)]
pub struct SearchIndexer<'a> {
    target: CompositeTarget<'a>,
}

impl<'a> SearchIndexer<'a> {
    pub fn new(config: &'a Config, store_name: StoreName, pod: PodName) -> Self {
        Self::from_target(CompositeTarget::new(config, store_name, pod))
    }

    pub(super) fn from_target(target: CompositeTarget<'a>) -> Self {
        Self { target }
    }

    fn specs(&self) -> Vec<&'a SearchSpec> {
        self.target.own_specs(&self.target.config.search_specifications)
    }

    fn spec(&self, spec_id: &str) -> Result<&'a SearchSpec, StoreError> {
        self.specs()
            .into_iter()
            .find(|spec| spec.id == spec_id)
            .ok_or_else(|| StoreError::UnknownSpec {
                operation: OperationType::Search,
                spec_id: spec_id.to_string(),
            })
    }

    pub fn generate_search_index_docs(
        &self,
        store: &mut SqliteStore,
        spec_id: &str,
        context: Option<&str>,
    ) -> Result<usize, StoreError> {
        let spec = self.spec(spec_id)?;
        let ns = &self.target.config.namespaces;
        rebuild_spec(
            OperationType::Search,
            &self.target,
            spec,
            store,
            context,
            |reader, spec, id| build_search_doc(reader, ns, spec, id),
        )
    }

    /// Documents of `spec_id` containing every word of `query`, ordered by
    /// resource. `limit == 0` means no limit.
    pub fn search(
        &self,
        store: &SqliteStore,
        spec_id: &str,
        query: &str,
        limit: usize,
    ) -> Result<Vec<serde_json::Value>, StoreError> {
        let spec = self.spec(spec_id)?;
        let terms = search_terms([query]);
        if terms.is_empty() {
            return Ok(Vec::new());
        }
        Ok(store
            .artifacts_with_terms(&spec.id, &terms, limit)?
            .into_iter()
            .map(|artifact| artifact.document)
            .collect())
    }
}

impl Composite for SearchIndexer<'_> {
    fn operation_type(&self) -> OperationType {
        OperationType::Search
    }

    fn impacted_subjects(
        &self,
        store: &SqliteStore,
        changes: &ChangedSubjects,
        context_alias: &str,
        cutoff_ms: Option<i64>,
    ) -> Result<Vec<ImpactedSubject>, StoreError> {
        discover(
            OperationType::Search,
            &self.target,
            &self.specs(),
            store,
            changes,
            context_alias,
            cutoff_ms,
        )
    }

    fn update(&self, store: &mut SqliteStore, subject: &ImpactedSubject) -> Result<(), StoreError> {
        let ns = &self.target.config.namespaces;
        update_with(
            OperationType::Search,
            &self.target,
            &self.specs(),
            store,
            subject,
            |reader, spec, id| build_search_doc(reader, ns, spec, id),
        )
    }
}

fn build_search_doc(
    reader: &GraphReader<'_>,
    ns: &Namespaces,
    spec: &SearchSpec,
    id: &ResourceId,
) -> Result<Option<Artifact>, StoreError> {
    let Some(doc) = reader.describe(id)? else {
        return Ok(None);
    };
    if !doc.has_any_type(&spec.types) {
        return Ok(None);
    }

    let mut result = FieldValues::default();
    let mut indexed = FieldValues::default();
    result.read(&spec.fields, &doc, ns);
    indexed.read(&spec.indices, &doc, ns);
    let mut impacts = BTreeSet::from([id.clone()]);
    walk_joins(
        reader,
        &spec.joins,
        &doc,
        &mut impacts,
        &mut vec![id.clone()],
        &mut |join, joined| {
            result.read(&join.fields, joined, ns);
            indexed.read(&join.indices, joined, ns);
        },
    )?;

    let terms = search_terms(indexed.values());
    let document = serde_json::json!({
        "_id": artifact_id(id, &spec.id),
        "result": result.into_object(),
        "search_terms": terms,
    });
    Ok(Some(Artifact {
        operation: OperationType::Search,
        spec_id: spec.id.clone(),
        id: id.clone(),
        document,
        impacts,
        search_terms: terms,
    }))
}
