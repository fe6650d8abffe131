#![forbid(unsafe_code)]

use super::fields::walk_joins;
use super::{Composite, CompositeTarget, artifact_id, discover, rebuild_spec, update_with};
use crate::store::{Artifact, GraphReader, SqliteStore, StoreError};
use pr_core::config::ViewSpec;
use pr_core::ids::{PodName, StoreName};
use pr_core::{
    ChangedSubjects, Config, ImpactedSubject, OperationType, RDF_TYPE, ResourceDoc, ResourceId,
};
use std::collections::BTreeSet;

/// View documents: the root resource's graph followed by the graphs of the
/// resources reached through the specification's joins.
#[derive(Clone, Debug)]
pub struct Views<'a> {
    target: CompositeTarget<'a>,
}

impl<'a> Views<'a> {
    pub fn new(config: &'a Config, store_name: StoreName, pod: PodName) -> Self {
        Self::from_target(CompositeTarget::new(config, store_name, pod))
    }

    pub(super) fn from_target(target: CompositeTarget<'a>) -> Self {
        Self { target }
    }

    fn specs(&self) -> Vec<&'a ViewSpec> {
        self.target.own_specs(&self.target.config.view_specifications)
    }

    fn spec(&self, spec_id: &str) -> Result<&'a ViewSpec, StoreError> {
        self.specs()
            .into_iter()
            .find(|spec| spec.id == spec_id)
            .ok_or_else(|| StoreError::UnknownSpec {
                operation: OperationType::Views,
                spec_id: spec_id.to_string(),
            })
    }

    /// Rebuilds every view of `spec_id`, optionally in one context only.
    pub fn generate_views(
        &self,
        store: &mut SqliteStore,
        spec_id: &str,
        context: Option<&str>,
    ) -> Result<usize, StoreError> {
        let spec = self.spec(spec_id)?;
        rebuild_spec(OperationType::Views, &self.target, spec, store, context, build_view)
    }

    pub fn get_view(
        &self,
        store: &SqliteStore,
        spec_id: &str,
        resource: &str,
        context: Option<&str>,
    ) -> Result<Option<serde_json::Value>, StoreError> {
        let spec = self.spec(spec_id)?;
        let context = context.unwrap_or(self.target.config.default_context.as_str());
        let id = self.target.normalize_id(resource, context);
        Ok(store
            .artifact(OperationType::Views, &spec.id, &id)?
            .map(|artifact| artifact.document))
    }
}

impl Composite for Views<'_> {
    fn operation_type(&self) -> OperationType {
        OperationType::Views
    }

    fn impacted_subjects(
        &self,
        store: &SqliteStore,
        changes: &ChangedSubjects,
        context_alias: &str,
        cutoff_ms: Option<i64>,
    ) -> Result<Vec<ImpactedSubject>, StoreError> {
        discover(
            OperationType::Views,
            &self.target,
            &self.specs(),
            store,
            changes,
            context_alias,
            cutoff_ms,
        )
    }

    fn update(&self, store: &mut SqliteStore, subject: &ImpactedSubject) -> Result<(), StoreError> {
        update_with(
            OperationType::Views,
            &self.target,
            &self.specs(),
            store,
            subject,
            build_view,
        )
    }
}

/// Keeps `include` predicates (and rdf:type) only; `None` keeps everything.
fn restrict(doc: &ResourceDoc, include: Option<&[String]>) -> ResourceDoc {
    let Some(include) = include else {
        return doc.clone();
    };
    let mut out = ResourceDoc::new(doc.id.clone());
    for (predicate, objects) in &doc.properties {
        if predicate == RDF_TYPE || include.contains(predicate) {
            out.properties.insert(predicate.clone(), objects.clone());
        }
    }
    out
}

fn build_view(
    reader: &GraphReader<'_>,
    spec: &ViewSpec,
    id: &ResourceId,
) -> Result<Option<Artifact>, StoreError> {
    let Some(doc) = reader.describe(id)? else {
        return Ok(None);
    };
    if !doc.has_any_type(&spec.types) {
        return Ok(None);
    }

    let mut graphs = vec![restrict(&doc, spec.include.as_deref())];
    let mut impacts = BTreeSet::from([id.clone()]);
    walk_joins(
        reader,
        &spec.joins,
        &doc,
        &mut impacts,
        &mut vec![id.clone()],
        &mut |join, joined| graphs.push(restrict(joined, join.include.as_deref())),
    )?;

    let document = serde_json::json!({
        "_id": artifact_id(id, &spec.id),
        "value": {"_graphs": serde_json::to_value(&graphs)?},
    });
    Ok(Some(Artifact {
        operation: OperationType::Views,
        spec_id: spec.id.clone(),
        id: id.clone(),
        document,
        impacts,
        search_terms: Vec::new(),
    }))
}
