#![forbid(unsafe_code)]

use super::fields::{FieldValues, walk_joins};
use super::{Composite, CompositeTarget, artifact_id, discover, rebuild_spec, update_with};
use crate::store::{Artifact, GraphReader, SqliteStore, StoreError, TableQuery, TableRows};
use pr_core::config::TableSpec;
use pr_core::ids::{PodName, StoreName};
use pr_core::{ChangedSubjects, Config, ImpactedSubject, Namespaces, OperationType, ResourceId};
use std::collections::BTreeSet;

/// Flat table rows: `{"_id": {r, c, type}, "value": {field: value}}`.
#[derive(Clone, Debug)]
pub struct Tables<'a> {
    target: CompositeTarget<'a>,
}

impl<'a> Tables<'a> {
    pub fn new(config: &'a Config, store_name: StoreName, pod: PodName) -> Self {
        Self::from_target(CompositeTarget::new(config, store_name, pod))
    }

    pub(super) fn from_target(target: CompositeTarget<'a>) -> Self {
        Self { target }
    }

    fn specs(&self) -> Vec<&'a TableSpec> {
        self.target.own_specs(&self.target.config.table_specifications)
    }

    fn spec(&self, spec_id: &str) -> Result<&'a TableSpec, StoreError> {
        self.specs()
            .into_iter()
            .find(|spec| spec.id == spec_id)
            .ok_or_else(|| StoreError::UnknownSpec {
                operation: OperationType::Tables,
                spec_id: spec_id.to_string(),
            })
    }

    /// Regenerates rows of `spec_id`: for one resource when `resource` is
    /// given (in `context`, or the default context), otherwise for every
    /// resource of the specification's types (in `context`, or in all
    /// contexts). Resource and context may be qnames or full uris.
    pub fn generate_table_rows(
        &self,
        store: &mut SqliteStore,
        spec_id: &str,
        resource: Option<&str>,
        context: Option<&str>,
    ) -> Result<usize, StoreError> {
        let spec = self.spec(spec_id)?;
        let ns = &self.target.config.namespaces;
        let Some(resource) = resource else {
            return rebuild_spec(
                OperationType::Tables,
                &self.target,
                spec,
                store,
                context,
                |reader, spec, id| build_row(reader, ns, spec, id),
            );
        };

        let context = context.unwrap_or(self.target.config.default_context.as_str());
        let id = self.target.normalize_id(resource, context);
        store.replace_artifacts(
            OperationType::Tables,
            self.target.pod.as_str(),
            &id,
            &[spec.id.clone()],
            |reader| Ok(build_row(reader, ns, spec, &id)?.into_iter().collect()),
        )
    }

    /// Regenerates every table whose specification declares `rdf_type`
    /// (qname or full uri).
    pub fn generate_table_rows_for_type(
        &self,
        store: &mut SqliteStore,
        rdf_type: &str,
    ) -> Result<usize, StoreError> {
        let rdf_type = self.target.config.namespaces.normalize(rdf_type);
        let mut written = 0;
        for spec in self.specs() {
            if spec.types.contains(&rdf_type) {
                written += self.generate_table_rows(store, &spec.id, None, None)?;
            }
        }
        if written == 0 {
            tracing::debug!(rdf_type = %rdf_type, "no table rows generated for type");
        }
        Ok(written)
    }

    pub fn get_table_rows(
        &self,
        store: &SqliteStore,
        spec_id: &str,
        query: &TableQuery,
    ) -> Result<TableRows, StoreError> {
        let spec = self.spec(spec_id)?;
        store.table_rows(&spec.id, query)
    }

    /// Removes every table row built for (resource, context).
    pub fn delete_table_rows_for_resource(
        &self,
        store: &mut SqliteStore,
        resource: &str,
        context: Option<&str>,
    ) -> Result<usize, StoreError> {
        let context = context.unwrap_or(self.target.config.default_context.as_str());
        let id = self.target.normalize_id(resource, context);
        store.delete_resource_artifacts(OperationType::Tables, &id)
    }
}

impl Composite for Tables<'_> {
    fn operation_type(&self) -> OperationType {
        OperationType::Tables
    }

    fn impacted_subjects(
        &self,
        store: &SqliteStore,
        changes: &ChangedSubjects,
        context_alias: &str,
        cutoff_ms: Option<i64>,
    ) -> Result<Vec<ImpactedSubject>, StoreError> {
        discover(
            OperationType::Tables,
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
            OperationType::Tables,
            &self.target,
            &self.specs(),
            store,
            subject,
            |reader, spec, id| build_row(reader, ns, spec, id),
        )
    }
}

fn build_row(
    reader: &GraphReader<'_>,
    ns: &Namespaces,
    spec: &TableSpec,
    id: &ResourceId,
) -> Result<Option<Artifact>, StoreError> {
    let Some(doc) = reader.describe(id)? else {
        return Ok(None);
    };
    if !doc.has_any_type(&spec.types) {
        return Ok(None);
    }

    let mut values = FieldValues::default();
    values.read(&spec.fields, &doc, ns);
    let mut impacts = BTreeSet::from([id.clone()]);
    walk_joins(
        reader,
        &spec.joins,
        &doc,
        &mut impacts,
        &mut vec![id.clone()],
        &mut |join, joined| values.read(&join.fields, joined, ns),
    )?;

    let document = serde_json::json!({
        "_id": artifact_id(id, &spec.id),
        "value": values.into_object(),
    });
    Ok(Some(Artifact {
        operation: OperationType::Tables,
        spec_id: spec.id.clone(),
        id: id.clone(),
        document,
        impacts,
        search_terms: Vec::new(),
    }))
}
