#![forbid(unsafe_code)]

//! Derived projections over resource documents.
//!
//! Each composite answers two questions for one [`OperationType`]: which
//! artifacts does a change make stale ([`Composite::impacted_subjects`]), and
//! how is one subject's artifact rebuilt ([`Composite::update`]). Discovery
//! only reads; update always deletes before rebuilding, so repeating it is
//! harmless.

mod fields;
mod search;
mod tables;
mod views;

pub use search::SearchIndexer;
pub use tables::Tables;
pub use views::Views;

use crate::store::{Artifact, GraphReader, SqliteStore, StoreError};
use pr_core::ids::{PodName, StoreName};
use pr_core::{ChangedSubjects, Config, ImpactedSubject, OperationType, ResourceId, Specification};
use std::collections::{BTreeMap, BTreeSet};

pub trait Composite {
    fn operation_type(&self) -> OperationType;

    /// Subjects whose artifacts `changes` may have made stale, for resources
    /// in `context_alias`. With `cutoff_ms`, only artifacts created at or
    /// before that time count as existing.
    fn impacted_subjects(
        &self,
        store: &SqliteStore,
        changes: &ChangedSubjects,
        context_alias: &str,
        cutoff_ms: Option<i64>,
    ) -> Result<Vec<ImpactedSubject>, StoreError>;

    /// Deletes, then rebuilds from the current graph, the artifacts of one
    /// subject. A subject flagged for deletion is only deleted. Rows whose
    /// document comes out unchanged keep their `created_at_ms`.
    fn update(&self, store: &mut SqliteStore, subject: &ImpactedSubject) -> Result<(), StoreError>;
}

/// Configuration and pod a composite projects from.
#[derive(Clone, Debug)]
pub struct CompositeTarget<'a> {
    pub config: &'a Config,
    pub store_name: StoreName,
    pub pod: PodName,
}

impl<'a> CompositeTarget<'a> {
    pub fn new(config: &'a Config, store_name: StoreName, pod: PodName) -> Self {
        Self {
            config,
            store_name,
            pod,
        }
    }

    fn normalize_id(&self, r: &str, c: &str) -> ResourceId {
        let ns = &self.config.namespaces;
        ResourceId::new(ns.normalize(r), ns.normalize(c))
    }

    fn own_specs<'s, S: Specification>(&self, specs: &'s [S]) -> Vec<&'s S> {
        specs
            .iter()
            .filter(|spec| spec.pod() == self.pod.as_str())
            .collect()
    }
}

/// Closed dispatch over the three composite kinds.
#[derive(Clone, Debug)]
pub enum AnyComposite<'a> {
    Tables(Tables<'a>),
    Views(Views<'a>),
    Search(SearchIndexer<'a>),
}

impl<'a> AnyComposite<'a> {
    pub fn for_operation(
        operation: OperationType,
        config: &'a Config,
        store_name: StoreName,
        pod: PodName,
    ) -> Self {
        let target = CompositeTarget::new(config, store_name, pod);
        match operation {
            OperationType::Tables => Self::Tables(Tables::from_target(target)),
            OperationType::Views => Self::Views(Views::from_target(target)),
            OperationType::Search => Self::Search(SearchIndexer::from_target(target)),
        }
    }

    fn inner(&self) -> &dyn Composite {
        match self {
            Self::Tables(tables) => tables,
            Self::Views(views) => views,
            Self::Search(search) => search,
        }
    }
}

impl Composite for AnyComposite<'_> {
    fn operation_type(&self) -> OperationType {
        self.inner().operation_type()
    }

    fn impacted_subjects(
        &self,
        store: &SqliteStore,
        changes: &ChangedSubjects,
        context_alias: &str,
        cutoff_ms: Option<i64>,
    ) -> Result<Vec<ImpactedSubject>, StoreError> {
        self.inner()
            .impacted_subjects(store, changes, context_alias, cutoff_ms)
    }

    fn update(&self, store: &mut SqliteStore, subject: &ImpactedSubject) -> Result<(), StoreError> {
        self.inner().update(store, subject)
    }
}

/// Discovery shared by every composite.
///
/// A changed subject is impacted directly when a specification's root scope
/// covers one of its changed predicates and it either has a matching rdf:type
/// now or already has an artifact (a type removal must still clear it). It
/// is flagged for deletion when its document is gone. Artifacts whose impact
/// index mentions the subject are impacted when the dependency scope covers
/// the change.
fn discover<S: Specification>(
    operation: OperationType,
    target: &CompositeTarget<'_>,
    specs: &[&S],
    store: &SqliteStore,
    changes: &ChangedSubjects,
    context_alias: &str,
    cutoff_ms: Option<i64>,
) -> Result<Vec<ImpactedSubject>, StoreError> {
    if specs.is_empty() || changes.is_empty() {
        return Ok(Vec::new());
    }
    let ns = &target.config.namespaces;
    let context = ns.normalize(context_alias);
    let scopes: Vec<_> = specs
        .iter()
        .map(|spec| (*spec, spec.root_scope(), spec.dependency_scope()))
        .collect();

    let mut found: BTreeMap<ResourceId, (BTreeSet<String>, bool)> = BTreeMap::new();
    for (subject, predicates) in changes.iter() {
        let predicates: BTreeSet<String> = predicates.iter().map(|p| ns.normalize(p)).collect();
        let id = ResourceId::new(ns.normalize(subject), context.clone());

        let direct: Vec<&S> = scopes
            .iter()
            .filter(|(_, root, _)| root.touches(&predicates))
            .map(|(spec, _, _)| *spec)
            .collect();
        if !direct.is_empty() {
            let doc = store.describe_resource(&target.pod, &id.r, &id.c)?;
            for spec in direct {
                let typed = doc.as_ref().is_some_and(|d| d.has_any_type(spec.types()));
                if typed || store.artifact_exists(operation, spec.id(), &id, cutoff_ms)? {
                    let entry = found.entry(id.clone()).or_default();
                    entry.0.insert(spec.id().to_string());
                    entry.1 |= doc.is_none();
                }
            }
        }

        for (spec, _, dependency) in &scopes {
            if dependency.is_empty() || !dependency.touches(&predicates) {
                continue;
            }
            for root in store.dependent_artifacts(operation, spec.id(), &id, cutoff_ms)? {
                if root != id {
                    found.entry(root).or_default().0.insert(spec.id().to_string());
                }
            }
        }
    }

    let subjects: Vec<ImpactedSubject> = found
        .into_iter()
        .map(|(id, (spec_ids, delete))| {
            let subject = ImpactedSubject::new(
                id,
                operation,
                target.store_name.clone(),
                target.pod.clone(),
            )
            .with_spec_types(spec_ids);
            if delete { subject.deleted() } else { subject }
        })
        .collect();
    tracing::debug!(
        operation = %operation,
        store = %target.store_name,
        pod = %target.pod,
        changed = changes.len(),
        impacted = subjects.len(),
        "discovered impacted subjects"
    );
    Ok(subjects)
}

/// Update shared by every composite. `build` produces one artifact for one
/// specification, or `None` when the resource no longer qualifies.
fn update_with<S, F>(
    operation: OperationType,
    target: &CompositeTarget<'_>,
    specs: &[&S],
    store: &mut SqliteStore,
    subject: &ImpactedSubject,
    build: F,
) -> Result<(), StoreError>
where
    S: Specification,
    F: Fn(&GraphReader<'_>, &S, &ResourceId) -> Result<Option<Artifact>, StoreError>,
{
    let id = target.normalize_id(&subject.resource_id.r, &subject.resource_id.c);
    if subject.delete {
        let removed = store.delete_resource_artifacts(operation, &id)?;
        tracing::debug!(operation = %operation, resource = %id, removed, "deleted artifacts");
        return Ok(());
    }

    let selected: Vec<&S> = if subject.spec_types().is_empty() {
        specs.to_vec()
    } else {
        subject
            .spec_types()
            .iter()
            .map(|spec_id| {
                specs
                    .iter()
                    .copied()
                    .find(|spec| spec.id() == spec_id)
                    .ok_or_else(|| StoreError::UnknownSpec {
                        operation,
                        spec_id: spec_id.clone(),
                    })
            })
            .collect::<Result<_, _>>()?
    };
    let spec_ids: Vec<String> = selected.iter().map(|spec| spec.id().to_string()).collect();

    let written = store.replace_artifacts(operation, target.pod.as_str(), &id, &spec_ids, |reader| {
        let mut out = Vec::with_capacity(selected.len());
        for spec in &selected {
            if let Some(artifact) = build(reader, spec, &id)? {
                out.push(artifact);
            }
        }
        Ok(out)
    })?;
    tracing::debug!(
        operation = %operation,
        resource = %id,
        specs = spec_ids.len(),
        written,
        "regenerated artifacts"
    );
    Ok(())
}

/// Rebuilds every artifact of one specification from the resources of its
/// declared types.
fn rebuild_spec<S, F>(
    operation: OperationType,
    target: &CompositeTarget<'_>,
    spec: &S,
    store: &mut SqliteStore,
    context: Option<&str>,
    build: F,
) -> Result<usize, StoreError>
where
    S: Specification,
    F: Fn(&GraphReader<'_>, &S, &ResourceId) -> Result<Option<Artifact>, StoreError>,
{
    let context = context.map(|c| target.config.namespaces.normalize(c));
    let written = store.replace_spec_artifacts(
        operation,
        target.pod.as_str(),
        spec.id(),
        context.as_deref(),
        |reader| {
            let mut seen = BTreeSet::new();
            let mut out = Vec::new();
            for rdf_type in spec.types() {
                for id in reader.resources_of_type(rdf_type, context.as_deref())? {
                    if !seen.insert(id.clone()) {
                        continue;
                    }
                    if let Some(artifact) = build(reader, spec, &id)? {
                        out.push(artifact);
                    }
                }
            }
            Ok(out)
        },
    )?;
    tracing::info!(operation = %operation, spec = spec.id(), written, "rebuilt specification");
    Ok(written)
}

fn artifact_id(id: &ResourceId, spec_id: &str) -> serde_json::Value {
    serde_json::json!({"r": id.r, "c": id.c, "type": spec_id})
}
