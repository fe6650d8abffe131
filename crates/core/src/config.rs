#![forbid(unsafe_code)]

//! Projection specifications and the process-wide configuration object.
//!
//! A [`Config`] is built once (usually from JSON) and handed by reference to
//! every stage. Loading normalises every predicate and rdf:type to its qname
//! form so comparisons against stored documents are plain string equality.

use crate::model::RDF_TYPE;
use serde::{Deserialize, Deserializer, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::path::Path;

/// Field value marker that emits the resource's own uri.
pub const LINK_VALUE: &str = "_link_";

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("io: {0}")]
    Io(#[from] std::io::Error),
    #[error("config json: {0}")]
    Json(#[from] serde_json::Error),
    #[error("invalid config: {0}")]
    Invalid(String),
}

/// Prefix → base uri mapping used to move between qnames and full uris.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Namespaces(BTreeMap<String, String>);

impl Namespaces {
    pub fn new<I, P, B>(entries: I) -> Self
    where
        I: IntoIterator<Item = (P, B)>,
        P: Into<String>,
        B: Into<String>,
    {
        Self(
            entries
                .into_iter()
                .map(|(prefix, base)| (prefix.into(), base.into()))
                .collect(),
        )
    }

    /// Shortens a full uri using the longest matching base. Values that no
    /// namespace covers come back unchanged.
    pub fn qname(&self, value: &str) -> String {
        let best = self
            .0
            .iter()
            .filter(|(_, base)| value.len() > base.len() && value.starts_with(base.as_str()))
            .max_by_key(|(_, base)| base.len());
        match best {
            Some((prefix, base)) => format!("{prefix}:{}", &value[base.len()..]),
            None => value.to_string(),
        }
    }

    /// Expands `prefix:local` when the prefix is known.
    pub fn expand(&self, value: &str) -> String {
        let Some((prefix, local)) = value.split_once(':') else {
            return value.to_string();
        };
        if local.starts_with("//") {
            return value.to_string();
        }
        match self.0.get(prefix) {
            Some(base) => format!("{base}{local}"),
            None => value.to_string(),
        }
    }

    pub fn normalize(&self, value: &str) -> String {
        self.qname(&self.expand(value))
    }
}

/// Which predicates a specification reads at some level of its graph walk.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum PredicateScope {
    All,
    Only(BTreeSet<String>),
}

impl Default for PredicateScope {
    fn default() -> Self {
        Self::Only(BTreeSet::new())
    }
}

impl PredicateScope {
    fn extend<'a>(&mut self, predicates: impl IntoIterator<Item = &'a String>) {
        if let Self::Only(set) = self {
            set.extend(predicates.into_iter().cloned());
        }
    }

    fn widen(&mut self) {
        *self = Self::All;
    }

    /// Whether a change to `changed` can affect anything in this scope. An
    /// empty change set stands for every predicate.
    pub fn touches(&self, changed: &BTreeSet<String>) -> bool {
        match self {
            Self::All => true,
            Self::Only(_) if changed.is_empty() => true,
            Self::Only(set) => changed.iter().any(|p| set.contains(p)),
        }
    }

    pub fn is_empty(&self) -> bool {
        matches!(self, Self::Only(set) if set.is_empty())
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FieldSpec {
    pub field_name: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub predicates: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub value: Option<String>,
}

impl FieldSpec {
    pub fn is_link(&self) -> bool {
        self.value.as_deref() == Some(LINK_VALUE)
    }
}

/// Follow `predicate` from the current resource and read the target with
/// this nested spec. Tables and search read `fields`/`indices`; views read
/// `include`.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct JoinSpec {
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub fields: Vec<FieldSpec>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub indices: Vec<FieldSpec>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub include: Option<Vec<String>>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub joins: BTreeMap<String, JoinSpec>,
}

impl JoinSpec {
    fn collect_scope(&self, scope: &mut PredicateScope, reads_include: bool) {
        scope.extend(self.fields.iter().flat_map(|f| f.predicates.iter()));
        scope.extend(self.indices.iter().flat_map(|f| f.predicates.iter()));
        scope.extend(self.joins.keys());
        if reads_include {
            match &self.include {
                Some(include) => scope.extend(include.iter()),
                None => scope.widen(),
            }
        }
        for nested in self.joins.values() {
            nested.collect_scope(scope, reads_include);
        }
    }

    fn normalize(&mut self, ns: &Namespaces) {
        normalize_fields(&mut self.fields, ns);
        normalize_fields(&mut self.indices, ns);
        if let Some(include) = self.include.as_mut() {
            normalize_list(include, ns);
        }
        normalize_joins(&mut self.joins, ns);
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct TableSpec {
    #[serde(rename = "_id")]
    pub id: String,
    #[serde(rename = "type", deserialize_with = "one_or_many")]
    pub types: Vec<String>,
    pub from: String,
    #[serde(default)]
    pub fields: Vec<FieldSpec>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub joins: BTreeMap<String, JoinSpec>,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ViewSpec {
    #[serde(rename = "_id")]
    pub id: String,
    #[serde(rename = "type", deserialize_with = "one_or_many")]
    pub types: Vec<String>,
    pub from: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub include: Option<Vec<String>>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub joins: BTreeMap<String, JoinSpec>,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct SearchSpec {
    #[serde(rename = "_id")]
    pub id: String,
    #[serde(rename = "type", deserialize_with = "one_or_many")]
    pub types: Vec<String>,
    pub from: String,
    #[serde(default)]
    pub fields: Vec<FieldSpec>,
    #[serde(default)]
    pub indices: Vec<FieldSpec>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub joins: BTreeMap<String, JoinSpec>,
}

/// What every specification kind exposes to discovery.
pub trait Specification {
    fn id(&self) -> &str;
    fn types(&self) -> &[String];
    fn pod(&self) -> &str;
    /// Predicates read from the root resource. Always includes rdf:type,
    /// since a type change can add or remove the artifact.
    fn root_scope(&self) -> PredicateScope;
    /// Predicates read from joined resources.
    fn dependency_scope(&self) -> PredicateScope;
}

fn root_scope_with(
    fields: &[&FieldSpec],
    joins: &BTreeMap<String, JoinSpec>,
) -> PredicateScope {
    let mut scope = PredicateScope::default();
    scope.extend(fields.iter().flat_map(|f| f.predicates.iter()));
    scope.extend(joins.keys());
    let rdf_type = RDF_TYPE.to_string();
    scope.extend([&rdf_type]);
    scope
}

fn dependency_scope_with(joins: &BTreeMap<String, JoinSpec>, reads_include: bool) -> PredicateScope {
    let mut scope = PredicateScope::default();
    for join in joins.values() {
        join.collect_scope(&mut scope, reads_include);
    }
    scope
}

impl Specification for TableSpec {
    fn id(&self) -> &str {
        &self.id
    }

    fn types(&self) -> &[String] {
        &self.types
    }

    fn pod(&self) -> &str {
        &self.from
    }

    fn root_scope(&self) -> PredicateScope {
        root_scope_with(&self.fields.iter().collect::<Vec<_>>(), &self.joins)
    }

    fn dependency_scope(&self) -> PredicateScope {
        dependency_scope_with(&self.joins, false)
    }
}

impl Specification for ViewSpec {
    fn id(&self) -> &str {
        &self.id
    }

    fn types(&self) -> &[String] {
        &self.types
    }

    fn pod(&self) -> &str {
        &self.from
    }

    fn root_scope(&self) -> PredicateScope {
        let Some(include) = &self.include else {
            return PredicateScope::All;
        };
        let mut scope = root_scope_with(&[], &self.joins);
        scope.extend(include.iter());
        scope
    }

    fn dependency_scope(&self) -> PredicateScope {
        dependency_scope_with(&self.joins, true)
    }
}

impl Specification for SearchSpec {
    fn id(&self) -> &str {
        &self.id
    }

    fn types(&self) -> &[String] {
        &self.types
    }

    fn pod(&self) -> &str {
        &self.from
    }

    fn root_scope(&self) -> PredicateScope {
        let fields: Vec<&FieldSpec> = self.fields.iter().chain(self.indices.iter()).collect();
        root_scope_with(&fields, &self.joins)
    }

    fn dependency_scope(&self) -> PredicateScope {
        dependency_scope_with(&self.joins, false)
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct QueueNames {
    #[serde(default = "default_discover_queue")]
    pub discover: String,
    #[serde(default = "default_apply_queue")]
    pub apply: String,
}

impl Default for QueueNames {
    fn default() -> Self {
        Self {
            discover: default_discover_queue(),
            apply: default_apply_queue(),
        }
    }
}

fn default_discover_queue() -> String {
    "discover".to_string()
}

fn default_apply_queue() -> String {
    "apply".to_string()
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Config {
    #[serde(default)]
    pub namespaces: Namespaces,
    pub default_context: String,
    #[serde(default)]
    pub table_specifications: Vec<TableSpec>,
    #[serde(default)]
    pub view_specifications: Vec<ViewSpec>,
    #[serde(default)]
    pub search_specifications: Vec<SearchSpec>,
    #[serde(default)]
    pub queues: QueueNames,
}

impl Config {
    pub fn from_json_str(raw: &str) -> Result<Self, ConfigError> {
        let mut config: Self = serde_json::from_str(raw)?;
        config.normalize();
        config.validate()?;
        Ok(config)
    }

    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let raw = std::fs::read_to_string(path)?;
        Self::from_json_str(&raw)
    }

    /// Canonical serialized form; equal configs produce equal strings.
    pub fn to_json_string(&self) -> Result<String, ConfigError> {
        Ok(serde_json::to_string(self)?)
    }

    fn normalize(&mut self) {
        let ns = self.namespaces.clone();
        self.default_context = ns.normalize(&self.default_context);
        for spec in &mut self.table_specifications {
            normalize_list(&mut spec.types, &ns);
            normalize_fields(&mut spec.fields, &ns);
            normalize_joins(&mut spec.joins, &ns);
        }
        for spec in &mut self.view_specifications {
            normalize_list(&mut spec.types, &ns);
            if let Some(include) = spec.include.as_mut() {
                normalize_list(include, &ns);
            }
            normalize_joins(&mut spec.joins, &ns);
        }
        for spec in &mut self.search_specifications {
            normalize_list(&mut spec.types, &ns);
            normalize_fields(&mut spec.fields, &ns);
            normalize_fields(&mut spec.indices, &ns);
            normalize_joins(&mut spec.joins, &ns);
        }
    }

    fn validate(&self) -> Result<(), ConfigError> {
        if self.default_context.trim().is_empty() {
            return Err(ConfigError::Invalid(
                "defaultContext must not be empty".to_string(),
            ));
        }
        validate_specs(
            "table",
            self.table_specifications
                .iter()
                .map(|s| (s.id(), s.pod(), s.fields.as_slice())),
        )?;
        validate_specs(
            "view",
            self.view_specifications
                .iter()
                .map(|s| (s.id(), s.pod(), &[][..])),
        )?;
        validate_specs(
            "search",
            self.search_specifications
                .iter()
                .map(|s| (s.id(), s.pod(), s.fields.as_slice())),
        )?;
        for spec in &self.search_specifications {
            if spec.indices.iter().any(|f| f.field_name.trim().is_empty()) {
                return Err(ConfigError::Invalid(format!(
                    "search spec {} has an index without fieldName",
                    spec.id
                )));
            }
        }
        Ok(())
    }
}

fn validate_specs<'a>(
    kind: &str,
    specs: impl Iterator<Item = (&'a str, &'a str, &'a [FieldSpec])>,
) -> Result<(), ConfigError> {
    let mut seen = BTreeSet::new();
    for (id, from, fields) in specs {
        if id.trim().is_empty() {
            return Err(ConfigError::Invalid(format!("{kind} spec without _id")));
        }
        if !seen.insert(id) {
            return Err(ConfigError::Invalid(format!(
                "duplicate {kind} spec id: {id}"
            )));
        }
        if from.trim().is_empty() {
            return Err(ConfigError::Invalid(format!(
                "{kind} spec {id} has no `from` pod"
            )));
        }
        if fields.iter().any(|f| f.field_name.trim().is_empty()) {
            return Err(ConfigError::Invalid(format!(
                "{kind} spec {id} has a field without fieldName"
            )));
        }
    }
    Ok(())
}

fn normalize_list(values: &mut [String], ns: &Namespaces) {
    for value in values.iter_mut() {
        *value = ns.normalize(value);
    }
}

fn normalize_fields(fields: &mut [FieldSpec], ns: &Namespaces) {
    for field in fields.iter_mut() {
        normalize_list(&mut field.predicates, ns);
    }
}

fn normalize_joins(joins: &mut BTreeMap<String, JoinSpec>, ns: &Namespaces) {
    let taken = std::mem::take(joins);
    for (predicate, mut join) in taken {
        join.normalize(ns);
        joins.insert(ns.normalize(&predicate), join);
    }
}

fn one_or_many<'de, D>(deserializer: D) -> Result<Vec<String>, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum OneOrMany {
        One(String),
        Many(Vec<String>),
    }

    Ok(match OneOrMany::deserialize(deserializer)? {
        OneOrMany::One(value) => vec![value],
        OneOrMany::Many(values) => values,
    })
}
