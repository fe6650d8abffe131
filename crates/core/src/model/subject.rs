#![forbid(unsafe_code)]

use super::ResourceId;
use crate::ids::{PodName, StoreName};
use serde::{Deserialize, Serialize};
use std::hash::{Hash, Hasher};

/// The three kinds of derived projection.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum OperationType {
    #[serde(rename = "generate_views")]
    Views,
    #[serde(rename = "generate_table_rows")]
    Tables,
    #[serde(rename = "generate_search_index_docs")]
    Search,
}

impl OperationType {
    pub const ALL: [OperationType; 3] = [Self::Views, Self::Tables, Self::Search];

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Views => "generate_views",
            Self::Tables => "generate_table_rows",
            Self::Search => "generate_search_index_docs",
        }
    }
}

impl std::fmt::Display for OperationType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Clone, Debug, PartialEq, Eq, thiserror::Error)]
#[error("unknown operation type: {0}")]
pub struct UnknownOperation(pub String);

impl std::str::FromStr for OperationType {
    type Err = UnknownOperation;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim() {
            "generate_views" | "views" => Ok(Self::Views),
            "generate_table_rows" | "tables" => Ok(Self::Tables),
            "generate_search_index_docs" | "search" => Ok(Self::Search),
            other => Err(UnknownOperation(other.to_string())),
        }
    }
}

/// One unit of regeneration work: a resource in a context, for one operation,
/// optionally narrowed to specific specification ids.
///
/// Equality covers resource, operation and specification ids; the owning
/// store/pod and the deletion flag are carried along but do not distinguish
/// subjects.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ImpactedSubject {
    pub resource_id: ResourceId,
    pub operation: OperationType,
    pub store_name: StoreName,
    pub pod_name: PodName,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    spec_types: Vec<String>,
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub delete: bool,
}

impl ImpactedSubject {
    pub fn new(
        resource_id: ResourceId,
        operation: OperationType,
        store_name: StoreName,
        pod_name: PodName,
    ) -> Self {
        Self {
            resource_id,
            operation,
            store_name,
            pod_name,
            spec_types: Vec::new(),
            delete: false,
        }
    }

    pub fn with_spec_types<I, S>(mut self, spec_types: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.spec_types
            .extend(spec_types.into_iter().map(Into::into));
        self.spec_types.sort();
        self.spec_types.dedup();
        self
    }

    pub fn deleted(mut self) -> Self {
        self.delete = true;
        self
    }

    /// Specification ids this subject is narrowed to. Empty means all.
    pub fn spec_types(&self) -> &[String] {
        &self.spec_types
    }

    pub fn to_json(&self) -> Result<serde_json::Value, serde_json::Error> {
        serde_json::to_value(self)
    }

    pub fn from_json(value: serde_json::Value) -> Result<Self, serde_json::Error> {
        let mut subject: Self = serde_json::from_value(value)?;
        subject.spec_types.sort();
        subject.spec_types.dedup();
        Ok(subject)
    }
}

impl PartialEq for ImpactedSubject {
    fn eq(&self, other: &Self) -> bool {
        self.resource_id == other.resource_id
            && self.operation == other.operation
            && self.spec_types == other.spec_types
    }
}

impl Eq for ImpactedSubject {}

impl Hash for ImpactedSubject {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.resource_id.hash(state);
        self.operation.hash(state);
        self.spec_types.hash(state);
    }
}
