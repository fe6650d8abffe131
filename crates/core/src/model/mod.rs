#![forbid(unsafe_code)]

mod changeset;
mod subject;


pub use changeset::{ChangeSet, ChangeSetBuilder, ChangedSubjects, Statement};
pub use subject::{ImpactedSubject, OperationType, UnknownOperation};

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

pub const RDF_TYPE: &str = "rdf:type";

/// An RDF object: either a resource reference or a plain literal.
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum Term {
    #[serde(rename = "u")]
    Uri(String),
    #[serde(rename = "l")]
    Literal(String),
}

impl Term {
    pub fn uri(value: impl Into<String>) -> Self {
        Self::Uri(value.into())
    }

    pub fn literal(value: impl Into<String>) -> Self {
        Self::Literal(value.into())
    }

    pub fn value(&self) -> &str {
        match self {
            Self::Uri(value) | Self::Literal(value) => value,
        }
    }

    pub fn as_uri(&self) -> Option<&str> {
        match self {
            Self::Uri(value) => Some(value),
            Self::Literal(_) => None,
        }
    }
}

/// Identifies one resource-centric document: resource `r` in context `c`.
#[derive(Clone, Debug, Default, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ResourceId {
    pub r: String,
    pub c: String,
}

impl ResourceId {
    pub fn new(r: impl Into<String>, c: impl Into<String>) -> Self {
        Self {
            r: r.into(),
            c: c.into(),
        }
    }
}

impl std::fmt::Display for ResourceId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "<{}> in <{}>", self.r, self.c)
    }
}

/// All statements about one resource in one context, keyed by predicate.
///
/// Objects under a predicate keep insertion order and never repeat.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResourceDoc {
    #[serde(rename = "_id")]
    pub id: ResourceId,
    #[serde(flatten)]
    pub properties: BTreeMap<String, Vec<Term>>,
}

impl ResourceDoc {
    pub fn new(id: ResourceId) -> Self {
        Self {
            id,
            properties: BTreeMap::new(),
        }
    }

    pub fn objects(&self, predicate: &str) -> &[Term] {
        self.properties
            .get(predicate)
            .map(Vec::as_slice)
            .unwrap_or(&[])
    }

    pub fn add(&mut self, predicate: impl Into<String>, object: Term) -> bool {
        let objects = self.properties.entry(predicate.into()).or_default();
        if objects.contains(&object) {
            return false;
        }
        objects.push(object);
        true
    }

    pub fn remove(&mut self, predicate: &str, object: &Term) -> bool {
        let Some(objects) = self.properties.get_mut(predicate) else {
            return false;
        };
        let before = objects.len();
        objects.retain(|existing| existing != object);
        let removed = objects.len() != before;
        if objects.is_empty() {
            self.properties.remove(predicate);
        }
        removed
    }

    pub fn types(&self) -> impl Iterator<Item = &str> {
        self.objects(RDF_TYPE).iter().filter_map(Term::as_uri)
    }

    pub fn has_any_type(&self, types: &[String]) -> bool {
        self.types().any(|t| types.iter().any(|wanted| wanted == t))
    }

    pub fn is_empty(&self) -> bool {
        self.properties.is_empty()
    }
}
