#![forbid(unsafe_code)]

use crate::store::{GraphReader, StoreError};
use pr_core::config::{FieldSpec, JoinSpec};
use pr_core::{Namespaces, ResourceDoc, ResourceId, Term};
use serde_json::{Map as JsonMap, Value as JsonValue};
use std::collections::{BTreeMap, BTreeSet};

/// Values gathered per field name, in the order they were read, without
/// repeats.
#[derive(Debug, Default)]
pub(super) struct FieldValues(BTreeMap<String, Vec<String>>);

impl FieldValues {
    pub(super) fn read(&mut self, fields: &[FieldSpec], doc: &ResourceDoc, ns: &Namespaces) {
        for field in fields {
            if field.is_link() {
                self.push(&field.field_name, ns.expand(&doc.id.r));
            }
            for predicate in &field.predicates {
                for object in doc.objects(predicate) {
                    self.push(&field.field_name, object.value().to_string());
                }
            }
        }
    }

    fn push(&mut self, field_name: &str, value: String) {
        let values = self.0.entry(field_name.to_string()).or_default();
        if !values.contains(&value) {
            values.push(value);
        }
    }

    pub(super) fn values(&self) -> impl Iterator<Item = &str> {
        self.0.values().flatten().map(String::as_str)
    }

    /// One value becomes a scalar, several an array. Fields that found
    /// nothing are left out.
    pub(super) fn into_object(self) -> JsonMap<String, JsonValue> {
        let mut out = JsonMap::new();
        for (name, mut values) in self.0 {
            let value = match values.len() {
                0 => continue,
                1 => JsonValue::String(values.remove(0)),
                _ => JsonValue::Array(values.into_iter().map(JsonValue::String).collect()),
            };
            out.insert(name, value);
        }
        out
    }
}

/// Follows `joins` from `doc`, calling `visit` with each joined document and
/// the join that reached it. Every target is recorded in `impacts`, found or
/// not, so that its later creation still reaches the root. A target already
/// on the current path is not entered again.
pub(super) fn walk_joins<'j>(
    reader: &GraphReader<'_>,
    joins: &'j BTreeMap<String, JoinSpec>,
    doc: &ResourceDoc,
    impacts: &mut BTreeSet<ResourceId>,
    path: &mut Vec<ResourceId>,
    visit: &mut dyn FnMut(&'j JoinSpec, &ResourceDoc),
) -> Result<(), StoreError> {
    for (predicate, join) in joins {
        for target in doc.objects(predicate).iter().filter_map(Term::as_uri) {
            let target_id = ResourceId::new(target, doc.id.c.clone());
            impacts.insert(target_id.clone());
            if path.contains(&target_id) {
                continue;
            }
            let Some(joined) = reader.describe(&target_id)? else {
                continue;
            };
            visit(join, &joined);
            path.push(target_id);
            walk_joins(reader, &join.joins, &joined, impacts, path, visit)?;
            path.pop();
        }
    }
    Ok(())
}

/// Lowercase alphanumeric words of `values`, first occurrence order.
pub(super) fn search_terms<'v>(values: impl IntoIterator<Item = &'v str>) -> Vec<String> {
    let mut seen = BTreeSet::new();
    let mut out = Vec::new();
    for value in values {
        for word in value.split(|ch: char| !ch.is_alphanumeric()) {
            if word.is_empty() {
                continue;
            }
            let word = word.to_lowercase();
            if seen.insert(word.clone()) {
                out.push(word);
            }
        }
    }
    out
}
