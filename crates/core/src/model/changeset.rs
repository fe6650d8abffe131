#![forbid(unsafe_code)]

use super::Term;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Statement {
    #[serde(rename = "s")]
    pub subject: String,
    #[serde(rename = "p")]
    pub predicate: String,
    #[serde(rename = "o")]
    pub object: Term,
    #[serde(rename = "c")]
    pub context: String,
}

/// Added and removed statements produced by one graph mutation.
///
/// Statements are grouped by subject and keep the order they were recorded in.
/// A `ChangeSet` is immutable once built; use [`ChangeSetBuilder`] to make one.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChangeSet {
    #[serde(default)]
    additions: BTreeMap<String, Vec<Statement>>,
    #[serde(default)]
    removals: BTreeMap<String, Vec<Statement>>,
    #[serde(default)]
    deleted_subjects: Vec<String>,
}

impl ChangeSet {
    pub fn builder() -> ChangeSetBuilder {
        ChangeSetBuilder::default()
    }

    pub fn additions(&self) -> impl Iterator<Item = &Statement> {
        self.additions.values().flatten()
    }

    pub fn removals(&self) -> impl Iterator<Item = &Statement> {
        self.removals.values().flatten()
    }

    pub fn deleted_subjects(&self) -> &[String] {
        &self.deleted_subjects
    }

    pub fn subjects(&self) -> BTreeSet<&str> {
        self.additions
            .keys()
            .chain(self.removals.keys())
            .chain(self.deleted_subjects.iter())
            .map(String::as_str)
            .collect()
    }

    pub fn is_empty(&self) -> bool {
        self.additions.is_empty() && self.removals.is_empty() && self.deleted_subjects.is_empty()
    }

    /// Which predicates changed on which subjects. Deleted subjects with no
    /// recorded removals map to an empty set, meaning every predicate.
    pub fn subjects_and_predicates_of_change(&self) -> ChangedSubjects {
        let mut changes = ChangedSubjects::default();
        for statement in self.additions().chain(self.removals()) {
            changes.insert(&statement.subject, &statement.predicate);
        }
        for subject in &self.deleted_subjects {
            changes.touch(subject);
        }
        changes
    }

    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }

    pub fn from_json(raw: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(raw)
    }
}

#[derive(Clone, Debug, Default)]
pub struct ChangeSetBuilder {
    inner: ChangeSet,
}

impl ChangeSetBuilder {
    pub fn add(
        mut self,
        subject: impl Into<String>,
        predicate: impl Into<String>,
        object: Term,
        context: impl Into<String>,
    ) -> Self {
        self.push_addition(subject, predicate, object, context);
        self
    }

    pub fn remove(
        mut self,
        subject: impl Into<String>,
        predicate: impl Into<String>,
        object: Term,
        context: impl Into<String>,
    ) -> Self {
        self.push_removal(subject, predicate, object, context);
        self
    }

    /// Marks the whole resource as deleted.
    pub fn delete_subject(mut self, subject: impl Into<String>) -> Self {
        let subject = subject.into();
        if !self.inner.deleted_subjects.contains(&subject) {
            self.inner.deleted_subjects.push(subject);
        }
        self
    }

    pub fn push_addition(
        &mut self,
        subject: impl Into<String>,
        predicate: impl Into<String>,
        object: Term,
        context: impl Into<String>,
    ) {
        push_statement(
            &mut self.inner.additions,
            Statement {
                subject: subject.into(),
                predicate: predicate.into(),
                object,
                context: context.into(),
            },
        );
    }

    pub fn push_removal(
        &mut self,
        subject: impl Into<String>,
        predicate: impl Into<String>,
        object: Term,
        context: impl Into<String>,
    ) {
        push_statement(
            &mut self.inner.removals,
            Statement {
                subject: subject.into(),
                predicate: predicate.into(),
                object,
                context: context.into(),
            },
        );
    }

    pub fn build(self) -> ChangeSet {
        self.inner
    }
}

fn push_statement(target: &mut BTreeMap<String, Vec<Statement>>, statement: Statement) {
    let bucket = target.entry(statement.subject.clone()).or_default();
    if !bucket.contains(&statement) {
        bucket.push(statement);
    }
}

/// Subject → predicates that changed on it.
///
/// An empty predicate set stands for "every predicate", which is how deleted
/// subjects are reported.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ChangedSubjects(BTreeMap<String, BTreeSet<String>>);

impl ChangedSubjects {
    pub fn insert(&mut self, subject: impl Into<String>, predicate: impl Into<String>) {
        self.0
            .entry(subject.into())
            .or_default()
            .insert(predicate.into());
    }

    pub fn touch(&mut self, subject: impl Into<String>) {
        self.0.entry(subject.into()).or_default();
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &BTreeSet<String>)> {
        self.0.iter().map(|(subject, predicates)| (subject.as_str(), predicates))
    }

    pub fn predicates(&self, subject: &str) -> Option<&BTreeSet<String>> {
        self.0.get(subject)
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl<S, P, I> FromIterator<(S, I)> for ChangedSubjects
where
    S: Into<String>,
    P: Into<String>,
    I: IntoIterator<Item = P>,
{
    fn from_iter<T: IntoIterator<Item = (S, I)>>(iter: T) -> Self {
        let mut changes = Self::default();
        for (subject, predicates) in iter {
            let subject = subject.into();
            changes.touch(subject.clone());
            for predicate in predicates {
                changes.insert(subject.clone(), predicate);
            }
        }
        changes
    }
}
