#![forbid(unsafe_code)]

pub mod config;
pub mod model;
pub mod stat;

pub use config::{Config, ConfigError, Namespaces, PredicateScope, Specification};
pub use model::{
    ChangeSet, ChangeSetBuilder, ChangedSubjects, ImpactedSubject, OperationType, RDF_TYPE,
    ResourceDoc, ResourceId, Statement, Term,
};
pub use stat::{NoopStat, StatSink};

pub mod ids {
    use serde::{Deserialize, Serialize};

    #[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
    #[serde(try_from = "String", into = "String")]
    pub struct StoreName(String);

    impl StoreName {
        pub fn as_str(&self) -> &str {
            &self.0
        }

        pub fn try_new(value: impl Into<String>) -> Result<Self, NameError> {
            let value = value.into();
            validate_name(&value)?;
            Ok(Self(value))
        }
    }

    /// A pod is one collection of resource documents inside a store.
    #[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
    #[serde(try_from = "String", into = "String")]
    pub struct PodName(String);

    impl PodName {
        pub fn as_str(&self) -> &str {
            &self.0
        }

        pub fn try_new(value: impl Into<String>) -> Result<Self, NameError> {
            let value = value.into();
            validate_name(&value)?;
            Ok(Self(value))
        }
    }

    macro_rules! name_conversions {
        ($ty:ident) => {
            impl TryFrom<String> for $ty {
                type Error = NameError;

                fn try_from(value: String) -> Result<Self, Self::Error> {
                    Self::try_new(value)
                }
            }

            impl From<$ty> for String {
                fn from(value: $ty) -> Self {
                    value.0
                }
            }

            impl std::fmt::Display for $ty {
                fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
                    f.write_str(&self.0)
                }
            }
        };
    }

    name_conversions!(StoreName);
    name_conversions!(PodName);

    #[derive(Clone, Debug, PartialEq, Eq, thiserror::Error)]
    pub enum NameError {
        #[error("name must not be empty")]
        Empty,
        #[error("name is too long")]
        TooLong,
        #[error("name must start with an ASCII letter or digit")]
        InvalidFirstChar,
        #[error("invalid character {ch:?} at index {index}")]
        InvalidChar { ch: char, index: usize },
    }

    fn validate_name(value: &str) -> Result<(), NameError> {
        if value.is_empty() {
            return Err(NameError::Empty);
        }
        if value.len() > 128 {
            return Err(NameError::TooLong);
        }
        let mut chars = value.chars();
        let Some(first) = chars.next() else {
            return Err(NameError::Empty);
        };
        if !first.is_ascii_alphanumeric() {
            return Err(NameError::InvalidFirstChar);
        }
        for (index, ch) in value.chars().enumerate().skip(1) {
            if ch.is_ascii_alphanumeric() || matches!(ch, '.' | '_' | '-') {
                continue;
            }
            return Err(NameError::InvalidChar { ch, index });
        }
        Ok(())
    }

}
