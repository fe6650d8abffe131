#![forbid(unsafe_code)]

//! Job payload keys and the checks every job runs before touching a store.

use crate::JobError;
use serde_json::{Map as JsonMap, Value as JsonValue};

pub const STORE_NAME: &str = "storeName";
pub const POD_NAME: &str = "podName";
pub const CHANGES: &str = "changes";
pub const OPERATIONS: &str = "operations";
pub const CONTEXT_ALIAS: &str = "contextAlias";
pub const SUBJECT: &str = "subject";
pub const TRIPOD_CONFIG: &str = "tripodConfig";
pub const TRIPOD_CONFIG_GENERATOR: &str = "tripodConfigGenerator";

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum JobKind {
    Discover,
    Apply,
}

impl JobKind {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Discover => "DiscoverImpactedSubjects",
            Self::Apply => "ApplyOperation",
        }
    }

    pub fn mandatory_keys(self) -> &'static [&'static str] {
        match self {
            Self::Discover => &[STORE_NAME, POD_NAME, CHANGES, OPERATIONS, CONTEXT_ALIAS],
            Self::Apply => &[SUBJECT],
        }
    }
}

impl std::fmt::Display for JobKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for JobKind {
    type Err = JobError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim() {
            "DiscoverImpactedSubjects" | "discover" => Ok(Self::Discover),
            "ApplyOperation" | "apply" => Ok(Self::Apply),
            other => Err(JobError::Payload(format!("unknown job kind: {other}"))),
        }
    }
}

/// Where a job gets its configuration from.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ConfigSource {
    /// Serialized configuration carried in the payload.
    Inline(String),
    /// Token of a configuration kept in the config cache.
    Generator(String),
}

impl ConfigSource {
    /// Writes this source into a payload under its own key.
    pub fn write_to(&self, payload: &mut JsonMap<String, JsonValue>) {
        match self {
            Self::Inline(json) => {
                payload.insert(TRIPOD_CONFIG.to_string(), JsonValue::String(json.clone()));
            }
            Self::Generator(token) => {
                payload.insert(
                    TRIPOD_CONFIG_GENERATOR.to_string(),
                    JsonValue::String(token.clone()),
                );
            }
        }
    }
}

/// Checks that `payload` carries every mandatory key of `job` and exactly
/// one configuration source, which is returned. Null counts as missing.
pub fn validate(job: JobKind, payload: &JsonValue) -> Result<ConfigSource, JobError> {
    let Some(args) = payload.as_object() else {
        return Err(JobError::Payload(format!("{job} args must be an object")));
    };
    for &key in job.mandatory_keys() {
        if present(args, key).is_none() {
            return Err(JobError::MissingArgument { key, job });
        }
    }

    match (present(args, TRIPOD_CONFIG), present(args, TRIPOD_CONFIG_GENERATOR)) {
        (Some(_), Some(_)) => Err(JobError::AmbiguousConfig { job }),
        (None, None) => Err(JobError::MissingConfig { job }),
        (Some(inline), None) => match inline {
            JsonValue::String(raw) => Ok(ConfigSource::Inline(raw.clone())),
            JsonValue::Object(_) => Ok(ConfigSource::Inline(inline.to_string())),
            _ => Err(JobError::Payload(format!("{TRIPOD_CONFIG} must be an object"))),
        },
        (None, Some(token)) => token
            .as_str()
            .filter(|token| !token.trim().is_empty())
            .map(|token| ConfigSource::Generator(token.trim().to_string()))
            .ok_or_else(|| {
                JobError::Payload(format!("{TRIPOD_CONFIG_GENERATOR} must be a token string"))
            }),
    }
}

fn present<'a>(args: &'a JsonMap<String, JsonValue>, key: &str) -> Option<&'a JsonValue> {
    args.get(key).filter(|value| !value.is_null())
}

/// Reads a string argument that `validate` has already seen.
pub(crate) fn string_arg<'a>(
    job: JobKind,
    payload: &'a JsonValue,
    key: &'static str,
) -> Result<&'a str, JobError> {
    payload
        .get(key)
        .and_then(JsonValue::as_str)
        .ok_or_else(|| JobError::Payload(format!("{job}: {key} must be a string")))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn discover_args() -> JsonValue {
        json!({
            "storeName": "tripod_php_testing",
            "podName": "CBD_testing",
            "changes": {"baseData:1": ["dct:title"]},
            "operations": ["generate_table_rows"],
            "contextAlias": "http://talisaspire.com/",
            "tripodConfigGenerator": "abc123"
        })
    }

    #[test]
    fn every_mandatory_key_is_named_when_missing() {
        for key in JobKind::Discover.mandatory_keys() {
            let mut args = discover_args();
            args.as_object_mut().expect("object").remove(*key);
            let err = validate(JobKind::Discover, &args).expect_err("missing key");
            let message = err.to_string();
            assert!(message.contains(key), "{message}");
            assert!(message.contains("DiscoverImpactedSubjects"), "{message}");
        }
    }

    #[test]
    fn exactly_one_config_source() {
        let mut args = discover_args();
        assert_eq!(
            validate(JobKind::Discover, &args).expect("valid"),
            ConfigSource::Generator("abc123".to_string())
        );

        args["tripodConfig"] = json!({"namespaces": {}});
        assert!(matches!(
            validate(JobKind::Discover, &args),
            Err(JobError::AmbiguousConfig { job: JobKind::Discover })
        ));

        let object = args.as_object_mut().expect("object");
        object.remove("tripodConfig");
        object.remove("tripodConfigGenerator");
        assert!(matches!(
            validate(JobKind::Discover, &args),
            Err(JobError::MissingConfig { job: JobKind::Discover })
        ));
    }

    #[test]
    fn null_is_missing() {
        let args = json!({"subject": null, "tripodConfigGenerator": "abc"});
        assert!(matches!(
            validate(JobKind::Apply, &args),
            Err(JobError::MissingArgument { key: "subject", job: JobKind::Apply })
        ));
    }
}
