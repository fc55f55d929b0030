//! Strongly-typed identifiers for domain entities.

use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

macro_rules! define_id {
    ($name:ident, $prefix:expr) => {
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(Uuid);

        impl $name {
            pub fn new() -> Self {
                Self(Uuid::now_v7())
            }

            pub fn from_uuid(uuid: Uuid) -> Self {
                Self(uuid)
            }

            pub fn as_uuid(&self) -> &Uuid {
                &self.0
            }
        }

        impl Default for $name {
            fn default() -> Self {
                Self::new()
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}_{}", $prefix, self.0)
            }
        }

        impl std::str::FromStr for $name {
            type Err = uuid::Error;

            fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
                let uuid_str = s.strip_prefix(concat!($prefix, "_")).unwrap_or(s);
                Ok(Self(Uuid::parse_str(uuid_str)?))
            }
        }
    };
}

define_id!(RunId, "run");

/// Identifier of one materialized job instance.
///
/// Deterministic: derived from the job name plus the matrix cell's
/// axis bindings, so the same definition always yields the same ids
/// across runs.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct InstanceId(String);

impl InstanceId {
    /// Id for the single instance of a job with no matrix.
    pub fn bare(job: impl Into<String>) -> Self {
        Self(job.into())
    }

    /// Id for one cell of a matrix job. `bindings` must already be in
    /// axis declaration order.
    pub fn for_cell(job: &str, bindings: &[(String, String)]) -> Self {
        if bindings.is_empty() {
            return Self::bare(job);
        }
        let parts: Vec<String> = bindings
            .iter()
            .map(|(k, v)| format!("{}={}", k, v))
            .collect();
        Self(format!("{} ({})", job, parts.join(", ")))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// The declared job name this instance was expanded from.
    pub fn job_name(&self) -> &str {
        match self.0.find(" (") {
            Some(idx) => &self.0[..idx],
            None => &self.0,
        }
    }
}

impl fmt::Display for InstanceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_run_id_display_and_parse() {
        let id = RunId::new();
        let s = id.to_string();
        assert!(s.starts_with("run_"));
        let parsed: RunId = s.parse().unwrap();
        assert_eq!(id, parsed);
    }

    #[test]
    fn test_instance_id_for_cell() {
        let id = InstanceId::for_cell(
            "test",
            &[
                ("os".to_string(), "linux".to_string()),
                ("arch".to_string(), "x86_64".to_string()),
            ],
        );
        assert_eq!(id.as_str(), "test (os=linux, arch=x86_64)");
        assert_eq!(id.job_name(), "test");
    }

    #[test]
    fn test_instance_id_bare() {
        let id = InstanceId::for_cell("check", &[]);
        assert_eq!(id.as_str(), "check");
        assert_eq!(id.job_name(), "check");
    }
}
