//! Error types for Gantry.
//!
//! Every variant belongs to one of the [`ErrorKind`] classes. Config
//! errors are fatal and detected before any instance executes; eval
//! errors skip the owning instance; step errors fail the owning
//! instance and propagate as skips to strict dependents.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum Error {
    // Configuration errors
    #[error("invalid pipeline definition at {path}: {message}")]
    InvalidDefinition { path: String, message: String },

    #[error("pipeline has no jobs")]
    EmptyPipeline,

    #[error("duplicate job name: {0}")]
    DuplicateJob(String),

    #[error("job '{job}' needs unknown job '{needs}'")]
    UnknownDependency { job: String, needs: String },

    #[error("cycle detected in job dependencies involving '{0}'")]
    DependencyCycle(String),

    #[error("job '{job}': matrix include/exclude references undeclared axis '{axis}'")]
    UndeclaredAxis { job: String, axis: String },

    #[error("job '{job}': matrix include conflicts with existing cell on axis '{axis}'")]
    ConflictingInclude { job: String, axis: String },

    #[error("artifact '{name}' declared as output by both '{first}' and '{second}'")]
    DuplicateArtifact {
        name: String,
        first: String,
        second: String,
    },

    #[error("instance '{instance}' downloads artifact '{artifact}' that no prerequisite uploads")]
    MissingArtifactProducer { instance: String, artifact: String },

    #[error("job '{job}', step '{step}': {message}")]
    InvalidStep {
        job: String,
        step: String,
        message: String,
    },

    // Evaluation errors
    #[error("unknown identifier in condition: {0}")]
    UnknownIdentifier(String),

    #[error("unknown function in condition: {0}")]
    UnknownFunction(String),

    #[error("malformed condition '{expr}': {message}")]
    ExpressionSyntax { expr: String, message: String },

    // Step errors
    #[error("step '{step}' failed with exit code {exit_code}: {message}")]
    StepFailed {
        step: String,
        exit_code: i32,
        message: String,
    },

    #[error("action '{action}' failed: {message}")]
    ActionFailed { action: String, message: String },

    #[error("artifact '{name}' not available after {waited_secs}s")]
    ArtifactTimeout { name: String, waited_secs: u64 },

    // Cancellation
    #[error("run cancelled")]
    Cancelled,

    // Infrastructure errors
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("serialization error: {0}")]
    Serialization(String),

    #[error("internal error: {0}")]
    Internal(String),
}

pub type Result<T> = std::result::Result<T, Error>;

/// Coarse error classes used for reporting and process exit codes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    Config,
    Eval,
    Step,
    ArtifactTimeout,
    Cancelled,
    Internal,
}

impl ErrorKind {
    /// Process exit code for a run that ended with this error class.
    ///
    /// 0 is reserved for full success; the remaining codes let the
    /// invoking host tell pipeline-author mistakes from genuine
    /// build failures.
    pub fn exit_code(&self) -> i32 {
        match self {
            ErrorKind::Step | ErrorKind::ArtifactTimeout => 1,
            ErrorKind::Config => 2,
            ErrorKind::Eval => 3,
            ErrorKind::Cancelled => 4,
            ErrorKind::Internal => 1,
        }
    }
}

impl std::fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            ErrorKind::Config => "config",
            ErrorKind::Eval => "eval",
            ErrorKind::Step => "step",
            ErrorKind::ArtifactTimeout => "artifact-timeout",
            ErrorKind::Cancelled => "cancelled",
            ErrorKind::Internal => "internal",
        };
        f.write_str(s)
    }
}

impl Error {
    pub fn kind(&self) -> ErrorKind {
        match self {
            Error::InvalidDefinition { .. }
            | Error::EmptyPipeline
            | Error::DuplicateJob(_)
            | Error::UnknownDependency { .. }
            | Error::DependencyCycle(_)
            | Error::UndeclaredAxis { .. }
            | Error::ConflictingInclude { .. }
            | Error::DuplicateArtifact { .. }
            | Error::MissingArtifactProducer { .. }
            | Error::InvalidStep { .. } => ErrorKind::Config,

            Error::UnknownIdentifier(_)
            | Error::UnknownFunction(_)
            | Error::ExpressionSyntax { .. } => ErrorKind::Eval,

            Error::StepFailed { .. } | Error::ActionFailed { .. } => ErrorKind::Step,

            Error::ArtifactTimeout { .. } => ErrorKind::ArtifactTimeout,

            Error::Cancelled => ErrorKind::Cancelled,

            Error::Io(_) | Error::Serialization(_) | Error::Internal(_) => ErrorKind::Internal,
        }
    }
}

impl From<serde_json::Error> for Error {
    fn from(err: serde_json::Error) -> Self {
        Error::Serialization(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn config_errors_abort_with_distinct_code() {
        let err = Error::DuplicateJob("build".into());
        assert_eq!(err.kind(), ErrorKind::Config);
        assert_eq!(err.kind().exit_code(), 2);
    }

    #[test]
    fn eval_errors_are_not_step_failures() {
        let err = Error::UnknownIdentifier("branch".into());
        assert_eq!(err.kind(), ErrorKind::Eval);
        assert_ne!(err.kind().exit_code(), ErrorKind::Step.exit_code());
    }

    #[test]
    fn step_and_action_failures_share_a_kind() {
        let step = Error::StepFailed {
            step: "tests".into(),
            exit_code: 1,
            message: "command exited with code 1".into(),
        };
        let action = Error::ActionFailed {
            action: "publish".into(),
            message: "exited with code 2".into(),
        };
        assert_eq!(step.kind(), ErrorKind::Step);
        assert_eq!(action.kind(), ErrorKind::Step);
    }

    #[test]
    fn artifact_timeout_exits_like_a_step_failure() {
        let err = Error::ArtifactTimeout {
            name: "bin-linux".into(),
            waited_secs: 30,
        };
        assert_eq!(err.kind().exit_code(), 1);
    }
}
