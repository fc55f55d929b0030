//! Pipeline definition types.
//!
//! These types represent the user-authored pipeline YAML document. The
//! document is parsed once at run start and is immutable thereafter.

use crate::{Error, Result};
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PipelineDefinition {
    pub name: String,
    #[serde(default)]
    pub version: Option<String>,
    /// Pipeline-wide environment, overlaid by job and step env maps.
    #[serde(default)]
    pub env: HashMap<String, String>,
    /// Declaration order is significant: it fixes instance ordering in
    /// reports and the expansion order of the graph.
    pub jobs: IndexMap<String, JobSpec>,
}

impl PipelineDefinition {
    /// Parse a pipeline document from YAML.
    ///
    /// Any parse failure (including duplicate job names, which YAML
    /// mappings reject) is a config error carrying the offending path.
    pub fn from_yaml(content: &str) -> Result<Self> {
        let definition: PipelineDefinition =
            serde_yaml::from_str(content).map_err(|e| Error::InvalidDefinition {
                path: e
                    .location()
                    .map(|l| format!("line {}, column {}", l.line(), l.column()))
                    .unwrap_or_else(|| "document".to_string()),
                message: e.to_string(),
            })?;
        definition.validate()?;
        Ok(definition)
    }

    /// Structural validation beyond what serde enforces.
    pub fn validate(&self) -> Result<()> {
        if self.jobs.is_empty() {
            return Err(Error::EmptyPipeline);
        }

        for (job_name, job) in &self.jobs {
            for step in &job.steps {
                step.validate(job_name)?;
            }
            if let Some(matrix) = &job.matrix
                && matrix.axes.is_empty()
                && matrix.include.is_empty()
            {
                return Err(Error::InvalidDefinition {
                    path: format!("jobs.{}.matrix", job_name),
                    message: "matrix declares no axes and no include entries".to_string(),
                });
            }
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobSpec {
    /// Jobs that must complete successfully before this one runs.
    #[serde(default)]
    pub needs: Vec<String>,
    /// Gate condition. Absent means `success()`.
    #[serde(default, rename = "if")]
    pub condition: Option<String>,
    #[serde(default)]
    pub matrix: Option<MatrixConfig>,
    #[serde(default)]
    pub env: HashMap<String, String>,
    pub steps: Vec<StepSpec>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MatrixConfig {
    /// Axis name to ordered value list. Axis declaration order drives
    /// expansion order, so downstream instance ids are deterministic.
    pub axes: IndexMap<String, Vec<serde_json::Value>>,
    #[serde(default)]
    pub include: Vec<IndexMap<String, serde_json::Value>>,
    #[serde(default)]
    pub exclude: Vec<IndexMap<String, serde_json::Value>>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StepSpec {
    pub name: String,
    /// Named external action to invoke through the adapter.
    #[serde(default)]
    pub uses: Option<String>,
    /// Configuration for `uses` steps.
    #[serde(default)]
    pub with: ActionConfig,
    /// Literal command body, run through the shell.
    #[serde(default)]
    pub run: Option<String>,
    #[serde(default = "default_shell")]
    pub shell: String,
    #[serde(default)]
    pub working_directory: Option<String>,
    #[serde(default)]
    pub env: HashMap<String, String>,
    #[serde(default, rename = "if")]
    pub condition: Option<String>,
    /// A failing step marked continue-on-error does not fail the
    /// instance or the run.
    #[serde(default)]
    pub continue_on_error: bool,
    /// Artifact written to the store when the step succeeds.
    #[serde(default)]
    pub upload: Option<ArtifactDecl>,
    /// Artifact fetched from the store before the step body runs.
    #[serde(default)]
    pub download: Option<ArtifactDecl>,
    #[serde(default = "default_step_timeout")]
    pub timeout_minutes: u32,
}

fn default_shell() -> String {
    "sh".to_string()
}

fn default_step_timeout() -> u32 {
    30
}

impl StepSpec {
    fn validate(&self, job_name: &str) -> Result<()> {
        if self.run.is_some() && self.uses.is_some() {
            return Err(Error::InvalidStep {
                job: job_name.to_string(),
                step: self.name.clone(),
                message: "step declares both 'run' and 'uses'".to_string(),
            });
        }
        if self.run.is_none()
            && self.uses.is_none()
            && self.upload.is_none()
            && self.download.is_none()
        {
            return Err(Error::InvalidStep {
                job: job_name.to_string(),
                step: self.name.clone(),
                message: "step has no 'run', 'uses', 'upload' or 'download'".to_string(),
            });
        }
        Ok(())
    }
}

/// Recognized generic options for external-action invocations.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ActionConfig {
    /// Version or ref pin for the action.
    #[serde(default)]
    pub version: Option<String>,
    #[serde(default)]
    pub working_directory: Option<String>,
    /// Environment overlay applied to the action process.
    #[serde(default)]
    pub env: HashMap<String, String>,
    /// Action-specific options, passed through opaquely.
    #[serde(default, flatten)]
    pub options: IndexMap<String, serde_json::Value>,
}

/// Named artifact slot referenced by upload/download steps.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ArtifactDecl {
    pub name: String,
    /// File the artifact is read from (upload) or written to
    /// (download). Optional for adapters that stream bytes directly.
    #[serde(default)]
    pub path: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    const BASIC: &str = r#"
name: release
jobs:
  check:
    steps:
      - name: fmt
        run: cargo fmt --check
  test:
    needs: [check]
    matrix:
      axes:
        os: [linux, macos, windows]
    steps:
      - name: run tests
        run: cargo test
"#;

    #[test]
    fn test_parse_basic_pipeline() {
        let def = PipelineDefinition::from_yaml(BASIC).unwrap();
        assert_eq!(def.name, "release");
        assert_eq!(def.jobs.len(), 2);
        assert_eq!(def.jobs["test"].needs, vec!["check".to_string()]);
        let matrix = def.jobs["test"].matrix.as_ref().unwrap();
        assert_eq!(matrix.axes["os"].len(), 3);
    }

    #[test]
    fn test_empty_pipeline_rejected() {
        let err = PipelineDefinition::from_yaml("name: empty\njobs: {}\n").unwrap_err();
        assert!(matches!(err, Error::EmptyPipeline));
    }

    #[test]
    fn test_step_with_run_and_uses_rejected() {
        let doc = r#"
name: bad
jobs:
  build:
    steps:
      - name: both
        run: make
        uses: setup-rust
"#;
        let err = PipelineDefinition::from_yaml(doc).unwrap_err();
        assert!(matches!(err, Error::InvalidStep { .. }));
    }

    #[test]
    fn test_parse_failure_reports_location() {
        let err = PipelineDefinition::from_yaml("name: [unterminated").unwrap_err();
        match err {
            Error::InvalidDefinition { path, .. } => assert!(!path.is_empty()),
            other => panic!("expected InvalidDefinition, got {:?}", other),
        }
    }

    #[test]
    fn test_upload_only_step_is_valid() {
        let doc = r#"
name: artifacts
jobs:
  build:
    steps:
      - name: compile
        run: cargo build --release
      - name: publish binary
        upload:
          name: bin-linux
          path: target/release/tool
"#;
        let def = PipelineDefinition::from_yaml(doc).unwrap();
        let step = &def.jobs["build"].steps[1];
        assert_eq!(step.upload.as_ref().unwrap().name, "bin-linux");
    }
}
