//! Port traits (hexagonal architecture).
//!
//! These traits define the seams between the engine and its external
//! collaborators: the artifact store, the shell, and opaque external
//! actions.

use crate::artifact::ArtifactHandle;
use crate::ids::InstanceId;
use crate::pipeline::{ActionConfig, StepSpec};
use crate::Result;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::path::PathBuf;
use std::time::Duration;
use tokio::sync::mpsc;

/// Named-slot storage for build outputs passed between instances.
///
/// Names are unique per run; a second `put` to an existing name is
/// rejected (the graph builder catches this statically, the store
/// defends at runtime).
#[async_trait]
pub trait ArtifactStore: Send + Sync {
    /// Store an artifact under `name`.
    async fn put(&self, name: &str, producer: &InstanceId, bytes: Vec<u8>)
        -> Result<ArtifactHandle>;

    /// Fetch an artifact by name, `None` when absent.
    async fn get(&self, name: &str) -> Result<Option<Vec<u8>>>;

    /// Block until the artifact exists, up to `timeout`.
    async fn wait(&self, name: &str, timeout: Duration) -> Result<Vec<u8>>;

    /// Handles of every stored artifact.
    async fn list(&self) -> Result<Vec<ArtifactHandle>>;
}

/// One line of captured step output.
#[derive(Debug, Clone)]
pub struct OutputLine {
    pub stream: OutputStream,
    pub content: String,
    pub line_number: u32,
    pub timestamp: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutputStream {
    Stdout,
    Stderr,
}

/// Everything a runner needs to execute one step. All strings are
/// already interpolated.
#[derive(Debug, Clone)]
pub struct StepContext {
    pub workspace: PathBuf,
    pub env: HashMap<String, String>,
    pub step: StepSpec,
}

/// Result of executing a step body.
#[derive(Debug, Clone)]
pub struct StepOutcome {
    pub exit_code: i32,
    pub success: bool,
    pub duration_ms: u64,
}

/// Executes literal `run` step bodies.
#[async_trait]
pub trait StepRunner: Send + Sync {
    async fn execute(
        &self,
        ctx: &StepContext,
        output_tx: mpsc::Sender<OutputLine>,
    ) -> Result<StepOutcome>;
}

/// Result of an external-action invocation.
#[derive(Debug, Clone)]
pub struct ActionOutcome {
    pub exit_code: i32,
    pub stdout: String,
}

impl ActionOutcome {
    pub fn success(&self) -> bool {
        self.exit_code == 0
    }
}

/// Narrow interface to opaque external actions. The engine neither
/// knows nor cares what the action does; it sees an exit code and
/// captured stdout.
#[async_trait]
pub trait ActionAdapter: Send + Sync {
    async fn invoke(
        &self,
        action: &str,
        config: &ActionConfig,
        ctx: &StepContext,
    ) -> Result<ActionOutcome>;
}
