//! Run state and reporting types.

use crate::error::ErrorKind;
use crate::ids::{InstanceId, RunId};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Lifecycle state of a job instance.
///
/// Transitions are monotonic: a state is never reached twice and a
/// terminal state is never left.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InstanceState {
    Pending,
    Blocked,
    Ready,
    Running,
    Succeeded,
    Failed,
    Skipped,
}

impl InstanceState {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            InstanceState::Succeeded | InstanceState::Failed | InstanceState::Skipped
        )
    }

    fn rank(&self) -> u8 {
        match self {
            InstanceState::Pending => 0,
            InstanceState::Blocked => 1,
            InstanceState::Ready => 2,
            InstanceState::Running => 3,
            InstanceState::Succeeded | InstanceState::Failed | InstanceState::Skipped => 4,
        }
    }

    /// Whether moving to `next` preserves monotonicity.
    pub fn may_become(&self, next: InstanceState) -> bool {
        !self.is_terminal() && next.rank() > self.rank()
    }
}

impl std::fmt::Display for InstanceState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            InstanceState::Pending => "pending",
            InstanceState::Blocked => "blocked",
            InstanceState::Ready => "ready",
            InstanceState::Running => "running",
            InstanceState::Succeeded => "succeeded",
            InstanceState::Failed => "failed",
            InstanceState::Skipped => "skipped",
        };
        f.write_str(s)
    }
}

/// Overall result of a pipeline run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunStatus {
    Succeeded,
    Failed,
    Cancelled,
}

impl RunStatus {
    pub fn is_success(&self) -> bool {
        matches!(self, RunStatus::Succeeded)
    }
}

/// Terminal record of one job instance.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InstanceReport {
    pub id: InstanceId,
    pub state: InstanceState,
    /// Error class for Failed/Skipped instances.
    pub error_kind: Option<ErrorKind>,
    pub message: Option<String>,
    pub duration_ms: Option<u64>,
}

/// Final report for a completed run, listing every terminal instance.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunReport {
    pub run_id: RunId,
    pub pipeline: String,
    pub status: RunStatus,
    pub instances: Vec<InstanceReport>,
    pub started_at: DateTime<Utc>,
    pub duration_ms: u64,
}

impl RunReport {
    /// Process exit code for this run.
    pub fn exit_code(&self) -> i32 {
        match self.status {
            RunStatus::Succeeded => 0,
            RunStatus::Failed => ErrorKind::Step.exit_code(),
            RunStatus::Cancelled => ErrorKind::Cancelled.exit_code(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_terminal_states() {
        assert!(InstanceState::Succeeded.is_terminal());
        assert!(InstanceState::Skipped.is_terminal());
        assert!(!InstanceState::Running.is_terminal());
    }

    #[test]
    fn test_transitions_are_monotonic() {
        assert!(InstanceState::Pending.may_become(InstanceState::Blocked));
        assert!(InstanceState::Blocked.may_become(InstanceState::Ready));
        assert!(InstanceState::Ready.may_become(InstanceState::Running));
        assert!(InstanceState::Running.may_become(InstanceState::Failed));
        // Skips can jump straight from a waiting state.
        assert!(InstanceState::Pending.may_become(InstanceState::Skipped));
        // Never backwards, never out of a terminal state.
        assert!(!InstanceState::Running.may_become(InstanceState::Ready));
        assert!(!InstanceState::Failed.may_become(InstanceState::Running));
        assert!(!InstanceState::Succeeded.may_become(InstanceState::Failed));
    }
}
