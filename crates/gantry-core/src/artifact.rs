//! Artifact metadata.

use crate::ids::InstanceId;
use serde::{Deserialize, Serialize};

/// Handle to a named artifact held by the store for the run's
/// lifetime. The producing instance is metadata only; consumers look
/// artifacts up by name.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ArtifactHandle {
    pub name: String,
    pub producer: InstanceId,
    /// Hex sha256 of the payload.
    pub sha256: String,
    pub size: u64,
}
