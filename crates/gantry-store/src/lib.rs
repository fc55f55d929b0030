//! Artifact storage for pipeline runs.
//!
//! Artifacts are named byte payloads produced by one job instance and
//! consumed by another. Names are single-writer per run. Two backends:
//! [`MemoryStore`] for in-process runs and tests, [`FsStore`] for
//! runs that should leave artifacts on disk.

mod fs;
mod memory;

pub use fs::FsStore;
pub use memory::MemoryStore;

use sha2::{Digest, Sha256};

pub(crate) fn sha256_hex(bytes: &[u8]) -> String {
    format!("{:x}", Sha256::digest(bytes))
}
