//! Directory-backed artifact store.

use crate::sha256_hex;
use async_trait::async_trait;
use gantry_core::artifact::ArtifactHandle;
use gantry_core::ids::InstanceId;
use gantry_core::ports::ArtifactStore;
use gantry_core::{Error, Result};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tokio::fs;
use tokio::time::Instant;
use tracing::debug;

const POLL_INTERVAL: Duration = Duration::from_millis(100);

/// Artifact store that writes payloads under a run-scoped directory,
/// with a JSON sidecar per artifact carrying the handle metadata.
pub struct FsStore {
    root: PathBuf,
}

impl FsStore {
    /// Open a store rooted at `root`, creating the directory if
    /// needed.
    pub async fn open(root: impl Into<PathBuf>) -> Result<Self> {
        let root = root.into();
        fs::create_dir_all(&root).await?;
        Ok(Self { root })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn data_path(&self, name: &str) -> PathBuf {
        self.root.join(sanitize(name))
    }

    fn meta_path(&self, name: &str) -> PathBuf {
        self.root.join(format!("{}.meta.json", sanitize(name)))
    }
}

/// Artifact names are user input; keep them inside the store root.
fn sanitize(name: &str) -> String {
    name.chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || c == '.' || c == '-' || c == '_' {
                c
            } else {
                '_'
            }
        })
        .collect()
}

#[async_trait]
impl ArtifactStore for FsStore {
    async fn put(
        &self,
        name: &str,
        producer: &InstanceId,
        bytes: Vec<u8>,
    ) -> Result<ArtifactHandle> {
        let meta_path = self.meta_path(name);
        if fs::try_exists(&meta_path).await? {
            let existing: ArtifactHandle =
                serde_json::from_slice(&fs::read(&meta_path).await?)?;
            return Err(Error::DuplicateArtifact {
                name: name.to_string(),
                first: existing.producer.to_string(),
                second: producer.to_string(),
            });
        }

        let handle = ArtifactHandle {
            name: name.to_string(),
            producer: producer.clone(),
            sha256: sha256_hex(&bytes),
            size: bytes.len() as u64,
        };

        fs::write(self.data_path(name), &bytes).await?;
        // Metadata last: waiters treat its presence as "payload ready".
        fs::write(&meta_path, serde_json::to_vec(&handle)?).await?;
        debug!(artifact = name, path = %self.data_path(name).display(), "artifact written");
        Ok(handle)
    }

    async fn get(&self, name: &str) -> Result<Option<Vec<u8>>> {
        if !fs::try_exists(self.meta_path(name)).await? {
            return Ok(None);
        }
        Ok(Some(fs::read(self.data_path(name)).await?))
    }

    async fn wait(&self, name: &str, timeout: Duration) -> Result<Vec<u8>> {
        let deadline = Instant::now() + timeout;
        loop {
            if let Some(bytes) = self.get(name).await? {
                return Ok(bytes);
            }
            if Instant::now() + POLL_INTERVAL > deadline {
                return Err(Error::ArtifactTimeout {
                    name: name.to_string(),
                    waited_secs: timeout.as_secs(),
                });
            }
            tokio::time::sleep(POLL_INTERVAL).await;
        }
    }

    async fn list(&self) -> Result<Vec<ArtifactHandle>> {
        let mut handles = Vec::new();
        let mut dir = fs::read_dir(&self.root).await?;
        while let Some(entry) = dir.next_entry().await? {
            let path = entry.path();
            if path
                .file_name()
                .and_then(|n| n.to_str())
                .is_some_and(|n| n.ends_with(".meta.json"))
            {
                let handle: ArtifactHandle = serde_json::from_slice(&fs::read(&path).await?)?;
                handles.push(handle);
            }
        }
        Ok(handles)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn producer() -> InstanceId {
        InstanceId::bare("build")
    }

    #[tokio::test]
    async fn test_round_trip_on_disk() {
        let dir = tempfile::tempdir().unwrap();
        let store = FsStore::open(dir.path()).await.unwrap();

        store
            .put("bin-macos", &producer(), b"mach-o".to_vec())
            .await
            .unwrap();
        let bytes = store.get("bin-macos").await.unwrap().unwrap();
        assert_eq!(bytes, b"mach-o");

        let handles = store.list().await.unwrap();
        assert_eq!(handles.len(), 1);
        assert_eq!(handles[0].name, "bin-macos");
    }

    #[tokio::test]
    async fn test_duplicate_name_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let store = FsStore::open(dir.path()).await.unwrap();

        store.put("bin", &producer(), vec![1]).await.unwrap();
        let err = store.put("bin", &producer(), vec![2]).await.unwrap_err();
        assert!(matches!(err, Error::DuplicateArtifact { .. }));
    }

    #[tokio::test]
    async fn test_names_are_sanitized() {
        let dir = tempfile::tempdir().unwrap();
        let store = FsStore::open(dir.path()).await.unwrap();

        store
            .put("../escape", &producer(), vec![0])
            .await
            .unwrap();
        // The payload stayed inside the store root.
        assert!(store.root().join(".._escape").exists());
    }

    #[tokio::test]
    async fn test_wait_times_out() {
        let dir = tempfile::tempdir().unwrap();
        let store = FsStore::open(dir.path()).await.unwrap();
        let err = store
            .wait("absent", Duration::from_millis(50))
            .await
            .unwrap_err();
        assert!(matches!(err, Error::ArtifactTimeout { .. }));
    }
}
