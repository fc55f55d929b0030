//! In-memory artifact store.

use crate::sha256_hex;
use async_trait::async_trait;
use gantry_core::artifact::ArtifactHandle;
use gantry_core::ids::InstanceId;
use gantry_core::ports::ArtifactStore;
use gantry_core::{Error, Result};
use std::collections::HashMap;
use std::time::Duration;
use tokio::sync::{Notify, RwLock};
use tokio::time::Instant;
use tracing::debug;

struct Entry {
    handle: ArtifactHandle,
    bytes: Vec<u8>,
}

/// Artifact store backed by a process-local map. Artifacts live until
/// the store is dropped at run end.
#[derive(Default)]
pub struct MemoryStore {
    entries: RwLock<HashMap<String, Entry>>,
    notify: Notify,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl ArtifactStore for MemoryStore {
    async fn put(
        &self,
        name: &str,
        producer: &InstanceId,
        bytes: Vec<u8>,
    ) -> Result<ArtifactHandle> {
        let mut entries = self.entries.write().await;
        if let Some(existing) = entries.get(name) {
            return Err(Error::DuplicateArtifact {
                name: name.to_string(),
                first: existing.handle.producer.to_string(),
                second: producer.to_string(),
            });
        }

        let handle = ArtifactHandle {
            name: name.to_string(),
            producer: producer.clone(),
            sha256: sha256_hex(&bytes),
            size: bytes.len() as u64,
        };
        debug!(artifact = name, size = handle.size, "artifact stored");
        entries.insert(
            name.to_string(),
            Entry {
                handle: handle.clone(),
                bytes,
            },
        );
        drop(entries);

        self.notify.notify_waiters();
        Ok(handle)
    }

    async fn get(&self, name: &str) -> Result<Option<Vec<u8>>> {
        let entries = self.entries.read().await;
        Ok(entries.get(name).map(|e| e.bytes.clone()))
    }

    async fn wait(&self, name: &str, timeout: Duration) -> Result<Vec<u8>> {
        let deadline = Instant::now() + timeout;
        loop {
            // Register for wakeups before the lookup so a concurrent
            // put between the two is not missed.
            let notified = self.notify.notified();

            if let Some(bytes) = self.get(name).await? {
                return Ok(bytes);
            }

            let remaining = deadline.saturating_duration_since(Instant::now());
            if remaining.is_zero()
                || tokio::time::timeout(remaining, notified).await.is_err()
            {
                return Err(Error::ArtifactTimeout {
                    name: name.to_string(),
                    waited_secs: timeout.as_secs(),
                });
            }
        }
    }

    async fn list(&self) -> Result<Vec<ArtifactHandle>> {
        let entries = self.entries.read().await;
        Ok(entries.values().map(|e| e.handle.clone()).collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    fn producer(name: &str) -> InstanceId {
        InstanceId::bare(name)
    }

    #[tokio::test]
    async fn test_put_get_round_trip() {
        let store = MemoryStore::new();
        let payload = b"binary contents".to_vec();

        let handle = store
            .put("bin-linux", &producer("build (os=linux)"), payload.clone())
            .await
            .unwrap();
        assert_eq!(handle.size, payload.len() as u64);

        let fetched = store.get("bin-linux").await.unwrap().unwrap();
        assert_eq!(fetched, payload);
    }

    #[tokio::test]
    async fn test_duplicate_name_rejected() {
        let store = MemoryStore::new();
        store
            .put("bin", &producer("a"), vec![1])
            .await
            .unwrap();
        let err = store.put("bin", &producer("b"), vec![2]).await.unwrap_err();
        assert!(matches!(err, Error::DuplicateArtifact { .. }));
    }

    #[tokio::test]
    async fn test_get_missing_is_none() {
        let store = MemoryStore::new();
        assert!(store.get("nope").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_wait_wakes_on_put() {
        let store = Arc::new(MemoryStore::new());

        let writer = store.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(20)).await;
            writer
                .put("late", &producer("build"), b"here".to_vec())
                .await
                .unwrap();
        });

        let bytes = store.wait("late", Duration::from_secs(5)).await.unwrap();
        assert_eq!(bytes, b"here");
    }

    #[tokio::test]
    async fn test_wait_times_out() {
        let store = MemoryStore::new();
        let err = store
            .wait("never", Duration::from_millis(30))
            .await
            .unwrap_err();
        assert!(matches!(err, Error::ArtifactTimeout { .. }));
    }

    #[tokio::test]
    async fn test_digest_recorded() {
        let store = MemoryStore::new();
        let handle = store
            .put("sum", &producer("build"), b"abc".to_vec())
            .await
            .unwrap();
        // Well-known sha256 of "abc".
        assert_eq!(
            handle.sha256,
            "ba7816bf8f01cfea414140de5dae2223b00361a396177a9cb410ff61f20015ad"
        );
    }
}
