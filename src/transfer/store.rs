//! Transfer state persistence.
//!
//! Every phase change goes through a [`TransferStore`] before the next
//! network call, so a restarted node can resume an export that already
//! reached the source chain. File I/O runs on `tokio::fs`, off the
//! transfer tasks' worker threads.

use async_trait::async_trait;
use dashmap::DashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use thiserror::Error;
use tokio::fs;
use tokio::io::AsyncWriteExt;
use uuid::Uuid;

use crate::transfer::types::TransferState;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("serialization error: {0}")]
    Serde(#[from] serde_json::Error),
}

/// Durable home of transfer states.
#[async_trait]
pub trait TransferStore: Send + Sync {
    async fn save(&self, state: &TransferState) -> Result<(), StoreError>;
    async fn load(&self, id: &Uuid) -> Result<Option<TransferState>, StoreError>;
    async fn list(&self) -> Result<Vec<TransferState>, StoreError>;
    async fn remove(&self, id: &Uuid) -> Result<(), StoreError>;
}

/// Volatile store for tests and dry runs.
#[derive(Clone, Default)]
pub struct MemoryStore {
    inner: Arc<DashMap<Uuid, TransferState>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.inner.len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.is_empty()
    }
}

#[async_trait]
impl TransferStore for MemoryStore {
    async fn save(&self, state: &TransferState) -> Result<(), StoreError> {
        self.inner.insert(state.id, state.clone());
        Ok(())
    }

    async fn load(&self, id: &Uuid) -> Result<Option<TransferState>, StoreError> {
        Ok(self.inner.get(id).map(|r| r.value().clone()))
    }

    async fn list(&self) -> Result<Vec<TransferState>, StoreError> {
        Ok(self.inner.iter().map(|r| r.value().clone()).collect())
    }

    async fn remove(&self, id: &Uuid) -> Result<(), StoreError> {
        self.inner.remove(id);
        Ok(())
    }
}

/// One JSON file per transfer under a data directory.
///
/// Writes go to `<id>.json.tmp`, are synced, and are renamed over
/// `<id>.json`, so a crash mid-write leaves the previous state intact.
#[derive(Debug, Clone)]
pub struct JsonFileStore {
    dir: PathBuf,
}

impl JsonFileStore {
    /// Open (and create if needed) the store directory.
    pub async fn open(dir: impl AsRef<Path>) -> Result<Self, StoreError> {
        let dir = dir.as_ref().to_path_buf();
        fs::create_dir_all(&dir).await?;
        tracing::info!(dir = %dir.display(), "Opened transfer store");
        Ok(Self { dir })
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn path_for(&self, id: &Uuid) -> PathBuf {
        self.dir.join(format!("{}.json", id))
    }

    async fn read(path: &Path) -> Result<TransferState, StoreError> {
        let bytes = fs::read(path).await?;
        Ok(serde_json::from_slice(&bytes)?)
    }
}

#[async_trait]
impl TransferStore for JsonFileStore {
    async fn save(&self, state: &TransferState) -> Result<(), StoreError> {
        let path = self.path_for(&state.id);
        let tmp = path.with_extension("json.tmp");
        let bytes = serde_json::to_vec_pretty(state)?;

        let mut file = fs::File::create(&tmp).await?;
        file.write_all(&bytes).await?;
        file.sync_all().await?;
        drop(file);
        fs::rename(&tmp, &path).await?;

        tracing::trace!(transfer_id = %state.id, phase = %state.phase, "Persisted transfer");
        Ok(())
    }

    async fn load(&self, id: &Uuid) -> Result<Option<TransferState>, StoreError> {
        match Self::read(&self.path_for(id)).await {
            Ok(state) => Ok(Some(state)),
            Err(StoreError::Io(e)) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e),
        }
    }

    async fn list(&self) -> Result<Vec<TransferState>, StoreError> {
        let mut states = Vec::new();
        let mut entries = fs::read_dir(&self.dir).await?;
        while let Some(entry) = entries.next_entry().await? {
            let path = entry.path();
            if path.extension().and_then(|e| e.to_str()) != Some("json") {
                continue;
            }
            match Self::read(&path).await {
                Ok(state) => states.push(state),
                Err(e) => {
                    tracing::warn!(path = %path.display(), error = %e, "Skipping unreadable transfer file");
                }
            }
        }
        states.sort_by_key(|s| s.created_at);
        Ok(states)
    }

    async fn remove(&self, id: &Uuid) -> Result<(), StoreError> {
        match fs::remove_file(self.path_for(id)).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::chain::amount::Amount;
    use crate::chain::types::Chain;
    use crate::transfer::types::{FeePayment, TransferPhase, TransferRequest};
    use alloy::primitives::Address;

    fn state() -> TransferState {
        TransferState::new(TransferRequest {
            amount: Amount::from(1_000_000),
            source_chain: Chain::P,
            destination_chain: Chain::C,
            account_index: 0,
            destination_address: Chain::C.format_address(Address::repeat_byte(9)),
            fee_payment: FeePayment::OnTop,
        })
    }

    #[tokio::test]
    async fn test_memory_store() {
        let store = MemoryStore::new();
        let mut s = state();
        store.save(&s).await.unwrap();
        s.transition(TransferPhase::Exporting);
        store.save(&s).await.unwrap();

        assert_eq!(store.len(), 1);
        assert_eq!(store.load(&s.id).await.unwrap().unwrap().phase, TransferPhase::Exporting);
        store.remove(&s.id).await.unwrap();
        assert!(store.load(&s.id).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_file_store_persists_across_instances() {
        let dir = tempfile::tempdir().unwrap();
        let mut s = state();
        s.transition(TransferPhase::AwaitingExportFinality);

        JsonFileStore::open(dir.path()).await.unwrap().save(&s).await.unwrap();

        let reopened = JsonFileStore::open(dir.path()).await.unwrap();
        let loaded = reopened.load(&s.id).await.unwrap().unwrap();
        assert_eq!(loaded, s);
        assert_eq!(reopened.list().await.unwrap().len(), 1);
        assert!(!dir.path().join(format!("{}.json.tmp", s.id)).exists());
    }

    #[tokio::test]
    async fn test_file_store_skips_garbage() {
        let dir = tempfile::tempdir().unwrap();
        let store = JsonFileStore::open(dir.path()).await.unwrap();
        std::fs::write(dir.path().join("broken.json"), "{not json").unwrap();
        std::fs::write(dir.path().join("notes.txt"), "ignored").unwrap();
        store.save(&state()).await.unwrap();

        assert_eq!(store.list().await.unwrap().len(), 1);
        assert!(store.load(&Uuid::new_v4()).await.unwrap().is_none());
        store.remove(&Uuid::new_v4()).await.unwrap();
    }
}
