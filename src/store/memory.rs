//! In-memory checkpoint store.

use std::collections::{HashMap, HashSet};

use async_trait::async_trait;
use tokio::sync::Mutex;

use crate::error::StoreError;
use crate::store::CheckpointStore;
use crate::types::{Record, TaskId};

/// Checkpoint store that keeps everything in process memory.
///
/// Nothing survives the process, so resuming across restarts needs
/// [`SqliteStore`](crate::store::SqliteStore). Beyond throwaway runs this is
/// mainly a test fixture: it counts `save_items` calls and can be scripted
/// to fail the next saves, which exercises the engine's keep-and-retry
/// flush path.
#[derive(Debug, Default)]
pub struct MemoryStore {
    inner: Mutex<Inner>,
}

#[derive(Debug, Default)]
struct Inner {
    records: HashMap<TaskId, Record>,
    fingerprint: Option<String>,
    save_calls: u64,
    fail_next_saves: u32,
}

impl MemoryStore {
    /// Create an empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Fail the next `n` calls to `save_items` with a query error.
    pub async fn fail_next_saves(&self, n: u32) {
        self.inner.lock().await.fail_next_saves = n;
    }

    /// Number of times `save_items` has been called, failed calls included.
    pub async fn save_calls(&self) -> u64 {
        self.inner.lock().await.save_calls
    }

    /// Number of records currently held.
    pub async fn record_count(&self) -> usize {
        self.inner.lock().await.records.len()
    }

    /// Fetch a saved record by id.
    pub async fn get_record(&self, id: TaskId) -> Option<Record> {
        self.inner.lock().await.records.get(&id).cloned()
    }

    /// Seed the store with records as if an earlier run had saved them.
    ///
    /// Does not count against [`save_calls`](MemoryStore::save_calls).
    pub async fn preload(&self, records: impl IntoIterator<Item = Record>) {
        let mut inner = self.inner.lock().await;
        for record in records {
            inner.records.insert(record.id, record);
        }
    }
}

#[async_trait]
impl CheckpointStore for MemoryStore {
    async fn open(&self) -> Result<(), StoreError> {
        Ok(())
    }

    async fn get_processed_items(&self) -> Result<HashSet<TaskId>, StoreError> {
        Ok(self.inner.lock().await.records.keys().copied().collect())
    }

    async fn save_items(&self, records: &[Record]) -> Result<(), StoreError> {
        let mut inner = self.inner.lock().await;
        inner.save_calls += 1;
        if inner.fail_next_saves > 0 {
            inner.fail_next_saves -= 1;
            return Err(StoreError::QueryFailed("injected save failure".to_string()));
        }
        for record in records {
            inner.records.insert(record.id, record.clone());
        }
        Ok(())
    }

    async fn load_fingerprint(&self) -> Result<Option<String>, StoreError> {
        Ok(self.inner.lock().await.fingerprint.clone())
    }

    async fn store_fingerprint(&self, fingerprint: &str) -> Result<(), StoreError> {
        self.inner.lock().await.fingerprint = Some(fingerprint.to_string());
        Ok(())
    }

    async fn close(&self) {}
}
