//! Checkpoint persistence.
//!
//! The engine buffers completed [`Record`]s and flushes them through a
//! [`CheckpointStore`] so an interrupted run can pick up where it left off.
//! Two implementations ship with the crate:
//!
//! - [`SqliteStore`]: durable on-disk store backed by a SQLite database
//! - [`MemoryStore`]: in-process store for tests and throwaway runs

mod memory;
mod sqlite;

pub use memory::MemoryStore;
pub use sqlite::SqliteStore;

use std::collections::HashSet;

use async_trait::async_trait;

use crate::error::StoreError;
use crate::types::{Record, TaskId};

/// Storage backend for run checkpoints.
///
/// A store holds the durable set of completed tasks, the records their
/// extraction produced, and the fingerprint of the input those records came
/// from. The engine shares one store across a run behind an `Arc`, so
/// implementations take `&self` and handle their own locking.
#[async_trait]
pub trait CheckpointStore: Send + Sync {
    /// Open the store and prepare its schema.
    ///
    /// Runs during run setup, before any task is queued or any worker logs
    /// in. A failure here aborts the run. Opening an existing store keeps
    /// everything saved by earlier runs.
    async fn open(&self) -> Result<(), StoreError>;

    /// Ids of every record saved by earlier flushes.
    ///
    /// Used to skip already-completed tasks when resuming.
    async fn get_processed_items(&self) -> Result<HashSet<TaskId>, StoreError>;

    /// Durably persist a batch of completed records.
    ///
    /// Saving an id that already has a record replaces it, so re-running a
    /// task after a lost flush cannot produce duplicates. Implementations
    /// must not return `Ok` until the whole batch is durable.
    async fn save_items(&self, records: &[Record]) -> Result<(), StoreError>;

    /// Fingerprint of the input the saved records were produced from.
    ///
    /// `None` until [`store_fingerprint`](CheckpointStore::store_fingerprint)
    /// has run at least once.
    async fn load_fingerprint(&self) -> Result<Option<String>, StoreError>;

    /// Record the fingerprint of the current input.
    async fn store_fingerprint(&self, fingerprint: &str) -> Result<(), StoreError>;

    /// Release the underlying resources.
    ///
    /// The store is not used again after this returns.
    async fn close(&self);
}
