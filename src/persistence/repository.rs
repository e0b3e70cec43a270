//! Durable store contract consumed by the storage thread.

use async_trait::async_trait;
use uuid::Uuid;

use super::errors::StorageResult;
use crate::models::{AlarmSnapshot, SourceId, VitalRecord};
use crate::state_machine::AlarmState;

/// A value the durable store can hold
pub trait StoredRecord: Copy + Send + Sync + 'static {
    type Key: Ord + Copy + Send + Sync + std::fmt::Debug;

    /// Identity used for idempotent writes
    fn storage_key(&self) -> Self::Key;

    /// Timestamp range queries filter on
    fn recorded_at_ms(&self) -> i64;

    /// Timestamp retention ages from, `None` while the row must be kept
    fn retention_age_ms(&self) -> Option<i64>;

    /// Whether `self` should replace an already stored row with the same key
    fn supersedes(&self, stored: &Self) -> bool;
}

impl StoredRecord for VitalRecord {
    type Key = (SourceId, i64);

    fn storage_key(&self) -> Self::Key {
        (self.source_id(), self.timestamp_ms())
    }

    fn recorded_at_ms(&self) -> i64 {
        self.timestamp_ms()
    }

    fn retention_age_ms(&self) -> Option<i64> {
        Some(self.timestamp_ms())
    }

    fn supersedes(&self, _stored: &Self) -> bool {
        false
    }
}

impl StoredRecord for AlarmSnapshot {
    type Key = Uuid;

    fn storage_key(&self) -> Self::Key {
        self.alarm_id()
    }

    fn recorded_at_ms(&self) -> i64 {
        self.raised_at_ms()
    }

    /// Only resolved alarms age out, counted from their resolution
    fn retention_age_ms(&self) -> Option<i64> {
        (self.state() == AlarmState::Resolved).then(|| self.updated_at_ms())
    }

    fn supersedes(&self, stored: &Self) -> bool {
        self.revision() > stored.revision()
    }
}

/// Typed access to one table of the durable store
#[async_trait]
pub trait Repository<T: StoredRecord>: Send + Sync {
    async fn save(&self, item: &T) -> StorageResult<()>;

    /// Write all items atomically, returning how many rows changed.
    /// Rows already stored are skipped unless the new item supersedes them.
    async fn save_batch(&self, items: &[T]) -> StorageResult<u64>;

    /// Items recorded within `[start_ms, end_ms]`, oldest first
    async fn get_range(&self, start_ms: i64, end_ms: i64) -> StorageResult<Vec<T>>;

    /// Delete at most `batch_size` rows that aged past `cutoff_ms`
    async fn delete_older_than(&self, cutoff_ms: i64, batch_size: usize) -> StorageResult<u64>;

    /// Move rows that aged past `before_ms` into the archive table
    async fn archive(&self, before_ms: i64) -> StorageResult<u64>;

    async fn count(&self) -> StorageResult<u64>;
}

/// The whole durable store: both tables plus maintenance
#[async_trait]
pub trait DurableStore: Send + Sync + std::fmt::Debug {
    fn vitals(&self) -> &dyn Repository<VitalRecord>;

    fn alarms(&self) -> &dyn Repository<AlarmSnapshot>;

    async fn size_bytes(&self) -> StorageResult<u64>;

    /// Reclaim space freed by deletes
    async fn compact(&self) -> StorageResult<()>;

    async fn close(&self) -> StorageResult<()>;
}
