//! Heap-backed durable store for tests and demos, with fault injection.

use async_trait::async_trait;
use parking_lot::{Mutex, RwLock};
use std::collections::btree_map::Entry;
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;

use super::errors::{StorageError, StorageResult};
use super::repository::{DurableStore, Repository, StoredRecord};
use crate::models::{AlarmSnapshot, VitalRecord};

/// Approximate on-disk footprint used for size reporting
const VITAL_ROW_BYTES: u64 = 64;
const ALARM_ROW_BYTES: u64 = 160;

/// Failure the store should report for the next writes
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InjectedFault {
    Transient,
    Exhausted,
}

#[derive(Debug, Default)]
struct FaultInjector {
    pending: Mutex<Option<(InjectedFault, u32)>>,
}

impl FaultInjector {
    fn fail_next(&self, fault: InjectedFault, count: u32) {
        *self.pending.lock() = (count > 0).then_some((fault, count));
    }

    fn check(&self, operation: &str) -> StorageResult<()> {
        let mut pending = self.pending.lock();
        let Some((fault, remaining)) = pending.as_mut() else {
            return Ok(());
        };
        let fault = *fault;
        *remaining -= 1;
        if *remaining == 0 {
            *pending = None;
        }
        Err(match fault {
            InjectedFault::Transient => StorageError::transient(format!("injected failure during {operation}")),
            InjectedFault::Exhausted => StorageError::exhausted(format!("injected disk full during {operation}")),
        })
    }
}

/// One in-memory table
#[derive(Debug)]
pub struct InMemoryTable<T: StoredRecord> {
    rows: RwLock<BTreeMap<T::Key, T>>,
    archived: Mutex<Vec<T>>,
    batch_sizes: Mutex<Vec<usize>>,
    faults: Arc<FaultInjector>,
    closed: Arc<AtomicBool>,
}

impl<T: StoredRecord> InMemoryTable<T> {
    fn new(faults: Arc<FaultInjector>, closed: Arc<AtomicBool>) -> Self {
        Self {
            rows: RwLock::new(BTreeMap::new()),
            archived: Mutex::new(Vec::new()),
            batch_sizes: Mutex::new(Vec::new()),
            faults,
            closed,
        }
    }

    fn ensure_open(&self) -> StorageResult<()> {
        if self.closed.load(Ordering::Acquire) {
            return Err(StorageError::Closed);
        }
        Ok(())
    }

    /// Sizes of every successful `save_batch` call, in order
    pub fn batch_sizes(&self) -> Vec<usize> {
        self.batch_sizes.lock().clone()
    }

    pub fn archived(&self) -> Vec<T> {
        self.archived.lock().clone()
    }

    pub fn len(&self) -> usize {
        self.rows.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.read().is_empty()
    }

    pub fn get(&self, key: T::Key) -> Option<T> {
        self.rows.read().get(&key).copied()
    }

    fn aged_keys(rows: &BTreeMap<T::Key, T>, cutoff_ms: i64, limit: usize) -> Vec<T::Key> {
        rows.iter()
            .filter(|(_, row)| row.retention_age_ms().is_some_and(|age| age < cutoff_ms))
            .map(|(key, _)| *key)
            .take(limit)
            .collect()
    }
}

#[async_trait]
impl<T: StoredRecord> Repository<T> for InMemoryTable<T> {
    async fn save(&self, item: &T) -> StorageResult<()> {
        self.save_batch(std::slice::from_ref(item)).await.map(|_| ())
    }

    async fn save_batch(&self, items: &[T]) -> StorageResult<u64> {
        self.ensure_open()?;
        self.faults.check("save_batch")?;

        let mut rows = self.rows.write();
        let mut changed = 0;
        for item in items {
            match rows.entry(item.storage_key()) {
                Entry::Vacant(slot) => {
                    slot.insert(*item);
                    changed += 1;
                }
                Entry::Occupied(mut slot) => {
                    if item.supersedes(slot.get()) {
                        slot.insert(*item);
                        changed += 1;
                    }
                }
            }
        }
        drop(rows);

        self.batch_sizes.lock().push(items.len());
        Ok(changed)
    }

    async fn get_range(&self, start_ms: i64, end_ms: i64) -> StorageResult<Vec<T>> {
        self.ensure_open()?;
        let mut found: Vec<T> = self
            .rows
            .read()
            .values()
            .filter(|row| (start_ms..=end_ms).contains(&row.recorded_at_ms()))
            .copied()
            .collect();
        found.sort_by_key(|row| row.recorded_at_ms());
        Ok(found)
    }

    async fn delete_older_than(&self, cutoff_ms: i64, batch_size: usize) -> StorageResult<u64> {
        self.ensure_open()?;
        self.faults.check("delete_older_than")?;

        let mut rows = self.rows.write();
        let keys = Self::aged_keys(&rows, cutoff_ms, batch_size);
        for key in &keys {
            rows.remove(key);
        }
        Ok(keys.len() as u64)
    }

    async fn archive(&self, before_ms: i64) -> StorageResult<u64> {
        self.ensure_open()?;
        self.faults.check("archive")?;

        let mut rows = self.rows.write();
        let keys = Self::aged_keys(&rows, before_ms, usize::MAX);
        let mut archived = self.archived.lock();
        for key in &keys {
            if let Some(row) = rows.remove(key) {
                archived.push(row);
            }
        }
        Ok(keys.len() as u64)
    }

    async fn count(&self) -> StorageResult<u64> {
        self.ensure_open()?;
        Ok(self.rows.read().len() as u64)
    }
}

/// Durable store that keeps everything on the heap
#[derive(Debug)]
pub struct InMemoryStore {
    vitals: InMemoryTable<VitalRecord>,
    alarms: InMemoryTable<AlarmSnapshot>,
    faults: Arc<FaultInjector>,
    closed: Arc<AtomicBool>,
    reported_size: Mutex<Option<u64>>,
    compactions: AtomicU64,
}

impl Default for InMemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

impl InMemoryStore {
    pub fn new() -> Self {
        let faults = Arc::new(FaultInjector::default());
        let closed = Arc::new(AtomicBool::new(false));
        Self {
            vitals: InMemoryTable::new(Arc::clone(&faults), Arc::clone(&closed)),
            alarms: InMemoryTable::new(Arc::clone(&faults), Arc::clone(&closed)),
            faults,
            closed,
            reported_size: Mutex::new(None),
            compactions: AtomicU64::new(0),
        }
    }

    /// Make the next `count` write operations fail with `fault`
    pub fn fail_next_writes(&self, fault: InjectedFault, count: u32) {
        self.faults.fail_next(fault, count);
    }

    /// Override the size reported by `size_bytes`; `None` restores the estimate
    pub fn set_reported_size(&self, bytes: Option<u64>) {
        *self.reported_size.lock() = bytes;
    }

    pub fn vitals_table(&self) -> &InMemoryTable<VitalRecord> {
        &self.vitals
    }

    pub fn alarms_table(&self) -> &InMemoryTable<AlarmSnapshot> {
        &self.alarms
    }

    pub fn compaction_count(&self) -> u64 {
        self.compactions.load(Ordering::Relaxed)
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }
}

#[async_trait]
impl DurableStore for InMemoryStore {
    fn vitals(&self) -> &dyn Repository<VitalRecord> {
        &self.vitals
    }

    fn alarms(&self) -> &dyn Repository<AlarmSnapshot> {
        &self.alarms
    }

    async fn size_bytes(&self) -> StorageResult<u64> {
        if let Some(bytes) = *self.reported_size.lock() {
            return Ok(bytes);
        }
        Ok(self.vitals.len() as u64 * VITAL_ROW_BYTES + self.alarms.len() as u64 * ALARM_ROW_BYTES)
    }

    async fn compact(&self) -> StorageResult<()> {
        if self.is_closed() {
            return Err(StorageError::Closed);
        }
        self.compactions.fetch_add(1, Ordering::Relaxed);
        Ok(())
    }

    async fn close(&self) -> StorageResult<()> {
        self.closed.store(true, Ordering::Release);
        Ok(())
    }
}
