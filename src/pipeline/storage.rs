//! The `vitals-storage` thread.
//!
//! Hosts a current-thread tokio runtime running the persistence scheduler
//! and the retention service side by side. Nothing on this thread can stall
//! the real-time loop: the only link between them is the persistence channel.

use crossbeam::channel as xchannel;
use std::sync::Arc;
use std::thread::JoinHandle;
use tokio::sync::watch;
use tracing::{error, info};

use crate::cache::VitalsCache;
use crate::channels::BoundedReceiver;
use crate::config::{PersistenceConfig, RetentionConfig, StorageConfig};
use crate::constants::threads;
use crate::error::{Result, VitalsError};
use crate::monitoring::HealthMonitor;
use crate::persistence::{
    open_store, DurableStore, FlushReport, PersistenceItem, PersistenceScheduler, RetentionService,
    StorageError,
};
use crate::utils::Clock;

/// Outcome of the storage thread: the final flush
pub type StorageOutcome = std::result::Result<FlushReport, StorageError>;

pub(crate) struct StorageParts {
    pub(crate) persistence: PersistenceConfig,
    pub(crate) retention: RetentionConfig,
    pub(crate) storage: StorageConfig,
    /// Injected store; when `None` the configured backend is opened
    pub(crate) store: Option<Arc<dyn DurableStore>>,
    pub(crate) receiver: BoundedReceiver<PersistenceItem>,
    pub(crate) cache: Arc<VitalsCache>,
    pub(crate) health: Arc<HealthMonitor>,
    pub(crate) clock: Arc<dyn Clock>,
    pub(crate) shutdown: watch::Receiver<bool>,
}

/// Spawn the storage thread and wait until its store is open. Fails if the
/// runtime cannot be built or the store cannot be opened.
pub(crate) fn spawn_storage(parts: StorageParts) -> Result<JoinHandle<StorageOutcome>> {
    let (ready_tx, ready_rx) = xchannel::bounded::<std::result::Result<(), StorageError>>(1);

    let handle = std::thread::Builder::new()
        .name(threads::STORAGE.to_string())
        .spawn(move || {
            let runtime = match tokio::runtime::Builder::new_current_thread()
                .enable_all()
                .build()
            {
                Ok(runtime) => runtime,
                Err(e) => {
                    let err = StorageError::Schema(format!("storage runtime: {e}"));
                    let _ = ready_tx.send(Err(err.clone()));
                    return Err(err);
                }
            };
            runtime.block_on(run_storage(parts, ready_tx))
        })
        .map_err(|e| VitalsError::Shutdown(format!("failed to spawn storage thread: {e}")))?;

    match ready_rx.recv() {
        Ok(Ok(())) => Ok(handle),
        Ok(Err(err)) => {
            let _ = handle.join();
            Err(err.into())
        }
        Err(_) => {
            let _ = handle.join();
            Err(VitalsError::Shutdown(
                "storage thread exited during startup".to_string(),
            ))
        }
    }
}

async fn run_storage(
    parts: StorageParts,
    ready: xchannel::Sender<std::result::Result<(), StorageError>>,
) -> StorageOutcome {
    let store = match parts.store {
        Some(store) => store,
        None => match open_store(&parts.storage).await {
            Ok(store) => store,
            Err(err) => {
                error!(error = %err, "Durable store could not be opened");
                let _ = ready.send(Err(err.clone()));
                return Err(err);
            }
        },
    };
    let _ = ready.send(Ok(()));

    let poll = parts.persistence.poll_interval();
    let scheduler = PersistenceScheduler::new(
        parts.persistence,
        parts.receiver,
        parts.cache,
        Arc::clone(&store),
        Arc::clone(&parts.health),
        Arc::clone(&parts.clock),
    );
    let retention = RetentionService::new(parts.retention, store, parts.health, parts.clock);

    // Retention stops first; the scheduler then runs its final flush and
    // closes the store
    let (flush_tx, flush_rx) = watch::channel(false);
    let shutdown = parts.shutdown;
    let retention_task = async move {
        retention.run(shutdown, poll).await;
        let _ = flush_tx.send(true);
    };

    let (outcome, ()) = tokio::join!(scheduler.run(flush_rx), retention_task);
    match &outcome {
        Ok(report) => info!(
            vitals = report.vitals_written,
            alarms = report.alarms_written,
            "Storage thread finished"
        ),
        Err(err) => error!(error = %err, "Final flush failed"),
    }
    outcome
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::channels::{bounded, OverflowPolicy};
    use crate::config::{ChannelConfig, MonitorConfig, StorageBackend};
    use crate::constants::channels;
    use crate::models::{SourceId, VitalRecord};
    use crate::persistence::InMemoryStore;
    use crate::utils::SystemClock;

    #[test]
    fn test_storage_thread_flushes_on_shutdown() {
        let config = MonitorConfig::default();
        let store = Arc::new(InMemoryStore::new());
        let cache = Arc::new(VitalsCache::new(16, 2));
        let (tx, rx) = bounded(channels::PERSISTENCE, ChannelConfig::new(16, OverflowPolicy::DropOldest));
        let (shutdown_tx, shutdown_rx) = watch::channel(false);

        let handle = spawn_storage(StorageParts {
            persistence: config.persistence.clone(),
            retention: config.retention.clone(),
            storage: config.storage.clone(),
            store: Some(store.clone()),
            receiver: rx,
            cache: Arc::clone(&cache),
            health: Arc::new(HealthMonitor::new()),
            clock: Arc::new(SystemClock),
            shutdown: shutdown_rx,
        })
        .unwrap();

        for ts in 1..=3 {
            let record = VitalRecord::measured(SourceId(1), ts, 70.0, 98.0, 14.0);
            assert!(cache.append(record));
            tx.send(PersistenceItem::Vital(record)).unwrap();
        }
        shutdown_tx.send(true).unwrap();

        let report = handle.join().unwrap().unwrap();
        assert_eq!(report.vitals_written, 3);
        assert!(store.is_closed());
        assert_eq!(store.vitals_table().len(), 3);
    }

    #[test]
    fn test_memory_backend_opens_without_injection() {
        let mut config = MonitorConfig::default();
        config.storage.backend = StorageBackend::Memory;
        let (_tx, rx) = bounded(channels::PERSISTENCE, ChannelConfig::new(4, OverflowPolicy::DropOldest));
        let (shutdown_tx, shutdown_rx) = watch::channel(false);

        let handle = spawn_storage(StorageParts {
            persistence: config.persistence.clone(),
            retention: config.retention.clone(),
            storage: config.storage.clone(),
            store: None,
            receiver: rx,
            cache: Arc::new(VitalsCache::new(4, 1)),
            health: Arc::new(HealthMonitor::new()),
            clock: Arc::new(SystemClock),
            shutdown: shutdown_rx,
        })
        .unwrap();

        shutdown_tx.send(true).unwrap();
        let report = handle.join().unwrap().unwrap();
        assert_eq!(report.vitals_written, 0);
    }
}
