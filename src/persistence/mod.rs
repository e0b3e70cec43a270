//! # Persistence
//!
//! The non-critical half of the pipeline. Everything here runs on the
//! storage thread's current-thread tokio runtime and may block on I/O.
//!
//! - [`PersistenceScheduler`] drains the persistence channel and flushes
//!   batches on a time/count schedule
//! - [`RetentionService`] enforces retention windows and emergency cleanup
//! - [`DurableStore`] is the storage contract, implemented by
//!   [`InMemoryStore`] and (feature `sqlite`) [`SqliteStore`]

pub mod errors;
pub mod memory;
pub mod repository;
pub mod retention;
pub mod scheduler;
#[cfg(feature = "sqlite")]
pub mod sqlite;

pub use errors::{StorageError, StorageResult};
pub use memory::{InMemoryStore, InMemoryTable, InjectedFault};
pub use repository::{DurableStore, Repository, StoredRecord};
pub use retention::{RetentionReport, RetentionService};
pub use scheduler::{FlushReport, FlushTrigger, PersistenceItem, PersistenceScheduler};
#[cfg(feature = "sqlite")]
pub use sqlite::SqliteStore;

use std::sync::Arc;
use tracing::info;

use crate::config::{StorageBackend, StorageConfig};

/// Open the configured durable store
pub async fn open_store(config: &StorageConfig) -> StorageResult<Arc<dyn DurableStore>> {
    let store: Arc<dyn DurableStore> = match config.backend {
        StorageBackend::Memory => Arc::new(InMemoryStore::new()),
        #[cfg(feature = "sqlite")]
        StorageBackend::Sqlite => Arc::new(SqliteStore::connect(config).await?),
        #[cfg(not(feature = "sqlite"))]
        StorageBackend::Sqlite => {
            return Err(StorageError::Schema(
                "sqlite backend requested but the `sqlite` feature is disabled".to_string(),
            ))
        }
    };
    info!(backend = ?config.backend, "Durable store opened");
    Ok(store)
}
