use thiserror::Error;

/// Failures reported by a durable store
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum StorageError {
    /// Lock contention, timeouts, pool exhaustion. Retried on the next cycle.
    #[error("Transient storage failure: {0}")]
    Transient(String),

    /// Disk full or size ceiling reached
    #[error("Storage exhausted: {0}")]
    Exhausted(String),

    #[error("Store is closed")]
    Closed,

    #[error("Schema setup failed: {0}")]
    Schema(String),

    /// A stored row could not be turned back into a record
    #[error("Corrupt stored row: {0}")]
    Decode(String),
}

impl StorageError {
    pub fn transient(msg: impl Into<String>) -> Self {
        Self::Transient(msg.into())
    }

    pub fn exhausted(msg: impl Into<String>) -> Self {
        Self::Exhausted(msg.into())
    }

    pub fn decode(msg: impl Into<String>) -> Self {
        Self::Decode(msg.into())
    }

    pub fn is_exhausted(&self) -> bool {
        matches!(self, Self::Exhausted(_))
    }

    /// Map a backend error onto the retry taxonomy
    #[cfg(feature = "sqlite")]
    pub fn classify(err: &sqlx::Error) -> Self {
        match err {
            sqlx::Error::Database(db) => {
                let message = db.message().to_string();
                // SQLITE_FULL is result code 13
                let code = db.code().unwrap_or_default();
                if code == "13" || message.contains("full") {
                    Self::Exhausted(message)
                } else {
                    Self::Transient(message)
                }
            }
            sqlx::Error::PoolClosed => Self::Closed,
            sqlx::Error::Decode(_) | sqlx::Error::ColumnDecode { .. } | sqlx::Error::ColumnNotFound(_) => {
                Self::Decode(err.to_string())
            }
            other => Self::Transient(other.to_string()),
        }
    }
}

#[cfg(feature = "sqlite")]
impl From<sqlx::Error> for StorageError {
    fn from(err: sqlx::Error) -> Self {
        Self::classify(&err)
    }
}

pub type StorageResult<T> = Result<T, StorageError>;
