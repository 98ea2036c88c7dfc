use thiserror::Error;

#[derive(Debug, Error)]
pub enum Error {
    #[error("unsupported event kind: {0}")]
    ClassificationRejected(u16),
    #[error("ephemeral store is closed")]
    StoreClosed,
    #[error("persistent store is not initialized")]
    NotInitialized,
    #[error("created_at out of range: {0}")]
    TimestampOutOfRange(u64),
    #[error("ring capacity must be greater than zero")]
    InvalidCapacity,
    #[error("sqlite error: {0}")]
    Sqlite(#[from] rusqlite::Error),
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("serde json error: {0}")]
    Json(#[from] serde_json::Error),
    #[error("blocking task failed: {0}")]
    Join(#[from] tokio::task::JoinError),
    #[error("mutex poisoned")]
    MutexPoisoned,
}

impl Error {
    /// True for I/O-level failures that may succeed on redelivery, as opposed
    /// to a backend that is closed or was never opened.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            Error::Sqlite(_) | Error::Io(_) | Error::Join(_) | Error::MutexPoisoned
        )
    }
}
