use crate::domain::board::{EntityKind, Scope};
use thiserror::Error;

pub type Result<T> = std::result::Result<T, BoardError>;

#[derive(Debug, Error)]
pub enum BoardError {
    #[error("{kind} not found: {id}")]
    NotFound { kind: EntityKind, id: i64 },

    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    #[error("Transaction failed during {operation}: {reason}")]
    TransactionFailure {
        operation: &'static str,
        reason: String,
    },

    #[error("Positions in {scope} are not contiguous: {positions:?}")]
    ContiguityViolation { scope: Scope, positions: Vec<i64> },

    #[error("Store not initialized. Call initialize() first.")]
    StoreNotInitialized,

    #[error("Storage error: {0}")]
    StorageError(String),

    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    SerializationError(#[from] serde_json::Error),

    #[cfg(feature = "sqlite-storage")]
    #[error("SQLite error: {0}")]
    SqliteError(#[from] rusqlite::Error),

    #[error("Configuration error: {0}")]
    ConfigError(String),
}

impl BoardError {
    pub fn not_found(kind: EntityKind, id: impl Into<i64>) -> Self {
        Self::NotFound {
            kind,
            id: id.into(),
        }
    }

    /// True when the error reports a missing entity rather than a failure.
    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound { .. })
    }
}
