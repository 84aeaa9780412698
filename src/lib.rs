//! # Taskboard Core
//!
//! Ordering engine for kanban boards.
//!
//! Columns are ordered within their board and cards within their column.
//! Every scope keeps the positions `0..n` with no gaps and no duplicates:
//! moves shift only the range between the old and new slot, deletes close
//! the gap they leave, and inserts append. Each operation commits as one
//! batch, serialized per scope, against either a JSON file or SQLite.

pub mod config;
pub mod domain;
pub mod engine;
pub mod error;
pub mod logging;
pub mod storage;
pub mod transaction;

// Re-export commonly used types
pub use config::{EngineConfig, StorageConfig};
pub use domain::{
    Board, BoardConfig, BoardId, BoardView, Card, CardId, CardPatch, Column, ColumnId, ColumnView,
    EntityKind, NewCard, PositionPolicy, Scope, WriteBatch, WriteOp,
};
pub use engine::ReorderEngine;
pub use error::{BoardError, Result};
pub use logging::init_logging;
#[cfg(feature = "file-storage")]
pub use storage::FileStore;
pub use storage::PositionStore;
#[cfg(feature = "sqlite-storage")]
pub use storage::SqliteStore;
pub use transaction::TransactionCoordinator;
