use crate::{
    domain::{
        Board, BoardId, BatchReceipt, Card, CardId, Column, ColumnId, Scope, WriteBatch,
    },
    error::Result,
};
use async_trait::async_trait;

#[cfg(feature = "file-storage")]
pub mod file_storage;

#[cfg(feature = "sqlite-storage")]
pub mod migrations;

#[cfg(feature = "sqlite-storage")]
pub mod sqlite_storage;

#[cfg(feature = "file-storage")]
pub use file_storage::FileStore;

#[cfg(feature = "sqlite-storage")]
pub use sqlite_storage::SqliteStore;

/// Durable record set for boards, columns and cards.
///
/// Reads return rows in display order. Writes only happen through
/// [`PositionStore::commit`], which applies a whole batch or nothing.
#[async_trait]
pub trait PositionStore: Send + Sync {
    /// Initializes the storage backend
    async fn initialize(&self) -> Result<()>;

    /// Checks whether the backend is ready for reads and writes
    async fn is_initialized(&self) -> bool;

    async fn load_board(&self, id: BoardId) -> Result<Option<Board>>;

    /// Lists all boards ordered by id
    async fn list_boards(&self) -> Result<Vec<Board>>;

    async fn load_column(&self, id: ColumnId) -> Result<Option<Column>>;

    /// Lists a board's columns ordered by position
    async fn list_columns(&self, board_id: BoardId) -> Result<Vec<Column>>;

    async fn load_card(&self, id: CardId) -> Result<Option<Card>>;

    /// Lists a column's cards ordered by position
    async fn list_cards(&self, column_id: ColumnId) -> Result<Vec<Card>>;

    /// Lists a board's cards ordered by column then position, optionally
    /// keeping only cards whose title or labels contain `query`
    /// (case-insensitive)
    async fn list_board_cards(&self, board_id: BoardId, query: Option<&str>) -> Result<Vec<Card>>;

    /// Largest position in `scope`, `None` when the scope is empty
    async fn max_position(&self, scope: Scope) -> Result<Option<i64>>;

    /// Applies every op of `batch` atomically.
    ///
    /// Before committing, the backend verifies that each scope the batch
    /// marked for checking is contiguous; a violation rolls the batch back.
    async fn commit(&self, batch: &WriteBatch) -> Result<BatchReceipt>;

    /// Positions of every sibling in `scope`, in display order
    async fn positions(&self, scope: Scope) -> Result<Vec<i64>> {
        let positions = match scope {
            Scope::Board(board_id) => self
                .list_columns(board_id)
                .await?
                .into_iter()
                .map(|column| column.position)
                .collect(),
            Scope::Column(column_id) => self
                .list_cards(column_id)
                .await?
                .into_iter()
                .map(|card| card.position)
                .collect(),
        };
        Ok(positions)
    }
}
