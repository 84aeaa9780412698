use crate::{
    domain::{
        check_contiguous, BatchReceipt, Board, BoardId, Card, CardId, Column, ColumnId,
        EntityKind, Scope, WriteBatch, WriteOp,
    },
    error::{BoardError, Result},
    storage::PositionStore,
};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tokio::{fs, sync::RwLock};
use tracing::{debug, info, warn};

/// Assigns `0..n` within each run of rows sharing a parent
fn renumber_sorted<T, P: PartialEq>(
    rows: &mut [T],
    parent: impl Fn(&T) -> P,
    position: impl Fn(&mut T) -> &mut i64,
) -> usize {
    let mut moved = 0;
    let mut current: Option<P> = None;
    let mut next = 0;
    for row in rows.iter_mut() {
        let row_parent = parent(&*row);
        if current.as_ref() != Some(&row_parent) {
            current = Some(row_parent);
            next = 0;
        }
        let slot = position(row);
        if *slot != next {
            *slot = next;
            moved += 1;
        }
        next += 1;
    }
    moved
}

/// Whole-store state persisted as one JSON document
#[derive(Debug, Clone, Serialize, Deserialize)]
struct Snapshot {
    next_board_id: i64,
    next_column_id: i64,
    next_card_id: i64,
    boards: Vec<Board>,
    columns: Vec<Column>,
    cards: Vec<Card>,
}

impl Default for Snapshot {
    fn default() -> Self {
        Self {
            next_board_id: 1,
            next_column_id: 1,
            next_card_id: 1,
            boards: Vec::new(),
            columns: Vec::new(),
            cards: Vec::new(),
        }
    }
}

impl Snapshot {
    fn column_mut(&mut self, id: ColumnId) -> Result<&mut Column> {
        self.columns
            .iter_mut()
            .find(|column| column.id == id)
            .ok_or_else(|| BoardError::not_found(EntityKind::Column, id))
    }

    fn card_mut(&mut self, id: CardId) -> Result<&mut Card> {
        self.cards
            .iter_mut()
            .find(|card| card.id == id)
            .ok_or_else(|| BoardError::not_found(EntityKind::Card, id))
    }

    fn positions(&self, scope: Scope) -> Vec<i64> {
        match scope {
            Scope::Board(board_id) => self
                .columns
                .iter()
                .filter(|column| column.board_id == board_id)
                .map(|column| column.position)
                .collect(),
            Scope::Column(column_id) => self
                .cards
                .iter()
                .filter(|card| card.column_id == column_id)
                .map(|card| card.position)
                .collect(),
        }
    }

    /// Renumbers every scope to `0..n` in stored order. Returns how many
    /// rows moved.
    fn renumber(&mut self) -> usize {
        self.columns
            .sort_by_key(|column| (column.board_id, column.position, column.id));
        self.cards
            .sort_by_key(|card| (card.column_id, card.position, card.id));

        let columns = renumber_sorted(
            &mut self.columns,
            |column| column.board_id,
            |column| &mut column.position,
        );
        let cards = renumber_sorted(
            &mut self.cards,
            |card| card.column_id,
            |card| &mut card.position,
        );
        columns + cards
    }

    /// Applies one op, returning the id of an inserted row
    fn apply(&mut self, op: &WriteOp) -> Result<Option<i64>> {
        match op {
            WriteOp::InsertBoard { name, created_at } => {
                let id = BoardId::new(self.next_board_id);
                self.next_board_id += 1;
                self.boards.push(Board {
                    id,
                    name: name.clone(),
                    created_at: *created_at,
                });
                return Ok(Some(id.get()));
            }
            WriteOp::InsertColumn {
                board_id,
                name,
                position,
                created_at,
            } => {
                if !self.boards.iter().any(|board| board.id == *board_id) {
                    return Err(BoardError::not_found(EntityKind::Board, *board_id));
                }
                let id = ColumnId::new(self.next_column_id);
                self.next_column_id += 1;
                self.columns.push(Column {
                    id,
                    board_id: *board_id,
                    name: name.clone(),
                    position: *position,
                    created_at: *created_at,
                });
                return Ok(Some(id.get()));
            }
            WriteOp::InsertCard {
                board_id,
                column_id,
                card,
                position,
                created_at,
            } => {
                if !self.columns.iter().any(|column| column.id == *column_id) {
                    return Err(BoardError::not_found(EntityKind::Column, *column_id));
                }
                let id = CardId::new(self.next_card_id);
                self.next_card_id += 1;
                self.cards.push(Card {
                    id,
                    board_id: *board_id,
                    column_id: *column_id,
                    title: card.title.clone(),
                    description: card.description.clone(),
                    labels: card.labels.clone(),
                    due_date: card.due_date,
                    position: *position,
                    created_at: *created_at,
                    updated_at: None,
                });
                return Ok(Some(id.get()));
            }
            WriteOp::Shift {
                scope,
                range,
                delta,
            } => match scope {
                Scope::Board(board_id) => self
                    .columns
                    .iter_mut()
                    .filter(|column| column.board_id == *board_id && range.contains(column.position))
                    .for_each(|column| column.position += delta),
                Scope::Column(column_id) => self
                    .cards
                    .iter_mut()
                    .filter(|card| card.column_id == *column_id && range.contains(card.position))
                    .for_each(|card| card.position += delta),
            },
            WriteOp::SetColumnPosition { id, position } => {
                self.column_mut(*id)?.position = *position;
            }
            WriteOp::PlaceCard {
                id,
                board_id,
                column_id,
                position,
            } => {
                let card = self.card_mut(*id)?;
                card.board_id = *board_id;
                card.column_id = *column_id;
                card.position = *position;
            }
            WriteOp::RenameColumn { id, name } => {
                self.column_mut(*id)?.name = name.clone();
            }
            WriteOp::PatchCard {
                id,
                patch,
                updated_at,
            } => {
                self.card_mut(*id)?.apply_patch(patch, *updated_at);
            }
            WriteOp::DeleteBoard { id } => {
                self.cards.retain(|card| card.board_id != *id);
                self.columns.retain(|column| column.board_id != *id);
                self.boards.retain(|board| board.id != *id);
            }
            WriteOp::DeleteColumn { id } => {
                self.cards.retain(|card| card.column_id != *id);
                self.columns.retain(|column| column.id != *id);
            }
            WriteOp::DeleteCard { id } => {
                self.cards.retain(|card| card.id != *id);
            }
        }
        Ok(None)
    }
}

/// File-based storage implementation.
///
/// The whole store lives in one JSON document that is loaded on
/// [`PositionStore::initialize`] and rewritten by every commit. A commit
/// works on a copy and only replaces the in-memory state once the new
/// document has been renamed into place.
pub struct FileStore {
    root_path: PathBuf,
    state: RwLock<Option<Snapshot>>,
}

impl FileStore {
    const STORE_DIR: &'static str = ".taskboard";
    const BOARD_FILE: &'static str = "board.json";
    const STAGING_FILE: &'static str = "board.json.tmp";

    /// Creates a new FileStore for the given project root
    pub fn new(project_root: impl AsRef<Path>) -> Self {
        Self {
            root_path: project_root.as_ref().join(Self::STORE_DIR),
            state: RwLock::new(None),
        }
    }

    fn board_file(&self) -> PathBuf {
        self.root_path.join(Self::BOARD_FILE)
    }

    fn staging_file(&self) -> PathBuf {
        self.root_path.join(Self::STAGING_FILE)
    }

    async fn ensure_directory_exists(&self, path: &Path) -> Result<()> {
        if !path.exists() {
            fs::create_dir_all(path).await?;
        }
        Ok(())
    }

    async fn persist(&self, snapshot: &Snapshot) -> Result<()> {
        let json = serde_json::to_string_pretty(snapshot)?;
        let staging = self.staging_file();
        fs::write(&staging, json).await?;
        fs::rename(&staging, self.board_file()).await?;
        Ok(())
    }

    async fn read<T>(&self, f: impl FnOnce(&Snapshot) -> T) -> Result<T> {
        let guard = self.state.read().await;
        let snapshot = guard.as_ref().ok_or(BoardError::StoreNotInitialized)?;
        Ok(f(snapshot))
    }
}

#[async_trait]
impl PositionStore for FileStore {
    async fn initialize(&self) -> Result<()> {
        let mut guard = self.state.write().await;
        if guard.is_some() {
            return Ok(());
        }

        self.ensure_directory_exists(&self.root_path).await?;

        let board_file = self.board_file();
        let snapshot = if board_file.exists() {
            let contents = fs::read_to_string(&board_file).await?;
            let mut snapshot: Snapshot = serde_json::from_str(&contents)?;
            let moved = snapshot.renumber();
            if moved > 0 {
                warn!(path = %board_file.display(), moved, "renumbered non-contiguous positions");
                self.persist(&snapshot).await?;
            }
            snapshot
        } else {
            let snapshot = Snapshot::default();
            self.persist(&snapshot).await?;
            snapshot
        };

        info!(
            path = %board_file.display(),
            boards = snapshot.boards.len(),
            columns = snapshot.columns.len(),
            cards = snapshot.cards.len(),
            "file store opened"
        );
        *guard = Some(snapshot);
        Ok(())
    }

    async fn is_initialized(&self) -> bool {
        self.state.read().await.is_some()
    }

    async fn load_board(&self, id: BoardId) -> Result<Option<Board>> {
        self.read(|snapshot| snapshot.boards.iter().find(|board| board.id == id).cloned())
            .await
    }

    async fn list_boards(&self) -> Result<Vec<Board>> {
        self.read(|snapshot| {
            let mut boards = snapshot.boards.clone();
            boards.sort_by_key(|board| board.id);
            boards
        })
        .await
    }

    async fn load_column(&self, id: ColumnId) -> Result<Option<Column>> {
        self.read(|snapshot| {
            snapshot
                .columns
                .iter()
                .find(|column| column.id == id)
                .cloned()
        })
        .await
    }

    async fn list_columns(&self, board_id: BoardId) -> Result<Vec<Column>> {
        self.read(|snapshot| {
            let mut columns: Vec<Column> = snapshot
                .columns
                .iter()
                .filter(|column| column.board_id == board_id)
                .cloned()
                .collect();
            columns.sort_by_key(|column| (column.position, column.id));
            columns
        })
        .await
    }

    async fn load_card(&self, id: CardId) -> Result<Option<Card>> {
        self.read(|snapshot| snapshot.cards.iter().find(|card| card.id == id).cloned())
            .await
    }

    async fn list_cards(&self, column_id: ColumnId) -> Result<Vec<Card>> {
        self.read(|snapshot| {
            let mut cards: Vec<Card> = snapshot
                .cards
                .iter()
                .filter(|card| card.column_id == column_id)
                .cloned()
                .collect();
            cards.sort_by_key(|card| (card.position, card.id));
            cards
        })
        .await
    }

    async fn list_board_cards(&self, board_id: BoardId, query: Option<&str>) -> Result<Vec<Card>> {
        self.read(|snapshot| {
            let mut cards: Vec<Card> = snapshot
                .cards
                .iter()
                .filter(|card| card.board_id == board_id)
                .filter(|card| query.map_or(true, |query| card.matches_query(query)))
                .cloned()
                .collect();
            cards.sort_by_key(|card| (card.column_id, card.position, card.id));
            cards
        })
        .await
    }

    async fn max_position(&self, scope: Scope) -> Result<Option<i64>> {
        self.read(|snapshot| snapshot.positions(scope).into_iter().max())
            .await
    }

    async fn commit(&self, batch: &WriteBatch) -> Result<BatchReceipt> {
        let mut guard = self.state.write().await;
        let mut snapshot = guard
            .as_ref()
            .ok_or(BoardError::StoreNotInitialized)?
            .clone();

        let mut receipt = BatchReceipt::default();
        for op in batch.ops() {
            if let Some(id) = snapshot.apply(op)? {
                receipt.inserted_ids.push(id);
            }
        }
        for scope in batch.checked_scopes() {
            check_contiguous(*scope, &snapshot.positions(*scope))?;
        }

        self.persist(&snapshot).await?;
        *guard = Some(snapshot);

        debug!(ops = batch.len(), "file store batch committed");
        Ok(receipt)
    }
}
