//! Reordering engine: the operations an API layer calls.
//!
//! Every mutating operation follows the same sequence: resolve the entity
//! and the scopes it touches, lock those scopes, resolve again under the
//! lock, plan the batch, and commit it through the coordinator. Reads made
//! under the lock are consistent with the commit that follows.

use crate::{
    config::EngineConfig,
    domain::{
        clamp::{check_in_range, clamp},
        plan, Board, BoardConfig, BoardId, BoardView, Card, CardId, CardPatch, Column, ColumnId,
        ColumnView, EntityKind, NewCard, PositionPolicy, Scope, ScopeChange,
    },
    error::{BoardError, Result},
    storage::PositionStore,
    transaction::{ScopeGuard, TransactionCoordinator},
};
use chrono::Utc;
use std::{collections::HashMap, future::Future, sync::Arc};
use tracing::{debug, info};


/// Attempts at locking before giving up on a scope that keeps changing
const MAX_LOCK_ATTEMPTS: usize = 8;

pub struct ReorderEngine {
    store: Arc<dyn PositionStore>,
    coordinator: TransactionCoordinator,
    policy: PositionPolicy,
}

impl ReorderEngine {
    pub fn new(store: Arc<dyn PositionStore>) -> Self {
        Self {
            store,
            coordinator: TransactionCoordinator::new(),
            policy: PositionPolicy::default(),
        }
    }

    pub fn with_policy(mut self, policy: PositionPolicy) -> Self {
        self.policy = policy;
        self
    }

    /// Opens the configured store, initializes it and seeds it if empty
    pub async fn open(config: &EngineConfig) -> Result<Self> {
        let engine = Self::new(config.storage.open_store()?).with_policy(config.positions);
        engine.initialize(config.seed.as_ref()).await?;
        Ok(engine)
    }

    pub fn store(&self) -> &dyn PositionStore {
        self.store.as_ref()
    }

    pub fn policy(&self) -> PositionPolicy {
        self.policy
    }

    /// Initializes the store and creates `seed` when it holds no boards
    pub async fn initialize(&self, seed: Option<&BoardConfig>) -> Result<()> {
        self.store.initialize().await?;

        let Some(seed) = seed else {
            return Ok(());
        };
        if !self.store.list_boards().await?.is_empty() {
            return Ok(());
        }

        let board = self.create_board(&seed.name).await?;
        for name in &seed.columns {
            self.create_column(board.id, name).await?;
        }
        info!(board_id = %board.id, columns = seed.columns.len(), "seeded default board");
        Ok(())
    }

    // ---------------------------------------------------------------------
    // Reads
    // ---------------------------------------------------------------------

    pub async fn board(&self, id: BoardId) -> Result<Board> {
        self.store
            .load_board(id)
            .await?
            .ok_or_else(|| BoardError::not_found(EntityKind::Board, id))
    }

    pub async fn boards(&self) -> Result<Vec<Board>> {
        self.store.list_boards().await
    }

    pub async fn column(&self, id: ColumnId) -> Result<Column> {
        self.store
            .load_column(id)
            .await?
            .ok_or_else(|| BoardError::not_found(EntityKind::Column, id))
    }

    /// Columns of a board in display order; empty for an unknown board
    pub async fn columns(&self, board_id: BoardId) -> Result<Vec<Column>> {
        self.store.list_columns(board_id).await
    }

    pub async fn card(&self, id: CardId) -> Result<Card> {
        self.store
            .load_card(id)
            .await?
            .ok_or_else(|| BoardError::not_found(EntityKind::Card, id))
    }

    /// Cards of a column in display order; empty for an unknown column
    pub async fn cards(&self, column_id: ColumnId) -> Result<Vec<Card>> {
        self.store.list_cards(column_id).await
    }

    /// Cards of a board whose title or labels contain `query`.
    /// A blank query returns every card of the board.
    pub async fn search_cards(&self, board_id: BoardId, query: &str) -> Result<Vec<Card>> {
        let query = query.trim();
        let query = (!query.is_empty()).then_some(query);
        self.store.list_board_cards(board_id, query).await
    }

    /// The whole board in display order
    pub async fn board_view(&self, board_id: BoardId) -> Result<BoardView> {
        let board = self.board(board_id).await?;
        let columns = self.store.list_columns(board_id).await?;

        let mut cards_by_column: HashMap<ColumnId, Vec<Card>> = HashMap::new();
        for card in self.store.list_board_cards(board_id, None).await? {
            cards_by_column.entry(card.column_id).or_default().push(card);
        }

        let columns = columns
            .into_iter()
            .map(|column| ColumnView {
                cards: cards_by_column.remove(&column.id).unwrap_or_default(),
                column,
            })
            .collect();

        Ok(BoardView { board, columns })
    }

    // ---------------------------------------------------------------------
    // Inserts
    // ---------------------------------------------------------------------

    pub async fn create_board(&self, name: &str) -> Result<Board> {
        let name = required_text("board name", name)?;
        let batch = plan::plan_insert_board(name, Utc::now());
        let receipt = self
            .coordinator
            .commit(self.store(), "create_board", &batch)
            .await?;

        let id = BoardId::new(inserted_id(receipt.first_inserted())?);
        info!(operation = "create_board", board_id = %id, "board created");
        self.board(id).await
    }

    /// Appends a column at the end of the board
    pub async fn create_column(&self, board_id: BoardId, name: &str) -> Result<Column> {
        let name = required_text("column name", name)?;
        let scope = Scope::Board(board_id);
        let _guard = self.coordinator.lock([scope]).await?;

        if self.store.load_board(board_id).await?.is_none() {
            return Err(BoardError::InvalidRequest(format!(
                "board {board_id} does not exist"
            )));
        }

        let max = self.store.max_position(scope).await?;
        let batch = plan::plan_insert_column(board_id, name, max, Utc::now());
        let receipt = self
            .coordinator
            .commit(self.store(), "create_column", &batch)
            .await?;

        let column = self
            .column(ColumnId::new(inserted_id(receipt.first_inserted())?))
            .await?;
        info!(
            operation = "create_column",
            board_id = %board_id,
            column_id = %column.id,
            position = column.position,
            "column created"
        );
        Ok(column)
    }

    /// Appends a card at the end of the column; the card takes the
    /// column's board
    pub async fn create_card(&self, column_id: ColumnId, card: NewCard) -> Result<Card> {
        let card = card.normalized();
        required_text("card title", &card.title)?;

        let scope = Scope::Column(column_id);
        let _guard = self.coordinator.lock([scope]).await?;

        let column = self.store.load_column(column_id).await?.ok_or_else(|| {
            BoardError::InvalidRequest(format!("column {column_id} does not exist"))
        })?;

        let max = self.store.max_position(scope).await?;
        let batch = plan::plan_insert_card(&column, card, max, Utc::now());
        let receipt = self
            .coordinator
            .commit(self.store(), "create_card", &batch)
            .await?;

        let card = self
            .card(CardId::new(inserted_id(receipt.first_inserted())?))
            .await?;
        info!(
            operation = "create_card",
            column_id = %column_id,
            card_id = %card.id,
            position = card.position,
            "card created"
        );
        Ok(card)
    }

    // ---------------------------------------------------------------------
    // Moves
    // ---------------------------------------------------------------------

    /// Moves a column to `to_position` among its board's columns
    pub async fn move_column(&self, id: ColumnId, to_position: i64) -> Result<Column> {
        let (_guard, column) = self
            .lock_resolved("move_column", || async move {
                let column = self.column(id).await?;
                let scopes = vec![column.parent_scope()];
                Ok::<_, BoardError>((column, scopes))
            })
            .await?;

        let max = self.store.max_position(column.parent_scope()).await?;
        let target = self.resolve_target(to_position, max, ScopeChange::Within)?;

        let Some(batch) = plan::plan_move_column(&column, target) else {
            debug!(operation = "move_column", column_id = %id, position = target, "no-op move");
            return Ok(column);
        };
        self.coordinator
            .commit(self.store(), "move_column", &batch)
            .await?;

        info!(
            operation = "move_column",
            column_id = %id,
            board_id = %column.board_id,
            from = column.position,
            to = target,
            "column moved"
        );
        self.column(id).await
    }

    /// Moves a card to `to_position`, inside its column when `to_column` is
    /// `None` or the card's own column, otherwise into `to_column`
    pub async fn move_card(
        &self,
        id: CardId,
        to_column: Option<ColumnId>,
        to_position: i64,
    ) -> Result<Card> {
        let (_guard, (card, destination)) = self
            .lock_resolved("move_card", || async move {
                let card = self.card(id).await?;
                let destination = match to_column {
                    Some(column_id) if column_id != card.column_id => Some(
                        self.store.load_column(column_id).await?.ok_or_else(|| {
                            BoardError::InvalidRequest(format!(
                                "destination column {column_id} does not exist"
                            ))
                        })?,
                    ),
                    _ => None,
                };

                let mut scopes = vec![card.parent_scope()];
                if let Some(destination) = &destination {
                    scopes.push(destination.scope());
                }
                Ok::<_, BoardError>(((card, destination), scopes))
            })
            .await?;

        match destination {
            None => self.move_card_within(card, to_position).await,
            Some(destination) => self.move_card_across(card, destination, to_position).await,
        }
    }

    async fn move_card_within(&self, card: Card, to_position: i64) -> Result<Card> {
        let max = self.store.max_position(card.parent_scope()).await?;
        let target = self.resolve_target(to_position, max, ScopeChange::Within)?;

        let Some(batch) = plan::plan_move_card_within(&card, target) else {
            debug!(operation = "move_card", card_id = %card.id, position = target, "no-op move");
            return Ok(card);
        };
        self.coordinator
            .commit(self.store(), "move_card", &batch)
            .await?;

        info!(
            operation = "move_card",
            card_id = %card.id,
            column_id = %card.column_id,
            from = card.position,
            to = target,
            "card moved"
        );
        self.card(card.id).await
    }

    async fn move_card_across(
        &self,
        card: Card,
        destination: Column,
        to_position: i64,
    ) -> Result<Card> {
        let max = self.store.max_position(destination.scope()).await?;
        let target = self.resolve_target(to_position, max, ScopeChange::Across)?;

        let batch = plan::plan_move_card_across(&card, &destination, target);
        self.coordinator
            .commit(self.store(), "move_card", &batch)
            .await?;

        info!(
            operation = "move_card",
            card_id = %card.id,
            from_column = %card.column_id,
            to_column = %destination.id,
            from = card.position,
            to = target,
            "card moved across columns"
        );
        self.card(card.id).await
    }

    // ---------------------------------------------------------------------
    // Deletes
    // ---------------------------------------------------------------------

    pub async fn delete_card(&self, id: CardId) -> Result<CardId> {
        let (_guard, card) = self
            .lock_resolved("delete_card", || async move {
                let card = self.card(id).await?;
                let scopes = vec![card.parent_scope()];
                Ok::<_, BoardError>((card, scopes))
            })
            .await?;

        let batch = plan::plan_delete_card(&card);
        self.coordinator
            .commit(self.store(), "delete_card", &batch)
            .await?;

        info!(
            operation = "delete_card",
            card_id = %id,
            column_id = %card.column_id,
            position = card.position,
            "card deleted"
        );
        Ok(id)
    }

    /// Deletes a column and its cards, closing the gap among its siblings
    pub async fn delete_column(&self, id: ColumnId) -> Result<ColumnId> {
        let (_guard, column) = self
            .lock_resolved("delete_column", || async move {
                let column = self.column(id).await?;
                let scopes = vec![column.parent_scope(), column.scope()];
                Ok::<_, BoardError>((column, scopes))
            })
            .await?;

        let batch = plan::plan_delete_column(&column);
        self.coordinator
            .commit(self.store(), "delete_column", &batch)
            .await?;

        info!(
            operation = "delete_column",
            column_id = %id,
            board_id = %column.board_id,
            position = column.position,
            "column deleted"
        );
        Ok(id)
    }

    /// Deletes a board with all of its columns and cards
    pub async fn delete_board(&self, id: BoardId) -> Result<BoardId> {
        let (_guard, (board, columns)) = self
            .lock_resolved("delete_board", || async move {
                let board = self.board(id).await?;
                let columns = self.store.list_columns(id).await?;
                let mut scopes = vec![board.scope()];
                scopes.extend(columns.iter().map(Column::scope));
                Ok::<_, BoardError>(((board, columns), scopes))
            })
            .await?;

        let batch = plan::plan_delete_board(&board);
        self.coordinator
            .commit(self.store(), "delete_board", &batch)
            .await?;

        info!(
            operation = "delete_board",
            board_id = %id,
            columns = columns.len(),
            "board deleted"
        );
        Ok(id)
    }

    // ---------------------------------------------------------------------
    // Attribute updates
    // ---------------------------------------------------------------------

    pub async fn rename_column(&self, id: ColumnId, name: &str) -> Result<Column> {
        let name = required_text("column name", name)?;
        self.column(id).await?;

        let batch = plan::plan_rename_column(id, name);
        self.coordinator
            .commit(self.store(), "rename_column", &batch)
            .await?;
        self.column(id).await
    }

    /// Updates a card's free-text attributes; positions are untouched
    pub async fn update_card(&self, id: CardId, patch: CardPatch) -> Result<Card> {
        if patch.is_empty() {
            return Err(BoardError::InvalidRequest("nothing to update".to_string()));
        }
        if let Some(title) = &patch.title {
            required_text("card title", title)?;
        }

        let card = self.card(id).await?;
        let batch = plan::plan_patch_card(&card, patch, Utc::now());
        self.coordinator
            .commit(self.store(), "update_card", &batch)
            .await?;
        self.card(id).await
    }

    // ---------------------------------------------------------------------
    // Helpers
    // ---------------------------------------------------------------------

    /// Normalizes a requested target according to the position policy
    fn resolve_target(&self, requested: i64, max: Option<i64>, change: ScopeChange) -> Result<i64> {
        match self.policy {
            PositionPolicy::Clamp => Ok(clamp(requested, max, change)),
            PositionPolicy::Strict => check_in_range(requested, max, change).ok_or_else(|| {
                BoardError::InvalidRequest(format!("position {requested} is out of range"))
            }),
        }
    }

    /// Resolves a value and the scopes it lives in, locks those scopes and
    /// resolves again under the lock. Retries while the scopes found under
    /// the lock are not the ones that were locked.
    async fn lock_resolved<T, F, Fut>(
        &self,
        operation: &'static str,
        mut resolve: F,
    ) -> Result<(ScopeGuard, T)>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<(T, Vec<Scope>)>>,
    {
        for attempt in 1..=MAX_LOCK_ATTEMPTS {
            let (_, scopes) = resolve().await?;
            let guard = self.coordinator.lock(scopes).await?;

            let (value, scopes) = resolve().await?;
            if scopes.iter().all(|scope| guard.covers(*scope)) {
                return Ok((guard, value));
            }
            debug!(operation, attempt, "scope changed while locking; retrying");
        }

        Err(BoardError::TransactionFailure {
            operation,
            reason: format!("scopes kept changing over {MAX_LOCK_ATTEMPTS} lock attempts"),
        })
    }
}

fn required_text<'a>(field: &str, value: &'a str) -> Result<&'a str> {
    let trimmed = value.trim();
    if trimmed.is_empty() {
        return Err(BoardError::InvalidRequest(format!("{field} is required")));
    }
    Ok(trimmed)
}

fn inserted_id(id: Option<i64>) -> Result<i64> {
    id.ok_or_else(|| BoardError::StorageError("commit returned no inserted id".to_string()))
}
