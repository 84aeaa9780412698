use crate::domain::board::{BoardId, CardId, CardPatch, ColumnId, NewCard, Scope};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Inclusive range of positions; open-ended when `max` is `None`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PositionRange {
    pub min: i64,
    pub max: Option<i64>,
}

impl PositionRange {
    /// Positions in `[min, max]`
    pub fn between(min: i64, max: i64) -> Self {
        Self {
            min,
            max: Some(max),
        }
    }

    /// Positions `>= min`
    pub fn from(min: i64) -> Self {
        Self { min, max: None }
    }

    pub fn contains(&self, position: i64) -> bool {
        position >= self.min && self.max.map_or(true, |max| position <= max)
    }
}

/// One statement of a unit of work.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "op", rename_all = "snake_case")]
pub enum WriteOp {
    InsertBoard {
        name: String,
        created_at: DateTime<Utc>,
    },
    InsertColumn {
        board_id: BoardId,
        name: String,
        position: i64,
        created_at: DateTime<Utc>,
    },
    InsertCard {
        board_id: BoardId,
        column_id: ColumnId,
        card: NewCard,
        position: i64,
        created_at: DateTime<Utc>,
    },
    /// Adds `delta` to every sibling in `scope` whose position is in `range`.
    /// Applied as a single ranged update.
    Shift {
        scope: Scope,
        range: PositionRange,
        delta: i64,
    },
    SetColumnPosition {
        id: ColumnId,
        position: i64,
    },
    /// Reassigns a card's column, board and position together
    PlaceCard {
        id: CardId,
        board_id: BoardId,
        column_id: ColumnId,
        position: i64,
    },
    RenameColumn {
        id: ColumnId,
        name: String,
    },
    PatchCard {
        id: CardId,
        patch: CardPatch,
        updated_at: DateTime<Utc>,
    },
    /// Removes the board with its columns and cards
    DeleteBoard {
        id: BoardId,
    },
    /// Removes the column with its cards
    DeleteColumn {
        id: ColumnId,
    },
    DeleteCard {
        id: CardId,
    },
}

/// Ordered list of writes that commit together or not at all
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct WriteBatch {
    ops: Vec<WriteOp>,
    checked_scopes: Vec<Scope>,
}

impl WriteBatch {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, op: WriteOp) -> &mut Self {
        self.ops.push(op);
        self
    }

    /// Marks a scope whose contiguity must hold once the batch is applied
    pub fn check(&mut self, scope: Scope) -> &mut Self {
        if !self.checked_scopes.contains(&scope) {
            self.checked_scopes.push(scope);
        }
        self
    }

    pub fn ops(&self) -> &[WriteOp] {
        &self.ops
    }

    pub fn checked_scopes(&self) -> &[Scope] {
        &self.checked_scopes
    }

    pub fn is_empty(&self) -> bool {
        self.ops.is_empty()
    }

    pub fn len(&self) -> usize {
        self.ops.len()
    }
}

/// Result of a committed batch
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BatchReceipt {
    /// Ids assigned to inserted rows, in op order
    pub inserted_ids: Vec<i64>,
}

impl BatchReceipt {
    pub fn first_inserted(&self) -> Option<i64> {
        self.inserted_ids.first().copied()
    }
}
