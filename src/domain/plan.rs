//! Pure planning of position bookkeeping.
//!
//! Each function turns an entity's current placement and an already-clamped
//! target into the batch that moves it there. Batches close the gap the
//! entity leaves behind and open the slot it lands in with ranged shifts,
//! so siblings are never rewritten one by one.

use crate::domain::{
    batch::{PositionRange, WriteBatch, WriteOp},
    board::{Board, BoardId, Card, CardPatch, Column, ColumnId, NewCard, Scope},
    ordering::append_position,
};
use chrono::{DateTime, Utc};

/// Shift that makes room for a sibling moving from `current` to `target`
/// inside `scope`. `None` when the sibling does not move.
pub fn within_scope_shift(scope: Scope, current: i64, target: i64) -> Option<WriteOp> {
    if target > current {
        Some(WriteOp::Shift {
            scope,
            range: PositionRange::between(current + 1, target),
            delta: -1,
        })
    } else if target < current {
        Some(WriteOp::Shift {
            scope,
            range: PositionRange::between(target, current - 1),
            delta: 1,
        })
    } else {
        None
    }
}

/// Shift closing the gap a sibling at `position` leaves in `scope`
pub fn close_gap(scope: Scope, position: i64) -> WriteOp {
    WriteOp::Shift {
        scope,
        range: PositionRange::from(position + 1),
        delta: -1,
    }
}

/// Shift opening a slot at `position` in `scope`
pub fn open_slot(scope: Scope, position: i64) -> WriteOp {
    WriteOp::Shift {
        scope,
        range: PositionRange::from(position),
        delta: 1,
    }
}

pub fn plan_move_column(column: &Column, target: i64) -> Option<WriteBatch> {
    let shift = within_scope_shift(column.parent_scope(), column.position, target)?;

    let mut batch = WriteBatch::new();
    batch
        .push(shift)
        .push(WriteOp::SetColumnPosition {
            id: column.id,
            position: target,
        })
        .check(column.parent_scope());
    Some(batch)
}

pub fn plan_move_card_within(card: &Card, target: i64) -> Option<WriteBatch> {
    let shift = within_scope_shift(card.parent_scope(), card.position, target)?;

    let mut batch = WriteBatch::new();
    batch
        .push(shift)
        .push(WriteOp::PlaceCard {
            id: card.id,
            board_id: card.board_id,
            column_id: card.column_id,
            position: target,
        })
        .check(card.parent_scope());
    Some(batch)
}

/// Moves a card into `destination`, taking the destination's board.
///
/// The two shifts touch disjoint row sets, so their order does not matter.
pub fn plan_move_card_across(card: &Card, destination: &Column, target: i64) -> WriteBatch {
    let mut batch = WriteBatch::new();
    batch
        .push(close_gap(card.parent_scope(), card.position))
        .push(open_slot(destination.scope(), target))
        .push(WriteOp::PlaceCard {
            id: card.id,
            board_id: destination.board_id,
            column_id: destination.id,
            position: target,
        })
        .check(card.parent_scope())
        .check(destination.scope());
    batch
}

pub fn plan_delete_card(card: &Card) -> WriteBatch {
    let mut batch = WriteBatch::new();
    batch
        .push(WriteOp::DeleteCard { id: card.id })
        .push(close_gap(card.parent_scope(), card.position))
        .check(card.parent_scope());
    batch
}

/// Deletes a column with its cards and closes the gap among its siblings
pub fn plan_delete_column(column: &Column) -> WriteBatch {
    let mut batch = WriteBatch::new();
    batch
        .push(WriteOp::DeleteColumn { id: column.id })
        .push(close_gap(column.parent_scope(), column.position))
        .check(column.parent_scope());
    batch
}

/// Boards are not positioned, so deleting one needs no shift
pub fn plan_delete_board(board: &Board) -> WriteBatch {
    let mut batch = WriteBatch::new();
    batch.push(WriteOp::DeleteBoard { id: board.id });
    batch
}

pub fn plan_insert_board(name: &str, now: DateTime<Utc>) -> WriteBatch {
    let mut batch = WriteBatch::new();
    batch.push(WriteOp::InsertBoard {
        name: name.to_string(),
        created_at: now,
    });
    batch
}

pub fn plan_insert_column(
    board_id: BoardId,
    name: &str,
    max_existing: Option<i64>,
    now: DateTime<Utc>,
) -> WriteBatch {
    let mut batch = WriteBatch::new();
    batch
        .push(WriteOp::InsertColumn {
            board_id,
            name: name.to_string(),
            position: append_position(max_existing),
            created_at: now,
        })
        .check(Scope::Board(board_id));
    batch
}

pub fn plan_insert_card(
    column: &Column,
    card: NewCard,
    max_existing: Option<i64>,
    now: DateTime<Utc>,
) -> WriteBatch {
    let mut batch = WriteBatch::new();
    batch
        .push(WriteOp::InsertCard {
            board_id: column.board_id,
            column_id: column.id,
            card,
            position: append_position(max_existing),
            created_at: now,
        })
        .check(column.scope());
    batch
}

pub fn plan_rename_column(id: ColumnId, name: &str) -> WriteBatch {
    let mut batch = WriteBatch::new();
    batch.push(WriteOp::RenameColumn {
        id,
        name: name.to_string(),
    });
    batch
}

pub fn plan_patch_card(card: &Card, patch: CardPatch, now: DateTime<Utc>) -> WriteBatch {
    let mut batch = WriteBatch::new();
    batch.push(WriteOp::PatchCard {
        id: card.id,
        patch,
        updated_at: now,
    });
    batch
}
