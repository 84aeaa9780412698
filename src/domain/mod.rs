pub mod batch;
pub mod board;
pub mod clamp;
pub mod ordering;
pub mod plan;

pub use batch::{BatchReceipt, PositionRange, WriteBatch, WriteOp};
pub use board::{
    Board, BoardConfig, BoardId, BoardView, Card, CardId, CardPatch, Column, ColumnId, ColumnView,
    EntityKind, NewCard, Scope,
};
pub use clamp::{clamp, PositionPolicy, ScopeChange};
pub use ordering::{append_position, check_contiguous};
