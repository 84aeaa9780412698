use crate::{
    domain::board::Scope,
    error::{BoardError, Result},
};

/// Checks that `positions` are exactly `0..n` once sorted.
pub fn check_contiguous(scope: Scope, positions: &[i64]) -> Result<()> {
    let mut sorted = positions.to_vec();
    sorted.sort_unstable();

    let contiguous = sorted
        .iter()
        .enumerate()
        .all(|(index, &position)| position == index as i64);

    if contiguous {
        Ok(())
    } else {
        Err(BoardError::ContiguityViolation {
            scope,
            positions: sorted,
        })
    }
}

/// Position an appended sibling receives
pub fn append_position(max_existing: Option<i64>) -> i64 {
    max_existing.map_or(0, |max| max + 1)
}
