//! Normalization of requested target positions.
//!
//! Any drop point a drag gesture produces is valid: negative targets land at
//! the start of the scope and overflowing targets land at its end.

use serde::{Deserialize, Serialize};

/// Whether a move keeps the entity in its current scope
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScopeChange {
    /// The entity already occupies one slot of the scope
    Within,
    /// The entity is inserted into a scope it is not part of yet
    Across,
}

/// How out-of-range target positions are handled
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PositionPolicy {
    /// Silently clamp into range
    #[default]
    Clamp,
    /// Reject with `InvalidRequest`
    Strict,
}

/// Highest valid target for a scope whose largest position is `max_existing`.
///
/// `max_existing` is `None` for an empty scope.
pub fn upper_bound(max_existing: Option<i64>, change: ScopeChange) -> i64 {
    match (max_existing, change) {
        (Some(max), ScopeChange::Within) => max,
        (Some(max), ScopeChange::Across) => max + 1,
        (None, _) => 0,
    }
}

/// Clamps `requested` into `[0, upper_bound]`.
pub fn clamp(requested: i64, max_existing: Option<i64>, change: ScopeChange) -> i64 {
    requested.clamp(0, upper_bound(max_existing, change))
}

/// Returns `requested` unchanged when it is in range, `None` otherwise.
pub fn check_in_range(requested: i64, max_existing: Option<i64>, change: ScopeChange) -> Option<i64> {
    (0..=upper_bound(max_existing, change))
        .contains(&requested)
        .then_some(requested)
}
