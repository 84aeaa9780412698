//! Per-scope serialization and atomic commit of reorder batches.
//!
//! Every operation that reads a scope's positions and then writes shifts
//! back holds the lock of each scope it touches for the whole
//! read-then-write sequence. Locks are always taken in [`Scope`] order.

use crate::{
    domain::{BatchReceipt, Scope, WriteBatch},
    error::{BoardError, Result},
    storage::PositionStore,
};
use std::{
    collections::HashMap,
    sync::{Arc, Mutex},
    time::Instant,
};
use tokio::sync::{Mutex as AsyncMutex, OwnedMutexGuard};
use tracing::{debug, warn};

type ScopeLock = Arc<AsyncMutex<()>>;

/// Held locks for a set of scopes; released on drop
#[derive(Debug)]
pub struct ScopeGuard {
    scopes: Vec<Scope>,
    _guards: Vec<OwnedMutexGuard<()>>,
}

impl ScopeGuard {
    pub fn scopes(&self) -> &[Scope] {
        &self.scopes
    }

    /// Whether `scope` is covered by this guard
    pub fn covers(&self, scope: Scope) -> bool {
        self.scopes.binary_search(&scope).is_ok()
    }
}

#[derive(Debug, Default)]
pub struct TransactionCoordinator {
    locks: Mutex<HashMap<Scope, ScopeLock>>,
}

impl TransactionCoordinator {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock_for(&self, scope: Scope) -> Result<ScopeLock> {
        let mut locks = self
            .locks
            .lock()
            .map_err(|err| BoardError::StorageError(format!("scope lock table poisoned: {err}")))?;
        // Drop entries nobody holds or waits on.
        locks.retain(|_, lock| Arc::strong_count(lock) > 1);
        Ok(locks.entry(scope).or_default().clone())
    }

    /// Acquires the locks of `scopes` in ascending order.
    pub async fn lock(&self, scopes: impl IntoIterator<Item = Scope>) -> Result<ScopeGuard> {
        let mut scopes: Vec<Scope> = scopes.into_iter().collect();
        scopes.sort();
        scopes.dedup();

        let mut guards = Vec::with_capacity(scopes.len());
        for scope in &scopes {
            let lock = self.lock_for(*scope)?;
            guards.push(lock.lock_owned().await);
        }

        Ok(ScopeGuard {
            scopes,
            _guards: guards,
        })
    }

    /// Commits `batch` through `store` as one unit.
    ///
    /// The store has rolled the batch back by the time an error is returned.
    /// A row that vanished after it was resolved keeps its `NotFound`; every
    /// other failure is reported as `TransactionFailure`.
    pub async fn commit(
        &self,
        store: &dyn PositionStore,
        operation: &'static str,
        batch: &WriteBatch,
    ) -> Result<BatchReceipt> {
        let started_at = Instant::now();
        match store.commit(batch).await {
            Ok(receipt) => {
                debug!(
                    operation,
                    ops = batch.len(),
                    duration_ms = started_at.elapsed().as_millis() as u64,
                    "batch committed"
                );
                Ok(receipt)
            }
            Err(err) => {
                warn!(
                    operation,
                    ops = batch.len(),
                    error = %err,
                    "batch rolled back"
                );
                if err.is_not_found() {
                    return Err(err);
                }
                Err(BoardError::TransactionFailure {
                    operation,
                    reason: err.to_string(),
                })
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{BoardId, ColumnId};
    use std::time::Duration;

    #[tokio::test]
    async fn test_guard_sorts_and_dedups_scopes() {
        let coordinator = TransactionCoordinator::new();
        let column = Scope::Column(ColumnId::new(3));
        let board = Scope::Board(BoardId::new(8));

        let guard = coordinator.lock([column, board, column]).await.unwrap();
        assert_eq!(guard.scopes(), &[board, column]);
        assert!(guard.covers(column));
        assert!(!guard.covers(Scope::Column(ColumnId::new(4))));
    }

    #[tokio::test]
    async fn test_same_scope_is_serialized() {
        let coordinator = Arc::new(TransactionCoordinator::new());
        let scope = Scope::Column(ColumnId::new(1));

        let guard = coordinator.lock([scope]).await.unwrap();

        let waiter = {
            let coordinator = coordinator.clone();
            tokio::spawn(async move { coordinator.lock([scope]).await.map(|_| ()) })
        };
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(!waiter.is_finished());

        drop(guard);
        waiter.await.unwrap().unwrap();
    }

    #[tokio::test]
    async fn test_disjoint_scopes_do_not_block() {
        let coordinator = TransactionCoordinator::new();
        let _first = coordinator
            .lock([Scope::Column(ColumnId::new(1))])
            .await
            .unwrap();
        let second = tokio::time::timeout(
            Duration::from_millis(100),
            coordinator.lock([Scope::Column(ColumnId::new(2))]),
        )
        .await;
        assert!(second.is_ok());
    }

    #[tokio::test]
    async fn test_idle_locks_are_pruned() {
        let coordinator = TransactionCoordinator::new();
        for id in 0..10 {
            let _guard = coordinator
                .lock([Scope::Column(ColumnId::new(id))])
                .await
                .unwrap();
        }
        coordinator.lock_for(Scope::Board(BoardId::new(1))).unwrap();
        assert!(coordinator.locks.lock().unwrap().len() <= 1);
    }

    #[cfg(feature = "sqlite-storage")]
    mod commits {
        use super::*;
        use crate::{
            domain::{CardId, CardPatch, PositionRange, WriteOp},
            storage::SqliteStore,
        };
        use chrono::Utc;

        async fn store_with_columns(count: i64) -> (SqliteStore, BoardId) {
            let store = SqliteStore::open_in_memory().unwrap();
            let mut batch = WriteBatch::new();
            batch.push(WriteOp::InsertBoard {
                name: "Board".to_string(),
                created_at: Utc::now(),
            });
            let board_id = BoardId::new(store.commit(&batch).await.unwrap().inserted_ids[0]);

            let mut batch = WriteBatch::new();
            for position in 0..count {
                batch.push(WriteOp::InsertColumn {
                    board_id,
                    name: format!("Column {position}"),
                    position,
                    created_at: Utc::now(),
                });
            }
            store.commit(&batch).await.unwrap();
            (store, board_id)
        }

        #[tokio::test]
        async fn test_gap_surfaces_as_transaction_failure() {
            let (store, board_id) = store_with_columns(3).await;
            let coordinator = TransactionCoordinator::new();
            let scope = Scope::Board(board_id);

            let mut batch = WriteBatch::new();
            batch
                .push(WriteOp::Shift {
                    scope,
                    range: PositionRange::from(2),
                    delta: 1,
                })
                .check(scope);

            let err = coordinator
                .commit(&store, "move_column", &batch)
                .await
                .unwrap_err();
            match err {
                BoardError::TransactionFailure { operation, reason } => {
                    assert_eq!(operation, "move_column");
                    assert!(reason.contains("not contiguous"), "{reason}");
                }
                other => panic!("unexpected error: {other}"),
            }
            assert_eq!(store.positions(scope).await.unwrap(), vec![0, 1, 2]);
        }

        #[tokio::test]
        async fn test_vanished_row_keeps_not_found() {
            let (store, _) = store_with_columns(1).await;
            let coordinator = TransactionCoordinator::new();

            let mut batch = WriteBatch::new();
            batch.push(WriteOp::PatchCard {
                id: CardId::new(404),
                patch: CardPatch {
                    title: Some("Gone".to_string()),
                    ..CardPatch::default()
                },
                updated_at: Utc::now(),
            });

            let err = coordinator
                .commit(&store, "update_card", &batch)
                .await
                .unwrap_err();
            assert!(err.is_not_found(), "{err}");
        }
    }
}
