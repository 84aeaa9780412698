use crate::{
    domain::{
        board::{join_labels, parse_labels},
        check_contiguous, BatchReceipt, Board, BoardId, Card, CardId, Column, ColumnId,
        EntityKind, Scope, WriteBatch, WriteOp,
    },
    error::{BoardError, Result},
    storage::{migrations::apply_migrations, PositionStore},
};
use async_trait::async_trait;
use rusqlite::{params, Connection, OptionalExtension, Row, TransactionBehavior};
use std::{
    path::Path,
    sync::{Mutex, MutexGuard},
    time::{Duration, Instant},
};
use tracing::{debug, error, info};

const BOARD_COLUMNS: &str = "id, name, created_at";
const COLUMN_COLUMNS: &str = "id, board_id, name, position, created_at";
const CARD_COLUMNS: &str = "id, board_id, column_id, title, description, labels, due_date, \
                            position, created_at, updated_at";

/// SQLite-based storage backend.
///
/// Every identifier is bound as a statement parameter. Commits run in an
/// IMMEDIATE transaction so the write lock is taken before the first read.
pub struct SqliteStore {
    conn: Mutex<Connection>,
}

impl SqliteStore {
    /// Opens (or creates) a database file and applies pending migrations.
    ///
    /// Upgrading a database from an older schema version renumbers every
    /// scope to `0..n` in its stored order, so gaps left by earlier writers
    /// do not block later appends.
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let started_at = Instant::now();

        let result = Connection::open(path)
            .map_err(BoardError::from)
            .and_then(|mut conn| {
                conn.query_row("PRAGMA journal_mode = WAL;", [], |row| {
                    row.get::<_, String>(0)
                })?;
                bootstrap_connection(&mut conn)?;
                Ok(conn)
            });
        Self::finish_open(result, "file", started_at)
    }

    /// Creates an in-memory database
    pub fn open_in_memory() -> Result<Self> {
        let started_at = Instant::now();
        let result = Connection::open_in_memory()
            .map_err(BoardError::from)
            .and_then(|mut conn| {
                bootstrap_connection(&mut conn)?;
                Ok(conn)
            });
        Self::finish_open(result, "memory", started_at)
    }

    fn finish_open(
        result: Result<Connection>,
        mode: &'static str,
        started_at: Instant,
    ) -> Result<Self> {
        let duration_ms = started_at.elapsed().as_millis() as u64;
        match result {
            Ok(conn) => {
                info!(mode, duration_ms, "sqlite store opened");
                Ok(Self {
                    conn: Mutex::new(conn),
                })
            }
            Err(err) => {
                error!(mode, duration_ms, error = %err, "sqlite store failed to open");
                Err(err)
            }
        }
    }

    fn connection(&self) -> Result<MutexGuard<'_, Connection>> {
        self.conn
            .lock()
            .map_err(|err| BoardError::StorageError(format!("connection lock poisoned: {err}")))
    }
}

fn bootstrap_connection(conn: &mut Connection) -> Result<()> {
    conn.execute_batch("PRAGMA foreign_keys = ON;")?;
    conn.busy_timeout(Duration::from_secs(5))?;
    apply_migrations(conn)?;
    Ok(())
}

fn board_from_row(row: &Row<'_>) -> rusqlite::Result<Board> {
    Ok(Board {
        id: BoardId::new(row.get("id")?),
        name: row.get("name")?,
        created_at: row.get("created_at")?,
    })
}

fn column_from_row(row: &Row<'_>) -> rusqlite::Result<Column> {
    Ok(Column {
        id: ColumnId::new(row.get("id")?),
        board_id: BoardId::new(row.get("board_id")?),
        name: row.get("name")?,
        position: row.get("position")?,
        created_at: row.get("created_at")?,
    })
}

fn card_from_row(row: &Row<'_>) -> rusqlite::Result<Card> {
    let labels: Option<String> = row.get("labels")?;
    Ok(Card {
        id: CardId::new(row.get("id")?),
        board_id: BoardId::new(row.get("board_id")?),
        column_id: ColumnId::new(row.get("column_id")?),
        title: row.get("title")?,
        description: row.get("description")?,
        labels: parse_labels(labels.as_deref()),
        due_date: row.get("due_date")?,
        position: row.get("position")?,
        created_at: row.get("created_at")?,
        updated_at: row.get("updated_at")?,
    })
}

fn query_card(conn: &Connection, id: CardId) -> Result<Option<Card>> {
    let card = conn
        .query_row(
            &format!("SELECT {CARD_COLUMNS} FROM cards WHERE id = ?1;"),
            [id.get()],
            card_from_row,
        )
        .optional()?;
    Ok(card)
}

fn scope_positions(conn: &Connection, scope: Scope) -> Result<Vec<i64>> {
    let (sql, parent) = match scope {
        Scope::Board(id) => (
            "SELECT position FROM columns WHERE board_id = ?1 ORDER BY position ASC;",
            id.get(),
        ),
        Scope::Column(id) => (
            "SELECT position FROM cards WHERE column_id = ?1 ORDER BY position ASC;",
            id.get(),
        ),
    };
    let mut stmt = conn.prepare(sql)?;
    let positions = stmt
        .query_map([parent], |row| row.get::<_, i64>(0))?
        .collect::<rusqlite::Result<Vec<_>>>()?;
    Ok(positions)
}

fn expect_row(changed: usize, kind: EntityKind, id: impl Into<i64>) -> Result<()> {
    if changed == 0 {
        return Err(BoardError::not_found(kind, id));
    }
    Ok(())
}

/// Applies one op, returning the id of an inserted row
fn apply_op(conn: &Connection, op: &WriteOp) -> Result<Option<i64>> {
    match op {
        WriteOp::InsertBoard { name, created_at } => {
            conn.execute(
                "INSERT INTO boards (name, created_at) VALUES (?1, ?2);",
                params![name, created_at],
            )?;
            return Ok(Some(conn.last_insert_rowid()));
        }
        WriteOp::InsertColumn {
            board_id,
            name,
            position,
            created_at,
        } => {
            conn.execute(
                "INSERT INTO columns (board_id, name, position, created_at)
                 VALUES (?1, ?2, ?3, ?4);",
                params![board_id.get(), name, position, created_at],
            )?;
            return Ok(Some(conn.last_insert_rowid()));
        }
        WriteOp::InsertCard {
            board_id,
            column_id,
            card,
            position,
            created_at,
        } => {
            conn.execute(
                "INSERT INTO cards (
                    board_id, column_id, title, description, labels, due_date, position, created_at
                 ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8);",
                params![
                    board_id.get(),
                    column_id.get(),
                    card.title,
                    card.description,
                    join_labels(&card.labels),
                    card.due_date,
                    position,
                    created_at,
                ],
            )?;
            return Ok(Some(conn.last_insert_rowid()));
        }
        WriteOp::Shift {
            scope,
            range,
            delta,
        } => {
            let (sql, parent) = match scope {
                Scope::Board(id) => (
                    "UPDATE columns SET position = position + ?1
                     WHERE board_id = ?2 AND position >= ?3 AND (?4 IS NULL OR position <= ?4);",
                    id.get(),
                ),
                Scope::Column(id) => (
                    "UPDATE cards SET position = position + ?1
                     WHERE column_id = ?2 AND position >= ?3 AND (?4 IS NULL OR position <= ?4);",
                    id.get(),
                ),
            };
            conn.execute(sql, params![delta, parent, range.min, range.max])?;
        }
        WriteOp::SetColumnPosition { id, position } => {
            let changed = conn.execute(
                "UPDATE columns SET position = ?2 WHERE id = ?1;",
                params![id.get(), position],
            )?;
            expect_row(changed, EntityKind::Column, *id)?;
        }
        WriteOp::PlaceCard {
            id,
            board_id,
            column_id,
            position,
        } => {
            let changed = conn.execute(
                "UPDATE cards SET board_id = ?2, column_id = ?3, position = ?4 WHERE id = ?1;",
                params![id.get(), board_id.get(), column_id.get(), position],
            )?;
            expect_row(changed, EntityKind::Card, *id)?;
        }
        WriteOp::RenameColumn { id, name } => {
            let changed = conn.execute(
                "UPDATE columns SET name = ?2 WHERE id = ?1;",
                params![id.get(), name],
            )?;
            expect_row(changed, EntityKind::Column, *id)?;
        }
        WriteOp::PatchCard {
            id,
            patch,
            updated_at,
        } => {
            let mut card =
                query_card(conn, *id)?.ok_or_else(|| BoardError::not_found(EntityKind::Card, *id))?;
            card.apply_patch(patch, *updated_at);
            conn.execute(
                "UPDATE cards
                 SET title = ?2, description = ?3, labels = ?4, due_date = ?5, updated_at = ?6
                 WHERE id = ?1;",
                params![
                    id.get(),
                    card.title,
                    card.description,
                    join_labels(&card.labels),
                    card.due_date,
                    card.updated_at,
                ],
            )?;
        }
        WriteOp::DeleteBoard { id } => {
            conn.execute("DELETE FROM cards WHERE board_id = ?1;", [id.get()])?;
            conn.execute("DELETE FROM columns WHERE board_id = ?1;", [id.get()])?;
            conn.execute("DELETE FROM boards WHERE id = ?1;", [id.get()])?;
        }
        WriteOp::DeleteColumn { id } => {
            conn.execute("DELETE FROM cards WHERE column_id = ?1;", [id.get()])?;
            conn.execute("DELETE FROM columns WHERE id = ?1;", [id.get()])?;
        }
        WriteOp::DeleteCard { id } => {
            conn.execute("DELETE FROM cards WHERE id = ?1;", [id.get()])?;
        }
    }
    Ok(None)
}

#[async_trait]
impl PositionStore for SqliteStore {
    async fn initialize(&self) -> Result<()> {
        // Migrations already ran when the connection was opened.
        let conn = self.connection()?;
        conn.query_row("SELECT COUNT(*) FROM boards;", [], |row| row.get::<_, i64>(0))?;
        Ok(())
    }

    async fn is_initialized(&self) -> bool {
        true
    }

    async fn load_board(&self, id: BoardId) -> Result<Option<Board>> {
        let conn = self.connection()?;
        let board = conn
            .query_row(
                &format!("SELECT {BOARD_COLUMNS} FROM boards WHERE id = ?1;"),
                [id.get()],
                board_from_row,
            )
            .optional()?;
        Ok(board)
    }

    async fn list_boards(&self) -> Result<Vec<Board>> {
        let conn = self.connection()?;
        let mut stmt = conn.prepare(&format!(
            "SELECT {BOARD_COLUMNS} FROM boards ORDER BY id ASC;"
        ))?;
        let boards = stmt
            .query_map([], board_from_row)?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(boards)
    }

    async fn load_column(&self, id: ColumnId) -> Result<Option<Column>> {
        let conn = self.connection()?;
        let column = conn
            .query_row(
                &format!("SELECT {COLUMN_COLUMNS} FROM columns WHERE id = ?1;"),
                [id.get()],
                column_from_row,
            )
            .optional()?;
        Ok(column)
    }

    async fn list_columns(&self, board_id: BoardId) -> Result<Vec<Column>> {
        let conn = self.connection()?;
        let mut stmt = conn.prepare(&format!(
            "SELECT {COLUMN_COLUMNS} FROM columns
             WHERE board_id = ?1
             ORDER BY position ASC, id ASC;"
        ))?;
        let columns = stmt
            .query_map([board_id.get()], column_from_row)?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(columns)
    }

    async fn load_card(&self, id: CardId) -> Result<Option<Card>> {
        let conn = self.connection()?;
        query_card(&conn, id)
    }

    async fn list_cards(&self, column_id: ColumnId) -> Result<Vec<Card>> {
        let conn = self.connection()?;
        let mut stmt = conn.prepare(&format!(
            "SELECT {CARD_COLUMNS} FROM cards
             WHERE column_id = ?1
             ORDER BY position ASC, id ASC;"
        ))?;
        let cards = stmt
            .query_map([column_id.get()], card_from_row)?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(cards)
    }

    async fn list_board_cards(&self, board_id: BoardId, query: Option<&str>) -> Result<Vec<Card>> {
        let conn = self.connection()?;
        let mut stmt = conn.prepare(&format!(
            "SELECT {CARD_COLUMNS} FROM cards
             WHERE board_id = ?1
             ORDER BY column_id ASC, position ASC, id ASC;"
        ))?;
        let cards = stmt
            .query_map([board_id.get()], card_from_row)?
            .collect::<rusqlite::Result<Vec<_>>>()?;

        // Filtered here rather than with LIKE, which folds ASCII only and
        // sees the labels as one joined string.
        Ok(match query {
            Some(query) => cards
                .into_iter()
                .filter(|card| card.matches_query(query))
                .collect(),
            None => cards,
        })
    }

    async fn max_position(&self, scope: Scope) -> Result<Option<i64>> {
        let conn = self.connection()?;
        let (sql, parent) = match scope {
            Scope::Board(id) => ("SELECT MAX(position) FROM columns WHERE board_id = ?1;", id.get()),
            Scope::Column(id) => ("SELECT MAX(position) FROM cards WHERE column_id = ?1;", id.get()),
        };
        let max = conn.query_row(sql, [parent], |row| row.get::<_, Option<i64>>(0))?;
        Ok(max)
    }

    async fn commit(&self, batch: &WriteBatch) -> Result<BatchReceipt> {
        let mut conn = self.connection()?;
        // Dropping the transaction without commit rolls it back.
        let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;

        let mut receipt = BatchReceipt::default();
        for op in batch.ops() {
            if let Some(id) = apply_op(&tx, op)? {
                receipt.inserted_ids.push(id);
            }
        }
        for scope in batch.checked_scopes() {
            check_contiguous(*scope, &scope_positions(&tx, *scope)?)?;
        }

        tx.commit()?;
        debug!(ops = batch.len(), "sqlite batch committed");
        Ok(receipt)
    }

    async fn positions(&self, scope: Scope) -> Result<Vec<i64>> {
        let conn = self.connection()?;
        scope_positions(&conn, scope)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{CardPatch, NewCard, PositionRange};
    use chrono::{NaiveDate, Utc};
    use tempfile::TempDir;

    async fn seeded(store: &SqliteStore) -> (BoardId, ColumnId) {
        let now = Utc::now();
        let mut batch = WriteBatch::new();
        batch.push(WriteOp::InsertBoard {
            name: "Board".to_string(),
            created_at: now,
        });
        let board_id = BoardId::new(store.commit(&batch).await.unwrap().inserted_ids[0]);

        let mut batch = WriteBatch::new();
        batch.push(WriteOp::InsertColumn {
            board_id,
            name: "Backlog".to_string(),
            position: 0,
            created_at: now,
        });
        let column_id = ColumnId::new(store.commit(&batch).await.unwrap().inserted_ids[0]);

        let mut batch = WriteBatch::new();
        for (position, title) in ["A", "B", "C"].into_iter().enumerate() {
            batch.push(WriteOp::InsertCard {
                board_id,
                column_id,
                card: NewCard::new(title),
                position: position as i64,
                created_at: now,
            });
        }
        let receipt = store.commit(&batch).await.unwrap();
        assert_eq!(receipt.inserted_ids.len(), 3);
        (board_id, column_id)
    }

    #[tokio::test]
    async fn test_open_file_database_and_reopen() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("kanban.sqlite");

        let column_id = {
            let store = SqliteStore::open(&path).unwrap();
            store.initialize().await.unwrap();
            seeded(&store).await.1
        };

        let store = SqliteStore::open(&path).unwrap();
        let titles: Vec<String> = store
            .list_cards(column_id)
            .await
            .unwrap()
            .into_iter()
            .map(|card| card.title)
            .collect();
        assert_eq!(titles, vec!["A", "B", "C"]);
    }

    #[tokio::test]
    async fn test_open_repairs_gaps_from_older_schema() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("legacy.sqlite");
        {
            let conn = Connection::open(&path).unwrap();
            conn.execute_batch(include_str!("migrations/0001_init.sql"))
                .unwrap();
            conn.execute_batch(
                "INSERT INTO boards (id, name) VALUES (1, 'Board');
                 INSERT INTO columns (id, board_id, name, position) VALUES
                     (1, 1, 'Backlog', 0), (2, 1, 'Review', 2), (3, 1, 'Done', 3);",
            )
            .unwrap();
        }

        let store = SqliteStore::open(&path).unwrap();
        let scope = Scope::Board(BoardId::new(1));
        assert_eq!(store.positions(scope).await.unwrap(), vec![0, 1, 2]);

        let mut batch = WriteBatch::new();
        batch
            .push(WriteOp::InsertColumn {
                board_id: BoardId::new(1),
                name: "Archive".to_string(),
                position: 3,
                created_at: Utc::now(),
            })
            .check(scope);
        store.commit(&batch).await.unwrap();
        assert_eq!(store.positions(scope).await.unwrap(), vec![0, 1, 2, 3]);
    }

    #[tokio::test]
    async fn test_ranged_shift_is_one_update() {
        let store = SqliteStore::open_in_memory().unwrap();
        let (_, column_id) = seeded(&store).await;
        let scope = Scope::Column(column_id);

        let mut batch = WriteBatch::new();
        batch
            .push(WriteOp::Shift {
                scope,
                range: PositionRange::between(1, 2),
                delta: -1,
            })
            .push(WriteOp::PlaceCard {
                id: CardId::new(1),
                board_id: BoardId::new(1),
                column_id,
                position: 2,
            })
            .check(scope);
        store.commit(&batch).await.unwrap();

        let titles: Vec<String> = store
            .list_cards(column_id)
            .await
            .unwrap()
            .into_iter()
            .map(|card| card.title)
            .collect();
        assert_eq!(titles, vec!["B", "C", "A"]);
    }

    #[tokio::test]
    async fn test_gap_rolls_batch_back() {
        let store = SqliteStore::open_in_memory().unwrap();
        let (_, column_id) = seeded(&store).await;
        let scope = Scope::Column(column_id);

        let mut batch = WriteBatch::new();
        batch
            .push(WriteOp::DeleteCard { id: CardId::new(2) })
            .check(scope);

        let err = store.commit(&batch).await.unwrap_err();
        assert!(matches!(err, BoardError::ContiguityViolation { .. }));
        assert_eq!(store.positions(scope).await.unwrap(), vec![0, 1, 2]);
    }

    #[tokio::test]
    async fn test_missing_row_rolls_batch_back() {
        let store = SqliteStore::open_in_memory().unwrap();
        let (_, column_id) = seeded(&store).await;

        let mut batch = WriteBatch::new();
        batch
            .push(WriteOp::DeleteCard { id: CardId::new(1) })
            .push(WriteOp::SetColumnPosition {
                id: ColumnId::new(404),
                position: 0,
            });

        assert!(store.commit(&batch).await.unwrap_err().is_not_found());
        assert_eq!(store.list_cards(column_id).await.unwrap().len(), 3);
    }

    #[tokio::test]
    async fn test_patch_and_labels_round_trip() {
        let store = SqliteStore::open_in_memory().unwrap();
        seeded(&store).await;

        let patch = CardPatch {
            title: Some("Autenticação".to_string()),
            description: Some("Sessão + CSRF".to_string()),
            labels: Some(vec!["backend".to_string(), "security".to_string()]),
            due_date: Some(NaiveDate::from_ymd_opt(2026, 3, 1)),
        };
        let mut batch = WriteBatch::new();
        batch.push(WriteOp::PatchCard {
            id: CardId::new(1),
            patch,
            updated_at: Utc::now(),
        });
        store.commit(&batch).await.unwrap();

        let card = store.load_card(CardId::new(1)).await.unwrap().unwrap();
        assert_eq!(card.title, "Autenticação");
        assert_eq!(card.description.as_deref(), Some("Sessão + CSRF"));
        assert_eq!(card.labels, vec!["backend", "security"]);
        assert_eq!(card.due_date, NaiveDate::from_ymd_opt(2026, 3, 1));
        assert!(card.updated_at.is_some());
    }

    #[tokio::test]
    async fn test_search_treats_wildcards_literally() {
        let store = SqliteStore::open_in_memory().unwrap();
        let (board_id, column_id) = seeded(&store).await;

        let mut batch = WriteBatch::new();
        batch.push(WriteOp::InsertCard {
            board_id,
            column_id,
            card: NewCard::new("100% done").with_labels(["chore"]),
            position: 3,
            created_at: Utc::now(),
        });
        store.commit(&batch).await.unwrap();

        assert_eq!(store.list_board_cards(board_id, Some("%")).await.unwrap().len(), 1);
        assert_eq!(store.list_board_cards(board_id, Some("CHORE")).await.unwrap().len(), 1);
        assert_eq!(store.list_board_cards(board_id, Some("_")).await.unwrap().len(), 0);
        assert_eq!(store.list_board_cards(board_id, None).await.unwrap().len(), 4);
    }

    #[tokio::test]
    async fn test_delete_column_removes_its_cards() {
        let store = SqliteStore::open_in_memory().unwrap();
        let (board_id, column_id) = seeded(&store).await;

        let mut batch = WriteBatch::new();
        batch
            .push(WriteOp::DeleteColumn { id: column_id })
            .check(Scope::Board(board_id));
        store.commit(&batch).await.unwrap();

        assert!(store.load_column(column_id).await.unwrap().is_none());
        assert!(store.list_board_cards(board_id, None).await.unwrap().is_empty());
        assert_eq!(store.max_position(Scope::Board(board_id)).await.unwrap(), None);
    }
}
