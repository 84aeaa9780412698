//! SQLite schema migrations.
//!
//! The applied version is mirrored to `PRAGMA user_version`; versions must
//! stay strictly increasing.

use crate::error::{BoardError, Result};
use rusqlite::Connection;

#[derive(Debug, Clone, Copy)]
struct Migration {
    version: u32,
    sql: &'static str,
}

const MIGRATIONS: &[Migration] = &[
    Migration {
        version: 1,
        sql: include_str!("0001_init.sql"),
    },
    Migration {
        version: 2,
        sql: include_str!("0002_renumber_positions.sql"),
    },
];

/// Latest schema version known by this build
pub fn latest_version() -> u32 {
    MIGRATIONS.last().map_or(0, |migration| migration.version)
}

/// Applies all pending migrations in one transaction
pub fn apply_migrations(conn: &mut Connection) -> Result<()> {
    let current = current_user_version(conn)?;
    let latest = latest_version();

    if current > latest {
        return Err(BoardError::StorageError(format!(
            "database schema version {current} is newer than supported {latest}"
        )));
    }
    if current == latest {
        return Ok(());
    }

    let tx = conn.transaction()?;
    for migration in MIGRATIONS {
        if migration.version <= current {
            continue;
        }
        tx.execute_batch(migration.sql)?;
        tx.execute_batch(&format!("PRAGMA user_version = {};", migration.version))?;
    }
    tx.commit()?;

    Ok(())
}

pub fn current_user_version(conn: &Connection) -> Result<u32> {
    let version = conn.query_row("PRAGMA user_version;", [], |row| row.get::<_, u32>(0))?;
    Ok(version)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_migrations_reach_latest_and_are_idempotent() {
        let mut conn = Connection::open_in_memory().unwrap();
        apply_migrations(&mut conn).unwrap();
        assert_eq!(current_user_version(&conn).unwrap(), latest_version());

        apply_migrations(&mut conn).unwrap();
        assert_eq!(current_user_version(&conn).unwrap(), latest_version());
    }

    fn positions(conn: &Connection, sql: &str) -> Vec<i64> {
        let mut stmt = conn.prepare(sql).unwrap();
        stmt.query_map([], |row| row.get::<_, i64>(0))
            .unwrap()
            .collect::<rusqlite::Result<Vec<_>>>()
            .unwrap()
    }

    #[test]
    fn test_upgrade_renumbers_gapped_scopes() {
        let mut conn = Connection::open_in_memory().unwrap();
        conn.execute_batch(MIGRATIONS[0].sql).unwrap();
        conn.execute_batch(
            "INSERT INTO boards (id, name) VALUES (1, 'Board');
             INSERT INTO columns (id, board_id, name, position) VALUES
                 (1, 1, 'Backlog', 0), (2, 1, 'Review', 3), (3, 1, 'Doing', 2);
             INSERT INTO cards (id, board_id, column_id, title, position) VALUES
                 (1, 1, 1, 'a', 4), (2, 1, 1, 'b', 1), (3, 1, 1, 'c', 1);",
        )
        .unwrap();

        apply_migrations(&mut conn).unwrap();

        assert_eq!(current_user_version(&conn).unwrap(), latest_version());
        assert_eq!(
            positions(&conn, "SELECT position FROM columns ORDER BY id;"),
            vec![0, 2, 1]
        );
        assert_eq!(
            positions(&conn, "SELECT position FROM cards ORDER BY id;"),
            vec![2, 0, 1]
        );
    }

    #[test]
    fn test_newer_schema_is_rejected() {
        let mut conn = Connection::open_in_memory().unwrap();
        conn.execute_batch(&format!("PRAGMA user_version = {};", latest_version() + 1))
            .unwrap();
        assert!(matches!(
            apply_migrations(&mut conn),
            Err(BoardError::StorageError(_))
        ));
    }
}
