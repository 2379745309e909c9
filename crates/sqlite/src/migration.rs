//! Schema migrations applied to every freshly created test database

use dbscope_core::Result;
use rusqlite::{params, Connection};
use tracing::debug;

use crate::backend::sqlite_error;

/// Bookkeeping table; flush leaves it alone
pub const MIGRATIONS_TABLE: &str = "dbscope_migrations";

/// One named schema step
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Migration {
    /// Unique name, recorded once applied
    pub name: String,
    /// SQL batch to execute
    pub sql: String,
}

impl Migration {
    /// Create a migration
    pub fn new(name: impl Into<String>, sql: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            sql: sql.into(),
        }
    }
}

/// Apply `migrations` in order, skipping the ones already recorded.
/// Each migration runs in its own transaction.
pub(crate) fn apply(conn: &mut Connection, migrations: &[Migration]) -> Result<usize> {
    conn.execute_batch(&format!(
        "CREATE TABLE IF NOT EXISTS {} (
            name TEXT PRIMARY KEY,
            applied_at INTEGER NOT NULL
        )",
        MIGRATIONS_TABLE
    ))
    .map_err(sqlite_error)?;

    let mut applied = 0;
    for migration in migrations {
        if is_applied(conn, &migration.name)? {
            continue;
        }
        let tx = conn.transaction().map_err(sqlite_error)?;
        tx.execute_batch(&migration.sql).map_err(|e| {
            dbscope_core::Error::database(format!("migration {} failed: {}", migration.name, e))
        })?;
        tx.execute(
            &format!(
                "INSERT INTO {} (name, applied_at) VALUES (?1, strftime('%s', 'now'))",
                MIGRATIONS_TABLE
            ),
            params![migration.name],
        )
        .map_err(sqlite_error)?;
        tx.commit().map_err(sqlite_error)?;
        debug!(target: "dbscope::db", migration = %migration.name, "Applied migration");
        applied += 1;
    }
    Ok(applied)
}

/// Names of applied migrations, oldest first
pub(crate) fn applied(conn: &Connection) -> Result<Vec<String>> {
    let mut stmt = conn
        .prepare(&format!(
            "SELECT name FROM {} ORDER BY applied_at, rowid",
            MIGRATIONS_TABLE
        ))
        .map_err(sqlite_error)?;
    let names = stmt
        .query_map([], |row| row.get::<_, String>(0))
        .map_err(sqlite_error)?
        .collect::<rusqlite::Result<Vec<_>>>()
        .map_err(sqlite_error)?;
    Ok(names)
}

fn is_applied(conn: &Connection, name: &str) -> Result<bool> {
    conn.query_row(
        &format!("SELECT COUNT(*) FROM {} WHERE name = ?1", MIGRATIONS_TABLE),
        params![name],
        |row| row.get::<_, i64>(0),
    )
    .map(|count| count > 0)
    .map_err(sqlite_error)
}
