//! SQLite implementation of [`DatabaseBackend`]
//!
//! Every logical connection maps to one file, `<dir>/<name>.sqlite3`, so
//! repointing a connection's name in the registry repoints the next
//! connection it opens. Files are opened without `SQLITE_OPEN_CREATE`: a
//! missing test database fails to connect, which is what the reuse probe
//! relies on.
//!
//! In-memory connections (`:memory:`) use a shared-cache URI unique to the
//! backend instance. Their connection is kept open across `close()`, since
//! closing the last connection would drop the database, and other threads
//! (the live server) can reach the same data through
//! [`SqliteBackend::open_worker_connection`].

use crate::migration::{self, Migration, MIGRATIONS_TABLE};
use dbscope_core::{
    ConnectionRegistry, ConnectionSettings, DatabaseBackend, Error, Result, Settings,
};
use dbscope_engine::{test_database_name, AccessGate};
use parking_lot::Mutex;
use rusqlite::{Connection, OpenFlags};
use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info};

/// Engine identifier this backend serves
pub const SQLITE_ENGINE: &str = "sqlite";

/// File extension of on-disk databases
pub const DATABASE_EXTENSION: &str = "sqlite3";

const BUSY_TIMEOUT: Duration = Duration::from_secs(5);

static NEXT_INSTANCE: AtomicU64 = AtomicU64::new(0);

/// Convert a driver error
pub fn sqlite_error(e: rusqlite::Error) -> Error {
    Error::Database(e.to_string())
}

/// SQLite-backed test databases
pub struct SqliteBackend {
    registry: ConnectionRegistry,
    gate: Arc<AccessGate>,
    dir: PathBuf,
    instance: u64,
    migrations: Vec<Migration>,
    connections: Mutex<HashMap<String, Connection>>,
}

impl std::fmt::Debug for SqliteBackend {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SqliteBackend")
            .field("dir", &self.dir)
            .field("aliases", &self.registry.aliases())
            .field("migrations", &self.migrations.len())
            .finish()
    }
}

impl SqliteBackend {
    /// Backend serving `registry`, with database files under `dir`.
    ///
    /// # Errors
    ///
    /// Fails if any connection uses an engine other than `sqlite`.
    pub fn new(
        registry: ConnectionRegistry,
        gate: Arc<AccessGate>,
        dir: impl Into<PathBuf>,
    ) -> Result<Self> {
        for alias in registry.aliases() {
            let settings = registry.get(&alias)?;
            if settings.engine != SQLITE_ENGINE {
                return Err(Error::UnsupportedEngine {
                    alias,
                    engine: settings.engine,
                });
            }
        }
        Ok(Self {
            registry,
            gate,
            dir: dir.into(),
            instance: NEXT_INSTANCE.fetch_add(1, Ordering::Relaxed),
            migrations: Vec::new(),
            connections: Mutex::new(HashMap::new()),
        })
    }

    /// Backend for the connections in `settings`
    pub fn from_settings(
        settings: &Settings,
        gate: Arc<AccessGate>,
        dir: impl Into<PathBuf>,
    ) -> Result<Self> {
        Self::new(settings.registry(), gate, dir)
    }

    /// Apply `migrations` to every test database this backend creates
    pub fn with_migrations(mut self, migrations: Vec<Migration>) -> Self {
        self.migrations = migrations;
        self
    }

    /// Directory holding the database files
    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// File backing the database `name`
    pub fn database_path(&self, name: &str) -> PathBuf {
        self.dir.join(format!("{}.{}", name, DATABASE_EXTENSION))
    }

    /// Whether the connection for `alias` is currently open
    pub fn is_open(&self, alias: &str) -> bool {
        self.connections.lock().contains_key(alias)
    }

    /// Run `f` on the connection for `alias`, connecting first.
    ///
    /// # Errors
    ///
    /// [`Error::AccessViolation`] when the gate is closed; driver errors
    /// otherwise.
    pub fn with_connection<T>(
        &self,
        alias: &str,
        f: impl FnOnce(&Connection) -> rusqlite::Result<T>,
    ) -> Result<T> {
        self.ensure_connection(alias)?;
        let connections = self.connections.lock();
        let conn = connections
            .get(alias)
            .ok_or_else(|| Error::database(format!("connection '{}' is closed", alias)))?;
        f(conn).map_err(sqlite_error)
    }

    /// Run `f` inside a savepoint on `alias`: released if `f` succeeds,
    /// rolled back if it fails. Works inside the per-test transaction and in
    /// autocommit mode alike.
    pub fn atomic<T>(&self, alias: &str, f: impl FnOnce(&Connection) -> Result<T>) -> Result<T> {
        self.ensure_connection(alias)?;
        let mut connections = self.connections.lock();
        let conn = connections
            .get_mut(alias)
            .ok_or_else(|| Error::database(format!("connection '{}' is closed", alias)))?;
        let savepoint = conn.savepoint().map_err(sqlite_error)?;
        let value = f(&savepoint)?;
        savepoint.commit().map_err(sqlite_error)?;
        Ok(value)
    }

    /// Open an independent connection to the database `alias` currently
    /// points at, for use on another thread.
    pub fn open_worker_connection(&self, alias: &str) -> Result<Connection> {
        self.gate.check()?;
        let settings = self.registry.get(alias)?;
        self.open(alias, &settings, false)
    }

    /// Migrations recorded in the database `alias` points at
    pub fn applied_migrations(&self, alias: &str) -> Result<Vec<String>> {
        self.ensure_connection(alias)?;
        let connections = self.connections.lock();
        let conn = connections
            .get(alias)
            .ok_or_else(|| Error::database(format!("connection '{}' is closed", alias)))?;
        migration::applied(conn)
    }

    fn memory_uri(&self, alias: &str) -> String {
        format!(
            "file:dbscope-{}-{}?mode=memory&cache=shared",
            self.instance, alias
        )
    }

    fn open(&self, alias: &str, settings: &ConnectionSettings, create: bool) -> Result<Connection> {
        let mut flags = OpenFlags::SQLITE_OPEN_READ_WRITE
            | OpenFlags::SQLITE_OPEN_URI
            | OpenFlags::SQLITE_OPEN_NO_MUTEX;
        let conn = if settings.is_in_memory() {
            flags |= OpenFlags::SQLITE_OPEN_CREATE;
            Connection::open_with_flags(self.memory_uri(alias), flags)
        } else {
            if create {
                flags |= OpenFlags::SQLITE_OPEN_CREATE;
            }
            Connection::open_with_flags(self.database_path(&settings.name), flags)
        }
        .map_err(sqlite_error)?;

        conn.busy_timeout(BUSY_TIMEOUT).map_err(sqlite_error)?;
        conn.execute_batch("PRAGMA foreign_keys = ON")
            .map_err(sqlite_error)?;
        // Forces the file to be read; a missing or corrupt database fails here.
        conn.query_row("PRAGMA schema_version", [], |row| row.get::<_, i64>(0))
            .map_err(sqlite_error)?;
        Ok(conn)
    }

    fn drop_connection(&self, alias: &str) -> Result<()> {
        if let Some(conn) = self.connections.lock().remove(alias) {
            conn.close().map_err(|(_, e)| sqlite_error(e))?;
            debug!(target: "dbscope::db", alias = %alias, "Closed connection");
        }
        Ok(())
    }
}

fn remove_database_files(path: &Path) -> Result<()> {
    let mut targets = vec![path.to_path_buf()];
    for suffix in ["-wal", "-shm", "-journal"] {
        let mut name = path.as_os_str().to_owned();
        name.push(suffix);
        targets.push(PathBuf::from(name));
    }
    for target in targets {
        match fs::remove_file(&target) {
            Ok(()) => {}
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => return Err(e.into()),
        }
    }
    Ok(())
}

impl DatabaseBackend for SqliteBackend {
    fn connections(&self) -> &ConnectionRegistry {
        &self.registry
    }

    fn ensure_connection(&self, alias: &str) -> Result<()> {
        self.gate.check()?;
        if self.connections.lock().contains_key(alias) {
            return Ok(());
        }
        let settings = self.registry.get(alias)?;
        let conn = self.open(alias, &settings, false)?;
        self.connections.lock().insert(alias.to_string(), conn);
        debug!(target: "dbscope::db", alias = %alias, name = %settings.name, "Opened connection");
        Ok(())
    }

    fn close(&self, alias: &str) -> Result<()> {
        if self.registry.get(alias)?.is_in_memory() {
            return Ok(());
        }
        self.drop_connection(alias)
    }

    fn create_test_db(&self, alias: &str, verbosity: u8, autoclobber: bool) -> Result<String> {
        self.gate.check()?;
        let settings = self.registry.get(alias)?;

        if settings.is_in_memory() {
            self.drop_connection(alias)?;
            let mut conn = self.open(alias, &settings, true)?;
            migration::apply(&mut conn, &self.migrations)?;
            self.connections.lock().insert(alias.to_string(), conn);
            if verbosity >= 1 {
                info!(target: "dbscope::db", "Creating in-memory test database for alias '{}'...", alias);
            }
            return Ok(settings.name);
        }

        let test_name = test_database_name(&settings, None);
        let path = self.database_path(&test_name);
        self.drop_connection(alias)?;

        if path.exists() {
            if !autoclobber {
                return Err(Error::DatabaseExists(test_name));
            }
            if verbosity >= 1 {
                info!(target: "dbscope::db", "Destroying old test database for alias '{}'...", alias);
            }
            remove_database_files(&path)?;
        }
        if verbosity >= 2 {
            info!(target: "dbscope::db", "Creating test database for alias '{}' ('{}')...", alias, test_name);
        } else if verbosity >= 1 {
            info!(target: "dbscope::db", "Creating test database for alias '{}'...", alias);
        }

        fs::create_dir_all(&self.dir)?;
        let mut fresh = settings.clone();
        fresh.name = test_name.clone();
        let mut conn = self.open(alias, &fresh, true)?;
        let applied = migration::apply(&mut conn, &self.migrations)?;
        conn.close().map_err(|(_, e)| sqlite_error(e))?;
        debug!(target: "dbscope::db", alias = %alias, migrations = applied, "Test database migrated");

        self.registry.set_name(alias, test_name.clone())?;
        Ok(test_name)
    }

    fn destroy_test_db(&self, alias: &str, old_name: &str, verbosity: u8) -> Result<()> {
        self.gate.check()?;
        let settings = self.registry.get(alias)?;
        self.drop_connection(alias)?;
        let test_name = self.registry.set_name(alias, old_name)?;

        if !settings.is_in_memory() {
            remove_database_files(&self.database_path(&test_name))?;
        }
        if verbosity >= 2 {
            info!(target: "dbscope::db", "Destroying test database for alias '{}' ('{}')...", alias, test_name);
        } else if verbosity >= 1 {
            info!(target: "dbscope::db", "Destroying test database for alias '{}'...", alias);
        }
        Ok(())
    }

    fn begin_isolation(&self, alias: &str) -> Result<()> {
        self.with_connection(alias, |conn| conn.execute_batch("BEGIN"))
    }

    fn rollback_isolation(&self, alias: &str) -> Result<()> {
        let connections = self.connections.lock();
        match connections.get(alias) {
            Some(conn) if !conn.is_autocommit() => {
                conn.execute_batch("ROLLBACK").map_err(sqlite_error)
            }
            _ => Ok(()),
        }
    }

    fn flush(&self, alias: &str) -> Result<()> {
        self.ensure_connection(alias)?;
        let mut connections = self.connections.lock();
        let conn = connections
            .get_mut(alias)
            .ok_or_else(|| Error::database(format!("connection '{}' is closed", alias)))?;

        let tables = {
            let mut stmt = conn
                .prepare(
                    "SELECT name FROM sqlite_master \
                     WHERE type = 'table' AND name NOT LIKE 'sqlite_%' AND name != ?1",
                )
                .map_err(sqlite_error)?;
            let names = stmt
                .query_map([MIGRATIONS_TABLE], |row| row.get::<_, String>(0))
                .map_err(sqlite_error)?
                .collect::<rusqlite::Result<Vec<_>>>()
                .map_err(sqlite_error)?;
            names
        };
        let has_sequence: bool = conn
            .query_row(
                "SELECT COUNT(*) FROM sqlite_master WHERE type = 'table' AND name = 'sqlite_sequence'",
                [],
                |row| row.get::<_, i64>(0),
            )
            .map_err(sqlite_error)?
            > 0;

        conn.execute_batch("PRAGMA foreign_keys = OFF")
            .map_err(sqlite_error)?;
        let flushed = (|| {
            let tx = conn.transaction()?;
            for table in &tables {
                tx.execute(&format!("DELETE FROM \"{}\"", table.replace('"', "\"\"")), [])?;
            }
            if has_sequence {
                tx.execute("DELETE FROM sqlite_sequence", [])?;
            }
            tx.commit()
        })();
        conn.execute_batch("PRAGMA foreign_keys = ON")
            .map_err(sqlite_error)?;
        flushed.map_err(sqlite_error)?;

        debug!(target: "dbscope::db", alias = %alias, tables = tables.len(), "Flushed database");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use dbscope_core::{DEFAULT_ALIAS, IN_MEMORY_NAME};
    use tempfile::TempDir;

    fn migrations() -> Vec<Migration> {
        vec![
            Migration::new(
                "0001_items",
                "CREATE TABLE items (id INTEGER PRIMARY KEY AUTOINCREMENT, label TEXT NOT NULL)",
            ),
            Migration::new(
                "0002_tags",
                "CREATE TABLE tags (item_id INTEGER NOT NULL REFERENCES items(id), tag TEXT)",
            ),
        ]
    }

    fn backend(dir: &TempDir, name: &str) -> SqliteBackend {
        let registry = ConnectionRegistry::from_connections([(
            DEFAULT_ALIAS,
            ConnectionSettings::new(SQLITE_ENGINE, name),
        )]);
        SqliteBackend::new(registry, Arc::new(AccessGate::new()), dir.path())
            .unwrap()
            .with_migrations(migrations())
    }

    fn count(backend: &SqliteBackend, table: &str) -> i64 {
        backend
            .with_connection(DEFAULT_ALIAS, |conn| {
                conn.query_row(&format!("SELECT COUNT(*) FROM {}", table), [], |row| row.get(0))
            })
            .unwrap()
    }

    #[test]
    fn test_rejects_other_engines() {
        let dir = TempDir::new().unwrap();
        let registry = ConnectionRegistry::from_connections([(
            DEFAULT_ALIAS,
            ConnectionSettings::new("postgresql", "app"),
        )]);
        let err = SqliteBackend::new(registry, Arc::new(AccessGate::new()), dir.path()).unwrap_err();
        assert!(matches!(err, Error::UnsupportedEngine { .. }));
    }

    #[test]
    fn test_missing_file_is_operational_error() {
        let dir = TempDir::new().unwrap();
        let backend = backend(&dir, "app");
        let err = backend.ensure_connection(DEFAULT_ALIAS).unwrap_err();
        assert!(err.is_operational());
        assert!(!dir.path().join("app.sqlite3").exists());
    }

    #[test]
    fn test_closed_gate_never_opens_file() {
        let dir = TempDir::new().unwrap();
        let backend = backend(&dir, "app");
        backend.create_test_db(DEFAULT_ALIAS, 0, false).unwrap();
        backend.gate.disable();
        let err = backend.ensure_connection(DEFAULT_ALIAS).unwrap_err();
        assert!(err.is_access_violation());
        assert!(!backend.is_open(DEFAULT_ALIAS));
    }

    #[test]
    fn test_create_and_destroy() {
        let dir = TempDir::new().unwrap();
        let backend = backend(&dir, "app");

        let name = backend.create_test_db(DEFAULT_ALIAS, 1, false).unwrap();
        assert_eq!(name, "test_app");
        assert!(dir.path().join("test_app.sqlite3").exists());
        assert_eq!(backend.connections().name(DEFAULT_ALIAS).unwrap(), "test_app");
        assert_eq!(
            backend.applied_migrations(DEFAULT_ALIAS).unwrap(),
            vec!["0001_items", "0002_tags"]
        );

        backend.destroy_test_db(DEFAULT_ALIAS, "app", 1).unwrap();
        assert!(!dir.path().join("test_app.sqlite3").exists());
        assert_eq!(backend.connections().name(DEFAULT_ALIAS).unwrap(), "app");
    }

    #[test]
    fn test_existing_database_needs_autoclobber() {
        let dir = TempDir::new().unwrap();
        let backend = backend(&dir, "app");
        backend.create_test_db(DEFAULT_ALIAS, 0, false).unwrap();
        backend.connections().set_name(DEFAULT_ALIAS, "app").unwrap();

        let err = backend.create_test_db(DEFAULT_ALIAS, 0, false).unwrap_err();
        assert!(matches!(err, Error::DatabaseExists(name) if name == "test_app"));
        backend.create_test_db(DEFAULT_ALIAS, 0, true).unwrap();
    }

    #[test]
    fn test_isolation_rolls_back() {
        let dir = TempDir::new().unwrap();
        let backend = backend(&dir, "app");
        backend.create_test_db(DEFAULT_ALIAS, 0, false).unwrap();

        backend.begin_isolation(DEFAULT_ALIAS).unwrap();
        backend
            .with_connection(DEFAULT_ALIAS, |conn| {
                conn.execute("INSERT INTO items (label) VALUES ('pending')", [])
            })
            .unwrap();
        assert_eq!(count(&backend, "items"), 1);
        backend.rollback_isolation(DEFAULT_ALIAS).unwrap();
        assert_eq!(count(&backend, "items"), 0);

        backend.rollback_isolation(DEFAULT_ALIAS).unwrap();
    }

    #[test]
    fn test_atomic_savepoint_inside_transaction() {
        let dir = TempDir::new().unwrap();
        let backend = backend(&dir, "app");
        backend.create_test_db(DEFAULT_ALIAS, 0, false).unwrap();
        backend.begin_isolation(DEFAULT_ALIAS).unwrap();

        backend
            .atomic(DEFAULT_ALIAS, |conn| {
                conn.execute("INSERT INTO items (label) VALUES ('kept')", [])
                    .map_err(sqlite_error)
            })
            .unwrap();
        let failed: Result<()> = backend.atomic(DEFAULT_ALIAS, |conn| {
            conn.execute("INSERT INTO items (label) VALUES ('discarded')", [])
                .map_err(sqlite_error)?;
            Err(Error::database("business rule violated"))
        });
        assert!(failed.is_err());
        assert_eq!(count(&backend, "items"), 1);

        backend.rollback_isolation(DEFAULT_ALIAS).unwrap();
        assert_eq!(count(&backend, "items"), 0);
    }

    #[test]
    fn test_flush_keeps_schema_and_migrations() {
        let dir = TempDir::new().unwrap();
        let backend = backend(&dir, "app");
        backend.create_test_db(DEFAULT_ALIAS, 0, false).unwrap();
        backend
            .with_connection(DEFAULT_ALIAS, |conn| {
                conn.execute_batch(
                    "INSERT INTO items (label) VALUES ('a');
                     INSERT INTO tags (item_id, tag) VALUES (1, 'x');",
                )
            })
            .unwrap();

        backend.flush(DEFAULT_ALIAS).unwrap();

        assert_eq!(count(&backend, "items"), 0);
        assert_eq!(count(&backend, "tags"), 0);
        assert_eq!(backend.applied_migrations(DEFAULT_ALIAS).unwrap().len(), 2);
        let id: i64 = backend
            .with_connection(DEFAULT_ALIAS, |conn| {
                conn.execute("INSERT INTO items (label) VALUES ('b')", [])?;
                Ok(conn.last_insert_rowid())
            })
            .unwrap();
        assert_eq!(id, 1, "autoincrement counters reset");
    }

    #[test]
    fn test_in_memory_survives_close() {
        let dir = TempDir::new().unwrap();
        let backend = backend(&dir, IN_MEMORY_NAME);
        assert_eq!(backend.create_test_db(DEFAULT_ALIAS, 0, false).unwrap(), IN_MEMORY_NAME);
        backend
            .with_connection(DEFAULT_ALIAS, |conn| {
                conn.execute("INSERT INTO items (label) VALUES ('kept')", [])
            })
            .unwrap();

        backend.close(DEFAULT_ALIAS).unwrap();
        assert_eq!(count(&backend, "items"), 1);

        let worker = backend.open_worker_connection(DEFAULT_ALIAS).unwrap();
        let seen: i64 = worker
            .query_row("SELECT COUNT(*) FROM items", [], |row| row.get(0))
            .unwrap();
        assert_eq!(seen, 1);
    }
}
