//! Collaborator traits
//!
//! The engine drives test databases and the live server only through these
//! traits, so the lifecycle and gating logic can be exercised against fakes
//! and reused with any driver.

use crate::address::LiveServerAddress;
use crate::connection::ConnectionRegistry;
use crate::error::Result;

/// Database driver hooks needed to manage test databases
///
/// Every operation addresses a connection by alias and resolves it through
/// [`DatabaseBackend::connections`] using the connection's *current* `name`,
/// so repointing the name in the registry repoints the next connection.
///
/// Implementations must refuse to open connections while the session's
/// access gate is closed, and must do so before any I/O.
///
/// Thread safety: the live server calls into the backend from its own thread.
pub trait DatabaseBackend: Send + Sync + 'static {
    /// Registry of the connections this backend serves
    fn connections(&self) -> &ConnectionRegistry;

    /// Open a cursor on the connection, connecting if necessary.
    ///
    /// # Errors
    ///
    /// Returns an operational error when the database named by the
    /// connection's current `name` cannot be reached.
    fn ensure_connection(&self, alias: &str) -> Result<()>;

    /// Close the connection. Closing a closed connection is a no-op.
    fn close(&self, alias: &str) -> Result<()>;

    /// Physically create the test database for `alias`, apply the schema and
    /// repoint the connection's `name` at it. Returns the test database name.
    ///
    /// With `autoclobber` an existing test database is destroyed first;
    /// without it an existing database is an error.
    fn create_test_db(&self, alias: &str, verbosity: u8, autoclobber: bool) -> Result<String>;

    /// Drop the test database for `alias` and point the connection back at
    /// `old_name`.
    fn destroy_test_db(&self, alias: &str, old_name: &str, verbosity: u8) -> Result<()>;

    /// Start the per-test unit of work that [`DatabaseBackend::rollback_isolation`]
    /// undoes.
    fn begin_isolation(&self, alias: &str) -> Result<()>;

    /// Roll back the per-test unit of work. A no-op when none is open.
    fn rollback_isolation(&self, alias: &str) -> Result<()>;

    /// Delete every row of every table, keeping the schema.
    fn flush(&self, alias: &str) -> Result<()>;
}

/// A live HTTP server running next to the tests
pub trait LiveServer: Send {
    /// Bind and start serving in the background
    fn start(&mut self) -> Result<()>;

    /// Stop serving and wait for the background thread. Idempotent.
    fn stop(&mut self) -> Result<()>;

    /// Base URL (`http://host:port`), available once started
    fn url(&self) -> Option<String>;
}

/// Constructor for the session's live server, given the resolved address
pub type LiveServerFactory =
    Box<dyn Fn(&LiveServerAddress) -> Result<Box<dyn LiveServer>> + Send + Sync>;
