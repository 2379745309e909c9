//! Reuse probe: does a test database from a previous run exist?
//!
//! The probe points the connection at its test database name, tries to open
//! a cursor and then puts everything back. It must only run during session
//! setup, before any test holds a connection.

use crate::names::test_database_name;
use dbscope_core::{DatabaseBackend, Error, Result};
use tracing::{debug, warn};

/// Whether the test database for `alias` exists and accepts connections.
///
/// Always false for in-memory connections, which are created implicitly on
/// connect. Any failure to connect counts as "does not exist".
pub fn test_database_exists<B: DatabaseBackend + ?Sized>(backend: &B, alias: &str) -> bool {
    match probe(backend, alias) {
        Ok(exists) => exists,
        Err(e @ Error::Probe { .. }) => {
            debug!(target: "dbscope::db", alias = %alias, error = %e, "No reusable test database");
            false
        }
        Err(e) => {
            warn!(target: "dbscope::db", alias = %alias, error = %e, "Reuse probe failed");
            false
        }
    }
}

fn probe<B: DatabaseBackend + ?Sized>(backend: &B, alias: &str) -> Result<bool> {
    let settings = backend.connections().get(alias)?;
    if settings.is_in_memory() {
        return Ok(false);
    }
    let test_name = test_database_name(&settings, None);

    backend.close(alias)?;
    let original = backend.connections().set_name(alias, test_name.clone())?;
    let _restore = RestoreName {
        backend,
        alias,
        original: Some(original),
    };

    match backend.ensure_connection(alias) {
        Ok(()) => {
            debug!(target: "dbscope::db", alias = %alias, test_name = %test_name, "Found test database from a previous run");
            Ok(true)
        }
        Err(e) if e.is_operational() => Err(Error::Probe {
            alias: alias.to_string(),
            reason: e.to_string(),
        }),
        Err(e) => Err(e),
    }
}

/// Closes the probed connection and puts the original name back on every
/// exit path, including an unwinding one.
struct RestoreName<'a, B: DatabaseBackend + ?Sized> {
    backend: &'a B,
    alias: &'a str,
    original: Option<String>,
}

impl<B: DatabaseBackend + ?Sized> Drop for RestoreName<'_, B> {
    fn drop(&mut self) {
        if let Err(e) = self.backend.close(self.alias) {
            warn!(target: "dbscope::db", alias = %self.alias, error = %e, "Failed to close probe connection");
        }
        if let Some(original) = self.original.take() {
            if let Err(e) = self.backend.connections().set_name(self.alias, original) {
                warn!(target: "dbscope::db", alias = %self.alias, error = %e, "Failed to restore connection name");
            }
        }
    }
}
