//! Test database name resolution
//!
//! Each connection gets a test database name: the explicit `test_name` if
//! one is configured, else `"test_" + name`. When the session runs as one of
//! several parallel workers the worker id is appended, so workers never
//! share a physical database.

use dbscope_core::{ConnectionRegistry, ConnectionSettings, Error, Result};
use tracing::debug;

/// Test database name for one connection
pub fn test_database_name(settings: &ConnectionSettings, suffix: Option<&str>) -> String {
    let mut name = match settings.test_name_override() {
        Some(name) => name.to_string(),
        None => format!("test_{}", settings.name),
    };
    if let Some(suffix) = suffix.filter(|s| !s.is_empty()) {
        name.push('_');
        name.push_str(suffix);
    }
    name
}

/// Per-session record of test database names
///
/// Resolution reads each connection's configured `test_name` and writes the
/// suffixed name over it in the registry. A second resolution by the same
/// session is an error; a later session starts again from the configured
/// names.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TestDatabaseConfig {
    suffix: Option<String>,
    names_resolved: bool,
    resolved: Vec<(String, String)>,
}

impl TestDatabaseConfig {
    /// Create a config; an empty suffix counts as no suffix
    pub fn new(suffix: Option<String>) -> Self {
        Self {
            suffix: suffix.filter(|s| !s.is_empty()),
            names_resolved: false,
            resolved: Vec::new(),
        }
    }

    /// Worker suffix applied to every name
    pub fn suffix(&self) -> Option<&str> {
        self.suffix.as_deref()
    }

    /// Whether [`TestDatabaseConfig::resolve`] has run
    pub fn names_resolved(&self) -> bool {
        self.names_resolved
    }

    /// `(alias, test name)` pairs written by the last resolution
    pub fn resolved(&self) -> &[(String, String)] {
        &self.resolved
    }

    /// Write the test database name of every on-disk connection into the
    /// registry. In-memory connections are skipped.
    ///
    /// # Errors
    ///
    /// Returns [`Error::NamesAlreadyResolved`] on a second call.
    pub fn resolve(&mut self, registry: &ConnectionRegistry) -> Result<()> {
        if self.names_resolved {
            return Err(Error::NamesAlreadyResolved);
        }
        self.names_resolved = true;

        for alias in registry.aliases() {
            let settings = registry.configured(&alias)?;
            if settings.is_in_memory() {
                debug!(target: "dbscope::db", alias = %alias, "In-memory connection keeps its name");
                continue;
            }
            let test_name = test_database_name(&settings, self.suffix());
            registry.set_test_name(&alias, test_name.clone())?;
            debug!(target: "dbscope::db", alias = %alias, test_name = %test_name, "Resolved test database name");
            self.resolved.push((alias, test_name));
        }
        Ok(())
    }
}
