//! Test database creation strategies and the setup/teardown driver
//!
//! Setup walks every connection, records its live name and asks the
//! connection's [`DatabaseCreator`] for a test database. The default
//! [`RealCreator`] asks the backend to build one; [`ReuseCreator`] only
//! repoints the connection at a database left by an earlier run. Teardown
//! replays the record backwards, dropping each test database and restoring
//! the live name.

use dbscope_core::{DatabaseBackend, Error, Result};
use std::collections::BTreeMap;
use tracing::{info, warn};

/// Strategy that provides the test database for one connection
pub trait DatabaseCreator<B: DatabaseBackend + ?Sized>: Send + Sync {
    /// Make the test database for `alias` available and point the
    /// connection at it. Returns the test database name.
    fn create_test_db(&self, backend: &B, alias: &str, verbosity: u8, autoclobber: bool)
        -> Result<String>;

    /// Whether this strategy reuses an existing database
    fn reuses(&self) -> bool {
        false
    }
}

/// Creates the test database through the backend
#[derive(Debug, Clone, Copy, Default)]
pub struct RealCreator;

impl<B: DatabaseBackend + ?Sized> DatabaseCreator<B> for RealCreator {
    fn create_test_db(
        &self,
        backend: &B,
        alias: &str,
        verbosity: u8,
        autoclobber: bool,
    ) -> Result<String> {
        backend.create_test_db(alias, verbosity, autoclobber)
    }
}

/// Points the connection at an existing test database without creating it
#[derive(Debug, Clone, Copy, Default)]
pub struct ReuseCreator;

impl<B: DatabaseBackend + ?Sized> DatabaseCreator<B> for ReuseCreator {
    fn create_test_db(
        &self,
        backend: &B,
        alias: &str,
        verbosity: u8,
        _autoclobber: bool,
    ) -> Result<String> {
        let settings = backend.connections().get(alias)?;
        let test_name = crate::names::test_database_name(&settings, None);
        backend.close(alias)?;
        backend.connections().set_name(alias, test_name.clone())?;

        if verbosity >= 2 {
            info!(target: "dbscope::db", "Re-using existing test database for alias '{}' ('{}')...", alias, test_name);
        } else if verbosity >= 1 {
            info!(target: "dbscope::db", "Re-using existing test database for alias '{}'...", alias);
        }
        Ok(test_name)
    }

    fn reuses(&self) -> bool {
        true
    }
}

/// Creator chosen for each connection; connections without an entry use
/// [`RealCreator`].
pub struct CreationPlan<B: DatabaseBackend + ?Sized> {
    creators: BTreeMap<String, Box<dyn DatabaseCreator<B>>>,
    fallback: RealCreator,
}

impl<B: DatabaseBackend + ?Sized> Default for CreationPlan<B> {
    fn default() -> Self {
        Self::new()
    }
}

impl<B: DatabaseBackend + ?Sized> CreationPlan<B> {
    /// Plan that creates every database
    pub fn new() -> Self {
        Self {
            creators: BTreeMap::new(),
            fallback: RealCreator,
        }
    }

    /// Use `creator` for `alias`
    pub fn set(&mut self, alias: impl Into<String>, creator: Box<dyn DatabaseCreator<B>>) {
        self.creators.insert(alias.into(), creator);
    }

    /// Creator for `alias`
    pub fn creator_for(&self, alias: &str) -> &dyn DatabaseCreator<B> {
        match self.creators.get(alias) {
            Some(creator) => creator.as_ref(),
            None => &self.fallback,
        }
    }

    /// Aliases whose database will be reused
    pub fn reused_aliases(&self) -> Vec<String> {
        self.creators
            .iter()
            .filter(|(_, c)| c.reuses())
            .map(|(alias, _)| alias.clone())
            .collect()
    }
}

/// What setup did for one connection
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SetupEntry {
    /// Connection alias
    pub alias: String,
    /// Live name before setup
    pub old_name: String,
    /// Test database the connection now points at
    pub test_name: String,
    /// Whether the database was reused rather than created
    pub reused: bool,
}

/// Record produced by [`setup_databases`] and consumed by
/// [`teardown_databases`]
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SetupRecord {
    entries: Vec<SetupEntry>,
}

impl SetupRecord {
    /// Entries in setup order
    pub fn entries(&self) -> &[SetupEntry] {
        &self.entries
    }

    /// Entry for `alias`
    pub fn entry(&self, alias: &str) -> Option<&SetupEntry> {
        self.entries.iter().find(|e| e.alias == alias)
    }
}

/// Provide a test database for every connection.
///
/// Runs non-interactively: a stale test database in the way is clobbered.
///
/// # Errors
///
/// Stops at the first connection whose creator fails.
pub fn setup_databases<B: DatabaseBackend + ?Sized>(
    backend: &B,
    plan: &CreationPlan<B>,
    verbosity: u8,
) -> Result<SetupRecord> {
    let mut record = SetupRecord::default();
    for alias in backend.connections().aliases() {
        let old_name = backend.connections().name(&alias)?;
        let creator = plan.creator_for(&alias);
        let test_name = creator.create_test_db(backend, &alias, verbosity, true)?;
        record.entries.push(SetupEntry {
            alias,
            old_name,
            test_name,
            reused: creator.reuses(),
        });
    }
    Ok(record)
}

/// Drop every test database in `record`, newest first, and point each
/// connection back at its live name.
///
/// # Errors
///
/// Every entry is attempted; the first failure is returned.
pub fn teardown_databases<B: DatabaseBackend + ?Sized>(
    backend: &B,
    record: &SetupRecord,
    verbosity: u8,
) -> Result<()> {
    let mut first_error: Option<Error> = None;
    for entry in record.entries.iter().rev() {
        if let Err(e) = backend.destroy_test_db(&entry.alias, &entry.old_name, verbosity) {
            warn!(target: "dbscope::db", alias = %entry.alias, error = %e, "Failed to destroy test database");
            first_error.get_or_insert(e);
        } else if verbosity >= 1 {
            info!(target: "dbscope::db", alias = %entry.alias, "Destroyed test database");
        }
    }
    match first_error {
        Some(e) => Err(e),
        None => Ok(()),
    }
}

/// Point every connection in `record` back at its live name, leaving the
/// test databases in place for the next run.
///
/// # Errors
///
/// Every entry is attempted; the first failure is returned.
pub fn release_databases<B: DatabaseBackend + ?Sized>(
    backend: &B,
    record: &SetupRecord,
) -> Result<()> {
    let mut first_error: Option<Error> = None;
    for entry in record.entries.iter().rev() {
        let released = backend
            .close(&entry.alias)
            .and_then(|()| backend.connections().set_name(&entry.alias, entry.old_name.clone()));
        if let Err(e) = released {
            warn!(target: "dbscope::db", alias = %entry.alias, error = %e, "Failed to release test database");
            first_error.get_or_insert(e);
        }
    }
    match first_error {
        Some(e) => Err(e),
        None => Ok(()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fake::FakeBackend;
    use crate::gate::AccessGate;
    use dbscope_core::{ConnectionRegistry, ConnectionSettings};
    use std::sync::Arc;

    fn backend() -> FakeBackend {
        FakeBackend::new(
            Arc::new(AccessGate::new()),
            ConnectionRegistry::from_connections([
                ("default", ConnectionSettings::new("sqlite", "app").with_test_name("test_app")),
                ("replica", ConnectionSettings::new("sqlite", "rep").with_test_name("test_rep")),
            ]),
        )
    }

    #[test]
    fn test_setup_creates_every_database() {
        let backend = backend();
        let record = setup_databases(&backend, &CreationPlan::new(), 1).unwrap();

        assert_eq!(record.entries().len(), 2);
        let default = record.entry("default").unwrap();
        assert_eq!(default.old_name, "app");
        assert_eq!(default.test_name, "test_app");
        assert!(!default.reused);
        assert!(backend.exists("test_app"));
        assert!(backend.exists("test_rep"));
        assert_eq!(backend.connections().name("replica").unwrap(), "test_rep");
    }

    #[test]
    fn test_reuse_creator_skips_creation() {
        let backend = backend().with_existing("test_app");
        let mut plan = CreationPlan::new();
        plan.set("default", Box::new(ReuseCreator));
        assert_eq!(plan.reused_aliases(), vec!["default".to_string()]);

        let record = setup_databases(&backend, &plan, 2).unwrap();

        assert!(record.entry("default").unwrap().reused);
        assert_eq!(backend.connections().name("default").unwrap(), "test_app");
        assert_eq!(backend.count("default").unwrap(), 1, "reused rows survive");
        assert!(!backend.calls().contains(&"create:default".to_string()));
        assert!(backend.calls().contains(&"create:replica".to_string()));
    }

    #[test]
    fn test_teardown_restores_names_in_reverse() {
        let backend = backend();
        let record = setup_databases(&backend, &CreationPlan::new(), 0).unwrap();
        teardown_databases(&backend, &record, 0).unwrap();

        assert!(!backend.exists("test_app"));
        assert!(!backend.exists("test_rep"));
        assert_eq!(backend.connections().name("default").unwrap(), "app");
        let destroys: Vec<String> = backend
            .calls()
            .into_iter()
            .filter(|c| c.starts_with("destroy"))
            .collect();
        assert_eq!(destroys, vec!["destroy:replica", "destroy:default"]);
    }

    #[test]
    fn test_setup_stops_at_first_failure() {
        let backend = backend();
        backend.fail_create_for("default");
        let err = setup_databases(&backend, &CreationPlan::new(), 1).unwrap_err();
        assert!(err.to_string().contains("migration"));
        assert!(!backend.exists("test_rep"));
    }
}
