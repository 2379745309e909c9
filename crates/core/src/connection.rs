//! Logical database connections and the shared connection registry
//!
//! A [`ConnectionSettings`] describes one aliased connection ("default",
//! "replica", ...). The [`ConnectionRegistry`] holds every alias for the
//! process and is shared by the backend (which opens connections against the
//! current `name`) and the engine (which rewrites `name` and `test_name`
//! during session setup). The configured `test_name` of every alias is kept
//! aside the first time it is rewritten, so each session resolves names from
//! the configuration rather than from a previous session's result.

use crate::error::{Error, Result};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Name that marks a connection as an in-memory database.
pub const IN_MEMORY_NAME: &str = ":memory:";

/// Alias used when a settings file does not name its connections.
pub const DEFAULT_ALIAS: &str = "default";

/// Settings of one logical connection
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConnectionSettings {
    /// Engine identifier understood by the backend (e.g. `"sqlite"`)
    pub engine: String,
    /// Live database name; rewritten to the test name during setup
    pub name: String,
    /// Test database name. Holds the explicit override until names are
    /// resolved, then the resolved name.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub test_name: Option<String>,
}

impl ConnectionSettings {
    /// Create settings for `engine` pointing at database `name`
    pub fn new(engine: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            engine: engine.into(),
            name: name.into(),
            test_name: None,
        }
    }

    /// Set an explicit test database name
    pub fn with_test_name(mut self, test_name: impl Into<String>) -> Self {
        self.test_name = Some(test_name.into());
        self
    }

    /// Whether this connection is an in-memory database.
    ///
    /// In-memory databases are created implicitly on connect, so they can
    /// neither be probed for existence nor given a distinct test name.
    pub fn is_in_memory(&self) -> bool {
        self.name == IN_MEMORY_NAME
    }

    /// The explicit test name, treating an empty string as unset
    pub fn test_name_override(&self) -> Option<&str> {
        self.test_name.as_deref().filter(|name| !name.is_empty())
    }
}

/// Registry of every configured connection, keyed by alias
///
/// Cloning settings out of the registry is cheap; writers go through the
/// dedicated setters so that each mutation is a single locked step.
#[derive(Debug, Default)]
pub struct ConnectionRegistry {
    connections: RwLock<BTreeMap<String, ConnectionSettings>>,
    configured_test_names: RwLock<BTreeMap<String, Option<String>>>,
}

impl ConnectionRegistry {
    /// Create an empty registry
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a registry from `(alias, settings)` pairs
    pub fn from_connections<I, S>(connections: I) -> Self
    where
        I: IntoIterator<Item = (S, ConnectionSettings)>,
        S: Into<String>,
    {
        let map = connections
            .into_iter()
            .map(|(alias, settings)| (alias.into(), settings))
            .collect();
        Self {
            connections: RwLock::new(map),
            configured_test_names: RwLock::new(BTreeMap::new()),
        }
    }

    /// Add or replace a connection
    pub fn insert(&self, alias: impl Into<String>, settings: ConnectionSettings) {
        let alias = alias.into();
        self.configured_test_names.write().remove(&alias);
        self.connections.write().insert(alias, settings);
    }

    /// All aliases in a stable order
    pub fn aliases(&self) -> Vec<String> {
        self.connections.read().keys().cloned().collect()
    }

    /// Number of configured connections
    pub fn len(&self) -> usize {
        self.connections.read().len()
    }

    /// Whether no connection is configured
    pub fn is_empty(&self) -> bool {
        self.connections.read().is_empty()
    }

    /// Snapshot of one connection's settings
    pub fn get(&self, alias: &str) -> Result<ConnectionSettings> {
        self.connections
            .read()
            .get(alias)
            .cloned()
            .ok_or_else(|| Error::UnknownAlias(alias.to_string()))
    }

    /// Current live name of a connection
    pub fn name(&self, alias: &str) -> Result<String> {
        self.get(alias).map(|settings| settings.name)
    }

    /// Repoint a connection's live name, returning the previous name
    pub fn set_name(&self, alias: &str, name: impl Into<String>) -> Result<String> {
        let mut connections = self.connections.write();
        let settings = connections
            .get_mut(alias)
            .ok_or_else(|| Error::UnknownAlias(alias.to_string()))?;
        Ok(std::mem::replace(&mut settings.name, name.into()))
    }

    /// Settings of a connection with `test_name` as configured, before any
    /// resolved name was written over it
    pub fn configured(&self, alias: &str) -> Result<ConnectionSettings> {
        let mut settings = self.get(alias)?;
        if let Some(configured) = self.configured_test_names.read().get(alias) {
            settings.test_name = configured.clone();
        }
        Ok(settings)
    }

    /// Set the test database name of a connection
    pub fn set_test_name(&self, alias: &str, test_name: impl Into<String>) -> Result<()> {
        let mut connections = self.connections.write();
        let settings = connections
            .get_mut(alias)
            .ok_or_else(|| Error::UnknownAlias(alias.to_string()))?;
        let previous = std::mem::replace(&mut settings.test_name, Some(test_name.into()));
        self.configured_test_names
            .write()
            .entry(alias.to_string())
            .or_insert(previous);
        Ok(())
    }

    /// Put every rewritten `test_name` back to its configured value
    pub fn reset_test_names(&self) {
        let mut connections = self.connections.write();
        for (alias, configured) in std::mem::take(&mut *self.configured_test_names.write()) {
            if let Some(settings) = connections.get_mut(&alias) {
                settings.test_name = configured;
            }
        }
    }
}
