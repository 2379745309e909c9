//! In-process stand-in for a database driver, used by the engine's tests.
//!
//! Databases are named vectors of rows; every hook call is recorded so tests
//! can assert on ordering.

use crate::gate::AccessGate;
use dbscope_core::{ConnectionRegistry, DatabaseBackend, Error, Result};
use parking_lot::Mutex;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::Duration;

pub(crate) struct FakeBackend {
    registry: ConnectionRegistry,
    gate: Arc<AccessGate>,
    databases: Mutex<HashMap<String, Vec<i64>>>,
    snapshots: Mutex<HashMap<String, Vec<i64>>>,
    open: Mutex<HashSet<String>>,
    calls: Mutex<Vec<String>>,
    fail_create: Mutex<Option<String>>,
    create_delay: Mutex<Option<Duration>>,
}

impl FakeBackend {
    pub(crate) fn new(gate: Arc<AccessGate>, registry: ConnectionRegistry) -> Self {
        Self {
            registry,
            gate,
            databases: Mutex::new(HashMap::new()),
            snapshots: Mutex::new(HashMap::new()),
            open: Mutex::new(HashSet::new()),
            calls: Mutex::new(Vec::new()),
            fail_create: Mutex::new(None),
            create_delay: Mutex::new(None),
        }
    }

    /// Pretend a database with this name survives from an earlier run
    pub(crate) fn with_existing(self, name: &str) -> Self {
        self.databases.lock().insert(name.to_string(), vec![42]);
        self
    }

    pub(crate) fn fail_create_for(&self, alias: &str) {
        *self.fail_create.lock() = Some(alias.to_string());
    }

    /// Hold every `create_test_db` call for `delay`
    pub(crate) fn slow_create(&self, delay: Duration) {
        *self.create_delay.lock() = Some(delay);
    }

    pub(crate) fn exists(&self, name: &str) -> bool {
        self.databases.lock().contains_key(name)
    }

    pub(crate) fn is_open(&self, alias: &str) -> bool {
        self.open.lock().contains(alias)
    }

    pub(crate) fn calls(&self) -> Vec<String> {
        self.calls.lock().clone()
    }

    pub(crate) fn insert(&self, alias: &str, row: i64) -> Result<()> {
        self.ensure_connection(alias)?;
        let name = self.registry.name(alias)?;
        self.databases
            .lock()
            .get_mut(&name)
            .ok_or_else(|| Error::database(format!("no database {}", name)))?
            .push(row);
        Ok(())
    }

    pub(crate) fn count(&self, alias: &str) -> Result<usize> {
        self.ensure_connection(alias)?;
        let name = self.registry.name(alias)?;
        Ok(self.databases.lock().get(&name).map_or(0, Vec::len))
    }

    fn record(&self, call: &str, alias: &str) {
        self.calls.lock().push(format!("{}:{}", call, alias));
    }
}

impl DatabaseBackend for FakeBackend {
    fn connections(&self) -> &ConnectionRegistry {
        &self.registry
    }

    fn ensure_connection(&self, alias: &str) -> Result<()> {
        self.gate.check()?;
        let settings = self.registry.get(alias)?;
        if !settings.is_in_memory() && !self.databases.lock().contains_key(&settings.name) {
            return Err(Error::database("unable to open database file"));
        }
        if self.open.lock().insert(alias.to_string()) {
            self.record("connect", alias);
        }
        Ok(())
    }

    fn close(&self, alias: &str) -> Result<()> {
        if self.open.lock().remove(alias) {
            self.record("close", alias);
        }
        Ok(())
    }

    fn create_test_db(&self, alias: &str, _verbosity: u8, autoclobber: bool) -> Result<String> {
        self.gate.check()?;
        let delay = *self.create_delay.lock();
        if let Some(delay) = delay {
            std::thread::sleep(delay);
        }
        if self.fail_create.lock().as_deref() == Some(alias) {
            return Err(Error::database("migration 0002 failed"));
        }
        let settings = self.registry.get(alias)?;
        let test_name = if settings.is_in_memory() {
            settings.name.clone()
        } else {
            settings
                .test_name
                .clone()
                .unwrap_or_else(|| format!("test_{}", settings.name))
        };
        let mut databases = self.databases.lock();
        if databases.contains_key(&test_name) && !autoclobber && !settings.is_in_memory() {
            return Err(Error::DatabaseExists(test_name));
        }
        databases.insert(test_name.clone(), Vec::new());
        drop(databases);
        self.registry.set_name(alias, test_name.clone())?;
        self.record("create", alias);
        Ok(test_name)
    }

    fn destroy_test_db(&self, alias: &str, old_name: &str, _verbosity: u8) -> Result<()> {
        self.gate.check()?;
        self.close(alias)?;
        let name = self.registry.set_name(alias, old_name)?;
        self.databases.lock().remove(&name);
        self.record("destroy", alias);
        Ok(())
    }

    fn begin_isolation(&self, alias: &str) -> Result<()> {
        self.gate.check()?;
        let name = self.registry.name(alias)?;
        let rows = self.databases.lock().get(&name).cloned().unwrap_or_default();
        self.snapshots.lock().insert(alias.to_string(), rows);
        self.record("begin", alias);
        Ok(())
    }

    fn rollback_isolation(&self, alias: &str) -> Result<()> {
        if let Some(rows) = self.snapshots.lock().remove(alias) {
            let name = self.registry.name(alias)?;
            self.databases.lock().insert(name, rows);
            self.record("rollback", alias);
        }
        Ok(())
    }

    fn flush(&self, alias: &str) -> Result<()> {
        self.gate.check()?;
        let name = self.registry.name(alias)?;
        if let Some(rows) = self.databases.lock().get_mut(&name) {
            rows.clear();
        }
        self.record("flush", alias);
        Ok(())
    }
}
