//! Session-wide test database lifecycle
//!
//! [`DatabaseLifecycle::setup`] runs once per session, before any test:
//!
//! 1. Resolve test database names, with the worker suffix.
//! 2. Derive the [`ReuseDecision`] from the session options.
//! 3. When reuse is possible, probe every connection and give the ones that
//!    exist a [`ReuseCreator`].
//! 4. Create (or repoint) every test database with the gate open.
//!
//! [`DatabaseLifecycle::finalize`] is the session-end counterpart: it drops
//! the databases unless the session asked to keep them for the next run, and
//! puts the configured test names back into the registry.

use crate::creation::{
    release_databases, setup_databases, teardown_databases, CreationPlan, ReuseCreator,
    SetupRecord,
};
use crate::gate::AccessGate;
use crate::names::TestDatabaseConfig;
use crate::probe::test_database_exists;
use dbscope_core::{DatabaseBackend, Error, Result, SessionOptions};
use tracing::{debug, error, info};

/// Reuse policy derived from the `reuse` and `recreate` switches
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReuseDecision {
    /// Existing test databases may be picked up instead of created
    pub can_reuse: bool,
    /// Test databases are dropped at session end
    pub should_drop_after: bool,
}

impl ReuseDecision {
    /// `recreate` always wins over `reuse`. Databases are kept after the run
    /// whenever reuse was requested, so a recreated database is available to
    /// the next reusing run.
    pub fn new(reuse: bool, recreate: bool) -> Self {
        Self {
            can_reuse: reuse && !recreate,
            should_drop_after: !reuse,
        }
    }

    /// Decision for a session's options
    pub fn from_options(options: &SessionOptions) -> Self {
        Self::new(options.reuse_db, options.create_db)
    }
}

/// Test databases owned by one session
#[derive(Debug)]
pub struct DatabaseLifecycle {
    config: TestDatabaseConfig,
    decision: ReuseDecision,
    record: SetupRecord,
    verbosity: u8,
    finalized: bool,
}

impl DatabaseLifecycle {
    /// Resolve names and create or reuse every test database.
    ///
    /// # Errors
    ///
    /// Any failure is returned as [`Error::SessionSetup`]; the session
    /// cannot run database tests after it.
    pub fn setup<B: DatabaseBackend + ?Sized>(
        backend: &B,
        gate: &AccessGate,
        options: &SessionOptions,
    ) -> Result<Self> {
        Self::try_setup(backend, gate, options).map_err(|e| {
            error!(target: "dbscope::db", error = %e, "Test database setup failed");
            backend.connections().reset_test_names();
            Error::session_setup(&e)
        })
    }

    fn try_setup<B: DatabaseBackend + ?Sized>(
        backend: &B,
        gate: &AccessGate,
        options: &SessionOptions,
    ) -> Result<Self> {
        let mut config = TestDatabaseConfig::new(options.worker.clone());
        config.resolve(backend.connections())?;

        let decision = ReuseDecision::from_options(options);
        debug!(
            target: "dbscope::db",
            can_reuse = decision.can_reuse,
            should_drop_after = decision.should_drop_after,
            "Reuse decision"
        );

        let mut plan = CreationPlan::new();
        if decision.can_reuse {
            gate.with_access(|| {
                for alias in backend.connections().aliases() {
                    if test_database_exists(backend, &alias) {
                        plan.set(alias, Box::new(ReuseCreator));
                    }
                }
            });
        }

        let record = gate.with_access(|| setup_databases(backend, &plan, options.verbosity))?;
        info!(
            target: "dbscope::db",
            databases = record.entries().len(),
            reused = plan.reused_aliases().len(),
            "Test databases ready"
        );

        Ok(Self {
            config,
            decision,
            record,
            verbosity: options.verbosity,
            finalized: false,
        })
    }

    /// Resolved names for this session
    pub fn config(&self) -> &TestDatabaseConfig {
        &self.config
    }

    /// Reuse policy in effect
    pub fn decision(&self) -> ReuseDecision {
        self.decision
    }

    /// What setup did per connection
    pub fn record(&self) -> &SetupRecord {
        &self.record
    }

    /// Whether [`DatabaseLifecycle::finalize`] has run
    pub fn is_finalized(&self) -> bool {
        self.finalized
    }

    /// Session-end finalizer: drop the test databases unless they are kept
    /// for reuse. Runs once; later calls do nothing.
    pub fn finalize<B: DatabaseBackend + ?Sized>(
        &mut self,
        backend: &B,
        gate: &AccessGate,
    ) -> Result<()> {
        if self.finalized {
            return Ok(());
        }
        self.finalized = true;

        let result = if self.decision.should_drop_after {
            gate.with_access(|| teardown_databases(backend, &self.record, self.verbosity))
        } else {
            info!(target: "dbscope::db", "Keeping test databases for the next run");
            release_databases(backend, &self.record)
        };
        backend.connections().reset_test_names();
        result
    }
}
