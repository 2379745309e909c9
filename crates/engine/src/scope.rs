//! Per-test database scopes
//!
//! Each test runs in one of three states, picked from its declaration:
//!
//! ```text
//! IDLE ──(database)──────────────> DB_SCOPE_ACTIVE ──────────> IDLE
//! IDLE ──(transactional/live)────> TRANSACTIONAL_SCOPE_ACTIVE ─> IDLE
//! ```
//!
//! A DB scope wraps the test in a unit of work on every connection and rolls
//! it back afterwards. A transactional scope lets the test commit for real,
//! then flushes every table and closes every connection, because another
//! thread (the live server) may have seen the data. Both scopes open the gate
//! on entry and restore it on exit. Idle tests leave the gate closed.

use crate::gate::AccessGate;
use dbscope_core::{DatabaseBackend, Error, Result, TestDeclaration};
use parking_lot::Mutex;
use std::panic::{catch_unwind, resume_unwind, AssertUnwindSafe};
use std::sync::Arc;
use tracing::{debug, warn};

/// Scope a test is running in
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScopeState {
    /// No database access
    Idle,
    /// Database access, rolled back after the test
    DbScopeActive,
    /// Database access with real commits, flushed after the test
    TransactionalScopeActive,
}

impl ScopeState {
    /// Scope for a test, highest priority first: transactional, plain
    /// database, idle.
    pub fn select(declaration: &TestDeclaration) -> Self {
        if declaration.wants_transaction() {
            ScopeState::TransactionalScopeActive
        } else if declaration.use_database {
            ScopeState::DbScopeActive
        } else {
            ScopeState::Idle
        }
    }
}

/// Opens and closes per-test scopes for one session
pub struct TestScopeController<B: DatabaseBackend + ?Sized> {
    backend: Arc<B>,
    gate: Arc<AccessGate>,
    state: Mutex<ScopeState>,
}

impl<B: DatabaseBackend + ?Sized> TestScopeController<B> {
    /// Controller driving `backend` and `gate`
    pub fn new(backend: Arc<B>, gate: Arc<AccessGate>) -> Self {
        Self {
            backend,
            gate,
            state: Mutex::new(ScopeState::Idle),
        }
    }

    /// Current state
    pub fn state(&self) -> ScopeState {
        *self.state.lock()
    }

    /// Enter the scope `declaration` selects.
    ///
    /// # Panics
    ///
    /// Panics if a scope is already active; every `enter` must be paired
    /// with an `exit`.
    ///
    /// # Errors
    ///
    /// Fails if a unit of work cannot be started. Nothing is left open and
    /// the gate is restored.
    pub fn enter(&self, declaration: &TestDeclaration) -> Result<ScopeState> {
        let mut state = self.state.lock();
        assert_eq!(*state, ScopeState::Idle, "test scope already active");

        let next = ScopeState::select(declaration);
        match next {
            ScopeState::Idle => {}
            ScopeState::DbScopeActive => {
                self.gate.enable();
                if let Err(e) = self.begin_all() {
                    self.gate.restore();
                    return Err(e);
                }
            }
            ScopeState::TransactionalScopeActive => self.gate.enable(),
        }
        *state = next;
        debug!(target: "dbscope::scope", state = ?next, "Entered test scope");
        Ok(next)
    }

    /// Leave the active scope and return to idle.
    ///
    /// Cleanup runs for every connection even when one of them fails; the
    /// gate is always restored and the first failure is returned.
    pub fn exit(&self) -> Result<()> {
        let previous = std::mem::replace(&mut *self.state.lock(), ScopeState::Idle);
        let result = match previous {
            ScopeState::Idle => Ok(()),
            ScopeState::DbScopeActive => {
                let result = self.each_alias(|alias| self.backend.rollback_isolation(alias));
                self.gate.restore();
                result
            }
            ScopeState::TransactionalScopeActive => {
                let flushed = self.each_alias(|alias| self.backend.flush(alias));
                let closed = self.each_alias(|alias| self.backend.close(alias));
                self.gate.restore();
                flushed.and(closed)
            }
        };
        debug!(target: "dbscope::scope", state = ?previous, ok = result.is_ok(), "Left test scope");
        result
    }

    /// Run `body` inside the scope `declaration` selects.
    ///
    /// The scope is exited whether `body` returns or panics; a panic is
    /// resumed after cleanup.
    pub fn run<T>(&self, declaration: &TestDeclaration, body: impl FnOnce() -> T) -> Result<T> {
        self.enter(declaration)?;
        let outcome = catch_unwind(AssertUnwindSafe(body));
        let exited = self.exit();
        match outcome {
            Ok(value) => exited.map(|()| value),
            Err(payload) => {
                if let Err(e) = exited {
                    warn!(target: "dbscope::scope", error = %e, "Scope cleanup failed after a panicking test");
                }
                resume_unwind(payload)
            }
        }
    }

    fn begin_all(&self) -> Result<()> {
        let aliases = self.backend.connections().aliases();
        for (i, alias) in aliases.iter().enumerate() {
            if let Err(e) = self.backend.begin_isolation(alias) {
                for started in aliases[..i].iter().rev() {
                    if let Err(undo) = self.backend.rollback_isolation(started) {
                        warn!(target: "dbscope::scope", alias = %started, error = %undo, "Rollback failed");
                    }
                }
                return Err(e);
            }
        }
        Ok(())
    }

    fn each_alias(&self, mut op: impl FnMut(&str) -> Result<()>) -> Result<()> {
        let mut first_error: Option<Error> = None;
        for alias in self.backend.connections().aliases() {
            if let Err(e) = op(&alias) {
                warn!(target: "dbscope::scope", alias = %alias, error = %e, "Scope cleanup failed");
                first_error.get_or_insert(e);
            }
        }
        first_error.map_or(Ok(()), Err)
    }
}
