//! Access gate: the switch that blocks or allows database access
//!
//! The gate holds the currently installed mode plus a stack of the modes it
//! replaced. Every `enable()`/`disable()` pushes, every `restore()` pops, so
//! nested scopes unwind to exactly the state they found.
//!
//! A session disables the gate once at start; tests then open short
//! `enable()`/`restore()` windows. Backends call [`AccessGate::check`] before
//! opening any connection, which is what turns a closed gate into an
//! [`Error::AccessViolation`] without touching the database.

use dbscope_core::{Error, Result};
use parking_lot::Mutex;
use tracing::{debug, warn};

/// Mode installed in the gate
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GateMode {
    /// Database access fails immediately
    Blocked,
    /// Database access goes to the real driver
    Allowed,
}

#[derive(Debug)]
struct GateState {
    current: GateMode,
    history: Vec<GateMode>,
}

/// Stack-based database access switch
///
/// One gate is shared by a session, its backend and its live server.
/// Uses parking_lot::Mutex so a test that panics while holding the lock
/// cannot poison the gate for the tests that follow.
#[derive(Debug)]
pub struct AccessGate {
    state: Mutex<GateState>,
}

impl Default for AccessGate {
    fn default() -> Self {
        Self::new()
    }
}

impl AccessGate {
    /// Create a gate with the real handler installed and no history
    pub fn new() -> Self {
        Self {
            state: Mutex::new(GateState {
                current: GateMode::Allowed,
                history: Vec::new(),
            }),
        }
    }

    /// Currently installed mode
    pub fn mode(&self) -> GateMode {
        self.state.lock().current
    }

    /// Whether database access is currently allowed
    pub fn is_allowed(&self) -> bool {
        self.mode() == GateMode::Allowed
    }

    /// Number of modes waiting to be restored
    pub fn depth(&self) -> usize {
        self.state.lock().history.len()
    }

    /// Allow database access until the matching `restore()`
    pub fn enable(&self) {
        self.install(GateMode::Allowed);
    }

    /// Block database access until the matching `restore()`
    pub fn disable(&self) {
        self.install(GateMode::Blocked);
    }

    /// Reinstall the mode replaced by the most recent `enable()`/`disable()`.
    ///
    /// # Panics
    ///
    /// Panics when there is nothing to restore: enable/disable and restore
    /// calls are unbalanced, which is a bug in the caller.
    pub fn restore(&self) {
        let mut state = self.state.lock();
        let previous = state.history.pop();
        assert!(previous.is_some(), "no state to pop!");
        if let Some(previous) = previous {
            state.current = previous;
            debug!(target: "dbscope::gate", mode = ?previous, depth = state.history.len(), "Gate restored");
        }
    }

    /// Fail with [`Error::AccessViolation`] unless access is allowed
    pub fn check(&self) -> Result<()> {
        match self.mode() {
            GateMode::Allowed => Ok(()),
            GateMode::Blocked => {
                warn!(target: "dbscope::gate", "Blocked database access outside a database scope");
                Err(Error::AccessViolation)
            }
        }
    }

    /// Enable access for the lifetime of the returned guard
    pub fn enabled(&self) -> GateGuard<'_> {
        self.enable();
        GateGuard { gate: self }
    }

    /// Run `f` with access enabled, restoring afterwards even if `f` panics
    pub fn with_access<T>(&self, f: impl FnOnce() -> T) -> T {
        let _guard = self.enabled();
        f()
    }

    fn install(&self, mode: GateMode) {
        let mut state = self.state.lock();
        let previous = std::mem::replace(&mut state.current, mode);
        state.history.push(previous);
        debug!(target: "dbscope::gate", mode = ?mode, depth = state.history.len(), "Gate installed");
    }
}

/// Scope of enabled access; restores the gate when dropped
#[must_use = "access is restored as soon as the guard is dropped"]
#[derive(Debug)]
pub struct GateGuard<'a> {
    gate: &'a AccessGate,
}

impl Drop for GateGuard<'_> {
    fn drop(&mut self) {
        self.gate.restore();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::panic::{catch_unwind, AssertUnwindSafe};

    #[test]
    fn test_new_gate_allows() {
        let gate = AccessGate::new();
        assert!(gate.is_allowed());
        assert_eq!(gate.depth(), 0);
        assert!(gate.check().is_ok());
    }

    #[test]
    fn test_disable_blocks_access() {
        let gate = AccessGate::new();
        gate.disable();
        let err = gate.check().unwrap_err();
        assert!(err.is_access_violation());
        assert!(err.to_string().contains("Database access not allowed"));
    }

    #[test]
    fn test_nested_enable_restores_original() {
        let gate = AccessGate::new();
        gate.disable();

        gate.enable();
        gate.enable();
        assert!(gate.is_allowed());
        gate.restore();
        assert!(gate.is_allowed());
        gate.restore();
        assert_eq!(gate.mode(), GateMode::Blocked);
        assert_eq!(gate.depth(), 1);
    }

    #[test]
    #[should_panic(expected = "no state to pop!")]
    fn test_restore_on_empty_history_panics() {
        let gate = AccessGate::new();
        gate.enable();
        gate.enable();
        gate.restore();
        gate.restore();
        gate.restore();
    }

    #[test]
    fn test_guard_restores_on_panic() {
        let gate = AccessGate::new();
        gate.disable();

        let result = catch_unwind(AssertUnwindSafe(|| {
            gate.with_access(|| {
                assert!(gate.is_allowed());
                panic!("test body failed");
            })
        }));

        assert!(result.is_err());
        assert_eq!(gate.mode(), GateMode::Blocked);
        assert_eq!(gate.depth(), 1);
    }

    #[test]
    fn test_disable_inside_enabled_scope() {
        let gate = AccessGate::new();
        gate.disable();
        {
            let _guard = gate.enabled();
            gate.disable();
            assert!(gate.check().is_err());
            gate.restore();
            assert!(gate.check().is_ok());
        }
        assert!(gate.check().is_err());
    }
}
