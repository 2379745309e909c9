//! Test database lifecycle and access gating
//!
//! This crate orchestrates a test run against any [`DatabaseBackend`]:
//! - AccessGate: stack-based switch blocking database access outside tests
//! - Names: per-connection test database names with worker suffixes
//! - Probe: does a test database from an earlier run exist?
//! - Creation: RealCreator / ReuseCreator strategies and setup/teardown
//! - Lifecycle: once-per-session setup and the session-end finalizer
//! - Scope: per-test DB scope (rolled back) or transactional scope (flushed)
//! - Session: ties the above together for a test harness
//!
//! [`DatabaseBackend`]: dbscope_core::DatabaseBackend

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod creation;
pub mod gate;
pub mod lifecycle;
pub mod names;
pub mod probe;
pub mod scope;
pub mod session;

#[cfg(test)]
mod fake;

pub use creation::{
    release_databases, setup_databases, teardown_databases, CreationPlan, DatabaseCreator,
    RealCreator, ReuseCreator, SetupEntry, SetupRecord,
};
pub use gate::{AccessGate, GateGuard, GateMode};
pub use lifecycle::{DatabaseLifecycle, ReuseDecision};
pub use names::{test_database_name, TestDatabaseConfig};
pub use probe::test_database_exists;
pub use scope::{ScopeState, TestScopeController};
pub use session::{TestContext, TestSession};
