//! dbscope - test database lifecycle and access gating
//!
//! dbscope lets a test declare that it needs a database and takes care of
//! the rest: test databases are created (or reused) once per session,
//! database access is blocked everywhere except inside tests that asked for
//! it, and every test leaves the database as it found it.
//!
//! # Quick Start
//!
//! ```ignore
//! use dbscope::{AccessGate, SessionOptions, Settings, SqliteBackend, TestDeclaration, TestSession};
//! use std::sync::Arc;
//!
//! let settings = Settings::from_file("dbscope.toml".as_ref())?;
//! let gate = Arc::new(AccessGate::new());
//! let backend = SqliteBackend::from_settings(&settings, gate.clone(), "target/testdb")?;
//! let session = TestSession::new(Arc::new(backend), gate, SessionOptions::from_env()?);
//!
//! session.run(&TestDeclaration::new().database(), |ctx| {
//!     // rolled back when the closure returns
//! })?;
//! session.finish()?;
//! ```
//!
//! # Architecture
//!
//! - `dbscope-core`: errors, settings, markers, collaborator traits
//! - `dbscope-engine`: gate, name resolution, reuse probe, lifecycle, scopes
//! - `dbscope-sqlite`: SQLite implementation of the database hooks
//! - `dbscope-liveserver`: axum live server for end-to-end tests

pub use dbscope_core::{
    ConnectionRegistry, ConnectionSettings, DatabaseBackend, Error, LiveServer,
    LiveServerAddress, LiveServerFactory, Marker, MarkerValue, PortRange, Result, SessionOptions,
    Settings, TestDeclaration, UrlConf, ACCESS_VIOLATION_MESSAGE, DATABASE_MARKER, DEFAULT_ALIAS,
    DEFAULT_LIVE_SERVER_ADDRESS, IN_MEMORY_NAME, URLS_MARKER,
};
pub use dbscope_engine::{
    test_database_exists, test_database_name, AccessGate, CreationPlan, DatabaseCreator,
    DatabaseLifecycle, GateGuard, GateMode, RealCreator, ReuseCreator, ReuseDecision, ScopeState,
    SetupEntry, SetupRecord, TestContext, TestDatabaseConfig, TestScopeController, TestSession,
};
pub use dbscope_liveserver::{AxumLiveServer, UrlRoutes};
pub use dbscope_sqlite::{sqlite_error, Migration, SqliteBackend, SQLITE_ENGINE};

/// Live server construction for sessions
pub mod liveserver {
    pub use dbscope_liveserver::{dispatcher, factory};
}
