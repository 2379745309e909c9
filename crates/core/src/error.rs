//! Error types for dbscope
//!
//! Every failure the session can report is a variant of [`Error`]. The
//! variants map onto how a failure propagates:
//!
//! | Variant | Raised when | Propagation |
//! |---------|-------------|-------------|
//! | `AccessViolation` | database touched while the gate is closed | fails the current test |
//! | `MarkerValidation` | malformed marker arguments | fails before the test body runs |
//! | `SessionSetup` | test database creation or migration failed | every database test in the session |
//! | `Probe` | reuse probe hit an operational error | never surfaced, read as "does not exist" |
//!
//! An unbalanced gate `restore()` is a programming error and panics instead
//! of producing a variant.

use std::io;
use thiserror::Error;

/// Message carried by [`Error::AccessViolation`].
pub const ACCESS_VIOLATION_MESSAGE: &str =
    "Database access not allowed, use the \"database\" marker to enable";

/// Result type alias for dbscope operations
pub type Result<T> = std::result::Result<T, Error>;

/// Error types for dbscope
#[derive(Debug, Error)]
pub enum Error {
    /// The access gate is closed for the current test
    #[error("{}", ACCESS_VIOLATION_MESSAGE)]
    AccessViolation,

    /// Creating or migrating the test databases failed
    #[error("test database setup failed: {reason}")]
    SessionSetup {
        /// Underlying failure, rendered once and shared by later tests
        reason: String,
    },

    /// Reuse probe could not reach a test database
    #[error("probe of alias '{alias}' failed: {reason}")]
    Probe {
        /// Connection alias that was probed
        alias: String,
        /// Driver message
        reason: String,
    },

    /// Marker arguments do not match the marker signature
    #[error("invalid '{marker}' marker: {reason}")]
    MarkerValidation {
        /// Marker name
        marker: String,
        /// What was wrong with the arguments
        reason: String,
    },

    /// Test database names were already resolved in this session
    #[error("test database names were already resolved for this session")]
    NamesAlreadyResolved,

    /// No connection is configured under this alias
    #[error("unknown connection alias '{0}'")]
    UnknownAlias(String),

    /// The backend cannot serve this engine identifier
    #[error("engine '{engine}' is not supported by this backend (alias '{alias}')")]
    UnsupportedEngine {
        /// Connection alias
        alias: String,
        /// Configured engine identifier
        engine: String,
    },

    /// A test database already exists and clobbering was not allowed
    #[error("test database '{0}' already exists")]
    DatabaseExists(String),

    /// Driver-level failure
    #[error("database error: {0}")]
    Database(String),

    /// Settings could not be read or are inconsistent
    #[error("configuration error: {0}")]
    Config(String),

    /// Live server address specification could not be parsed
    #[error("invalid live server address '{spec}': {reason}")]
    InvalidAddress {
        /// The address specification as given
        spec: String,
        /// What was wrong with it
        reason: String,
    },

    /// Live server could not be started or stopped
    #[error("live server error: {0}")]
    LiveServer(String),

    /// I/O error (database files, settings files, sockets)
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),
}

impl Error {
    /// Create a driver-level error
    pub fn database(msg: impl Into<String>) -> Self {
        Error::Database(msg.into())
    }

    /// Create a configuration error
    pub fn config(msg: impl Into<String>) -> Self {
        Error::Config(msg.into())
    }

    /// Create a marker validation error
    pub fn marker(marker: impl Into<String>, reason: impl Into<String>) -> Self {
        Error::MarkerValidation {
            marker: marker.into(),
            reason: reason.into(),
        }
    }

    /// Wrap any failure raised while creating test databases
    pub fn session_setup(err: &Error) -> Self {
        match err {
            Error::SessionSetup { reason } => Error::SessionSetup {
                reason: reason.clone(),
            },
            other => Error::SessionSetup {
                reason: other.to_string(),
            },
        }
    }

    /// True for gate rejections
    pub fn is_access_violation(&self) -> bool {
        matches!(self, Error::AccessViolation)
    }

    /// True for failures of the database itself (missing file, refused
    /// connection, driver error), as opposed to usage errors.
    pub fn is_operational(&self) -> bool {
        matches!(self, Error::Database(_) | Error::Io(_) | Error::Probe { .. })
    }
}
