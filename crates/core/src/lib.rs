//! Core types and traits for dbscope
//!
//! This crate defines the vocabulary shared by every other crate:
//! - Error: error taxonomy and `Result` alias
//! - ConnectionSettings / ConnectionRegistry: aliased logical connections
//! - Settings / SessionOptions: settings file and per-run switches
//! - LiveServerAddress: `host:port[,range]` address specifications
//! - UrlConf: active URL routing configuration
//! - Marker / TestDeclaration: validated per-test requirements
//! - Traits: DatabaseBackend and LiveServer collaborator interfaces

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod address;
pub mod config;
pub mod connection;
pub mod error;
pub mod marker;
pub mod traits;
pub mod urlconf;

pub use address::{LiveServerAddress, PortRange};
pub use config::{SessionOptions, Settings, DEFAULT_LIVE_SERVER_ADDRESS};
pub use connection::{ConnectionRegistry, ConnectionSettings, DEFAULT_ALIAS, IN_MEMORY_NAME};
pub use error::{Error, Result, ACCESS_VIOLATION_MESSAGE};
pub use marker::{Marker, MarkerValue, TestDeclaration, DATABASE_MARKER, URLS_MARKER};
pub use traits::{DatabaseBackend, LiveServer, LiveServerFactory};
pub use urlconf::UrlConf;
