//! SQLite backend for dbscope
//!
//! Implements the database hooks the engine drives (connect, create,
//! destroy, isolate, flush) on top of rusqlite, one file per database.

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod backend;
pub mod migration;

pub use backend::{sqlite_error, SqliteBackend, DATABASE_EXTENSION, SQLITE_ENGINE};
pub use migration::{Migration, MIGRATIONS_TABLE};
