//! Live HTTP server for end-to-end tests
//!
//! - AxumLiveServer: binds the first free port of an address specification
//!   and serves from a background thread
//! - UrlRoutes: named routers, picked per request from the active URL
//!   configuration
//! - factory: builds servers for a test session on first use

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod routes;
pub mod server;

pub use routes::{dispatcher, UrlRoutes};
pub use server::{factory, AxumLiveServer};
