//! Settings file and session options
//!
//! [`Settings`] describes the databases under test and is read from a TOML
//! file. [`SessionOptions`] carries the per-run switches (`--reuse-db`,
//! `--create-db`, `--ds`, `--liveserver`) that a runner hands to the session;
//! they can also be read from `DBSCOPE_*` environment variables since the
//! default test harness has no room for extra flags.

use crate::connection::{ConnectionRegistry, ConnectionSettings};
use crate::error::{Error, Result};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

/// Environment variable: reuse test databases left by a previous run.
pub const ENV_REUSE_DB: &str = "DBSCOPE_REUSE_DB";
/// Environment variable: force recreation even when reuse is requested.
pub const ENV_CREATE_DB: &str = "DBSCOPE_CREATE_DB";
/// Environment variable: path of the settings file.
pub const ENV_SETTINGS: &str = "DBSCOPE_SETTINGS";
/// Environment variable: live server address override (same as `--liveserver`).
pub const ENV_LIVESERVER: &str = "DBSCOPE_LIVESERVER";
/// Environment variable: live server address used when no override is given.
pub const ENV_LIVE_SERVER_ADDRESS: &str = "DBSCOPE_LIVE_SERVER_ADDRESS";
/// Environment variable: id of the parallel worker running this process.
pub const ENV_WORKER: &str = "DBSCOPE_WORKER";
/// Environment variable: output verbosity (0-2).
pub const ENV_VERBOSITY: &str = "DBSCOPE_VERBOSITY";

/// Live server address used when neither the options nor the environment
/// provide one.
pub const DEFAULT_LIVE_SERVER_ADDRESS: &str = "localhost:8081,8100-8200,9100-9200,10100-10200";

/// Settings describing the databases under test.
///
/// # Example
///
/// ```toml
/// root_urlconf = "app"
///
/// [databases.default]
/// engine = "sqlite"
/// name = "app"
///
/// [databases.replica]
/// engine = "sqlite"
/// name = "app_replica"
/// test_name = "replica_under_test"
/// ```
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Settings {
    /// Connections keyed by alias.
    #[serde(default)]
    pub databases: BTreeMap<String, ConnectionSettings>,
    /// Name of the URL configuration served by the live server.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub root_urlconf: Option<String>,
}

impl Settings {
    /// Returns a commented settings file with a single SQLite connection.
    pub fn default_toml() -> &'static str {
        r#"# dbscope settings
#
# URL configuration served by the live server (optional).
# root_urlconf = "default"

# One table per connection alias.
#   engine    = backend identifier ("sqlite")
#   name      = live database name
#   test_name = explicit test database name (default: "test_" + name)
[databases.default]
engine = "sqlite"
name = "app"
"#
    }

    /// Parse settings from TOML text.
    ///
    /// # Errors
    ///
    /// Returns a configuration error if the text is not valid TOML or
    /// declares no database.
    pub fn from_toml_str(content: &str) -> Result<Self> {
        let settings: Settings = toml::from_str(content)
            .map_err(|e| Error::config(format!("Failed to parse settings: {}", e)))?;
        settings.validate()?;
        Ok(settings)
    }

    /// Read and parse settings from a file path.
    pub fn from_file(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path).map_err(|e| {
            Error::config(format!(
                "Failed to read settings file '{}': {}",
                path.display(),
                e
            ))
        })?;
        Self::from_toml_str(&content).map_err(|e| match e {
            Error::Config(msg) => Error::config(format!("{} ({})", msg, path.display())),
            other => other,
        })
    }

    /// Load the settings selected by `options`, falling back to the
    /// `DBSCOPE_SETTINGS` environment variable.
    ///
    /// # Errors
    ///
    /// Returns a configuration error when no settings source is configured.
    pub fn load(options: &SessionOptions) -> Result<Self> {
        let path = options
            .settings
            .clone()
            .or_else(|| std::env::var_os(ENV_SETTINGS).map(PathBuf::from))
            .ok_or_else(|| {
                Error::config(format!(
                    "no settings configured: pass a settings path or set {}",
                    ENV_SETTINGS
                ))
            })?;
        Self::from_file(&path)
    }

    /// Build the connection registry described by these settings.
    pub fn registry(&self) -> ConnectionRegistry {
        ConnectionRegistry::from_connections(self.databases.clone())
    }

    fn validate(&self) -> Result<()> {
        if self.databases.is_empty() {
            return Err(Error::config("settings declare no databases"));
        }
        for (alias, db) in &self.databases {
            if db.name.is_empty() {
                return Err(Error::config(format!("database '{}' has an empty name", alias)));
            }
        }
        Ok(())
    }
}

/// Per-run switches consumed by the session
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionOptions {
    /// Reuse test databases from a previous run and keep them afterwards
    pub reuse_db: bool,
    /// Recreate test databases even when `reuse_db` is set
    pub create_db: bool,
    /// Settings file override
    pub settings: Option<PathBuf>,
    /// Live server address override
    pub liveserver: Option<String>,
    /// Parallel worker id, appended to every test database name
    pub worker: Option<String>,
    /// 0 = quiet, 1 = normal, 2 = include database names in messages
    pub verbosity: u8,
}

impl Default for SessionOptions {
    fn default() -> Self {
        Self {
            reuse_db: false,
            create_db: false,
            settings: None,
            liveserver: None,
            worker: None,
            verbosity: 1,
        }
    }
}

impl SessionOptions {
    /// Options with every switch off
    pub fn new() -> Self {
        Self::default()
    }

    /// Read options from the process environment
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Read options through an arbitrary variable lookup
    pub fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let verbosity = match lookup(ENV_VERBOSITY) {
            Some(raw) => raw.trim().parse::<u8>().map_err(|_| {
                Error::config(format!("{} must be a small integer, got '{}'", ENV_VERBOSITY, raw))
            })?,
            None => 1,
        };
        Ok(Self {
            reuse_db: parse_flag(ENV_REUSE_DB, lookup(ENV_REUSE_DB))?,
            create_db: parse_flag(ENV_CREATE_DB, lookup(ENV_CREATE_DB))?,
            settings: lookup(ENV_SETTINGS).filter(|s| !s.is_empty()).map(PathBuf::from),
            liveserver: lookup(ENV_LIVESERVER).filter(|s| !s.is_empty()),
            worker: lookup(ENV_WORKER).filter(|s| !s.is_empty()),
            verbosity,
        })
    }

    /// Set `reuse_db`
    pub fn with_reuse_db(mut self, reuse_db: bool) -> Self {
        self.reuse_db = reuse_db;
        self
    }

    /// Set `create_db`
    pub fn with_create_db(mut self, create_db: bool) -> Self {
        self.create_db = create_db;
        self
    }

    /// Set the settings file path
    pub fn with_settings(mut self, path: impl Into<PathBuf>) -> Self {
        self.settings = Some(path.into());
        self
    }

    /// Set the live server address override
    pub fn with_liveserver(mut self, addr: impl Into<String>) -> Self {
        self.liveserver = Some(addr.into());
        self
    }

    /// Set the parallel worker id
    pub fn with_worker(mut self, worker: impl Into<String>) -> Self {
        self.worker = Some(worker.into());
        self
    }

    /// Set the verbosity
    pub fn with_verbosity(mut self, verbosity: u8) -> Self {
        self.verbosity = verbosity;
        self
    }

    /// Address specification for the live server: the override, then
    /// `DBSCOPE_LIVE_SERVER_ADDRESS`, then [`DEFAULT_LIVE_SERVER_ADDRESS`].
    pub fn live_server_address(&self) -> String {
        self.liveserver
            .clone()
            .or_else(|| {
                std::env::var(ENV_LIVE_SERVER_ADDRESS)
                    .ok()
                    .filter(|s| !s.is_empty())
            })
            .unwrap_or_else(|| DEFAULT_LIVE_SERVER_ADDRESS.to_string())
    }
}

fn parse_flag(key: &str, raw: Option<String>) -> Result<bool> {
    let Some(raw) = raw else {
        return Ok(false);
    };
    match raw.trim().to_ascii_lowercase().as_str() {
        "" | "0" | "false" | "no" | "off" => Ok(false),
        "1" | "true" | "yes" | "on" => Ok(true),
        other => Err(Error::config(format!(
            "{} must be a boolean, got '{}'",
            key, other
        ))),
    }
}
