//! Test markers and the typed declaration derived from them
//!
//! Runners attach [`Marker`]s (name + positional and keyword arguments) to a
//! test. Before the test runs they are validated into a [`TestDeclaration`],
//! so malformed markers are reported at collection time and the session
//! never inspects raw marker arguments.
//!
//! Recognised markers:
//! - `database(transaction: bool = false)`
//! - `urls(modstr: str)`

use crate::error::{Error, Result};
use std::fmt;

/// Name of the database access marker.
pub const DATABASE_MARKER: &str = "database";
/// Name of the URL configuration marker.
pub const URLS_MARKER: &str = "urls";

/// A marker argument value
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MarkerValue {
    /// Boolean argument
    Bool(bool),
    /// Integer argument
    Int(i64),
    /// String argument
    Str(String),
}

impl MarkerValue {
    fn type_name(&self) -> &'static str {
        match self {
            MarkerValue::Bool(_) => "bool",
            MarkerValue::Int(_) => "int",
            MarkerValue::Str(_) => "str",
        }
    }
}

impl fmt::Display for MarkerValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MarkerValue::Bool(b) => write!(f, "{}", b),
            MarkerValue::Int(i) => write!(f, "{}", i),
            MarkerValue::Str(s) => write!(f, "{:?}", s),
        }
    }
}

impl From<bool> for MarkerValue {
    fn from(value: bool) -> Self {
        MarkerValue::Bool(value)
    }
}

impl From<i64> for MarkerValue {
    fn from(value: i64) -> Self {
        MarkerValue::Int(value)
    }
}

impl From<&str> for MarkerValue {
    fn from(value: &str) -> Self {
        MarkerValue::Str(value.to_string())
    }
}

impl From<String> for MarkerValue {
    fn from(value: String) -> Self {
        MarkerValue::Str(value)
    }
}

/// A marker as attached by the runner
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Marker {
    /// Marker name
    pub name: String,
    /// Positional arguments
    pub args: Vec<MarkerValue>,
    /// Keyword arguments, in the order given
    pub kwargs: Vec<(String, MarkerValue)>,
}

impl Marker {
    /// Marker without arguments
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            args: Vec::new(),
            kwargs: Vec::new(),
        }
    }

    /// `database` marker without arguments
    pub fn database() -> Self {
        Self::new(DATABASE_MARKER)
    }

    /// `urls` marker naming a URL configuration
    pub fn urls(modstr: impl Into<String>) -> Self {
        Self::new(URLS_MARKER).arg(modstr.into())
    }

    /// Append a positional argument
    pub fn arg(mut self, value: impl Into<MarkerValue>) -> Self {
        self.args.push(value.into());
        self
    }

    /// Append a keyword argument
    pub fn kwarg(mut self, key: impl Into<String>, value: impl Into<MarkerValue>) -> Self {
        self.kwargs.push((key.into(), value.into()));
        self
    }

    /// Bind the arguments to the parameter list, as a call would.
    fn bind(&self, params: &[&str]) -> Result<Vec<Option<MarkerValue>>> {
        if self.args.len() > params.len() {
            return Err(Error::marker(
                &self.name,
                format!(
                    "takes at most {} argument(s) ({} given)",
                    params.len(),
                    self.args.len()
                ),
            ));
        }

        let mut bound: Vec<Option<MarkerValue>> = vec![None; params.len()];
        for (slot, value) in bound.iter_mut().zip(&self.args) {
            *slot = Some(value.clone());
        }
        for (key, value) in &self.kwargs {
            let index = params.iter().position(|p| p == key).ok_or_else(|| {
                Error::marker(&self.name, format!("unexpected keyword argument '{}'", key))
            })?;
            if bound[index].is_some() {
                return Err(Error::marker(
                    &self.name,
                    format!("got multiple values for argument '{}'", key),
                ));
            }
            bound[index] = Some(value.clone());
        }
        Ok(bound)
    }
}

/// Typed, validated description of what a test needs
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TestDeclaration {
    /// The test touches the database
    pub use_database: bool,
    /// The test needs real commits instead of rollback isolation
    pub transactional: bool,
    /// URL configuration to install for the duration of the test
    pub url_config: Option<String>,
    /// The test talks to the live server
    pub live_server: bool,
    /// The test is a framework-native test case that manages its own setup
    pub framework_case: bool,
}

impl TestDeclaration {
    /// Declaration of a test that needs nothing
    pub fn new() -> Self {
        Self::default()
    }

    /// Request database access
    pub fn database(mut self) -> Self {
        self.use_database = true;
        self
    }

    /// Request transactional database access
    pub fn transactional(mut self) -> Self {
        self.use_database = true;
        self.transactional = true;
        self
    }

    /// Install a URL configuration for the test
    pub fn urls(mut self, modstr: impl Into<String>) -> Self {
        self.url_config = Some(modstr.into());
        self
    }

    /// Request the live server
    pub fn live_server(mut self) -> Self {
        self.live_server = true;
        self
    }

    /// Mark the test as a framework-native test case
    pub fn framework_case(mut self) -> Self {
        self.framework_case = true;
        self
    }

    /// Validate markers into a declaration.
    ///
    /// Markers this crate does not know are left to the runner. When a
    /// marker appears more than once the last occurrence wins.
    ///
    /// # Errors
    ///
    /// Returns [`Error::MarkerValidation`] for wrong arity, unknown keywords,
    /// duplicate arguments or mistyped values.
    pub fn from_markers(markers: &[Marker]) -> Result<Self> {
        let mut decl = Self::new();
        for marker in markers {
            match marker.name.as_str() {
                DATABASE_MARKER => {
                    let transaction = match marker.bind(&["transaction"])?.remove(0) {
                        None => false,
                        Some(MarkerValue::Bool(b)) => b,
                        Some(other) => {
                            return Err(Error::marker(
                                &marker.name,
                                format!("'transaction' must be a bool, got {}", other.type_name()),
                            ))
                        }
                    };
                    decl.use_database = true;
                    decl.transactional = transaction;
                }
                URLS_MARKER => {
                    let modstr = match marker.bind(&["modstr"])?.remove(0) {
                        Some(MarkerValue::Str(s)) if !s.is_empty() => s,
                        Some(MarkerValue::Str(_)) => {
                            return Err(Error::marker(&marker.name, "'modstr' must not be empty"))
                        }
                        Some(other) => {
                            return Err(Error::marker(
                                &marker.name,
                                format!("'modstr' must be a str, got {}", other.type_name()),
                            ))
                        }
                        None => {
                            return Err(Error::marker(
                                &marker.name,
                                "missing required argument 'modstr'",
                            ))
                        }
                    };
                    decl.url_config = Some(modstr);
                }
                _ => {}
            }
        }
        Ok(decl)
    }

    /// Whether the test must run in the transactional scope: requested
    /// explicitly, implied by the live server (which cannot see an open
    /// transaction), or by a framework-native test case.
    pub fn wants_transaction(&self) -> bool {
        self.transactional || self.live_server || self.framework_case
    }

    /// Whether the test needs the test databases at all
    pub fn wants_database(&self) -> bool {
        self.use_database || self.wants_transaction()
    }
}
