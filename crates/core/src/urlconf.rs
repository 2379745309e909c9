//! Active URL routing configuration
//!
//! The live server resolves every request through the configuration named
//! here. Tests carrying a `urls(...)` marker swap it for their duration.

use parking_lot::RwLock;

/// Holder of the active URL configuration name
#[derive(Debug, Default)]
pub struct UrlConf {
    current: RwLock<Option<String>>,
}

impl UrlConf {
    /// Create a holder with an initial configuration
    pub fn new(initial: Option<String>) -> Self {
        Self {
            current: RwLock::new(initial),
        }
    }

    /// Name of the active configuration
    pub fn current(&self) -> Option<String> {
        self.current.read().clone()
    }

    /// Install a configuration, returning the one it replaced
    pub fn replace(&self, next: Option<String>) -> Option<String> {
        std::mem::replace(&mut *self.current.write(), next)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_replace_returns_previous() {
        let conf = UrlConf::new(Some("app".into()));
        let previous = conf.replace(Some("alt".into()));
        assert_eq!(previous.as_deref(), Some("app"));
        assert_eq!(conf.current().as_deref(), Some("alt"));
        conf.replace(previous);
        assert_eq!(conf.current().as_deref(), Some("app"));
    }
}
