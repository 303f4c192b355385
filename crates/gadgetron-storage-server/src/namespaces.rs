//! Logical roots of the path hierarchy and their default idle timeouts

use chrono::Duration;
use std::collections::BTreeMap;

pub const SESSIONS: &str = "sessions";
pub const SCANNERS: &str = "scanners";
pub const DEBUG: &str = "debug";

/// Namespace name to the timeout given to leaves created beneath it.
/// `None` means leaves in that namespace never expire.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Namespaces {
    timeouts: BTreeMap<String, Option<Duration>>,
}

impl Namespaces {
    pub fn new(session_timeout: Duration) -> Self {
        Self::empty()
            .with(SESSIONS, Some(session_timeout))
            .with(SCANNERS, None)
            .with(DEBUG, None)
    }

    pub fn empty() -> Self {
        Self {
            timeouts: BTreeMap::new(),
        }
    }

    pub fn with(mut self, name: &str, timeout: Option<Duration>) -> Self {
        self.timeouts.insert(name.to_string(), timeout);
        self
    }

    /// Default timeout for `name`, or `None` if the namespace is unknown
    pub fn timeout(&self, name: &str) -> Option<Option<Duration>> {
        self.timeouts.get(name).copied()
    }

    pub fn contains(&self, name: &str) -> bool {
        self.timeouts.contains_key(name)
    }
}

impl Default for Namespaces {
    fn default() -> Self {
        Self::new(Duration::hours(3))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_table() {
        let ns = Namespaces::default();
        assert_eq!(ns.timeout(SESSIONS), Some(Some(Duration::hours(3))));
        assert_eq!(ns.timeout(SCANNERS), Some(None));
        assert_eq!(ns.timeout(DEBUG), Some(None));
        assert_eq!(ns.timeout("blobs"), None);
        assert!(!ns.contains("blobs"));
    }

    #[test]
    fn test_custom_namespace() {
        let ns = Namespaces::new(Duration::minutes(10)).with("scratch", Some(Duration::seconds(30)));
        assert!(ns.contains("scratch"));
        assert_eq!(ns.timeout(SESSIONS), Some(Some(Duration::minutes(10))));
    }
}
