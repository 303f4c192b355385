//! Normalized, slash-delimited leaf paths

use crate::error::{DbError, Result};
use serde::Serialize;
use std::fmt;

pub const SEPARATOR: char = '/';

/// A path with leading, trailing and empty segments stripped
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[serde(transparent)]
pub struct LeafPath(String);

impl LeafPath {
    pub fn parse(raw: &str) -> Result<Self> {
        let segments: Vec<&str> = raw.split(SEPARATOR).filter(|s| !s.is_empty()).collect();
        if segments.is_empty() {
            return Err(DbError::InvalidPath(raw.to_string()));
        }
        Ok(Self(segments.join("/")))
    }

    /// Join a namespace root and a path below it
    pub fn within(namespace: &str, rest: &str) -> Result<Self> {
        Self::parse(&format!("{}{}{}", namespace, SEPARATOR, rest))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Half-open `[lower, upper)` key range covering every proper descendant.
    ///
    /// `'0'` is the character immediately after the separator, so the range
    /// holds exactly the strings that start with `path + "/"`.
    pub fn descendant_range(&self) -> (String, String) {
        (format!("{}/", self.0), format!("{}0", self.0))
    }
}

impl fmt::Display for LeafPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl AsRef<str> for LeafPath {
    fn as_ref(&self) -> &str {
        &self.0
    }
}
