//! Blob store types

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

/// Server-generated identifier of a stored blob
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct BlobId(Uuid);

impl BlobId {
    /// Generate a fresh random id. Ids are never reused.
    pub fn generate() -> Self {
        Self(Uuid::new_v4())
    }
}

impl fmt::Display for BlobId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0.hyphenated())
    }
}

impl FromStr for BlobId {
    type Err = uuid::Error;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        Uuid::parse_str(s).map(Self)
    }
}

impl TryFrom<String> for BlobId {
    type Error = uuid::Error;

    fn try_from(s: String) -> std::result::Result<Self, Self::Error> {
        s.parse()
    }
}

/// A requested byte range within a blob
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ByteRange {
    /// `start..end`, end exclusive
    Span { start: u64, end: u64 },
    /// Everything from the given offset on
    From(u64),
    /// The final `n` bytes
    Last(u64),
}

impl ByteRange {
    /// Resolve the range against a blob of `size` bytes, returning
    /// `(offset, length)`, or `None` if it selects no bytes of the blob.
    pub fn resolve(&self, size: u64) -> Option<(u64, u64)> {
        let (start, end) = match *self {
            ByteRange::Span { start, end } => (start, end.min(size)),
            ByteRange::From(start) => (start, size),
            ByteRange::Last(n) => (size.saturating_sub(n), size),
        };
        (start < end).then(|| (start, end - start))
    }
}
