//! Wire types for the HTTP API

use chrono::{DateTime, Utc};
use gadgetron_blob_store::{BlobId, ByteRange};
use gadgetron_storage_db::{Leaf, Operation};
use serde::{Deserialize, Serialize};

const API_PREFIX: &str = "/v1";

/// Locator a client can GET to retrieve a blob's bytes
pub fn blob_uri(id: &BlobId) -> String {
    format!("{}/blobs/{}", API_PREFIX, id)
}

/// Parse a single-range `Range` header value: `bytes=0-499`, `bytes=500-`
/// or `bytes=-500`. Multiple ranges and malformed values yield `None`, and
/// the whole blob is served instead.
pub fn parse_range(value: &str) -> Option<ByteRange> {
    let ranges = value.trim().strip_prefix("bytes=")?;
    if ranges.contains(',') {
        return None;
    }
    let (first, last) = ranges.split_once('-')?;
    let (first, last) = (first.trim(), last.trim());

    match (first.is_empty(), last.is_empty()) {
        (true, false) => last.parse().ok().map(ByteRange::Last),
        (false, true) => first.parse().ok().map(ByteRange::From),
        (false, false) => {
            let start: u64 = first.parse().ok()?;
            let last: u64 = last.parse().ok()?;
            if last < start {
                return None;
            }
            Some(ByteRange::Span {
                start,
                end: last.checked_add(1)?,
            })
        }
        (true, true) => None,
    }
}

/// Response to a blob upload and element of a leaf's contents
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BlobRef {
    pub id: BlobId,
    pub uri: String,
}

impl BlobRef {
    pub fn new(id: BlobId) -> Self {
        Self {
            uri: blob_uri(&id),
            id,
        }
    }
}

/// Leaf as exposed to clients
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LeafResponse {
    pub path: String,
    pub created: DateTime<Utc>,
    pub updated: DateTime<Utc>,
    /// Idle seconds before expiry, `null` for leaves that never expire
    pub timeout: Option<i64>,
    #[serde(rename = "type")]
    pub leaf_type: Option<String>,
    pub contents: Vec<BlobRef>,
}

impl From<Leaf> for LeafResponse {
    fn from(leaf: Leaf) -> Self {
        let contents = leaf.blob_ids().into_iter().map(BlobRef::new).collect();
        Self {
            path: leaf.row.path,
            created: leaf.row.created,
            updated: leaf.row.updated,
            timeout: leaf.row.timeout_secs,
            leaf_type: leaf.row.leaf_type,
            contents,
        }
    }
}

/// Result of a GET on a path: the leaf itself, or the paths beneath it
#[derive(Debug, Clone, Serialize)]
#[serde(untagged)]
pub enum NodeResponse {
    Leaf(LeafResponse),
    Children(Vec<String>),
}

/// Body of a PATCH on a path
#[derive(Debug, Clone, Deserialize)]
pub struct MutateRequest {
    pub operation: Operation,
    #[serde(default)]
    pub arguments: Vec<BlobId>,
    #[serde(rename = "type", default)]
    pub leaf_type: Option<String>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct InfoResponse {
    pub server: String,
    pub version: String,
}
