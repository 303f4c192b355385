use chrono::{DateTime, Duration, Utc};
use gadgetron_blob_store::BlobId;
use serde::{Deserialize, Serialize};
use sqlx::FromRow;

/// Blob metadata row
#[derive(Debug, Clone, Serialize, FromRow)]
pub struct BlobRow {
    #[sqlx(try_from = "String")]
    pub id: BlobId,
    pub created: DateTime<Utc>,
}

/// Leaf row returned from SELECT queries
#[derive(Debug, Clone, Serialize, FromRow)]
pub struct LeafRow {
    pub id: i64,
    pub path: String,
    pub created: DateTime<Utc>,
    pub updated: DateTime<Utc>,
    /// Idle seconds before the leaf expires; `None` never expires
    pub timeout_secs: Option<i64>,
    #[sqlx(rename = "type")]
    #[serde(rename = "type")]
    pub leaf_type: Option<String>,
}

/// Entry row: one ranked blob reference of a leaf
#[derive(Debug, Clone, Serialize, FromRow)]
pub struct EntryRow {
    pub id: i64,
    #[sqlx(try_from = "String")]
    pub blob_id: BlobId,
    pub leaf_id: i64,
    pub rank: i64,
}

/// A leaf together with its entries in rank order
#[derive(Debug, Clone, Serialize)]
pub struct Leaf {
    #[serde(flatten)]
    pub row: LeafRow,
    pub entries: Vec<EntryRow>,
}

impl Leaf {
    pub fn blob_ids(&self) -> Vec<BlobId> {
        self.entries.iter().map(|e| e.blob_id).collect()
    }
}

/// Mutation applied to a leaf's ordered entry list
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Operation {
    /// Add blobs, in order, at the tail
    Append,
    /// Add blobs, in order, at the head
    Push,
    /// Remove the head entry, if any
    Pop,
}

/// Parameters for creating a leaf that does not exist yet
#[derive(Debug, Clone, Copy)]
pub struct CreateLeafParams {
    pub timeout: Option<Duration>,
    pub now: DateTime<Utc>,
}
