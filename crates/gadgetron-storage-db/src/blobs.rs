use crate::error::Result;
use crate::types::BlobRow;
use chrono::{DateTime, Utc};
use gadgetron_blob_store::BlobId;
use sqlx::SqliteConnection;
use std::collections::HashSet;

/// Record a blob whose bytes have already been published
pub async fn insert(conn: &mut SqliteConnection, id: &BlobId, now: DateTime<Utc>) -> Result<()> {
    sqlx::query("INSERT INTO blobs (id, created, created_us) VALUES ($1, $2, $3)")
        .bind(id.to_string())
        .bind(now)
        .bind(now.timestamp_micros())
        .execute(conn)
        .await?;
    Ok(())
}

/// Get a blob row by id
pub async fn get(conn: &mut SqliteConnection, id: &BlobId) -> Result<Option<BlobRow>> {
    let row = sqlx::query_as::<_, BlobRow>("SELECT id, created FROM blobs WHERE id = $1")
        .bind(id.to_string())
        .fetch_optional(conn)
        .await?;
    Ok(row)
}

/// Return the subset of `ids` that has no blob row
pub async fn missing(conn: &mut SqliteConnection, ids: &[BlobId]) -> Result<Vec<BlobId>> {
    let mut absent = Vec::new();
    for id in ids {
        let found: Option<(i64,)> = sqlx::query_as("SELECT 1 FROM blobs WHERE id = $1")
            .bind(id.to_string())
            .fetch_optional(&mut *conn)
            .await?;
        if found.is_none() {
            absent.push(*id);
        }
    }
    Ok(absent)
}

/// Ids of every blob row
pub async fn all_ids(conn: &mut SqliteConnection) -> Result<HashSet<BlobId>> {
    let rows = sqlx::query_as::<_, BlobRow>("SELECT id, created FROM blobs")
        .fetch_all(conn)
        .await?;
    Ok(rows.into_iter().map(|r| r.id).collect())
}
