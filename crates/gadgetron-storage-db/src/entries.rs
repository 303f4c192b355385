//! Ordered entry lists.
//!
//! Ranks of a leaf's entries are always `0..n`. Ranks are moved through
//! negative values while shifting so the `(leaf_id, rank)` unique
//! constraint holds after every row update.

use crate::blobs;
use crate::error::{DbError, Result};
use crate::types::{EntryRow, Operation};
use gadgetron_blob_store::BlobId;
use sqlx::SqliteConnection;

/// Entries of a leaf in rank order
pub async fn list(conn: &mut SqliteConnection, leaf_id: i64) -> Result<Vec<EntryRow>> {
    let rows = sqlx::query_as::<_, EntryRow>(
        "SELECT id, blob_id, leaf_id, rank FROM entries WHERE leaf_id = $1 ORDER BY rank",
    )
    .bind(leaf_id)
    .fetch_all(conn)
    .await?;
    Ok(rows)
}

/// Apply `op` to the entry list of `leaf_id`. `blobs` is ignored for pop.
pub async fn apply(
    conn: &mut SqliteConnection,
    leaf_id: i64,
    op: Operation,
    blobs: &[BlobId],
) -> Result<()> {
    match op {
        Operation::Append => append(conn, leaf_id, blobs).await,
        Operation::Push => push(conn, leaf_id, blobs).await,
        Operation::Pop => pop(conn, leaf_id).await.map(|_| ()),
    }
}

/// Add `blobs`, in order, after the last entry
pub async fn append(conn: &mut SqliteConnection, leaf_id: i64, blobs: &[BlobId]) -> Result<()> {
    ensure_blobs(&mut *conn, blobs).await?;

    let (count,): (i64,) = sqlx::query_as("SELECT COUNT(*) FROM entries WHERE leaf_id = $1")
        .bind(leaf_id)
        .fetch_one(&mut *conn)
        .await?;

    insert_at(conn, leaf_id, count, blobs).await
}

/// Add `blobs`, in order, before the first entry
pub async fn push(conn: &mut SqliteConnection, leaf_id: i64, blobs: &[BlobId]) -> Result<()> {
    if blobs.is_empty() {
        return Ok(());
    }
    ensure_blobs(&mut *conn, blobs).await?;

    shift_ranks(&mut *conn, leaf_id, blobs.len() as i64).await?;
    insert_at(conn, leaf_id, 0, blobs).await
}

/// Remove and return the first entry, if any
pub async fn pop(conn: &mut SqliteConnection, leaf_id: i64) -> Result<Option<EntryRow>> {
    let removed = sqlx::query_as::<_, EntryRow>(
        r#"
        DELETE FROM entries
        WHERE leaf_id = $1
          AND rank = (SELECT MIN(rank) FROM entries WHERE leaf_id = $1)
        RETURNING id, blob_id, leaf_id, rank
        "#,
    )
    .bind(leaf_id)
    .fetch_optional(&mut *conn)
    .await?;

    if removed.is_some() {
        shift_ranks(conn, leaf_id, -1).await?;
    }
    Ok(removed)
}

async fn insert_at(
    conn: &mut SqliteConnection,
    leaf_id: i64,
    first_rank: i64,
    blobs: &[BlobId],
) -> Result<()> {
    for (offset, blob) in blobs.iter().enumerate() {
        sqlx::query("INSERT INTO entries (blob_id, leaf_id, rank) VALUES ($1, $2, $3)")
            .bind(blob.to_string())
            .bind(leaf_id)
            .bind(first_rank + offset as i64)
            .execute(&mut *conn)
            .await?;
    }
    Ok(())
}

/// Add `delta` to every rank of the leaf without transient collisions
async fn shift_ranks(conn: &mut SqliteConnection, leaf_id: i64, delta: i64) -> Result<()> {
    sqlx::query("UPDATE entries SET rank = -(rank + $1) - 1 WHERE leaf_id = $2")
        .bind(delta)
        .bind(leaf_id)
        .execute(&mut *conn)
        .await?;
    sqlx::query("UPDATE entries SET rank = -rank - 1 WHERE leaf_id = $1")
        .bind(leaf_id)
        .execute(conn)
        .await?;
    Ok(())
}

async fn ensure_blobs(conn: &mut SqliteConnection, ids: &[BlobId]) -> Result<()> {
    match blobs::missing(conn, ids).await?.first() {
        Some(id) => Err(DbError::UnknownBlob(*id)),
        None => Ok(()),
    }
}
