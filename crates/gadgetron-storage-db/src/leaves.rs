//! Path index: exact lookup, descendant listing and get-or-create

use crate::entries;
use crate::error::{DbError, Result};
use crate::path::LeafPath;
use crate::types::{CreateLeafParams, Leaf, LeafRow};
use chrono::{DateTime, Utc};
use sqlx::SqliteConnection;
use tracing::debug;

const LEAF_COLUMNS: &str = "id, path, created, updated, timeout_secs, type";

/// Attempts at insert-or-lookup before giving up on a contended path
const MAX_CREATE_ATTEMPTS: usize = 3;

/// Look up a leaf without touching its `updated` timestamp
pub async fn find(conn: &mut SqliteConnection, path: &LeafPath) -> Result<Option<LeafRow>> {
    let row = sqlx::query_as::<_, LeafRow>(&format!(
        "SELECT {LEAF_COLUMNS} FROM leaves WHERE path = $1"
    ))
    .bind(path.as_str())
    .fetch_optional(conn)
    .await?;
    Ok(row)
}

/// Exact lookup that refreshes `updated` to `now` on a hit
pub async fn touch(
    conn: &mut SqliteConnection,
    path: &LeafPath,
    now: DateTime<Utc>,
) -> Result<Option<LeafRow>> {
    let row = sqlx::query_as::<_, LeafRow>(&format!(
        "UPDATE leaves SET updated = $1, updated_us = $2 WHERE path = $3 RETURNING {LEAF_COLUMNS}"
    ))
    .bind(now)
    .bind(now.timestamp_micros())
    .bind(path.as_str())
    .fetch_optional(conn)
    .await?;
    Ok(row)
}

/// Resolve a path to its leaf and entries, refreshing `updated` on a hit
pub async fn resolve(
    conn: &mut SqliteConnection,
    path: &LeafPath,
    now: DateTime<Utc>,
) -> Result<Option<Leaf>> {
    let Some(row) = touch(&mut *conn, path, now).await? else {
        return Ok(None);
    };
    let entries = entries::list(&mut *conn, row.id).await?;
    Ok(Some(Leaf { row, entries }))
}

/// Paths of every live leaf strictly below `path`, sorted lexicographically
pub async fn children(conn: &mut SqliteConnection, path: &LeafPath) -> Result<Vec<String>> {
    let (lower, upper) = path.descendant_range();
    let rows: Vec<(String,)> = sqlx::query_as(
        "SELECT path FROM leaves WHERE path >= $1 AND path < $2 ORDER BY path",
    )
    .bind(lower)
    .bind(upper)
    .fetch_all(conn)
    .await?;
    Ok(rows.into_iter().map(|r| r.0).collect())
}

/// Return the leaf for `path`, creating it if absent.
///
/// The unique constraint on `path` arbitrates concurrent creators: a
/// losing insert is retried as a lookup.
pub async fn get_or_create(
    conn: &mut SqliteConnection,
    path: &LeafPath,
    params: CreateLeafParams,
) -> Result<LeafRow> {
    let timeout_secs = params.timeout.map(|t| t.num_seconds());

    for _ in 0..MAX_CREATE_ATTEMPTS {
        let created = sqlx::query_as::<_, LeafRow>(&format!(
            r#"
            INSERT INTO leaves (path, created, updated, updated_us, timeout_secs)
            VALUES ($1, $2, $2, $3, $4)
            ON CONFLICT (path) DO NOTHING
            RETURNING {LEAF_COLUMNS}
            "#
        ))
        .bind(path.as_str())
        .bind(params.now)
        .bind(params.now.timestamp_micros())
        .bind(timeout_secs)
        .fetch_optional(&mut *conn)
        .await?;

        if let Some(row) = created {
            debug!(path = %path, leaf = row.id, "Created leaf");
            return Ok(row);
        }

        if let Some(row) = touch(&mut *conn, path, params.now).await? {
            return Ok(row);
        }

        debug!(path = %path, "Leaf vanished between insert and lookup, retrying");
    }

    Err(DbError::Conflict(path.to_string()))
}

/// Set or clear the free-form type tag of a leaf
pub async fn set_type(
    conn: &mut SqliteConnection,
    leaf_id: i64,
    leaf_type: Option<&str>,
) -> Result<()> {
    sqlx::query("UPDATE leaves SET type = $1 WHERE id = $2")
        .bind(leaf_type)
        .bind(leaf_id)
        .execute(conn)
        .await?;
    Ok(())
}

/// Overwrite `updated`, e.g. after a mutation
pub async fn set_updated(
    conn: &mut SqliteConnection,
    leaf_id: i64,
    updated: DateTime<Utc>,
) -> Result<()> {
    sqlx::query("UPDATE leaves SET updated = $1, updated_us = $2 WHERE id = $3")
        .bind(updated)
        .bind(updated.timestamp_micros())
        .bind(leaf_id)
        .execute(conn)
        .await?;
    Ok(())
}
