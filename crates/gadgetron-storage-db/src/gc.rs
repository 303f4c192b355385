//! Metadata half of a garbage-collection sweep.
//!
//! Callers run [`expire_leaves`] before [`reclaim_blobs`] in one
//! transaction so entries removed by the expiry cascade are already gone
//! when blob references are counted.

use crate::error::Result;
use crate::types::{BlobRow, LeafRow};
use chrono::{DateTime, Utc};
use gadgetron_blob_store::BlobId;
use sqlx::SqliteConnection;

/// Delete every leaf idle for longer than its timeout at `now`. Idle time
/// is compared in whole microseconds, so a leaf idle for exactly its
/// timeout survives.
///
/// Entries of the deleted leaves go with them through the `ON DELETE
/// CASCADE` foreign key.
pub async fn expire_leaves(
    conn: &mut SqliteConnection,
    now: DateTime<Utc>,
) -> Result<Vec<LeafRow>> {
    let rows = sqlx::query_as::<_, LeafRow>(
        r#"
        DELETE FROM leaves
        WHERE timeout_secs IS NOT NULL
          AND $1 - updated_us > timeout_secs * 1000000
        RETURNING id, path, created, updated, timeout_secs, type
        "#,
    )
    .bind(now.timestamp_micros())
    .fetch_all(conn)
    .await?;
    Ok(rows)
}

/// Delete the metadata of every blob no entry references, returning their
/// ids. Blobs created after `created_before` are left alone.
pub async fn reclaim_blobs(
    conn: &mut SqliteConnection,
    created_before: DateTime<Utc>,
) -> Result<Vec<BlobId>> {
    let rows = sqlx::query_as::<_, BlobRow>(
        r#"
        DELETE FROM blobs
        WHERE id NOT IN (SELECT DISTINCT blob_id FROM entries)
          AND created_us <= $1
        RETURNING id, created
        "#,
    )
    .bind(created_before.timestamp_micros())
    .fetch_all(conn)
    .await?;
    Ok(rows.into_iter().map(|r| r.id).collect())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::path::LeafPath;
    use crate::test_support::test_pool;
    use crate::types::CreateLeafParams;
    use crate::{blobs, entries, leaves};
    use chrono::Duration;

    async fn leaf_with_blob(
        conn: &mut SqliteConnection,
        path: &str,
        timeout: Option<Duration>,
        updated: DateTime<Utc>,
    ) -> (i64, BlobId) {
        let blob = BlobId::generate();
        blobs::insert(&mut *conn, &blob, updated).await.unwrap();
        let leaf = leaves::get_or_create(
            &mut *conn,
            &LeafPath::parse(path).unwrap(),
            CreateLeafParams {
                timeout,
                now: updated,
            },
        )
        .await
        .unwrap();
        entries::append(&mut *conn, leaf.id, &[blob]).await.unwrap();
        (leaf.id, blob)
    }

    #[tokio::test]
    async fn test_expiry_respects_timeouts() {
        let (_dir, pool) = test_pool().await;
        let mut conn = pool.acquire().await.unwrap();
        let now = Utc::now();

        let (stale, _) = leaf_with_blob(
            &mut conn,
            "sessions/old",
            Some(Duration::hours(1)),
            now - Duration::hours(2),
        )
        .await;
        leaf_with_blob(
            &mut conn,
            "sessions/fresh",
            Some(Duration::hours(1)),
            now - Duration::minutes(30),
        )
        .await;
        leaf_with_blob(&mut conn, "scanners/forever", None, now - Duration::days(400)).await;

        let expired = expire_leaves(&mut conn, now).await.unwrap();
        assert_eq!(expired.len(), 1);
        assert_eq!(expired[0].id, stale);
        assert_eq!(expired[0].path, "sessions/old");

        // Cascade removed the entries
        assert!(entries::list(&mut conn, stale).await.unwrap().is_empty());

        let mut remaining: Vec<String> = sqlx::query_as::<_, (String,)>("SELECT path FROM leaves")
            .fetch_all(&mut *conn)
            .await
            .unwrap()
            .into_iter()
            .map(|r| r.0)
            .collect();
        remaining.sort();
        assert_eq!(remaining, vec!["scanners/forever", "sessions/fresh"]);
    }

    #[tokio::test]
    async fn test_expiry_boundary_is_exact() {
        let (_dir, pool) = test_pool().await;
        let timeout = Duration::hours(1);

        // Sub-millisecond timestamps spread across a second
        let base = DateTime::from_timestamp(1_700_000_000, 0).unwrap();
        let updated: Vec<DateTime<Utc>> = (0..50i64)
            .map(|i| base + Duration::microseconds(i * 19_937 + 123))
            .collect();
        {
            let mut conn = pool.acquire().await.unwrap();
            for (i, t) in updated.iter().enumerate() {
                leaf_with_blob(&mut conn, &format!("sessions/{i:02}"), Some(timeout), *t).await;
            }
        }

        let offsets = [
            Duration::milliseconds(-1),
            Duration::microseconds(-1),
            Duration::zero(),
            Duration::microseconds(1),
            Duration::milliseconds(1),
        ];
        for t in &updated {
            for offset in offsets {
                let at = *t + timeout + offset;

                let mut tx = pool.begin().await.unwrap();
                let mut expired: Vec<String> = expire_leaves(&mut tx, at)
                    .await
                    .unwrap()
                    .into_iter()
                    .map(|leaf| leaf.path)
                    .collect();
                tx.rollback().await.unwrap();
                expired.sort();

                let expected: Vec<String> = updated
                    .iter()
                    .enumerate()
                    .filter(|(_, u)| at - **u > timeout)
                    .map(|(i, _)| format!("sessions/{i:02}"))
                    .collect();
                assert_eq!(expired, expected, "sweep at {at}");
            }
        }
    }

    #[tokio::test]
    async fn test_reclaim_after_expiry_in_same_pass() {
        let (_dir, pool) = test_pool().await;
        let now = Utc::now();
        let mut tx = pool.begin().await.unwrap();

        let (_, orphaned) = leaf_with_blob(
            &mut tx,
            "sessions/old",
            Some(Duration::hours(1)),
            now - Duration::hours(2),
        )
        .await;
        let (_, kept) = leaf_with_blob(&mut tx, "scanners/a", None, now - Duration::hours(2)).await;
        let loose = BlobId::generate();
        blobs::insert(&mut tx, &loose, now - Duration::minutes(1))
            .await
            .unwrap();

        expire_leaves(&mut tx, now).await.unwrap();
        let mut reclaimed = reclaim_blobs(&mut tx, now).await.unwrap();
        tx.commit().await.unwrap();

        reclaimed.sort();
        let mut expected = vec![orphaned, loose];
        expected.sort();
        assert_eq!(reclaimed, expected);

        let mut conn = pool.acquire().await.unwrap();
        let ids = blobs::all_ids(&mut conn).await.unwrap();
        assert_eq!(ids.len(), 1);
        assert!(ids.contains(&kept));
    }

    #[tokio::test]
    async fn test_reclaim_honours_grace() {
        let (_dir, pool) = test_pool().await;
        let mut conn = pool.acquire().await.unwrap();
        let now = Utc::now();

        let young = BlobId::generate();
        blobs::insert(&mut conn, &young, now).await.unwrap();

        let reclaimed = reclaim_blobs(&mut conn, now - Duration::microseconds(1))
            .await
            .unwrap();
        assert!(reclaimed.is_empty());
        assert!(blobs::get(&mut conn, &young).await.unwrap().is_some());

        let reclaimed = reclaim_blobs(&mut conn, now).await.unwrap();
        assert_eq!(reclaimed, vec![young]);
    }
}
