//! Storage context shared by request handlers and the garbage collector.
//!
//! Owns the metadata pool and the blob directory. Every operation that
//! reads then writes runs in one database transaction, so concurrent
//! requests on the same path and the GC sweep never observe each other's
//! intermediate state.

use crate::error::{Result, StorageError};
use bytes::Bytes;
use chrono::{DateTime, Duration, Utc};
use futures::Stream;
use gadgetron_blob_store::{BlobId, BlobReader, BlobStore, BlobStoreError, ByteRange};
use gadgetron_storage_db::{
    blobs, entries, leaves, migrate, CreateLeafParams, Leaf, LeafPath, Operation, SqlitePool,
};
use std::collections::HashSet;
use std::path::PathBuf;
use tracing::{debug, error, info, warn};

/// Outcome of a lookup on a path
#[derive(Debug, Clone)]
pub enum Resolved {
    Leaf(Leaf),
    /// No leaf at the path; live descendants in lexicographic order
    Children(Vec<String>),
}

/// A change to a leaf's entry list
#[derive(Debug, Clone)]
pub struct Mutation {
    pub operation: Operation,
    pub blobs: Vec<BlobId>,
    /// Replaces the leaf's type tag when set
    pub leaf_type: Option<String>,
}

/// Differences found between blob files and blob rows at startup
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ReconcileReport {
    /// Files without a row, removed
    pub orphan_files: Vec<BlobId>,
    /// Rows without a file, left for inspection
    pub missing_files: Vec<BlobId>,
}

#[derive(Debug, Clone)]
pub struct Storage {
    pool: SqlitePool,
    blobs: BlobStore,
}

impl Storage {
    pub fn new(pool: SqlitePool, blobs: BlobStore) -> Self {
        Self { pool, blobs }
    }

    /// Connect to the metadata database, migrate it and prepare the blob directory
    pub async fn open(blob_dir: PathBuf, database_url: &str) -> Result<Self> {
        let blobs = BlobStore::new(blob_dir);
        blobs.init().await?;

        let pool = gadgetron_storage_db::connect(database_url).await?;
        migrate::migrate(&pool).await?;

        Ok(Self::new(pool, blobs))
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    pub fn blob_store(&self) -> &BlobStore {
        &self.blobs
    }

    /// Stream a new blob to disk and record it.
    ///
    /// The row is inserted only after the bytes are published. If the insert
    /// fails the published file is removed again.
    pub async fn put_blob<S, E>(&self, body: S) -> Result<BlobId>
    where
        S: Stream<Item = std::result::Result<Bytes, E>> + Unpin,
        E: std::fmt::Display,
    {
        let id = BlobId::generate();
        let size = self.blobs.write(&id, body).await?;

        let mut conn = match self.pool.acquire().await {
            Ok(conn) => conn,
            Err(e) => {
                self.unpublish(&id).await;
                return Err(e.into());
            }
        };
        if let Err(e) = blobs::insert(&mut conn, &id, Utc::now()).await {
            self.unpublish(&id).await;
            return Err(e.into());
        }

        info!(blob = %id, size, "Stored blob");
        Ok(id)
    }

    async fn unpublish(&self, id: &BlobId) {
        if let Err(e) = self.blobs.delete(id).await {
            error!(blob = %id, error = %e, "Failed to remove unrecorded blob file");
        }
    }

    /// Open a live blob, optionally restricted to a byte range
    pub async fn get_blob(&self, id: &BlobId, range: Option<ByteRange>) -> Result<BlobReader> {
        let mut conn = self.pool.acquire().await?;
        if blobs::get(&mut conn, id).await?.is_none() {
            return Err(StorageError::NotFound(format!("blob {}", id)));
        }
        drop(conn);

        match self.blobs.open(id, range).await {
            Ok(reader) => Ok(reader),
            Err(e @ BlobStoreError::RangeNotSatisfiable(_)) => Err(e.into()),
            Err(e) => {
                error!(blob = %id, error = %e, "Blob row exists but its bytes are unreadable");
                Err(e.into())
            }
        }
    }

    /// Exact lookup of `path`, refreshing its idle timer; on a miss, list the
    /// paths beneath it instead. Never creates anything.
    pub async fn resolve_or_list_children(&self, path: &LeafPath) -> Result<Resolved> {
        let mut tx = self.pool.begin().await?;

        let resolved = match leaves::resolve(&mut tx, path, Utc::now()).await? {
            Some(leaf) => Resolved::Leaf(leaf),
            None => Resolved::Children(leaves::children(&mut tx, path).await?),
        };

        tx.commit().await?;
        Ok(resolved)
    }

    /// Apply `mutation` to the leaf at `path`, creating the leaf with
    /// `timeout` if it does not exist yet.
    pub async fn mutate_leaf(
        &self,
        path: &LeafPath,
        mutation: &Mutation,
        timeout: Option<Duration>,
    ) -> Result<Leaf> {
        self.mutate_leaf_at(path, mutation, timeout, Utc::now()).await
    }

    pub(crate) async fn mutate_leaf_at(
        &self,
        path: &LeafPath,
        mutation: &Mutation,
        timeout: Option<Duration>,
        now: DateTime<Utc>,
    ) -> Result<Leaf> {
        let mut tx = self.pool.begin().await?;

        let leaf = leaves::get_or_create(&mut tx, path, CreateLeafParams { timeout, now }).await?;
        entries::apply(&mut tx, leaf.id, mutation.operation, &mutation.blobs).await?;
        if let Some(leaf_type) = mutation.leaf_type.as_deref() {
            leaves::set_type(&mut tx, leaf.id, Some(leaf_type)).await?;
        }
        leaves::set_updated(&mut tx, leaf.id, now).await?;

        let row = leaves::find(&mut tx, path)
            .await?
            .ok_or_else(|| StorageError::NotFound(path.to_string()))?;
        let entries = entries::list(&mut tx, row.id).await?;

        tx.commit().await?;

        debug!(
            path = %path,
            operation = ?mutation.operation,
            entries = entries.len(),
            "Mutated leaf"
        );
        Ok(Leaf { row, entries })
    }

    /// Bring blob files and blob rows back in line after a crash or a failed
    /// file deletion. Only safe before requests are served.
    pub async fn reconcile(&self) -> Result<ReconcileReport> {
        let on_disk: HashSet<BlobId> = self.blobs.list().await?.into_iter().collect();
        let mut conn = self.pool.acquire().await?;
        let recorded = blobs::all_ids(&mut conn).await?;

        let mut report = ReconcileReport::default();

        for id in on_disk.difference(&recorded) {
            match self.blobs.delete(id).await {
                Ok(_) => report.orphan_files.push(*id),
                Err(e) => warn!(blob = %id, error = %e, "Failed to remove orphan blob file"),
            }
        }

        for id in recorded.difference(&on_disk) {
            error!(blob = %id, "Blob row has no backing file");
            report.missing_files.push(*id);
        }

        report.orphan_files.sort();
        report.missing_files.sort();
        info!(
            orphan_files = report.orphan_files.len(),
            missing_files = report.missing_files.len(),
            "Reconciled blob directory"
        );
        Ok(report)
    }
}
