//! Background garbage collector.
//!
//! Each sweep expires idle leaves (their entries go with them), then drops
//! every blob no remaining entry references, then removes those blobs'
//! files. The sweep runs to completion; shutdown is only observed while
//! waiting for the next tick.

use crate::error::Result;
use crate::storage::Storage;
use chrono::{DateTime, Utc};
use gadgetron_blob_store::BlobId;
use gadgetron_storage_db::gc;
use std::time::Duration;
use tokio::sync::watch;
use tracing::{error, info, warn};

/// What a single sweep did
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SweepReport {
    /// Paths of the leaves that expired
    pub expired_leaves: Vec<String>,
    /// Blobs whose metadata was deleted
    pub reclaimed_blobs: Vec<BlobId>,
    /// Reclaimed blobs whose file could not be removed
    pub failed_deletions: Vec<BlobId>,
}

pub struct GarbageCollector {
    storage: Storage,
    interval: Duration,
    orphan_grace: chrono::Duration,
}

impl GarbageCollector {
    pub fn new(storage: Storage, interval: Duration, orphan_grace: chrono::Duration) -> Self {
        Self {
            storage,
            interval,
            orphan_grace,
        }
    }

    /// Sweep every `interval` until `shutdown` flips or its sender is dropped
    pub async fn run(self, mut shutdown: watch::Receiver<bool>) {
        info!(
            interval_secs = self.interval.as_secs(),
            orphan_grace_secs = self.orphan_grace.num_seconds(),
            "Garbage collector started"
        );

        loop {
            tokio::select! {
                _ = tokio::time::sleep(self.interval) => {}
                _ = shutdown.changed() => break,
            }

            if let Err(e) = self.sweep().await {
                error!(error = %e, "Garbage collection sweep failed");
            }
        }

        info!("Garbage collector stopped");
    }

    pub async fn sweep(&self) -> Result<SweepReport> {
        self.sweep_at(Utc::now()).await
    }

    /// Run one sweep as if the current time were `now`
    pub async fn sweep_at(&self, now: DateTime<Utc>) -> Result<SweepReport> {
        let mut tx = self.storage.pool().begin().await?;
        let expired = gc::expire_leaves(&mut tx, now).await?;
        let reclaimed = gc::reclaim_blobs(&mut tx, now - self.orphan_grace).await?;
        tx.commit().await?;

        // Metadata is gone; file removal is best effort from here on
        let mut failed = Vec::new();
        for id in &reclaimed {
            match self.storage.blob_store().delete(id).await {
                Ok(true) => {}
                Ok(false) => warn!(blob = %id, "Reclaimed blob had no file"),
                Err(e) => {
                    warn!(blob = %id, error = %e, "Failed to delete reclaimed blob file");
                    failed.push(*id);
                }
            }
        }

        let report = SweepReport {
            expired_leaves: expired.into_iter().map(|leaf| leaf.path).collect(),
            reclaimed_blobs: reclaimed,
            failed_deletions: failed,
        };
        info!(
            expired_leaves = report.expired_leaves.len(),
            reclaimed_blobs = report.reclaimed_blobs.len(),
            failed_deletions = report.failed_deletions.len(),
            "Garbage collection sweep finished"
        );
        Ok(report)
    }
}
