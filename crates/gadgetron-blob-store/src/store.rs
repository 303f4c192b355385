//! Blob bytes on disk, staged then published by rename

use crate::error::{BlobStoreError, Result};
use crate::types::{BlobId, ByteRange};
use bytes::Bytes;
use futures::{Stream, StreamExt};
use std::io::{ErrorKind, SeekFrom};
use std::path::{Path, PathBuf};
use std::pin::Pin;
use std::task::{Context, Poll};
use tokio::fs::{self, File};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncSeekExt, AsyncWriteExt, BufWriter, ReadBuf, Take};
use tracing::{debug, info, warn};

/// Upper bound on buffered upload data before it is flushed to disk
pub const CHUNK_SIZE: usize = 1024 * 1024;

const BLOB_EXTENSION: &str = "bin";
const STAGING_EXTENSION: &str = "part";
const STAGING_DIR: &str = ".staging";

/// Durable storage for blob bytes in a single flat directory
#[derive(Debug, Clone)]
pub struct BlobStore {
    /// Directory holding published `<id>.bin` files
    blob_dir: PathBuf,
    /// Directory holding in-flight uploads
    staging_dir: PathBuf,
}

impl BlobStore {
    pub fn new(blob_dir: PathBuf) -> Self {
        let staging_dir = blob_dir.join(STAGING_DIR);
        Self {
            blob_dir,
            staging_dir,
        }
    }

    /// Ensure the directories exist and discard uploads left behind by a
    /// previous process.
    pub async fn init(&self) -> Result<()> {
        fs::create_dir_all(&self.staging_dir).await?;

        let mut stale = 0usize;
        let mut dir = fs::read_dir(&self.staging_dir).await?;
        while let Some(entry) = dir.next_entry().await? {
            match fs::remove_file(entry.path()).await {
                Ok(()) => stale += 1,
                Err(e) => warn!(path = ?entry.path(), error = %e, "Failed to remove stale staging file"),
            }
        }

        info!(blob_dir = ?self.blob_dir, stale_uploads = stale, "Blob store initialized");
        Ok(())
    }

    /// Location of the published bytes for `id`
    pub fn blob_path(&self, id: &BlobId) -> PathBuf {
        self.blob_dir.join(format!("{}.{}", id, BLOB_EXTENSION))
    }

    fn staging_path(&self, id: &BlobId) -> PathBuf {
        self.staging_dir.join(format!("{}.{}", id, STAGING_EXTENSION))
    }

    /// Stream `body` to disk under `id`, returning the number of bytes written.
    ///
    /// The bytes become visible at [`blob_path`](Self::blob_path) only after
    /// they have been synced, and the call returns only once the rename that
    /// publishes them is durable too. On any failure nothing stays published.
    pub async fn write<S, E>(&self, id: &BlobId, body: S) -> Result<u64>
    where
        S: Stream<Item = std::result::Result<Bytes, E>> + Unpin,
        E: std::fmt::Display,
    {
        let staging = self.staging_path(id);

        match self.write_staged(&staging, body).await {
            Ok(size) => {
                let published = self.blob_path(id);
                if let Err(e) = fs::rename(&staging, &published).await {
                    discard(&staging).await;
                    return Err(e.into());
                }
                if let Err(e) = sync_dir(&self.blob_dir).await {
                    discard(&published).await;
                    return Err(e.into());
                }
                debug!(blob = %id, size, "Published blob");
                Ok(size)
            }
            Err(e) => {
                discard(&staging).await;
                Err(e)
            }
        }
    }

    async fn write_staged<S, E>(&self, staging: &Path, mut body: S) -> Result<u64>
    where
        S: Stream<Item = std::result::Result<Bytes, E>> + Unpin,
        E: std::fmt::Display,
    {
        let file = File::create(staging).await?;
        let mut writer = BufWriter::with_capacity(CHUNK_SIZE, file);
        let mut size = 0u64;

        while let Some(chunk) = body.next().await {
            let chunk = chunk.map_err(|e| BlobStoreError::Interrupted(e.to_string()))?;
            for piece in chunk.chunks(CHUNK_SIZE) {
                writer.write_all(piece).await?;
            }
            size += chunk.len() as u64;
        }

        writer.flush().await?;
        writer.into_inner().sync_all().await?;
        Ok(size)
    }

    /// Open a published blob for reading, optionally restricted to a range
    pub async fn open(&self, id: &BlobId, range: Option<ByteRange>) -> Result<BlobReader> {
        let mut file = match File::open(self.blob_path(id)).await {
            Ok(f) => f,
            Err(e) if e.kind() == ErrorKind::NotFound => return Err(BlobStoreError::NotFound(*id)),
            Err(e) => return Err(e.into()),
        };

        let size = file.metadata().await?.len();
        let (offset, len) = match range {
            None => (0, size),
            Some(range) => range
                .resolve(size)
                .ok_or(BlobStoreError::RangeNotSatisfiable(size))?,
        };
        if offset > 0 {
            file.seek(SeekFrom::Start(offset)).await?;
        }

        Ok(BlobReader {
            inner: file.take(len),
            offset,
            len,
            total: size,
        })
    }

    /// Remove the bytes for `id`. Returns `false` if they were already gone.
    pub async fn delete(&self, id: &BlobId) -> Result<bool> {
        match fs::remove_file(self.blob_path(id)).await {
            Ok(()) => {
                debug!(blob = %id, "Deleted blob file");
                Ok(true)
            }
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(false),
            Err(e) => Err(e.into()),
        }
    }

    /// Ids of every published blob file in the directory
    pub async fn list(&self) -> Result<Vec<BlobId>> {
        let mut ids = Vec::new();
        let mut dir = fs::read_dir(&self.blob_dir).await?;
        while let Some(entry) = dir.next_entry().await? {
            let path = entry.path();
            if path.extension().and_then(|e| e.to_str()) != Some(BLOB_EXTENSION) {
                continue;
            }
            match path.file_stem().and_then(|s| s.to_str()).map(str::parse::<BlobId>) {
                Some(Ok(id)) => ids.push(id),
                _ => debug!(path = ?path, "Ignoring unrecognized file in blob directory"),
            }
        }
        Ok(ids)
    }
}

async fn discard(path: &Path) {
    if let Err(e) = fs::remove_file(path).await {
        if e.kind() != ErrorKind::NotFound {
            warn!(path = ?path, error = %e, "Failed to remove unpublished blob file");
        }
    }
}

/// Flush directory entries so a completed rename survives a crash
#[cfg(unix)]
async fn sync_dir(dir: &Path) -> std::io::Result<()> {
    File::open(dir).await?.sync_all().await
}

#[cfg(not(unix))]
async fn sync_dir(_dir: &Path) -> std::io::Result<()> {
    Ok(())
}

/// Reader over a (possibly partial) published blob
#[derive(Debug)]
pub struct BlobReader {
    inner: Take<File>,
    offset: u64,
    len: u64,
    total: u64,
}

impl BlobReader {
    /// Offset of the first byte this reader yields
    pub fn offset(&self) -> u64 {
        self.offset
    }

    /// Number of bytes this reader yields
    pub fn len(&self) -> u64 {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Size of the whole blob
    pub fn total(&self) -> u64 {
        self.total
    }
}

impl AsyncRead for BlobReader {
    fn poll_read(
        mut self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<std::io::Result<()>> {
        Pin::new(&mut self.inner).poll_read(cx, buf)
    }
}
