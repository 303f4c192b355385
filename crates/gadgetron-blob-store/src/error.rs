//! Error types for the blob store

use crate::types::BlobId;
use std::fmt;

#[derive(Debug)]
pub enum BlobStoreError {
    Io(Box<std::io::Error>),
    NotFound(BlobId),
    /// The incoming byte stream failed before it was fully written
    Interrupted(String),
    /// A requested range selects no bytes of a blob of this size
    RangeNotSatisfiable(u64),
}

impl fmt::Display for BlobStoreError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BlobStoreError::Io(err) => write!(f, "IO error: {}", err),
            BlobStoreError::NotFound(id) => write!(f, "Blob not found: {}", id),
            BlobStoreError::Interrupted(msg) => write!(f, "Upload interrupted: {}", msg),
            BlobStoreError::RangeNotSatisfiable(size) => {
                write!(f, "Range not satisfiable for blob of {} bytes", size)
            }
        }
    }
}

impl std::error::Error for BlobStoreError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            BlobStoreError::Io(err) => Some(err.as_ref()),
            _ => None,
        }
    }
}

impl From<std::io::Error> for BlobStoreError {
    fn from(err: std::io::Error) -> Self {
        BlobStoreError::Io(Box::new(err))
    }
}

pub type Result<T> = std::result::Result<T, BlobStoreError>;
