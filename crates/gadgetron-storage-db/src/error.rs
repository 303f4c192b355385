//! Error types for the metadata layer

use gadgetron_blob_store::BlobId;
use std::fmt;

#[derive(Debug)]
pub enum DbError {
    Database(Box<sqlx::Error>),
    Migrate(String),
    /// Path is empty after normalization
    InvalidPath(String),
    /// A mutation referenced a blob with no metadata row
    UnknownBlob(BlobId),
    /// Repeatedly lost the race to create a leaf
    Conflict(String),
}

impl fmt::Display for DbError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DbError::Database(err) => write!(f, "Database error: {}", err),
            DbError::Migrate(msg) => write!(f, "Migration error: {}", msg),
            DbError::InvalidPath(path) => write!(f, "Invalid path: {:?}", path),
            DbError::UnknownBlob(id) => write!(f, "Unknown blob: {}", id),
            DbError::Conflict(path) => write!(f, "Conflicting create for path: {}", path),
        }
    }
}

impl std::error::Error for DbError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            DbError::Database(err) => Some(err.as_ref()),
            _ => None,
        }
    }
}

impl From<sqlx::Error> for DbError {
    fn from(err: sqlx::Error) -> Self {
        DbError::Database(Box::new(err))
    }
}

pub type Result<T> = std::result::Result<T, DbError>;
