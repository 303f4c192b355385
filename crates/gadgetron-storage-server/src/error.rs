//! Error types for the Gadgetron storage server

use axum::http::{header, StatusCode};
use axum::response::{IntoResponse, Response};
use gadgetron_blob_store::{BlobId, BlobStoreError};
use gadgetron_storage_db::DbError;
use serde_json::json;
use std::fmt;

/// Failure of a storage operation
#[derive(Debug)]
pub enum StorageError {
    /// No live blob or leaf with the requested identity
    NotFound(String),
    InvalidPath(String),
    /// A mutation named a blob that does not exist
    UnknownBlob(BlobId),
    /// The client's upload stream ended with an error
    Upload(String),
    /// A requested range lies outside a blob of this size
    RangeNotSatisfiable(u64),
    Io(Box<std::io::Error>),
    Database(Box<DbError>),
    Config(String),
}

impl fmt::Display for StorageError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StorageError::NotFound(what) => write!(f, "Not found: {}", what),
            StorageError::InvalidPath(path) => write!(f, "Invalid path: {:?}", path),
            StorageError::UnknownBlob(id) => write!(f, "Unknown blob: {}", id),
            StorageError::Upload(msg) => write!(f, "Upload failed: {}", msg),
            StorageError::RangeNotSatisfiable(size) => {
                write!(f, "Range not satisfiable for blob of {} bytes", size)
            }
            StorageError::Io(err) => write!(f, "IO error: {}", err),
            StorageError::Database(err) => write!(f, "{}", err),
            StorageError::Config(msg) => write!(f, "Configuration error: {}", msg),
        }
    }
}

impl std::error::Error for StorageError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            StorageError::Io(err) => Some(err.as_ref()),
            StorageError::Database(err) => Some(err.as_ref()),
            _ => None,
        }
    }
}

impl From<DbError> for StorageError {
    fn from(err: DbError) -> Self {
        match err {
            DbError::InvalidPath(path) => StorageError::InvalidPath(path),
            DbError::UnknownBlob(id) => StorageError::UnknownBlob(id),
            other => StorageError::Database(Box::new(other)),
        }
    }
}

impl From<sqlx::Error> for StorageError {
    fn from(err: sqlx::Error) -> Self {
        StorageError::Database(Box::new(DbError::from(err)))
    }
}

impl From<BlobStoreError> for StorageError {
    fn from(err: BlobStoreError) -> Self {
        match err {
            BlobStoreError::NotFound(id) => StorageError::NotFound(format!("blob {}", id)),
            BlobStoreError::Interrupted(msg) => StorageError::Upload(msg),
            BlobStoreError::RangeNotSatisfiable(size) => StorageError::RangeNotSatisfiable(size),
            BlobStoreError::Io(err) => StorageError::Io(err),
        }
    }
}

impl From<std::io::Error> for StorageError {
    fn from(err: std::io::Error) -> Self {
        StorageError::Io(Box::new(err))
    }
}

impl From<tracing_subscriber::filter::ParseError> for StorageError {
    fn from(err: tracing_subscriber::filter::ParseError) -> Self {
        StorageError::Config(err.to_string())
    }
}

pub type Result<T> = std::result::Result<T, StorageError>;

/// Application error type that converts to HTTP responses
#[derive(Debug)]
pub enum AppError {
    BadRequest(String),
    NotFound(String),
    /// Carries the blob size for the `Content-Range` header
    RangeNotSatisfiable(u64),
    Internal(String),
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let (status, message) = match self {
            AppError::BadRequest(msg) => (StatusCode::BAD_REQUEST, msg),
            AppError::NotFound(msg) => (StatusCode::NOT_FOUND, msg),
            AppError::RangeNotSatisfiable(size) => {
                return (
                    StatusCode::RANGE_NOT_SATISFIABLE,
                    [(header::CONTENT_RANGE, format!("bytes */{}", size))],
                )
                    .into_response();
            }
            AppError::Internal(msg) => {
                tracing::error!(error = %msg, "Internal server error");
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "Internal server error".into(),
                )
            }
        };

        (status, axum::Json(json!({ "error": message }))).into_response()
    }
}

impl From<StorageError> for AppError {
    fn from(err: StorageError) -> Self {
        match err {
            StorageError::NotFound(_) => AppError::NotFound(err.to_string()),
            StorageError::RangeNotSatisfiable(size) => AppError::RangeNotSatisfiable(size),
            StorageError::InvalidPath(_)
            | StorageError::UnknownBlob(_)
            | StorageError::Upload(_) => AppError::BadRequest(err.to_string()),
            StorageError::Io(_) | StorageError::Database(_) | StorageError::Config(_) => {
                AppError::Internal(err.to_string())
            }
        }
    }
}
