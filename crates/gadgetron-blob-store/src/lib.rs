//! Flat-directory blob storage
//!
//! Stores immutable binary objects as `<id>.bin` files in a single
//! directory. Uploads are streamed into a staging directory and published
//! with a rename once the bytes are durable, so readers never observe a
//! partially written blob.

mod error;
mod store;
mod types;

pub use error::{BlobStoreError, Result};
pub use store::{BlobReader, BlobStore, CHUNK_SIZE};
pub use types::{BlobId, ByteRange};
