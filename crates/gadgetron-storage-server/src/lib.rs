//! Gadgetron storage server
//!
//! Maps slash-delimited paths to ordered lists of immutable blobs. Idle
//! paths expire after their namespace's timeout, and blobs no path refers
//! to are reclaimed by a background garbage collector.

pub mod config;
pub mod error;
pub mod gc;
pub mod namespaces;
pub mod server;
pub mod storage;
pub mod types;

pub use config::Config;
pub use error::{AppError, Result, StorageError};
pub use gc::{GarbageCollector, SweepReport};
pub use namespaces::Namespaces;
pub use server::{create_router, start_server, ServerState, SharedState};
pub use storage::{Mutation, ReconcileReport, Resolved, Storage};
