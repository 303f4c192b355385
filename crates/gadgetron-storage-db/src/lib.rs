pub mod blobs;
pub mod entries;
pub mod error;
pub mod gc;
pub mod leaves;
pub mod migrate;
pub mod path;
pub mod types;

pub use error::{DbError, Result};
pub use path::LeafPath;
pub use sqlx::sqlite::{SqliteConnection, SqlitePool};
pub use types::*;

use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions};
use std::str::FromStr;
use std::time::Duration;
use tracing::info;

/// Open (creating if needed) the metadata database at `database_url`.
///
/// Foreign keys are always enforced: entry cascades and blob references
/// depend on them.
pub async fn connect(database_url: &str) -> Result<SqlitePool> {
    info!("Connecting to database...");
    let options = SqliteConnectOptions::from_str(database_url)?
        .create_if_missing(true)
        .journal_mode(SqliteJournalMode::Wal)
        .foreign_keys(true)
        .busy_timeout(Duration::from_secs(10));

    let pool = SqlitePoolOptions::new()
        .max_connections(8)
        .connect_with(options)
        .await?;
    info!("Database connection established");
    Ok(pool)
}
