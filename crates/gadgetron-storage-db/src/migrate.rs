use crate::error::{DbError, Result};
use sqlx::SqlitePool;
use tracing::info;

/// Run all database migrations (versioned, tracked in `_sqlx_migrations` table)
pub async fn migrate(pool: &SqlitePool) -> Result<()> {
    info!("Running database migrations...");
    sqlx::migrate!()
        .run(pool)
        .await
        .map_err(|e| DbError::Migrate(e.to_string()))?;
    info!("Database migrations completed");
    Ok(())
}
