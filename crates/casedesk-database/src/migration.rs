//! Schema migrations for the `notifications` table and its triggers.

use sqlx::PgPool;
use tracing::info;

use casedesk_core::error::{AppError, ErrorKind};

/// Apply pending migrations from the workspace `migrations/` directory.
pub async fn run_migrations(pool: &PgPool) -> Result<(), AppError> {
    let migrator = sqlx::migrate!("../../migrations");
    migrator.run(pool).await.map_err(|e| {
        AppError::with_source(ErrorKind::Database, "Failed to apply notification migrations", e)
    })?;

    info!(count = migrator.iter().count(), "Notification schema up to date");
    Ok(())
}
