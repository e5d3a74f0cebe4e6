//! Embedded schema migrations (`civica_core/migrations/`).

use sqlx::PgPool;
use sqlx::migrate::{MigrateError, Migrator};
use tracing::debug;

pub static MIGRATOR: Migrator = sqlx::migrate!("./migrations");

/// Apply every pending migration. Already-applied ones are skipped by sqlx.
pub async fn migrate(pool: &PgPool) -> Result<(), MigrateError> {
    debug!(known = MIGRATOR.iter().count(), "applying migrations");
    MIGRATOR.run(pool).await
}
