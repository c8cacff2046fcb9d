//! Embedded schema migrations.

use sqlx::PgPool;

/// Run all pending migrations.
pub async fn run(pool: &PgPool) -> Result<(), sqlx::migrate::MigrateError> {
    sqlx::migrate!("./migrations").run(pool).await
}
