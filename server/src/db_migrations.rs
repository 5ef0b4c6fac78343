use std::path::Path;

use sqlx::postgres::PgPoolOptions;
use tracing::info;

const WORKSPACE_MIGRATIONS_DIR: &str = "server/migrations";
const CRATE_MIGRATIONS_DIR: &str = "./migrations";

#[derive(Debug, thiserror::Error)]
pub enum DatabaseSetupError {
    #[error("failed to connect to PostgreSQL: {0}")]
    Connect(#[from] sqlx_core::Error),
    #[error("failed to run migrations: {0}")]
    Migrate(#[from] sqlx_core::migrate::MigrateError),
}

fn migrations_path() -> &'static Path {
    let workspace_path = Path::new(WORKSPACE_MIGRATIONS_DIR);
    if workspace_path.exists() {
        return workspace_path;
    }
    Path::new(CRATE_MIGRATIONS_DIR)
}

pub async fn run(pool: &sqlx::PgPool) -> Result<(), sqlx_core::migrate::MigrateError> {
    let migrator = sqlx_core::migrate::Migrator::new(migrations_path()).await?;
    migrator.run(pool).await
}

/// Open the achievement database and bring its schema up to date.
pub async fn connect(
    database_url: &str,
    max_connections: u32,
) -> Result<sqlx::PgPool, DatabaseSetupError> {
    info!(max_connections, "connecting to PostgreSQL");
    let pool = PgPoolOptions::new()
        .max_connections(max_connections)
        .connect(database_url)
        .await?;
    run(&pool).await?;
    info!(migrations = %migrations_path().display(), "database connected and migrations applied");
    Ok(pool)
}
