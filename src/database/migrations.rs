use sqlx::{PgPool, migrate::MigrateDatabase, Postgres};
use crate::error::AppError;
use tracing::{info, error};

/// Applies the embedded market schema migrations.
pub async fn run_migrations(pool: &PgPool) -> Result<(), AppError> {
    info!("Running market schema migrations");

    sqlx::migrate!("./migrations")
        .run(pool)
        .await
        .map_err(|e| {
            error!("Migration failed: {}", e);
            AppError::from(e)
        })?;

    info!("Market schema is up to date");
    Ok(())
}

pub async fn create_database_if_not_exists(database_url: &str) -> Result<(), AppError> {
    let exists = Postgres::database_exists(database_url)
        .await
        .map_err(|e| AppError::DatabaseError(format!("Failed to check database: {}", e)))?;

    if !exists {
        info!("Database does not exist, creating it");
        Postgres::create_database(database_url)
            .await
            .map_err(|e| AppError::DatabaseError(format!("Failed to create database: {}", e)))?;
        info!("Database created successfully");
    } else {
        info!("Database already exists");
    }

    Ok(())
}
