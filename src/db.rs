use anyhow::Result;
use sqlx::SqlitePool;

/// Schema for the application record store, embedded at build time.
const MIGRATION_SQL: &str = include_str!("../migrations/0001_init.sql");

/// Run SQLite migrations from the embedded SQL file.
pub async fn run_migrations(db: &SqlitePool) -> Result<()> {
    let statements = MIGRATION_SQL
        .split(';')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .collect::<Vec<_>>();

    tracing::info!("Running {} migration statements...", statements.len());

    for stmt in statements {
        tracing::debug!("Executing migration SQL: {}", stmt);
        sqlx::query(stmt).execute(db).await?;
    }

    Ok(())
}
