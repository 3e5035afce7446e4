use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions};
use sqlx::SqlitePool;
use std::str::FromStr;

use crate::config::TablePrefix;

pub async fn init_pool(
    database_url: &str,
    prefix: &TablePrefix,
) -> Result<SqlitePool, sqlx::Error> {
    let options = SqliteConnectOptions::from_str(database_url)?
        .create_if_missing(true)
        .journal_mode(sqlx::sqlite::SqliteJournalMode::Wal)
        .busy_timeout(std::time::Duration::from_secs(5));

    // An in-memory database lives exactly as long as its single connection.
    let pool = if database_url.contains(":memory:") {
        SqlitePoolOptions::new()
            .max_connections(1)
            .idle_timeout(None)
            .max_lifetime(None)
    } else {
        SqlitePoolOptions::new().max_connections(5)
    }
    .connect_with(options)
    .await?;

    run_migrations(&pool, prefix).await?;

    Ok(pool)
}

async fn run_migrations(pool: &SqlitePool, prefix: &TablePrefix) -> Result<(), sqlx::Error> {
    let migration_sql =
        include_str!("../migrations/001_initial.sql").replace("{prefix}", prefix.as_str());
    sqlx::raw_sql(&migration_sql).execute(pool).await?;
    Ok(())
}
