use std::str::FromStr;

use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions};
use sqlx::SqlitePool;

use crate::{se, Result, LOG};

/// Open (creating if needed) the database at `url` and bring its schema up to date
pub async fn connect(url: &str) -> Result<SqlitePool> {
    let options = SqliteConnectOptions::from_str(url)
        .map_err(|e| se!("invalid database url {}: {}", url, e))?
        .create_if_missing(true);
    let pool = SqlitePoolOptions::new()
        .max_connections(5)
        .connect_with(options)
        .await
        .map_err(|e| se!("error connecting to database {}: {}", url, e))?;
    migrate(&pool).await?;
    slog::info!(LOG, "database ready"; "url" => url);
    Ok(pool)
}

pub async fn migrate(pool: &SqlitePool) -> Result<()> {
    sqlx::migrate!("./migrations")
        .run(pool)
        .await
        .map_err(|e| se!("error running migrations {}", e))?;
    Ok(())
}
