//! SQLite helpers: one place that builds the connection pool and runs the
//! embedded `sqlx` migrations.
//!
//! The `migrations/` directory at the crate root holds every schema change;
//! `sqlx::migrate!()` embeds it at compile time so applying it is idempotent.

use anyhow::{Context, Result};
use sqlx::{sqlite::SqlitePoolOptions, Pool, Sqlite};
use tracing::debug;

/// Create a SQLite pool and apply every pending migration.
///
/// In-memory databases live and die with their connection, so for
/// `sqlite::memory:` URLs the pool is pinned to one connection that never idles out.
pub async fn create_sqlite_pool_with_migration(db_url: &str) -> Result<Pool<Sqlite>> {
    let options = if is_memory_url(db_url) {
        SqlitePoolOptions::new()
            .max_connections(1)
            .min_connections(1)
            .idle_timeout(None)
            .max_lifetime(None)
    } else {
        SqlitePoolOptions::new().max_connections(5)
    };

    let pool = options
        .connect(db_url)
        .await
        .with_context(|| format!("failed to open SQLite database: {}", db_url))?;

    sqlx::migrate!()
        .run(&pool)
        .await
        .context("failed to apply SQLite migrations")?;

    debug!("[DB] pool ready, migrations applied: {}", db_url);
    Ok(pool)
}

fn is_memory_url(db_url: &str) -> bool {
    db_url.contains(":memory:") || db_url.contains("mode=memory")
}
