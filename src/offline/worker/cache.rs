//! Cache storage: named partitions of url -> response, persisted in SQLite

use crate::offline::worker::types::CachedResponse;
use anyhow::{Context, Result};
use chrono::Utc;
use sqlx::{sqlite::SqliteRow, Pool, Row, Sqlite};
use std::collections::HashMap;
use tracing::debug;

/// Cache storage DAO (sqlx)
#[derive(Clone)]
pub struct CacheStorage {
    db: Pool<Sqlite>,
}

impl CacheStorage {
    pub fn new(db: Pool<Sqlite>) -> Self {
        Self { db }
    }

    /// Create the partition if it does not exist yet
    pub async fn open(&self, name: &str) -> Result<()> {
        sqlx::query("INSERT OR IGNORE INTO cache_partitions (name, created_at) VALUES (?, ?)")
            .bind(name)
            .bind(Utc::now().timestamp_millis())
            .execute(&self.db)
            .await
            .with_context(|| format!("failed to open cache {}", name))?;
        Ok(())
    }

    pub async fn keys(&self) -> Result<Vec<String>> {
        let rows = sqlx::query("SELECT name FROM cache_partitions ORDER BY name")
            .fetch_all(&self.db)
            .await
            .context("failed to list caches")?;
        rows.iter()
            .map(|row| row.try_get::<String, _>("name").map_err(Into::into))
            .collect()
    }

    /// Delete a partition and everything in it
    pub async fn delete(&self, name: &str) -> Result<bool> {
        let mut tx = self.db.begin().await.context("failed to begin transaction")?;
        sqlx::query("DELETE FROM cache_entries WHERE cache_name = ?")
            .bind(name)
            .execute(&mut *tx)
            .await
            .context("failed to delete cache entries")?;
        let removed = sqlx::query("DELETE FROM cache_partitions WHERE name = ?")
            .bind(name)
            .execute(&mut *tx)
            .await
            .context("failed to delete cache")?
            .rows_affected();
        tx.commit().await.context("failed to commit cache delete")?;
        debug!("[CacheStorage] deleted cache {} (existed: {})", name, removed > 0);
        Ok(removed > 0)
    }

    /// Store (or replace) the response for `url`, opening the partition if needed
    pub async fn put(&self, name: &str, url: &str, response: &CachedResponse) -> Result<()> {
        self.open(name).await?;
        let headers =
            serde_json::to_string(&response.headers).context("failed to encode headers")?;
        sqlx::query(
            r#"
            INSERT INTO cache_entries (cache_name, url, status, headers, body, stored_at)
            VALUES (?, ?, ?, ?, ?, ?)
            ON CONFLICT(cache_name, url) DO UPDATE SET
                status = excluded.status,
                headers = excluded.headers,
                body = excluded.body,
                stored_at = excluded.stored_at
            "#,
        )
        .bind(name)
        .bind(url)
        .bind(response.status as i64)
        .bind(headers)
        .bind(&response.body)
        .bind(Utc::now().timestamp_millis())
        .execute(&self.db)
        .await
        .with_context(|| format!("failed to cache {} in {}", url, name))?;
        Ok(())
    }

    pub async fn match_url(&self, name: &str, url: &str) -> Result<Option<CachedResponse>> {
        let row = sqlx::query(
            "SELECT status, headers, body FROM cache_entries WHERE cache_name = ? AND url = ?",
        )
        .bind(name)
        .bind(url)
        .fetch_optional(&self.db)
        .await
        .context("failed to read cache entry")?;
        row.map(Self::row_to_response).transpose()
    }

    /// First match for `url` across the given partitions, in order
    pub async fn match_any(&self, names: &[String], url: &str) -> Result<Option<CachedResponse>> {
        for name in names {
            if let Some(response) = self.match_url(name, url).await? {
                return Ok(Some(response));
            }
        }
        Ok(None)
    }

    pub async fn entry_count(&self, name: &str) -> Result<usize> {
        let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM cache_entries WHERE cache_name = ?")
            .bind(name)
            .fetch_one(&self.db)
            .await
            .context("failed to count cache entries")?;
        Ok(count as usize)
    }

    fn row_to_response(row: SqliteRow) -> Result<CachedResponse> {
        let status: i64 = row.try_get("status")?;
        let headers: String = row.try_get("headers")?;
        let headers: HashMap<String, String> =
            serde_json::from_str(&headers).context("corrupt cached headers")?;
        Ok(CachedResponse {
            status: u16::try_from(status).context("corrupt cached status")?,
            headers,
            body: row.try_get("body")?,
        })
    }
}
