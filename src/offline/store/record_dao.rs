//! Cached-record data access (DAO)

use crate::offline::store::models::CachedRecord;
use anyhow::{Context, Result};
use serde_json::Value;
use sqlx::{sqlite::SqliteRow, Pool, Row, Sqlite};
use tracing::debug;

/// Record cache DAO (sqlx)
pub struct RecordCacheDao {
    db: Pool<Sqlite>,
}

impl RecordCacheDao {
    pub fn new(db: Pool<Sqlite>) -> Self {
        Self { db }
    }

    pub async fn list(&self, collection: &str) -> Result<Vec<CachedRecord>> {
        let rows = sqlx::query(
            r#"
            SELECT collection, record_id, data, last_synced_at
            FROM cached_records
            WHERE collection = ?
            ORDER BY record_id
            "#,
        )
        .bind(collection)
        .fetch_all(&self.db)
        .await
        .context("failed to read cached records")?;

        let records = rows
            .into_iter()
            .map(Self::row_to_record)
            .collect::<Result<Vec<_>>>()?;
        debug!(
            "[RecordDAO] read collection {}, {} record(s)",
            collection,
            records.len()
        );
        Ok(records)
    }

    pub async fn get(&self, collection: &str, record_id: &str) -> Result<Option<CachedRecord>> {
        let row = sqlx::query(
            r#"
            SELECT collection, record_id, data, last_synced_at
            FROM cached_records
            WHERE collection = ? AND record_id = ?
            "#,
        )
        .bind(collection)
        .bind(record_id)
        .fetch_optional(&self.db)
        .await
        .context("failed to read cached record")?;

        row.map(Self::row_to_record).transpose()
    }

    /// Insert or overwrite a single snapshot
    pub async fn upsert(&self, collection: &str, record_id: &str, data: &Value, at: i64) -> Result<()> {
        let data = serde_json::to_string(data).context("failed to encode record")?;
        sqlx::query(
            r#"
            INSERT INTO cached_records (collection, record_id, data, last_synced_at)
            VALUES (?, ?, ?, ?)
            ON CONFLICT(collection, record_id) DO UPDATE SET
                data = excluded.data,
                last_synced_at = excluded.last_synced_at
            "#,
        )
        .bind(collection)
        .bind(record_id)
        .bind(data)
        .bind(at)
        .execute(&self.db)
        .await
        .context("failed to upsert cached record")?;
        Ok(())
    }

    pub async fn delete(&self, collection: &str, record_id: &str) -> Result<bool> {
        let result = sqlx::query("DELETE FROM cached_records WHERE collection = ? AND record_id = ?")
            .bind(collection)
            .bind(record_id)
            .execute(&self.db)
            .await
            .context("failed to delete cached record")?;
        Ok(result.rows_affected() > 0)
    }

    /// Replace a whole collection in one transaction
    pub async fn replace_collection(
        &self,
        collection: &str,
        records: &[(String, Value)],
        at: i64,
    ) -> Result<()> {
        let mut tx = self.db.begin().await.context("failed to begin transaction")?;

        sqlx::query("DELETE FROM cached_records WHERE collection = ?")
            .bind(collection)
            .execute(&mut *tx)
            .await
            .context("failed to clear collection")?;

        for (record_id, data) in records {
            let data = serde_json::to_string(data).context("failed to encode record")?;
            sqlx::query(
                r#"
                INSERT OR REPLACE INTO cached_records (collection, record_id, data, last_synced_at)
                VALUES (?, ?, ?, ?)
                "#,
            )
            .bind(collection)
            .bind(record_id)
            .bind(data)
            .bind(at)
            .execute(&mut *tx)
            .await
            .context("failed to insert cached record")?;
        }

        tx.commit().await.context("failed to commit collection")?;
        Ok(())
    }

    fn row_to_record(row: SqliteRow) -> Result<CachedRecord> {
        let data: String = row.get("data");
        Ok(CachedRecord {
            collection: row.get("collection"),
            record_id: row.get("record_id"),
            data: serde_json::from_str(&data).context("corrupt cached record")?,
            last_synced_at: row.get("last_synced_at"),
        })
    }
}
