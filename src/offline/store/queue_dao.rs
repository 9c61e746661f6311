//! Pending-operation queue data access (DAO)
//!
//! Every method is a single statement, so readers (e.g. the pending-count
//! poll) can interleave freely with a running drain.

use crate::offline::store::models::{OperationKind, PendingOperation};
use anyhow::{Context, Result};
use sqlx::{sqlite::SqliteRow, Pool, Row, Sqlite};
use tracing::{debug, warn};

/// Queue DAO (sqlx)
pub struct SyncQueueDao {
    db: Pool<Sqlite>,
}

impl SyncQueueDao {
    pub fn new(db: Pool<Sqlite>) -> Self {
        Self { db }
    }

    /// All queued operations in enqueue order
    pub async fn list(&self) -> Result<Vec<PendingOperation>> {
        let rows = sqlx::query(
            r#"
            SELECT id, collection, record_id, kind, payload, created_at, retry_count, last_error
            FROM sync_queue
            ORDER BY seq ASC
            "#,
        )
        .fetch_all(&self.db)
        .await
        .context("failed to read sync queue")?;

        let ops = Self::decode_rows(rows);
        debug!("[QueueDAO] read sync queue, {} operation(s)", ops.len());
        Ok(ops)
    }

    /// Operations that have failed at least `min_retries` times
    pub async fn list_stuck(&self, min_retries: u32) -> Result<Vec<PendingOperation>> {
        let rows = sqlx::query(
            r#"
            SELECT id, collection, record_id, kind, payload, created_at, retry_count, last_error
            FROM sync_queue
            WHERE retry_count >= ?
            ORDER BY seq ASC
            "#,
        )
        .bind(min_retries as i64)
        .fetch_all(&self.db)
        .await
        .context("failed to read stuck operations")?;

        Ok(Self::decode_rows(rows))
    }

    pub async fn count(&self) -> Result<usize> {
        let row = sqlx::query("SELECT COUNT(*) AS n FROM sync_queue")
            .fetch_one(&self.db)
            .await
            .context("failed to count sync queue")?;
        Ok(row.get::<i64, _>("n") as usize)
    }

    /// Append one operation. The caller guarantees a non-empty id.
    pub async fn insert(&self, op: &PendingOperation) -> Result<()> {
        let payload = serde_json::to_string(&op.payload).context("failed to encode payload")?;
        sqlx::query(
            r#"
            INSERT INTO sync_queue (
                id, collection, record_id, kind, payload, created_at, retry_count, last_error
            ) VALUES (?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(&op.id)
        .bind(&op.collection)
        .bind(&op.record_id)
        .bind(op.kind.as_str())
        .bind(payload)
        .bind(op.created_at)
        .bind(op.retry_count as i64)
        .bind(&op.last_error)
        .execute(&self.db)
        .await
        .context("failed to enqueue operation")?;
        Ok(())
    }

    /// Remove one operation; returns whether a row was removed
    pub async fn delete(&self, id: &str) -> Result<bool> {
        let result = sqlx::query("DELETE FROM sync_queue WHERE id = ?")
            .bind(id)
            .execute(&self.db)
            .await
            .context("failed to dequeue operation")?;
        Ok(result.rows_affected() > 0)
    }

    /// Bump the retry count and store the error; returns the new retry count
    /// (`None` when the operation is no longer queued).
    pub async fn mark_failed(&self, id: &str, error: &str) -> Result<Option<u32>> {
        let row = sqlx::query(
            r#"
            UPDATE sync_queue
            SET retry_count = retry_count + 1, last_error = ?
            WHERE id = ?
            RETURNING retry_count
            "#,
        )
        .bind(error)
        .bind(id)
        .fetch_optional(&self.db)
        .await
        .context("failed to record operation failure")?;
        Ok(row.map(|r| r.get::<i64, _>("retry_count") as u32))
    }

    pub async fn clear(&self) -> Result<u64> {
        let result = sqlx::query("DELETE FROM sync_queue")
            .execute(&self.db)
            .await
            .context("failed to clear sync queue")?;
        Ok(result.rows_affected())
    }

    /// Decode row by row. A row that does not decode stays in the table (it
    /// still counts as pending) but is left out of the result.
    fn decode_rows(rows: Vec<SqliteRow>) -> Vec<PendingOperation> {
        rows.into_iter()
            .filter_map(|row| {
                let id: String = row.get("id");
                match Self::row_to_operation(row) {
                    Ok(op) => Some(op),
                    Err(e) => {
                        warn!("[QueueDAO] ⚠️ skipping undecodable op {}: {:#}", id, e);
                        None
                    }
                }
            })
            .collect()
    }

    fn row_to_operation(row: SqliteRow) -> Result<PendingOperation> {
        let kind: String = row.get("kind");
        let payload: String = row.get("payload");
        Ok(PendingOperation {
            id: row.get("id"),
            collection: row.get("collection"),
            record_id: row.get("record_id"),
            kind: kind.parse::<OperationKind>()?,
            payload: serde_json::from_str(&payload).context("corrupt queued payload")?,
            created_at: row.get("created_at"),
            retry_count: row.get::<i64, _>("retry_count") as u32,
            last_error: row.get("last_error"),
        })
    }
}
