//! Durable local store
//!
//! Two logical partitions over one SQLite database: the record cache and the
//! pending-operation queue. The store is created cheaply and opened by
//! [`LocalStore::initialize`], which may be called any number of times.

use crate::offline::db::create_sqlite_pool_with_migration;
use crate::offline::error::{OfflineError, OfflineResult};
use crate::offline::store::models::{record_id_of, CachedRecord, PendingOperation};
use crate::offline::store::queue_dao::SyncQueueDao;
use crate::offline::store::record_dao::RecordCacheDao;
use serde_json::Value;
use sqlx::{Pool, Sqlite};
use tokio::sync::OnceCell;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

struct StoreInner {
    pool: Pool<Sqlite>,
    queue: SyncQueueDao,
    records: RecordCacheDao,
}

/// Local persistent store shared by the sync engine and the offline context
pub struct LocalStore {
    db_url: String,
    inner: OnceCell<StoreInner>,
}

impl LocalStore {
    /// Create an unopened store for `db_url` (e.g. `sqlite://salon_offline.db?mode=rwc`)
    pub fn new(db_url: impl Into<String>) -> Self {
        Self {
            db_url: db_url.into(),
            inner: OnceCell::new(),
        }
    }

    /// Open (or create) the database and apply migrations.
    ///
    /// Idempotent: later calls return immediately and never touch queued data.
    pub async fn initialize(&self) -> OfflineResult<()> {
        self.inner
            .get_or_try_init(|| async {
                info!("[LocalStore] 📦 opening local store: {}", self.db_url);
                let pool = create_sqlite_pool_with_migration(&self.db_url)
                    .await
                    .map_err(|e| {
                        error!("[LocalStore] ❌ local store unavailable: {:#}", e);
                        OfflineError::StorageUnavailable(format!("{:#}", e))
                    })?;
                Ok::<_, OfflineError>(StoreInner {
                    queue: SyncQueueDao::new(pool.clone()),
                    records: RecordCacheDao::new(pool.clone()),
                    pool,
                })
            })
            .await?;
        Ok(())
    }

    pub fn is_initialized(&self) -> bool {
        self.inner.initialized()
    }

    /// Underlying pool, for collaborators sharing the same database file
    pub fn pool(&self) -> Option<Pool<Sqlite>> {
        self.inner.get().map(|inner| inner.pool.clone())
    }

    fn inner(&self) -> OfflineResult<&StoreInner> {
        self.inner
            .get()
            .ok_or_else(|| OfflineError::StorageUnavailable("local store not initialized".into()))
    }

    // ========== queue partition ==========

    /// Pending operations in enqueue order. Never fails: read errors are
    /// logged and reported as an empty queue.
    pub async fn get_sync_queue(&self) -> Vec<PendingOperation> {
        let Ok(inner) = self.inner() else {
            return Vec::new();
        };
        match inner.queue.list().await {
            Ok(ops) => ops,
            Err(e) => {
                warn!("[LocalStore] failed to read sync queue: {:#}", e);
                Vec::new()
            }
        }
    }

    /// Number of queued operations (0 when unreadable)
    pub async fn pending_count(&self) -> usize {
        let Ok(inner) = self.inner() else {
            return 0;
        };
        match inner.queue.count().await {
            Ok(n) => n,
            Err(e) => {
                warn!("[LocalStore] failed to count sync queue: {:#}", e);
                0
            }
        }
    }

    /// Append an operation, assigning an id when it has none.
    /// Returns the operation as stored.
    pub async fn enqueue_operation(&self, mut op: PendingOperation) -> OfflineResult<PendingOperation> {
        let inner = self.inner()?;
        if op.id.is_empty() {
            op.id = Uuid::new_v4().to_string();
        }
        if op.record_id.is_empty() {
            op.record_id = record_id_of(&op.payload).unwrap_or_default();
        }
        inner.queue.insert(&op).await?;
        debug!(
            "[LocalStore] enqueued {} {}/{} (op {})",
            op.kind, op.collection, op.record_id, op.id
        );
        Ok(op)
    }

    /// Remove an operation by id. Removing an absent id is a no-op.
    pub async fn dequeue_operation(&self, id: &str) -> OfflineResult<()> {
        let removed = self.inner()?.queue.delete(id).await?;
        if !removed {
            debug!("[LocalStore] dequeue of unknown op {} ignored", id);
        }
        Ok(())
    }

    /// Record a failed submission; returns the new retry count
    pub async fn record_failure(&self, id: &str, error: &str) -> OfflineResult<Option<u32>> {
        Ok(self.inner()?.queue.mark_failed(id, error).await?)
    }

    /// Operations that failed at least `min_retries` times
    pub async fn stuck_operations(&self, min_retries: u32) -> OfflineResult<Vec<PendingOperation>> {
        Ok(self.inner()?.queue.list_stuck(min_retries).await?)
    }

    /// Drop every queued operation. This is the manual escape hatch for
    /// operations the remote will never accept.
    pub async fn clear_queue(&self) -> OfflineResult<u64> {
        let removed = self.inner()?.queue.clear().await?;
        warn!("[LocalStore] 🗑️ sync queue cleared, {} operation(s) dropped", removed);
        Ok(removed)
    }

    // ========== record cache partition ==========

    /// Overwrite the snapshot of one record. The record must carry an `id`.
    pub async fn put_cached_record(&self, collection: &str, record: &Value) -> OfflineResult<()> {
        let record_id = record_id_of(record).ok_or_else(|| {
            OfflineError::InvalidOperation(format!("record in {} has no id", collection))
        })?;
        self.inner()?
            .records
            .upsert(collection, &record_id, record, chrono::Utc::now().timestamp_millis())
            .await?;
        Ok(())
    }

    /// Cached snapshots of a collection (empty when unreadable)
    pub async fn get_cached_records(&self, collection: &str) -> Vec<CachedRecord> {
        let Ok(inner) = self.inner() else {
            return Vec::new();
        };
        match inner.records.list(collection).await {
            Ok(records) => records,
            Err(e) => {
                warn!("[LocalStore] failed to read collection {}: {:#}", collection, e);
                Vec::new()
            }
        }
    }

    pub async fn get_cached_record(
        &self,
        collection: &str,
        record_id: &str,
    ) -> OfflineResult<Option<CachedRecord>> {
        Ok(self.inner()?.records.get(collection, record_id).await?)
    }

    pub async fn remove_cached_record(&self, collection: &str, record_id: &str) -> OfflineResult<()> {
        self.inner()?.records.delete(collection, record_id).await?;
        Ok(())
    }

    /// Replace a collection's snapshot wholesale (pull result). Records
    /// without an id are skipped.
    pub async fn replace_collection(&self, collection: &str, records: &[Value]) -> OfflineResult<usize> {
        let keyed: Vec<(String, Value)> = records
            .iter()
            .filter_map(|r| match record_id_of(r) {
                Some(id) => Some((id, r.clone())),
                None => {
                    warn!("[LocalStore] skipping {} record without id", collection);
                    None
                }
            })
            .collect();
        self.inner()?
            .records
            .replace_collection(collection, &keyed, chrono::Utc::now().timestamp_millis())
            .await?;
        Ok(keyed.len())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::offline::store::models::OperationKind;
    use serde_json::json;

    async fn open_store() -> LocalStore {
        let store = LocalStore::new("sqlite::memory:");
        store.initialize().await.unwrap();
        store
    }

    #[tokio::test]
    async fn initialize_twice_keeps_queued_operations() {
        let store = open_store().await;
        store
            .enqueue_operation(PendingOperation::new(
                "clientes",
                OperationKind::Create,
                json!({"id": "A", "nome": "Ana"}),
            ))
            .await
            .unwrap();

        store.initialize().await.unwrap();
        store.initialize().await.unwrap();

        let queue = store.get_sync_queue().await;
        assert_eq!(queue.len(), 1);
        assert_eq!(queue[0].record_id, "A");
    }

    #[tokio::test]
    async fn unopenable_database_is_storage_unavailable() {
        let store = LocalStore::new("sqlite:///nonexistent-dir/definitely/missing.db");
        let err = store.initialize().await.unwrap_err();
        assert!(matches!(err, OfflineError::StorageUnavailable(_)));
        assert!(store.get_sync_queue().await.is_empty());
        assert_eq!(store.pending_count().await, 0);
    }

    #[tokio::test]
    async fn enqueue_assigns_ids_and_preserves_order() {
        let store = open_store().await;
        for n in 0..3 {
            store
                .enqueue_operation(PendingOperation::new(
                    "agendamentos",
                    OperationKind::Update,
                    json!({"id": "X", "n": n}),
                ))
                .await
                .unwrap();
        }

        let queue = store.get_sync_queue().await;
        let ns: Vec<i64> = queue.iter().map(|op| op.payload["n"].as_i64().unwrap()).collect();
        assert_eq!(ns, vec![0, 1, 2]);
        assert!(queue.iter().all(|op| !op.id.is_empty()));
        assert_eq!(store.pending_count().await, 3);
    }

    #[tokio::test]
    async fn dequeue_of_absent_id_is_a_no_op() {
        let store = open_store().await;
        let op = store
            .enqueue_operation(PendingOperation::new("clientes", OperationKind::Delete, json!({"id": "B"})))
            .await
            .unwrap();

        store.dequeue_operation(&op.id).await.unwrap();
        store.dequeue_operation(&op.id).await.unwrap();
        store.dequeue_operation("never-existed").await.unwrap();
        assert!(store.get_sync_queue().await.is_empty());
    }

    #[tokio::test]
    async fn undecodable_row_does_not_hide_the_rest_of_the_queue() {
        let store = open_store().await;
        store
            .enqueue_operation(PendingOperation::new("clientes", OperationKind::Create, json!({"id": "A"})))
            .await
            .unwrap();
        sqlx::query(
            "INSERT INTO sync_queue (id, collection, record_id, kind, payload, created_at, retry_count) \
             VALUES ('bad-1', 'clientes', 'B', 'upsert', '{}', 0, 0), \
                    ('bad-2', 'clientes', 'C', 'create', 'not json', 0, 0)",
        )
        .execute(&store.pool().unwrap())
        .await
        .unwrap();
        store
            .enqueue_operation(PendingOperation::new("clientes", OperationKind::Update, json!({"id": "A", "n": 1})))
            .await
            .unwrap();

        let queue = store.get_sync_queue().await;
        let kinds: Vec<OperationKind> = queue.iter().map(|op| op.kind).collect();
        assert_eq!(kinds, vec![OperationKind::Create, OperationKind::Update]);
        assert_eq!(store.pending_count().await, 4);
    }

    #[tokio::test]
    async fn record_failure_increments_retry_count() {
        let store = open_store().await;
        let op = store
            .enqueue_operation(PendingOperation::new("clientes", OperationKind::Update, json!({"id": "A"})))
            .await
            .unwrap();

        assert_eq!(store.record_failure(&op.id, "boom").await.unwrap(), Some(1));
        assert_eq!(store.record_failure(&op.id, "boom again").await.unwrap(), Some(2));
        assert_eq!(store.record_failure("missing", "x").await.unwrap(), None);

        let stuck = store.stuck_operations(2).await.unwrap();
        assert_eq!(stuck.len(), 1);
        assert_eq!(stuck[0].last_error.as_deref(), Some("boom again"));
    }

    #[tokio::test]
    async fn replace_collection_supersedes_previous_snapshot() {
        let store = open_store().await;
        store
            .put_cached_record("clientes", &json!({"id": "old", "nome": "Velho"}))
            .await
            .unwrap();
        store
            .put_cached_record("servicos", &json!({"id": "s1"}))
            .await
            .unwrap();

        let written = store
            .replace_collection(
                "clientes",
                &[json!({"id": "A", "nome": "Ana"}), json!({"nome": "sem id"})],
            )
            .await
            .unwrap();
        assert_eq!(written, 1);

        let clientes = store.get_cached_records("clientes").await;
        assert_eq!(clientes.len(), 1);
        assert_eq!(clientes[0].record_id, "A");
        assert_eq!(store.get_cached_records("servicos").await.len(), 1);
    }

    #[tokio::test]
    async fn put_cached_record_requires_an_id() {
        let store = open_store().await;
        let err = store
            .put_cached_record("clientes", &json!({"nome": "X"}))
            .await
            .unwrap_err();
        assert!(matches!(err, OfflineError::InvalidOperation(_)));
    }
}
