//! Sync engine
//!
//! Reconciles the local store with the remote collaborator:
//! - `initial_sync` pulls every registered collection (failures isolated per collection)
//! - `sync_pending_operations` drains the queue in order, one operation at a time
//! - a periodic task triggers the drain on a fixed interval
//!
//! Drains are mutually exclusive. A failed submission is always "retry later":
//! the operation stays queued with its retry count bumped, and the pass moves on.

use crate::offline::error::{PullFailure, SyncSubmissionFailure};
use crate::offline::network::NetworkMonitor;
use crate::offline::store::models::{record_id_of, OperationKind, PendingOperation};
use crate::offline::store::LocalStore;
use crate::offline::sync::api::RemoteDataApi;
use crate::offline::sync::models::{
    InitialSyncReport, SkipReason, SyncCycleResult, SyncEngineConfig,
};
use serde_json::Value;
use std::collections::HashSet;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::oneshot;
use tokio::time::{interval, MissedTickBehavior};
use tracing::{debug, error, info, warn};

struct PeriodicTask {
    /// Dropping or firing this ends the loop at its next wait point
    stop: oneshot::Sender<()>,
    every: Duration,
}

/// Sync engine
pub struct SyncEngine {
    config: SyncEngineConfig,
    store: Arc<LocalStore>,
    api: Arc<dyn RemoteDataApi>,
    monitor: Arc<NetworkMonitor>,
    /// In-flight guard: held for the whole duration of a drain
    drain_guard: tokio::sync::Mutex<()>,
    periodic: Mutex<Option<PeriodicTask>>,
    /// Confirmed by the remote but still queued because the dequeue failed.
    /// Never submitted again; the dequeue is retried at the start of each pass.
    confirmed: Mutex<HashSet<String>>,
}

impl SyncEngine {
    pub fn new(
        config: SyncEngineConfig,
        store: Arc<LocalStore>,
        api: Arc<dyn RemoteDataApi>,
        monitor: Arc<NetworkMonitor>,
    ) -> Self {
        info!(
            "[SyncEngine] created, collections: {:?}",
            config.collections
        );
        Self {
            config,
            store,
            api,
            monitor,
            drain_guard: tokio::sync::Mutex::new(()),
            periodic: Mutex::new(None),
            confirmed: Mutex::new(HashSet::new()),
        }
    }

    pub fn collections(&self) -> &[String] {
        &self.config.collections
    }

    /// Pull every registered collection, overwriting the local cache.
    ///
    /// A failing collection is recorded and skipped; the others still run.
    pub async fn initial_sync(&self) -> InitialSyncReport {
        info!(
            "[SyncEngine] 🔄 initial sync of {} collection(s)",
            self.config.collections.len()
        );
        let mut report = InitialSyncReport::default();

        for collection in &self.config.collections {
            match self.pull_collection(collection).await {
                Ok(count) => report.pulled.push((collection.clone(), count)),
                Err(e) => {
                    let message = format!("{:#}", e);
                    warn!(
                        "[SyncEngine] pull of {} failed, keeping previous cache: {}",
                        collection, message
                    );
                    report.failures.push(PullFailure {
                        collection: collection.clone(),
                        message,
                    });
                }
            }
        }

        info!(
            "[SyncEngine] ✅ initial sync done - pulled: {}, failed: {}",
            report.pulled.len(),
            report.failures.len()
        );
        report
    }

    /// Pull one collection and replace its cached snapshot
    pub async fn pull_collection(&self, collection: &str) -> anyhow::Result<usize> {
        let records = self.api.pull(collection).await?;
        let written = self.store.replace_collection(collection, &records).await?;
        debug!("[SyncEngine] {} <- {} record(s)", collection, written);
        Ok(written)
    }

    /// Drain the queue unless another drain is already in flight, in which case
    /// this returns immediately with [`SkipReason::AlreadyRunning`].
    pub async fn sync_pending_operations(&self) -> SyncCycleResult {
        match self.drain_guard.try_lock() {
            Ok(_guard) => self.drain().await,
            Err(_) => {
                debug!("[SyncEngine] drain already in flight, skipping");
                SyncCycleResult::skipped(SkipReason::AlreadyRunning, self.store.pending_count().await)
            }
        }
    }

    /// Wait for any running drain, then perform one full pass
    pub async fn sync_now(&self) -> SyncCycleResult {
        let _guard = self.drain_guard.lock().await;
        self.drain().await
    }

    /// One pass over the queue. Caller holds `drain_guard`.
    async fn drain(&self) -> SyncCycleResult {
        self.retry_confirmed_dequeues().await;
        let confirmed = lock(&self.confirmed).clone();
        let queue: Vec<PendingOperation> = self
            .store
            .get_sync_queue()
            .await
            .into_iter()
            .filter(|op| !confirmed.contains(&op.id))
            .collect();
        if queue.is_empty() {
            // Undecodable or already-confirmed rows still count as pending.
            return SyncCycleResult::skipped(SkipReason::EmptyQueue, self.store.pending_count().await);
        }
        if !self.monitor.get_online_status() {
            debug!(
                "[SyncEngine] offline, {} operation(s) left queued",
                queue.len()
            );
            return SyncCycleResult::skipped(SkipReason::Offline, queue.len());
        }

        info!("[SyncEngine] 📤 draining {} queued operation(s)", queue.len());
        let mut result = SyncCycleResult::default();
        // Records with a failed operation in this pass; later operations on
        // them wait for the next pass so the remote never sees them reordered.
        let mut blocked: HashSet<(String, String)> = HashSet::new();

        for op in queue {
            let key = op.ordering_key();
            if blocked.contains(&key) {
                debug!(
                    "[SyncEngine]   deferring {} {}/{} behind a failed operation",
                    op.kind, op.collection, op.record_id
                );
                result.deferred += 1;
                continue;
            }

            // Connectivity can drop mid-pass; the rest waits for the next one.
            if !self.monitor.get_online_status() {
                info!("[SyncEngine] 📴 went offline mid-drain, stopping the pass");
                break;
            }

            match self.api.submit(&op.collection, op.kind, &op.payload).await {
                Ok(confirmed) => {
                    if let Err(e) = self.store.dequeue_operation(&op.id).await {
                        error!(
                            "[SyncEngine] ❌ op {} confirmed but could not be dequeued: {}",
                            op.id, e
                        );
                        lock(&self.confirmed).insert(op.id.clone());
                    }
                    self.apply_confirmed(&op, &confirmed).await;
                    result.applied += 1;
                }
                Err(e) => {
                    let message = format!("{:#}", e);
                    let retry_count = match self.store.record_failure(&op.id, &message).await {
                        Ok(Some(n)) => n,
                        Ok(None) => op.retry_count + 1,
                        Err(store_err) => {
                            error!(
                                "[SyncEngine] failed to record failure of op {}: {}",
                                op.id, store_err
                            );
                            op.retry_count + 1
                        }
                    };
                    warn!(
                        "[SyncEngine]   {} {}/{} failed (retry #{}): {}",
                        op.kind, op.collection, op.record_id, retry_count, message
                    );
                    result.failures.push(SyncSubmissionFailure {
                        operation_id: op.id.clone(),
                        collection: op.collection.clone(),
                        record_id: op.record_id.clone(),
                        retry_count,
                        message,
                    });
                    result.failed += 1;
                    blocked.insert(key);
                }
            }
        }

        result.remaining = self.store.pending_count().await;
        info!(
            "[SyncEngine] ✅ drain finished - applied: {}, failed: {}, deferred: {}, remaining: {}",
            result.applied, result.failed, result.deferred, result.remaining
        );
        result
    }

    async fn retry_confirmed_dequeues(&self) {
        let ids: Vec<String> = lock(&self.confirmed).iter().cloned().collect();
        for id in ids {
            match self.store.dequeue_operation(&id).await {
                Ok(()) => {
                    lock(&self.confirmed).remove(&id);
                    debug!("[SyncEngine] confirmed op {} dequeued on retry", id);
                }
                Err(e) => warn!("[SyncEngine] confirmed op {} still not dequeued: {}", id, e),
            }
        }
    }

    /// Write the remote-confirmed state into the record cache
    async fn apply_confirmed(&self, op: &PendingOperation, confirmed: &Value) {
        let outcome = match op.kind {
            OperationKind::Delete => {
                self.store
                    .remove_cached_record(&op.collection, &op.record_id)
                    .await
            }
            OperationKind::Create | OperationKind::Update => {
                let confirmed_id = record_id_of(confirmed);
                // The backend may assign its own id on create; drop the
                // optimistic placeholder stored under the local id.
                if let Some(confirmed_id) = &confirmed_id {
                    if !op.record_id.is_empty() && *confirmed_id != op.record_id {
                        if let Err(e) = self
                            .store
                            .remove_cached_record(&op.collection, &op.record_id)
                            .await
                        {
                            warn!(
                                "[SyncEngine] placeholder {}/{} not removed after the remote assigned {}: {}",
                                op.collection, op.record_id, confirmed_id, e
                            );
                        }
                    }
                }
                if confirmed_id.is_some() {
                    self.store.put_cached_record(&op.collection, confirmed).await
                } else {
                    self.store.put_cached_record(&op.collection, &op.payload).await
                }
            }
        };
        if let Err(e) = outcome {
            warn!(
                "[SyncEngine] cache update after {} {}/{} failed: {}",
                op.kind, op.collection, op.record_id, e
            );
        }
    }

    /// Start the background drain. Starting again replaces the running timer.
    pub fn start_periodic_sync(self: &Arc<Self>, every: Duration) {
        let (stop_tx, mut stop_rx) = oneshot::channel::<()>();
        let engine = Arc::downgrade(self);

        tokio::spawn(async move {
            let mut ticker = interval(every);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            // The first tick fires immediately; the first cycle runs one period in.
            ticker.tick().await;
            loop {
                tokio::select! {
                    _ = ticker.tick() => {}
                    _ = &mut stop_rx => break,
                }
                let Some(engine) = engine.upgrade() else {
                    break;
                };
                // Not raced against the stop signal: a drain always completes.
                engine.run_periodic_cycle().await;
            }
            debug!("[SyncEngine] periodic loop exited");
        });

        let previous = lock(&self.periodic).replace(PeriodicTask {
            stop: stop_tx,
            every,
        });
        if let Some(previous) = previous {
            let _ = previous.stop.send(());
            info!(
                "[SyncEngine] ⏱️ periodic sync restarted ({:?} -> {:?})",
                previous.every, every
            );
        } else {
            info!("[SyncEngine] ⏱️ periodic sync started, every {:?}", every);
        }
    }

    /// Stop the background drain. A no-op when it is not running; an
    /// in-flight drain finishes normally.
    pub fn stop_periodic_sync(&self) {
        if let Some(task) = lock(&self.periodic).take() {
            let _ = task.stop.send(());
            info!("[SyncEngine] ⏹️ periodic sync stopped");
        }
    }

    pub fn is_periodic_sync_running(&self) -> bool {
        lock(&self.periodic).is_some()
    }

    async fn run_periodic_cycle(&self) {
        let result = self.sync_pending_operations().await;
        if !self.config.refresh_after_drain {
            return;
        }
        let drained = matches!(result.skipped, None | Some(SkipReason::EmptyQueue));
        if drained && result.remaining == 0 && self.monitor.get_online_status() {
            debug!("[SyncEngine] queue empty, refreshing collections");
            self.initial_sync().await;
        }
    }
}

impl Drop for SyncEngine {
    fn drop(&mut self) {
        self.stop_periodic_sync();
    }
}

fn lock<T>(mutex: &Mutex<T>) -> std::sync::MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::offline::test_support::init_test_logger;
    use async_trait::async_trait;
    use serde_json::json;
    use std::sync::atomic::{AtomicUsize, Ordering};

    /// In-memory remote: records every call, rejects what `reject` matches
    #[derive(Default)]
    pub(crate) struct MockRemote {
        pub calls: Mutex<Vec<(String, OperationKind, Value)>>,
        pub pulls: AtomicUsize,
        pub reject: Mutex<Option<Box<dyn Fn(OperationKind, &Value) -> bool + Send + Sync>>>,
        pub failing_collections: Mutex<HashSet<String>>,
        pub rows: Mutex<std::collections::HashMap<String, Vec<Value>>>,
        pub submit_delay: Mutex<Option<Duration>>,
        /// Replace the id of every accepted record, like a server-side default
        pub assign_id: Mutex<Option<String>>,
    }

    impl MockRemote {
        pub fn rejecting<F>(f: F) -> Self
        where
            F: Fn(OperationKind, &Value) -> bool + Send + Sync + 'static,
        {
            let remote = Self::default();
            *remote.reject.lock().unwrap() = Some(Box::new(f));
            remote
        }

        pub fn submitted(&self) -> Vec<(String, OperationKind, Value)> {
            self.calls.lock().unwrap().clone()
        }
    }

    #[async_trait]
    impl RemoteDataApi for MockRemote {
        async fn pull(&self, collection: &str) -> anyhow::Result<Vec<Value>> {
            self.pulls.fetch_add(1, Ordering::SeqCst);
            if self.failing_collections.lock().unwrap().contains(collection) {
                anyhow::bail!("pull of {} refused", collection);
            }
            Ok(self
                .rows
                .lock()
                .unwrap()
                .get(collection)
                .cloned()
                .unwrap_or_default())
        }

        async fn submit(
            &self,
            collection: &str,
            kind: OperationKind,
            payload: &Value,
        ) -> anyhow::Result<Value> {
            let delay = *self.submit_delay.lock().unwrap();
            if let Some(delay) = delay {
                tokio::time::sleep(delay).await;
            }
            self.calls
                .lock()
                .unwrap()
                .push((collection.to_string(), kind, payload.clone()));
            let rejected = self
                .reject
                .lock()
                .unwrap()
                .as_ref()
                .map(|f| f(kind, payload))
                .unwrap_or(false);
            if rejected {
                anyhow::bail!("remote rejected {}", kind);
            }
            let mut record = payload.clone();
            if let Some(id) = self.assign_id.lock().unwrap().clone() {
                record["id"] = Value::String(id);
            }
            Ok(record)
        }
    }

    pub(crate) async fn memory_store() -> Arc<LocalStore> {
        let store = Arc::new(LocalStore::new("sqlite::memory:"));
        store.initialize().await.unwrap();
        store
    }

    fn engine_with(
        store: Arc<LocalStore>,
        remote: Arc<MockRemote>,
        online: bool,
    ) -> (Arc<SyncEngine>, Arc<NetworkMonitor>) {
        let monitor = Arc::new(NetworkMonitor::new(online));
        let engine = Arc::new(SyncEngine::new(
            SyncEngineConfig::new(vec!["clientes".into(), "servicos".into()]),
            store,
            remote,
            monitor.clone(),
        ));
        (engine, monitor)
    }

    async fn enqueue(store: &LocalStore, kind: OperationKind, payload: Value) -> PendingOperation {
        store
            .enqueue_operation(PendingOperation::new("clientes", kind, payload))
            .await
            .unwrap()
    }

    #[tokio::test]
    async fn empty_queue_makes_no_network_calls() {
        let store = memory_store().await;
        let remote = Arc::new(MockRemote::default());
        let (engine, _) = engine_with(store, remote.clone(), true);

        let result = engine.sync_pending_operations().await;
        assert_eq!(result.skipped, Some(SkipReason::EmptyQueue));
        assert_eq!((result.applied, result.failed, result.remaining), (0, 0, 0));
        assert!(remote.submitted().is_empty());
    }

    #[tokio::test]
    async fn offline_drain_submits_nothing_and_marks_nothing_failed() {
        let store = memory_store().await;
        enqueue(&store, OperationKind::Create, json!({"id": "A"})).await;
        let remote = Arc::new(MockRemote::default());
        let (engine, _) = engine_with(store.clone(), remote.clone(), false);

        let result = engine.sync_pending_operations().await;
        assert_eq!(result.skipped, Some(SkipReason::Offline));
        assert_eq!((result.applied, result.failed), (0, 0));
        assert!(remote.submitted().is_empty());
        assert_eq!(store.get_sync_queue().await[0].retry_count, 0);
    }

    #[tokio::test]
    async fn accepted_operations_drain_and_update_the_cache() {
        init_test_logger();
        let store = memory_store().await;
        store
            .put_cached_record("clientes", &json!({"id": "clienteB", "nome": "Bia"}))
            .await
            .unwrap();
        enqueue(&store, OperationKind::Create, json!({"id": "clienteA", "nome": "Ana"})).await;
        enqueue(&store, OperationKind::Update, json!({"id": "clienteA", "nome": "X"})).await;
        enqueue(&store, OperationKind::Delete, json!({"id": "clienteB"})).await;

        let remote = Arc::new(MockRemote::default());
        let (engine, _) = engine_with(store.clone(), remote.clone(), true);
        let result = engine.sync_pending_operations().await;

        assert_eq!(result.applied, 3);
        assert_eq!(result.remaining, 0);
        assert!(result.is_clean());
        assert!(store.get_sync_queue().await.is_empty());

        let a = store.get_cached_record("clientes", "clienteA").await.unwrap().unwrap();
        assert_eq!(a.data["nome"], "X");
        assert!(store.get_cached_record("clientes", "clienteB").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn rejected_update_stays_queued_with_one_retry() {
        let store = memory_store().await;
        enqueue(&store, OperationKind::Create, json!({"id": "clienteA", "nome": "Ana"})).await;
        let update = enqueue(&store, OperationKind::Update, json!({"id": "clienteA", "nome": "X"})).await;
        enqueue(&store, OperationKind::Delete, json!({"id": "clienteB"})).await;

        let remote = Arc::new(MockRemote::rejecting(|kind, _| kind == OperationKind::Update));
        let (engine, _) = engine_with(store.clone(), remote.clone(), true);
        let result = engine.sync_pending_operations().await;

        assert_eq!((result.applied, result.failed, result.remaining), (2, 1, 1));
        let queue = store.get_sync_queue().await;
        assert_eq!(queue.len(), 1);
        assert_eq!(queue[0].id, update.id);
        assert_eq!(queue[0].retry_count, 1);
        assert!(queue[0].last_error.as_deref().unwrap().contains("rejected"));
        assert_eq!(result.failures[0].operation_id, update.id);
    }

    #[tokio::test]
    async fn one_failure_does_not_stop_other_records() {
        let store = memory_store().await;
        for n in 1..=5 {
            enqueue(&store, OperationKind::Create, json!({"id": format!("c{}", n)})).await;
        }
        let remote = Arc::new(MockRemote::rejecting(|_, payload| payload["id"] == "c2"));
        let (engine, _) = engine_with(store.clone(), remote.clone(), true);

        let result = engine.sync_pending_operations().await;
        let attempted: Vec<String> = remote
            .submitted()
            .iter()
            .map(|(_, _, p)| p["id"].as_str().unwrap().to_string())
            .collect();
        assert_eq!(attempted, vec!["c1", "c2", "c3", "c4", "c5"]);
        assert_eq!((result.applied, result.failed), (4, 1));

        let queue = store.get_sync_queue().await;
        assert_eq!(queue.len(), 1);
        assert_eq!(queue[0].record_id, "c2");
    }

    #[tokio::test]
    async fn same_record_operations_reach_the_remote_in_enqueue_order_across_cycles() {
        init_test_logger();
        let store = memory_store().await;
        for n in 0..4 {
            enqueue(&store, OperationKind::Update, json!({"id": "A", "step": n})).await;
        }
        enqueue(&store, OperationKind::Update, json!({"id": "B", "step": 0})).await;

        // Step 1 fails during the first pass only.
        let failed_once = Arc::new(std::sync::atomic::AtomicBool::new(false));
        let flag = failed_once.clone();
        let remote = Arc::new(MockRemote::rejecting(move |_, payload| {
            payload["id"] == "A" && payload["step"] == 1 && !flag.swap(true, Ordering::SeqCst)
        }));
        let (engine, _) = engine_with(store.clone(), remote.clone(), true);

        let first = engine.sync_pending_operations().await;
        assert_eq!((first.applied, first.failed, first.deferred), (2, 1, 2));
        let second = engine.sync_pending_operations().await;
        assert_eq!((second.applied, second.remaining), (3, 0));

        let accepted_a: Vec<i64> = remote
            .submitted()
            .iter()
            .filter(|(_, _, p)| p["id"] == "A")
            .map(|(_, _, p)| p["step"].as_i64().unwrap())
            .collect();
        // 1 appears twice: rejected, then accepted. Nothing after it jumped ahead.
        assert_eq!(accepted_a, vec![0, 1, 1, 2, 3]);
    }

    #[tokio::test]
    async fn initial_sync_isolates_failing_collections() {
        let store = memory_store().await;
        store
            .put_cached_record("servicos", &json!({"id": "s-old"}))
            .await
            .unwrap();
        let remote = Arc::new(MockRemote::default());
        remote
            .rows
            .lock()
            .unwrap()
            .insert("clientes".into(), vec![json!({"id": "A"}), json!({"id": "B"})]);
        remote.failing_collections.lock().unwrap().insert("servicos".into());

        let (engine, _) = engine_with(store.clone(), remote.clone(), true);
        let report = engine.initial_sync().await;

        assert_eq!(report.pulled, vec![("clientes".to_string(), 2)]);
        assert_eq!(report.failures.len(), 1);
        assert_eq!(report.failures[0].collection, "servicos");
        assert!(!report.is_complete());
        assert_eq!(store.get_cached_records("clientes").await.len(), 2);
        assert_eq!(store.get_cached_records("servicos").await[0].record_id, "s-old");
    }

    #[tokio::test]
    async fn concurrent_drain_is_skipped_while_one_is_in_flight() {
        let store = memory_store().await;
        enqueue(&store, OperationKind::Create, json!({"id": "A"})).await;
        let remote = Arc::new(MockRemote::default());
        *remote.submit_delay.lock().unwrap() = Some(Duration::from_millis(200));
        let (engine, _) = engine_with(store.clone(), remote.clone(), true);

        let running = {
            let engine = engine.clone();
            tokio::spawn(async move { engine.sync_now().await })
        };
        tokio::time::sleep(Duration::from_millis(50)).await;

        let skipped = engine.sync_pending_operations().await;
        assert_eq!(skipped.skipped, Some(SkipReason::AlreadyRunning));

        let done = running.await.unwrap();
        assert_eq!(done.applied, 1);
        assert_eq!(remote.submitted().len(), 1);
    }

    #[tokio::test]
    async fn periodic_sync_drains_and_stops_cleanly() {
        let store = memory_store().await;
        enqueue(&store, OperationKind::Create, json!({"id": "A"})).await;
        let remote = Arc::new(MockRemote::default());
        let (engine, _) = engine_with(store.clone(), remote.clone(), true);

        engine.stop_periodic_sync();
        engine.start_periodic_sync(Duration::from_millis(20));
        engine.start_periodic_sync(Duration::from_millis(20));
        assert!(engine.is_periodic_sync_running());

        tokio::time::timeout(Duration::from_secs(2), async {
            while store.pending_count().await > 0 {
                tokio::time::sleep(Duration::from_millis(10)).await;
            }
        })
        .await
        .expect("periodic sync never drained the queue");

        engine.stop_periodic_sync();
        engine.stop_periodic_sync();
        assert!(!engine.is_periodic_sync_running());
        assert_eq!(remote.submitted().len(), 1);
    }

    #[tokio::test]
    async fn connectivity_lost_mid_drain_stops_the_pass_without_failures() {
        /// Accepts the first submission, then the network drops
        struct FlakyLink {
            monitor: Arc<NetworkMonitor>,
            submits: AtomicUsize,
        }
        #[async_trait]
        impl RemoteDataApi for FlakyLink {
            async fn pull(&self, _collection: &str) -> anyhow::Result<Vec<Value>> {
                Ok(Vec::new())
            }
            async fn submit(
                &self,
                _collection: &str,
                _kind: OperationKind,
                payload: &Value,
            ) -> anyhow::Result<Value> {
                if self.submits.fetch_add(1, Ordering::SeqCst) == 0 {
                    self.monitor.set_online(false);
                    Ok(payload.clone())
                } else {
                    anyhow::bail!("network unreachable")
                }
            }
        }

        let store = memory_store().await;
        for id in ["A", "B", "C"] {
            enqueue(&store, OperationKind::Create, json!({ "id": id })).await;
        }
        let monitor = Arc::new(NetworkMonitor::new(true));
        let remote = Arc::new(FlakyLink {
            monitor: monitor.clone(),
            submits: AtomicUsize::new(0),
        });
        let engine = SyncEngine::new(
            SyncEngineConfig::new(vec![]),
            store.clone(),
            remote.clone(),
            monitor,
        );

        let result = engine.sync_pending_operations().await;
        assert_eq!((result.applied, result.failed, result.remaining), (1, 0, 2));
        assert_eq!(remote.submits.load(Ordering::SeqCst), 1);
        assert!(store.get_sync_queue().await.iter().all(|op| op.retry_count == 0));
    }

    #[tokio::test]
    async fn confirmed_operation_that_cannot_be_dequeued_is_not_resubmitted() {
        let store = memory_store().await;
        enqueue(&store, OperationKind::Create, json!({"id": "A"})).await;
        let pool = store.pool().unwrap();
        sqlx::query(
            "CREATE TRIGGER hold_queue BEFORE DELETE ON sync_queue \
             BEGIN SELECT RAISE(ABORT, 'queue is locked'); END",
        )
        .execute(&pool)
        .await
        .unwrap();

        let remote = Arc::new(MockRemote::default());
        let (engine, _) = engine_with(store.clone(), remote.clone(), true);

        let first = engine.sync_pending_operations().await;
        assert_eq!((first.applied, first.remaining), (1, 1));
        let second = engine.sync_pending_operations().await;
        assert_eq!(second.skipped, Some(SkipReason::EmptyQueue));
        assert_eq!(second.remaining, 1);
        assert_eq!(remote.submitted().len(), 1);

        sqlx::query("DROP TRIGGER hold_queue").execute(&pool).await.unwrap();
        engine.sync_pending_operations().await;
        assert_eq!(store.pending_count().await, 0);
        assert_eq!(remote.submitted().len(), 1);
    }

    #[tokio::test]
    async fn undecodable_rows_do_not_block_the_drain() {
        let store = memory_store().await;
        enqueue(&store, OperationKind::Create, json!({"id": "A"})).await;
        sqlx::query(
            "INSERT INTO sync_queue (id, collection, record_id, kind, payload, created_at) \
             VALUES ('bad', 'clientes', 'B', 'upsert', '{}', 0)",
        )
        .execute(&store.pool().unwrap())
        .await
        .unwrap();

        let remote = Arc::new(MockRemote::default());
        let (engine, _) = engine_with(store.clone(), remote.clone(), true);
        let result = engine.sync_pending_operations().await;

        assert_eq!(result.skipped, None);
        assert_eq!((result.applied, result.remaining), (1, 1));
        assert_eq!(remote.submitted().len(), 1);

        let again = engine.sync_pending_operations().await;
        assert_eq!(again.skipped, Some(SkipReason::EmptyQueue));
        assert_eq!(again.remaining, 1);
    }

    #[tokio::test]
    async fn server_assigned_id_replaces_the_optimistic_placeholder() {
        struct RenamingRemote;
        #[async_trait]
        impl RemoteDataApi for RenamingRemote {
            async fn pull(&self, _collection: &str) -> anyhow::Result<Vec<Value>> {
                Ok(Vec::new())
            }
            async fn submit(
                &self,
                _collection: &str,
                _kind: OperationKind,
                payload: &Value,
            ) -> anyhow::Result<Value> {
                let mut record = payload.clone();
                record["id"] = json!("server-1");
                Ok(record)
            }
        }

        let store = memory_store().await;
        store
            .put_cached_record("clientes", &json!({"id": "local-1", "nome": "Ana"}))
            .await
            .unwrap();
        enqueue(&store, OperationKind::Create, json!({"id": "local-1", "nome": "Ana"})).await;

        let monitor = Arc::new(NetworkMonitor::new(true));
        let engine = SyncEngine::new(
            SyncEngineConfig::new(vec![]),
            store.clone(),
            Arc::new(RenamingRemote),
            monitor,
        );
        engine.sync_pending_operations().await;

        let cached = store.get_cached_records("clientes").await;
        assert_eq!(cached.len(), 1);
        assert_eq!(cached[0].record_id, "server-1");
    }

    #[tokio::test]
    async fn confirmed_record_is_cached_even_if_the_placeholder_cannot_be_removed() {
        let store = memory_store().await;
        store
            .put_cached_record("clientes", &json!({"id": "local-1"}))
            .await
            .unwrap();
        enqueue(&store, OperationKind::Create, json!({"id": "local-1"})).await;
        sqlx::query(
            "CREATE TRIGGER keep_records BEFORE DELETE ON cached_records \
             BEGIN SELECT RAISE(ABORT, 'cache is locked'); END",
        )
        .execute(&store.pool().unwrap())
        .await
        .unwrap();

        let remote = Arc::new(MockRemote::default());
        *remote.assign_id.lock().unwrap() = Some("server-1".into());
        let (engine, _) = engine_with(store.clone(), remote, true);
        let result = engine.sync_pending_operations().await;

        assert_eq!(result.applied, 1);
        assert!(store.get_cached_record("clientes", "server-1").await.unwrap().is_some());
    }
}
