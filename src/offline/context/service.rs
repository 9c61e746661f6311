//! Offline context
//!
//! The one object the rest of the application talks to. It owns the lifecycle
//! of the offline core: opens the store, runs the startup pull, keeps the
//! periodic drain going, reacts to connectivity changes and polls the pending
//! count. Everything it starts is stopped by [`OfflineContext::unmount`] (or on
//! drop).

use crate::offline::context::listener::{EmptyOfflineListener, OfflineListener};
use crate::offline::context::models::{MutationOutcome, OfflineConfig};
use crate::offline::error::{OfflineError, OfflineResult};
use crate::offline::network::{NetworkMonitor, OnlineStatusSubscription};
use crate::offline::store::models::{record_id_of, CachedRecord, OperationKind, PendingOperation};
use crate::offline::store::LocalStore;
use crate::offline::sync::{
    InitialSyncReport, RemoteDataApi, RestDataApi, SkipReason, SyncCycleResult, SyncEngine,
    SyncEngineConfig,
};
use serde_json::Value;
use std::sync::{Arc, Mutex};
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio::time::{interval, MissedTickBehavior};
use tracing::{debug, error, info, warn};
use uuid::Uuid;

/// Keeps the exposed pending count in step with the queue
struct PendingCounter {
    store: Option<Arc<LocalStore>>,
    tx: watch::Sender<usize>,
    listener: Arc<dyn OfflineListener>,
}

impl PendingCounter {
    async fn refresh(&self) -> usize {
        let count = match &self.store {
            Some(store) => store.pending_count().await,
            None => 0,
        };
        let changed = self.tx.send_if_modified(|current| {
            if *current == count {
                false
            } else {
                *current = count;
                true
            }
        });
        if changed {
            debug!("[OfflineContext] pending changes: {}", count);
            self.listener.on_pending_count_changed(count).await;
        }
        count
    }
}

/// Last startup pull, shared with the connectivity loop
type StartupPull = Arc<Mutex<Option<InitialSyncReport>>>;

/// Whether the collections still need their first pull: none has run yet, or
/// every collection failed.
fn needs_startup_pull(pull: &StartupPull) -> bool {
    match &*pull.lock().unwrap_or_else(|poisoned| poisoned.into_inner()) {
        None => true,
        Some(report) => report.pulled.is_empty() && !report.failures.is_empty(),
    }
}

/// Offline context / façade
pub struct OfflineContext {
    config: OfflineConfig,
    /// `None` when local storage is unavailable (online-only mode)
    store: Option<Arc<LocalStore>>,
    engine: Option<Arc<SyncEngine>>,
    api: Arc<dyn RemoteDataApi>,
    monitor: Arc<NetworkMonitor>,
    listener: Arc<dyn OfflineListener>,
    pending: Arc<PendingCounter>,
    initial_sync: StartupPull,
    subscription: Option<OnlineStatusSubscription>,
    shutdown: watch::Sender<bool>,
    tasks: Vec<JoinHandle<()>>,
}

impl OfflineContext {
    /// Mount against the hosted backend's REST API
    pub async fn mount(
        config: OfflineConfig,
        monitor: Arc<NetworkMonitor>,
        listener: Arc<dyn OfflineListener>,
    ) -> OfflineResult<Self> {
        let api = RestDataApi::with_api_key(
            config.api_base_url.clone(),
            &config.api_key,
            config.http_timeout,
        )?;
        let store = Arc::new(LocalStore::new(config.db_url.clone()));
        Ok(Self::mount_with(config, store, Arc::new(api), monitor, listener).await)
    }

    /// Mount with the default (silent) listener
    pub async fn mount_silent(
        config: OfflineConfig,
        monitor: Arc<NetworkMonitor>,
    ) -> OfflineResult<Self> {
        Self::mount(config, monitor, Arc::new(EmptyOfflineListener)).await
    }

    /// Mount with explicit collaborators.
    ///
    /// Never fails: an unavailable store degrades the context to online-only
    /// mode instead.
    pub async fn mount_with(
        config: OfflineConfig,
        store: Arc<LocalStore>,
        api: Arc<dyn RemoteDataApi>,
        monitor: Arc<NetworkMonitor>,
        listener: Arc<dyn OfflineListener>,
    ) -> Self {
        info!("[OfflineContext] 🚀 mounting offline context");

        let store = match store.initialize().await {
            Ok(()) => Some(store),
            Err(e) => {
                warn!(
                    "[OfflineContext] ⚠️ {}; running in online-only mode (no offline queueing)",
                    e
                );
                None
            }
        };

        let engine = store.as_ref().map(|store| {
            let mut engine_config = SyncEngineConfig::new(config.collections.clone());
            engine_config.refresh_after_drain = config.refresh_after_drain;
            Arc::new(SyncEngine::new(
                engine_config,
                store.clone(),
                api.clone(),
                monitor.clone(),
            ))
        });

        let (pending_tx, _) = watch::channel(0usize);
        let pending = Arc::new(PendingCounter {
            store: store.clone(),
            tx: pending_tx,
            listener: listener.clone(),
        });
        let (shutdown, _) = watch::channel(false);

        let mut ctx = Self {
            config,
            store,
            engine,
            api,
            monitor,
            listener,
            pending,
            initial_sync: Arc::new(Mutex::new(None)),
            subscription: None,
            shutdown,
            tasks: Vec::new(),
        };

        if let Some(engine) = ctx.engine.clone() {
            if ctx.monitor.get_online_status() {
                let report = engine.initial_sync().await;
                ctx.listener.on_initial_sync_finished(report.clone()).await;
                *ctx.initial_sync.lock().unwrap_or_else(|p| p.into_inner()) = Some(report);
            } else {
                info!("[OfflineContext] starting offline, initial sync deferred to the first reconnect");
            }
            engine.start_periodic_sync(ctx.config.sync_interval);
        }

        ctx.pending.refresh().await;
        ctx.subscribe_connectivity();
        ctx.spawn_pending_poller();

        info!(
            "[OfflineContext] ✅ mounted (online: {}, degraded: {})",
            ctx.is_online(),
            ctx.is_degraded()
        );
        ctx
    }

    fn subscribe_connectivity(&mut self) {
        let (tx, mut rx) = mpsc::unbounded_channel::<bool>();
        self.subscription = Some(self.monitor.add_online_status_listener(move |online| {
            let _ = tx.send(online);
        }));

        let engine = self.engine.clone();
        let listener = self.listener.clone();
        let pending = self.pending.clone();
        let startup_pull = self.initial_sync.clone();
        let mut shutdown = self.shutdown.subscribe();

        self.tasks.push(tokio::spawn(async move {
            loop {
                let online = tokio::select! {
                    Some(online) = rx.recv() => online,
                    _ = shutdown.changed() => break,
                    else => break,
                };

                listener.on_connection_changed(online).await;
                if !online {
                    info!("[OfflineContext] 📴 offline, changes will be queued");
                    continue;
                }

                info!("[OfflineContext] 🌐 back online, syncing pending changes");
                if let Some(engine) = &engine {
                    let result = engine.sync_pending_operations().await;
                    pending.refresh().await;
                    listener.on_reconnect_synced(result).await;

                    // Mounted offline (or every pull failed): pull now.
                    if needs_startup_pull(&startup_pull) {
                        let report = engine.initial_sync().await;
                        *startup_pull.lock().unwrap_or_else(|p| p.into_inner()) =
                            Some(report.clone());
                        listener.on_initial_sync_finished(report).await;
                    }
                }
            }
            debug!("[OfflineContext] connectivity loop exited");
        }));
    }

    fn spawn_pending_poller(&mut self) {
        let pending = self.pending.clone();
        let every = self.config.pending_poll_interval;
        let mut shutdown = self.shutdown.subscribe();

        self.tasks.push(tokio::spawn(async move {
            let mut ticker = interval(every);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            loop {
                tokio::select! {
                    _ = ticker.tick() => {}
                    _ = shutdown.changed() => break,
                }
                pending.refresh().await;
            }
            debug!("[OfflineContext] pending poller exited");
        }));
    }

    // ========== exposed state ==========

    pub fn is_online(&self) -> bool {
        self.monitor.get_online_status()
    }

    /// True when local storage could not be opened
    pub fn is_degraded(&self) -> bool {
        self.store.is_none()
    }

    /// Last polled pending-operation count
    pub fn pending_count(&self) -> usize {
        *self.pending.tx.borrow()
    }

    /// Live pending-count updates
    pub fn watch_pending_count(&self) -> watch::Receiver<usize> {
        self.pending.tx.subscribe()
    }

    /// Report of the startup pull, once one has run
    pub fn initial_sync_report(&self) -> Option<InitialSyncReport> {
        self.initial_sync
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .clone()
    }

    pub fn store(&self) -> Option<&Arc<LocalStore>> {
        self.store.as_ref()
    }

    pub fn engine(&self) -> Option<&Arc<SyncEngine>> {
        self.engine.as_ref()
    }

    pub fn monitor(&self) -> &Arc<NetworkMonitor> {
        &self.monitor
    }

    // ========== actions ==========

    /// Run one full drain now. Fails with [`OfflineError::Offline`] without
    /// touching anything when the monitor reports offline.
    pub async fn sync_now(&self) -> OfflineResult<SyncCycleResult> {
        if !self.is_online() {
            warn!("[OfflineContext] manual sync requested while offline");
            self.listener
                .on_manual_sync_failed("network is offline".to_string())
                .await;
            return Err(OfflineError::Offline);
        }

        let result = match &self.engine {
            Some(engine) => engine.sync_now().await,
            None => SyncCycleResult {
                skipped: Some(SkipReason::EmptyQueue),
                ..Default::default()
            },
        };
        self.pending.refresh().await;
        info!(
            "[OfflineContext] manual sync - applied: {}, failed: {}, remaining: {}",
            result.applied, result.failed, result.remaining
        );
        self.listener.on_manual_sync_finished(result.clone()).await;
        Ok(result)
    }

    /// Record a write. With local storage it is queued and applied to the
    /// cache optimistically; in online-only mode it goes straight to the
    /// remote (and fails with [`OfflineError::Offline`] when offline).
    pub async fn mutate(
        &self,
        collection: &str,
        kind: OperationKind,
        mut payload: Value,
    ) -> OfflineResult<MutationOutcome> {
        if !payload.is_object() {
            return Err(OfflineError::InvalidOperation(format!(
                "{} payload for {} must be an object",
                kind, collection
            )));
        }
        match (kind, record_id_of(&payload)) {
            (OperationKind::Create, None) => {
                payload["id"] = Value::String(Uuid::new_v4().to_string());
            }
            (OperationKind::Update | OperationKind::Delete, None) => {
                return Err(OfflineError::InvalidOperation(format!(
                    "{} on {} needs an id",
                    kind, collection
                )));
            }
            _ => {}
        }

        let Some(store) = &self.store else {
            if !self.is_online() {
                return Err(OfflineError::Offline);
            }
            let record = self.api.submit(collection, kind, &payload).await?;
            return Ok(MutationOutcome::Submitted(record));
        };

        // Cache first, then queue: once the operation is visible to a drain,
        // the drain's confirmed snapshot must be the last write.
        let op = PendingOperation::new(collection, kind, payload);
        let previous = store
            .get_cached_record(&op.collection, &op.record_id)
            .await
            .ok()
            .flatten();
        self.apply_optimistic(store, &op).await;

        let record_id = op.record_id.clone();
        let op = match store.enqueue_operation(op).await {
            Ok(op) => op,
            Err(e) => {
                warn!(
                    "[OfflineContext] enqueue of {} {}/{} failed, restoring the cache: {}",
                    kind, collection, record_id, e
                );
                self.roll_back_optimistic(store, collection, &record_id, previous)
                    .await;
                return Err(e);
            }
        };
        self.pending.refresh().await;
        Ok(MutationOutcome::Queued(op))
    }

    /// Undo an optimistic write whose operation never reached the queue
    async fn roll_back_optimistic(
        &self,
        store: &LocalStore,
        collection: &str,
        record_id: &str,
        previous: Option<CachedRecord>,
    ) {
        let restored = match previous {
            Some(record) => store.put_cached_record(collection, &record.data).await,
            None => store.remove_cached_record(collection, record_id).await,
        };
        if let Err(e) = restored {
            error!(
                "[OfflineContext] could not restore {}/{} after a failed enqueue: {}",
                collection, record_id, e
            );
        }
    }

    async fn apply_optimistic(&self, store: &LocalStore, op: &PendingOperation) {
        let outcome = match op.kind {
            OperationKind::Create => store.put_cached_record(&op.collection, &op.payload).await,
            OperationKind::Update => {
                let merged = match store.get_cached_record(&op.collection, &op.record_id).await {
                    Ok(Some(existing)) => merge_fields(existing.data, &op.payload),
                    _ => op.payload.clone(),
                };
                store.put_cached_record(&op.collection, &merged).await
            }
            OperationKind::Delete => {
                store
                    .remove_cached_record(&op.collection, &op.record_id)
                    .await
            }
        };
        if let Err(e) = outcome {
            error!(
                "[OfflineContext] optimistic apply of {} {}/{} failed: {}",
                op.kind, op.collection, op.record_id, e
            );
        }
    }

    /// Cached snapshot of a collection, for instant paint or offline reads
    pub async fn cached_records(&self, collection: &str) -> Vec<CachedRecord> {
        match &self.store {
            Some(store) => store.get_cached_records(collection).await,
            None => Vec::new(),
        }
    }

    /// Stop timers, unsubscribe listeners and wait for background tasks
    pub async fn unmount(mut self) {
        info!("[OfflineContext] unmounting");
        self.stop_all();
        for task in std::mem::take(&mut self.tasks) {
            if let Err(e) = task.await {
                warn!("[OfflineContext] background task ended abnormally: {}", e);
            }
        }
        info!("[OfflineContext] ✅ unmounted");
    }

    fn stop_all(&mut self) {
        if let Some(engine) = &self.engine {
            engine.stop_periodic_sync();
        }
        if let Some(subscription) = self.subscription.take() {
            subscription.unsubscribe();
        }
        let _ = self.shutdown.send(true);
    }
}

impl Drop for OfflineContext {
    fn drop(&mut self) {
        self.stop_all();
    }
}

/// Shallow merge of `patch`'s top-level fields into `base`
fn merge_fields(mut base: Value, patch: &Value) -> Value {
    match (base.as_object_mut(), patch.as_object()) {
        (Some(base_fields), Some(patch_fields)) => {
            for (key, value) in patch_fields {
                base_fields.insert(key.clone(), value.clone());
            }
            base
        }
        _ => patch.clone(),
    }
}
