//! Offline context listener
//!
//! What the UI turns into badges and toasts: connectivity flips, reconnect
//! syncs, manual sync outcomes and the pending-change count.

use crate::offline::sync::{InitialSyncReport, SyncCycleResult};
use async_trait::async_trait;

#[async_trait]
pub trait OfflineListener: Send + Sync {
    /// Connectivity changed ("went offline" / "back online")
    async fn on_connection_changed(&self, online: bool);

    /// Startup pull finished (possibly with per-collection failures)
    async fn on_initial_sync_finished(&self, report: InitialSyncReport);

    /// The immediate drain triggered by coming back online finished
    async fn on_reconnect_synced(&self, result: SyncCycleResult);

    /// A manual `sync_now` pass finished
    async fn on_manual_sync_finished(&self, result: SyncCycleResult);

    /// A manual `sync_now` could not run
    async fn on_manual_sync_failed(&self, reason: String);

    /// The polled pending-operation count changed
    async fn on_pending_count_changed(&self, count: usize);
}

/// No-op listener
pub struct EmptyOfflineListener;

#[async_trait]
impl OfflineListener for EmptyOfflineListener {
    async fn on_connection_changed(&self, _online: bool) {}
    async fn on_initial_sync_finished(&self, _report: InitialSyncReport) {}
    async fn on_reconnect_synced(&self, _result: SyncCycleResult) {}
    async fn on_manual_sync_finished(&self, _result: SyncCycleResult) {}
    async fn on_manual_sync_failed(&self, _reason: String) {}
    async fn on_pending_count_changed(&self, _count: usize) {}
}
