//! Sync engine models

use crate::offline::error::{PullFailure, SyncSubmissionFailure};
use serde::Serialize;
use std::time::Duration;

/// Why a drain returned without submitting anything
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub enum SkipReason {
    EmptyQueue,
    Offline,
    /// Another drain holds the in-flight guard
    AlreadyRunning,
}

/// Outcome of one drain
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SyncCycleResult {
    /// Confirmed and dequeued
    pub applied: usize,
    /// Submitted and rejected (still queued)
    pub failed: usize,
    /// Not submitted because an earlier operation on the same record failed
    pub deferred: usize,
    /// Queue length after the pass
    pub remaining: usize,
    pub failures: Vec<SyncSubmissionFailure>,
    pub skipped: Option<SkipReason>,
}

impl SyncCycleResult {
    pub(crate) fn skipped(reason: SkipReason, remaining: usize) -> Self {
        Self {
            remaining,
            skipped: Some(reason),
            ..Default::default()
        }
    }

    /// Whether a pass actually ran and every submitted operation succeeded
    pub fn is_clean(&self) -> bool {
        self.skipped.is_none() && self.failed == 0 && self.deferred == 0
    }
}

/// Outcome of an initial (bulk) pull
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct InitialSyncReport {
    /// (collection, records written)
    pub pulled: Vec<(String, usize)>,
    pub failures: Vec<PullFailure>,
}

impl InitialSyncReport {
    pub fn is_complete(&self) -> bool {
        self.failures.is_empty()
    }
}

/// Sync engine configuration
#[derive(Debug, Clone)]
pub struct SyncEngineConfig {
    /// Collections pulled by the initial sync
    pub collections: Vec<String>,
    /// Re-pull every collection after a periodic cycle that empties the queue
    pub refresh_after_drain: bool,
}

impl SyncEngineConfig {
    pub fn new(collections: Vec<String>) -> Self {
        Self {
            collections,
            refresh_after_drain: false,
        }
    }
}

/// Default period of the background drain
pub const DEFAULT_SYNC_INTERVAL: Duration = Duration::from_secs(30);
