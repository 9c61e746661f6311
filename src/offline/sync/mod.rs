//! Sync engine: pulls remote snapshots and drains the pending-operation queue

pub mod api;
pub mod models;
pub mod service;

pub use api::{RemoteDataApi, RestDataApi};
pub use models::{
    InitialSyncReport, SkipReason, SyncCycleResult, SyncEngineConfig, DEFAULT_SYNC_INTERVAL,
};
pub use service::SyncEngine;
