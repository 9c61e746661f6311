pub mod offline;

// Re-exports of the types an application shell needs
pub use offline::{
    context::{EmptyOfflineListener, MutationOutcome, OfflineConfig, OfflineContext, OfflineListener},
    error::{OfflineError, OfflineResult},
    network::{HttpProbe, NetworkMonitor},
    realtime::{ChangeFeed, ChangeFeedConfig, ChangeListener},
    settings::SettingsStore,
    store::{LocalStore, OperationKind, PendingOperation},
    sync::{InitialSyncReport, RemoteDataApi, RestDataApi, SyncCycleResult, SyncEngine},
    worker::{CacheWorker, CacheWorkerHandle, WorkerConfig},
};
