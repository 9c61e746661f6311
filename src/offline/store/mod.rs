//! Durable local store: record cache + pending-operation queue

pub mod local_store;
pub mod models;
pub mod queue_dao;
pub mod record_dao;

pub use local_store::LocalStore;
pub use models::{record_id_of, CachedRecord, OperationKind, PendingOperation};
pub use queue_dao::SyncQueueDao;
pub use record_dao::RecordCacheDao;
