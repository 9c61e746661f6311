//! App-shell cache worker: precaches the shell and intercepts fetches

pub mod cache;
pub mod fetcher;
pub mod models;
pub mod policy;
pub mod service;
pub mod types;

pub use cache::CacheStorage;
pub use fetcher::{Fetcher, ReqwestFetcher};
pub use models::WorkerConfig;
pub use service::{CacheWorker, CacheWorkerHandle};
pub use types::{
    CachedResponse, FetchRequest, FetchResult, RequestMode, ResponseSource, WorkerMessage,
    WorkerState, WorkerStatus,
};
