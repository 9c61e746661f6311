//! Offline context: the façade the application mounts once

pub mod listener;
pub mod models;
pub mod service;

pub use listener::{EmptyOfflineListener, OfflineListener};
pub use models::{MutationOutcome, OfflineConfig, DEFAULT_COLLECTIONS};
pub use service::OfflineContext;
