//! Realtime change feed for view invalidation

mod dispatcher;
pub mod listener;
pub mod models;
pub mod service;

pub use listener::{ChangeListener, EmptyChangeListener};
pub use models::{ChangeEvent, ChangeFeedConfig, ChangeKind, PhoenixMessage};
pub use service::{ChangeFeed, ChangeSubscription};
