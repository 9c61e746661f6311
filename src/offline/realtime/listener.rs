use crate::offline::realtime::models::ChangeEvent;
use async_trait::async_trait;

/// Receives throttled batches of changes for one collection
#[async_trait]
pub trait ChangeListener: Send + Sync {
    async fn on_changes(&self, collection: &str, events: Vec<ChangeEvent>);
}

/// No-op listener
pub struct EmptyChangeListener;

#[async_trait]
impl ChangeListener for EmptyChangeListener {
    async fn on_changes(&self, _collection: &str, _events: Vec<ChangeEvent>) {}
}
