//! Per-collection listener registry with trailing-edge throttled delivery

use crate::offline::realtime::listener::ChangeListener;
use crate::offline::realtime::models::ChangeEvent;
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tracing::debug;

#[derive(Default)]
struct Registry {
    next_id: u64,
    listeners: HashMap<String, Vec<(u64, Arc<dyn ChangeListener>)>>,
}

/// Buffers events per collection and flushes each buffer once per window
pub(crate) struct ThrottledDispatcher {
    throttle: Duration,
    registry: Mutex<Registry>,
    pending: Arc<Mutex<HashMap<String, Vec<ChangeEvent>>>>,
}

impl ThrottledDispatcher {
    pub(crate) fn new(throttle: Duration) -> Self {
        Self {
            throttle,
            registry: Mutex::new(Registry::default()),
            pending: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    /// Returns the subscription id and whether this is the collection's first listener
    pub(crate) fn add(&self, collection: &str, listener: Arc<dyn ChangeListener>) -> (u64, bool) {
        let mut registry = lock(&self.registry);
        registry.next_id += 1;
        let id = registry.next_id;
        let entry = registry.listeners.entry(collection.to_string()).or_default();
        let first = entry.is_empty();
        entry.push((id, listener));
        (id, first)
    }

    /// Returns true when the collection has no listeners left
    pub(crate) fn remove(&self, collection: &str, id: u64) -> bool {
        let mut registry = lock(&self.registry);
        let Some(entry) = registry.listeners.get_mut(collection) else {
            return false;
        };
        let before = entry.len();
        entry.retain(|(existing, _)| *existing != id);
        let removed = entry.len() < before;
        if entry.is_empty() {
            registry.listeners.remove(collection);
        }
        removed && !registry.listeners.contains_key(collection)
    }

    pub(crate) fn collections(&self) -> Vec<String> {
        lock(&self.registry).listeners.keys().cloned().collect()
    }

    fn listeners_of(&self, collection: &str) -> Vec<Arc<dyn ChangeListener>> {
        lock(&self.registry)
            .listeners
            .get(collection)
            .map(|entries| entries.iter().map(|(_, l)| l.clone()).collect())
            .unwrap_or_default()
    }

    /// Queue an event. The first event of a window schedules the flush.
    pub(crate) fn push(self: &Arc<Self>, event: ChangeEvent) {
        let collection = event.collection.clone();
        let opens_window = {
            let mut pending = lock(&self.pending);
            let buffer = pending.entry(collection.clone()).or_default();
            buffer.push(event);
            buffer.len() == 1
        };
        if !opens_window {
            return;
        }

        let dispatcher = self.clone();
        tokio::spawn(async move {
            tokio::time::sleep(dispatcher.throttle).await;
            dispatcher.flush(&collection).await;
        });
    }

    async fn flush(&self, collection: &str) {
        let batch = lock(&self.pending).remove(collection).unwrap_or_default();
        if batch.is_empty() {
            return;
        }
        let listeners = self.listeners_of(collection);
        debug!(
            "[ChangeFeed] delivering {} change(s) on {} to {} listener(s)",
            batch.len(),
            collection,
            listeners.len()
        );
        for listener in listeners {
            listener.on_changes(collection, batch.clone()).await;
        }
    }
}

fn lock<T>(mutex: &Mutex<T>) -> std::sync::MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}
