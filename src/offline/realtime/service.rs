//! Realtime change feed
//!
//! Keeps one WebSocket to the backend's realtime endpoint, joins a channel per
//! subscribed collection and hands `postgres_changes` pushes to the throttled
//! dispatcher. Views use it to invalidate what they show; the sync engine does
//! not depend on it.

use crate::offline::realtime::dispatcher::ThrottledDispatcher;
use crate::offline::realtime::listener::ChangeListener;
use crate::offline::realtime::models::{ChangeFeedConfig, PhoenixMessage};
use anyhow::{Context, Result};
use futures_util::stream::SplitSink;
use futures_util::{SinkExt, StreamExt};
use std::collections::HashSet;
use std::sync::{Arc, Mutex, Weak};
use tokio::net::TcpStream;
use tokio::sync::{watch, Notify};
use tokio::task::JoinHandle;
use tokio::time::{interval, sleep, MissedTickBehavior};
use tokio_tungstenite::{
    connect_async, tungstenite::Message as WsMessage, MaybeTlsStream, WebSocketStream,
};
use tracing::{debug, info, warn};

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;
type WsWriter = SplitSink<WsStream, WsMessage>;

struct FeedShared {
    config: ChangeFeedConfig,
    dispatcher: Arc<ThrottledDispatcher>,
    /// Subscribed collection set changed; the session re-syncs its joins
    topics_changed: Notify,
}

enum SessionEnd {
    Dropped,
    Shutdown,
}

/// Realtime change feed
pub struct ChangeFeed {
    shared: Arc<FeedShared>,
    shutdown: watch::Sender<bool>,
    task: Mutex<Option<JoinHandle<()>>>,
}

impl ChangeFeed {
    /// Start the connection loop. Channels are joined as collections get
    /// their first subscriber.
    pub fn start(config: ChangeFeedConfig) -> Self {
        let shared = Arc::new(FeedShared {
            dispatcher: Arc::new(ThrottledDispatcher::new(config.throttle)),
            config,
            topics_changed: Notify::new(),
        });
        let (shutdown, shutdown_rx) = watch::channel(false);
        let task = tokio::spawn(run(shared.clone(), shutdown_rx));
        Self {
            shared,
            shutdown,
            task: Mutex::new(Some(task)),
        }
    }

    /// Register `listener` for changes on `collection`. Batches arrive at most
    /// once per throttle window.
    pub fn subscribe_changes(
        &self,
        collection: &str,
        listener: Arc<dyn ChangeListener>,
    ) -> ChangeSubscription {
        let (id, first) = self.shared.dispatcher.add(collection, listener);
        if first {
            info!("[ChangeFeed] 📡 subscribing to {}", collection);
            self.shared.topics_changed.notify_one();
        }
        ChangeSubscription {
            id,
            collection: collection.to_string(),
            shared: Arc::downgrade(&self.shared),
        }
    }

    pub fn subscribed_collections(&self) -> Vec<String> {
        let mut collections = self.shared.dispatcher.collections();
        collections.sort();
        collections
    }

    /// Close the socket and wait for the connection loop to end
    pub async fn shutdown(&self) {
        let _ = self.shutdown.send(true);
        let task = lock(&self.task).take();
        if let Some(task) = task {
            if let Err(e) = task.await {
                warn!("[ChangeFeed] connection task ended abnormally: {}", e);
            }
        }
        info!("[ChangeFeed] ⏹️ stopped");
    }
}

impl Drop for ChangeFeed {
    fn drop(&mut self) {
        let _ = self.shutdown.send(true);
    }
}

/// Handle returned by [`ChangeFeed::subscribe_changes`]
#[must_use = "dropping the subscription unregisters the listener"]
pub struct ChangeSubscription {
    id: u64,
    collection: String,
    shared: Weak<FeedShared>,
}

impl ChangeSubscription {
    pub fn collection(&self) -> &str {
        &self.collection
    }

    pub fn unsubscribe(self) {}
}

impl Drop for ChangeSubscription {
    fn drop(&mut self) {
        if let Some(shared) = self.shared.upgrade() {
            if shared.dispatcher.remove(&self.collection, self.id) {
                debug!("[ChangeFeed] last listener of {} gone", self.collection);
                shared.topics_changed.notify_one();
            }
        }
    }
}

async fn run(shared: Arc<FeedShared>, mut shutdown: watch::Receiver<bool>) {
    loop {
        if *shutdown.borrow() {
            break;
        }

        let connected = tokio::select! {
            result = connect_async(shared.config.ws_url.as_str()) => result,
            _ = shutdown.changed() => break,
        };
        match connected {
            Ok((ws, response)) => {
                info!("[ChangeFeed] ✅ connected, status: {}", response.status());
                match session(&shared, ws, &mut shutdown).await {
                    SessionEnd::Shutdown => break,
                    SessionEnd::Dropped => warn!("[ChangeFeed] connection lost"),
                }
            }
            Err(e) => warn!("[ChangeFeed] ❌ connect failed: {}", e),
        }

        debug!(
            "[ChangeFeed] reconnecting in {:?}",
            shared.config.reconnect_delay
        );
        tokio::select! {
            _ = sleep(shared.config.reconnect_delay) => {}
            _ = shutdown.changed() => break,
        }
    }
    debug!("[ChangeFeed] connection loop exited");
}

async fn session(
    shared: &FeedShared,
    ws: WsStream,
    shutdown: &mut watch::Receiver<bool>,
) -> SessionEnd {
    let (mut write, mut read) = ws.split();
    let mut reference = 0u64;
    // A fresh socket has no channels joined.
    let mut joined: HashSet<String> = HashSet::new();

    if let Err(e) = sync_topics(shared, &mut write, &mut joined, &mut reference).await {
        warn!("[ChangeFeed] joining channels failed: {:#}", e);
        return SessionEnd::Dropped;
    }

    let mut heartbeat = interval(shared.config.heartbeat);
    heartbeat.set_missed_tick_behavior(MissedTickBehavior::Delay);
    heartbeat.tick().await;

    loop {
        tokio::select! {
            _ = heartbeat.tick() => {
                reference += 1;
                if let Err(e) = send(&mut write, &PhoenixMessage::heartbeat(reference)).await {
                    warn!("[ChangeFeed] 💓 heartbeat failed: {:#}", e);
                    return SessionEnd::Dropped;
                }
            }
            _ = shared.topics_changed.notified() => {
                if let Err(e) = sync_topics(shared, &mut write, &mut joined, &mut reference).await {
                    warn!("[ChangeFeed] updating channels failed: {:#}", e);
                    return SessionEnd::Dropped;
                }
            }
            frame = read.next() => match frame {
                Some(Ok(WsMessage::Text(text))) => handle_text(shared, &text),
                Some(Ok(WsMessage::Close(frame))) => {
                    warn!("[ChangeFeed] 👋 closed by server: {:?}", frame);
                    return SessionEnd::Dropped;
                }
                Some(Ok(_)) => {}
                Some(Err(e)) => {
                    warn!("[ChangeFeed] WebSocket error: {}", e);
                    return SessionEnd::Dropped;
                }
                None => return SessionEnd::Dropped,
            },
            _ = shutdown.changed() => {
                let _ = write.send(WsMessage::Close(None)).await;
                return SessionEnd::Shutdown;
            }
        }
    }
}

/// Join newly subscribed collections and leave abandoned ones
async fn sync_topics(
    shared: &FeedShared,
    write: &mut WsWriter,
    joined: &mut HashSet<String>,
    reference: &mut u64,
) -> Result<()> {
    let wanted: HashSet<String> = shared.dispatcher.collections().into_iter().collect();

    for collection in wanted.difference(joined) {
        *reference += 1;
        send(write, &PhoenixMessage::join(&shared.config, collection, *reference)).await?;
        debug!("[ChangeFeed] joined {}", shared.config.topic(collection));
    }
    for collection in joined.difference(&wanted) {
        *reference += 1;
        send(write, &PhoenixMessage::leave(&shared.config, collection, *reference)).await?;
        debug!("[ChangeFeed] left {}", shared.config.topic(collection));
    }
    *joined = wanted;
    Ok(())
}

async fn send(write: &mut WsWriter, message: &PhoenixMessage) -> Result<()> {
    let text = serde_json::to_string(message).context("failed to encode frame")?;
    write
        .send(WsMessage::Text(text))
        .await
        .context("failed to send frame")
}

fn handle_text(shared: &FeedShared, text: &str) {
    let message: PhoenixMessage = match serde_json::from_str(text) {
        Ok(message) => message,
        Err(e) => {
            debug!("[ChangeFeed] ignoring unparsable frame ({}): {}", e, text);
            return;
        }
    };
    if message.event == "phx_reply" && message.payload["status"] == "error" {
        warn!(
            "[ChangeFeed] channel {} refused: {}",
            message.topic, message.payload["response"]
        );
        return;
    }
    if let Some(change) = message.into_change() {
        shared.dispatcher.push(change);
    }
}

fn lock<T>(mutex: &Mutex<T>) -> std::sync::MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}
