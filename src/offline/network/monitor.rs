//! Network status monitor
//!
//! Single source of truth for "is the network reachable" inside one running
//! app. The value only reflects the last observed connectivity signal; a
//! backend that is down while the network is up shows up as sync failures,
//! not here.

use crate::offline::network::probe::ConnectivityProbe;
use std::collections::HashMap;
use std::sync::{Arc, Mutex, Weak};
use std::time::Duration;
use tokio::sync::{oneshot, watch};
use tokio::task::JoinHandle;
use tokio::time::{interval, MissedTickBehavior};
use tracing::{debug, info, warn};

/// Callback invoked with the new status on every transition
pub type OnlineStatusCallback = Arc<dyn Fn(bool) + Send + Sync>;

#[derive(Default)]
struct ListenerRegistry {
    next_id: u64,
    listeners: HashMap<u64, OnlineStatusCallback>,
}

struct ProbeTask {
    stop: oneshot::Sender<()>,
    handle: JoinHandle<()>,
}

/// Connectivity state plus its observer registry
pub struct NetworkMonitor {
    status: watch::Sender<bool>,
    registry: Arc<Mutex<ListenerRegistry>>,
    probe: Mutex<Option<ProbeTask>>,
}

impl NetworkMonitor {
    /// Create a monitor seeded with the runtime's current signal
    pub fn new(initially_online: bool) -> Self {
        let (status, _) = watch::channel(initially_online);
        Self {
            status,
            registry: Arc::new(Mutex::new(ListenerRegistry::default())),
            probe: Mutex::new(None),
        }
    }

    /// Create a monitor seeded by one probe round
    pub async fn seeded_by(probe: &dyn ConnectivityProbe) -> Self {
        let online = probe.is_reachable().await;
        info!("[NetworkMonitor] initial status: {}", status_label(online));
        Self::new(online)
    }

    /// Current status (synchronous)
    pub fn get_online_status(&self) -> bool {
        *self.status.borrow()
    }

    /// Feed a new connectivity signal. Listeners fire only on an actual
    /// transition.
    pub fn set_online(&self, online: bool) {
        let changed = self.status.send_if_modified(|current| {
            if *current == online {
                false
            } else {
                *current = online;
                true
            }
        });
        if !changed {
            return;
        }

        if online {
            info!("[NetworkMonitor] 🌐 network ONLINE");
        } else {
            warn!("[NetworkMonitor] 📴 network OFFLINE");
        }

        // Invoke outside the lock so callbacks may (un)subscribe.
        let callbacks: Vec<OnlineStatusCallback> = match self.registry.lock() {
            Ok(registry) => registry.listeners.values().cloned().collect(),
            Err(poisoned) => poisoned.into_inner().listeners.values().cloned().collect(),
        };
        for callback in callbacks {
            callback(online);
        }
    }

    /// Register a transition callback. Invocation order across listeners is
    /// unspecified. The listener stays registered until the returned
    /// subscription is unsubscribed or dropped.
    pub fn add_online_status_listener<F>(&self, callback: F) -> OnlineStatusSubscription
    where
        F: Fn(bool) + Send + Sync + 'static,
    {
        let mut registry = lock(&self.registry);
        let id = registry.next_id;
        registry.next_id += 1;
        registry.listeners.insert(id, Arc::new(callback));
        debug!(
            "[NetworkMonitor] listener {} registered ({} total)",
            id,
            registry.listeners.len()
        );
        OnlineStatusSubscription {
            id,
            registry: Arc::downgrade(&self.registry),
        }
    }

    pub fn listener_count(&self) -> usize {
        lock(&self.registry).listeners.len()
    }

    /// Watch channel mirroring the status
    pub fn watch(&self) -> watch::Receiver<bool> {
        self.status.subscribe()
    }

    /// Poll `probe` every `every` and feed the result into [`set_online`].
    /// Starting again replaces the running probe loop.
    ///
    /// [`set_online`]: NetworkMonitor::set_online
    pub fn start_probe(self: &Arc<Self>, probe: Arc<dyn ConnectivityProbe>, every: Duration) {
        self.stop_probe();

        let (stop_tx, mut stop_rx) = oneshot::channel();
        let monitor = Arc::downgrade(self);
        let handle = tokio::spawn(async move {
            let mut ticker = interval(every);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            loop {
                tokio::select! {
                    _ = ticker.tick() => {}
                    _ = &mut stop_rx => break,
                }
                let online = probe.is_reachable().await;
                match monitor.upgrade() {
                    Some(monitor) => monitor.set_online(online),
                    None => break,
                }
            }
            debug!("[NetworkMonitor] probe loop stopped");
        });

        *lock(&self.probe) = Some(ProbeTask {
            stop: stop_tx,
            handle,
        });
        info!("[NetworkMonitor] connectivity probe started, every {:?}", every);
    }

    pub fn stop_probe(&self) {
        if let Some(task) = lock(&self.probe).take() {
            let _ = task.stop.send(());
            drop(task.handle);
        }
    }
}

impl Drop for NetworkMonitor {
    fn drop(&mut self) {
        self.stop_probe();
    }
}

/// Handle returned by [`NetworkMonitor::add_online_status_listener`]
#[must_use = "dropping the subscription unregisters the listener"]
pub struct OnlineStatusSubscription {
    id: u64,
    registry: Weak<Mutex<ListenerRegistry>>,
}

impl OnlineStatusSubscription {
    pub fn id(&self) -> u64 {
        self.id
    }

    /// Remove the listener now
    pub fn unsubscribe(self) {
        // Drop does the work.
    }
}

impl Drop for OnlineStatusSubscription {
    fn drop(&mut self) {
        if let Some(registry) = self.registry.upgrade() {
            if lock(&registry).listeners.remove(&self.id).is_some() {
                debug!("[NetworkMonitor] listener {} removed", self.id);
            }
        }
    }
}

fn lock<T>(mutex: &Mutex<T>) -> std::sync::MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

fn status_label(online: bool) -> &'static str {
    if online {
        "online"
    } else {
        "offline"
    }
}
