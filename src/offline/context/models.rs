//! Offline context configuration and results

use crate::offline::store::PendingOperation;
use crate::offline::sync::DEFAULT_SYNC_INTERVAL;
use serde_json::Value;
use std::time::Duration;

/// Collections the salon app mirrors locally
pub const DEFAULT_COLLECTIONS: &[&str] = &[
    "clientes",
    "agendamentos",
    "servicos",
    "profissionais",
    "produtos",
    "vendas",
    "caixa_movimentacoes",
];

/// Offline context configuration
#[derive(Clone, Debug)]
pub struct OfflineConfig {
    /// Local SQLite database URL, e.g. `sqlite://salon_offline.db?mode=rwc`
    pub db_url: String,
    /// Backend base URL (REST layer lives under `/rest/v1`)
    pub api_base_url: String,
    /// Project API key sent as `apikey` / bearer token
    pub api_key: String,
    /// Collections pulled on startup
    pub collections: Vec<String>,
    /// Background drain period
    pub sync_interval: Duration,
    /// Pending-count poll period
    pub pending_poll_interval: Duration,
    /// Re-pull collections after a periodic cycle that empties the queue
    pub refresh_after_drain: bool,
    /// Per-request HTTP timeout
    pub http_timeout: Duration,
}

impl OfflineConfig {
    pub fn new(api_base_url: String, api_key: String) -> Self {
        Self {
            db_url: "sqlite://salon_offline.db?mode=rwc".to_string(),
            api_base_url,
            api_key,
            collections: DEFAULT_COLLECTIONS.iter().map(|c| c.to_string()).collect(),
            sync_interval: DEFAULT_SYNC_INTERVAL,
            pending_poll_interval: Duration::from_secs(5),
            refresh_after_drain: false,
            http_timeout: Duration::from_secs(30),
        }
    }
}

/// What `mutate` did with a write
#[derive(Debug, Clone, PartialEq)]
pub enum MutationOutcome {
    /// Queued locally (and applied optimistically to the cache)
    Queued(PendingOperation),
    /// Local storage is unavailable; submitted straight to the remote
    Submitted(Value),
}
