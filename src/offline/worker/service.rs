//! App-shell cache worker
//!
//! Runs as an actor: one tokio task owns the lifecycle state and the cache
//! partitions, and [`CacheWorkerHandle`] talks to it through an inbox with a
//! reply channel per request. Nothing else touches the partitions.
//!
//! Lifecycle: parsed -> installing -> installed (waiting) -> activating ->
//! activated. A failed install leaves the worker redundant; installing again
//! is allowed.

use crate::offline::error::{OfflineError, OfflineResult};
use crate::offline::worker::cache::CacheStorage;
use crate::offline::worker::fetcher::Fetcher;
use crate::offline::worker::models::WorkerConfig;
use crate::offline::worker::policy::{classify, resolve, RequestClass};
use crate::offline::worker::types::{
    CachedResponse, FetchRequest, FetchResult, ResponseSource, WorkerMessage, WorkerState,
    WorkerStatus,
};
use anyhow::Context;
use chrono::{SecondsFormat, Utc};
use std::sync::Arc;
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, error, info, warn};

enum Command {
    Install(oneshot::Sender<OfflineResult<()>>),
    Activate(oneshot::Sender<OfflineResult<()>>),
    Fetch(FetchRequest, oneshot::Sender<FetchResult>),
    Message(WorkerMessage, oneshot::Sender<OfflineResult<Option<WorkerStatus>>>),
    State(oneshot::Sender<WorkerState>),
}

/// Client side of the worker boundary
#[derive(Clone)]
pub struct CacheWorkerHandle {
    inbox: mpsc::Sender<Command>,
}

impl CacheWorkerHandle {
    async fn request<T>(
        &self,
        make: impl FnOnce(oneshot::Sender<T>) -> Command,
    ) -> OfflineResult<T> {
        let (tx, rx) = oneshot::channel();
        self.inbox
            .send(make(tx))
            .await
            .map_err(|_| OfflineError::Worker("cache worker stopped".into()))?;
        rx.await
            .map_err(|_| OfflineError::Worker("cache worker dropped the request".into()))
    }

    /// Precache the shell. Any failed resource fails the whole install.
    pub async fn install(&self) -> OfflineResult<()> {
        self.request(Command::Install).await?
    }

    /// Drop stale partitions and start controlling clients
    pub async fn activate(&self) -> OfflineResult<()> {
        self.request(Command::Activate).await?
    }

    pub async fn fetch(&self, request: FetchRequest) -> OfflineResult<FetchResult> {
        self.request(|reply| Command::Fetch(request, reply)).await
    }

    /// Deliver a control message. `GET_SW_STATUS` answers with `Some(status)`.
    pub async fn post_message(&self, message: WorkerMessage) -> OfflineResult<Option<WorkerStatus>> {
        self.request(|reply| Command::Message(message, reply)).await?
    }

    /// Deliver a raw JSON control message, e.g. `{"type":"SKIP_WAITING"}`
    pub async fn post_json(&self, raw: &str) -> OfflineResult<Option<WorkerStatus>> {
        let message: WorkerMessage = serde_json::from_str(raw)
            .map_err(|e| OfflineError::InvalidOperation(format!("unknown worker message: {}", e)))?;
        self.post_message(message).await
    }

    pub async fn skip_waiting(&self) -> OfflineResult<()> {
        self.post_message(WorkerMessage::SkipWaiting).await.map(|_| ())
    }

    pub async fn status(&self) -> OfflineResult<WorkerStatus> {
        self.post_message(WorkerMessage::GetSwStatus)
            .await?
            .ok_or_else(|| OfflineError::Worker("status query got no reply".into()))
    }

    pub async fn state(&self) -> OfflineResult<WorkerState> {
        self.request(Command::State).await
    }
}

/// The actor. Owned by its task; reachable only through handles.
pub struct CacheWorker {
    config: WorkerConfig,
    caches: CacheStorage,
    fetcher: Arc<dyn Fetcher>,
    state: WorkerState,
    /// Set once activation claims the clients
    controlling: bool,
}

impl CacheWorker {
    /// Start the worker task. It stops once every handle is dropped.
    pub fn spawn(
        config: WorkerConfig,
        caches: CacheStorage,
        fetcher: Arc<dyn Fetcher>,
    ) -> CacheWorkerHandle {
        let (tx, rx) = mpsc::channel(64);
        let worker = Self {
            config,
            caches,
            fetcher,
            state: WorkerState::Parsed,
            controlling: false,
        };
        tokio::spawn(worker.run(rx));
        CacheWorkerHandle { inbox: tx }
    }

    async fn run(mut self, mut inbox: mpsc::Receiver<Command>) {
        info!("[CacheWorker] 🚀 worker {} started", self.config.version);
        while let Some(command) = inbox.recv().await {
            match command {
                Command::Install(reply) => {
                    let _ = reply.send(self.install().await);
                }
                Command::Activate(reply) => {
                    let _ = reply.send(self.activate().await);
                }
                Command::Fetch(request, reply) => {
                    let _ = reply.send(self.handle_fetch(request).await);
                }
                Command::Message(message, reply) => {
                    let _ = reply.send(self.handle_message(message).await);
                }
                Command::State(reply) => {
                    let _ = reply.send(self.state);
                }
            }
        }
        debug!("[CacheWorker] inbox closed, worker stopped");
    }

    // ========== lifecycle ==========

    async fn install(&mut self) -> OfflineResult<()> {
        if !matches!(self.state, WorkerState::Parsed | WorkerState::Redundant) {
            return Err(OfflineError::Worker(format!(
                "cannot install while {}",
                self.state
            )));
        }
        self.state = WorkerState::Installing;
        info!(
            "[CacheWorker] 📦 installing, precaching {} resource(s)",
            self.config.precache.len()
        );

        match self.precache_shell().await {
            Ok(count) => {
                self.state = WorkerState::Installed;
                info!("[CacheWorker] ✅ installed ({} cached), waiting", count);
                Ok(())
            }
            Err(e) => {
                self.state = WorkerState::Redundant;
                error!("[CacheWorker] ❌ install failed: {:#}", e);
                Err(OfflineError::Worker(format!("install failed: {:#}", e)))
            }
        }
    }

    /// Fetch every shell resource first, then write them; nothing is stored
    /// unless all of them succeeded.
    async fn precache_shell(&self) -> anyhow::Result<usize> {
        let mut fetched = Vec::with_capacity(self.config.precache.len());
        for path in &self.config.precache {
            let url = resolve(&self.config, path)?;
            let response = self
                .fetcher
                .fetch(&FetchRequest::get(url.clone()))
                .await
                .with_context(|| format!("precache of {} failed", url))?;
            if !response.is_ok() {
                anyhow::bail!("precache of {} returned {}", url, response.status);
            }
            fetched.push((url, response));
        }

        let shell = self.config.shell_cache_name();
        self.caches.open(&shell).await?;
        for (url, response) in &fetched {
            self.caches.put(&shell, url, response).await?;
        }
        Ok(fetched.len())
    }

    async fn activate(&mut self) -> OfflineResult<()> {
        match self.state {
            WorkerState::Activated => return Ok(()),
            WorkerState::Installed => {}
            other => {
                return Err(OfflineError::Worker(format!(
                    "cannot activate while {}",
                    other
                )))
            }
        }
        self.state = WorkerState::Activating;

        if let Err(e) = self.delete_stale_caches().await {
            self.state = WorkerState::Installed;
            error!("[CacheWorker] ❌ activation failed: {:#}", e);
            return Err(e.into());
        }

        self.controlling = true;
        self.state = WorkerState::Activated;
        info!("[CacheWorker] ✅ activated {}, clients claimed", self.config.version);
        Ok(())
    }

    async fn delete_stale_caches(&self) -> anyhow::Result<()> {
        let valid = self.config.valid_caches();
        for name in self.caches.keys().await? {
            if !valid.contains(&name) {
                info!("[CacheWorker] 🗑️ deleting stale cache {}", name);
                self.caches.delete(&name).await?;
            }
        }
        Ok(())
    }

    async fn handle_message(&mut self, message: WorkerMessage) -> OfflineResult<Option<WorkerStatus>> {
        match message {
            WorkerMessage::SkipWaiting => {
                if self.state == WorkerState::Installed {
                    info!("[CacheWorker] skip waiting requested");
                    self.activate().await?;
                } else {
                    debug!("[CacheWorker] skip waiting ignored while {}", self.state);
                }
                Ok(None)
            }
            WorkerMessage::GetSwStatus => Ok(Some(WorkerStatus {
                version: self.config.version.clone(),
                caches: self.caches.keys().await?,
                timestamp: Utc::now().to_rfc3339_opts(SecondsFormat::Millis, true),
            })),
        }
    }

    // ========== fetch ==========

    async fn handle_fetch(&self, request: FetchRequest) -> FetchResult {
        if !self.controlling {
            return FetchResult::Passthrough;
        }
        match classify(&self.config, &request) {
            RequestClass::Passthrough => FetchResult::Passthrough,
            RequestClass::Navigation => self.navigation(&request).await,
            RequestClass::StaticAsset => self.cache_first(&request).await,
            RequestClass::Other => self.network_first(&request).await,
        }
    }

    fn index_url(&self) -> Option<String> {
        match resolve(&self.config, &self.config.index_path) {
            Ok(url) => Some(url),
            Err(e) => {
                warn!("[CacheWorker] {:#}", e);
                None
            }
        }
    }

    async fn navigation(&self, request: &FetchRequest) -> FetchResult {
        let shell = self.config.shell_cache_name();
        let index_url = self.index_url();

        match self.fetcher.fetch(request).await {
            Ok(response) => {
                if response.is_ok() {
                    if let Some(index_url) = &index_url {
                        self.store(&shell, index_url, &response).await;
                    }
                }
                FetchResult::respond(response, ResponseSource::Network)
            }
            Err(e) => {
                debug!("[CacheWorker] navigation offline ({:#}), serving shell", e);
                let cached = match &index_url {
                    Some(index_url) => self.lookup(&[shell], index_url).await,
                    None => None,
                };
                match cached {
                    Some(response) => FetchResult::respond(response, ResponseSource::Cache),
                    None => FetchResult::respond(
                        CachedResponse::offline_page(),
                        ResponseSource::Synthetic,
                    ),
                }
            }
        }
    }

    async fn cache_first(&self, request: &FetchRequest) -> FetchResult {
        if let Some(response) = self.lookup(&self.config.valid_caches(), &request.url).await {
            return FetchResult::respond(response, ResponseSource::Cache);
        }
        match self.fetcher.fetch(request).await {
            Ok(response) => {
                if response.is_ok() {
                    self.store(&self.config.runtime_cache_name(), &request.url, &response)
                        .await;
                }
                FetchResult::respond(response, ResponseSource::Network)
            }
            Err(e) => {
                debug!("[CacheWorker] asset {} unavailable: {:#}", request.url, e);
                FetchResult::respond(CachedResponse::service_unavailable(), ResponseSource::Synthetic)
            }
        }
    }

    async fn network_first(&self, request: &FetchRequest) -> FetchResult {
        match self.fetcher.fetch(request).await {
            Ok(response) => {
                if response.is_ok() {
                    self.store(&self.config.runtime_cache_name(), &request.url, &response)
                        .await;
                }
                FetchResult::respond(response, ResponseSource::Network)
            }
            Err(e) => {
                debug!("[CacheWorker] {} offline ({:#}), trying cache", request.url, e);
                match self.lookup(&self.config.valid_caches(), &request.url).await {
                    Some(response) => FetchResult::respond(response, ResponseSource::Cache),
                    None => FetchResult::respond(
                        CachedResponse::service_unavailable(),
                        ResponseSource::Synthetic,
                    ),
                }
            }
        }
    }

    /// Cache read; a storage error counts as a miss
    async fn lookup(&self, names: &[String], url: &str) -> Option<CachedResponse> {
        match self.caches.match_any(names, url).await {
            Ok(hit) => hit,
            Err(e) => {
                warn!("[CacheWorker] cache read of {} failed: {:#}", url, e);
                None
            }
        }
    }

    /// Cache write; a storage error never fails the response
    async fn store(&self, name: &str, url: &str, response: &CachedResponse) {
        if let Err(e) = self.caches.put(name, url, response).await {
            warn!("[CacheWorker] caching {} failed: {:#}", url, e);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::offline::test_support::init_test_logger;
    use crate::offline::db::create_sqlite_pool_with_migration;
    use crate::offline::worker::types::RequestMode;
    use async_trait::async_trait;
    use std::collections::HashMap;
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
    use std::sync::Mutex;

    const ORIGIN: &str = "http://localhost:1420";

    #[derive(Default)]
    struct MockFetcher {
        offline: AtomicBool,
        calls: AtomicUsize,
        pages: Mutex<HashMap<String, CachedResponse>>,
    }

    impl MockFetcher {
        fn serving(pages: &[(&str, &str)]) -> Arc<Self> {
            let fetcher = Self::default();
            for (path, body) in pages {
                fetcher.pages.lock().unwrap().insert(
                    format!("{}{}", ORIGIN, path),
                    CachedResponse::new(200, body.as_bytes()),
                );
            }
            Arc::new(fetcher)
        }

        fn go_offline(&self) {
            self.offline.store(true, Ordering::SeqCst);
        }

        fn calls(&self) -> usize {
            self.calls.load(Ordering::SeqCst)
        }
    }

    #[async_trait]
    impl Fetcher for MockFetcher {
        async fn fetch(&self, request: &FetchRequest) -> anyhow::Result<CachedResponse> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if self.offline.load(Ordering::SeqCst) {
                anyhow::bail!("network unreachable");
            }
            Ok(self
                .pages
                .lock()
                .unwrap()
                .get(&request.url)
                .cloned()
                .unwrap_or_else(|| CachedResponse::new(404, "not found")))
        }
    }

    fn config(precache: &[&str]) -> WorkerConfig {
        let mut config = WorkerConfig::new("v2", ORIGIN);
        config.precache = precache.iter().map(|p| p.to_string()).collect();
        config
    }

    async fn storage() -> CacheStorage {
        CacheStorage::new(create_sqlite_pool_with_migration("sqlite::memory:").await.unwrap())
    }

    async fn active_worker(
        config: WorkerConfig,
        fetcher: Arc<MockFetcher>,
    ) -> (CacheWorkerHandle, CacheStorage) {
        let caches = storage().await;
        let handle = CacheWorker::spawn(config, caches.clone(), fetcher);
        handle.install().await.unwrap();
        handle.activate().await.unwrap();
        (handle, caches)
    }

    fn url(path: &str) -> String {
        format!("{}{}", ORIGIN, path)
    }

    #[tokio::test]
    async fn activation_removes_every_stale_partition() {
        init_test_logger();
        let caches = storage().await;
        let old = CachedResponse::new(200, "old");
        caches.put("salon-shell-v1", &url("/index.html"), &old).await.unwrap();
        caches.put("salon-runtime-v1", &url("/a.js"), &old).await.unwrap();
        caches.open("someone-else").await.unwrap();

        let fetcher = MockFetcher::serving(&[("/index.html", "<html>v2</html>")]);
        let handle = CacheWorker::spawn(config(&["/index.html"]), caches.clone(), fetcher);

        handle.install().await.unwrap();
        assert_eq!(handle.state().await.unwrap(), WorkerState::Installed);
        // Waiting: stale partitions survive until activation.
        assert_eq!(caches.keys().await.unwrap().len(), 4);

        handle.activate().await.unwrap();
        assert_eq!(handle.state().await.unwrap(), WorkerState::Activated);
        assert_eq!(caches.keys().await.unwrap(), vec!["salon-shell-v2"]);
        assert_eq!(caches.entry_count("salon-shell-v2").await.unwrap(), 1);
    }

    #[tokio::test]
    async fn failed_precache_makes_the_worker_redundant_and_retryable() {
        let caches = storage().await;
        let fetcher = MockFetcher::serving(&[("/index.html", "<html>")]);
        let handle = CacheWorker::spawn(
            config(&["/index.html", "/manifest.json"]),
            caches.clone(),
            fetcher.clone(),
        );

        let err = handle.install().await.unwrap_err();
        assert!(matches!(err, OfflineError::Worker(_)));
        assert_eq!(handle.state().await.unwrap(), WorkerState::Redundant);
        assert!(caches.keys().await.unwrap().is_empty());
        assert!(handle.activate().await.is_err());

        fetcher
            .pages
            .lock()
            .unwrap()
            .insert(url("/manifest.json"), CachedResponse::new(200, "{}"));
        handle.install().await.unwrap();
        assert_eq!(caches.entry_count("salon-shell-v2").await.unwrap(), 2);
    }

    #[tokio::test]
    async fn offline_navigation_serves_the_cached_shell() {
        let fetcher = MockFetcher::serving(&[("/index.html", "<html>shell</html>")]);
        let (handle, _) = active_worker(config(&["/index.html"]), fetcher.clone()).await;

        fetcher.go_offline();
        let result = handle.fetch(FetchRequest::navigate(url("/agenda"))).await.unwrap();
        assert_eq!(result.source(), Some(ResponseSource::Cache));
        let response = result.response().unwrap();
        assert_eq!(response.status, 200);
        assert_eq!(response.body, b"<html>shell</html>");
    }

    #[tokio::test]
    async fn online_navigation_refreshes_the_index_document() {
        let fetcher = MockFetcher::serving(&[("/agenda", "<html>fresh</html>")]);
        let (handle, caches) = active_worker(config(&[]), fetcher.clone()).await;

        let result = handle.fetch(FetchRequest::navigate(url("/agenda"))).await.unwrap();
        assert_eq!(result.source(), Some(ResponseSource::Network));
        let stored = caches
            .match_url("salon-shell-v2", &url("/index.html"))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(stored.body, b"<html>fresh</html>");
    }

    #[tokio::test]
    async fn offline_navigation_without_shell_gets_the_offline_page() {
        let fetcher = MockFetcher::serving(&[]);
        let (handle, _) = active_worker(config(&[]), fetcher.clone()).await;
        fetcher.go_offline();

        let result = handle.fetch(FetchRequest::navigate(url("/"))).await.unwrap();
        assert_eq!(result.source(), Some(ResponseSource::Synthetic));
        assert_eq!(result.response().unwrap(), &CachedResponse::offline_page());
    }

    #[tokio::test]
    async fn static_assets_are_cache_first() {
        let fetcher = MockFetcher::serving(&[("/assets/app.js", "console.log(1)")]);
        let (handle, caches) = active_worker(config(&[]), fetcher.clone()).await;

        let first = handle.fetch(FetchRequest::get(url("/assets/app.js"))).await.unwrap();
        assert_eq!(first.source(), Some(ResponseSource::Network));
        assert_eq!(caches.entry_count("salon-runtime-v2").await.unwrap(), 1);

        let calls = fetcher.calls();
        let second = handle.fetch(FetchRequest::get(url("/assets/app.js"))).await.unwrap();
        assert_eq!(second.source(), Some(ResponseSource::Cache));
        assert_eq!(fetcher.calls(), calls);

        fetcher.go_offline();
        let missing = handle.fetch(FetchRequest::get(url("/assets/other.css"))).await.unwrap();
        assert_eq!(missing.response().unwrap().status, 503);
    }

    #[tokio::test]
    async fn other_requests_are_network_first_with_cache_fallback() {
        let fetcher = MockFetcher::serving(&[("/logo.png", "png-v1")]);
        let (handle, _) = active_worker(config(&[]), fetcher.clone()).await;

        handle.fetch(FetchRequest::get(url("/logo.png"))).await.unwrap();
        fetcher
            .pages
            .lock()
            .unwrap()
            .insert(url("/logo.png"), CachedResponse::new(200, "png-v2"));
        let fresh = handle.fetch(FetchRequest::get(url("/logo.png"))).await.unwrap();
        assert_eq!(fresh.response().unwrap().body, b"png-v2");

        fetcher.go_offline();
        let cached = handle.fetch(FetchRequest::get(url("/logo.png"))).await.unwrap();
        assert_eq!(cached.source(), Some(ResponseSource::Cache));
        assert_eq!(cached.response().unwrap().body, b"png-v2");

        let missing = handle.fetch(FetchRequest::get(url("/photo.jpg"))).await.unwrap();
        assert_eq!(missing.response().unwrap().status, 503);
    }

    #[tokio::test]
    async fn excluded_and_non_get_requests_pass_through() {
        let fetcher = MockFetcher::serving(&[]);
        let (handle, _) = active_worker(config(&[]), fetcher.clone()).await;
        let calls = fetcher.calls();

        let post = FetchRequest::new("POST", url("/logo.png"), RequestMode::Cors);
        assert_eq!(handle.fetch(post).await.unwrap(), FetchResult::Passthrough);
        let api = FetchRequest::get("https://proj.supabase.co/rest/v1/clientes?select=*");
        assert_eq!(handle.fetch(api).await.unwrap(), FetchResult::Passthrough);
        assert_eq!(fetcher.calls(), calls);
    }

    #[tokio::test]
    async fn waiting_worker_does_not_intercept_until_skip_waiting() {
        let fetcher = MockFetcher::serving(&[("/index.html", "<html>")]);
        let handle = CacheWorker::spawn(config(&["/index.html"]), storage().await, fetcher);
        handle.install().await.unwrap();

        let before = handle.fetch(FetchRequest::navigate(url("/"))).await.unwrap();
        assert_eq!(before, FetchResult::Passthrough);

        handle.post_json(r#"{"type":"SKIP_WAITING"}"#).await.unwrap();
        assert_eq!(handle.state().await.unwrap(), WorkerState::Activated);

        let status = handle.status().await.unwrap();
        assert_eq!(status.version, "v2");
        assert_eq!(status.caches, vec!["salon-shell-v2"]);
        assert!(chrono::DateTime::parse_from_rfc3339(&status.timestamp).is_ok());

        assert!(matches!(
            handle.post_json(r#"{"type":"CLAIM"}"#).await,
            Err(OfflineError::InvalidOperation(_))
        ));
    }
}
