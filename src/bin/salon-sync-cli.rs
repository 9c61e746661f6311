//! Salon offline sync CLI
//!
//! Non-interactive: mounts the offline core against a backend, keeps it running
//! for a while and logs every connectivity change, sync result and realtime
//! change it sees.

use anyhow::{Context, Result};
use clap::Parser;
use salon_offline_core::offline::context::OfflineListener;
use salon_offline_core::offline::realtime::ChangeEvent;
use salon_offline_core::offline::settings::KIOSK_MODE_KEY;
use salon_offline_core::offline::sync::{InitialSyncReport, SyncCycleResult};
use salon_offline_core::{
    ChangeFeed, ChangeFeedConfig, ChangeListener, HttpProbe, LocalStore, NetworkMonitor,
    OfflineConfig, OfflineContext, RestDataApi, SettingsStore,
};
use std::sync::Arc;
use tokio::time::{sleep, Duration};
use tracing::{error, info, warn};

/// Salon offline sync CLI
#[derive(Parser, Debug)]
#[command(name = "salon-sync-cli")]
#[command(about = "Runs the salon offline sync core against a backend and logs what happens", long_about = None)]
struct Args {
    /// Backend base URL
    #[arg(long)]
    api_url: String,

    /// Project API key
    #[arg(long)]
    api_key: String,

    /// Local SQLite database
    #[arg(long, default_value = "sqlite://salon_offline.db?mode=rwc")]
    db_url: String,

    /// Run time in seconds, 0 runs until Ctrl+C
    #[arg(short, long, default_value = "0")]
    duration: u64,

    /// Background sync period in seconds
    #[arg(long, default_value = "30")]
    sync_interval: u64,

    /// Connectivity probe period in seconds
    #[arg(long, default_value = "10")]
    probe_interval: u64,

    /// Persist the kiosk-mode flag before starting
    #[arg(long)]
    kiosk: Option<bool>,

    /// Also subscribe to realtime changes of every collection
    #[arg(long)]
    realtime: bool,

    /// Log level (RUST_LOG wins when set)
    #[arg(long, default_value = "info,salon_offline_core=debug")]
    log_level: String,
}

/// Log to stdout and to an append-mode file
fn init_logger(log_level: &str) -> Result<()> {
    use std::fs::OpenOptions;
    use std::io;
    use tracing_subscriber::prelude::*;
    use tracing_subscriber::EnvFilter;

    // RUST_LOG wins over --log-level
    let filter_layer =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(log_level));

    // Appended across runs so a shift's sync history stays in one file
    let log_file = OpenOptions::new()
        .create(true)
        .append(true)
        .open("salon-sync.log")
        .context("cannot open log file salon-sync.log")?;

    // Console: colored, file:line for jumping to the source
    let stdout_layer = tracing_subscriber::fmt::layer()
        .with_writer(io::stdout)
        .with_file(true)
        .with_line_number(true)
        .with_target(false) // components log with a [Tag] prefix
        .with_ansi(true);

    // File: same layout, no escape codes
    let file_layer = tracing_subscriber::fmt::layer()
        .with_writer(log_file)
        .with_file(true)
        .with_line_number(true)
        .with_target(false)
        .with_ansi(false);

    tracing_subscriber::registry()
        .with(filter_layer)
        .with(stdout_layer)
        .with(file_layer)
        .init();

    info!("[CLI] 📝 logging to stdout and salon-sync.log");
    Ok(())
}

struct CliOfflineListener;

#[async_trait::async_trait]
impl OfflineListener for CliOfflineListener {
    async fn on_connection_changed(&self, online: bool) {
        if online {
            info!("[CLI/Offline] 🌐 back online");
        } else {
            warn!("[CLI/Offline] 📴 offline, changes will be saved locally");
        }
    }

    async fn on_initial_sync_finished(&self, report: InitialSyncReport) {
        for (collection, count) in &report.pulled {
            info!("[CLI/Offline] 📥 {}: {} record(s)", collection, count);
        }
        for failure in &report.failures {
            error!("[CLI/Offline] ❌ {}: {}", failure.collection, failure.message);
        }
    }

    async fn on_reconnect_synced(&self, result: SyncCycleResult) {
        info!(
            "[CLI/Offline] ✅ reconnect sync - applied: {}, failed: {}, remaining: {}",
            result.applied, result.failed, result.remaining
        );
    }

    async fn on_manual_sync_finished(&self, result: SyncCycleResult) {
        info!("[CLI/Offline] ✅ manual sync - applied: {}", result.applied);
    }

    async fn on_manual_sync_failed(&self, reason: String) {
        error!("[CLI/Offline] ❌ manual sync failed: {}", reason);
    }

    async fn on_pending_count_changed(&self, count: usize) {
        info!("[CLI/Offline] 📬 pending changes: {}", count);
    }
}

struct CliChangeListener;

#[async_trait::async_trait]
impl ChangeListener for CliChangeListener {
    async fn on_changes(&self, collection: &str, events: Vec<ChangeEvent>) {
        info!("[CLI/Realtime] 🔔 {} change(s) on {}", events.len(), collection);
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();
    init_logger(&args.log_level)?;

    info!("[CLI] 🚀 salon offline sync");
    info!("[CLI] 🔗 backend: {}", args.api_url);

    let mut config = OfflineConfig::new(args.api_url.clone(), args.api_key.clone());
    config.db_url = args.db_url.clone();
    config.sync_interval = Duration::from_secs(args.sync_interval.max(1));

    let store = Arc::new(LocalStore::new(config.db_url.clone()));
    if store.initialize().await.is_ok() {
        if let Some(pool) = store.pool() {
            let settings = SettingsStore::new(pool);
            if let Some(kiosk) = args.kiosk {
                settings.set(KIOSK_MODE_KEY, &kiosk).await?;
            }
            let kiosk = settings.get(KIOSK_MODE_KEY, false).await;
            info!("[CLI] 🖥️ kiosk mode: {}", kiosk);
        }
    }

    let probe = Arc::new(HttpProbe::new(
        format!("{}/rest/v1/", args.api_url.trim_end_matches('/')),
        Duration::from_secs(5),
    )?);
    let monitor = Arc::new(NetworkMonitor::seeded_by(probe.as_ref()).await);
    monitor.start_probe(probe, Duration::from_secs(args.probe_interval.max(1)));

    let api = Arc::new(RestDataApi::with_api_key(
        config.api_base_url.clone(),
        &config.api_key,
        config.http_timeout,
    )?);
    let collections = config.collections.clone();
    let context = OfflineContext::mount_with(
        config,
        store,
        api,
        monitor.clone(),
        Arc::new(CliOfflineListener),
    )
    .await;

    let feed = args.realtime.then(|| {
        let feed = ChangeFeed::start(ChangeFeedConfig::new(&args.api_url, args.api_key.clone()));
        let subscriptions: Vec<_> = collections
            .iter()
            .map(|c| feed.subscribe_changes(c, Arc::new(CliChangeListener)))
            .collect();
        (feed, subscriptions)
    });

    info!(
        "[CLI] ✅ mounted - online: {}, pending: {}",
        context.is_online(),
        context.pending_count()
    );

    if args.duration > 0 {
        info!("[CLI] ⏰ exiting in {} s", args.duration);
        sleep(Duration::from_secs(args.duration)).await;
    } else {
        info!("[CLI] ⏰ running, Ctrl+C to exit");
        tokio::signal::ctrl_c().await.context("failed to listen for Ctrl+C")?;
    }

    if context.is_online() {
        match context.sync_now().await {
            Ok(result) => info!("[CLI] final sync, remaining: {}", result.remaining),
            Err(e) => warn!("[CLI] final sync skipped: {}", e),
        }
    }
    if let Some((feed, subscriptions)) = feed {
        drop(subscriptions);
        feed.shutdown().await;
    }
    context.unmount().await;
    monitor.stop_probe();
    info!("[CLI] 👋 bye");
    Ok(())
}
