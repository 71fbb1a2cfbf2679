//! capsule-daemon: the offline content and usage manager.
//!
//! Single OS process running a Tokio async runtime. The UI communicates
//! with the daemon via JSON-RPC over a Unix socket and renders the state it
//! gets back.

mod commands;
mod config;
mod day;
mod events;
mod fetcher;
mod policy;
mod rpc;

use std::sync::Arc;
use std::time::Duration;

use capsule_db::queries::settings;
use capsule_sched::{DownloadScheduler, Fetcher};
use capsule_store::expiry::ExpiryEngine;
use capsule_store::ContentStore;
use capsule_types::app::{reduce, Action, AppState, Role};
use capsule_types::events::EventType;
use capsule_types::network::NetworkLink;
use capsule_wallet::UsageLedger;
use tokio::sync::{broadcast, Mutex, RwLock};
use tracing::{error, info, warn};

use crate::config::DaemonConfig;
use crate::events::EventBus;
use crate::fetcher::HttpFetcher;
use crate::policy::NetworkPolicy;
use crate::rpc::RpcServer;

/// Daemon-wide shared state.
pub struct DaemonState {
    /// Content store, shared with the scheduler and the sweep.
    pub store: Arc<Mutex<ContentStore>>,
    /// Data Wallet ledger.
    pub ledger: Arc<Mutex<UsageLedger>>,
    /// Download scheduler. Ticks and RPC calls serialize on this lock.
    pub scheduler: Mutex<DownloadScheduler>,
    pub expiry: ExpiryEngine,
    pub policy: NetworkPolicy,
    /// Configuration.
    pub config: DaemonConfig,
    /// Event bus for pushing events to subscribers.
    pub event_bus: EventBus,
    /// UI state, changed only through [`DaemonState::dispatch`].
    pub app_state: RwLock<AppState>,
    /// Shutdown signal sender.
    pub shutdown_tx: broadcast::Sender<()>,
}

impl DaemonState {
    /// Open storage under the configured data directory and resume the
    /// download queue.
    pub async fn open(config: DaemonConfig, fetcher: Arc<dyn Fetcher>) -> anyhow::Result<Arc<Self>> {
        let data_dir = config.data_dir();
        std::fs::create_dir_all(&data_dir)?;

        let db_path = config.db_path();
        let first_run = !db_path.exists();

        let store = ContentStore::open(&db_path, config.blob_dir())?
            .with_hard_limit(config.storage.hard_limit_bytes());
        if first_run && config.storage.auto_delete_resources {
            store.set_auto_delete_resources(true)?;
        }

        let link = settings::get(store.db(), settings::NETWORK_LINK)
            .ok()
            .and_then(|s| NetworkLink::parse(&s))
            .unwrap_or_default();
        let role = match settings::get(store.db(), settings::APP_ROLE).ok().as_deref() {
            Some("teacher") => Role::Teacher,
            _ => Role::Student,
        };

        let ledger = UsageLedger::open(&db_path)?;
        let store = Arc::new(Mutex::new(store));
        let ledger = Arc::new(Mutex::new(ledger));

        let scheduler = DownloadScheduler::restore(
            Arc::clone(&store),
            Arc::clone(&ledger),
            fetcher,
            config.downloads.scheduler(),
        )
        .await?;

        let (shutdown_tx, _) = broadcast::channel(1);

        Ok(Arc::new(Self {
            store,
            ledger,
            scheduler: Mutex::new(scheduler),
            expiry: ExpiryEngine::new(config.storage.quota_bytes()),
            policy: config.network.policy(),
            config,
            event_bus: EventBus::new(1000),
            app_state: RwLock::new(AppState {
                role,
                network: link,
                ..AppState::default()
            }),
            shutdown_tx,
        }))
    }

    /// Whether the download policy allows transfers right now.
    pub async fn network_available(&self) -> bool {
        let link = self.app_state.read().await.network;
        self.policy.allows_now(link)
    }

    /// Apply a UI or host action to the app state.
    ///
    /// Role and network link survive restarts.
    pub async fn dispatch(&self, action: &Action) -> anyhow::Result<AppState> {
        let mut guard = self.app_state.write().await;
        let next = reduce(&guard, action);
        if next == *guard {
            return Ok(next);
        }

        {
            let store = self.store.lock().await;
            if next.role != guard.role {
                let role = match next.role {
                    Role::Student => "student",
                    Role::Teacher => "teacher",
                };
                settings::set(store.db(), settings::APP_ROLE, role)?;
            }
            if next.network != guard.network {
                settings::set(store.db(), settings::NETWORK_LINK, next.network.as_str())?;
            }
        }

        *guard = next.clone();
        drop(guard);

        self.event_bus
            .publish(EventType::AppStateChanged, serde_json::to_value(&next)?);
        Ok(next)
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // 1. Load config
    let config = DaemonConfig::load()?;

    // 2. Initialize tracing
    let filter = tracing_subscriber::EnvFilter::from_default_env()
        .add_directive(format!("capsule={}", config.advanced.log_level).parse()?);
    if config.advanced.log_file.is_empty() {
        tracing_subscriber::fmt().with_env_filter(filter).init();
    } else {
        let file = std::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&config.advanced.log_file)?;
        tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_ansi(false)
            .with_writer(std::sync::Mutex::new(file))
            .init();
    }

    info!("Capsule daemon starting");

    // 3. Open storage and resume the queue
    let fetcher = HttpFetcher::new(
        &config.downloads.content_base_url,
        Duration::from_secs(config.downloads.transfer_timeout_secs),
    )?;
    let state = DaemonState::open(config, Arc::new(fetcher)).await?;

    // 4. Background loops
    tokio::spawn(day_loop(Arc::clone(&state)));
    tokio::spawn(scheduler_loop(Arc::clone(&state)));
    tokio::spawn(sweep_loop(Arc::clone(&state)));

    // 5. Start IPC server
    let socket_path = state.config.socket_path();
    let rpc_server = RpcServer::new(Arc::clone(&state), socket_path.clone());

    state.event_bus.publish(
        EventType::DaemonStarted,
        serde_json::json!({
            "version": env!("CARGO_PKG_VERSION"),
        }),
    );

    // 6. Run the RPC server until shutdown
    let mut shutdown_rx = state.shutdown_tx.subscribe();
    tokio::select! {
        result = rpc_server.run() => {
            if let Err(e) = result {
                error!("RPC server error: {}", e);
            }
        }
        _ = shutdown_rx.recv() => {
            info!("Shutdown signal received");
        }
        _ = tokio::signal::ctrl_c() => {
            info!("Ctrl-C received, shutting down");
        }
    }

    info!("Daemon shutting down gracefully");
    let _ = std::fs::remove_file(&socket_path);
    info!("Daemon stopped");
    Ok(())
}

/// Close finished wallet days now and at every UTC midnight.
async fn day_loop(state: Arc<DaemonState>) {
    loop {
        if let Err(e) = day::run_day_boundary(&state, day::current_day()).await {
            error!(error = %e, "day boundary failed");
        }
        let wait = day::seconds_until_next_day(day::now_secs());
        tokio::time::sleep(Duration::from_secs(wait)).await;
    }
}

/// Drive the download scheduler.
async fn scheduler_loop(state: Arc<DaemonState>) {
    let period = Duration::from_secs(state.config.downloads.tick_interval_secs.max(1));
    let mut interval = tokio::time::interval(period);
    loop {
        interval.tick().await;
        let available = state.network_available().await;
        let result = state
            .scheduler
            .lock()
            .await
            .tick(day::now_secs(), available)
            .await;
        match result {
            Ok(report) => commands::downloads::publish_report(&state, &report).await,
            Err(e) => error!(error = %e, "scheduler tick failed"),
        }
    }
}

/// Periodic expiry and quota sweep.
async fn sweep_loop(state: Arc<DaemonState>) {
    let period = Duration::from_secs(state.config.storage.sweep_interval_secs.max(1));
    let mut interval = tokio::time::interval(period);
    loop {
        interval.tick().await;
        match state
            .expiry
            .run_sweep_shared(&state.store, day::now_secs())
            .await
        {
            Ok(evicted) => {
                for id in evicted {
                    state.event_bus.publish(
                        EventType::ContentEvicted,
                        serde_json::json!({ "unit_id": id }),
                    );
                }
            }
            Err(e) => warn!(error = %e, "expiry sweep failed"),
        }
    }
}
