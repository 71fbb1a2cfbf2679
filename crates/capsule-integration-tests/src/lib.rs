//! Integration test crate for Capsule.
//!
//! Holds a [`Device`] fixture that wires the store, ledger and scheduler
//! together over one data directory, the way the daemon does. The tests
//! under `tests/` drive end-to-end flows across those crates.
//!
//! Run all integration tests:
//! ```sh
//! cargo test -p capsule-integration-tests
//! ```

use std::path::{Path, PathBuf};
use std::sync::Arc;

use capsule_sched::mock::ScriptedFetcher;
use capsule_sched::{DownloadScheduler, Fetcher, SchedulerConfig};
use capsule_store::ContentStore;
use capsule_wallet::UsageLedger;
use tokio::sync::Mutex;

/// Simulated base timestamp (2023-11-14, a Tuesday, 22:13 UTC).
pub const BASE_TIME: u64 = 1_700_000_000;

/// One device's storage, ledger and download queue.
pub struct Device {
    pub store: Arc<Mutex<ContentStore>>,
    pub ledger: Arc<Mutex<UsageLedger>>,
    pub scheduler: DownloadScheduler,
    pub fetcher: Arc<ScriptedFetcher>,
}

impl Device {
    /// Open (or reopen) a device rooted at `data_dir`.
    pub async fn open(data_dir: &Path, config: SchedulerConfig, hard_limit: Option<u64>) -> Self {
        let db_path = data_dir.join("capsule.db");
        let store = ContentStore::open(&db_path, blob_dir(data_dir))
            .expect("open store")
            .with_hard_limit(hard_limit);
        let ledger = UsageLedger::open(&db_path).expect("open ledger");
        let store = Arc::new(Mutex::new(store));
        let ledger = Arc::new(Mutex::new(ledger));
        let fetcher = Arc::new(ScriptedFetcher::new());
        let scheduler = DownloadScheduler::restore(
            Arc::clone(&store),
            Arc::clone(&ledger),
            Arc::clone(&fetcher) as Arc<dyn Fetcher>,
            config,
        )
        .await
        .expect("restore scheduler");
        Self {
            store,
            ledger,
            scheduler,
            fetcher,
        }
    }
}

pub fn blob_dir(data_dir: &Path) -> PathBuf {
    data_dir.join("blobs")
}

/// Scheduler settings with short backoff for tests.
pub fn fast_config() -> SchedulerConfig {
    SchedulerConfig {
        base_backoff_secs: 10,
        max_backoff_secs: 60,
        ..SchedulerConfig::default()
    }
}
