//! Download queue, dispatch and state transitions.

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use std::time::Duration;

use capsule_db::queries::jobs;
use capsule_store::{ContentStore, StoreError};
use capsule_types::content::{ContentUnit, DownloadState};
use capsule_types::jobs::{DownloadJob, JobError, JobState};
use capsule_types::network::NetworkError;
use capsule_types::usage::Day;
use capsule_types::{JobId, DEFAULT_MAX_ATTEMPTS, DEFAULT_MAX_CONCURRENT};
use capsule_wallet::UsageLedger;
use tokio::sync::Mutex;
use tokio::task::{AbortHandle, Id as TaskId, JoinError, JoinSet};
use tracing::{debug, error, info, warn};

use crate::fetcher::{FetchFailure, Fetcher};
use crate::{Result, SchedulerError};

/// Scheduler tuning.
#[derive(Clone, Debug)]
pub struct SchedulerConfig {
    /// Transfers allowed to run at once (K).
    pub max_concurrent: usize,
    /// Attempts per job before it fails for good (N).
    pub max_attempts: u32,
    pub base_backoff_secs: u64,
    pub max_backoff_secs: u64,
    /// Deadline for a single transfer.
    pub transfer_timeout: Duration,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            max_concurrent: DEFAULT_MAX_CONCURRENT,
            max_attempts: DEFAULT_MAX_ATTEMPTS,
            base_backoff_secs: 30,
            max_backoff_secs: 3600,
            transfer_timeout: Duration::from_secs(120),
        }
    }
}

impl SchedulerConfig {
    /// Delay before the next attempt after `attempts` failures:
    /// `min(base * 2^(attempts - 1), max)`.
    pub fn backoff_secs(&self, attempts: u32) -> u64 {
        let exp = attempts.saturating_sub(1).min(63);
        self.base_backoff_secs
            .saturating_mul(1u64 << exp)
            .min(self.max_backoff_secs)
    }
}

/// What one `tick` or `settle` changed.
#[derive(Debug, Default)]
pub struct TickReport {
    /// Jobs dispatched to a transfer.
    pub started: Vec<JobId>,
    /// Finished jobs (state `Downloaded`) with the stored unit.
    pub completed: Vec<(DownloadJob, ContentUnit)>,
    /// Jobs put back in the queue, with their new `scheduled_at`.
    pub retried: Vec<(JobId, u64)>,
    /// Jobs that failed for good.
    pub failed: Vec<(DownloadJob, SchedulerError)>,
    /// Jobs dropped because their content unit no longer exists.
    pub dropped: Vec<JobId>,
}

impl TickReport {
    pub fn is_empty(&self) -> bool {
        self.started.is_empty()
            && self.completed.is_empty()
            && self.retried.is_empty()
            && self.failed.is_empty()
            && self.dropped.is_empty()
    }
}

type Transfer = (JobId, std::result::Result<Vec<u8>, FetchFailure>);

/// Owns every download job.
///
/// `tick` and `settle` take `&mut self`; callers drive the scheduler from a
/// single task.
pub struct DownloadScheduler {
    store: Arc<Mutex<ContentStore>>,
    ledger: Arc<Mutex<UsageLedger>>,
    fetcher: Arc<dyn Fetcher>,
    config: SchedulerConfig,
    jobs: BTreeMap<JobId, DownloadJob>,
    in_flight: JoinSet<Transfer>,
    aborts: HashMap<JobId, AbortHandle>,
    tasks: HashMap<TaskId, JobId>,
}

impl DownloadScheduler {
    /// Build a scheduler and resume the persisted queue.
    ///
    /// Jobs that were `Downloading` when the process stopped are queued
    /// again without spending an attempt.
    pub async fn restore(
        store: Arc<Mutex<ContentStore>>,
        ledger: Arc<Mutex<UsageLedger>>,
        fetcher: Arc<dyn Fetcher>,
        config: SchedulerConfig,
    ) -> Result<Self> {
        let mut restored = BTreeMap::new();
        {
            let guard = store.lock().await;
            for mut job in jobs::list(guard.db())? {
                if job.state == JobState::Downloading {
                    job.state = JobState::Queued;
                    jobs::upsert(guard.db(), &job)?;
                    if guard.find(&job.content_unit_id)?.is_some() {
                        guard.set_state(&job.content_unit_id, DownloadState::Queued)?;
                    }
                }
                restored.insert(job.id, job);
            }
        }

        if !restored.is_empty() {
            info!(jobs = restored.len(), "restored download queue");
        }

        Ok(Self {
            store,
            ledger,
            fetcher,
            config,
            jobs: restored,
            in_flight: JoinSet::new(),
            aborts: HashMap::new(),
            tasks: HashMap::new(),
        })
    }

    pub fn config(&self) -> &SchedulerConfig {
        &self.config
    }

    /// All known jobs in id order.
    pub fn jobs(&self) -> impl Iterator<Item = &DownloadJob> {
        self.jobs.values()
    }

    pub fn job(&self, id: JobId) -> Option<&DownloadJob> {
        self.jobs.get(&id)
    }

    /// Jobs currently transferring.
    pub fn downloading(&self) -> usize {
        self.jobs
            .values()
            .filter(|j| j.state == JobState::Downloading)
            .count()
    }

    /// Queue a download of `unit_id`.
    ///
    /// Rejected when the unit already has an active job or a downloaded
    /// copy that has not expired. An expired copy is discarded first. A
    /// previous failed job for the unit is replaced.
    pub async fn enqueue(&mut self, unit_id: &str, priority: i32, now: u64) -> Result<DownloadJob> {
        if self
            .jobs
            .values()
            .any(|j| j.content_unit_id == unit_id && j.state.is_active())
        {
            return Err(SchedulerError::AlreadyQueuedOrDownloaded(unit_id.to_string()));
        }

        let guard = self.store.lock().await;
        let unit = guard.get(unit_id)?;
        if unit.download_state == DownloadState::Downloaded {
            if !unit.is_expired(now) {
                return Err(SchedulerError::AlreadyQueuedOrDownloaded(unit_id.to_string()));
            }
            debug!(id = unit_id, "discarding expired copy before re-download");
            guard.discard_bytes(unit_id)?;
        }

        let stale: Vec<JobId> = self
            .jobs
            .values()
            .filter(|j| j.content_unit_id == unit_id)
            .map(|j| j.id)
            .collect();
        for id in stale {
            jobs::delete(guard.db(), id)?;
            self.jobs.remove(&id);
        }

        let job_id = jobs::allocate_id(guard.db())?;
        let job = DownloadJob::new(job_id, unit_id, priority, now);
        jobs::upsert(guard.db(), &job)?;
        guard.set_state(unit_id, DownloadState::Queued)?;
        drop(guard);

        info!(job = job.id, unit = unit_id, priority, "download queued");
        self.jobs.insert(job.id, job.clone());
        Ok(job)
    }

    /// One scheduling step.
    ///
    /// Applies finished transfers and forgets idle jobs whose unit was
    /// removed. Then, if `network_available`, starts the best eligible
    /// queued jobs while fewer than K are running. Order is highest
    /// priority, then earliest `scheduled_at`, then lowest id.
    pub async fn tick(&mut self, now: u64, network_available: bool) -> Result<TickReport> {
        let mut report = TickReport::default();

        while let Some(joined) = self.in_flight.try_join_next_with_id() {
            self.apply_joined(joined, now, &mut report).await?;
        }
        self.prune_orphans(&mut report).await?;

        if !network_available {
            return Ok(report);
        }

        while self.downloading() < self.config.max_concurrent {
            let Some(job_id) = self.next_eligible(now) else {
                break;
            };
            self.start(job_id, &mut report).await?;
        }

        Ok(report)
    }

    /// Wait for every running transfer and apply the results.
    pub async fn settle(&mut self, now: u64) -> Result<TickReport> {
        let mut report = TickReport::default();
        while let Some(joined) = self.in_flight.join_next_with_id().await {
            self.apply_joined(joined, now, &mut report).await?;
        }
        Ok(report)
    }

    /// Cancel a job. A running transfer is aborted and its partial data
    /// dropped. The job fails with `Cancelled` without spending an attempt.
    ///
    /// Cancelling a job that already failed returns it unchanged.
    pub async fn cancel(&mut self, job_id: JobId) -> Result<DownloadJob> {
        let mut job = self
            .jobs
            .get(&job_id)
            .cloned()
            .ok_or(SchedulerError::JobNotFound(job_id))?;
        if !job.state.is_active() {
            return Ok(job);
        }

        if let Some(handle) = self.aborts.remove(&job_id) {
            handle.abort();
        }

        job.state = JobState::Failed;
        job.last_error = Some(JobError::Cancelled);

        let guard = self.store.lock().await;
        jobs::upsert(guard.db(), &job)?;
        if guard.find(&job.content_unit_id)?.is_some() {
            guard.set_state(&job.content_unit_id, DownloadState::Failed)?;
        }
        drop(guard);

        info!(job = job_id, unit = %job.content_unit_id, "download cancelled");
        self.jobs.insert(job_id, job.clone());
        Ok(job)
    }

    async fn prune_orphans(&mut self, report: &mut TickReport) -> Result<()> {
        let guard = self.store.lock().await;
        let mut orphans = Vec::new();
        for job in self.jobs.values() {
            if self.aborts.contains_key(&job.id) {
                continue;
            }
            if guard.find(&job.content_unit_id)?.is_none() {
                orphans.push(job.id);
            }
        }
        for id in orphans {
            jobs::delete(guard.db(), id)?;
            self.jobs.remove(&id);
            debug!(job = id, "dropped job for removed content");
            report.dropped.push(id);
        }
        Ok(())
    }

    fn next_eligible(&self, now: u64) -> Option<JobId> {
        self.jobs
            .values()
            .filter(|j| j.is_eligible(now))
            .min_by(|a, b| {
                b.priority
                    .cmp(&a.priority)
                    .then(a.scheduled_at.cmp(&b.scheduled_at))
                    .then(a.id.cmp(&b.id))
            })
            .map(|j| j.id)
    }

    async fn start(&mut self, job_id: JobId, report: &mut TickReport) -> Result<()> {
        let Some(mut job) = self.jobs.get(&job_id).cloned() else {
            return Ok(());
        };

        let guard = self.store.lock().await;
        let Some(unit) = guard.find(&job.content_unit_id)? else {
            jobs::delete(guard.db(), job_id)?;
            drop(guard);
            debug!(job = job_id, unit = %job.content_unit_id, "content unit gone, dropping job");
            self.jobs.remove(&job_id);
            report.dropped.push(job_id);
            return Ok(());
        };

        job.state = JobState::Downloading;
        jobs::upsert(guard.db(), &job)?;
        guard.set_state(&unit.id, DownloadState::Downloading)?;
        drop(guard);

        let fetcher = Arc::clone(&self.fetcher);
        let limit = self.config.transfer_timeout;
        let handle = self.in_flight.spawn(async move {
            let result = match tokio::time::timeout(limit, fetcher.fetch(&unit)).await {
                Ok(result) => result,
                Err(_) => Err(FetchFailure::new(NetworkError::Timeout)),
            };
            (job_id, result)
        });
        self.tasks.insert(handle.id(), job_id);
        self.aborts.insert(job_id, handle);

        debug!(job = job_id, unit = %job.content_unit_id, attempt = job.attempts + 1, "download started");
        self.jobs.insert(job_id, job);
        report.started.push(job_id);
        Ok(())
    }

    async fn apply_joined(
        &mut self,
        joined: std::result::Result<(TaskId, Transfer), JoinError>,
        now: u64,
        report: &mut TickReport,
    ) -> Result<()> {
        let (job_id, result) = match joined {
            Ok((task, transfer)) => {
                self.tasks.remove(&task);
                transfer
            }
            Err(e) => {
                let Some(job_id) = self.tasks.remove(&e.id()) else {
                    return Ok(());
                };
                if e.is_cancelled() {
                    return Ok(());
                }
                error!(job = job_id, error = %e, "transfer task panicked");
                (job_id, Err(FetchFailure::new(NetworkError::Unavailable)))
            }
        };
        self.aborts.remove(&job_id);

        // A cancelled job may still deliver a result that raced the abort.
        let Some(job) = self.jobs.get(&job_id).cloned() else {
            return Ok(());
        };
        if job.state != JobState::Downloading {
            return Ok(());
        }

        match result {
            Ok(bytes) => self.complete(job, bytes, now, report).await,
            Err(failure) => self.fail_attempt(job, failure, now, report).await,
        }
    }

    async fn complete(
        &mut self,
        mut job: DownloadJob,
        bytes: Vec<u8>,
        now: u64,
        report: &mut TickReport,
    ) -> Result<()> {
        let guard = self.store.lock().await;
        let Some(mut unit) = guard.find(&job.content_unit_id)? else {
            jobs::delete(guard.db(), job.id)?;
            drop(guard);
            self.jobs.remove(&job.id);
            report.dropped.push(job.id);
            return Ok(());
        };
        let expected = unit.size_bytes;
        unit.refresh_lifetime(now, guard.ttl_for(unit.kind)?);

        match guard.put(&unit, &bytes) {
            Ok(stored) => {
                jobs::delete(guard.db(), job.id)?;
                drop(guard);

                job.state = JobState::Downloaded;
                job.last_error = None;
                self.jobs.remove(&job.id);
                info!(job = job.id, unit = %stored.id, bytes = bytes.len(), "download completed");

                self.ledger.lock().await.record(
                    Day::from_timestamp(now),
                    Some(stored.id.as_str()),
                    expected,
                    bytes.len() as u64,
                )?;
                report.completed.push((job, stored));
                Ok(())
            }
            Err(e) => {
                let last_error = match &e {
                    StoreError::QuotaExceeded { used, limit } => JobError::QuotaExceeded {
                        used: *used,
                        limit: *limit,
                    },
                    other => JobError::Store {
                        message: other.to_string(),
                    },
                };
                job.state = JobState::Failed;
                job.last_error = Some(last_error);
                jobs::upsert(guard.db(), &job)?;
                guard.set_state(&job.content_unit_id, DownloadState::Failed)?;
                drop(guard);

                error!(job = job.id, unit = %job.content_unit_id, error = %e, "download could not be stored");
                self.jobs.insert(job.id, job.clone());
                report.failed.push((job, SchedulerError::Store(e)));
                Ok(())
            }
        }
    }

    async fn fail_attempt(
        &mut self,
        mut job: DownloadJob,
        failure: FetchFailure,
        now: u64,
        report: &mut TickReport,
    ) -> Result<()> {
        job.attempts = job.attempts.saturating_add(1);

        let guard = self.store.lock().await;
        let unit = guard.find(&job.content_unit_id)?;
        let Some(unit) = unit else {
            jobs::delete(guard.db(), job.id)?;
            drop(guard);
            self.jobs.remove(&job.id);
            report.dropped.push(job.id);
            return Ok(());
        };

        let exhausted = job.attempts >= self.config.max_attempts;
        if exhausted {
            job.state = JobState::Failed;
            job.last_error = Some(JobError::MaxAttemptsExceeded {
                attempts: job.attempts,
                last: failure.error,
            });
            guard.set_state(&unit.id, DownloadState::Failed)?;
        } else {
            job.state = JobState::Queued;
            job.scheduled_at = now.saturating_add(self.config.backoff_secs(job.attempts));
            job.last_error = Some(JobError::from(failure.error));
            guard.set_state(&unit.id, DownloadState::Queued)?;
        }
        jobs::upsert(guard.db(), &job)?;
        drop(guard);

        self.jobs.insert(job.id, job.clone());
        if exhausted {
            error!(job = job.id, unit = %unit.id, attempts = job.attempts, error = %failure.error, "download failed");
            report.failed.push((
                job.clone(),
                SchedulerError::MaxAttemptsExceeded {
                    attempts: job.attempts,
                },
            ));
        } else {
            warn!(
                job = job.id,
                unit = %unit.id,
                attempts = job.attempts,
                retry_at = job.scheduled_at,
                error = %failure.error,
                "download attempt failed, retrying"
            );
            report.retried.push((job.id, job.scheduled_at));
        }

        if failure.bytes_transferred > 0 {
            self.ledger.lock().await.record(
                Day::from_timestamp(now),
                Some(unit.id.as_str()),
                unit.size_bytes,
                failure.bytes_transferred,
            )?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mock::{ScriptedFetcher, Step};
    use capsule_store::expiry::ExpiryEngine;
    use capsule_types::CAPSULE_TTL_SECS;

    struct Harness {
        _dir: tempfile::TempDir,
        store: Arc<Mutex<ContentStore>>,
        ledger: Arc<Mutex<UsageLedger>>,
        fetcher: Arc<ScriptedFetcher>,
        scheduler: DownloadScheduler,
    }

    async fn harness(config: SchedulerConfig) -> Harness {
        harness_with_limit(config, None).await
    }

    async fn harness_with_limit(config: SchedulerConfig, hard_limit: Option<u64>) -> Harness {
        let dir = tempfile::tempdir().expect("tempdir");
        let db_path = dir.path().join("capsule.db");
        let store = ContentStore::open(&db_path, dir.path().join("blobs"))
            .expect("store")
            .with_hard_limit(hard_limit);
        let ledger = UsageLedger::open(&db_path).expect("ledger");
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
        .expect("scheduler");
        Harness {
            _dir: dir,
            store,
            ledger,
            fetcher,
            scheduler,
        }
    }

    async fn discover(h: &Harness, unit: ContentUnit) {
        h.store.lock().await.discover(&unit).expect("discover");
    }

    async fn unit_state(h: &Harness, id: &str) -> DownloadState {
        h.store.lock().await.get(id).expect("get").download_state
    }

    #[test]
    fn test_backoff_doubles_and_caps() {
        let config = SchedulerConfig::default();
        assert_eq!(config.backoff_secs(1), 30);
        assert_eq!(config.backoff_secs(2), 60);
        assert_eq!(config.backoff_secs(3), 120);
        assert_eq!(config.backoff_secs(10), 3600);
        assert_eq!(config.backoff_secs(200), 3600);
    }

    #[tokio::test]
    async fn test_capsule_3_downloads_when_network_returns() {
        let mut h = harness(SchedulerConfig::default()).await;
        discover(&h, ContentUnit::capsule("capsule-3", "Capsule 3", 500_000, 0)).await;

        let job = h.scheduler.enqueue("capsule-3", 1, 100).await.expect("enqueue");

        let report = h.scheduler.tick(100, false).await.expect("offline tick");
        assert!(report.is_empty());
        assert_eq!(h.scheduler.job(job.id).map(|j| j.state), Some(JobState::Queued));
        assert_eq!(unit_state(&h, "capsule-3").await, DownloadState::Queued);

        let report = h.scheduler.tick(100, true).await.expect("online tick");
        assert_eq!(report.started, vec![job.id]);
        assert_eq!(h.scheduler.job(job.id).map(|j| j.state), Some(JobState::Downloading));

        let report = h.scheduler.settle(110).await.expect("settle");
        assert_eq!(report.completed.len(), 1);
        assert_eq!(report.completed[0].0.state, JobState::Downloaded);
        assert!(h.scheduler.job(job.id).is_none());

        let unit = h.store.lock().await.get("capsule-3").expect("get");
        assert_eq!(unit.download_state, DownloadState::Downloaded);
        assert_eq!(unit.size_bytes, 500_000);
        assert_eq!(unit.created_at, 110);
        assert_eq!(unit.expires_at, Some(110 + CAPSULE_TTL_SECS));

        let summary = h.ledger.lock().await.summary(Day::from_timestamp(110)).expect("summary");
        assert_eq!(summary.actual_total, 500_000);
    }

    #[tokio::test]
    async fn test_double_enqueue_rejected() {
        let mut h = harness(SchedulerConfig::default()).await;
        discover(&h, ContentUnit::capsule("c1", "C1", 10, 0)).await;

        h.scheduler.enqueue("c1", 0, 0).await.expect("first");
        let err = h.scheduler.enqueue("c1", 0, 0).await.expect_err("second");
        assert!(matches!(err, SchedulerError::AlreadyQueuedOrDownloaded(ref id) if id == "c1"));

        h.scheduler.tick(0, true).await.expect("tick");
        h.scheduler.settle(0).await.expect("settle");
        let err = h.scheduler.enqueue("c1", 0, 10).await.expect_err("fresh copy");
        assert!(matches!(err, SchedulerError::AlreadyQueuedOrDownloaded(_)));
    }

    #[tokio::test]
    async fn test_unknown_unit_is_not_found() {
        let mut h = harness(SchedulerConfig::default()).await;
        let err = h.scheduler.enqueue("ghost", 0, 0).await.expect_err("unknown");
        assert!(matches!(err, SchedulerError::Store(StoreError::NotFound(_))));
    }

    #[tokio::test]
    async fn test_expired_copy_can_be_downloaded_again() {
        let mut h = harness(SchedulerConfig::default()).await;
        discover(&h, ContentUnit::capsule("c1", "C1", 3, 0)).await;
        h.scheduler.enqueue("c1", 0, 0).await.expect("enqueue");
        h.scheduler.tick(0, true).await.expect("tick");
        h.scheduler.settle(0).await.expect("settle");

        let later = CAPSULE_TTL_SECS;
        h.scheduler.enqueue("c1", 0, later).await.expect("re-enqueue");
        let unit = h.store.lock().await.get("c1").expect("get");
        assert_eq!(unit.download_state, DownloadState::Queued);
        assert!(unit.local_path.is_none());
    }

    #[tokio::test]
    async fn test_attempts_capped_and_failure_is_permanent() {
        let config = SchedulerConfig {
            max_attempts: 3,
            ..SchedulerConfig::default()
        };
        let mut h = harness(config).await;
        discover(&h, ContentUnit::capsule("c1", "C1", 10, 0)).await;
        let fail = Step::Fail(FetchFailure::new(NetworkError::Unavailable));
        h.fetcher.push("c1", vec![fail; 10]).await;

        let job = h.scheduler.enqueue("c1", 0, 0).await.expect("enqueue");
        let mut now = 0;
        for _ in 0..10 {
            h.scheduler.tick(now, true).await.expect("tick");
            h.scheduler.settle(now).await.expect("settle");
            now += 10_000;
        }

        let failed = h.scheduler.job(job.id).expect("job kept").clone();
        assert_eq!(failed.state, JobState::Failed);
        assert_eq!(failed.attempts, 3);
        assert_eq!(
            failed.last_error,
            Some(JobError::MaxAttemptsExceeded {
                attempts: 3,
                last: NetworkError::Unavailable
            })
        );
        assert_eq!(h.fetcher.calls(), 3);
        assert_eq!(unit_state(&h, "c1").await, DownloadState::Failed);
    }

    #[tokio::test]
    async fn test_retry_waits_for_backoff() {
        let mut h = harness(SchedulerConfig::default()).await;
        discover(&h, ContentUnit::capsule("c1", "C1", 10, 0)).await;
        h.fetcher
            .push("c1", [Step::Fail(FetchFailure::with_transferred(NetworkError::Timeout, 4))])
            .await;

        let job = h.scheduler.enqueue("c1", 0, 1_000).await.expect("enqueue");
        h.scheduler.tick(1_000, true).await.expect("tick");
        let report = h.scheduler.settle(1_000).await.expect("settle");
        assert_eq!(report.retried, vec![(job.id, 1_030)]);

        assert!(h.scheduler.tick(1_029, true).await.expect("early").started.is_empty());
        assert_eq!(h.scheduler.tick(1_030, true).await.expect("due").started, vec![job.id]);

        // Partial bytes from the failed attempt are still counted.
        h.scheduler.settle(1_030).await.expect("settle");
        let summary = h.ledger.lock().await.summary(Day::from_timestamp(1_000)).expect("summary");
        assert_eq!(summary.actual_total, 14);
    }

    #[tokio::test]
    async fn test_at_most_k_downloading() {
        let mut h = harness(SchedulerConfig::default()).await;
        for id in ["a", "b", "c"] {
            discover(&h, ContentUnit::capsule(id, id, 1, 0)).await;
            h.fetcher.push(id, [Step::Hang]).await;
            h.scheduler.enqueue(id, 0, 0).await.expect("enqueue");
        }

        let report = h.scheduler.tick(0, true).await.expect("tick");
        assert_eq!(report.started.len(), 2);
        assert_eq!(h.scheduler.downloading(), 2);
        assert!(h.scheduler.tick(1, true).await.expect("tick").started.is_empty());
        assert_eq!(unit_state(&h, "c").await, DownloadState::Queued);
    }

    #[tokio::test]
    async fn test_priority_then_schedule_order() {
        let config = SchedulerConfig {
            max_concurrent: 1,
            ..SchedulerConfig::default()
        };
        let mut h = harness(config).await;
        for id in ["low", "high-late", "high-early"] {
            discover(&h, ContentUnit::capsule(id, id, 1, 0)).await;
        }
        h.scheduler.enqueue("low", 0, 0).await.expect("enqueue");
        let late = h.scheduler.enqueue("high-late", 5, 20).await.expect("enqueue");
        let early = h.scheduler.enqueue("high-early", 5, 10).await.expect("enqueue");

        let mut order = Vec::new();
        for _ in 0..3 {
            order.extend(h.scheduler.tick(100, true).await.expect("tick").started);
            h.scheduler.settle(100).await.expect("settle");
        }
        assert_eq!(order[..2], [early.id, late.id]);
    }

    #[tokio::test]
    async fn test_cancel_keeps_attempt_budget() {
        let mut h = harness(SchedulerConfig::default()).await;
        discover(&h, ContentUnit::capsule("c1", "C1", 10, 0)).await;
        h.fetcher.push("c1", [Step::Hang]).await;

        let job = h.scheduler.enqueue("c1", 0, 0).await.expect("enqueue");
        h.scheduler.tick(0, true).await.expect("tick");
        let cancelled = h.scheduler.cancel(job.id).await.expect("cancel");

        assert_eq!(cancelled.state, JobState::Failed);
        assert_eq!(cancelled.attempts, 0);
        assert_eq!(cancelled.last_error, Some(JobError::Cancelled));
        assert_eq!(unit_state(&h, "c1").await, DownloadState::Failed);
        assert_eq!(h.scheduler.downloading(), 0);

        let report = h.scheduler.settle(0).await.expect("settle aborted task");
        assert!(report.is_empty());

        let again = h.scheduler.enqueue("c1", 0, 1).await.expect("re-enqueue");
        assert_ne!(again.id, job.id);
        assert!(h.scheduler.job(job.id).is_none());
    }

    #[tokio::test]
    async fn test_cancel_unknown_job() {
        let mut h = harness(SchedulerConfig::default()).await;
        assert!(matches!(
            h.scheduler.cancel(42).await,
            Err(SchedulerError::JobNotFound(42))
        ));
    }

    #[tokio::test]
    async fn test_job_dropped_when_unit_removed() {
        let mut h = harness(SchedulerConfig::default()).await;
        discover(&h, ContentUnit::capsule("c1", "C1", 10, 0)).await;
        let job = h.scheduler.enqueue("c1", 0, 0).await.expect("enqueue");
        h.store.lock().await.remove("c1").expect("remove");

        let report = h.scheduler.tick(0, true).await.expect("tick");
        assert_eq!(report.dropped, vec![job.id]);
        assert!(h.scheduler.job(job.id).is_none());
    }

    #[tokio::test]
    async fn test_cancelled_job_forgotten_when_unit_removed() {
        let mut h = harness(SchedulerConfig::default()).await;
        discover(&h, ContentUnit::capsule("c1", "C1", 10, 0)).await;
        let job = h.scheduler.enqueue("c1", 0, 0).await.expect("enqueue");
        h.scheduler.cancel(job.id).await.expect("cancel");
        h.store.lock().await.remove("c1").expect("remove");

        let report = h.scheduler.tick(0, false).await.expect("tick");
        assert_eq!(report.dropped, vec![job.id]);
        assert_eq!(h.scheduler.jobs().count(), 0);
        let guard = h.store.lock().await;
        assert!(jobs::list(guard.db()).expect("list").is_empty());
    }

    #[tokio::test]
    async fn test_quota_exceeded_is_terminal() {
        let mut h = harness_with_limit(SchedulerConfig::default(), Some(5)).await;
        discover(&h, ContentUnit::capsule("big", "Big", 10, 0)).await;

        let job = h.scheduler.enqueue("big", 0, 0).await.expect("enqueue");
        h.scheduler.tick(0, true).await.expect("tick");
        let report = h.scheduler.settle(0).await.expect("settle");

        assert_eq!(report.failed.len(), 1);
        assert!(matches!(
            report.failed[0].1,
            SchedulerError::Store(StoreError::QuotaExceeded { limit: 5, .. })
        ));
        let failed = h.scheduler.job(job.id).expect("kept");
        assert_eq!(failed.attempts, 0);
        assert!(matches!(failed.last_error, Some(JobError::QuotaExceeded { .. })));
    }

    #[tokio::test]
    async fn test_transfer_timeout() {
        let config = SchedulerConfig {
            transfer_timeout: Duration::from_millis(20),
            ..SchedulerConfig::default()
        };
        let mut h = harness(config).await;
        discover(&h, ContentUnit::capsule("c1", "C1", 10, 0)).await;
        h.fetcher.push("c1", [Step::Hang]).await;

        let job = h.scheduler.enqueue("c1", 0, 0).await.expect("enqueue");
        h.scheduler.tick(0, true).await.expect("tick");
        h.scheduler.settle(0).await.expect("settle");

        let retried = h.scheduler.job(job.id).expect("job");
        assert_eq!(retried.state, JobState::Queued);
        assert_eq!(
            retried.last_error,
            Some(JobError::Network {
                error: NetworkError::Timeout
            })
        );
    }

    #[tokio::test]
    async fn test_restore_requeues_interrupted_downloads() {
        let dir = tempfile::tempdir().expect("tempdir");
        let db_path = dir.path().join("capsule.db");
        let open = || {
            let store = ContentStore::open(&db_path, dir.path().join("blobs")).expect("store");
            let ledger = UsageLedger::open(&db_path).expect("ledger");
            (Arc::new(Mutex::new(store)), Arc::new(Mutex::new(ledger)))
        };

        let job_id = {
            let (store, ledger) = open();
            store
                .lock()
                .await
                .discover(&ContentUnit::capsule("c1", "C1", 10, 0))
                .expect("discover");
            let fetcher = Arc::new(ScriptedFetcher::new());
            fetcher.push("c1", [Step::Hang]).await;
            let mut scheduler =
                DownloadScheduler::restore(store, ledger, fetcher, SchedulerConfig::default())
                    .await
                    .expect("scheduler");
            let job = scheduler.enqueue("c1", 3, 0).await.expect("enqueue");
            scheduler.tick(0, true).await.expect("tick");
            job.id
        };

        let (store, ledger) = open();
        let mut scheduler = DownloadScheduler::restore(
            Arc::clone(&store),
            ledger,
            Arc::new(ScriptedFetcher::new()),
            SchedulerConfig::default(),
        )
        .await
        .expect("restore");

        let job = scheduler.job(job_id).expect("restored").clone();
        assert_eq!(job.state, JobState::Queued);
        assert_eq!(job.priority, 3);
        assert_eq!(
            store.lock().await.get("c1").expect("get").download_state,
            DownloadState::Queued
        );

        scheduler.tick(0, true).await.expect("tick");
        scheduler.settle(0).await.expect("settle");
        let next = scheduler.enqueue("c1", 0, CAPSULE_TTL_SECS).await.expect("next id");
        assert!(next.id > job_id);
    }

    #[tokio::test]
    async fn test_job_ids_not_reused_after_restart() {
        let dir = tempfile::tempdir().expect("tempdir");
        let db_path = dir.path().join("capsule.db");
        let open = || {
            let store = ContentStore::open(&db_path, dir.path().join("blobs")).expect("store");
            let ledger = UsageLedger::open(&db_path).expect("ledger");
            (Arc::new(Mutex::new(store)), Arc::new(Mutex::new(ledger)))
        };

        let first = {
            let (store, ledger) = open();
            {
                let guard = store.lock().await;
                guard.discover(&ContentUnit::capsule("a", "A", 4, 0)).expect("discover");
                guard.discover(&ContentUnit::capsule("b", "B", 4, 0)).expect("discover");
            }
            let fetcher = Arc::new(ScriptedFetcher::new());
            fetcher.push("a", [Step::Bytes(vec![1; 4])]).await;
            let mut scheduler =
                DownloadScheduler::restore(store, ledger, fetcher, SchedulerConfig::default())
                    .await
                    .expect("scheduler");
            let job = scheduler.enqueue("a", 0, 0).await.expect("enqueue");
            scheduler.tick(0, true).await.expect("tick");
            let report = scheduler.settle(0).await.expect("settle");
            assert_eq!(report.completed.len(), 1);
            assert_eq!(scheduler.jobs().count(), 0);
            job.id
        };

        let (store, ledger) = open();
        let mut scheduler = DownloadScheduler::restore(
            store,
            ledger,
            Arc::new(ScriptedFetcher::new()),
            SchedulerConfig::default(),
        )
        .await
        .expect("restore");
        let second = scheduler.enqueue("b", 0, 0).await.expect("enqueue");
        assert!(second.id > first);
    }

    #[tokio::test]
    async fn test_sweep_skips_units_with_active_jobs() {
        let mut h = harness(SchedulerConfig::default()).await;
        discover(&h, ContentUnit::capsule("c1", "C1", 10, 0)).await;
        h.fetcher.push("c1", [Step::Hang]).await;
        h.scheduler.enqueue("c1", 0, 0).await.expect("enqueue");
        h.scheduler.tick(0, true).await.expect("tick");

        let evicted = ExpiryEngine::new(Some(0))
            .run_sweep_shared(&h.store, CAPSULE_TTL_SECS * 2)
            .await
            .expect("sweep");
        assert!(evicted.is_empty());
        assert_eq!(unit_state(&h, "c1").await, DownloadState::Downloading);
    }
}
