//! Download queue command handlers and scheduler event publishing.

use std::sync::Arc;

use capsule_sched::{SchedulerError, TickReport};
use capsule_store::StoreError;
use capsule_types::app::{Action, Dialog};
use capsule_types::events::EventType;
use capsule_types::jobs::DownloadJob;
use serde_json::Value;
use tracing::{info, warn};

use super::{opt_param, param, str_param, to_json};
use crate::day;
use crate::rpc::RpcError;
use crate::DaemonState;

type Result = std::result::Result<Value, RpcError>;

/// Queue a download of a content unit.
pub async fn enqueue_download(state: &Arc<DaemonState>, params: &Value) -> Result {
    let id = str_param(params, "id")?;
    let priority: i32 = opt_param(params, "priority")?.unwrap_or(0);
    let job = enqueue(state, id, priority).await?;
    to_json(&job)
}

/// Cancel a queued or running download.
pub async fn cancel_download(state: &Arc<DaemonState>, params: &Value) -> Result {
    let job_id: u64 = param(params, "job_id")?;
    let job = state.scheduler.lock().await.cancel(job_id).await?;
    to_json(&job)
}

/// All jobs the scheduler knows about, highest priority first.
pub async fn get_download_jobs(state: &Arc<DaemonState>) -> Result {
    let scheduler = state.scheduler.lock().await;
    let mut jobs: Vec<&DownloadJob> = scheduler.jobs().collect();
    jobs.sort_by(|a, b| b.priority.cmp(&a.priority).then(a.id.cmp(&b.id)));
    to_json(&jobs)
}

pub(crate) async fn enqueue(
    state: &Arc<DaemonState>,
    unit_id: &str,
    priority: i32,
) -> std::result::Result<DownloadJob, RpcError> {
    let job = state
        .scheduler
        .lock()
        .await
        .enqueue(unit_id, priority, day::now_secs())
        .await?;
    state.event_bus.publish(
        EventType::DownloadQueued,
        serde_json::json!({ "unit_id": unit_id, "job_id": job.id, "priority": priority }),
    );
    Ok(job)
}

/// Turn one scheduler step into events. A quota failure also opens the
/// quota dialog.
pub async fn publish_report(state: &Arc<DaemonState>, report: &TickReport) {
    if report.is_empty() {
        return;
    }
    let bus = &state.event_bus;

    for job_id in &report.started {
        bus.publish(
            EventType::DownloadStarted,
            serde_json::json!({ "job_id": job_id }),
        );
    }

    for (job, unit) in &report.completed {
        bus.publish(
            EventType::DownloadCompleted,
            serde_json::json!({
                "unit_id": unit.id,
                "job_id": job.id,
                "size_bytes": unit.size_bytes,
                "attempts": job.attempts,
            }),
        );
    }

    for (job_id, retry_at) in &report.retried {
        bus.publish(
            EventType::DownloadRetryScheduled,
            serde_json::json!({ "job_id": job_id, "retry_at": retry_at }),
        );
    }

    let mut quota_hit = false;
    for (job, error) in &report.failed {
        bus.publish(
            EventType::DownloadFailed,
            serde_json::json!({
                "unit_id": job.content_unit_id,
                "job_id": job.id,
                "attempts": job.attempts,
                "error": error.to_string(),
            }),
        );
        if let SchedulerError::Store(StoreError::QuotaExceeded { used, limit }) = error {
            quota_hit = true;
            bus.publish(
                EventType::QuotaExceeded,
                serde_json::json!({ "unit_id": job.content_unit_id, "used": used, "limit": limit }),
            );
        }
    }

    if !report.dropped.is_empty() {
        info!(dropped = ?report.dropped, "dropped jobs for removed content");
    }

    if quota_hit {
        if let Err(e) = state
            .dispatch(&Action::OpenDialog {
                dialog: Dialog::QuotaExceeded,
            })
            .await
        {
            warn!(error = %e, "failed to open quota dialog");
        }
    }
}
