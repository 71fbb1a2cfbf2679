//! Content catalog and local storage command handlers.

use std::sync::Arc;

use capsule_types::content::{ContentKind, ContentUnit, DownloadState, UnitFilter};
use capsule_types::events::EventType;
use serde_json::Value;
use tracing::info;

use super::{opt_param, param, str_param, to_json};
use crate::day;
use crate::rpc::RpcError;
use crate::DaemonState;

type Result = std::result::Result<Value, RpcError>;

/// List content units, optionally by kind, state and title.
pub async fn list_content(state: &Arc<DaemonState>, params: &Value) -> Result {
    let kind: Option<ContentKind> = opt_param(params, "kind")?;
    let filter = UnitFilter {
        state: opt_param(params, "state")?,
        title_contains: opt_param(params, "title_contains")?,
    };

    let store = state.store.lock().await;
    let units: Vec<ContentUnit> = store.list(kind, &filter)?.collect();
    to_json(&units)
}

/// Get one content unit.
pub async fn get_content(state: &Arc<DaemonState>, params: &Value) -> Result {
    let id = str_param(params, "id")?;
    let unit = state.store.lock().await.get(id)?;
    to_json(&unit)
}

/// Register catalog metadata for a unit, e.g. a teacher upload.
pub async fn discover_content(state: &Arc<DaemonState>, params: &Value) -> Result {
    let id = str_param(params, "id")?;
    let title = str_param(params, "title")?;
    let kind: ContentKind = param(params, "kind")?;
    let size_bytes: u64 = param(params, "size_bytes")?;
    if id.is_empty() {
        return Err(RpcError::invalid_params("id must not be empty"));
    }

    let mut unit = ContentUnit::new(id, kind, title, size_bytes, day::now_secs(), None);
    unit.source_url = opt_param(params, "source_url")?;

    let store = state.store.lock().await;
    let discovered = store.discover(&unit)?;
    let unit = store.get(id)?;
    drop(store);

    if discovered {
        state.event_bus.publish(
            EventType::ContentDiscovered,
            serde_json::json!({ "unit_id": id, "kind": kind }),
        );
    }

    Ok(serde_json::json!({
        "discovered": discovered,
        "unit": to_json(&unit)?,
    }))
}

/// Remove a unit and its bytes. Active downloads of it are cancelled first.
pub async fn remove_content(state: &Arc<DaemonState>, params: &Value) -> Result {
    let id = str_param(params, "id")?;
    cancel_active_jobs(state, id).await?;

    let removed = state.store.lock().await.remove(id)?;
    if removed {
        info!(unit = id, "content removed");
        state.event_bus.publish(
            EventType::ContentRemoved,
            serde_json::json!({ "unit_id": id }),
        );
    }
    Ok(serde_json::json!({ "removed": removed }))
}

/// Cache or un-cache a resource.
///
/// Caching queues a download. Un-caching cancels any active download and
/// drops the stored bytes while keeping the catalog entry.
pub async fn set_resource_caching(state: &Arc<DaemonState>, params: &Value) -> Result {
    let id = str_param(params, "id")?;
    let cached: bool = param(params, "cached")?;

    if cached {
        let priority: i32 = opt_param(params, "priority")?.unwrap_or(0);
        let job = super::downloads::enqueue(state, id, priority).await?;
        return Ok(serde_json::json!({ "cached": true, "job": to_json(&job)? }));
    }

    cancel_active_jobs(state, id).await?;
    let store = state.store.lock().await;
    let unit = store.get(id)?;
    if unit.download_state != DownloadState::NotDownloaded {
        store.discard_bytes(id)?;
        info!(unit = id, "cached copy removed");
    }
    let unit = store.get(id)?;
    drop(store);

    state.event_bus.publish(
        EventType::ContentRemoved,
        serde_json::json!({ "unit_id": id, "catalog_kept": true }),
    );
    Ok(serde_json::json!({ "cached": false, "unit": to_json(&unit)? }))
}

/// Toggle the 7-day lifetime for cached resources.
pub async fn set_auto_delete_resources(state: &Arc<DaemonState>, params: &Value) -> Result {
    let enabled: bool = param(params, "enabled")?;
    let updated = state.store.lock().await.set_auto_delete_resources(enabled)?;
    Ok(serde_json::json!({ "enabled": enabled, "updated": updated }))
}

/// Stored bytes against the soft quota and hard limit.
pub async fn get_storage_usage(state: &Arc<DaemonState>) -> Result {
    let store = state.store.lock().await;
    Ok(serde_json::json!({
        "used_bytes": store.used_bytes()?,
        "quota_bytes": state.expiry.quota_bytes,
        "hard_limit_bytes": store.hard_limit_bytes(),
        "auto_delete_resources": store.auto_delete_resources()?,
    }))
}

async fn cancel_active_jobs(state: &Arc<DaemonState>, unit_id: &str) -> std::result::Result<(), RpcError> {
    let mut scheduler = state.scheduler.lock().await;
    let active: Vec<_> = scheduler
        .jobs()
        .filter(|j| j.content_unit_id == unit_id && j.state.is_active())
        .map(|j| j.id)
        .collect();
    for job_id in active {
        scheduler.cancel(job_id).await?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tests::test_state;

    async fn discover(state: &Arc<DaemonState>, id: &str, kind: &str, size: u64) {
        discover_content(
            state,
            &serde_json::json!({"id": id, "kind": kind, "title": id, "size_bytes": size}),
        )
        .await
        .expect("discover");
    }

    #[tokio::test]
    async fn test_discover_and_list() {
        let (state, _dir) = test_state().await;
        discover(&state, "capsule-1", "capsule", 10).await;
        discover(&state, "Week1_Notes.pdf", "resource", 20).await;

        let again = discover_content(
            &state,
            &serde_json::json!({"id": "capsule-1", "kind": "capsule", "title": "x", "size_bytes": 1}),
        )
        .await
        .expect("rediscover");
        assert_eq!(again["discovered"], false);

        let all = list_content(&state, &serde_json::json!({})).await.expect("list");
        assert_eq!(all.as_array().map(Vec::len), Some(2));

        let resources = list_content(&state, &serde_json::json!({"kind": "resource"}))
            .await
            .expect("list");
        assert_eq!(resources[0]["id"], "Week1_Notes.pdf");
        assert_eq!(resources[0]["expires_at"], Value::Null);

        let capsule = get_content(&state, &serde_json::json!({"id": "capsule-1"}))
            .await
            .expect("get");
        assert!(capsule["expires_at"].is_u64());
    }

    #[tokio::test]
    async fn test_get_unknown_is_not_found() {
        let (state, _dir) = test_state().await;
        let err = get_content(&state, &serde_json::json!({"id": "nope"}))
            .await
            .expect_err("missing");
        assert_eq!(err.code, RpcError::not_found("nope").code);
    }

    #[tokio::test]
    async fn test_remove_cancels_queued_download() {
        let (state, _dir) = test_state().await;
        discover(&state, "capsule-3", "capsule", 500_000).await;
        super::super::downloads::enqueue(&state, "capsule-3", 1)
            .await
            .expect("enqueue");

        let removed = remove_content(&state, &serde_json::json!({"id": "capsule-3"}))
            .await
            .expect("remove");
        assert_eq!(removed["removed"], true);

        let scheduler = state.scheduler.lock().await;
        assert!(scheduler.jobs().all(|j| !j.state.is_active()));
    }

    #[tokio::test]
    async fn test_uncache_keeps_catalog_entry() {
        let (state, _dir) = test_state().await;
        discover(&state, "Week1_Notes.pdf", "resource", 42).await;

        let cached = set_resource_caching(
            &state,
            &serde_json::json!({"id": "Week1_Notes.pdf", "cached": true}),
        )
        .await
        .expect("cache");
        assert_eq!(cached["job"]["state"], "queued");

        let uncached = set_resource_caching(
            &state,
            &serde_json::json!({"id": "Week1_Notes.pdf", "cached": false}),
        )
        .await
        .expect("uncache");
        assert_eq!(uncached["unit"]["download_state"], "not_downloaded");
    }

    #[tokio::test]
    async fn test_auto_delete_toggle_sets_resource_expiry() {
        let (state, _dir) = test_state().await;
        discover(&state, "r1", "resource", 1).await;

        let result = set_auto_delete_resources(&state, &serde_json::json!({"enabled": true}))
            .await
            .expect("toggle");
        assert_eq!(result["updated"], 1);

        let unit = get_content(&state, &serde_json::json!({"id": "r1"})).await.expect("get");
        assert!(unit["expires_at"].is_u64());

        let usage = get_storage_usage(&state).await.expect("usage");
        assert_eq!(usage["used_bytes"], 0);
        assert_eq!(usage["auto_delete_resources"], true);
    }
}
