//! Expiry and eviction sweeps.
//!
//! Two policies run in one periodic pass:
//!
//! 1. **TTL**: every unit with `expires_at <= now` is removed.
//! 2. **Quota**: while downloaded bytes exceed the cap, the unit downloaded
//!    longest ago (`created_at`, ties by id) is removed.
//!
//! Units with an active download job (`Queued` or `Downloading`) are never
//! touched by either policy.

use std::collections::HashMap;

use capsule_types::content::{ContentUnit, DownloadState, UnitFilter};
use capsule_types::UnitId;
use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;
use tracing::{debug, info};

use crate::{ContentStore, Result};

/// Why a unit was chosen for eviction.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EvictionReason {
    Expired,
    OverQuota,
}

/// One planned removal.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Eviction {
    pub id: UnitId,
    pub reason: EvictionReason,
    /// Stored bytes released (0 for units without a local copy).
    pub bytes: u64,
}

/// Decide which units a sweep at `now` removes.
///
/// Pure function of the unit snapshot, the clock and the cap. TTL evictions
/// come first, then quota evictions oldest first.
pub fn plan_sweep(units: &[ContentUnit], now: u64, quota_bytes: Option<u64>) -> Vec<Eviction> {
    let stored = |u: &ContentUnit| {
        if u.download_state == DownloadState::Downloaded {
            u.size_bytes
        } else {
            0
        }
    };

    let mut plan: Vec<Eviction> = units
        .iter()
        .filter(|u| !u.download_state.has_active_job() && u.is_expired(now))
        .map(|u| Eviction {
            id: u.id.clone(),
            reason: EvictionReason::Expired,
            bytes: stored(u),
        })
        .collect();

    let Some(quota) = quota_bytes else {
        return plan;
    };

    let mut survivors: Vec<&ContentUnit> = units
        .iter()
        .filter(|u| u.download_state == DownloadState::Downloaded)
        .filter(|u| !plan.iter().any(|e| e.id == u.id))
        .collect();
    let mut used: u64 = survivors.iter().map(|u| u.size_bytes).sum();
    if used <= quota {
        return plan;
    }

    survivors.sort_by(|a, b| a.created_at.cmp(&b.created_at).then_with(|| a.id.cmp(&b.id)));
    for unit in survivors {
        if used <= quota {
            break;
        }
        used = used.saturating_sub(unit.size_bytes);
        plan.push(Eviction {
            id: unit.id.clone(),
            reason: EvictionReason::OverQuota,
            bytes: unit.size_bytes,
        });
    }

    plan
}

/// Applies [`plan_sweep`] to a content store.
#[derive(Clone, Copy, Debug, Default)]
pub struct ExpiryEngine {
    /// Cap on downloaded bytes. `None` disables quota eviction.
    pub quota_bytes: Option<u64>,
}

impl ExpiryEngine {
    pub fn new(quota_bytes: Option<u64>) -> Self {
        Self { quota_bytes }
    }

    /// Sweep a store the caller owns exclusively. Returns the evicted ids.
    pub fn run_sweep(&self, store: &ContentStore, now: u64) -> Result<Vec<UnitId>> {
        let units: Vec<ContentUnit> = store.list(None, &UnitFilter::default())?.collect();
        let plan = plan_sweep(&units, now, self.quota_bytes);

        let mut evicted = Vec::with_capacity(plan.len());
        for eviction in plan {
            store.remove(&eviction.id)?;
            log_eviction(&eviction);
            evicted.push(eviction.id);
        }
        Ok(evicted)
    }

    /// Sweep a store shared with the download scheduler.
    ///
    /// The plan is computed from a snapshot; each removal then re-locks the
    /// store and re-reads the unit, skipping it if a download started or
    /// completed since the snapshot was taken.
    pub async fn run_sweep_shared(
        &self,
        store: &Mutex<ContentStore>,
        now: u64,
    ) -> Result<Vec<UnitId>> {
        let snapshot: HashMap<UnitId, ContentUnit> = {
            let guard = store.lock().await;
            guard
                .list(None, &UnitFilter::default())?
                .map(|u| (u.id.clone(), u))
                .collect()
        };
        let units: Vec<ContentUnit> = snapshot.values().cloned().collect();
        let plan = plan_sweep(&units, now, self.quota_bytes);

        let mut evicted = Vec::with_capacity(plan.len());
        for eviction in plan {
            let guard = store.lock().await;
            let Some(current) = guard.find(&eviction.id)? else {
                continue;
            };
            let Some(planned) = snapshot.get(&eviction.id) else {
                continue;
            };
            if !still_evictable(planned, &current, eviction.reason, now) {
                debug!(id = %eviction.id, "unit changed since sweep was planned, skipping");
                continue;
            }
            if let (EvictionReason::OverQuota, Some(quota)) = (eviction.reason, self.quota_bytes) {
                if guard.used_bytes()? <= quota {
                    continue;
                }
            }
            guard.remove(&eviction.id)?;
            drop(guard);

            log_eviction(&eviction);
            evicted.push(eviction.id);
        }
        Ok(evicted)
    }
}

/// Re-check a planned eviction against the unit as it is now.
pub(crate) fn still_evictable(
    planned: &ContentUnit,
    current: &ContentUnit,
    reason: EvictionReason,
    now: u64,
) -> bool {
    if current.download_state.has_active_job() {
        return false;
    }
    match reason {
        EvictionReason::Expired => current.is_expired(now),
        EvictionReason::OverQuota => {
            current.download_state == DownloadState::Downloaded
                && current.created_at == planned.created_at
        }
    }
}

fn log_eviction(eviction: &Eviction) {
    info!(
        id = %eviction.id,
        reason = ?eviction.reason,
        bytes = eviction.bytes,
        "evicted content unit"
    );
}
