//! Scripted fetcher for tests and local demos.

use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicUsize, Ordering};

use async_trait::async_trait;
use capsule_types::content::ContentUnit;
use capsule_types::UnitId;
use tokio::sync::Mutex;

use crate::fetcher::{FetchFailure, Fetcher};

/// One scripted fetch outcome.
#[derive(Clone, Debug)]
pub enum Step {
    Bytes(Vec<u8>),
    Fail(FetchFailure),
    /// Never completes; only cancellation or a timeout ends it.
    Hang,
}

/// Replays scripted outcomes per unit.
///
/// Units without a script (or whose script ran out) receive `size_bytes`
/// zero bytes.
#[derive(Debug, Default)]
pub struct ScriptedFetcher {
    script: Mutex<HashMap<UnitId, VecDeque<Step>>>,
    calls: AtomicUsize,
}

impl ScriptedFetcher {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append outcomes for `unit_id`, consumed one per fetch.
    pub async fn push(&self, unit_id: &str, steps: impl IntoIterator<Item = Step>) {
        self.script
            .lock()
            .await
            .entry(unit_id.to_string())
            .or_default()
            .extend(steps);
    }

    /// Number of fetches started so far.
    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Fetcher for ScriptedFetcher {
    async fn fetch(&self, unit: &ContentUnit) -> Result<Vec<u8>, FetchFailure> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let step = self
            .script
            .lock()
            .await
            .get_mut(&unit.id)
            .and_then(VecDeque::pop_front);

        match step {
            Some(Step::Bytes(bytes)) => Ok(bytes),
            Some(Step::Fail(failure)) => Err(failure),
            Some(Step::Hang) => std::future::pending().await,
            None => Ok(vec![0u8; usize::try_from(unit.size_bytes).unwrap_or(0)]),
        }
    }
}
