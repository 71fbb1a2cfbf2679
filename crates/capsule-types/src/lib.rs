//! # capsule-types
//!
//! Shared domain types used across the Capsule workspace: content units and
//! their download lifecycle, download jobs, Data Wallet usage records, daemon
//! events and the UI-facing application state.
//!
//! Every timestamp is Unix epoch seconds (`u64`). Day keys count whole days
//! since the Unix epoch (see [`usage::Day`]).

pub mod app;
pub mod content;
pub mod events;
pub mod jobs;
pub mod network;
pub mod usage;

/// Identifier of a content unit (capsule or resource).
pub type UnitId = String;

/// Identifier of a download job.
pub type JobId = u64;

/// Seconds in one day.
pub const DAY_SECS: u64 = 86_400;

/// Lifetime of a downloaded capsule before auto-delete (7 days).
pub const CAPSULE_TTL_SECS: u64 = 7 * DAY_SECS;

/// Default cap on download attempts per job.
pub const DEFAULT_MAX_ATTEMPTS: u32 = 5;

/// Default number of transfers allowed to run at the same time.
pub const DEFAULT_MAX_CONCURRENT: usize = 2;

#[cfg(test)]
mod tests {
    #[test]
    #[ignore] // Run manually to generate bindings
    fn export_ts_bindings() {
        use ts_rs::TS;
        let dir = std::path::Path::new(env!("CARGO_MANIFEST_DIR")).join("../../bindings");
        std::fs::create_dir_all(&dir).expect("create bindings dir");
        crate::content::ContentUnit::export_all_to(&dir).expect("export ContentUnit");
        crate::jobs::DownloadJob::export_all_to(&dir).expect("export DownloadJob");
        crate::usage::WalletReport::export_all_to(&dir).expect("export WalletReport");
        crate::events::Event::export_all_to(&dir).expect("export Event");
        crate::app::AppState::export_all_to(&dir).expect("export AppState");
    }
}
