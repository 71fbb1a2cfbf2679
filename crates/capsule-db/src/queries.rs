//! Database query functions organized by domain.

pub mod jobs;
pub mod settings;
pub mod units;
pub mod usage;
