//! Monitoring cycle: timer, single-worker guard and the per-watch check.

pub mod orchestrator;

pub use orchestrator::{CycleOutcome, CycleSummary, DatePreview, Orchestrator, WatchCheck};
