//! Alert gating: the per-offer decision predicate and the in-process
//! duplicate suppression layered on top of it.

pub mod decision;
pub mod dedup;

pub use decision::{Suppression, evaluate, resolved_cooldown, should_alert};
pub use dedup::{AlertKey, AlertRecord, DedupCache, DedupSummary};
