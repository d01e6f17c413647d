pub mod counters;

pub use counters::{Counters, MonitoringReport, MonitoringStats};
