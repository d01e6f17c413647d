pub mod alert;
pub mod config;
pub mod db;
pub mod metrics;
pub mod model;
pub mod monitor;
pub mod notify;
pub mod sampler;
pub mod search;
pub mod stats;
pub mod store;

pub mod error;
pub mod logger;
pub mod time;
