use std::str::FromStr;
use std::time::Duration;

use crate::alert::dedup::{DEFAULT_HARD_CAP, DEFAULT_SOFT_CAP};

/// Knobs of the monitoring loop itself.
///
/// Kept separate from [`AppConfig`] so an orchestrator can be built in tests
/// without touching the process environment.
#[derive(Clone, Debug)]
pub struct MonitorConfig {
    // =========================
    // Cadence
    // =========================
    /// Period of the cycle timer. Also the "due" interval: a watch is selected
    /// when it was never checked or last checked at least this long ago.
    pub interval: Duration,

    /// Delay between `start()` and the first cycle.
    ///
    /// Gives the store and collaborators time to warm up after a restart.
    pub initial_delay: Duration,

    /// Period of the operational report.
    pub report_interval: Duration,

    // =========================
    // Provider rate limiting
    // =========================
    /// Blocking wait between two date-pairs of the same watch.
    ///
    /// IMPORTANT:
    /// - this is a rate-limiting contract with the search provider
    /// - date-pairs are never queried in parallel
    pub search_delay: Duration,

    /// Blocking wait between two watches of the same cycle.
    pub watch_delay: Duration,

    /// Upper bound on a single search call. A timeout fails that date only.
    pub search_timeout: Duration,

    // =========================
    // Date sampling
    // =========================
    /// Sampler cap used by the live cycle.
    pub live_max_samples: usize,

    /// Sampler cap used by `preview_dates`.
    pub preview_max_samples: usize,

    /// Hard cap on date-pairs per watch per check.
    ///
    /// Without it a round-trip watch costs up to `live_max_samples²` calls.
    pub max_date_pairs: usize,

    // =========================
    // Dedup cache
    // =========================
    pub dedup_soft_cap: usize,
    pub dedup_hard_cap: usize,
}

impl Default for MonitorConfig {
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(30 * 60),
            initial_delay: Duration::from_secs(60),
            report_interval: Duration::from_secs(24 * 60 * 60),

            search_delay: Duration::from_millis(2_000),
            watch_delay: Duration::from_millis(5_000),
            search_timeout: Duration::from_secs(30),

            live_max_samples: 5,
            preview_max_samples: 3,
            max_date_pairs: 10,

            dedup_soft_cap: DEFAULT_SOFT_CAP,
            dedup_hard_cap: DEFAULT_HARD_CAP,
        }
    }
}

#[derive(Clone, Debug)]
pub struct AppConfig {
    /// Database connection string.
    pub database_url: String,

    /// `APP_ENV=production` switches logs to JSON.
    pub is_production: bool,

    /// When false the process runs without the monitoring loop.
    pub enable_monitoring: bool,

    /// Base URL of the flight-search provider. Without it the loop can't run.
    pub search_api_url: Option<String>,

    /// Sent as the `apikey` header when present.
    pub search_api_key: Option<String>,

    /// Alert/report webhook. Without it every delivery reports "not delivered".
    pub alert_webhook_url: Option<String>,

    pub monitor: MonitorConfig,
}

impl AppConfig {
    pub fn from_env() -> Self {
        let database_url = std::env::var("DATABASE_URL")
            .unwrap_or_else(|_| "sqlite://farewatch_dev.db?mode=rwc".to_string());

        let defaults = MonitorConfig::default();

        let monitor = MonitorConfig {
            interval: Duration::from_secs(60 * env_or("MONITORING_INTERVAL", 30u64)),
            initial_delay: Duration::from_secs(env_or("MONITORING_INITIAL_DELAY_SECS", 60u64)),
            report_interval: Duration::from_secs(60 * 60 * env_or("REPORT_INTERVAL_HOURS", 24u64)),

            search_delay: Duration::from_millis(env_or("SEARCH_DELAY_MS", 2_000u64)),
            watch_delay: Duration::from_millis(env_or("WATCH_DELAY_MS", 5_000u64)),
            search_timeout: Duration::from_secs(env_or("SEARCH_TIMEOUT_SECS", 30u64)),

            live_max_samples: env_or("LIVE_MAX_SAMPLES", defaults.live_max_samples),
            preview_max_samples: env_or("PREVIEW_MAX_SAMPLES", defaults.preview_max_samples),
            max_date_pairs: env_or("MAX_DATE_PAIRS", defaults.max_date_pairs),

            dedup_soft_cap: env_or("DEDUP_SOFT_CAP", defaults.dedup_soft_cap),
            dedup_hard_cap: env_or("DEDUP_HARD_CAP", defaults.dedup_hard_cap),
        };

        Self {
            database_url,
            is_production: std::env::var("APP_ENV").unwrap_or_default() == "production",
            enable_monitoring: env_or("ENABLE_MONITORING", true),
            search_api_url: non_empty("SEARCH_API_URL"),
            search_api_key: non_empty("SEARCH_API_KEY"),
            alert_webhook_url: non_empty("ALERT_WEBHOOK_URL"),
            monitor,
        }
    }
}

fn env_or<T: FromStr>(key: &str, default: T) -> T {
    std::env::var(key)
        .ok()
        .and_then(|v| v.trim().parse().ok())
        .unwrap_or(default)
}

fn non_empty(key: &str) -> Option<String> {
    std::env::var(key).ok().filter(|v| !v.trim().is_empty())
}
