use std::sync::Arc;

use common::logger::init_logger;
use farewatch::{
    config::AppConfig,
    db::Db,
    monitor::Orchestrator,
    notify::{Notifier, UnconfiguredNotifier, WebhookNotifier},
    search::HttpFlightSearch,
    store::SqlxWatchStore,
    time::SystemClock,
};

/// Connects the DB, runs migrations and wraps the pool in the sqlx store.
async fn init_store(cfg: &AppConfig) -> anyhow::Result<Arc<SqlxWatchStore>> {
    let db = Db::connect(&cfg.database_url).await?;
    db.migrate().await?;

    Ok(Arc::new(SqlxWatchStore::new(db.pool.clone())))
}

fn init_notifier(cfg: &AppConfig) -> anyhow::Result<Arc<dyn Notifier>> {
    match &cfg.alert_webhook_url {
        Some(url) => Ok(Arc::new(WebhookNotifier::new(url.clone())?)),
        None => {
            tracing::warn!("ALERT_WEBHOOK_URL not set; alerts will not be delivered");
            Ok(Arc::new(UnconfiguredNotifier))
        }
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cfg = AppConfig::from_env();
    init_logger("farewatch", cfg.is_production);

    tracing::info!("Starting farewatch...");

    let store = init_store(&cfg).await?;

    if !cfg.enable_monitoring {
        tracing::info!("monitoring disabled (ENABLE_MONITORING=false)");
        tokio::signal::ctrl_c().await?;
        return Ok(());
    }

    let Some(search_url) = cfg.search_api_url.clone() else {
        anyhow::bail!("SEARCH_API_URL must be set when monitoring is enabled");
    };
    let search = Arc::new(HttpFlightSearch::new(
        search_url,
        cfg.search_api_key.clone(),
        cfg.monitor.search_timeout,
    )?);

    let orchestrator = Arc::new(Orchestrator::new(
        search,
        init_notifier(&cfg)?,
        store,
        Arc::new(SystemClock),
        cfg.monitor.clone(),
    ));

    let timer = orchestrator.start();

    tokio::signal::ctrl_c().await?;
    tracing::info!("Shutdown signal received");

    orchestrator.stop();
    timer.await?;

    Ok(())
}
