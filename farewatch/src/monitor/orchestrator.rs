//! Monitoring orchestrator.
//!
//! Responsibilities:
//! - Run one cycle per timer tick: select due watches, check them one by one.
//! - Keep a single worker: an overlapping tick is skipped, never queued.
//! - Query the search collaborator sequentially with fixed delays (provider rate limit).
//! - Gate alerts through the decision engine and the dedup cache, and apply
//!   alert side effects only after the notifier confirms delivery.
//! - Persist the watch, recovering once from stats rejected by the store.
//!
//! Failure isolation:
//! - A failing date-pair is logged and the remaining pairs still run.
//! - A failing watch is logged and the remaining watches still run.
//! - A failing selection aborts the cycle; the next tick starts from scratch.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use chrono::{DateTime, NaiveDate, Utc};
use common::logger::{TraceId, child_span, root_span};
use serde::Serialize;
use tokio::sync::watch;
use tokio::task::{JoinHandle, JoinSet};
use tokio::time::{Instant, MissedTickBehavior};
use tracing::{Instrument, debug, error, info, instrument, warn};
use uuid::Uuid;

use crate::alert::{AlertKey, DedupCache, DedupSummary, evaluate, resolved_cooldown};
use crate::config::MonitorConfig;
use crate::error::{MonitorError, SearchError};
use crate::logger::{annotate_span, warn_if_slow};
use crate::metrics::{Counters, MonitoringReport, MonitoringStats};
use crate::model::{BestPrice, Offer, SearchQuery, Watch};
use crate::notify::Notifier;
use crate::sampler::{date_pairs, sample};
use crate::search::FlightSearch;
use crate::stats::{self, is_sane_price};
use crate::store::WatchStore;
use crate::time::Clock;

const SLOW_STORE_CALL: Duration = Duration::from_millis(500);

/// tokio intervals panic on a zero period.
const MIN_PERIOD: Duration = Duration::from_secs(1);

/// Result of one timer tick.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum CycleOutcome {
    /// Another cycle was in flight.
    Skipped,
    /// Selecting due watches failed; nothing was checked.
    Aborted,
    Completed(CycleSummary),
}

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct CycleSummary {
    pub selected: usize,
    pub checked: usize,
    pub failed: usize,
    pub alerts: usize,
}

/// Result of checking a single watch.
#[derive(Clone, Debug, PartialEq)]
pub struct WatchCheck {
    pub watch_id: Uuid,
    pub offers_found: usize,
    /// Cheapest sane price across all date-pairs of this check.
    pub candidate_amount: Option<f64>,
    pub alert_sent: bool,
}

/// What a check of a watch would query, without querying it.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct DatePreview {
    pub outbound: Vec<NaiveDate>,
    pub inbound: Option<Vec<NaiveDate>>,
    pub combinations: usize,
    /// Time spent in inter-request delays alone.
    pub estimated_duration: Duration,
}

/// Releases the single-worker flag when dropped, including on panic.
struct RunGuard<'a>(&'a AtomicBool);

impl<'a> RunGuard<'a> {
    fn try_acquire(flag: &'a AtomicBool) -> Option<Self> {
        flag.compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .ok()
            .map(|_| Self(flag))
    }
}

impl Drop for RunGuard<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}

/// Explicitly constructed monitoring service. Collaborators are injected;
/// the process entry point owns the start/stop lifecycle.
pub struct Orchestrator {
    search: Arc<dyn FlightSearch>,
    notifier: Arc<dyn Notifier>,
    store: Arc<dyn WatchStore>,
    clock: Arc<dyn Clock>,

    cfg: MonitorConfig,

    /// Process-local; losing it on restart costs at most one redundant send.
    dedup: DedupCache,

    /// Observability counters (does not affect behavior).
    counters: Counters,

    is_running: AtomicBool,
    shutdown: watch::Sender<bool>,
}

impl Orchestrator {
    pub fn new(
        search: Arc<dyn FlightSearch>,
        notifier: Arc<dyn Notifier>,
        store: Arc<dyn WatchStore>,
        clock: Arc<dyn Clock>,
        cfg: MonitorConfig,
    ) -> Self {
        let dedup = DedupCache::new(cfg.dedup_soft_cap, cfg.dedup_hard_cap);
        let (shutdown, _) = watch::channel(false);

        Self {
            search,
            notifier,
            store,
            clock,
            cfg,
            dedup,
            counters: Counters::default(),
            is_running: AtomicBool::new(false),
            shutdown,
        }
    }

    pub fn config(&self) -> &MonitorConfig {
        &self.cfg
    }

    pub fn is_running(&self) -> bool {
        self.is_running.load(Ordering::Acquire)
    }

    /// Starts the timer loop: first cycle after `initial_delay`, then every
    /// `interval`; the operational report every `report_interval`.
    ///
    /// Each tick spawns its cycle so that a slow cycle does not delay the
    /// timer; the overlap is then detected (and dropped) by `run_cycle`.
    /// The returned handle resolves once the timer has stopped and every
    /// spawned cycle and report has finished.
    pub fn start(self: &Arc<Self>) -> JoinHandle<()> {
        let this = Arc::clone(self);
        let mut shutdown = self.shutdown.subscribe();
        // a previous stop() must not end a fresh loop
        self.shutdown.send_replace(false);
        let _ = shutdown.borrow_and_update();

        info!(
            interval_secs = this.cfg.interval.as_secs(),
            initial_delay_secs = this.cfg.initial_delay.as_secs(),
            "monitoring started"
        );

        tokio::spawn(async move {
            tokio::select! {
                _ = tokio::time::sleep(this.cfg.initial_delay) => {}
                _ = shutdown.changed() => {
                    info!("monitoring stopped before the first cycle");
                    return;
                }
            }

            let mut ticker = tokio::time::interval(this.cfg.interval.max(MIN_PERIOD));
            ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

            let report_period = this.cfg.report_interval.max(MIN_PERIOD);
            let mut reports = tokio::time::interval_at(Instant::now() + report_period, report_period);
            reports.set_missed_tick_behavior(MissedTickBehavior::Skip);

            let mut in_flight = JoinSet::new();

            loop {
                // reap finished tasks so the set stays small
                while in_flight.try_join_next().is_some() {}

                tokio::select! {
                    _ = ticker.tick() => {
                        let cycle = Arc::clone(&this);
                        in_flight.spawn(async move {
                            cycle.run_cycle().await;
                        });
                    }
                    _ = reports.tick() => {
                        let report = Arc::clone(&this);
                        in_flight.spawn(async move {
                            if let Err(e) = report.send_daily_report().await {
                                error!(error = %e, "daily report failed");
                            }
                        });
                    }
                    _ = shutdown.changed() => break,
                }
            }

            info!(pending = in_flight.len(), "monitoring timer stopped; waiting for in-flight work");
            while let Some(res) = in_flight.join_next().await {
                if let Err(e) = res {
                    error!(error = %e, "monitoring task panicked");
                }
            }
            info!("monitoring stopped");
        })
    }

    /// Prevents new cycles from being scheduled. A cycle in flight runs to
    /// completion; await the handle from `start` to wait for it.
    pub fn stop(&self) {
        self.shutdown.send_replace(true);
        info!("monitoring stop requested");
    }

    /// One full pass over all due watches. Never returns an error: failures
    /// are logged and counted.
    pub async fn run_cycle(&self) -> CycleOutcome {
        let Some(_guard) = RunGuard::try_acquire(&self.is_running) else {
            Counters::incr(&self.counters.skipped_overlaps);
            warn!(target: "monitor", "previous cycle still running; skipping tick");
            return CycleOutcome::Skipped;
        };

        let trace_id = TraceId::default();
        self.run_cycle_locked()
            .instrument(root_span("monitoring_cycle", &trace_id))
            .await
    }

    async fn run_cycle_locked(&self) -> CycleOutcome {
        let now = self.clock.now();
        self.counters.set_last_run(now);
        Counters::incr(&self.counters.cycles);

        let interval = chrono::Duration::from_std(self.cfg.interval)
            .unwrap_or_else(|_| chrono::Duration::minutes(30));

        let watches = match warn_if_slow(
            "find_due_watches",
            SLOW_STORE_CALL,
            self.store.find_due_watches(now, interval),
        )
        .await
        {
            Ok(w) => w,
            Err(e) => {
                Counters::incr(&self.counters.errors_today);
                error!(target: "monitor", error = %e, "selecting due watches failed; cycle aborted");
                return CycleOutcome::Aborted;
            }
        };

        let mut summary = CycleSummary {
            selected: watches.len(),
            ..CycleSummary::default()
        };
        info!(target: "monitor", due = summary.selected, "monitoring cycle started");

        for (i, watch) in watches.into_iter().enumerate() {
            if i > 0 {
                tokio::time::sleep(self.cfg.watch_delay).await;
            }

            let watch_id = watch.id;
            match self
                .check_watch(watch)
                .instrument(child_span("check_watch"))
                .await
            {
                Ok(check) => {
                    summary.checked += 1;
                    if check.alert_sent {
                        summary.alerts += 1;
                    }
                }
                Err(e) => {
                    summary.failed += 1;
                    Counters::incr(&self.counters.errors_today);
                    error!(target: "monitor", watch_id = %watch_id, error = %e, "watch check failed");
                }
            }
        }

        info!(
            target: "monitor",
            checked = summary.checked,
            failed = summary.failed,
            alerts = summary.alerts,
            "monitoring cycle finished"
        );
        CycleOutcome::Completed(summary)
    }

    /// Checks one watch outside the timer, under the same single-worker guard.
    pub async fn check_now(&self, watch_id: Uuid) -> Result<WatchCheck, MonitorError> {
        let Some(_guard) = RunGuard::try_acquire(&self.is_running) else {
            return Err(MonitorError::Busy);
        };

        let trace_id = TraceId::default();
        let res = self
            .check_now_locked(watch_id)
            .instrument(root_span("check_now", &trace_id))
            .await;
        if res.is_err() {
            Counters::incr(&self.counters.errors_today);
        }
        res
    }

    async fn check_now_locked(&self, watch_id: Uuid) -> Result<WatchCheck, MonitorError> {
        let watch = self
            .store
            .find_watch(&watch_id)
            .await?
            .ok_or(MonitorError::WatchNotFound(watch_id))?;

        self.check_watch(watch)
            .instrument(child_span("check_watch"))
            .await
    }

    /// The per-watch CHECKING sequence.
    async fn check_watch(&self, mut watch: Watch) -> Result<WatchCheck, MonitorError> {
        let route = watch.route();
        annotate_span(&watch.id, &route);

        // a) recorded before searching so a crash mid-check can't cause a re-check storm
        let now = self.clock.now();
        watch.last_checked_at = Some(now);
        warn_if_slow(
            "touch_last_checked",
            SLOW_STORE_CALL,
            self.store.touch_last_checked(&watch.id, now),
        )
        .await?;
        Counters::incr(&self.counters.checks_today);

        // b) + c) + d)
        let offers = self.search_all_pairs(&watch).await;

        let candidate = offers
            .iter()
            .filter(|o| is_sane_price(o.price.amount))
            .min_by(|a, b| a.price.amount.total_cmp(&b.price.amount))
            .cloned();

        // e)
        for offer in &offers {
            if let Err(e) = self.store.insert_offer_if_absent(offer).await {
                warn!(target: "monitor", offer_id = %offer.id, error = %e, "storing offer failed");
            }
        }

        // f)
        watch.stats = stats::update(&watch.stats, &offers);

        // g)
        let alert_sent = match &candidate {
            Some(offer) => self.try_alert(&mut watch, offer).await,
            None => false,
        };

        // h)
        self.persist_watch(&mut watch).await?;

        debug!(
            target: "monitor",
            offers = offers.len(),
            candidate = ?candidate.as_ref().map(|o| o.price.amount),
            alert_sent,
            "watch checked"
        );

        Ok(WatchCheck {
            watch_id: watch.id,
            offers_found: offers.len(),
            candidate_amount: candidate.map(|o| o.price.amount),
            alert_sent,
        })
    }

    /// Queries every date-pair strictly in sequence. Failed or timed-out
    /// pairs contribute no offers.
    async fn search_all_pairs(&self, watch: &Watch) -> Vec<Offer> {
        let pairs = date_pairs(watch, self.cfg.live_max_samples, self.cfg.max_date_pairs);
        let mut offers = Vec::new();

        for (i, pair) in pairs.iter().enumerate() {
            if i > 0 {
                tokio::time::sleep(self.cfg.search_delay).await;
            }

            let query = SearchQuery::for_watch(watch, pair.departure, pair.return_date);
            match tokio::time::timeout(self.cfg.search_timeout, self.search.search(&query)).await {
                Ok(Ok(raw)) => {
                    let found = self.search.parse(&raw, &query);
                    debug!(
                        target: "monitor",
                        departure = %pair.departure,
                        return_date = ?pair.return_date,
                        found = found.len(),
                        "date-pair searched"
                    );
                    offers.extend(found);
                }
                Ok(Err(e)) => {
                    Counters::incr(&self.counters.errors_today);
                    warn!(target: "monitor", departure = %pair.departure, error = %e, "search failed");
                }
                Err(_) => {
                    Counters::incr(&self.counters.errors_today);
                    let e = SearchError::Timeout(self.cfg.search_timeout);
                    warn!(target: "monitor", departure = %pair.departure, error = %e, "search failed");
                }
            }
        }

        offers
    }

    /// Decides, delivers and (only on confirmed delivery) applies the alert
    /// side effects. Returns whether an alert went out.
    #[instrument(skip_all, target = "monitor", fields(amount = offer.price.amount))]
    async fn try_alert(&self, watch: &mut Watch, offer: &Offer) -> bool {
        let now = self.clock.now();

        let mut owner = match self.store.find_owner(&watch.owner_id).await {
            Ok(Some(o)) => o,
            Ok(None) => {
                warn!(owner_id = %watch.owner_id, "watch owner not found; alert skipped");
                return false;
            }
            Err(e) => {
                warn!(owner_id = %watch.owner_id, error = %e, "loading owner failed; alert skipped");
                return false;
            }
        };

        if let Err(reason) = evaluate(watch, offer, &owner, now) {
            debug!(reason = reason.as_str(), "alert suppressed");
            return false;
        }

        let key = AlertKey::for_offer(watch.id, offer);
        if self
            .dedup
            .is_duplicate(&key, now, resolved_cooldown(watch, &owner))
        {
            debug!(bucket = key.price_bucket, "alert suppressed as duplicate");
            return false;
        }

        match self.notifier.deliver(offer, watch, &owner).await {
            Ok(true) => {}
            Ok(false) => {
                warn!("notification not accepted; no side effects applied");
                return false;
            }
            Err(e) => {
                warn!(error = %e, "notification failed; no side effects applied");
                return false;
            }
        }

        apply_delivery(watch, offer, now);

        owner.record_alert(offer, now);
        if let Err(e) = self.store.save_owner(&owner).await {
            // the persisted daily count now lags; surface it in the report
            Counters::incr(&self.counters.errors_today);
            warn!(owner_id = %owner.id, error = %e, "saving owner alert counters failed");
        }

        self.dedup.mark_sent(key, now);
        Counters::incr(&self.counters.alerts_today);

        info!(
            owner_id = %owner.id,
            currency = %offer.price.currency,
            offer_id = %offer.id,
            "price alert sent"
        );
        true
    }

    /// Saves the watch; a stats rejection is retried exactly once with the
    /// price aggregates cleared.
    async fn persist_watch(&self, watch: &mut Watch) -> Result<(), MonitorError> {
        let first = warn_if_slow("save_watch", SLOW_STORE_CALL, self.store.save_watch(watch)).await;

        match first {
            Ok(()) => Ok(()),
            Err(e) if e.is_stats_validation() => {
                warn!(target: "monitor", error = %e, "stats rejected by store; clearing and retrying once");
                watch.stats.clear_prices();
                self.store.save_watch(watch).await?;
                Ok(())
            }
            Err(e) => Err(e.into()),
        }
    }

    /// Samples a watch with the preview cap. Performs no search.
    pub fn preview_dates(&self, watch: &Watch) -> DatePreview {
        let cap = self.cfg.preview_max_samples;
        let outbound = sample(&watch.outbound, cap);
        let inbound = watch
            .inbound
            .as_ref()
            .filter(|_| watch.is_roundtrip())
            .map(|r| sample(r, cap));

        let combinations = date_pairs(watch, cap, self.cfg.max_date_pairs).len();
        let estimated_duration = self
            .cfg
            .search_delay
            .saturating_mul(u32::try_from(combinations).unwrap_or(u32::MAX));

        DatePreview {
            outbound,
            inbound,
            combinations,
            estimated_duration,
        }
    }

    pub fn stats(&self) -> MonitoringStats {
        self.counters.snapshot(self.is_running())
    }

    pub fn dedup_summary(&self) -> DedupSummary {
        self.dedup.summary(self.clock.now())
    }

    /// Builds the operational report, hands it to the notifier and resets
    /// the daily counters. Returns whether the notifier accepted it.
    ///
    /// `offers_found` counts offers stored during the last report period.
    #[instrument(skip(self), target = "monitor")]
    pub async fn send_daily_report(&self) -> Result<bool, MonitorError> {
        let now = self.clock.now();
        let period = chrono::Duration::from_std(self.cfg.report_interval)
            .unwrap_or_else(|_| chrono::Duration::hours(24));

        let active_watches = self.store.count_active_watches().await?;
        let offers_found = self.store.count_offers_since(now - period).await?;
        let snapshot = self.counters.snapshot(self.is_running());

        let report = MonitoringReport {
            active_watches,
            offers_found,
            checks: snapshot.checks_today,
            alerts: snapshot.alerts_today,
            errors: snapshot.errors_today,
            generated_at: now,
        };

        let delivered = match self.notifier.deliver_report(&report).await {
            Ok(accepted) => accepted,
            Err(e) => {
                warn!(error = %e, "report delivery failed");
                false
            }
        };

        self.counters.reset_daily();
        info!(
            active_watches,
            offers_found,
            checks = report.checks,
            alerts = report.alerts,
            errors = report.errors,
            delivered,
            "daily report"
        );
        Ok(delivered)
    }
}

fn apply_delivery(watch: &mut Watch, offer: &Offer, now: DateTime<Utc>) {
    let cheaper = watch
        .best_price
        .as_ref()
        .is_none_or(|b| offer.price.amount < b.amount);
    if cheaper {
        watch.best_price = Some(BestPrice {
            amount: offer.price.amount,
            currency: offer.price.currency.clone(),
            offer_ref: offer.id.clone(),
            found_at: offer.found_at,
        });
    }

    watch.notification_policy.last_sent_at = Some(now);
    watch.stats.alerts_sent = watch.stats.alerts_sent.saturating_add(1);
}
