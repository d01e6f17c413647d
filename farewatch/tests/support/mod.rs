#![allow(dead_code)]

use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, TimeZone, Utc};
use parking_lot::Mutex;
use serde_json::json;
use tokio::sync::Notify;
use uuid::Uuid;

use farewatch::{
    config::MonitorConfig,
    error::{NotifyError, SearchError, StoreError},
    metrics::MonitoringReport,
    model::{Airport, DateRange, Offer, Owner, Price, SearchQuery, Watch},
    monitor::Orchestrator,
    notify::Notifier,
    search::{FlightSearch, RawResponse},
    store::WatchStore,
    time::Clock,
};

// -----------------------
// Clock
// -----------------------

pub struct FixedClock(Mutex<DateTime<Utc>>);

impl FixedClock {
    pub fn new(at: DateTime<Utc>) -> Self {
        Self(Mutex::new(at))
    }

    pub fn advance(&self, by: chrono::Duration) {
        *self.0.lock() += by;
    }
}

impl Clock for FixedClock {
    fn now(&self) -> DateTime<Utc> {
        *self.0.lock()
    }
}

/// Noon UTC, outside the default quiet hours.
pub fn noon() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2026, 4, 10, 12, 0, 0).unwrap()
}

pub fn d(y: i32, m: u32, day: u32) -> NaiveDate {
    NaiveDate::from_ymd_opt(y, m, day).unwrap()
}

// -----------------------
// Store
// -----------------------

#[derive(Default)]
pub struct MockStore {
    pub watches: Mutex<HashMap<Uuid, Watch>>,
    pub owners: Mutex<HashMap<Uuid, Owner>>,
    /// Offer id → `found_at`.
    pub offers: Mutex<HashMap<String, DateTime<Utc>>>,

    /// Every watch handed to `save_watch`, including rejected ones.
    pub save_attempts: Mutex<Vec<Watch>>,

    pub fail_selection: AtomicBool,
    /// Number of upcoming saves (carrying price aggregates) rejected as stats validation errors.
    pub reject_stats_saves: AtomicUsize,
    /// Number of upcoming saves failing with a permanent error.
    pub fail_saves: AtomicUsize,
    pub fail_touch_for: Mutex<HashSet<Uuid>>,
    pub fail_owner_saves: AtomicBool,

    /// When set, selection signals `entered` then blocks until `gate` is notified.
    pub gate: Option<Arc<Notify>>,
    pub entered: Arc<Notify>,
}

impl MockStore {
    pub fn gated(gate: Arc<Notify>) -> Self {
        Self {
            gate: Some(gate),
            ..Self::default()
        }
    }

    pub fn put_owner(&self, owner: Owner) {
        self.owners.lock().insert(owner.id, owner);
    }

    pub fn put_watch(&self, watch: Watch) {
        self.watches.lock().insert(watch.id, watch);
    }

    pub fn watch(&self, id: &Uuid) -> Watch {
        self.watches.lock().get(id).cloned().expect("watch stored")
    }

    pub fn owner(&self, id: &Uuid) -> Owner {
        self.owners.lock().get(id).cloned().expect("owner stored")
    }
}

#[async_trait]
impl WatchStore for MockStore {
    async fn find_due_watches(
        &self,
        now: DateTime<Utc>,
        interval: chrono::Duration,
    ) -> Result<Vec<Watch>, StoreError> {
        if let Some(gate) = &self.gate {
            self.entered.notify_one();
            gate.notified().await;
        }
        if self.fail_selection.load(Ordering::SeqCst) {
            return Err(StoreError::Transport("connection refused".into()));
        }

        let mut due: Vec<Watch> = self
            .watches
            .lock()
            .values()
            .filter(|w| w.is_active)
            .filter(|w| w.last_checked_at.is_none_or(|t| now - t >= interval))
            .cloned()
            .collect();
        due.sort_by_key(|w| w.name.clone());
        Ok(due)
    }

    async fn find_watch(&self, id: &Uuid) -> Result<Option<Watch>, StoreError> {
        Ok(self.watches.lock().get(id).cloned())
    }

    async fn touch_last_checked(&self, id: &Uuid, at: DateTime<Utc>) -> Result<(), StoreError> {
        if self.fail_touch_for.lock().contains(id) {
            return Err(StoreError::Permanent("disk full".into()));
        }
        if let Some(w) = self.watches.lock().get_mut(id) {
            w.last_checked_at = Some(at);
        }
        Ok(())
    }

    async fn save_watch(&self, watch: &Watch) -> Result<(), StoreError> {
        self.save_attempts.lock().push(watch.clone());

        if watch.stats.average_price.is_some()
            && self
                .reject_stats_saves
                .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
                .is_ok()
        {
            return Err(StoreError::validation(
                "stats_average_price",
                "CHECK constraint failed",
            ));
        }
        if self
            .fail_saves
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok()
        {
            return Err(StoreError::Permanent("write conflict".into()));
        }

        self.watches.lock().insert(watch.id, watch.clone());
        Ok(())
    }

    async fn insert_offer_if_absent(&self, offer: &Offer) -> Result<bool, StoreError> {
        let mut offers = self.offers.lock();
        if offers.contains_key(&offer.id) {
            return Ok(false);
        }
        offers.insert(offer.id.clone(), offer.found_at);
        Ok(true)
    }

    async fn find_owner(&self, id: &Uuid) -> Result<Option<Owner>, StoreError> {
        Ok(self.owners.lock().get(id).cloned())
    }

    async fn save_owner(&self, owner: &Owner) -> Result<(), StoreError> {
        if self.fail_owner_saves.load(Ordering::SeqCst) {
            return Err(StoreError::Transport("connection reset".into()));
        }
        self.owners.lock().insert(owner.id, owner.clone());
        Ok(())
    }

    async fn count_active_watches(&self) -> Result<u64, StoreError> {
        Ok(self.watches.lock().values().filter(|w| w.is_active).count() as u64)
    }

    async fn count_offers_since(&self, since: DateTime<Utc>) -> Result<u64, StoreError> {
        Ok(self.offers.lock().values().filter(|t| **t >= since).count() as u64)
    }
}

// -----------------------
// Search
// -----------------------

/// Returns `default_prices` for every date unless overridden per departure date.
#[derive(Default)]
pub struct MockSearch {
    pub default_prices: Vec<f64>,
    pub prices_by_date: HashMap<NaiveDate, Vec<f64>>,
    pub failing_dates: HashSet<NaiveDate>,
    pub hanging_dates: HashSet<NaiveDate>,
    pub calls: Mutex<Vec<SearchQuery>>,
}

impl MockSearch {
    pub fn with_prices(prices: &[f64]) -> Self {
        Self {
            default_prices: prices.to_vec(),
            ..Self::default()
        }
    }

    pub fn call_count(&self) -> usize {
        self.calls.lock().len()
    }
}

#[async_trait]
impl FlightSearch for MockSearch {
    async fn search(&self, query: &SearchQuery) -> Result<RawResponse, SearchError> {
        self.calls.lock().push(query.clone());
        let date = query.departure_date;

        if self.hanging_dates.contains(&date) {
            tokio::time::sleep(Duration::from_secs(3_600)).await;
        }
        if self.failing_dates.contains(&date) {
            return Err(SearchError::Provider("503 upstream".into()));
        }

        let prices = self
            .prices_by_date
            .get(&date)
            .unwrap_or(&self.default_prices);
        Ok(RawResponse(json!({ "prices": prices })))
    }

    fn parse(&self, raw: &RawResponse, query: &SearchQuery) -> Vec<Offer> {
        raw.0["prices"]
            .as_array()
            .map(|items| {
                items
                    .iter()
                    .filter_map(|v| v.as_f64())
                    .enumerate()
                    .map(|(i, amount)| make_offer(query, &format!("{}-{i}", query.departure_date), amount))
                    .collect()
            })
            .unwrap_or_default()
    }
}

pub fn make_offer(query: &SearchQuery, id: &str, amount: f64) -> Offer {
    let departure_at = Utc.from_utc_datetime(&query.departure_date.and_hms_opt(9, 0, 0).unwrap());
    Offer {
        id: id.to_string(),
        price: Price {
            amount,
            currency: "EUR".into(),
        },
        origin: Airport {
            code: query.origin.clone(),
            city: None,
        },
        destination: Airport {
            code: query.destination.clone(),
            city: None,
        },
        departure_at,
        arrival_at: departure_at + chrono::Duration::hours(2),
        stops: vec![],
        is_direct: true,
        number_of_stops: 0,
        airline: Some("IB".into()),
        booking_url: None,
        query: query.clone(),
        found_at: noon(),
    }
}

// -----------------------
// Notifier
// -----------------------

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Delivery {
    Accept,
    Reject,
    Fail,
}

pub struct MockNotifier {
    pub mode: Mutex<Delivery>,
    pub attempts: AtomicUsize,
    pub delivered: Mutex<Vec<(Uuid, f64)>>,
    pub reports: Mutex<Vec<MonitoringReport>>,
}

impl MockNotifier {
    pub fn new(mode: Delivery) -> Self {
        Self {
            mode: Mutex::new(mode),
            attempts: AtomicUsize::new(0),
            delivered: Mutex::new(vec![]),
            reports: Mutex::new(vec![]),
        }
    }

    pub fn set_mode(&self, mode: Delivery) {
        *self.mode.lock() = mode;
    }

    fn outcome(&self) -> Result<bool, NotifyError> {
        match *self.mode.lock() {
            Delivery::Accept => Ok(true),
            Delivery::Reject => Ok(false),
            Delivery::Fail => Err(NotifyError::NotConfigured),
        }
    }
}

#[async_trait]
impl Notifier for MockNotifier {
    async fn deliver(&self, offer: &Offer, watch: &Watch, _: &Owner) -> Result<bool, NotifyError> {
        self.attempts.fetch_add(1, Ordering::SeqCst);
        let res = self.outcome();
        if matches!(res, Ok(true)) {
            self.delivered.lock().push((watch.id, offer.price.amount));
        }
        res
    }

    async fn deliver_report(&self, report: &MonitoringReport) -> Result<bool, NotifyError> {
        self.reports.lock().push(report.clone());
        self.outcome()
    }
}

// -----------------------
// Wiring
// -----------------------

/// No delays, single-sample ranges unless the test widens them.
pub fn fast_config() -> MonitorConfig {
    MonitorConfig {
        search_delay: Duration::ZERO,
        watch_delay: Duration::ZERO,
        initial_delay: Duration::ZERO,
        ..MonitorConfig::default()
    }
}

pub struct Harness {
    pub store: Arc<MockStore>,
    pub search: Arc<MockSearch>,
    pub notifier: Arc<MockNotifier>,
    pub clock: Arc<FixedClock>,
    pub orchestrator: Arc<Orchestrator>,
}

impl Harness {
    pub fn new(store: MockStore, search: MockSearch, notifier: MockNotifier) -> Self {
        Self::with_config(store, search, notifier, fast_config())
    }

    pub fn with_config(
        store: MockStore,
        search: MockSearch,
        notifier: MockNotifier,
        cfg: MonitorConfig,
    ) -> Self {
        let store = Arc::new(store);
        let search = Arc::new(search);
        let notifier = Arc::new(notifier);
        let clock = Arc::new(FixedClock::new(noon()));

        let orchestrator = Arc::new(Orchestrator::new(
            search.clone(),
            notifier.clone(),
            store.clone(),
            clock.clone(),
            cfg,
        ));

        Self {
            store,
            search,
            notifier,
            clock,
            orchestrator,
        }
    }
}

/// Owner plus a one-way MAD-BCN watch on a single fixed date.
pub fn seed_watch(store: &MockStore, threshold: f64) -> (Owner, Watch) {
    let owner = Owner::new("ana");
    let watch = Watch::new(
        owner.id,
        "MAD",
        "BCN",
        DateRange::single(d(2026, 5, 1)),
        threshold,
    );
    store.put_owner(owner.clone());
    store.put_watch(watch.clone());
    (owner, watch)
}
