use std::collections::HashMap;

use chrono::{DateTime, Duration, NaiveDate, Utc};
use parking_lot::Mutex;
use serde::Serialize;
use tracing::{debug, info, instrument};
use uuid::Uuid;

use crate::model::Offer;

pub const DEFAULT_SOFT_CAP: usize = 100;
pub const DEFAULT_HARD_CAP: usize = 1_000;

/// Entries older than this are dropped once the soft cap is exceeded.
const MAX_ENTRY_AGE_HOURS: i64 = 24;

/// Signature of a concrete offer as seen by one watch.
///
/// Prices are bucketed to the nearest 10 units so that a fare wobbling by a
/// few cents between two sampled dates still maps to the same key.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct AlertKey {
    pub watch_id: Uuid,
    pub route: String,
    pub departure_date: NaiveDate,
    pub price_bucket: i64,
}

impl AlertKey {
    pub fn new(
        watch_id: Uuid,
        route: impl Into<String>,
        departure_date: NaiveDate,
        amount: f64,
    ) -> Self {
        Self {
            watch_id,
            route: route.into(),
            departure_date,
            price_bucket: ((amount / 10.0).round() * 10.0) as i64,
        }
    }

    pub fn for_offer(watch_id: Uuid, offer: &Offer) -> Self {
        Self::new(
            watch_id,
            offer.route(),
            offer.departure_date(),
            offer.price.amount,
        )
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct AlertRecord {
    pub last_sent_at: DateTime<Utc>,
    pub occurrence_count: u32,
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize)]
pub struct DedupSummary {
    pub total: usize,
    pub per_watch: HashMap<Uuid, usize>,
    pub sent_last_hour: usize,
}

/// Bounded, process-local record of recently delivered alerts.
///
/// Not persisted: losing it on restart costs at most one redundant send,
/// since the persisted per-watch cooldown still applies.
///
/// Eviction runs on every insert:
/// - above `soft_cap`, entries older than 24h are dropped
/// - above `hard_cap`, the whole cache is cleared
pub struct DedupCache {
    soft_cap: usize,
    hard_cap: usize,
    entries: Mutex<HashMap<AlertKey, AlertRecord>>,
}

impl Default for DedupCache {
    fn default() -> Self {
        Self::new(DEFAULT_SOFT_CAP, DEFAULT_HARD_CAP)
    }
}

impl DedupCache {
    pub fn new(soft_cap: usize, hard_cap: usize) -> Self {
        Self {
            soft_cap,
            hard_cap: hard_cap.max(soft_cap),
            entries: Mutex::new(HashMap::new()),
        }
    }

    pub fn len(&self) -> usize {
        self.entries.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.lock().is_empty()
    }

    pub fn get(&self, key: &AlertKey) -> Option<AlertRecord> {
        self.entries.lock().get(key).cloned()
    }

    /// True iff `key` was sent less than `cooldown` ago.
    pub fn is_duplicate(&self, key: &AlertKey, now: DateTime<Utc>, cooldown: Duration) -> bool {
        self.entries
            .lock()
            .get(key)
            .is_some_and(|r| now - r.last_sent_at < cooldown)
    }

    /// Records a confirmed delivery and returns how often `key` has been sent.
    #[instrument(skip(self, key), target = "dedup", fields(watch_id = %key.watch_id))]
    pub fn mark_sent(&self, key: AlertKey, now: DateTime<Utc>) -> u32 {
        let mut entries = self.entries.lock();

        let record = entries.entry(key).or_insert(AlertRecord {
            last_sent_at: now,
            occurrence_count: 0,
        });
        record.last_sent_at = now;
        record.occurrence_count += 1;
        let count = record.occurrence_count;

        if entries.len() > self.soft_cap {
            let before = entries.len();
            let max_age = Duration::hours(MAX_ENTRY_AGE_HOURS);
            entries.retain(|_, r| now - r.last_sent_at <= max_age);
            debug!(
                before,
                after = entries.len(),
                "soft cap exceeded; pruned stale alert entries"
            );
        }

        if entries.len() > self.hard_cap {
            info!(size = entries.len(), "hard cap exceeded; clearing alert cache");
            entries.clear();
        }

        count
    }

    pub fn clear(&self) {
        self.entries.lock().clear();
    }

    pub fn summary(&self, now: DateTime<Utc>) -> DedupSummary {
        let entries = self.entries.lock();
        let hour_ago = now - Duration::hours(1);

        let mut summary = DedupSummary {
            total: entries.len(),
            ..DedupSummary::default()
        };
        for (key, record) in entries.iter() {
            *summary.per_watch.entry(key.watch_id).or_insert(0) += 1;
            if record.last_sent_at > hour_ago {
                summary.sent_last_hour += 1;
            }
        }
        summary
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn t0() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 4, 10, 12, 0, 0).unwrap()
    }

    fn key(watch_id: Uuid, amount: f64) -> AlertKey {
        AlertKey::new(
            watch_id,
            "MAD-BCN",
            NaiveDate::from_ymd_opt(2026, 5, 1).unwrap(),
            amount,
        )
    }

    #[test]
    fn price_bucket_rounds_to_nearest_ten() {
        let w = Uuid::new_v4();
        assert_eq!(key(w, 94.0).price_bucket, 90);
        assert_eq!(key(w, 95.0).price_bucket, 100);
        assert_eq!(key(w, 99.99), key(w, 101.0));
        assert_ne!(key(w, 94.0), key(w, 96.0));
    }

    #[test]
    fn duplicate_until_cooldown_elapses() {
        let cache = DedupCache::default();
        let k = key(Uuid::new_v4(), 95.0);
        let cooldown = Duration::minutes(60);

        assert!(!cache.is_duplicate(&k, t0(), cooldown));
        cache.mark_sent(k.clone(), t0());

        assert!(cache.is_duplicate(&k, t0(), cooldown));
        assert!(cache.is_duplicate(&k, t0() + Duration::minutes(59), cooldown));
        assert!(!cache.is_duplicate(&k, t0() + Duration::minutes(60), cooldown));
    }

    #[test]
    fn mark_sent_counts_occurrences() {
        let cache = DedupCache::default();
        let k = key(Uuid::new_v4(), 95.0);

        assert_eq!(cache.mark_sent(k.clone(), t0()), 1);
        assert_eq!(cache.mark_sent(k.clone(), t0() + Duration::hours(2)), 2);

        let rec = cache.get(&k).unwrap();
        assert_eq!(rec.occurrence_count, 2);
        assert_eq!(rec.last_sent_at, t0() + Duration::hours(2));
    }

    #[test]
    fn soft_cap_prunes_only_stale_entries() {
        let cache = DedupCache::new(3, 100);
        let w = Uuid::new_v4();

        cache.mark_sent(key(w, 10.0), t0());
        cache.mark_sent(key(w, 20.0), t0());
        cache.mark_sent(key(w, 30.0), t0() + Duration::hours(23));

        // Fourth insert crosses the soft cap 25h after the first two.
        cache.mark_sent(key(w, 40.0), t0() + Duration::hours(25));

        assert_eq!(cache.len(), 2);
        assert!(cache.get(&key(w, 10.0)).is_none());
        assert!(cache.get(&key(w, 30.0)).is_some());
    }

    #[test]
    fn hard_cap_clears_everything() {
        let cache = DedupCache::new(2, 4);
        let w = Uuid::new_v4();

        for i in 0..5 {
            cache.mark_sent(key(w, f64::from(i) * 10.0), t0());
        }

        assert!(cache.is_empty());
    }

    #[test]
    fn summary_groups_by_watch_and_recency() {
        let cache = DedupCache::default();
        let a = Uuid::new_v4();
        let b = Uuid::new_v4();

        cache.mark_sent(key(a, 10.0), t0() - Duration::hours(3));
        cache.mark_sent(key(a, 20.0), t0() - Duration::minutes(5));
        cache.mark_sent(key(b, 10.0), t0() - Duration::minutes(30));

        let s = cache.summary(t0());
        assert_eq!(s.total, 3);
        assert_eq!(s.per_watch[&a], 2);
        assert_eq!(s.per_watch[&b], 1);
        assert_eq!(s.sent_last_hour, 2);
    }
}
