use chrono::{DateTime, FixedOffset, NaiveDate, NaiveTime, Offset, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::model::offer::Offer;

pub const DEFAULT_COOLDOWN_MINUTES: u32 = 60;
pub const DEFAULT_DAILY_ALERT_CAP: u32 = 20;
pub const DEFAULT_WATCH_LIMIT: u32 = 2;

/// Daily local-time window during which alerts are suppressed.
///
/// The window is `[start, end)`. When `start > end` it wraps past midnight,
/// and `start == end` is an empty window.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct QuietHours {
    pub enabled: bool,
    pub start: NaiveTime,
    pub end: NaiveTime,
}

impl QuietHours {
    pub fn contains(&self, t: NaiveTime) -> bool {
        if !self.enabled || self.start == self.end {
            return false;
        }
        if self.start < self.end {
            self.start <= t && t < self.end
        } else {
            t >= self.start || t < self.end
        }
    }
}

impl Default for QuietHours {
    fn default() -> Self {
        Self {
            enabled: false,
            start: NaiveTime::from_hms_opt(23, 0, 0).unwrap_or(NaiveTime::MIN),
            end: NaiveTime::from_hms_opt(7, 0, 0).unwrap_or(NaiveTime::MIN),
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct NotificationDefaults {
    pub cooldown_minutes: u32,
    pub quiet_hours: QuietHours,
}

impl Default for NotificationDefaults {
    fn default() -> Self {
        Self {
            cooldown_minutes: DEFAULT_COOLDOWN_MINUTES,
            quiet_hours: QuietHours::default(),
        }
    }
}

/// Cheapest deal ever delivered to an owner, across all of their watches.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct BestDeal {
    pub amount: f64,
    pub currency: String,
    pub route: String,
    pub found_at: DateTime<Utc>,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Owner {
    pub id: Uuid,
    pub name: String,
    /// Offset of the owner's local time from UTC, in minutes.
    pub utc_offset_minutes: i32,
    pub notification_defaults: NotificationDefaults,
    pub daily_alert_cap: u32,
    pub daily_alert_count: u32,
    /// Local date `daily_alert_count` refers to.
    pub daily_alert_count_date: Option<NaiveDate>,
    pub watch_limit: u32,
    pub active_watch_count: u32,
    pub alerts_received: u64,
    pub best_deal: Option<BestDeal>,
}

impl Owner {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4(),
            name: name.into(),
            utc_offset_minutes: 0,
            notification_defaults: NotificationDefaults::default(),
            daily_alert_cap: DEFAULT_DAILY_ALERT_CAP,
            daily_alert_count: 0,
            daily_alert_count_date: None,
            watch_limit: DEFAULT_WATCH_LIMIT,
            active_watch_count: 0,
            alerts_received: 0,
            best_deal: None,
        }
    }

    /// The owner's fixed offset; out-of-range offsets degrade to UTC.
    pub fn offset(&self) -> FixedOffset {
        FixedOffset::east_opt(self.utc_offset_minutes.saturating_mul(60)).unwrap_or(Utc.fix())
    }

    pub fn local_now(&self, now: DateTime<Utc>) -> DateTime<FixedOffset> {
        now.with_timezone(&self.offset())
    }

    pub fn local_today(&self, now: DateTime<Utc>) -> NaiveDate {
        self.local_now(now).date_naive()
    }

    /// Alerts already delivered on `today`; a stale counter date reads as zero.
    pub fn alerts_sent_on(&self, today: NaiveDate) -> u32 {
        if self.daily_alert_count_date == Some(today) {
            self.daily_alert_count
        } else {
            0
        }
    }

    pub fn can_create_watch(&self) -> bool {
        self.active_watch_count < self.watch_limit
    }

    /// Applies the bookkeeping for one confirmed delivery.
    pub fn record_alert(&mut self, offer: &Offer, now: DateTime<Utc>) {
        let today = self.local_today(now);
        self.daily_alert_count = self.alerts_sent_on(today) + 1;
        self.daily_alert_count_date = Some(today);
        self.alerts_received += 1;

        let cheaper = self
            .best_deal
            .as_ref()
            .is_none_or(|d| offer.price.amount < d.amount);
        if cheaper {
            self.best_deal = Some(BestDeal {
                amount: offer.price.amount,
                currency: offer.price.currency.clone(),
                route: offer.route(),
                found_at: now,
            });
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn hm(h: u32, m: u32) -> NaiveTime {
        NaiveTime::from_hms_opt(h, m, 0).unwrap()
    }

    #[test]
    fn quiet_hours_wrap_past_midnight() {
        let q = QuietHours {
            enabled: true,
            start: hm(23, 0),
            end: hm(7, 0),
        };

        assert!(q.contains(hm(23, 0)));
        assert!(q.contains(hm(2, 30)));
        assert!(q.contains(hm(6, 59)));
        assert!(!q.contains(hm(7, 0)));
        assert!(!q.contains(hm(12, 0)));
        assert!(!q.contains(hm(22, 59)));
    }

    #[test]
    fn quiet_hours_same_day_window_is_half_open() {
        let q = QuietHours {
            enabled: true,
            start: hm(13, 0),
            end: hm(15, 0),
        };

        assert!(q.contains(hm(13, 0)));
        assert!(q.contains(hm(14, 59)));
        assert!(!q.contains(hm(15, 0)));
        assert!(!q.contains(hm(12, 59)));
    }

    #[test]
    fn disabled_or_empty_quiet_hours_never_match() {
        let mut q = QuietHours {
            enabled: false,
            start: hm(0, 0),
            end: hm(23, 59),
        };
        assert!(!q.contains(hm(12, 0)));

        q.enabled = true;
        q.end = q.start;
        assert!(!q.contains(hm(0, 0)));
    }

    #[test]
    fn stale_counter_date_reads_as_zero() {
        let mut o = Owner::new("ana");
        o.daily_alert_count = 7;
        o.daily_alert_count_date = NaiveDate::from_ymd_opt(2026, 5, 1);

        assert_eq!(o.alerts_sent_on(NaiveDate::from_ymd_opt(2026, 5, 1).unwrap()), 7);
        assert_eq!(o.alerts_sent_on(NaiveDate::from_ymd_opt(2026, 5, 2).unwrap()), 0);
    }

    #[test]
    fn local_today_honours_offset() {
        let mut o = Owner::new("ana");
        o.utc_offset_minutes = -180;
        let now = Utc.with_ymd_and_hms(2026, 5, 2, 1, 0, 0).unwrap();

        assert_eq!(o.local_today(now), NaiveDate::from_ymd_opt(2026, 5, 1).unwrap());
    }
}
