use async_trait::async_trait;
use chrono::{DateTime, Duration, NaiveDate, NaiveTime, Utc};
use sqlx::any::AnyRow;
use sqlx::{AnyPool, Row};
use tracing::{debug, instrument, warn};
use uuid::Uuid;

use crate::error::{MonitorError, StoreError};
use crate::model::{
    BestDeal, BestPrice, DateRange, FlightType, NotificationDefaults, NotificationPolicy, Offer,
    Owner, QuietHours, Watch, WatchStats,
};
use crate::store::repository::{WatchStore, validate_numeric_state};

/// SQLx-backed implementation of WatchStore.
/// Responsible only for persistence and row mapping.
pub struct SqlxWatchStore {
    pool: AnyPool,
}

impl SqlxWatchStore {
    pub fn new(pool: AnyPool) -> Self {
        Self { pool }
    }

    pub async fn insert_owner(&self, owner: &Owner) -> Result<(), StoreError> {
        self.save_owner(owner).await
    }

    /// Stores a new watch after structural validation and the owner's
    /// watch-limit check.
    #[instrument(skip(self, watch), target = "store", fields(watch_id = %watch.id))]
    pub async fn insert_watch(&self, watch: &Watch) -> Result<(), MonitorError> {
        watch.validate()?;

        let owner = self
            .find_owner(&watch.owner_id)
            .await?
            .ok_or(MonitorError::OwnerNotFound(watch.owner_id))?;

        if watch.is_active && !owner.can_create_watch() {
            return Err(MonitorError::InvalidWatch(format!(
                "owner {} reached the limit of {} active watches",
                owner.id, owner.watch_limit
            )));
        }

        self.save_watch(watch).await?;
        if watch.is_active {
            self.adjust_active_count(&watch.owner_id, 1).await?;
        }

        debug!("watch created");
        Ok(())
    }

    /// Pauses or resumes a watch. Returns `false` when it does not exist.
    pub async fn set_watch_active(&self, id: &Uuid, active: bool) -> Result<bool, MonitorError> {
        let Some(watch) = self.find_watch(id).await? else {
            return Ok(false);
        };
        if watch.is_active == active {
            return Ok(true);
        }

        if active {
            let owner = self
                .find_owner(&watch.owner_id)
                .await?
                .ok_or(MonitorError::OwnerNotFound(watch.owner_id))?;
            if !owner.can_create_watch() {
                return Err(MonitorError::InvalidWatch(format!(
                    "owner {} reached the limit of {} active watches",
                    owner.id, owner.watch_limit
                )));
            }
        }

        sqlx::query("UPDATE watches SET is_active = ? WHERE watch_id = ?;")
            .bind(i64::from(active))
            .bind(id.to_string())
            .execute(&self.pool)
            .await
            .map_err(StoreError::from)?;

        self.adjust_active_count(&watch.owner_id, if active { 1 } else { -1 })
            .await?;
        Ok(true)
    }

    /// Deletes a watch. Returns `false` when it does not exist.
    pub async fn delete_watch(&self, id: &Uuid) -> Result<bool, MonitorError> {
        let Some(watch) = self.find_watch(id).await? else {
            return Ok(false);
        };

        sqlx::query("DELETE FROM watches WHERE watch_id = ?;")
            .bind(id.to_string())
            .execute(&self.pool)
            .await
            .map_err(StoreError::from)?;

        if watch.is_active {
            self.adjust_active_count(&watch.owner_id, -1).await?;
        }
        Ok(true)
    }

    /// Lists watches, optionally narrowed by owner and/or active flag.
    pub async fn list_watches(
        &self,
        owner_id: Option<Uuid>,
        active: Option<bool>,
    ) -> Result<Vec<Watch>, StoreError> {
        let owner = owner_id.map(|id| id.to_string());
        let active = active.map(i64::from);

        let rows = sqlx::query(
            r#"
SELECT * FROM watches
WHERE (? IS NULL OR owner_id = ?) AND (? IS NULL OR is_active = ?)
ORDER BY name;
"#,
        )
        .bind(owner.clone())
        .bind(owner)
        .bind(active)
        .bind(active)
        .fetch_all(&self.pool)
        .await?;

        rows.iter().map(row_to_watch).collect()
    }

    async fn adjust_active_count(&self, owner_id: &Uuid, delta: i64) -> Result<(), StoreError> {
        sqlx::query(
            r#"
UPDATE owners
SET active_watch_count = MAX(active_watch_count + ?, 0)
WHERE owner_id = ?;
"#,
        )
        .bind(delta)
        .bind(owner_id.to_string())
        .execute(&self.pool)
        .await?;
        Ok(())
    }
}

#[async_trait]
impl WatchStore for SqlxWatchStore {
    #[instrument(skip(self), target = "store")]
    async fn find_due_watches(
        &self,
        now: DateTime<Utc>,
        interval: Duration,
    ) -> Result<Vec<Watch>, StoreError> {
        let cutoff_ms = (now - interval).timestamp_millis();

        let rows = sqlx::query(
            r#"
SELECT * FROM watches
WHERE is_active = 1 AND (last_checked_ms IS NULL OR last_checked_ms <= ?)
ORDER BY last_checked_ms;
"#,
        )
        .bind(cutoff_ms)
        .fetch_all(&self.pool)
        .await?;

        let mut out = Vec::with_capacity(rows.len());
        for r in &rows {
            match row_to_watch(r) {
                Ok(w) => out.push(w),
                Err(e) => {
                    // poison-row resilience: skip but don't fail the cycle
                    warn!(error = %e, "skipping malformed watch row");
                }
            }
        }

        debug!(due = out.len(), "due watches loaded");
        Ok(out)
    }

    async fn find_watch(&self, id: &Uuid) -> Result<Option<Watch>, StoreError> {
        let row = sqlx::query("SELECT * FROM watches WHERE watch_id = ?;")
            .bind(id.to_string())
            .fetch_optional(&self.pool)
            .await?;

        row.as_ref().map(row_to_watch).transpose()
    }

    async fn touch_last_checked(&self, id: &Uuid, at: DateTime<Utc>) -> Result<(), StoreError> {
        sqlx::query("UPDATE watches SET last_checked_ms = ? WHERE watch_id = ?;")
            .bind(at.timestamp_millis())
            .bind(id.to_string())
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    #[instrument(skip(self, w), target = "store", fields(watch_id = %w.id))]
    async fn save_watch(&self, w: &Watch) -> Result<(), StoreError> {
        validate_numeric_state(w)?;

        let inbound = w.inbound.as_ref();
        let best = w.best_price.as_ref();

        sqlx::query(
            r#"
INSERT INTO watches (
  watch_id, owner_id, name, origin, destination, flight_type,
  out_start, out_end, out_flexible, in_start, in_end, in_flexible,
  price_threshold, currency, max_stops, passengers, is_active, check_interval_minutes,
  last_checked_ms,
  best_price_amount, best_price_currency, best_price_offer_ref, best_price_found_ms,
  notify_enabled, only_new_lows, cooldown_minutes, last_sent_ms,
  total_checks, alerts_sent, stats_average_price, stats_lowest_price, stats_highest_price
) VALUES (
  ?, ?, ?, ?, ?, ?,
  ?, ?, ?, ?, ?, ?,
  ?, ?, ?, ?, ?, ?,
  ?,
  ?, ?, ?, ?,
  ?, ?, ?, ?,
  ?, ?, ?, ?, ?
)
ON CONFLICT(watch_id) DO UPDATE SET
  owner_id = excluded.owner_id,
  name = excluded.name,
  origin = excluded.origin,
  destination = excluded.destination,
  flight_type = excluded.flight_type,
  out_start = excluded.out_start,
  out_end = excluded.out_end,
  out_flexible = excluded.out_flexible,
  in_start = excluded.in_start,
  in_end = excluded.in_end,
  in_flexible = excluded.in_flexible,
  price_threshold = excluded.price_threshold,
  currency = excluded.currency,
  max_stops = excluded.max_stops,
  passengers = excluded.passengers,
  is_active = excluded.is_active,
  check_interval_minutes = excluded.check_interval_minutes,
  last_checked_ms = excluded.last_checked_ms,
  best_price_amount = excluded.best_price_amount,
  best_price_currency = excluded.best_price_currency,
  best_price_offer_ref = excluded.best_price_offer_ref,
  best_price_found_ms = excluded.best_price_found_ms,
  notify_enabled = excluded.notify_enabled,
  only_new_lows = excluded.only_new_lows,
  cooldown_minutes = excluded.cooldown_minutes,
  last_sent_ms = excluded.last_sent_ms,
  total_checks = excluded.total_checks,
  alerts_sent = excluded.alerts_sent,
  stats_average_price = excluded.stats_average_price,
  stats_lowest_price = excluded.stats_lowest_price,
  stats_highest_price = excluded.stats_highest_price;
"#,
        )
        .bind(w.id.to_string())
        .bind(w.owner_id.to_string())
        .bind(w.name.clone())
        .bind(w.origin.clone())
        .bind(w.destination.clone())
        .bind(w.flight_type.as_str())
        .bind(w.outbound.start.to_string())
        .bind(w.outbound.end.to_string())
        .bind(i64::from(w.outbound.flexible))
        .bind(inbound.map(|r| r.start.to_string()))
        .bind(inbound.map(|r| r.end.to_string()))
        .bind(inbound.map(|r| i64::from(r.flexible)))
        .bind(w.price_threshold)
        .bind(w.currency.clone())
        .bind(w.max_stops.map(i64::from))
        .bind(i64::from(w.passengers))
        .bind(i64::from(w.is_active))
        .bind(i64::from(w.check_interval_minutes))
        .bind(w.last_checked_at.map(|t| t.timestamp_millis()))
        .bind(best.map(|b| b.amount))
        .bind(best.map(|b| b.currency.clone()))
        .bind(best.map(|b| b.offer_ref.clone()))
        .bind(best.map(|b| b.found_at.timestamp_millis()))
        .bind(i64::from(w.notification_policy.enabled))
        .bind(i64::from(w.notification_policy.only_new_lows))
        .bind(w.notification_policy.cooldown_minutes.map(i64::from))
        .bind(
            w.notification_policy
                .last_sent_at
                .map(|t| t.timestamp_millis()),
        )
        .bind(u64_to_i64(w.stats.total_checks))
        .bind(u64_to_i64(w.stats.alerts_sent))
        .bind(w.stats.average_price)
        .bind(w.stats.lowest_price)
        .bind(w.stats.highest_price)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn insert_offer_if_absent(&self, o: &Offer) -> Result<bool, StoreError> {
        let stops_json = serde_json::to_string(&o.stops)?;
        let query_json = serde_json::to_string(&o.query)?;

        let res = sqlx::query(
            r#"
INSERT INTO offers (
  offer_id, origin, destination, departure_ms, arrival_ms,
  price_amount, currency, is_direct, number_of_stops, stops_json,
  airline, booking_url, query_json, found_ms
) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
ON CONFLICT(offer_id) DO NOTHING;
"#,
        )
        .bind(o.id.clone())
        .bind(o.origin.code.clone())
        .bind(o.destination.code.clone())
        .bind(o.departure_at.timestamp_millis())
        .bind(o.arrival_at.timestamp_millis())
        .bind(o.price.amount)
        .bind(o.price.currency.clone())
        .bind(i64::from(o.is_direct))
        .bind(i64::from(o.number_of_stops))
        .bind(stops_json)
        .bind(o.airline.clone())
        .bind(o.booking_url.clone())
        .bind(query_json)
        .bind(o.found_at.timestamp_millis())
        .execute(&self.pool)
        .await?;

        Ok(res.rows_affected() == 1)
    }

    async fn find_owner(&self, id: &Uuid) -> Result<Option<Owner>, StoreError> {
        let row = sqlx::query("SELECT * FROM owners WHERE owner_id = ?;")
            .bind(id.to_string())
            .fetch_optional(&self.pool)
            .await?;

        row.as_ref().map(row_to_owner).transpose()
    }

    #[instrument(skip(self, o), target = "store", fields(owner_id = %o.id))]
    async fn save_owner(&self, o: &Owner) -> Result<(), StoreError> {
        let q = &o.notification_defaults.quiet_hours;
        let deal = o.best_deal.as_ref();

        sqlx::query(
            r#"
INSERT INTO owners (
  owner_id, name, utc_offset_minutes, cooldown_minutes,
  quiet_enabled, quiet_start, quiet_end,
  daily_alert_cap, daily_alert_count, daily_alert_count_date,
  watch_limit, active_watch_count, alerts_received,
  best_deal_amount, best_deal_currency, best_deal_route, best_deal_found_ms
) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
ON CONFLICT(owner_id) DO UPDATE SET
  name = excluded.name,
  utc_offset_minutes = excluded.utc_offset_minutes,
  cooldown_minutes = excluded.cooldown_minutes,
  quiet_enabled = excluded.quiet_enabled,
  quiet_start = excluded.quiet_start,
  quiet_end = excluded.quiet_end,
  daily_alert_cap = excluded.daily_alert_cap,
  daily_alert_count = excluded.daily_alert_count,
  daily_alert_count_date = excluded.daily_alert_count_date,
  watch_limit = excluded.watch_limit,
  active_watch_count = excluded.active_watch_count,
  alerts_received = excluded.alerts_received,
  best_deal_amount = excluded.best_deal_amount,
  best_deal_currency = excluded.best_deal_currency,
  best_deal_route = excluded.best_deal_route,
  best_deal_found_ms = excluded.best_deal_found_ms;
"#,
        )
        .bind(o.id.to_string())
        .bind(o.name.clone())
        .bind(i64::from(o.utc_offset_minutes))
        .bind(i64::from(o.notification_defaults.cooldown_minutes))
        .bind(i64::from(q.enabled))
        .bind(q.start.format(TIME_FMT).to_string())
        .bind(q.end.format(TIME_FMT).to_string())
        .bind(i64::from(o.daily_alert_cap))
        .bind(i64::from(o.daily_alert_count))
        .bind(o.daily_alert_count_date.map(|d| d.to_string()))
        .bind(i64::from(o.watch_limit))
        .bind(i64::from(o.active_watch_count))
        .bind(u64_to_i64(o.alerts_received))
        .bind(deal.map(|d| d.amount))
        .bind(deal.map(|d| d.currency.clone()))
        .bind(deal.map(|d| d.route.clone()))
        .bind(deal.map(|d| d.found_at.timestamp_millis()))
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn count_offers_since(&self, since: DateTime<Utc>) -> Result<u64, StoreError> {
        let row = sqlx::query("SELECT COUNT(*) AS n FROM offers WHERE found_ms >= ?;")
            .bind(since.timestamp_millis())
            .fetch_one(&self.pool)
            .await?;
        Ok(col::<i64>(&row, "n")?.max(0) as u64)
    }

    async fn count_active_watches(&self) -> Result<u64, StoreError> {
        let row = sqlx::query("SELECT COUNT(*) AS n FROM watches WHERE is_active = 1;")
            .fetch_one(&self.pool)
            .await?;
        Ok(col::<i64>(&row, "n")?.max(0) as u64)
    }
}

/* =========================
Row mapping + conversions
========================= */

const TIME_FMT: &str = "%H:%M";

fn row_to_watch(r: &AnyRow) -> Result<Watch, StoreError> {
    let flight_type_str: String = col(r, "flight_type")?;
    let flight_type = FlightType::parse(&flight_type_str)
        .ok_or_else(|| StoreError::Permanent(format!("unknown flight type {flight_type_str}")))?;

    let inbound = match (
        opt_date(r, "in_start")?,
        opt_date(r, "in_end")?,
        col::<Option<i64>>(r, "in_flexible")?,
    ) {
        (Some(start), Some(end), flexible) => Some(DateRange::new(start, end, flexible == Some(1))),
        _ => None,
    };

    let best_price = match col::<Option<f64>>(r, "best_price_amount")? {
        Some(amount) => Some(BestPrice {
            amount,
            currency: col::<Option<String>>(r, "best_price_currency")?.unwrap_or_default(),
            offer_ref: col::<Option<String>>(r, "best_price_offer_ref")?.unwrap_or_default(),
            found_at: opt_ts(r, "best_price_found_ms")?.unwrap_or_default(),
        }),
        None => None,
    };

    Ok(Watch {
        id: uuid(r, "watch_id")?,
        owner_id: uuid(r, "owner_id")?,
        name: col(r, "name")?,
        origin: col(r, "origin")?,
        destination: col(r, "destination")?,
        flight_type,
        outbound: DateRange::new(
            date(r, "out_start")?,
            date(r, "out_end")?,
            flag(r, "out_flexible")?,
        ),
        inbound,
        price_threshold: col(r, "price_threshold")?,
        currency: col(r, "currency")?,
        max_stops: col::<Option<i64>>(r, "max_stops")?
            .map(|v| narrow::<u8>(v, "max_stops"))
            .transpose()?,
        passengers: narrow(col(r, "passengers")?, "passengers")?,
        is_active: flag(r, "is_active")?,
        check_interval_minutes: narrow(col(r, "check_interval_minutes")?, "check_interval_minutes")?,
        last_checked_at: opt_ts(r, "last_checked_ms")?,
        best_price,
        notification_policy: NotificationPolicy {
            enabled: flag(r, "notify_enabled")?,
            only_new_lows: flag(r, "only_new_lows")?,
            cooldown_minutes: col::<Option<i64>>(r, "cooldown_minutes")?
                .map(|v| narrow::<u32>(v, "cooldown_minutes"))
                .transpose()?,
            last_sent_at: opt_ts(r, "last_sent_ms")?,
        },
        stats: WatchStats {
            total_checks: narrow(col(r, "total_checks")?, "total_checks")?,
            alerts_sent: narrow(col(r, "alerts_sent")?, "alerts_sent")?,
            average_price: col(r, "stats_average_price")?,
            lowest_price: col(r, "stats_lowest_price")?,
            highest_price: col(r, "stats_highest_price")?,
        },
    })
}

fn row_to_owner(r: &AnyRow) -> Result<Owner, StoreError> {
    let best_deal = match col::<Option<f64>>(r, "best_deal_amount")? {
        Some(amount) => Some(BestDeal {
            amount,
            currency: col::<Option<String>>(r, "best_deal_currency")?.unwrap_or_default(),
            route: col::<Option<String>>(r, "best_deal_route")?.unwrap_or_default(),
            found_at: opt_ts(r, "best_deal_found_ms")?.unwrap_or_default(),
        }),
        None => None,
    };

    Ok(Owner {
        id: uuid(r, "owner_id")?,
        name: col(r, "name")?,
        utc_offset_minutes: narrow(col(r, "utc_offset_minutes")?, "utc_offset_minutes")?,
        notification_defaults: NotificationDefaults {
            cooldown_minutes: narrow(col(r, "cooldown_minutes")?, "cooldown_minutes")?,
            quiet_hours: QuietHours {
                enabled: flag(r, "quiet_enabled")?,
                start: time(r, "quiet_start")?,
                end: time(r, "quiet_end")?,
            },
        },
        daily_alert_cap: narrow(col(r, "daily_alert_cap")?, "daily_alert_cap")?,
        daily_alert_count: narrow(col(r, "daily_alert_count")?, "daily_alert_count")?,
        daily_alert_count_date: opt_date(r, "daily_alert_count_date")?,
        watch_limit: narrow(col(r, "watch_limit")?, "watch_limit")?,
        active_watch_count: narrow(col(r, "active_watch_count")?, "active_watch_count")?,
        alerts_received: narrow(col(r, "alerts_received")?, "alerts_received")?,
        best_deal,
    })
}

fn col<'r, T>(r: &'r AnyRow, name: &str) -> Result<T, StoreError>
where
    T: sqlx::Decode<'r, sqlx::Any> + sqlx::Type<sqlx::Any>,
{
    r.try_get(name).map_err(StoreError::from)
}

fn uuid(r: &AnyRow, name: &str) -> Result<Uuid, StoreError> {
    let s: String = col(r, name)?;
    Uuid::parse_str(&s).map_err(|e| StoreError::Permanent(format!("invalid {name}: {e}")))
}

fn flag(r: &AnyRow, name: &str) -> Result<bool, StoreError> {
    Ok(col::<i64>(r, name)? == 1)
}

fn date(r: &AnyRow, name: &str) -> Result<NaiveDate, StoreError> {
    let s: String = col(r, name)?;
    s.parse()
        .map_err(|e| StoreError::Permanent(format!("invalid {name} {s:?}: {e}")))
}

fn opt_date(r: &AnyRow, name: &str) -> Result<Option<NaiveDate>, StoreError> {
    match col::<Option<String>>(r, name)? {
        Some(s) => s
            .parse()
            .map(Some)
            .map_err(|e| StoreError::Permanent(format!("invalid {name} {s:?}: {e}"))),
        None => Ok(None),
    }
}

fn time(r: &AnyRow, name: &str) -> Result<NaiveTime, StoreError> {
    let s: String = col(r, name)?;
    NaiveTime::parse_from_str(&s, TIME_FMT)
        .map_err(|e| StoreError::Permanent(format!("invalid {name} {s:?}: {e}")))
}

fn opt_ts(r: &AnyRow, name: &str) -> Result<Option<DateTime<Utc>>, StoreError> {
    match col::<Option<i64>>(r, name)? {
        Some(ms) => DateTime::from_timestamp_millis(ms)
            .map(Some)
            .ok_or_else(|| StoreError::Permanent(format!("{name} out of range: {ms}"))),
        None => Ok(None),
    }
}

/* =========================
Numeric safety helpers
========================= */

fn narrow<T: TryFrom<i64>>(v: i64, name: &str) -> Result<T, StoreError> {
    T::try_from(v).map_err(|_| StoreError::Permanent(format!("{name} out of range: {v}")))
}

fn u64_to_i64(v: u64) -> i64 {
    i64::try_from(v).unwrap_or(i64::MAX)
}
