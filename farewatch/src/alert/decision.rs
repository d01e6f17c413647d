use chrono::{DateTime, Duration, Utc};

use crate::model::{Offer, Owner, Watch};

/// Why an offer did not qualify for a notification. Variants are listed in
/// gate order; evaluation stops at the first failing gate.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Suppression {
    NotificationsDisabled,
    AboveThreshold,
    DailyCapReached,
    QuietHours,
    NotNewLow,
    CoolingDown,
}

impl Suppression {
    pub fn as_str(&self) -> &'static str {
        match self {
            Suppression::NotificationsDisabled => "notifications_disabled",
            Suppression::AboveThreshold => "above_threshold",
            Suppression::DailyCapReached => "daily_cap_reached",
            Suppression::QuietHours => "quiet_hours",
            Suppression::NotNewLow => "not_new_low",
            Suppression::CoolingDown => "cooling_down",
        }
    }
}

/// Watch-level cooldown override, else the owner's default.
pub fn resolved_cooldown(watch: &Watch, owner: &Owner) -> Duration {
    let minutes = watch
        .notification_policy
        .cooldown_minutes
        .unwrap_or(owner.notification_defaults.cooldown_minutes);
    Duration::minutes(i64::from(minutes))
}

/// Runs the six gates in order. Pure: nothing is mutated, the owner's daily
/// counter is only *read* as reset when its date is stale.
pub fn evaluate(
    watch: &Watch,
    offer: &Offer,
    owner: &Owner,
    now: DateTime<Utc>,
) -> Result<(), Suppression> {
    let policy = &watch.notification_policy;
    let amount = offer.price.amount;

    if !policy.enabled {
        return Err(Suppression::NotificationsDisabled);
    }

    // NaN fails this comparison and is therefore suppressed.
    if !(amount <= watch.price_threshold) {
        return Err(Suppression::AboveThreshold);
    }

    if owner.alerts_sent_on(owner.local_today(now)) >= owner.daily_alert_cap {
        return Err(Suppression::DailyCapReached);
    }

    let local_time = owner.local_now(now).time();
    if owner.notification_defaults.quiet_hours.contains(local_time) {
        return Err(Suppression::QuietHours);
    }

    if policy.only_new_lows {
        if let Some(best) = &watch.best_price {
            if amount >= best.amount {
                return Err(Suppression::NotNewLow);
            }
        }
    }

    if let Some(last) = policy.last_sent_at {
        if now - last < resolved_cooldown(watch, owner) {
            return Err(Suppression::CoolingDown);
        }
    }

    Ok(())
}

/// True iff every gate passes.
pub fn should_alert(watch: &Watch, offer: &Offer, owner: &Owner, now: DateTime<Utc>) -> bool {
    evaluate(watch, offer, owner, now).is_ok()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{
        Airport, BestPrice, DateRange, Price, QuietHours, SearchFilters, SearchQuery,
    };
    use chrono::{NaiveDate, NaiveTime, TimeZone};
    use uuid::Uuid;

    fn now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 4, 10, 12, 0, 0).unwrap()
    }

    fn mk_watch(threshold: f64) -> Watch {
        let day = NaiveDate::from_ymd_opt(2026, 5, 1).unwrap();
        let mut w = Watch::new(Uuid::new_v4(), "MAD", "BCN", DateRange::single(day), threshold);
        w.notification_policy.only_new_lows = false;
        w
    }

    fn mk_offer(amount: f64) -> Offer {
        let dep = Utc.with_ymd_and_hms(2026, 5, 1, 8, 0, 0).unwrap();
        Offer {
            id: format!("offer-{amount}"),
            price: Price {
                amount,
                currency: "EUR".into(),
            },
            origin: Airport {
                code: "MAD".into(),
                city: None,
            },
            destination: Airport {
                code: "BCN".into(),
                city: None,
            },
            departure_at: dep,
            arrival_at: dep + Duration::hours(1),
            stops: vec![],
            is_direct: true,
            number_of_stops: 0,
            airline: None,
            booking_url: None,
            query: SearchQuery {
                origin: "MAD".into(),
                destination: "BCN".into(),
                departure_date: dep.date_naive(),
                return_date: None,
                passengers: 1,
                filters: SearchFilters::default(),
            },
            found_at: now(),
        }
    }

    #[test]
    fn passes_when_all_gates_open() {
        assert_eq!(evaluate(&mk_watch(150.0), &mk_offer(95.0), &Owner::new("o"), now()), Ok(()));
    }

    #[test]
    fn disabled_policy_short_circuits() {
        let mut w = mk_watch(150.0);
        w.notification_policy.enabled = false;
        assert_eq!(
            evaluate(&w, &mk_offer(10.0), &Owner::new("o"), now()),
            Err(Suppression::NotificationsDisabled)
        );
    }

    #[test]
    fn price_above_threshold_is_rejected() {
        let owner = Owner::new("o");
        let w = mk_watch(150.0);

        assert!(should_alert(&w, &mk_offer(150.0), &owner, now()));
        assert!(!should_alert(&w, &mk_offer(150.01), &owner, now()));
        assert!(!should_alert(&w, &mk_offer(f64::NAN), &owner, now()));
    }

    #[test]
    fn daily_cap_counts_only_today() {
        let mut owner = Owner::new("o");
        owner.daily_alert_cap = 2;
        owner.daily_alert_count = 2;
        owner.daily_alert_count_date = Some(now().date_naive());

        assert_eq!(
            evaluate(&mk_watch(150.0), &mk_offer(95.0), &owner, now()),
            Err(Suppression::DailyCapReached)
        );

        owner.daily_alert_count_date = NaiveDate::from_ymd_opt(2026, 4, 9);
        assert!(should_alert(&mk_watch(150.0), &mk_offer(95.0), &owner, now()));
    }

    #[test]
    fn quiet_hours_use_owner_local_time() {
        let mut owner = Owner::new("o");
        owner.notification_defaults.quiet_hours = QuietHours {
            enabled: true,
            start: NaiveTime::from_hms_opt(23, 0, 0).unwrap(),
            end: NaiveTime::from_hms_opt(7, 0, 0).unwrap(),
        };

        // 12:00 UTC is 23:30 at +11:30.
        owner.utc_offset_minutes = 11 * 60 + 30;
        assert_eq!(
            evaluate(&mk_watch(150.0), &mk_offer(95.0), &owner, now()),
            Err(Suppression::QuietHours)
        );

        owner.utc_offset_minutes = 0;
        assert!(should_alert(&mk_watch(150.0), &mk_offer(95.0), &owner, now()));
    }

    #[test]
    fn only_new_lows_requires_strictly_lower_price() {
        let owner = Owner::new("o");
        let mut w = mk_watch(150.0);
        w.notification_policy.only_new_lows = true;
        w.best_price = Some(BestPrice {
            amount: 100.0,
            currency: "EUR".into(),
            offer_ref: "prev".into(),
            found_at: now() - Duration::days(3),
        });

        assert_eq!(evaluate(&w, &mk_offer(100.0), &owner, now()), Err(Suppression::NotNewLow));
        assert!(should_alert(&w, &mk_offer(99.0), &owner, now()));
    }

    #[test]
    fn cooldown_blocks_until_elapsed() {
        let owner = Owner::new("o");
        let mut w = mk_watch(150.0);
        w.notification_policy.cooldown_minutes = Some(90);
        w.notification_policy.last_sent_at = Some(now() - Duration::minutes(89));

        assert_eq!(evaluate(&w, &mk_offer(95.0), &owner, now()), Err(Suppression::CoolingDown));

        w.notification_policy.last_sent_at = Some(now() - Duration::minutes(90));
        assert!(should_alert(&w, &mk_offer(95.0), &owner, now()));
    }

    #[test]
    fn cooldown_falls_back_to_owner_default() {
        let mut owner = Owner::new("o");
        owner.notification_defaults.cooldown_minutes = 30;
        let mut w = mk_watch(150.0);
        w.notification_policy.last_sent_at = Some(now() - Duration::minutes(31));

        assert_eq!(resolved_cooldown(&w, &owner), Duration::minutes(30));
        assert!(should_alert(&w, &mk_offer(95.0), &owner, now()));
    }
}
