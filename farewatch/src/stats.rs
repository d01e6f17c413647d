//! Running price statistics for a watch.
//!
//! Offer prices come from an untrusted provider and previously stored stats
//! may already be corrupt, so every amount is re-validated against
//! [`SANITY_CEILING`] before it is used or written.

use tracing::{debug, warn};

use crate::model::{Offer, WatchStats};

/// Exclusive upper bound for any plausible price, in currency units.
pub const SANITY_CEILING: f64 = 10_000.0;

/// Finite, strictly positive and below the ceiling.
pub fn is_sane_price(amount: f64) -> bool {
    amount.is_finite() && amount > 0.0 && amount < SANITY_CEILING
}

fn sane(v: Option<f64>) -> Option<f64> {
    v.filter(|x| is_sane_price(*x))
}

fn round2(v: f64) -> f64 {
    (v * 100.0).round() / 100.0
}

/// Folds one check's offers into `prev`.
pub fn update(prev: &WatchStats, offers: &[Offer]) -> WatchStats {
    update_from_amounts(prev, offers.iter().map(|o| o.price.amount))
}

/// Folds raw price amounts into `prev`.
///
/// `total_checks` always advances by one. Price aggregates are recomputed
/// only when at least one amount survives filtering; otherwise the previous
/// aggregates are kept if sane and dropped if not.
pub fn update_from_amounts<I>(prev: &WatchStats, amounts: I) -> WatchStats
where
    I: IntoIterator<Item = f64>,
{
    let mut seen = 0usize;
    let valid: Vec<f64> = amounts
        .into_iter()
        .inspect(|_| seen += 1)
        .filter(|a| is_sane_price(*a))
        .collect();

    if valid.len() < seen {
        warn!(
            dropped = seen - valid.len(),
            total = seen,
            "discarded implausible prices"
        );
    }

    let prev_avg = sane(prev.average_price);
    let prev_low = sane(prev.lowest_price);
    let prev_high = sane(prev.highest_price);

    let mut next = WatchStats {
        total_checks: prev.total_checks.saturating_add(1),
        alerts_sent: prev.alerts_sent,
        average_price: prev_avg,
        lowest_price: prev_low,
        highest_price: prev_high,
    };

    if valid.is_empty() {
        debug!(total_checks = next.total_checks, "no valid prices; keeping previous aggregates");
        return next;
    }

    let mean = valid.iter().sum::<f64>() / valid.len() as f64;
    let batch_min = valid.iter().copied().fold(f64::INFINITY, f64::min);
    let batch_max = valid.iter().copied().fold(f64::NEG_INFINITY, f64::max);

    next.average_price = sane(Some(round2(mean))).or(prev_avg);
    next.lowest_price = Some(prev_low.map_or(batch_min, |p| p.min(batch_min)));
    next.highest_price = Some(prev_high.map_or(batch_max, |p| p.max(batch_max)));

    debug!(
        total_checks = next.total_checks,
        valid = valid.len(),
        average = next.average_price,
        lowest = next.lowest_price,
        highest = next.highest_price,
        "stats updated"
    );

    next
}
