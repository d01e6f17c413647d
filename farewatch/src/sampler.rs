//! Date sampling for flexible ranges.
//!
//! Turns a (possibly flexible) date range into a bounded list of concrete
//! calendar dates, and combines outbound/inbound samples into the date-pairs
//! queried for one watch.
//!
//! The stride is `max(1, span / (max_samples - 1))` rounded down, so a
//! flexible range's `end` is not guaranteed to be among the samples.

use chrono::{Days, NaiveDate};

use crate::model::{DateRange, Watch};

/// Samples concrete dates from `range`.
///
/// - `start == end` → `[start]`; an inverted range (`end < start`) also
///   yields `[start]`
/// - non-flexible → `[start, end]`
/// - flexible → walk from `start` by `stride` days, at most `max_samples`
///   dates, never past `end`
///
/// `max_samples == 0` yields nothing.
pub fn sample(range: &DateRange, max_samples: usize) -> Vec<NaiveDate> {
    if max_samples == 0 {
        return Vec::new();
    }
    if range.end <= range.start {
        return vec![range.start];
    }
    if !range.flexible {
        return vec![range.start, range.end];
    }
    if max_samples == 1 {
        return vec![range.start];
    }

    let span = range.span_days().max(0) as u64;
    let stride = (span / (max_samples as u64 - 1)).max(1);

    let mut out = Vec::with_capacity(max_samples);
    let mut cursor = Some(range.start);
    while let Some(day) = cursor {
        if day > range.end || out.len() >= max_samples {
            break;
        }
        out.push(day);
        cursor = day.checked_add_days(Days::new(stride));
    }
    out
}

/// One concrete `(departure, return)` combination to query.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct DatePair {
    pub departure: NaiveDate,
    pub return_date: Option<NaiveDate>,
}

/// Builds the date-pairs for a watch: outbound samples for one-way,
/// outbound × inbound (outbound-major order) for round trips.
///
/// The product is truncated to `max_pairs`; return dates earlier than the
/// departure are skipped.
pub fn date_pairs(watch: &Watch, max_samples: usize, max_pairs: usize) -> Vec<DatePair> {
    let outbound = sample(&watch.outbound, max_samples);

    let inbound = match (&watch.inbound, watch.is_roundtrip()) {
        (Some(range), true) => sample(range, max_samples),
        _ => {
            return outbound
                .into_iter()
                .take(max_pairs)
                .map(|departure| DatePair {
                    departure,
                    return_date: None,
                })
                .collect();
        }
    };

    outbound
        .iter()
        .flat_map(|&departure| {
            inbound
                .iter()
                .filter(move |&&ret| ret >= departure)
                .map(move |&ret| DatePair {
                    departure,
                    return_date: Some(ret),
                })
        })
        .take(max_pairs)
        .collect()
}
