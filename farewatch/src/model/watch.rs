use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::MonitorError;

/// Lower bound on how often a single watch may ask to be re-checked.
pub const MIN_CHECK_INTERVAL_MINUTES: u32 = 15;
pub const MAX_PASSENGERS: u8 = 9;
pub const MAX_STOPS_LIMIT: u8 = 5;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FlightType {
    Oneway,
    Roundtrip,
}

impl FlightType {
    pub fn as_str(&self) -> &'static str {
        match self {
            FlightType::Oneway => "oneway",
            FlightType::Roundtrip => "roundtrip",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "oneway" => Some(FlightType::Oneway),
            "roundtrip" => Some(FlightType::Roundtrip),
            _ => None,
        }
    }
}

/// Calendar window for one leg. A non-flexible range means "exactly these
/// endpoint dates"; a flexible one is sampled across its span.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct DateRange {
    pub start: NaiveDate,
    pub end: NaiveDate,
    pub flexible: bool,
}

impl DateRange {
    pub fn new(start: NaiveDate, end: NaiveDate, flexible: bool) -> Self {
        Self {
            start,
            end,
            flexible,
        }
    }

    pub fn single(day: NaiveDate) -> Self {
        Self::new(day, day, false)
    }

    pub fn span_days(&self) -> i64 {
        (self.end - self.start).num_days()
    }
}

/// Lowest price that was actually delivered to the owner.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct BestPrice {
    pub amount: f64,
    pub currency: String,
    pub offer_ref: String,
    pub found_at: DateTime<Utc>,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct NotificationPolicy {
    pub enabled: bool,
    pub only_new_lows: bool,
    /// Watch-level override; `None` falls back to the owner's default.
    pub cooldown_minutes: Option<u32>,
    pub last_sent_at: Option<DateTime<Utc>>,
}

impl Default for NotificationPolicy {
    fn default() -> Self {
        Self {
            enabled: true,
            only_new_lows: true,
            cooldown_minutes: None,
            last_sent_at: None,
        }
    }
}

/// Running price statistics. Every populated price field is sane
/// (finite, `> 0`, below the sanity ceiling).
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct WatchStats {
    pub total_checks: u64,
    pub alerts_sent: u64,
    pub average_price: Option<f64>,
    pub lowest_price: Option<f64>,
    pub highest_price: Option<f64>,
}

impl WatchStats {
    /// Drops the price aggregates, keeping the counters.
    pub fn clear_prices(&mut self) {
        self.average_price = None;
        self.lowest_price = None;
        self.highest_price = None;
    }
}

/// A persisted route/date-range/price-threshold subscription owned by one owner.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Watch {
    pub id: Uuid,
    pub owner_id: Uuid,
    pub name: String,
    pub origin: String,
    pub destination: String,
    pub flight_type: FlightType,
    pub outbound: DateRange,
    pub inbound: Option<DateRange>,
    pub price_threshold: f64,
    pub currency: String,
    pub max_stops: Option<u8>,
    pub passengers: u8,
    pub is_active: bool,
    pub check_interval_minutes: u32,
    pub last_checked_at: Option<DateTime<Utc>>,
    pub best_price: Option<BestPrice>,
    pub notification_policy: NotificationPolicy,
    pub stats: WatchStats,
}

impl Watch {
    /// A fresh, active one-way watch with default policy and empty stats.
    pub fn new(
        owner_id: Uuid,
        origin: impl Into<String>,
        destination: impl Into<String>,
        outbound: DateRange,
        price_threshold: f64,
    ) -> Self {
        let origin = origin.into();
        let destination = destination.into();
        Self {
            id: Uuid::new_v4(),
            owner_id,
            name: format!("{origin}-{destination}"),
            origin,
            destination,
            flight_type: FlightType::Oneway,
            outbound,
            inbound: None,
            price_threshold,
            currency: "EUR".to_string(),
            max_stops: None,
            passengers: 1,
            is_active: true,
            check_interval_minutes: 30,
            last_checked_at: None,
            best_price: None,
            notification_policy: NotificationPolicy::default(),
            stats: WatchStats::default(),
        }
    }

    /// Turns this watch into a round trip with the given inbound range.
    pub fn with_return(mut self, inbound: DateRange) -> Self {
        self.flight_type = FlightType::Roundtrip;
        self.inbound = Some(inbound);
        self
    }

    pub fn route(&self) -> String {
        format!("{}-{}", self.origin, self.destination)
    }

    pub fn is_roundtrip(&self) -> bool {
        self.flight_type == FlightType::Roundtrip
    }

    /// Checks the structural invariants a watch must satisfy before it is stored.
    pub fn validate(&self) -> Result<(), MonitorError> {
        let invalid =
            |msg: String| -> Result<(), MonitorError> { Err(MonitorError::InvalidWatch(msg)) };

        if self.origin.trim().is_empty() || self.destination.trim().is_empty() {
            return invalid("origin and destination are required".into());
        }
        if !(self.price_threshold.is_finite() && self.price_threshold > 0.0) {
            return invalid(format!(
                "price threshold must be > 0, got {}",
                self.price_threshold
            ));
        }
        if self.check_interval_minutes < MIN_CHECK_INTERVAL_MINUTES {
            return invalid(format!(
                "check interval must be >= {MIN_CHECK_INTERVAL_MINUTES} minutes"
            ));
        }
        if self.passengers == 0 || self.passengers > MAX_PASSENGERS {
            return invalid(format!("passengers must be 1..={MAX_PASSENGERS}"));
        }
        if matches!(self.max_stops, Some(n) if n > MAX_STOPS_LIMIT) {
            return invalid(format!("max stops must be <= {MAX_STOPS_LIMIT}"));
        }
        if self.outbound.end < self.outbound.start {
            return invalid("outbound range ends before it starts".into());
        }
        match (self.flight_type, &self.inbound) {
            (FlightType::Roundtrip, None) => {
                return invalid("roundtrip watch requires an inbound range".into());
            }
            (FlightType::Oneway, Some(_)) => {
                return invalid("oneway watch must not carry an inbound range".into());
            }
            (FlightType::Roundtrip, Some(inbound)) if inbound.end < inbound.start => {
                return invalid("inbound range ends before it starts".into());
            }
            _ => {}
        }

        Ok(())
    }
}
