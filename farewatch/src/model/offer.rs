use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};

use crate::model::watch::Watch;

/// Upper bound on results requested from the provider per query.
pub const DEFAULT_RESULT_LIMIT: u32 = 20;

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Price {
    pub amount: f64,
    pub currency: String,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Airport {
    pub code: String,
    pub city: Option<String>,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Stop {
    pub airport: String,
    pub city: Option<String>,
    pub duration_minutes: Option<u32>,
}

/// Provider-side narrowing derived from a watch.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct SearchFilters {
    pub max_price: Option<f64>,
    pub max_stops: Option<u8>,
    pub limit: u32,
}

impl SearchFilters {
    pub fn for_watch(watch: &Watch) -> Self {
        Self {
            max_price: Some(watch.price_threshold),
            max_stops: watch.max_stops,
            limit: DEFAULT_RESULT_LIMIT,
        }
    }
}

impl Default for SearchFilters {
    fn default() -> Self {
        Self {
            max_price: None,
            max_stops: None,
            limit: DEFAULT_RESULT_LIMIT,
        }
    }
}

/// One concrete provider query: a single departure (and optional return) date.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct SearchQuery {
    pub origin: String,
    pub destination: String,
    pub departure_date: NaiveDate,
    pub return_date: Option<NaiveDate>,
    pub passengers: u8,
    pub filters: SearchFilters,
}

impl SearchQuery {
    pub fn for_watch(
        watch: &Watch,
        departure_date: NaiveDate,
        return_date: Option<NaiveDate>,
    ) -> Self {
        Self {
            origin: watch.origin.clone(),
            destination: watch.destination.clone(),
            departure_date,
            return_date,
            passengers: watch.passengers,
            filters: SearchFilters::for_watch(watch),
        }
    }
}

/// A priced itinerary returned by the search collaborator.
///
/// `id` is the provider-issued natural key; persisted offers are write-once.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Offer {
    pub id: String,
    pub price: Price,
    pub origin: Airport,
    pub destination: Airport,
    pub departure_at: DateTime<Utc>,
    pub arrival_at: DateTime<Utc>,
    pub stops: Vec<Stop>,
    pub is_direct: bool,
    pub number_of_stops: u32,
    pub airline: Option<String>,
    pub booking_url: Option<String>,
    pub query: SearchQuery,
    pub found_at: DateTime<Utc>,
}

impl Offer {
    pub fn departure_date(&self) -> NaiveDate {
        self.departure_at.date_naive()
    }

    pub fn route(&self) -> String {
        format!("{}-{}", self.origin.code, self.destination.code)
    }
}
