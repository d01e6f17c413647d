use std::time::Duration;

use chrono::{DateTime, Utc};
use reqwest::Client;
use serde::Deserialize;
use tracing::{debug, instrument, warn};

use crate::error::SearchError;
use crate::model::{Airport, Offer, Price, SearchQuery, Stop};
use crate::search::{FlightSearch, RawResponse};

/// Thin HTTP client for a flight-search gateway that already speaks a
/// normalised JSON shape (`{"data": [ItemWire, ...]}`).
#[derive(Clone)]
pub struct HttpFlightSearch {
    http: Client,
    base_url: String,
    api_key: Option<String>,
}

impl HttpFlightSearch {
    pub fn new(
        base_url: String,
        api_key: Option<String>,
        timeout: Duration,
    ) -> Result<Self, SearchError> {
        let http = Client::builder()
            .timeout(timeout)
            .pool_idle_timeout(Duration::from_secs(30))
            .tcp_keepalive(Duration::from_secs(30))
            .build()?;

        Ok(Self {
            http,
            base_url: base_url.trim_end_matches('/').to_string(),
            api_key,
        })
    }

    fn query_params(query: &SearchQuery) -> Vec<(&'static str, String)> {
        let mut params = vec![
            ("origin", query.origin.clone()),
            ("destination", query.destination.clone()),
            ("departure_date", query.departure_date.to_string()),
            ("passengers", query.passengers.to_string()),
            ("limit", query.filters.limit.to_string()),
        ];
        if let Some(ret) = query.return_date {
            params.push(("return_date", ret.to_string()));
        }
        if let Some(max_price) = query.filters.max_price {
            params.push(("max_price", max_price.to_string()));
        }
        if let Some(max_stops) = query.filters.max_stops {
            params.push(("max_stops", max_stops.to_string()));
        }
        params
    }
}

#[async_trait::async_trait]
impl FlightSearch for HttpFlightSearch {
    #[instrument(
        skip(self, query),
        fields(route = %format!("{}-{}", query.origin, query.destination), date = %query.departure_date),
        level = "debug"
    )]
    async fn search(&self, query: &SearchQuery) -> Result<RawResponse, SearchError> {
        let url = format!("{}/search", self.base_url);

        let mut req = self.http.get(&url).query(&Self::query_params(query));
        if let Some(key) = &self.api_key {
            req = req.header("apikey", key);
        }

        let resp = req.send().await?;

        let status = resp.status();
        if status.is_client_error() {
            let body = resp.text().await.unwrap_or_default();
            return Err(SearchError::Provider(format!("{status}: {body}")));
        }

        let body = resp.error_for_status()?.json().await?;
        debug!("search response received");
        Ok(RawResponse(body))
    }

    fn parse(&self, raw: &RawResponse, query: &SearchQuery) -> Vec<Offer> {
        parse_offers(raw, query, Utc::now())
    }
}

#[derive(Debug, Deserialize)]
struct Envelope {
    #[serde(default)]
    data: Vec<serde_json::Value>,
}

#[derive(Debug, Deserialize)]
struct ItemWire {
    id: String,
    price: f64,
    #[serde(default = "default_currency")]
    currency: String,
    origin: String,
    destination: String,
    #[serde(default)]
    origin_city: Option<String>,
    #[serde(default)]
    destination_city: Option<String>,
    departure: DateTime<Utc>,
    arrival: DateTime<Utc>,
    #[serde(default)]
    stops: Vec<StopWire>,
    #[serde(default)]
    airline: Option<String>,
    #[serde(default)]
    booking_url: Option<String>,
}

#[derive(Debug, Deserialize)]
struct StopWire {
    airport: String,
    #[serde(default)]
    city: Option<String>,
    #[serde(default)]
    duration_minutes: Option<u32>,
}

fn default_currency() -> String {
    "EUR".to_string()
}

/// Parses the normalised gateway payload. Items that fail to deserialize are
/// skipped individually so one bad entry never loses the rest of the batch.
pub fn parse_offers(
    raw: &RawResponse,
    query: &SearchQuery,
    found_at: DateTime<Utc>,
) -> Vec<Offer> {
    let envelope: Envelope = match serde_json::from_value(raw.0.clone()) {
        Ok(e) => e,
        Err(e) => {
            warn!(error = %e, "search payload has no usable data array");
            return Vec::new();
        }
    };

    let mut out = Vec::with_capacity(envelope.data.len());
    for item in envelope.data {
        match serde_json::from_value::<ItemWire>(item) {
            Ok(w) if !w.id.is_empty() => out.push(item_to_offer(w, query, found_at)),
            Ok(_) => warn!("skipping offer without id"),
            Err(e) => warn!(error = %e, "skipping malformed offer"),
        }
    }
    out
}

fn item_to_offer(w: ItemWire, query: &SearchQuery, found_at: DateTime<Utc>) -> Offer {
    let number_of_stops = w.stops.len() as u32;
    Offer {
        id: w.id,
        price: Price {
            amount: w.price,
            currency: w.currency,
        },
        origin: Airport {
            code: w.origin,
            city: w.origin_city,
        },
        destination: Airport {
            code: w.destination,
            city: w.destination_city,
        },
        departure_at: w.departure,
        arrival_at: w.arrival,
        stops: w
            .stops
            .into_iter()
            .map(|s| Stop {
                airport: s.airport,
                city: s.city,
                duration_minutes: s.duration_minutes,
            })
            .collect(),
        is_direct: number_of_stops == 0,
        number_of_stops,
        airline: w.airline,
        booking_url: w.booking_url,
        query: query.clone(),
        found_at,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::SearchFilters;
    use chrono::{NaiveDate, TimeZone};
    use serde_json::json;

    fn query() -> SearchQuery {
        SearchQuery {
            origin: "MAD".into(),
            destination: "BCN".into(),
            departure_date: NaiveDate::from_ymd_opt(2026, 5, 1).unwrap(),
            return_date: None,
            passengers: 1,
            filters: SearchFilters::default(),
        }
    }

    #[test]
    fn parses_valid_items_and_drops_broken_ones() {
        let raw = RawResponse(json!({
            "data": [
                {
                    "id": "a1", "price": 95.5, "origin": "MAD", "destination": "BCN",
                    "departure": "2026-05-01T08:00:00Z", "arrival": "2026-05-01T09:15:00Z"
                },
                { "id": "broken", "price": "cheap" },
                {
                    "id": "b2", "price": 120.0, "currency": "USD",
                    "origin": "MAD", "destination": "BCN",
                    "departure": "2026-05-01T18:00:00Z", "arrival": "2026-05-01T22:00:00Z",
                    "stops": [{ "airport": "VLC", "duration_minutes": 50 }]
                },
                {
                    "id": "", "price": 10.0, "origin": "MAD", "destination": "BCN",
                    "departure": "2026-05-01T08:00:00Z", "arrival": "2026-05-01T09:00:00Z"
                }
            ]
        }));
        let found_at = Utc.with_ymd_and_hms(2026, 4, 1, 0, 0, 0).unwrap();

        let offers = parse_offers(&raw, &query(), found_at);

        assert_eq!(offers.len(), 2);
        assert_eq!(offers[0].id, "a1");
        assert!(offers[0].is_direct);
        assert_eq!(offers[0].price.currency, "EUR");
        assert_eq!(offers[1].number_of_stops, 1);
        assert!(!offers[1].is_direct);
        assert_eq!(offers[1].query, query());
    }

    #[test]
    fn payload_without_data_yields_nothing() {
        let now = Utc::now();
        assert!(parse_offers(&RawResponse(json!("oops")), &query(), now).is_empty());
        assert!(parse_offers(&RawResponse(json!({})), &query(), now).is_empty());
    }

    #[test]
    fn query_params_include_optional_filters() {
        let mut q = query();
        q.return_date = NaiveDate::from_ymd_opt(2026, 5, 8);
        q.filters.max_stops = Some(1);
        q.filters.max_price = Some(150.0);

        let params = HttpFlightSearch::query_params(&q);
        assert!(params.contains(&("return_date", "2026-05-08".to_string())));
        assert!(params.contains(&("max_stops", "1".to_string())));
        assert!(params.contains(&("max_price", "150".to_string())));
    }
}
