use std::time::Duration;

use chrono::{DateTime, NaiveDate, Utc};
use reqwest::Client;
use serde::Serialize;
use tracing::{debug, instrument, warn};
use uuid::Uuid;

use crate::error::NotifyError;
use crate::metrics::MonitoringReport;
use crate::model::{Offer, Owner, Watch};
use crate::notify::Notifier;

/// JSON body posted for a price alert.
#[derive(Debug, Serialize)]
pub struct AlertPayload<'a> {
    pub kind: &'static str,
    pub owner_id: Uuid,
    pub watch_id: Uuid,
    pub watch_name: &'a str,
    pub route: String,
    pub amount: f64,
    pub currency: &'a str,
    pub threshold: f64,
    pub departure_date: NaiveDate,
    pub return_date: Option<NaiveDate>,
    pub number_of_stops: u32,
    pub previous_best: Option<f64>,
    pub is_new_low: bool,
    pub booking_url: Option<&'a str>,
    pub found_at: DateTime<Utc>,
}

impl<'a> AlertPayload<'a> {
    pub fn new(offer: &'a Offer, watch: &'a Watch, owner: &Owner) -> Self {
        let previous_best = watch.best_price.as_ref().map(|b| b.amount);
        Self {
            kind: "price_alert",
            owner_id: owner.id,
            watch_id: watch.id,
            watch_name: &watch.name,
            route: offer.route(),
            amount: offer.price.amount,
            currency: &offer.price.currency,
            threshold: watch.price_threshold,
            departure_date: offer.departure_date(),
            return_date: offer.query.return_date,
            number_of_stops: offer.number_of_stops,
            previous_best,
            is_new_low: previous_best.is_none_or(|b| offer.price.amount < b),
            booking_url: offer.booking_url.as_deref(),
            found_at: offer.found_at,
        }
    }
}

#[derive(Debug, Serialize)]
struct ReportPayload<'a> {
    kind: &'static str,
    #[serde(flatten)]
    report: &'a MonitoringReport,
}

/// Posts alerts and reports as JSON to a single webhook URL.
#[derive(Clone)]
pub struct WebhookNotifier {
    http: Client,
    url: String,
}

impl WebhookNotifier {
    pub fn new(url: String) -> Result<Self, NotifyError> {
        let http = Client::builder()
            .timeout(Duration::from_secs(10))
            .build()?;
        Ok(Self { http, url })
    }

    async fn post<T: Serialize + ?Sized>(&self, body: &T) -> Result<bool, NotifyError> {
        let resp = self.http.post(&self.url).json(body).send().await?;
        let status = resp.status();
        if status.is_success() {
            return Ok(true);
        }
        warn!(%status, "webhook rejected notification");
        Ok(false)
    }
}

#[async_trait::async_trait]
impl Notifier for WebhookNotifier {
    #[instrument(skip_all, fields(watch_id = %watch.id, amount = offer.price.amount))]
    async fn deliver(
        &self,
        offer: &Offer,
        watch: &Watch,
        owner: &Owner,
    ) -> Result<bool, NotifyError> {
        let delivered = self.post(&AlertPayload::new(offer, watch, owner)).await?;
        debug!(delivered, "price alert posted");
        Ok(delivered)
    }

    async fn deliver_report(&self, report: &MonitoringReport) -> Result<bool, NotifyError> {
        self.post(&ReportPayload {
            kind: "monitoring_report",
            report,
        })
        .await
    }
}
