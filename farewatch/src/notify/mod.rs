//! Outbound notification seam. Message formatting and the delivery channel
//! live behind [`Notifier`]; the orchestrator only cares whether delivery
//! was accepted.

pub mod webhook;

use async_trait::async_trait;

use crate::error::NotifyError;
use crate::metrics::MonitoringReport;
use crate::model::{Offer, Owner, Watch};

pub use webhook::WebhookNotifier;

#[async_trait]
pub trait Notifier: Send + Sync {
    /// `Ok(true)` means accepted for delivery. `Ok(false)` and `Err` both
    /// mean "not delivered".
    async fn deliver(&self, offer: &Offer, watch: &Watch, owner: &Owner)
    -> Result<bool, NotifyError>;

    /// Delivers the periodic operational report.
    async fn deliver_report(&self, report: &MonitoringReport) -> Result<bool, NotifyError>;
}

/// Stand-in used when no delivery channel is configured: every attempt
/// fails, so no alert side effects are ever applied.
pub struct UnconfiguredNotifier;

#[async_trait]
impl Notifier for UnconfiguredNotifier {
    async fn deliver(&self, _: &Offer, _: &Watch, _: &Owner) -> Result<bool, NotifyError> {
        Err(NotifyError::NotConfigured)
    }

    async fn deliver_report(&self, _: &MonitoringReport) -> Result<bool, NotifyError> {
        Err(NotifyError::NotConfigured)
    }
}
