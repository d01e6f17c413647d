use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use uuid::Uuid;

use crate::error::StoreError;
use crate::model::{Offer, Owner, Watch};
use crate::stats::{SANITY_CEILING, is_sane_price};

/// Persistence seam used by the orchestrator.
///
/// Implementations must report schema violations as
/// [`StoreError::Validation`] and connectivity problems as
/// [`StoreError::Transport`]; the orchestrator's stats recovery depends on it.
#[async_trait]
pub trait WatchStore: Send + Sync {
    /// Active watches never checked, or last checked at least `interval` ago.
    async fn find_due_watches(
        &self,
        now: DateTime<Utc>,
        interval: Duration,
    ) -> Result<Vec<Watch>, StoreError>;

    async fn find_watch(&self, id: &Uuid) -> Result<Option<Watch>, StoreError>;

    /// Persists `last_checked_at` alone, ahead of the (slow) search phase.
    async fn touch_last_checked(&self, id: &Uuid, at: DateTime<Utc>) -> Result<(), StoreError>;

    async fn save_watch(&self, watch: &Watch) -> Result<(), StoreError>;

    /// Write-once by natural id. Returns `false` when the offer already existed.
    async fn insert_offer_if_absent(&self, offer: &Offer) -> Result<bool, StoreError>;

    async fn find_owner(&self, id: &Uuid) -> Result<Option<Owner>, StoreError>;

    async fn save_owner(&self, owner: &Owner) -> Result<(), StoreError>;

    async fn count_active_watches(&self) -> Result<u64, StoreError>;

    /// Offers first stored at or after `since`.
    async fn count_offers_since(&self, since: DateTime<Utc>) -> Result<u64, StoreError>;
}

/// Schema-level numeric constraints shared by store implementations.
pub fn validate_numeric_state(watch: &Watch) -> Result<(), StoreError> {
    let fields = [
        ("stats.average_price", watch.stats.average_price),
        ("stats.lowest_price", watch.stats.lowest_price),
        ("stats.highest_price", watch.stats.highest_price),
        ("best_price.amount", watch.best_price.as_ref().map(|b| b.amount)),
    ];

    for (field, value) in fields {
        if let Some(v) = value {
            if !is_sane_price(v) {
                return Err(StoreError::validation(
                    field,
                    format!("{v} is outside (0, {SANITY_CEILING})"),
                ));
            }
        }
    }

    if !(watch.price_threshold.is_finite() && watch.price_threshold > 0.0) {
        return Err(StoreError::validation(
            "price_threshold",
            format!("{} must be > 0", watch.price_threshold),
        ));
    }

    Ok(())
}
