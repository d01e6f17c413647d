//! Flight-search collaborator seam.
//!
//! The orchestrator only sees [`FlightSearch`]: one call per date-pair that
//! may fail, and a pure `parse` that never does.

pub mod http;

use async_trait::async_trait;
use serde_json::Value;

use crate::error::SearchError;
use crate::model::{Offer, SearchQuery};

pub use http::HttpFlightSearch;

/// Unparsed provider payload.
#[derive(Clone, Debug, PartialEq)]
pub struct RawResponse(pub Value);

#[async_trait]
pub trait FlightSearch: Send + Sync {
    /// Issues one provider query. May fail with transport/provider errors.
    async fn search(&self, query: &SearchQuery) -> Result<RawResponse, SearchError>;

    /// Extracts offers from `raw`, dropping any item that cannot be parsed.
    fn parse(&self, raw: &RawResponse, query: &SearchQuery) -> Vec<Offer>;
}
