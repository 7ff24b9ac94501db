//! Upstream prediction feed: one logical query per (agency, route, stop).

use async_trait::async_trait;
use tracing::debug;

use crate::error::FeedError;
use crate::fetch::{HttpClient, fetch_bytes};
use crate::parser::parse_predictions;
use crate::prediction::PredictionRecord;

/// Default endpoint of the public XML prediction feed.
pub const DEFAULT_FEED_URL: &str = "http://webservices.nextbus.com/service/publicXMLFeed";

/// "Fetch predictions for route X at stop Y" for one agency.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PredictionQuery {
    pub agency: String,
    pub route: String,
    pub stop: String,
}

impl PredictionQuery {
    pub fn new(agency: &str, route: &str, stop: &str) -> Self {
        Self {
            agency: agency.to_string(),
            route: route.to_string(),
            stop: stop.to_string(),
        }
    }

    /// Query-string parameters understood by the feed.
    pub fn params(&self) -> [(&str, &str); 4] {
        [
            ("command", "predictions"),
            ("a", self.agency.as_str()),
            ("r", self.route.as_str()),
            ("s", self.stop.as_str()),
        ]
    }
}

/// Source of arrival predictions for a single route at a single stop.
///
/// Implementations are shared across concurrently running sub-requests.
#[async_trait]
pub trait PredictionFeed: Send + Sync + 'static {
    async fn predictions(&self, query: &PredictionQuery) -> Result<Vec<PredictionRecord>, FeedError>;
}

/// [`PredictionFeed`] backed by the public XML feed over HTTP.
pub struct HttpPredictionFeed<C> {
    client: C,
    base_url: String,
}

impl<C: HttpClient> HttpPredictionFeed<C> {
    pub fn new(client: C, base_url: impl Into<String>) -> Self {
        Self {
            client,
            base_url: base_url.into(),
        }
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }
}

#[async_trait]
impl<C: HttpClient + 'static> PredictionFeed for HttpPredictionFeed<C> {
    #[tracing::instrument(skip(self), fields(agency = %query.agency, route = %query.route, stop = %query.stop))]
    async fn predictions(&self, query: &PredictionQuery) -> Result<Vec<PredictionRecord>, FeedError> {
        let bytes = fetch_bytes(&self.client, &self.base_url, &query.params()).await?;
        debug!(bytes = bytes.len(), "Feed bytes received, parsing");
        parse_predictions(&bytes)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_query_params() {
        let query = PredictionQuery::new("mbta", "1", "110");
        assert_eq!(
            query.params(),
            [("command", "predictions"), ("a", "mbta"), ("r", "1"), ("s", "110")]
        );
    }
}
