//! Error types for prediction fetching.

use thiserror::Error;

/// Failure of a single sub-request against the upstream prediction feed.
///
/// Transport and parse failures are treated the same way by the aggregator:
/// they are captured for the route that produced them and never abort sibling
/// requests. Malformed individual predictions are not errors at all; the
/// parser drops them.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum FeedError {
    #[error("transport error: {0}")]
    Transport(String),

    #[error("request timed out")]
    Timeout,

    #[error("upstream returned status {0}")]
    Status(u16),

    #[error("malformed feed payload: {0}")]
    Parse(String),

    /// The feed answered with an `<Error>` element instead of predictions.
    #[error("upstream error: {message}")]
    Upstream { message: String, should_retry: bool },

    /// A sub-request task ended without producing a result (panic or abort).
    #[error("sub-request task failed: {0}")]
    Task(String),
}

impl From<reqwest::Error> for FeedError {
    fn from(e: reqwest::Error) -> Self {
        if e.is_timeout() {
            FeedError::Timeout
        } else if let Some(status) = e.status() {
            FeedError::Status(status.as_u16())
        } else {
            FeedError::Transport(e.to_string())
        }
    }
}

impl From<roxmltree::Error> for FeedError {
    fn from(e: roxmltree::Error) -> Self {
        FeedError::Parse(e.to_string())
    }
}

impl From<tokio::task::JoinError> for FeedError {
    fn from(e: tokio::task::JoinError) -> Self {
        FeedError::Task(e.to_string())
    }
}
