pub mod aggregator;
pub mod config;
pub mod error;
pub mod feed;
pub mod fetch;
pub mod output;
pub mod parser;
pub mod prediction;
pub mod proximity;
pub mod scheduler;
pub mod timer;

pub use aggregator::{FetchHandle, PredictionAggregator};
pub use error::FeedError;
pub use feed::{HttpPredictionFeed, PredictionFeed, PredictionQuery};
pub use prediction::PredictionRecord;
pub use proximity::{PositionSample, ProximityMonitor};
pub use scheduler::{RefreshEvent, RefreshScheduler, StopRequest};
