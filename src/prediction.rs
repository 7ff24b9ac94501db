use chrono::{DateTime, Duration, Utc};
use serde::Serialize;

/// A single predicted arrival of a bus at a stop.
///
/// `minutes_until_arrival` and `seconds_until_arrival` both come straight from
/// the feed. `seconds_until_arrival` is the *entire* wait expressed in seconds,
/// not the remainder after the minutes. The two are not cross-checked and may
/// disagree.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PredictionRecord {
    pub route: String,
    pub destination: String,
    pub arrival_time: DateTime<Utc>,
    pub minutes_until_arrival: i64,
    pub seconds_until_arrival: i64,
}

impl PredictionRecord {
    pub fn new(
        route: impl Into<String>,
        destination: impl Into<String>,
        arrival_time: DateTime<Utc>,
        minutes_until_arrival: i64,
        seconds_until_arrival: i64,
    ) -> Self {
        Self {
            route: route.into(),
            destination: destination.into(),
            arrival_time,
            minutes_until_arrival,
            seconds_until_arrival,
        }
    }

    /// The feed reports zero (or negative) minutes for a bus at the stop.
    pub fn is_arriving_now(&self) -> bool {
        self.minutes_until_arrival <= 0
    }

    /// Arrivals less than an hour out are shown differently from later ones.
    pub fn is_near_future(&self, now: DateTime<Utc>) -> bool {
        self.arrival_time - now < Duration::hours(1)
    }
}
