//! Leaving-the-stop detection from noisy position samples.
//!
//! [`ProximityMonitor`] is pumped by the caller with samples from a location
//! provider. It ignores imprecise fixes, ignores movement smaller than a
//! noise floor, and signals once each time the user goes from inside to
//! outside the range around a target.

use chrono::{DateTime, Utc};
use geo::{HaversineDistance, Point};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, trace};

/// Distance from the target under which the user counts as in range.
pub const DEFAULT_RANGE_METERS: f64 = 35.0;

/// Minimum movement between accepted samples; smaller deltas are GPS jitter.
pub const DEFAULT_NOISE_FLOOR_METERS: f64 = 5.0;

/// Samples with a larger horizontal accuracy radius are not trusted.
pub const DEFAULT_MAX_ACCURACY_METERS: f64 = 30.0;

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ProximityThresholds {
    pub range_meters: f64,
    pub noise_floor_meters: f64,
    pub max_accuracy_meters: f64,
}

impl Default for ProximityThresholds {
    fn default() -> Self {
        Self {
            range_meters: DEFAULT_RANGE_METERS,
            noise_floor_meters: DEFAULT_NOISE_FLOOR_METERS,
            max_accuracy_meters: DEFAULT_MAX_ACCURACY_METERS,
        }
    }
}

/// One fix from the location provider.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct PositionSample {
    pub latitude: f64,
    pub longitude: f64,
    /// Radius of uncertainty in meters. Negative means the fix is invalid.
    pub horizontal_accuracy: f64,
    pub timestamp: DateTime<Utc>,
}

impl PositionSample {
    pub fn new(latitude: f64, longitude: f64, horizontal_accuracy: f64, timestamp: DateTime<Utc>) -> Self {
        Self {
            latitude,
            longitude,
            horizontal_accuracy,
            timestamp,
        }
    }

    pub fn point(&self) -> Point {
        Point::new(self.longitude, self.latitude)
    }

    /// Great-circle distance in meters.
    pub fn distance_to(&self, other: &PositionSample) -> f64 {
        self.point().haversine_distance(&other.point())
    }

    pub fn has_valid_coordinate(&self) -> bool {
        self.latitude.is_finite()
            && self.longitude.is_finite()
            && (-90.0..=90.0).contains(&self.latitude)
            && (-180.0..=180.0).contains(&self.longitude)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RejectReason {
    InvalidCoordinate,
    InsufficientAccuracy,
}

/// What [`ProximityMonitor::process`] did with a sample.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum SampleOutcome {
    /// Dropped before any comparison; state untouched.
    Rejected(RejectReason),
    /// First accepted sample. Never signals an exit.
    Baseline { in_range: bool },
    /// Too close to the last accepted sample; state untouched.
    Jitter { delta_meters: f64 },
    /// Accepted without an in-range to out-of-range transition.
    Accepted { in_range: bool },
    /// Accepted, and the user just left the range.
    ExitedRange,
}

type ExitCallback = Box<dyn FnMut() + Send>;

pub struct ProximityMonitor {
    target: Point,
    thresholds: ProximityThresholds,
    last_accepted: Option<PositionSample>,
    in_range: bool,
    on_exit_range: Option<ExitCallback>,
}

impl ProximityMonitor {
    pub fn new(target: Point) -> Self {
        Self::with_thresholds(target, ProximityThresholds::default())
    }

    pub fn with_thresholds(target: Point, thresholds: ProximityThresholds) -> Self {
        Self {
            target,
            thresholds,
            last_accepted: None,
            in_range: false,
            on_exit_range: None,
        }
    }

    /// Registers the callback fired on each inside-to-outside transition.
    pub fn on_exit_range(&mut self, callback: impl FnMut() + Send + 'static) {
        self.on_exit_range = Some(Box::new(callback));
    }

    pub fn target(&self) -> Point {
        self.target
    }

    pub fn thresholds(&self) -> &ProximityThresholds {
        &self.thresholds
    }

    pub fn is_in_range(&self) -> bool {
        self.in_range
    }

    pub fn last_accepted(&self) -> Option<&PositionSample> {
        self.last_accepted.as_ref()
    }

    pub fn distance_to_target(&self, sample: &PositionSample) -> f64 {
        self.target.haversine_distance(&sample.point())
    }

    /// Feeds one sample through the accuracy and jitter filters and updates
    /// the in-range classification.
    ///
    /// The exit callback fires when the previous accepted classification was
    /// in range and this one is not. There is no latch: going back in range
    /// and out again fires a second time.
    pub fn process(&mut self, sample: PositionSample) -> SampleOutcome {
        let distance = self.distance_to_target(&sample);
        trace!(
            accuracy = sample.horizontal_accuracy,
            distance,
            timestamp = %sample.timestamp,
            "Position sample"
        );

        if !sample.has_valid_coordinate() || sample.horizontal_accuracy < 0.0 {
            debug!("Invalid position sample, ignoring");
            return SampleOutcome::Rejected(RejectReason::InvalidCoordinate);
        }

        if sample.horizontal_accuracy.is_nan()
            || sample.horizontal_accuracy > self.thresholds.max_accuracy_meters
        {
            debug!(
                accuracy = sample.horizontal_accuracy,
                "Position has insufficient accuracy, ignoring"
            );
            return SampleOutcome::Rejected(RejectReason::InsufficientAccuracy);
        }

        let in_range = distance < self.thresholds.range_meters;

        let Some(last) = self.last_accepted else {
            self.in_range = in_range;
            self.last_accepted = Some(sample);
            debug!(in_range, distance, "Baseline position");
            return SampleOutcome::Baseline { in_range };
        };

        let delta_meters = last.distance_to(&sample);
        if delta_meters <= self.thresholds.noise_floor_meters {
            return SampleOutcome::Jitter { delta_meters };
        }

        let exited = self.in_range && !in_range;
        self.in_range = in_range;
        self.last_accepted = Some(sample);

        if exited {
            info!(distance, "Left target range");
            if let Some(callback) = self.on_exit_range.as_mut() {
                callback();
            }
            SampleOutcome::ExitedRange
        } else {
            SampleOutcome::Accepted { in_range }
        }
    }
}

impl std::fmt::Debug for ProximityMonitor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProximityMonitor")
            .field("target", &self.target)
            .field("thresholds", &self.thresholds)
            .field("last_accepted", &self.last_accepted)
            .field("in_range", &self.in_range)
            .finish()
    }
}
