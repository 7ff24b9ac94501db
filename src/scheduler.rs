//! Periodic refresh of arrival predictions with a live countdown.
//!
//! [`RefreshScheduler`] combines two cadences on one [`RepeatingTimer`]: a fine
//! tick that republishes "seconds until the next refresh", and a coarse refresh
//! interval checked on every fine tick. The owner drives it by awaiting
//! [`RefreshScheduler::next_event`]; all scheduler state is touched only from
//! that context, which is also where aggregation results are delivered.

use std::time::Duration;

use tokio::sync::mpsc::{self, UnboundedReceiver, UnboundedSender};
use tokio::time::Instant;
use tracing::{debug, info, warn};

use crate::aggregator::{AggregateResult, FetchHandle, PredictionAggregator};
use crate::config::RefreshConfig;
use crate::error::FeedError;
use crate::feed::PredictionFeed;
use crate::prediction::PredictionRecord;
use crate::timer::RepeatingTimer;

/// Stop and routes a scheduler keeps refreshing.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StopRequest {
    pub agency: String,
    pub stop: String,
    pub routes: Vec<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SchedulerState {
    Idle,
    Ticking,
}

#[derive(Debug, Clone, PartialEq)]
pub enum RefreshEvent {
    /// Fine tick. Seconds until the next refresh, or `None` while a refresh is
    /// running or before the first one has finished.
    Countdown(Option<u64>),
    /// A refresh finished.
    Updated(AggregateResult),
}

struct Completion {
    refresh_id: u64,
    result: AggregateResult,
}

struct InFlight {
    refresh_id: u64,
    handle: FetchHandle,
}

pub struct RefreshScheduler<F> {
    aggregator: PredictionAggregator<F>,
    request: StopRequest,
    refresh_interval: Duration,
    timer: RepeatingTimer,
    last_refresh: Option<Instant>,
    in_flight: Option<InFlight>,
    next_refresh_id: u64,
    predictions: Vec<PredictionRecord>,
    last_error: Option<FeedError>,
    completions_tx: UnboundedSender<Completion>,
    completions_rx: UnboundedReceiver<Completion>,
}

impl<F: PredictionFeed> RefreshScheduler<F> {
    pub fn new(aggregator: PredictionAggregator<F>, request: StopRequest, config: &RefreshConfig) -> Self {
        let (completions_tx, completions_rx) = mpsc::unbounded_channel();
        Self {
            aggregator,
            request,
            refresh_interval: config.refresh_interval(),
            timer: RepeatingTimer::new(config.tick_interval()),
            last_refresh: None,
            in_flight: None,
            next_refresh_id: 1,
            predictions: Vec::new(),
            last_error: None,
            completions_tx,
            completions_rx,
        }
    }

    pub fn state(&self) -> SchedulerState {
        if self.timer.is_running() {
            SchedulerState::Ticking
        } else {
            SchedulerState::Idle
        }
    }

    pub fn request(&self) -> &StopRequest {
        &self.request
    }

    pub fn is_refreshing(&self) -> bool {
        self.in_flight.is_some()
    }

    /// Predictions from the last successful refresh. Cleared when a refresh fails.
    pub fn predictions(&self) -> &[PredictionRecord] {
        &self.predictions
    }

    pub fn last_error(&self) -> Option<&FeedError> {
        self.last_error.as_ref()
    }

    pub fn last_refresh(&self) -> Option<Instant> {
        self.last_refresh
    }

    /// Starts ticking and refreshes right away. No-op if already ticking.
    pub fn resume(&mut self) {
        if self.timer.is_running() {
            return;
        }
        info!(stop = %self.request.stop, "Arrival refresh resumed");
        self.timer.resume();
        self.refresh_now();
    }

    /// Stops ticking and cancels any refresh in flight.
    ///
    /// Once this returns, [`next_event`](Self::next_event) yields nothing
    /// until the scheduler is resumed, including events already queued.
    pub fn pause(&mut self) {
        self.timer.pause();
        if let Some(in_flight) = self.in_flight.take() {
            in_flight.handle.cancel();
        }
        while self.completions_rx.try_recv().is_ok() {}
        info!(stop = %self.request.stop, "Arrival refresh paused");
    }

    /// Starts a refresh unless one is already running. Returns whether a
    /// refresh was started.
    pub fn refresh_now(&mut self) -> bool {
        if let Some(in_flight) = &self.in_flight {
            info!(fetch_id = in_flight.handle.id(), "Request in progress, aborting");
            return false;
        }

        let refresh_id = self.next_refresh_id;
        let tx = self.completions_tx.clone();
        let handle = self.aggregator.fetch_predictions(
            &self.request.stop,
            &self.request.routes,
            &self.request.agency,
            move |result| {
                // The receiver is gone once the scheduler is dropped.
                let _ = tx.send(Completion { refresh_id, result });
            },
        );

        match handle {
            Some(handle) => {
                self.next_refresh_id += 1;
                debug!(refresh_id, fetch_id = handle.id(), "Refresh started");
                self.in_flight = Some(InFlight { refresh_id, handle });
                true
            }
            None => false,
        }
    }

    /// Seconds until the next coarse refresh, as shown to the user.
    ///
    /// `None` while refreshing or before the first refresh has finished.
    /// Never `Some(0)`: an overdue refresh still reads as one second away.
    pub fn seconds_until_refresh(&self) -> Option<u64> {
        if self.in_flight.is_some() {
            return None;
        }
        let last_refresh = self.last_refresh?;
        Some(countdown_seconds(self.refresh_interval, last_refresh.elapsed()))
    }

    /// Waits for the next fine tick or refresh result.
    ///
    /// Returns `None` when paused with nothing in flight.
    pub async fn next_event(&mut self) -> Option<RefreshEvent> {
        loop {
            if !self.timer.is_running() && self.in_flight.is_none() {
                return None;
            }

            tokio::select! {
                biased;

                Some(completion) = self.completions_rx.recv() => {
                    if let Some(event) = self.complete(completion) {
                        return Some(event);
                    }
                }

                _ = self.timer.tick() => {
                    return Some(self.tick());
                }
            }
        }
    }

    fn tick(&mut self) -> RefreshEvent {
        if let Some(last_refresh) = self.last_refresh {
            if self.in_flight.is_none() && last_refresh.elapsed() >= self.refresh_interval {
                debug!("Refresh interval elapsed");
                self.refresh_now();
            }
        }
        RefreshEvent::Countdown(self.seconds_until_refresh())
    }

    fn complete(&mut self, completion: Completion) -> Option<RefreshEvent> {
        match &self.in_flight {
            Some(in_flight) if in_flight.refresh_id == completion.refresh_id => {}
            _ => {
                debug!(refresh_id = completion.refresh_id, "Discarding stale refresh result");
                return None;
            }
        }

        self.in_flight = None;
        self.last_refresh = Some(Instant::now());

        match &completion.result {
            Ok(predictions) => {
                info!(count = predictions.len(), stop = %self.request.stop, "Predictions refreshed");
                self.predictions = predictions.clone();
                self.last_error = None;
            }
            Err(e) => {
                warn!(error = %e, stop = %self.request.stop, "Prediction refresh failed");
                self.predictions.clear();
                self.last_error = Some(e.clone());
            }
        }

        Some(RefreshEvent::Updated(completion.result))
    }
}

impl<F> Drop for RefreshScheduler<F> {
    fn drop(&mut self) {
        if let Some(in_flight) = self.in_flight.take() {
            in_flight.handle.cancel();
        }
    }
}

/// Whole seconds left until `interval` has elapsed, rounded up, never below 1.
fn countdown_seconds(interval: Duration, elapsed: Duration) -> u64 {
    let remaining = interval.as_secs_f64() - elapsed.as_secs_f64();
    remaining.ceil().max(1.0) as u64
}
