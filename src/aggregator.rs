//! Concurrent per-stop prediction fetching.
//!
//! [`PredictionAggregator`] fans one sub-request per route out to a
//! [`PredictionFeed`], joins on all of them, and hands a single merged result
//! to the caller. Sub-requests run as independent tokio tasks; the collector
//! task is the only place their results are accumulated, so no shared
//! collection is written from more than one context.

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use parking_lot::Mutex;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{Instrument, debug, info, warn};

use crate::error::FeedError;
use crate::feed::{PredictionFeed, PredictionQuery};
use crate::prediction::PredictionRecord;

/// Result delivered to the completion callback.
pub type AggregateResult = Result<Vec<PredictionRecord>, FeedError>;

type Completion = Box<dyn FnOnce(AggregateResult) + Send + 'static>;

/// Issues and joins per-route prediction requests for a stop.
///
/// Each aggregator is one logical owner: at most one aggregation is active at
/// a time, and a request made while one is in flight is dropped.
pub struct PredictionAggregator<F> {
    feed: Arc<F>,
    active: Arc<Mutex<Option<u64>>>,
    next_id: AtomicU64,
}

impl<F: PredictionFeed> PredictionAggregator<F> {
    pub fn new(feed: Arc<F>) -> Self {
        Self {
            feed,
            active: Arc::new(Mutex::new(None)),
            next_id: AtomicU64::new(1),
        }
    }

    pub fn feed(&self) -> &Arc<F> {
        &self.feed
    }

    /// Whether an aggregation started by this aggregator has not yet finished
    /// or been cancelled.
    pub fn is_in_flight(&self) -> bool {
        self.active.lock().is_some()
    }

    /// Starts fetching predictions for every route in `route_ids` at `stop_id`.
    ///
    /// Returns immediately. `on_complete` runs once, from the collector task,
    /// after every sub-request has finished:
    /// - with the most recently completed error if any sub-request failed,
    /// - otherwise with all predictions sorted by `minutes_until_arrival`
    ///   (stable, with ties in route-list order whatever the response order).
    ///
    /// An empty `route_ids` succeeds with an empty list. Returns `None`, and
    /// never calls `on_complete`, if an aggregation is already in flight.
    /// Cancelling the returned handle before completion suppresses the callback.
    ///
    /// Must be called from within a Tokio runtime.
    pub fn fetch_predictions<C>(
        &self,
        stop_id: &str,
        route_ids: &[String],
        agency_id: &str,
        on_complete: C,
    ) -> Option<FetchHandle>
    where
        C: FnOnce(AggregateResult) + Send + 'static,
    {
        let id = {
            let mut active = self.active.lock();
            if let Some(current) = *active {
                info!(stop = stop_id, fetch_id = current, "Request in progress, ignoring fetch");
                return None;
            }
            let id = self.next_id.fetch_add(1, Ordering::Relaxed);
            *active = Some(id);
            id
        };

        let completion: Completion = Box::new(on_complete);
        let handle = FetchHandle {
            id,
            token: CancellationToken::new(),
            completion: Arc::new(Mutex::new(Some(completion))),
            active: Arc::clone(&self.active),
        };

        let queries: Vec<PredictionQuery> = route_ids
            .iter()
            .map(|route| PredictionQuery::new(agency_id, route, stop_id))
            .collect();

        let span = tracing::info_span!(
            "aggregate",
            fetch_id = id,
            stop = %stop_id,
            agency = %agency_id,
            routes = queries.len(),
        );

        tokio::spawn(collect(Arc::clone(&self.feed), queries, handle.clone()).instrument(span));

        Some(handle)
    }
}

/// Cancel handle for an in-flight aggregation.
///
/// Cheap to clone. Dropping a handle does not cancel the aggregation.
#[derive(Clone)]
pub struct FetchHandle {
    id: u64,
    token: CancellationToken,
    completion: Arc<Mutex<Option<Completion>>>,
    active: Arc<Mutex<Option<u64>>>,
}

impl FetchHandle {
    pub fn id(&self) -> u64 {
        self.id
    }

    /// Cancels every outstanding sub-request.
    ///
    /// If the completion callback has not started yet it never will. The
    /// aggregator is free for a new fetch as soon as this returns.
    pub fn cancel(&self) {
        let dropped = self.completion.lock().take();
        self.token.cancel();
        self.release();

        if dropped.is_some() {
            info!(fetch_id = self.id, "Prediction fetch cancelled");
        }
    }

    pub fn is_cancelled(&self) -> bool {
        self.token.is_cancelled()
    }

    /// Clears the owner's in-flight slot, unless a newer fetch already holds it.
    fn release(&self) {
        let mut active = self.active.lock();
        if *active == Some(self.id) {
            *active = None;
        }
    }
}

impl std::fmt::Debug for FetchHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FetchHandle")
            .field("id", &self.id)
            .field("cancelled", &self.token.is_cancelled())
            .finish()
    }
}

/// Per-route results, slotted by position in the route list, and errors in
/// completion order.
#[derive(Debug)]
struct Accumulator {
    slots: Vec<Option<Vec<PredictionRecord>>>,
    errors: Vec<FeedError>,
}

impl Accumulator {
    fn new(routes: usize) -> Self {
        Self {
            slots: vec![None; routes],
            errors: Vec::new(),
        }
    }

    fn record(&mut self, index: usize, result: AggregateResult) {
        match result {
            Ok(records) => self.slots[index] = Some(records),
            Err(e) => self.errors.push(e),
        }
    }

    fn fail(&mut self, error: FeedError) {
        self.errors.push(error);
    }

    /// Concatenates in route-list order before the stable sort, so ties do not
    /// depend on which response arrived first.
    fn finish(self) -> AggregateResult {
        let mut errors = self.errors;
        if let Some(error) = errors.pop() {
            return Err(error);
        }

        let mut records: Vec<PredictionRecord> =
            self.slots.into_iter().flatten().flatten().collect();
        records.sort_by_key(|r| r.minutes_until_arrival);
        Ok(records)
    }
}

async fn collect<F: PredictionFeed>(feed: Arc<F>, queries: Vec<PredictionQuery>, handle: FetchHandle) {
    let mut subrequests = JoinSet::new();

    let routes = queries.len();
    for (index, query) in queries.into_iter().enumerate() {
        let feed = Arc::clone(&feed);
        let span = tracing::debug_span!("subrequest", route = %query.route);
        subrequests.spawn(async move { (index, feed.predictions(&query).await) }.instrument(span));
    }

    let outstanding = subrequests.len();
    debug!(outstanding, "Sub-requests started");

    let join_all = async {
        let mut accumulator = Accumulator::new(routes);
        while let Some(joined) = subrequests.join_next().await {
            match joined {
                Ok((index, result)) => {
                    if let Err(e) = &result {
                        warn!(error = %e, "Sub-request failed");
                    }
                    accumulator.record(index, result);
                }
                Err(e) => {
                    let e = FeedError::from(e);
                    warn!(error = %e, "Sub-request task failed");
                    accumulator.fail(e);
                }
            }
        }
        accumulator
    };

    let accumulator = tokio::select! {
        biased;

        _ = handle.token.cancelled() => {
            // Dropping the JoinSet aborts whatever is still running.
            debug!(outstanding, "Aggregation cancelled, aborting sub-requests");
            return;
        }

        accumulator = join_all => accumulator,
    };

    let failed = accumulator.errors.len();
    let outcome = accumulator.finish();

    let completion = handle.completion.lock().take();
    handle.release();

    match completion {
        Some(on_complete) => {
            match &outcome {
                Ok(records) => info!(count = records.len(), "Aggregation complete"),
                Err(e) => warn!(failed, error = %e, "Aggregation failed"),
            }
            on_complete(outcome);
        }
        None => debug!("Aggregation cancelled before delivery"),
    }
}
