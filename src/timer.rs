//! Pausable repeating timer.

use std::time::Duration;

use tokio::time::{Instant, Interval, MissedTickBehavior, interval_at};

/// Repeating timer that can be paused and resumed.
///
/// Resuming starts a fresh interval: the first tick comes one full period
/// after `resume`, whatever phase the timer was in when it was paused. Ticks
/// missed while paused, or while the owner was busy, are not replayed.
///
/// Ticks are only observed by awaiting [`tick`](Self::tick), so once
/// [`pause`](Self::pause) returns no further tick can be delivered.
#[derive(Debug)]
pub struct RepeatingTimer {
    period: Duration,
    interval: Option<Interval>,
}

impl RepeatingTimer {
    pub fn new(period: Duration) -> Self {
        Self {
            // tokio panics on a zero period.
            period: period.max(Duration::from_millis(1)),
            interval: None,
        }
    }

    pub fn period(&self) -> Duration {
        self.period
    }

    pub fn is_running(&self) -> bool {
        self.interval.is_some()
    }

    /// Starts ticking. No-op if already running.
    pub fn resume(&mut self) {
        if self.interval.is_none() {
            let mut interval = interval_at(Instant::now() + self.period, self.period);
            interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
            self.interval = Some(interval);
        }
    }

    pub fn pause(&mut self) {
        self.interval = None;
    }

    /// Waits for the next tick. Never resolves while paused.
    ///
    /// Cancel-safe, so it can be used as a `tokio::select!` branch.
    pub async fn tick(&mut self) -> Instant {
        match self.interval.as_mut() {
            Some(interval) => interval.tick().await,
            None => std::future::pending().await,
        }
    }
}
