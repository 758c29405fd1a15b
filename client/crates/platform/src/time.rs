//! Time Abstractions
//!
//! Wall-clock reads and periodic ticks go through [`Clock`] and
//! [`Scheduler`] so countdowns and refresh timers can run against
//! [`ManualClock`] / [`ManualScheduler`] in tests.

use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use chrono::{DateTime, Utc};
use tokio::sync::broadcast;
use tokio::time::{Instant, MissedTickBehavior};

/// Source of the current time
pub trait Clock: Send + Sync {
    fn now(&self) -> DateTime<Utc>;
}

impl<C: Clock + ?Sized> Clock for Arc<C> {
    fn now(&self) -> DateTime<Utc> {
        (**self).now()
    }
}

/// Operating system clock
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

/// Clock that only moves when told to
///
/// Clones share the same instant.
#[derive(Debug, Clone)]
pub struct ManualClock {
    now: Arc<Mutex<DateTime<Utc>>>,
}

impl ManualClock {
    pub fn new(start: DateTime<Utc>) -> Self {
        Self {
            now: Arc::new(Mutex::new(start)),
        }
    }

    pub fn set(&self, instant: DateTime<Utc>) {
        *self.now.lock().unwrap_or_else(PoisonError::into_inner) = instant;
    }

    pub fn advance(&self, by: Duration) {
        let step = chrono::Duration::from_std(by).unwrap_or(chrono::Duration::MAX);
        let mut now = self.now.lock().unwrap_or_else(PoisonError::into_inner);
        *now = now.checked_add_signed(step).unwrap_or(*now);
    }
}

impl Clock for ManualClock {
    fn now(&self) -> DateTime<Utc> {
        *self.now.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// A stream of periodic ticks
#[trait_variant::make(Ticker: Send)]
pub trait LocalTicker {
    /// Wait for the next tick and return the time it fired at.
    /// `None` means the scheduler is gone and no more ticks will come.
    async fn tick(&mut self) -> Option<DateTime<Utc>>;
}

/// Factory for periodic tickers
///
/// A ticker is registered when [`Scheduler::every`] returns, so ticks
/// delivered after that call are never missed. The first tick arrives one
/// `period` after registration. Dropping the ticker stops it.
pub trait Scheduler: Send + Sync {
    type Ticker: Ticker + Send + 'static;

    fn every(&self, period: Duration) -> Self::Ticker;
}

/// Scheduler backed by `tokio::time::interval`
#[derive(Debug, Clone, Copy, Default)]
pub struct TokioScheduler;

#[derive(Debug)]
pub struct TokioTicker {
    interval: tokio::time::Interval,
}

impl Scheduler for TokioScheduler {
    type Ticker = TokioTicker;

    fn every(&self, period: Duration) -> TokioTicker {
        let period = period.max(Duration::from_millis(1));
        let mut interval = tokio::time::interval_at(Instant::now() + period, period);
        interval.set_missed_tick_behavior(MissedTickBehavior::Skip);
        TokioTicker { interval }
    }
}

impl Ticker for TokioTicker {
    async fn tick(&mut self) -> Option<DateTime<Utc>> {
        self.interval.tick().await;
        Some(Utc::now())
    }
}

/// Scheduler whose ticks are delivered by [`ManualScheduler::advance`]
///
/// Every `advance` call is one tick for every live ticker, whatever period
/// the ticker asked for.
#[derive(Debug, Clone)]
pub struct ManualScheduler {
    clock: ManualClock,
    sender: broadcast::Sender<DateTime<Utc>>,
}

#[derive(Debug)]
pub struct ManualTicker {
    receiver: broadcast::Receiver<DateTime<Utc>>,
}

impl ManualScheduler {
    pub fn new(clock: ManualClock) -> Self {
        let (sender, _) = broadcast::channel(64);
        Self { clock, sender }
    }

    pub fn clock(&self) -> &ManualClock {
        &self.clock
    }

    /// Move the clock forward and deliver one tick.
    /// Returns how many tickers received it.
    pub fn advance(&self, by: Duration) -> usize {
        self.clock.advance(by);
        self.sender.send(self.clock.now()).unwrap_or(0)
    }

    /// Number of tickers still alive
    pub fn live_tickers(&self) -> usize {
        self.sender.receiver_count()
    }
}

impl Scheduler for ManualScheduler {
    type Ticker = ManualTicker;

    fn every(&self, _period: Duration) -> ManualTicker {
        ManualTicker {
            receiver: self.sender.subscribe(),
        }
    }
}

impl Ticker for ManualTicker {
    async fn tick(&mut self) -> Option<DateTime<Utc>> {
        loop {
            match self.receiver.recv().await {
                Ok(at) => return Some(at),
                Err(broadcast::error::RecvError::Lagged(skipped)) => {
                    tracing::trace!(skipped, "Manual ticker lagged");
                }
                Err(broadcast::error::RecvError::Closed) => return None,
            }
        }
    }
}
