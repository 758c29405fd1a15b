//! Session Clock
//!
//! Counts down to a session's end and fires a single expiry event.
//! [`SessionClock`] is the pure state machine; [`SessionClock::spawn`] drives
//! it from a [`Scheduler`] and hands events to the owning screen.

use std::fmt;
use std::time::Duration;

use chrono::{DateTime, Utc};
use platform::time::{Scheduler, Ticker};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

/// How close an end time is
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum Urgency {
    Normal,
    /// Under five minutes
    Soon,
    /// Under one minute
    Critical,
}

/// Whole seconds left until a deadline, rounded up
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub struct Countdown {
    seconds: i64,
}

impl Countdown {
    pub fn between(now: DateTime<Utc>, deadline: DateTime<Utc>) -> Self {
        let millis = (deadline - now).num_milliseconds();
        let seconds = if millis <= 0 { 0 } else { (millis + 999) / 1000 };
        Self { seconds }
    }

    pub fn from_seconds(seconds: i64) -> Self {
        Self {
            seconds: seconds.max(0),
        }
    }

    pub fn seconds(&self) -> i64 {
        self.seconds
    }

    pub fn is_zero(&self) -> bool {
        self.seconds == 0
    }

    /// `"{m}m {s}s"`, or `"{s}s"` under a minute
    pub fn label(&self) -> String {
        let (minutes, seconds) = (self.seconds / 60, self.seconds % 60);
        if minutes > 0 {
            format!("{minutes}m {seconds}s")
        } else {
            format!("{seconds}s")
        }
    }

    pub fn urgency(&self) -> Urgency {
        match self.seconds {
            s if s < 60 => Urgency::Critical,
            s if s < 300 => Urgency::Soon,
            _ => Urgency::Normal,
        }
    }
}

impl fmt::Display for Countdown {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.label())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClockEvent {
    Tick(Countdown),
    /// Fired once; the clock stops afterwards
    Expired,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ClockState {
    Running,
    Expired,
    Cancelled,
}

#[derive(Debug, Clone)]
pub struct SessionClock {
    ends_at: DateTime<Utc>,
    state: ClockState,
}

impl SessionClock {
    pub fn new(ends_at: DateTime<Utc>) -> Self {
        Self {
            ends_at,
            state: ClockState::Running,
        }
    }

    pub fn ends_at(&self) -> DateTime<Utc> {
        self.ends_at
    }

    pub fn remaining(&self, now: DateTime<Utc>) -> Countdown {
        Countdown::between(now, self.ends_at)
    }

    /// Advance to `now`
    ///
    /// Returns `Expired` exactly once when the end time is reached and
    /// `None` on every call after that or after [`SessionClock::cancel`].
    pub fn tick(&mut self, now: DateTime<Utc>) -> Option<ClockEvent> {
        if self.state != ClockState::Running {
            return None;
        }
        let remaining = self.remaining(now);
        if remaining.is_zero() {
            self.state = ClockState::Expired;
            Some(ClockEvent::Expired)
        } else {
            Some(ClockEvent::Tick(remaining))
        }
    }

    pub fn cancel(&mut self) {
        if self.state == ClockState::Running {
            self.state = ClockState::Cancelled;
        }
    }

    pub fn is_expired(&self) -> bool {
        self.state == ClockState::Expired
    }

    pub fn is_stopped(&self) -> bool {
        self.state != ClockState::Running
    }

    /// Run on `scheduler`, emitting one reading for `now` immediately and one
    /// per tick after that
    pub fn spawn<S: Scheduler>(
        mut self,
        scheduler: &S,
        now: DateTime<Utc>,
        period: Duration,
    ) -> SessionClockHandle {
        let (events_tx, events) = mpsc::unbounded_channel();
        let mut ticker = scheduler.every(period);

        if let Some(event) = self.tick(now) {
            let _ = events_tx.send(event);
        }

        let task = tokio::spawn(async move {
            while !self.is_stopped() {
                let Some(at) = ticker.tick().await else {
                    break;
                };
                let Some(event) = self.tick(at) else {
                    break;
                };
                if events_tx.send(event).is_err() {
                    break;
                }
            }
        });

        SessionClockHandle { events, task }
    }
}

/// A running session clock
///
/// Dropping the handle tears the periodic tick down.
#[derive(Debug)]
pub struct SessionClockHandle {
    events: mpsc::UnboundedReceiver<ClockEvent>,
    task: JoinHandle<()>,
}

impl SessionClockHandle {
    /// Next event; `None` after expiry or cancellation
    pub async fn next(&mut self) -> Option<ClockEvent> {
        self.events.recv().await
    }

    pub fn cancel(&mut self) {
        self.task.abort();
        self.events.close();
    }
}

impl Drop for SessionClockHandle {
    fn drop(&mut self) {
        self.task.abort();
    }
}
