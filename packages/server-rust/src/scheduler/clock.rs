//! Time source for the auto-save scheduler.
//!
//! The scheduler never reads time or sleeps directly; it goes through a
//! [`Clock`], so tests can drive sweeps deterministically with
//! [`ManualClock`].

use std::time::Duration;

use futures_util::future::BoxFuture;
use tokio::sync::watch;

/// Source of elapsed time and of timed waits.
pub trait Clock: Send + Sync {
    /// Time elapsed since the clock was created.
    fn now(&self) -> Duration;

    /// Resolves once `duration` has elapsed on this clock.
    fn sleep(&self, duration: Duration) -> BoxFuture<'static, ()>;
}

/// Production clock backed by the tokio timer.
#[derive(Debug, Clone)]
pub struct TokioClock {
    origin: tokio::time::Instant,
}

impl TokioClock {
    #[must_use]
    pub fn new() -> Self {
        Self {
            origin: tokio::time::Instant::now(),
        }
    }
}

impl Default for TokioClock {
    fn default() -> Self {
        Self::new()
    }
}

impl Clock for TokioClock {
    fn now(&self) -> Duration {
        self.origin.elapsed()
    }

    fn sleep(&self, duration: Duration) -> BoxFuture<'static, ()> {
        Box::pin(tokio::time::sleep(duration))
    }
}

/// Clock that only moves when told to.
///
/// Sleepers wake when [`advance()`](ManualClock::advance) carries the clock
/// past their deadline.
#[derive(Debug)]
pub struct ManualClock {
    now: watch::Sender<Duration>,
}

impl ManualClock {
    /// Creates a clock standing at zero.
    #[must_use]
    pub fn new() -> Self {
        let (now, _rx) = watch::channel(Duration::ZERO);
        Self { now }
    }

    /// Moves the clock forward by `step`, waking every sleeper whose
    /// deadline has been reached.
    pub fn advance(&self, step: Duration) {
        self.now.send_modify(|now| *now += step);
    }
}

impl Default for ManualClock {
    fn default() -> Self {
        Self::new()
    }
}

impl Clock for ManualClock {
    fn now(&self) -> Duration {
        *self.now.borrow()
    }

    fn sleep(&self, duration: Duration) -> BoxFuture<'static, ()> {
        let mut rx = self.now.subscribe();
        let deadline = *rx.borrow() + duration;
        Box::pin(async move {
            while *rx.borrow_and_update() < deadline {
                if rx.changed().await.is_err() {
                    // Clock dropped: nothing will ever advance it again.
                    std::future::pending::<()>().await;
                }
            }
        })
    }
}
