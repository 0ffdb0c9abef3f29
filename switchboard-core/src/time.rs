//! Time provider abstraction.
//!
//! The channel runtime is deadline-driven: every in-flight operation
//! carries a start reading, the sweep compares those readings against
//! `now()`, and the sweep itself re-arms by sleeping a fuzzed interval.
//! All of that goes through [`TimeProvider`] so deadline behavior can be
//! pinned in tests instead of raced against a wall clock.
//!
//! Readings are durations measured from provider creation, so a channel
//! observes time starting at zero and operation math never touches
//! absolute timestamps.

use std::cell::RefCell;
use std::rc::Rc;
use std::time::Duration;

use async_trait::async_trait;
use thiserror::Error;
use tokio::sync::Notify;

/// Errors that can occur during time operations.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TimeError {
    /// The operation timed out.
    #[error("operation timed out")]
    Elapsed,

    /// The time provider has been shut down and is no longer accessible.
    #[error("time provider shut down")]
    Shutdown,
}

/// Provider trait for time operations.
///
/// `now()` is monotonic and starts at zero when the provider is created;
/// operation start times, sweep deadlines, and timeout arithmetic all use
/// these readings.
#[async_trait(?Send)]
pub trait TimeProvider: Clone {
    /// Sleep for the specified duration.
    async fn sleep(&self, duration: Duration) -> Result<(), TimeError>;

    /// Current reading: elapsed duration since provider creation.
    fn now(&self) -> Duration;

    /// Run a future with a timeout.
    ///
    /// Returns `Ok(result)` if the future completes within the timeout,
    /// or `Err(TimeError::Elapsed)` if it times out.
    async fn timeout<F, T>(&self, duration: Duration, future: F) -> Result<T, TimeError>
    where
        F: std::future::Future<Output = T>;
}

/// Real time provider backed by Tokio's timer.
#[derive(Debug, Clone)]
pub struct TokioTimeProvider {
    /// Zero point for readings.
    origin: std::time::Instant,
}

impl TokioTimeProvider {
    /// Create a new provider with its zero point at the call site.
    pub fn new() -> Self {
        Self {
            origin: std::time::Instant::now(),
        }
    }
}

impl Default for TokioTimeProvider {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait(?Send)]
impl TimeProvider for TokioTimeProvider {
    async fn sleep(&self, duration: Duration) -> Result<(), TimeError> {
        tokio::time::sleep(duration).await;
        Ok(())
    }

    fn now(&self) -> Duration {
        self.origin.elapsed()
    }

    async fn timeout<F, T>(&self, duration: Duration, future: F) -> Result<T, TimeError>
    where
        F: std::future::Future<Output = T>,
    {
        tokio::time::timeout(duration, future)
            .await
            .map_err(|_| TimeError::Elapsed)
    }
}

/// Hand-cranked clock for deterministic tests.
///
/// Time stands still until the test calls [`advance`](Self::advance);
/// sleepers whose deadline is reached wake on that call. Clones share one
/// clock, so a test can hand a clone to a channel and keep the crank.
/// Readings start at zero, which lines up sweep assertions with literal
/// values (an operation issued at t=0 with a 100ms deadline expires on the
/// first crank past 100ms).
#[derive(Clone)]
pub struct ManualTimeProvider {
    inner: Rc<RefCell<ManualClock>>,
}

struct ManualClock {
    now: Duration,
    sleepers: Vec<(Duration, Rc<Notify>)>,
}

impl ManualTimeProvider {
    /// Create a clock reading zero.
    pub fn new() -> Self {
        Self {
            inner: Rc::new(RefCell::new(ManualClock {
                now: Duration::ZERO,
                sleepers: Vec::new(),
            })),
        }
    }

    /// Move the clock forward, waking every sleeper whose deadline has
    /// been reached.
    pub fn advance(&self, duration: Duration) {
        let fired: Vec<Rc<Notify>> = {
            let mut clock = self.inner.borrow_mut();
            clock.now += duration;
            let now = clock.now;
            let mut fired = Vec::new();
            clock.sleepers.retain(|(deadline, notify)| {
                if *deadline <= now {
                    fired.push(notify.clone());
                    false
                } else {
                    true
                }
            });
            fired
        };
        // notify_one stores a permit, so a sleeper that has not polled
        // yet still wakes.
        for notify in fired {
            notify.notify_one();
        }
    }

    /// Number of sleepers waiting for a future crank.
    pub fn sleeper_count(&self) -> usize {
        self.inner.borrow().sleepers.len()
    }
}

impl Default for ManualTimeProvider {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait(?Send)]
impl TimeProvider for ManualTimeProvider {
    async fn sleep(&self, duration: Duration) -> Result<(), TimeError> {
        if duration.is_zero() {
            return Ok(());
        }
        let notify = {
            let mut clock = self.inner.borrow_mut();
            let deadline = clock.now + duration;
            let notify = Rc::new(Notify::new());
            clock.sleepers.push((deadline, notify.clone()));
            notify
        };
        notify.notified().await;
        Ok(())
    }

    fn now(&self) -> Duration {
        self.inner.borrow().now
    }

    async fn timeout<F, T>(&self, duration: Duration, future: F) -> Result<T, TimeError>
    where
        F: std::future::Future<Output = T>,
    {
        tokio::select! {
            result = future => Ok(result),
            _ = self.sleep(duration) => Err(TimeError::Elapsed),
        }
    }
}
