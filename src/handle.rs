use chrono::{DateTime, TimeDelta, Utc};
use tokio::sync::mpsc;

use std::{sync::Arc, time::Duration};

use crate::{
    config::{ClockConfig, SimulationConfig},
    context::{self, CancelHandle, Context},
    controller::ClockController,
    entry::{FireAction, add},
    error::ClockError,
    inner::ClockInner,
    realtime::{RealtimeClock, RealtimeTimer},
    simulated::SimulatedClock,
    sleep::{ClockSleep, ClockTimeout},
    ticker::Ticker,
    timer::{Timer, TimerControl},
};

/// A handle to a clock for getting time and performing time-based operations.
///
/// This is the main interface for time operations. It's cheap to clone and
/// can be shared across tasks and threads. All clones share the same underlying
/// clock, so they see consistent time.
///
/// # Creating a Clock
///
/// ```rust
/// use sim_clock::{ClockHandle, SimulationConfig};
///
/// // Real-time clock for production
/// let clock = ClockHandle::realtime();
///
/// // Simulated clock for testing - returns (handle, controller)
/// let (clock, ctrl) = ClockHandle::simulated(SimulationConfig::now());
/// ```
///
/// # Timers
///
/// ```rust
/// use sim_clock::{ClockHandle, SimulationConfig};
/// use std::time::Duration;
///
/// let (clock, ctrl) = ClockHandle::simulated(SimulationConfig::now());
/// let t0 = clock.now();
///
/// let mut timer = clock.new_timer(Duration::from_secs(15));
/// ctrl.advance(Duration::from_secs(25));
///
/// assert_eq!(timer.try_recv(), Some(t0 + chrono::Duration::seconds(15)));
/// assert_eq!(clock.now(), t0 + chrono::Duration::seconds(25));
/// ```
///
/// Operations on a realtime clock other than `now`, `elapsed_since` and
/// `remaining_until` spawn tokio tasks and must run inside a tokio runtime.
/// A simulated clock works with or without a runtime.
#[derive(Clone)]
pub struct ClockHandle {
    inner: Arc<ClockInner>,
}

impl ClockHandle {
    /// Create a real-time clock that uses the system clock and tokio timers.
    pub fn realtime() -> Self {
        Self {
            inner: Arc::new(ClockInner::Realtime(RealtimeClock)),
        }
    }

    /// Create a simulated clock with the given configuration.
    ///
    /// Returns a tuple of `(ClockHandle, ClockController)`. The handle provides
    /// the common time interface, while the controller moves time forward.
    ///
    /// # Example
    ///
    /// ```rust
    /// use sim_clock::{ClockHandle, SimulationConfig};
    /// use chrono::Utc;
    ///
    /// let (clock, ctrl) = ClockHandle::simulated(SimulationConfig::now());
    ///
    /// // Start at a specific time
    /// let start = Utc::now() - chrono::Duration::days(30);
    /// let (clock, ctrl) = ClockHandle::simulated(SimulationConfig::starting_at(start));
    /// assert_eq!(clock.now(), start);
    /// ```
    pub fn simulated(config: SimulationConfig) -> (Self, ClockController) {
        let clock = Arc::new(SimulatedClock::new(config));
        let handle = Self {
            inner: Arc::new(ClockInner::Simulated(Arc::clone(&clock))),
        };
        let controller = ClockController { clock };
        (handle, controller)
    }

    /// Create the clock described by `config`.
    ///
    /// The controller is only returned for simulated clocks.
    pub fn from_config(config: &ClockConfig) -> (Self, Option<ClockController>) {
        if config.realtime {
            return (Self::realtime(), None);
        }
        let (handle, controller) = Self::simulated(config.simulation.clone().unwrap_or_default());
        (handle, Some(controller))
    }

    /// Get the current time.
    #[inline]
    pub fn now(&self) -> DateTime<Utc> {
        match &*self.inner {
            ClockInner::Realtime(rt) => rt.now(),
            ClockInner::Simulated(sim) => sim.now(),
        }
    }

    /// Time elapsed since `time`. Negative if `time` lies in the future.
    pub fn elapsed_since(&self, time: DateTime<Utc>) -> TimeDelta {
        match &*self.inner {
            ClockInner::Realtime(rt) => rt.now() - time,
            ClockInner::Simulated(sim) => sim.elapsed_since(time),
        }
    }

    /// Time remaining until `time`. Negative if `time` lies in the past.
    pub fn remaining_until(&self, time: DateTime<Utc>) -> TimeDelta {
        match &*self.inner {
            ClockInner::Realtime(rt) => time - rt.now(),
            ClockInner::Simulated(sim) => sim.remaining_until(time),
        }
    }

    /// Sleep for the given duration.
    ///
    /// For real-time clocks, this delegates to `tokio::time::sleep`.
    /// For simulated clocks, this waits until time is advanced past the deadline.
    pub fn sleep(&self, duration: Duration) -> ClockSleep {
        ClockSleep::new(&self.inner, |now| add(now, duration)).0
    }

    /// Apply a timeout to a future.
    ///
    /// Returns `Ok(output)` if the future completes before the timeout,
    /// or `Err(Elapsed)` if the timeout expires first.
    pub fn timeout<F>(&self, duration: Duration, future: F) -> ClockTimeout<F>
    where
        F: std::future::Future,
    {
        ClockTimeout::new(self.sleep(duration), future)
    }

    /// Create a timer that delivers the current time once `duration` has passed.
    ///
    /// A zero duration delivers before this returns.
    pub fn new_timer(&self, duration: Duration) -> Timer {
        let (tx, rx) = mpsc::channel(1);
        Timer::new(Some(rx), self.timer_control(duration, FireAction::Deliver(tx)))
    }

    /// Same as [`new_timer`](Self::new_timer); the timer serves as the delivery queue.
    pub fn after(&self, duration: Duration) -> Timer {
        self.new_timer(duration)
    }

    /// Run `f` on a separate task once `duration` has passed.
    ///
    /// The callback never runs while the clock is locked, so it may call back
    /// into the clock. The returned timer can stop or reschedule it.
    pub fn after_func<F>(&self, duration: Duration, f: F) -> Timer
    where
        F: Fn() + Send + Sync + 'static,
    {
        Timer::new(None, self.timer_control(duration, FireAction::Call(Arc::new(f))))
    }

    /// Create a ticker that delivers the current time every `period`.
    ///
    /// Fails if `period` is zero.
    pub fn new_ticker(&self, period: Duration) -> Result<Ticker, ClockError> {
        if period.is_zero() {
            tracing::warn!("rejected ticker with zero period");
            return Err(ClockError::NonPositiveInterval);
        }
        let (tx, rx) = mpsc::channel(1);
        let action = FireAction::Tick { tx, period };
        let control = match &*self.inner {
            ClockInner::Realtime(_) => TimerControl::Realtime(RealtimeTimer::spawn(period, action)),
            ClockInner::Simulated(sim) => TimerControl::Simulated {
                clock: Arc::clone(sim),
                id: sim.schedule_repeating(period, action),
            },
        };
        Ok(Ticker::new(rx, control))
    }

    /// Like [`new_ticker`](Self::new_ticker), but returns `None` for a zero period.
    pub fn tick(&self, period: Duration) -> Option<Ticker> {
        if period.is_zero() {
            return None;
        }
        self.new_ticker(period).ok()
    }

    /// Derive a context that is canceled at `deadline` at the latest.
    ///
    /// If `parent` already expires at or before `deadline` the returned context
    /// simply follows the parent.
    pub fn deadline_context(
        &self,
        parent: &Context,
        deadline: DateTime<Utc>,
    ) -> (Context, CancelHandle) {
        let (expiry, deadline) = ClockSleep::new(&self.inner, |_| deadline);
        context::with_expiry(parent, deadline, expiry)
    }

    /// Derive a context that is canceled once `timeout` has passed on this clock.
    pub fn timeout_context(&self, parent: &Context, timeout: Duration) -> (Context, CancelHandle) {
        let (expiry, deadline) = ClockSleep::new(&self.inner, |now| add(now, timeout));
        context::with_expiry(parent, deadline, expiry)
    }

    /// Check if this clock is simulated (as opposed to realtime).
    pub fn is_simulated(&self) -> bool {
        matches!(&*self.inner, ClockInner::Simulated(_))
    }

    fn timer_control(&self, duration: Duration, action: FireAction) -> TimerControl {
        match &*self.inner {
            ClockInner::Realtime(_) => TimerControl::Realtime(RealtimeTimer::spawn(duration, action)),
            ClockInner::Simulated(sim) => {
                let (id, _) = sim.schedule_with(|now| add(now, duration), action);
                TimerControl::Simulated {
                    clock: Arc::clone(sim),
                    id,
                }
            }
        }
    }
}

impl std::fmt::Debug for ClockHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match &*self.inner {
            ClockInner::Realtime(_) => f.debug_struct("ClockHandle::Realtime").finish(),
            ClockInner::Simulated(sim) => f
                .debug_struct("ClockHandle::Simulated")
                .field("now", &sim.now())
                .field("pending_timers", &sim.pending_count())
                .finish(),
        }
    }
}
