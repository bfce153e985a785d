use chrono::{DateTime, Utc};

use std::{sync::Arc, time::Duration};

use crate::simulated::SimulatedClock;

/// Controller for simulated time operations.
///
/// This is only available for simulated clocks and provides methods to
/// advance time and inspect pending timers.
///
/// Created alongside a [`ClockHandle`](crate::ClockHandle) via
/// [`ClockHandle::simulated()`](crate::ClockHandle::simulated).
#[derive(Clone)]
pub struct ClockController {
    pub(crate) clock: Arc<SimulatedClock>,
}

impl ClockController {
    /// Advance simulated time by the given duration.
    ///
    /// Timers fire in chronological order, ties in creation order. If you
    /// advance by 1 day and there are timers due at 1 hour and 2 hours, they
    /// fire with the clock reading exactly +1 hour and +2 hours, not +1 day.
    ///
    /// A ticker fires at most once per call; ticks skipped by a large advance
    /// are dropped and the ticker resumes at the first period boundary after
    /// the new time.
    ///
    /// Returns the number of timers that fired.
    ///
    /// # Example
    ///
    /// ```rust
    /// use sim_clock::{ClockHandle, SimulationConfig};
    /// use std::time::Duration;
    ///
    /// let (clock, ctrl) = ClockHandle::simulated(SimulationConfig::now());
    /// let t0 = clock.now();
    ///
    /// let mut timer = clock.new_timer(Duration::from_secs(3600));
    ///
    /// // Advance 1 day - timer fires at exactly +1 hour
    /// assert_eq!(ctrl.advance(Duration::from_secs(86400)), 1);
    /// assert_eq!(timer.try_recv(), Some(t0 + chrono::Duration::hours(1)));
    /// ```
    pub fn advance(&self, duration: Duration) -> usize {
        self.clock.advance(duration)
    }

    /// Move simulated time to `time`, firing timers the same way as
    /// [`advance`](Self::advance).
    ///
    /// `time` may lie in the past. Rewinding never fires anything: pending
    /// timers keep their deadlines and fire once the clock reaches them again.
    pub fn advance_to(&self, time: DateTime<Utc>) -> usize {
        self.clock.advance_to(time)
    }

    /// Advance to the next pending timer deadline.
    ///
    /// Every timer due at that deadline fires. Returns the new time and how
    /// far the clock moved; with nothing pending the clock stays put and the
    /// duration is zero.
    ///
    /// This is useful for step-by-step testing where you want to process
    /// events one at a time.
    ///
    /// # Example
    ///
    /// ```rust
    /// use sim_clock::{ClockHandle, SimulationConfig};
    /// use std::time::Duration;
    ///
    /// let (clock, ctrl) = ClockHandle::simulated(SimulationConfig::now());
    /// let t0 = clock.now();
    ///
    /// let _a = clock.new_timer(Duration::from_secs(60));
    /// let _b = clock.new_timer(Duration::from_secs(120));
    ///
    /// let (t1, _) = ctrl.advance_to_next();
    /// assert_eq!(t1, t0 + chrono::Duration::seconds(60));
    ///
    /// let (t2, step) = ctrl.advance_to_next();
    /// assert_eq!(t2, t0 + chrono::Duration::seconds(120));
    /// assert_eq!(step, Duration::from_secs(60));
    ///
    /// let (_, step) = ctrl.advance_to_next();
    /// assert_eq!(step, Duration::ZERO); // No more pending timers
    /// ```
    pub fn advance_to_next(&self) -> (DateTime<Utc>, Duration) {
        self.clock.advance_to_next()
    }

    /// Get the number of pending timers, tickers and sleeps.
    pub fn pending_count(&self) -> usize {
        self.clock.pending_count()
    }

    /// Unqueue every pending timer without firing it.
    ///
    /// Useful for test isolation between test cases.
    pub fn clear_pending(&self) {
        self.clock.clear_pending();
    }

    /// Get the current simulated time.
    ///
    /// This is equivalent to calling `now()` on the associated `ClockHandle`.
    pub fn now(&self) -> DateTime<Utc> {
        self.clock.now()
    }
}

impl std::fmt::Debug for ClockController {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ClockController")
            .field("now", &self.clock.now())
            .field("pending_timers", &self.clock.pending_count())
            .finish()
    }
}
