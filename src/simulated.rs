use chrono::{DateTime, TimeDelta, Utc};
use parking_lot::Mutex;

use std::time::Duration;

use crate::{
    config::SimulationConfig,
    entry::{FireAction, Schedule, TimerId, add, next_tick},
    queue::TimerQueue,
};

/// Simulated clock engine.
///
/// Time only moves through [`advance`](Self::advance) and friends. Every public
/// method takes the lock exactly once and holds it for its whole duration, so
/// advancing time and operating on timers never interleave.
///
/// Actions freed under the lock are handed back and dropped after it is
/// released: a callback may own handles of this same clock.
pub(crate) struct SimulatedClock {
    state: Mutex<ClockState>,
}

struct ClockState {
    now: DateTime<Utc>,
    timers: TimerQueue,
}

impl ClockState {
    /// Fire everything due up to `target`, then settle `now` on `target`.
    ///
    /// `now` steps through each fired deadline in order, so actions see the time
    /// they were scheduled for. A target before `now` fires nothing: every
    /// pending deadline already lies after `now`.
    fn advance_to(&mut self, target: DateTime<Utc>, freed: &mut Vec<FireAction>) -> usize {
        let mut fired = 0;
        loop {
            let Some((id, deadline)) = self.timers.next().filter(|(_, d)| *d <= target) else {
                self.now = target;
                return fired;
            };
            self.now = deadline;
            let Some(schedule) = self.timers.action(id).map(|action| action.fire(deadline)) else {
                self.timers.stop(id);
                continue;
            };
            fired += 1;
            match schedule {
                Schedule::Once => {
                    tracing::trace!(timer = id.0, %deadline, "timer fired");
                    self.timers.stop(id);
                    freed.extend(self.timers.collect(id));
                }
                Schedule::Repeat(period) => {
                    let next = next_tick(deadline, target, period);
                    if next <= target {
                        tracing::trace!(timer = id.0, %deadline, "ticker fired at the end of time");
                        self.timers.stop(id);
                        continue;
                    }
                    tracing::trace!(timer = id.0, %deadline, %next, "ticker fired");
                    self.timers.reset(id, next);
                }
            }
        }
    }

    /// Register an entry, firing it right away when `deadline` is not in the future.
    fn schedule(&mut self, deadline: DateTime<Utc>, action: FireAction) -> TimerId {
        let id = self.timers.register(deadline, action);
        if deadline <= self.now {
            self.fire_now(id);
        } else {
            self.timers.start(id);
        }
        id
    }

    /// Fire an entry at the current time and leave it unqueued.
    ///
    /// Only one-shot entries get here: repeating ones always start a period ahead.
    fn fire_now(&mut self, id: TimerId) {
        if let Some(schedule) = self.timers.action(id).map(|action| action.fire(self.now)) {
            tracing::trace!(timer = id.0, now = %self.now, ?schedule, "timer fired immediately");
        }
        self.timers.stop(id);
    }
}

impl SimulatedClock {
    pub fn new(config: SimulationConfig) -> Self {
        Self {
            state: Mutex::new(ClockState {
                now: config.start_at,
                timers: TimerQueue::default(),
            }),
        }
    }

    pub fn now(&self) -> DateTime<Utc> {
        self.state.lock().now
    }

    pub fn elapsed_since(&self, time: DateTime<Utc>) -> TimeDelta {
        self.state.lock().now - time
    }

    pub fn remaining_until(&self, time: DateTime<Utc>) -> TimeDelta {
        time - self.state.lock().now
    }

    /// Advance time by `duration`. Returns the number of entries fired.
    pub fn advance(&self, duration: Duration) -> usize {
        let mut freed = Vec::new();
        let mut state = self.state.lock();
        let target = add(state.now, duration);
        let fired = state.advance_to(target, &mut freed);
        tracing::trace!(fired, now = %state.now, "advanced simulated clock");
        drop(state);
        fired
    }

    /// Set time to `target`, which may lie in the past. Returns the number of
    /// entries fired.
    pub fn advance_to(&self, target: DateTime<Utc>) -> usize {
        let mut freed = Vec::new();
        let mut state = self.state.lock();
        let fired = state.advance_to(target, &mut freed);
        tracing::trace!(fired, now = %state.now, "moved simulated clock");
        drop(state);
        fired
    }

    /// Advance to the earliest pending deadline, firing everything due at it.
    pub fn advance_to_next(&self) -> (DateTime<Utc>, Duration) {
        let mut freed = Vec::new();
        let mut state = self.state.lock();
        let start = state.now;
        let Some((_, deadline)) = state.timers.next() else {
            return (start, Duration::ZERO);
        };
        let fired = state.advance_to(deadline, &mut freed);
        let now = state.now;
        tracing::trace!(fired, %now, "advanced simulated clock to next timer");
        drop(state);
        (now, (now - start).to_std().unwrap_or_default())
    }

    pub fn pending_count(&self) -> usize {
        self.state.lock().timers.len()
    }

    pub fn clear_pending(&self) {
        let freed = self.state.lock().timers.clear();
        drop(freed);
    }

    /// Create a one-shot entry whose deadline is derived from the current time.
    pub fn schedule_with(
        &self,
        deadline: impl FnOnce(DateTime<Utc>) -> DateTime<Utc>,
        action: FireAction,
    ) -> (TimerId, DateTime<Utc>) {
        let mut state = self.state.lock();
        let deadline = deadline(state.now);
        (state.schedule(deadline, action), deadline)
    }

    /// Create a repeating entry. `period` must be non-zero.
    pub fn schedule_repeating(&self, period: Duration, action: FireAction) -> TimerId {
        let mut state = self.state.lock();
        let deadline = add(state.now, period);
        let id = state.timers.register(deadline, action);
        state.timers.start(id);
        id
    }

    /// Unqueue an entry. Returns whether it was still pending.
    pub fn stop(&self, id: TimerId) -> bool {
        self.state.lock().timers.stop(id)
    }

    /// Reschedule an entry `duration` from now. Returns whether it was still pending.
    pub fn reset(&self, id: TimerId, duration: Duration) -> bool {
        let mut state = self.state.lock();
        let state = &mut *state;
        let was_active = state.timers.is_pending(id);
        let deadline = add(state.now, duration);
        if deadline <= state.now {
            state.fire_now(id);
        } else {
            state.timers.reset(id, deadline);
        }
        was_active
    }

    pub fn release(&self, id: TimerId) {
        let freed = self.state.lock().timers.release(id);
        drop(freed);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::sync::mpsc;

    fn t0() -> DateTime<Utc> {
        DateTime::parse_from_rfc3339("2018-01-01T10:00:00Z")
            .unwrap()
            .with_timezone(&Utc)
    }

    fn clock() -> SimulatedClock {
        SimulatedClock::new(SimulationConfig::starting_at(t0()))
    }

    #[test]
    fn time_stands_still() {
        let clock = clock();
        std::thread::sleep(Duration::from_millis(5));
        assert_eq!(clock.now(), t0());
    }

    #[test]
    fn elapsed_and_remaining() {
        let clock = clock();
        clock.advance(Duration::from_secs(10));
        assert_eq!(clock.elapsed_since(t0()), TimeDelta::seconds(10));
        assert_eq!(clock.remaining_until(t0()), TimeDelta::seconds(-10));
    }

    #[test]
    fn fires_in_deadline_order_observing_deadline() {
        let clock = clock();
        let (tx_a, mut rx_a) = mpsc::channel(1);
        let (tx_b, mut rx_b) = mpsc::channel(1);
        clock.schedule_with(|now| now + TimeDelta::seconds(30), FireAction::Deliver(tx_a));
        clock.schedule_with(|now| now + TimeDelta::seconds(10), FireAction::Deliver(tx_b));

        assert_eq!(clock.advance(Duration::from_secs(60)), 2);
        assert_eq!(rx_a.try_recv().ok(), Some(t0() + TimeDelta::seconds(30)));
        assert_eq!(rx_b.try_recv().ok(), Some(t0() + TimeDelta::seconds(10)));
        assert_eq!(clock.now(), t0() + TimeDelta::seconds(60));
        assert_eq!(clock.pending_count(), 0);
    }

    #[test]
    fn past_deadline_fires_without_queueing() {
        let clock = clock();
        let (tx, mut rx) = mpsc::channel(1);
        clock.schedule_with(|now| now, FireAction::Deliver(tx));
        assert_eq!(rx.try_recv().ok(), Some(t0()));
        assert_eq!(clock.pending_count(), 0);
    }

    #[test]
    fn rewind_fires_nothing() {
        let clock = clock();
        let (tx, mut rx) = mpsc::channel(1);
        clock.schedule_with(|now| now + TimeDelta::seconds(5), FireAction::Deliver(tx));

        assert_eq!(clock.advance_to(t0() - TimeDelta::hours(1)), 0);
        assert_eq!(clock.now(), t0() - TimeDelta::hours(1));
        assert!(rx.try_recv().is_err());
        assert_eq!(clock.pending_count(), 1);
    }

    #[test]
    fn ticker_fires_once_per_advance() {
        let clock = clock();
        let (tx, mut rx) = mpsc::channel(1);
        let period = Duration::from_secs(5);
        clock.schedule_repeating(period, FireAction::Tick { tx, period });

        assert_eq!(clock.advance(Duration::from_secs(23)), 1);
        assert_eq!(rx.try_recv().ok(), Some(t0() + TimeDelta::seconds(5)));

        // Next tick is at +25s: nothing due by +24s.
        assert_eq!(clock.advance(Duration::from_secs(1)), 0);
        assert_eq!(clock.advance(Duration::from_secs(1)), 1);
        assert_eq!(rx.try_recv().ok(), Some(t0() + TimeDelta::seconds(25)));
    }

    #[test]
    fn ticker_stops_at_the_end_of_time() {
        let clock = clock();
        let (tx, mut rx) = mpsc::channel(1);
        let period = Duration::from_secs(5);
        let id = clock.schedule_repeating(period, FireAction::Tick { tx, period });

        assert_eq!(clock.advance(Duration::MAX), 1);
        assert_eq!(rx.try_recv().ok(), Some(t0() + TimeDelta::seconds(5)));
        assert_eq!(clock.now(), DateTime::<Utc>::MAX_UTC);
        assert!(!clock.stop(id));
        assert_eq!(clock.advance(Duration::from_secs(60)), 0);
    }

    #[test]
    fn advance_to_next_steps_through_deadlines() {
        let clock = clock();
        let (tx, _rx) = mpsc::channel(1);
        clock.schedule_with(|now| now + TimeDelta::seconds(60), FireAction::Deliver(tx));

        assert_eq!(
            clock.advance_to_next(),
            (t0() + TimeDelta::seconds(60), Duration::from_secs(60))
        );
        assert_eq!(
            clock.advance_to_next(),
            (t0() + TimeDelta::seconds(60), Duration::ZERO)
        );
    }

    #[test]
    fn reset_reports_previous_state() {
        let clock = clock();
        let (tx, mut rx) = mpsc::channel(1);
        let (id, _) = clock.schedule_with(|now| now + TimeDelta::seconds(5), FireAction::Deliver(tx));

        assert!(clock.reset(id, Duration::from_secs(10)));
        clock.advance(Duration::from_secs(5));
        assert!(rx.try_recv().is_err());

        clock.advance(Duration::from_secs(5));
        assert_eq!(rx.try_recv().ok(), Some(t0() + TimeDelta::seconds(10)));
        assert!(!clock.reset(id, Duration::ZERO));
        assert_eq!(rx.try_recv().ok(), Some(t0() + TimeDelta::seconds(10)));
    }

    #[test]
    fn clear_pending_unqueues_everything() {
        let clock = clock();
        let (tx, mut rx) = mpsc::channel(1);
        let (id, _) = clock.schedule_with(|now| now + TimeDelta::seconds(5), FireAction::Deliver(tx));

        clock.clear_pending();
        assert_eq!(clock.pending_count(), 0);
        assert!(!clock.stop(id));
        clock.advance(Duration::from_secs(10));
        assert!(rx.try_recv().is_err());
    }
}
