use chrono::{DateTime, Utc};
use pin_project::pin_project;
use tokio::{sync::mpsc, time::Sleep};

use std::{
    future::Future,
    pin::Pin,
    sync::Arc,
    task::{Context, Poll},
};

use crate::{
    entry::FireAction,
    error::Elapsed,
    inner::ClockInner,
    timer::{Timer, TimerControl, TimerStop},
};

/// A future that completes once the clock reaches a deadline.
///
/// Created by [`ClockHandle::sleep`](crate::ClockHandle::sleep). On a simulated
/// clock the sleep occupies a timer slot until it completes or is dropped.
#[pin_project]
pub struct ClockSleep {
    #[pin]
    inner: ClockSleepInner,
}

#[pin_project(project = ClockSleepInnerProj)]
enum ClockSleepInner {
    Realtime {
        #[pin]
        sleep: Sleep,
    },
    Simulated {
        timer: Timer,
    },
}

impl ClockSleep {
    /// Create a sleep whose deadline is computed from the clock's current time.
    /// Returns the sleep and its deadline.
    pub(crate) fn new(
        clock_inner: &ClockInner,
        deadline: impl FnOnce(DateTime<Utc>) -> DateTime<Utc>,
    ) -> (Self, DateTime<Utc>) {
        let (inner, deadline) = match clock_inner {
            ClockInner::Realtime(rt) => {
                let now = rt.now();
                let deadline = deadline(now);
                let duration = (deadline - now).to_std().unwrap_or_default();
                (
                    ClockSleepInner::Realtime {
                        sleep: rt.sleep(duration),
                    },
                    deadline,
                )
            }
            ClockInner::Simulated(sim) => {
                let (tx, rx) = mpsc::channel(1);
                let (id, deadline) = sim.schedule_with(deadline, FireAction::Deliver(tx));
                let control = TimerControl::Simulated {
                    clock: Arc::clone(sim),
                    id,
                };
                (
                    ClockSleepInner::Simulated {
                        timer: Timer::new(Some(rx), control),
                    },
                    deadline,
                )
            }
        };

        (Self { inner }, deadline)
    }

    /// Stops the backing timer of a simulated sleep from elsewhere.
    pub(crate) fn stopper(&self) -> Option<TimerStop> {
        match &self.inner {
            ClockSleepInner::Realtime { .. } => None,
            ClockSleepInner::Simulated { timer } => timer.stopper(),
        }
    }
}

impl Future for ClockSleep {
    type Output = ();

    fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<()> {
        let this = self.project();

        match this.inner.project() {
            ClockSleepInnerProj::Realtime { sleep } => sleep.poll(cx),
            ClockSleepInnerProj::Simulated { timer } => timer.poll_recv(cx).map(|_| ()),
        }
    }
}

/// A future that completes with a timeout after a duration has elapsed on the clock.
///
/// Created by [`ClockHandle::timeout`](crate::ClockHandle::timeout).
#[pin_project]
pub struct ClockTimeout<F> {
    #[pin]
    future: F,
    #[pin]
    sleep: ClockSleep,
    completed: bool,
}

impl<F> ClockTimeout<F> {
    pub(crate) fn new(sleep: ClockSleep, future: F) -> Self {
        Self {
            future,
            sleep,
            completed: false,
        }
    }
}

impl<F: Future> Future for ClockTimeout<F> {
    type Output = Result<F::Output, Elapsed>;

    fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        let this = self.project();

        if *this.completed {
            panic!("ClockTimeout polled after completion");
        }

        // Check the future first
        if let Poll::Ready(output) = this.future.poll(cx) {
            *this.completed = true;
            return Poll::Ready(Ok(output));
        }

        if let Poll::Ready(()) = this.sleep.poll(cx) {
            *this.completed = true;
            return Poll::Ready(Err(Elapsed));
        }

        Poll::Pending
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{config::SimulationConfig, entry::add, simulated::SimulatedClock};
    use futures::task::noop_waker;
    use std::time::Duration;

    #[test]
    fn simulated_sleep_completes_after_advance() {
        let sim = Arc::new(SimulatedClock::new(SimulationConfig::now()));
        let inner = ClockInner::Simulated(Arc::clone(&sim));
        let (sleep, _) = ClockSleep::new(&inner, |now| add(now, Duration::from_secs(5)));
        let mut sleep = Box::pin(sleep);

        let waker = noop_waker();
        let mut cx = Context::from_waker(&waker);
        assert!(sleep.as_mut().poll(&mut cx).is_pending());

        sim.advance(Duration::from_secs(5));
        assert!(sleep.as_mut().poll(&mut cx).is_ready());
    }

    #[test]
    fn dropped_sleep_frees_its_timer() {
        let sim = Arc::new(SimulatedClock::new(SimulationConfig::now()));
        let inner = ClockInner::Simulated(Arc::clone(&sim));
        let (sleep, _) = ClockSleep::new(&inner, |now| add(now, Duration::from_secs(5)));
        assert_eq!(sim.pending_count(), 1);

        drop(sleep);
        assert_eq!(sim.pending_count(), 0);
    }
}
