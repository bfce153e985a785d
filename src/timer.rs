use chrono::{DateTime, Utc};
use tokio::sync::mpsc;

use std::{
    sync::Arc,
    task::{Context, Poll},
    time::Duration,
};

use crate::{entry::TimerId, realtime::RealtimeTimer, simulated::SimulatedClock};

/// Control side of a [`Timer`] or [`Ticker`](crate::Ticker).
pub(crate) enum TimerControl {
    Simulated {
        clock: Arc<SimulatedClock>,
        id: TimerId,
    },
    Realtime(RealtimeTimer),
}

impl TimerControl {
    pub(crate) fn stop(&self) -> bool {
        match self {
            Self::Simulated { clock, id } => clock.stop(*id),
            Self::Realtime(timer) => timer.stop(),
        }
    }

    pub(crate) fn reset(&self, duration: Duration) -> bool {
        match self {
            Self::Simulated { clock, id } => clock.reset(*id, duration),
            Self::Realtime(timer) => timer.reset(duration),
        }
    }

    /// A detached stop handle. Realtime timers are only stopped by their owner.
    pub(crate) fn stopper(&self) -> Option<TimerStop> {
        match self {
            Self::Simulated { clock, id } => Some(TimerStop {
                clock: Arc::clone(clock),
                id: *id,
            }),
            Self::Realtime(_) => None,
        }
    }
}

/// Stops a simulated timer without owning it.
#[derive(Clone)]
pub(crate) struct TimerStop {
    clock: Arc<SimulatedClock>,
    id: TimerId,
}

impl TimerStop {
    pub fn stop(&self) -> bool {
        self.clock.stop(self.id)
    }
}

impl Drop for TimerControl {
    fn drop(&mut self) {
        if let Self::Simulated { clock, id } = self {
            clock.release(*id);
        }
    }
}

/// A one-shot notification.
///
/// Created by [`ClockHandle::new_timer`](crate::ClockHandle::new_timer),
/// [`ClockHandle::after`](crate::ClockHandle::after) and
/// [`ClockHandle::after_func`](crate::ClockHandle::after_func).
///
/// When the timer fires, the clock's time at that moment is delivered to a
/// queue holding at most one value. Firing while an earlier value is still
/// unread drops the new value.
///
/// Dropping a timer stops it, except for timers created by `after_func`: their
/// callback still runs when the deadline is reached.
pub struct Timer {
    rx: Option<mpsc::Receiver<DateTime<Utc>>>,
    control: TimerControl,
}

impl Timer {
    pub(crate) fn new(rx: Option<mpsc::Receiver<DateTime<Utc>>>, control: TimerControl) -> Self {
        Self { rx, control }
    }

    /// Prevent the timer from firing.
    ///
    /// Returns `true` if the call stopped a pending timer, `false` if it had
    /// already fired, been stopped, or fired immediately on creation.
    pub fn stop(&self) -> bool {
        self.control.stop()
    }

    /// Reschedule the timer to fire `duration` from now.
    ///
    /// A zero duration fires the timer before returning. Returns whether the
    /// timer was pending before the call, like [`stop`](Self::stop).
    pub fn reset(&self, duration: Duration) -> bool {
        self.control.reset(duration)
    }

    /// Wait for the next delivered value.
    ///
    /// Returns `None` straight away for timers created by `after_func`, which
    /// deliver nothing.
    pub async fn recv(&mut self) -> Option<DateTime<Utc>> {
        match &mut self.rx {
            Some(rx) => rx.recv().await,
            None => None,
        }
    }

    /// Take a delivered value without waiting.
    pub fn try_recv(&mut self) -> Option<DateTime<Utc>> {
        self.rx.as_mut().and_then(|rx| rx.try_recv().ok())
    }

    pub(crate) fn stopper(&self) -> Option<TimerStop> {
        self.control.stopper()
    }

    pub(crate) fn poll_recv(&mut self, cx: &mut Context<'_>) -> Poll<Option<DateTime<Utc>>> {
        match &mut self.rx {
            Some(rx) => rx.poll_recv(cx),
            None => Poll::Ready(None),
        }
    }
}

impl std::fmt::Debug for Timer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match &self.control {
            TimerControl::Simulated { id, .. } => {
                f.debug_struct("Timer::Simulated").field("id", &id.0).finish()
            }
            TimerControl::Realtime(_) => f.debug_struct("Timer::Realtime").finish(),
        }
    }
}
