use chrono::{DateTime, Utc};
use tokio::sync::mpsc;

use crate::timer::TimerControl;

/// A repeating notification.
///
/// Created by [`ClockHandle::new_ticker`](crate::ClockHandle::new_ticker) and
/// [`ClockHandle::tick`](crate::ClockHandle::tick). Each tick delivers the
/// clock's time into a queue holding at most one value; ticks that arrive while
/// a value is still unread are dropped.
///
/// On a simulated clock a ticker fires at most once per advance. Ticks skipped
/// by a large advance are not replayed: the next tick is the first period
/// boundary after the new time.
///
/// Dropping a ticker stops it.
pub struct Ticker {
    rx: mpsc::Receiver<DateTime<Utc>>,
    control: TimerControl,
}

impl Ticker {
    pub(crate) fn new(rx: mpsc::Receiver<DateTime<Utc>>, control: TimerControl) -> Self {
        Self { rx, control }
    }

    /// Turn the ticker off. Returns whether it was still running.
    pub fn stop(&self) -> bool {
        self.control.stop()
    }

    /// Wait for the next tick.
    pub async fn recv(&mut self) -> Option<DateTime<Utc>> {
        self.rx.recv().await
    }

    /// Take a delivered tick without waiting.
    pub fn try_recv(&mut self) -> Option<DateTime<Utc>> {
        self.rx.try_recv().ok()
    }
}

impl std::fmt::Debug for Ticker {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match &self.control {
            TimerControl::Simulated { id, .. } => {
                f.debug_struct("Ticker::Simulated").field("id", &id.0).finish()
            }
            TimerControl::Realtime(_) => f.debug_struct("Ticker::Realtime").finish(),
        }
    }
}
