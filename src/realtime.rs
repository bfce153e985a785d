use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use tokio::{task::JoinHandle, time::MissedTickBehavior};

use std::time::Duration;

use crate::entry::FireAction;

/// Real-time clock implementation using system time and tokio timers.
#[derive(Debug, Clone, Copy)]
pub(crate) struct RealtimeClock;

impl RealtimeClock {
    #[inline]
    pub fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }

    #[inline]
    pub fn sleep(&self, duration: Duration) -> tokio::time::Sleep {
        tokio::time::sleep(duration)
    }
}

/// Timer or ticker driven by a tokio task. Requires a tokio runtime.
pub(crate) struct RealtimeTimer {
    action: FireAction,
    task: Mutex<Option<JoinHandle<()>>>,
}

impl RealtimeTimer {
    pub fn spawn(duration: Duration, action: FireAction) -> Self {
        let task = spawn_task(duration, action.clone());
        Self {
            action,
            task: Mutex::new(Some(task)),
        }
    }

    pub fn stop(&self) -> bool {
        abort(self.task.lock().take())
    }

    pub fn reset(&self, duration: Duration) -> bool {
        let mut task = self.task.lock();
        let was_active = abort(task.take());
        *task = Some(spawn_task(duration, self.action.clone()));
        was_active
    }
}

impl Drop for RealtimeTimer {
    fn drop(&mut self) {
        // Callbacks outlive their handle.
        if !self.action.is_callback() {
            abort(self.task.get_mut().take());
        }
    }
}

fn abort(task: Option<JoinHandle<()>>) -> bool {
    task.is_some_and(|task| {
        let was_active = !task.is_finished();
        task.abort();
        was_active
    })
}

fn spawn_task(duration: Duration, action: FireAction) -> JoinHandle<()> {
    tokio::spawn(async move {
        if let FireAction::Tick { period, .. } = &action {
            let mut interval =
                tokio::time::interval_at(tokio::time::Instant::now() + *period, *period);
            interval.set_missed_tick_behavior(MissedTickBehavior::Skip);
            loop {
                interval.tick().await;
                action.fire(Utc::now());
            }
        }
        tokio::time::sleep(duration).await;
        action.fire(Utc::now());
    })
}
