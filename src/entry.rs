use chrono::{DateTime, TimeDelta, Utc};
use tokio::sync::mpsc;

use std::{sync::Arc, time::Duration};

/// Callback dispatched by [`ClockHandle::after_func`](crate::ClockHandle::after_func).
pub(crate) type Callback = Arc<dyn Fn() + Send + Sync>;

/// Arena key of a timer entry. Ids are handed out in creation order, which
/// doubles as the tie-break between equal deadlines.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub(crate) struct TimerId(pub(crate) u64);

/// What the engine should do with an entry after it fired.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Schedule {
    Once,
    Repeat(Duration),
}

/// The action run when an entry's deadline is reached.
#[derive(Clone)]
pub(crate) enum FireAction {
    /// Deliver the firing time to a capacity-1 queue.
    Deliver(mpsc::Sender<DateTime<Utc>>),
    /// Run a callback on a separate task.
    Call(Callback),
    /// Deliver the firing time and repeat every `period`.
    Tick {
        tx: mpsc::Sender<DateTime<Utc>>,
        period: Duration,
    },
}

impl FireAction {
    /// Run the action. Never blocks: a value that cannot be delivered because
    /// the previous one is still unread is dropped.
    pub fn fire(&self, now: DateTime<Utc>) -> Schedule {
        match self {
            Self::Deliver(tx) => {
                let _ = tx.try_send(now);
                Schedule::Once
            }
            Self::Call(callback) => {
                dispatch(Arc::clone(callback));
                Schedule::Once
            }
            Self::Tick { tx, period } => {
                let _ = tx.try_send(now);
                Schedule::Repeat(*period)
            }
        }
    }

    pub fn is_callback(&self) -> bool {
        matches!(self, Self::Call(_))
    }
}

fn dispatch(callback: Callback) {
    match tokio::runtime::Handle::try_current() {
        Ok(rt) => {
            rt.spawn_blocking(move || callback());
        }
        Err(_) => {
            std::thread::spawn(move || callback());
        }
    }
}

/// `time + duration`, saturating at the maximum representable time.
pub(crate) fn add(time: DateTime<Utc>, duration: Duration) -> DateTime<Utc> {
    TimeDelta::from_std(duration)
        .ok()
        .and_then(|delta| time.checked_add_signed(delta))
        .unwrap_or(DateTime::<Utc>::MAX_UTC)
}

/// First tick boundary of a `period` ticker strictly after `target`, counted
/// from `fired_at`. Intermediate ticks inside `(fired_at, target]` are skipped.
///
/// Saturates at the maximum representable time, which is then not after `target`.
pub(crate) fn next_tick(
    fired_at: DateTime<Utc>,
    target: DateTime<Utc>,
    period: Duration,
) -> DateTime<Utc> {
    const NANOS_PER_SEC: u128 = 1_000_000_000;
    let behind = (target - fired_at).to_std().unwrap_or_default();
    let period_ns = period.as_nanos().max(1);
    let ticks = behind.as_nanos() / period_ns + 1;
    let step = period_ns.saturating_mul(ticks);
    i64::try_from(step / NANOS_PER_SEC)
        .ok()
        .and_then(TimeDelta::try_seconds)
        .zip(i64::try_from(step % NANOS_PER_SEC).ok())
        .and_then(|(secs, nanos)| secs.checked_add(&TimeDelta::nanoseconds(nanos)))
        .and_then(|step| fired_at.checked_add_signed(step))
        .unwrap_or(DateTime::<Utc>::MAX_UTC)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn t0() -> DateTime<Utc> {
        DateTime::parse_from_rfc3339("2018-01-01T10:00:00Z")
            .unwrap()
            .with_timezone(&Utc)
    }

    #[test]
    fn next_tick_skips_missed_ticks() {
        let period = Duration::from_secs(5);
        let next = next_tick(t0(), t0() + TimeDelta::seconds(23), period);
        assert_eq!(next, t0() + TimeDelta::seconds(25));
    }

    #[test]
    fn next_tick_on_boundary_moves_past_target() {
        let period = Duration::from_secs(5);
        let next = next_tick(t0(), t0() + TimeDelta::seconds(20), period);
        assert_eq!(next, t0() + TimeDelta::seconds(25));

        let next = next_tick(t0(), t0(), period);
        assert_eq!(next, t0() + TimeDelta::seconds(5));
    }

    #[test]
    fn next_tick_spans_centuries() {
        let period = Duration::from_secs(1);
        let target = t0() + TimeDelta::days(365_000);
        assert_eq!(next_tick(t0(), target, period), target + TimeDelta::seconds(1));
    }

    #[test]
    fn next_tick_saturates_at_max_time() {
        let max = DateTime::<Utc>::MAX_UTC;
        let period = Duration::from_secs(5);
        assert_eq!(next_tick(max - TimeDelta::seconds(1), max, period), max);
        assert_eq!(next_tick(max, max, period), max);
    }

    #[test]
    fn deliver_drops_when_full() {
        let (tx, mut rx) = mpsc::channel(1);
        let action = FireAction::Deliver(tx);
        assert_eq!(action.fire(t0()), Schedule::Once);
        assert_eq!(action.fire(t0() + TimeDelta::seconds(1)), Schedule::Once);

        assert_eq!(rx.try_recv().ok(), Some(t0()));
        assert!(rx.try_recv().is_err());
    }

    #[test]
    fn add_saturates() {
        assert_eq!(
            add(DateTime::<Utc>::MAX_UTC, Duration::from_secs(1)),
            DateTime::<Utc>::MAX_UTC
        );
    }
}
