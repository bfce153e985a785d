//! Cancelable contexts with deadlines driven by a [`ClockHandle`].
//!
//! A [`Context`] is pending until it resolves to a [`ContextError`], after which
//! it never changes. Canceling a context resolves all contexts derived from it.
//! A context can carry a clock; deadlines derived from it are measured on that
//! clock, so a simulated clock decides when they expire.
//!
//! ```rust
//! use sim_clock::{ClockHandle, Context, ContextError, SimulationConfig};
//! use std::time::Duration;
//!
//! # #[tokio::main(flavor = "current_thread")]
//! # async fn main() {
//! let (clock, ctrl) = ClockHandle::simulated(SimulationConfig::now());
//! let ctx = Context::background().with_clock(clock);
//!
//! let (ctx, _cancel) = ctx.with_timeout(Duration::from_secs(10));
//! ctrl.advance(Duration::from_secs(20));
//!
//! assert_eq!(ctx.done().await, ContextError::DeadlineExceeded);
//! # }
//! ```

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use tokio::sync::watch;

use std::{
    sync::{Arc, Weak},
    time::Duration,
};

use crate::{error::ContextError, handle::ClockHandle, sleep::ClockSleep, timer::TimerStop};

/// A cancelable scope with an optional deadline and an optional clock.
#[derive(Clone)]
pub struct Context {
    inner: Arc<ContextInner>,
}

struct ContextInner {
    parent: Option<Context>,
    clock: Option<ClockHandle>,
    deadline: Option<DateTime<Utc>>,
    /// Simulated timer that expires this context, stopped when it resolves.
    expiry: Option<TimerStop>,
    /// Written once; observers of `Some` always see the final error.
    state: watch::Sender<Option<ContextError>>,
    children: Mutex<Vec<Weak<ContextInner>>>,
}

impl Context {
    /// The root context. It is never canceled and has no deadline or clock.
    pub fn background() -> Self {
        Self::node(None, None, None, None)
    }

    fn node(
        parent: Option<Context>,
        clock: Option<ClockHandle>,
        deadline: Option<DateTime<Utc>>,
        expiry: Option<TimerStop>,
    ) -> Self {
        let (state, _) = watch::channel(None);
        Self {
            inner: Arc::new(ContextInner {
                parent,
                clock,
                deadline,
                expiry,
                state,
                children: Mutex::new(Vec::new()),
            }),
        }
    }

    /// A child that resolves together with `self`.
    fn child(
        &self,
        clock: Option<ClockHandle>,
        deadline: Option<DateTime<Utc>>,
        expiry: Option<TimerStop>,
    ) -> Self {
        let child = Self::node(Some(self.clone()), clock, deadline, expiry);
        let inherited = {
            let mut children = self.inner.children.lock();
            let err = self.err();
            if err.is_none() {
                children.retain(|c| c.strong_count() > 0);
                children.push(Arc::downgrade(&child.inner));
            }
            err
        };
        if let Some(err) = inherited {
            child.finish(err);
        }
        child
    }

    /// Derive a context that can be canceled through the returned handle.
    pub fn with_cancel(&self) -> (Context, CancelHandle) {
        let ctx = self.child(None, None, None);
        let cancel = CancelHandle { ctx: ctx.clone() };
        (ctx, cancel)
    }

    /// Derive a context that carries `clock`.
    pub fn with_clock(&self, clock: ClockHandle) -> Context {
        self.child(Some(clock), None, None)
    }

    /// Derive a context that expires at `deadline` on this context's clock.
    pub fn with_deadline(&self, deadline: DateTime<Utc>) -> (Context, CancelHandle) {
        self.clock().deadline_context(self, deadline)
    }

    /// Derive a context that expires after `timeout` on this context's clock.
    pub fn with_timeout(&self, timeout: Duration) -> (Context, CancelHandle) {
        self.clock().timeout_context(self, timeout)
    }

    /// The clock attached to this context or its nearest ancestor, falling back
    /// to [`ClockHandle::realtime`].
    pub fn clock(&self) -> ClockHandle {
        let mut ctx = Some(self);
        while let Some(current) = ctx {
            if let Some(clock) = &current.inner.clock {
                return clock.clone();
            }
            ctx = current.inner.parent.as_ref();
        }
        ClockHandle::realtime()
    }

    /// The deadline of this context, if it or an ancestor has one.
    pub fn deadline(&self) -> Option<DateTime<Utc>> {
        self.inner
            .deadline
            .or_else(|| self.inner.parent.as_ref().and_then(Context::deadline))
    }

    /// Why the context ended, or `None` while it is still pending.
    pub fn err(&self) -> Option<ContextError> {
        *self.inner.state.borrow()
    }

    pub fn is_done(&self) -> bool {
        self.err().is_some()
    }

    /// Wait until the context ends.
    pub async fn done(&self) -> ContextError {
        let mut rx = self.inner.state.subscribe();
        match rx.wait_for(Option::is_some).await {
            Ok(state) => (*state).unwrap_or(ContextError::Canceled),
            Err(_) => ContextError::Canceled,
        }
    }

    /// Resolve the context and its descendants. Only the first call has an effect.
    pub(crate) fn finish(&self, err: ContextError) -> bool {
        let resolved = self.inner.state.send_if_modified(|state| {
            if state.is_some() {
                return false;
            }
            *state = Some(err);
            true
        });
        if resolved {
            if let Some(expiry) = &self.inner.expiry {
                expiry.stop();
            }
            let children = std::mem::take(&mut *self.inner.children.lock());
            for child in children.iter().filter_map(Weak::upgrade) {
                Context { inner: child }.finish(err);
            }
        }
        resolved
    }
}

impl std::fmt::Debug for Context {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Context")
            .field("deadline", &self.deadline())
            .field("err", &self.err())
            .finish()
    }
}

/// Cancels the context it was returned with.
///
/// Dropping the handle does not cancel the context.
#[derive(Debug, Clone)]
pub struct CancelHandle {
    ctx: Context,
}

impl CancelHandle {
    pub fn cancel(&self) {
        self.ctx.finish(ContextError::Canceled);
    }
}

/// Derive a context from `parent` that expires when `expiry` completes.
///
/// Without a stricter parent deadline the context joins the cancel scope
/// wrapping `parent`, so canceling resolves it on the spot and stops a simulated
/// expiry timer. A watcher task resolves it once `expiry` completes. Outside a
/// tokio runtime the watcher gets a thread of its own.
pub(crate) fn with_expiry(
    parent: &Context,
    deadline: DateTime<Utc>,
    expiry: ClockSleep,
) -> (Context, CancelHandle) {
    let (scope, cancel) = parent.with_cancel();
    if parent.deadline().is_some_and(|current| current <= deadline) {
        return (scope, cancel);
    }

    let ctx = scope.child(None, Some(deadline), expiry.stopper());
    let watched = ctx.clone();
    let watcher = async move {
        let err = tokio::select! {
            biased;
            err = watched.done() => err,
            _ = expiry => ContextError::DeadlineExceeded,
        };
        tracing::debug!(%deadline, %err, "deadline context resolved");
        watched.finish(err);
    };
    match tokio::runtime::Handle::try_current() {
        Ok(rt) => {
            rt.spawn(watcher);
        }
        Err(_) => {
            std::thread::spawn(move || {
                match tokio::runtime::Builder::new_current_thread()
                    .enable_time()
                    .build()
                {
                    Ok(rt) => rt.block_on(watcher),
                    Err(err) => tracing::error!(%err, "failed to start deadline watcher"),
                }
            });
        }
    }
    (ctx, cancel)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn background_is_pending_forever() {
        let ctx = Context::background();
        assert!(!ctx.is_done());
        assert_eq!(ctx.deadline(), None);
        assert!(!ctx.clock().is_simulated());
    }

    #[test]
    fn cancel_propagates_to_descendants() {
        let (parent, cancel) = Context::background().with_cancel();
        let (child, _) = parent.with_cancel();
        let grandchild = child.with_clock(ClockHandle::realtime());

        cancel.cancel();
        assert_eq!(parent.err(), Some(ContextError::Canceled));
        assert_eq!(child.err(), Some(ContextError::Canceled));
        assert_eq!(grandchild.err(), Some(ContextError::Canceled));
    }

    #[test]
    fn child_of_finished_context_starts_finished() {
        let (parent, cancel) = Context::background().with_cancel();
        cancel.cancel();
        let (child, _) = parent.with_cancel();
        assert_eq!(child.err(), Some(ContextError::Canceled));
    }

    #[test]
    fn canceling_child_leaves_parent_alone() {
        let (parent, _) = Context::background().with_cancel();
        let (child, cancel) = parent.with_cancel();
        cancel.cancel();
        assert!(child.is_done());
        assert!(!parent.is_done());
    }

    #[test]
    fn err_is_written_once() {
        let ctx = Context::background();
        assert!(ctx.finish(ContextError::DeadlineExceeded));
        assert!(!ctx.finish(ContextError::Canceled));
        assert_eq!(ctx.err(), Some(ContextError::DeadlineExceeded));
    }
}
