//! Deterministic simulated time with timers, tickers and deadline contexts.
//!
//! Code that depends on time takes a [`ClockHandle`]. In production the handle
//! reads the system clock and drives tokio timers. In tests it is backed by a
//! simulated clock whose time only moves when a [`ClockController`] says so,
//! firing every timer whose deadline was reached in a deterministic order.
//!
//! # Overview
//!
//! - [`ClockHandle`] - `now`, `sleep`, `timeout`, timers, tickers and deadline contexts
//! - [`ClockController`] - `advance`, `advance_to`, `advance_to_next` for simulated clocks
//! - [`Timer`] / [`Ticker`] - one-shot and repeating notifications with `stop`/`reset`
//! - [`Context`] - cancelable scopes whose deadlines are measured on their clock
//!
//! # Deterministic Testing
//!
//! Advancing fires due timers in deadline order, and timers sharing a deadline
//! fire in the order they were created. Each timer sees the clock reading its
//! own deadline, however far the advance goes:
//!
//! ```rust
//! use sim_clock::{ClockHandle, SimulationConfig};
//! use std::time::Duration;
//!
//! let (clock, ctrl) = ClockHandle::simulated(SimulationConfig::now());
//! let t0 = clock.now();
//!
//! let mut ticker = clock.new_ticker(Duration::from_secs(5)).unwrap();
//! let mut timer = clock.new_timer(Duration::from_secs(10));
//!
//! ctrl.advance(Duration::from_secs(5));
//! assert_eq!(ticker.try_recv(), Some(t0 + chrono::Duration::seconds(5)));
//!
//! ctrl.advance(Duration::from_secs(5));
//! assert_eq!(ticker.try_recv(), Some(t0 + chrono::Duration::seconds(10)));
//! assert_eq!(timer.try_recv(), Some(t0 + chrono::Duration::seconds(10)));
//! ```

#![cfg_attr(feature = "fail-on-warnings", deny(warnings))]
#![cfg_attr(feature = "fail-on-warnings", deny(clippy::all))]
#![forbid(unsafe_code)]

mod config;
pub mod context;
mod controller;
mod entry;
pub mod error;
mod handle;
mod inner;
mod queue;
mod realtime;
mod simulated;
mod sleep;
mod ticker;
mod timer;

pub use config::*;
#[doc(inline)]
pub use context::{CancelHandle, Context};
pub use controller::*;
#[doc(inline)]
pub use error::*;
pub use handle::*;
pub use sleep::{ClockSleep, ClockTimeout};
pub use ticker::Ticker;
pub use timer::Timer;
