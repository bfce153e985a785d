//! Types for working with errors produced by sim-clock.

use thiserror::Error;

/// Error returned when a clock operation is misused.
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClockError {
    #[error("ClockError - NonPositiveInterval: ticker period must be greater than zero")]
    NonPositiveInterval,
}

/// Terminal state of a [`Context`](crate::Context).
///
/// A context starts out pending and resolves to exactly one of these, never
/// changing afterwards.
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum ContextError {
    #[error("context canceled")]
    Canceled,
    #[error("context deadline exceeded")]
    DeadlineExceeded,
}

/// Error returned when a timeout expires.
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
#[error("deadline has elapsed")]
pub struct Elapsed;
