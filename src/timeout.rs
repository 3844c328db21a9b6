//! Deadline bookkeeping for blocking operations.
//!
//! Every blocking call in this crate takes `timeout: Option<Duration>`,
//! where `None` means "wait forever". A [`Deadline`] pins the expiry once
//! at the start of the call so that re-armed condvar waits (after spurious
//! wakeups or state changes) never extend the total wait.

use std::time::{Duration, Instant};

#[derive(Debug, Clone, Copy)]
pub(crate) struct Deadline {
    at: Option<Instant>,
}

impl Deadline {
    pub(crate) fn new(timeout: Option<Duration>) -> Self {
        Self {
            at: timeout.map(|t| Instant::now() + t),
        }
    }

    /// Time left until expiry. `None` means unbounded; `Some(ZERO)` means
    /// the deadline has passed.
    pub(crate) fn remaining(&self) -> Option<Duration> {
        self.at.map(|at| at.saturating_duration_since(Instant::now()))
    }

    pub(crate) fn expired(&self) -> bool {
        matches!(self.remaining(), Some(d) if d.is_zero())
    }
}
