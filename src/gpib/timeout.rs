//! Timeout policies, polled from inside every handshake wait loop.
//!
//! Each top-level operation is handed a fresh policy by its caller, so that
//! discovery can probe with a short budget while normal transfers use a long
//! one.  A policy owns its own countdown - there is no shared timer state.

// Copyright (c) 2025 Piers Finlayson <piers@piers.rocks>
//
// GPLv3 licensed - see https://www.gnu.org/licenses/gpl-3.0.html

use embedded_hal::delay::DelayNs;

use crate::constants::POLL_INTERVAL_US;

/// Something that can report whether an operation's time budget is used up.
pub trait Timeout {
    /// Called once per iteration of a bus wait loop.  Returns true once the
    /// budget has elapsed.
    fn elapsed(&mut self) -> bool;
}

impl<F> Timeout for F
where
    F: FnMut() -> bool,
{
    fn elapsed(&mut self) -> bool {
        self()
    }
}

/// A budget of a fixed number of polls, each of which waits
/// `POLL_INTERVAL_US` before counting down.
///
/// The poll which uses up the budget reports elapsed, so `PollBudget::new(d,
/// 500)` allows 499 unsuccessful polls and times out on the 500th.
pub struct PollBudget<D> {
    delay: D,
    remaining: u16,
}

impl<D: DelayNs> PollBudget<D> {
    pub fn new(delay: D, polls: u16) -> Self {
        Self {
            delay,
            remaining: polls,
        }
    }

    /// Polls left before this budget elapses.
    pub fn remaining(&self) -> u16 {
        self.remaining
    }
}

impl<D: DelayNs> Timeout for PollBudget<D> {
    fn elapsed(&mut self) -> bool {
        self.delay.delay_us(POLL_INTERVAL_US);
        self.remaining = self.remaining.saturating_sub(1);
        self.remaining == 0
    }
}

#[cfg(feature = "firmware")]
pub use deadline::Deadline;

#[cfg(feature = "firmware")]
mod deadline {
    use embassy_time::{Duration, Instant};

    use super::Timeout;

    /// A wall-clock budget, measured with embassy-time.
    pub struct Deadline {
        expires: Instant,
    }

    impl Deadline {
        pub fn after(timeout: Duration) -> Self {
            Self {
                expires: Instant::now() + timeout,
            }
        }
    }

    impl Timeout for Deadline {
        fn elapsed(&mut self) -> bool {
            Instant::now() >= self.expires
        }
    }
}
