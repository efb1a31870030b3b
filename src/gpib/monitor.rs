//! The connection monitor, which decides whether an instrument is physically
//! present on the bus.
//!
//! A powered IEEE-488 device terminates every line with a pull-up.  With no
//! powered device attached, the controller's transceivers read ATN low even
//! though nobody is driving it.  The monitor samples ATN once per ~100ms
//! epoch and filters the result, so a single glitch does not flip the state.
//!
//! The monitor is ticked from a timer, which may preempt the bus controller
//! at any point.  All of its state is therefore held in atomics, and every
//! update is a single word store - there is no window in which the tick can
//! observe a half-made update.  The tick does not sample while a transaction
//! is active, because the controller legitimately asserts ATN during one.

// Copyright (c) 2025 Piers Finlayson <piers@piers.rocks>
//
// GPLv3 licensed - see https://www.gnu.org/licenses/gpl-3.0.html

use portable_atomic::{AtomicBool, AtomicU8, AtomicU32, Ordering};

use crate::constants::{MONITOR_DEAD_EPOCHS, MONITOR_SUBTICKS_PER_EPOCH};

/// Whether an instrument is attached to the bus.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum ConnectionState {
    /// The monitor has not yet completed a sampling epoch.
    Unknown,
    Disconnected,
    Connected,
}

impl ConnectionState {
    const fn to_u8(self) -> u8 {
        match self {
            ConnectionState::Unknown => 0,
            ConnectionState::Disconnected => 1,
            ConnectionState::Connected => 2,
        }
    }

    const fn from_u8(value: u8) -> Self {
        match value {
            1 => ConnectionState::Disconnected,
            2 => ConnectionState::Connected,
            _ => ConnectionState::Unknown,
        }
    }
}

pub struct ConnectionMonitor {
    // Set while the controller has a device addressed, or is in the middle
    // of a command sequence.
    transaction: AtomicBool,

    // A ConnectionState.
    state: AtomicU8,

    // Consecutive epochs that saw a dead ATN line.
    dead_epochs: AtomicU8,

    // Sub-ticks since the last epoch.
    subticks: AtomicU8,

    // Epochs completed since the monitor was last armed.
    epochs: AtomicU32,
}

impl Default for ConnectionMonitor {
    fn default() -> Self {
        Self::new()
    }
}

impl ConnectionMonitor {
    pub const fn new() -> Self {
        Self {
            transaction: AtomicBool::new(false),
            state: AtomicU8::new(ConnectionState::Unknown.to_u8()),
            dead_epochs: AtomicU8::new(0),
            subticks: AtomicU8::new(0),
            epochs: AtomicU32::new(0),
        }
    }

    /// The current connection state.
    pub fn state(&self) -> ConnectionState {
        ConnectionState::from_u8(self.state.load(Ordering::Acquire))
    }

    pub fn is_connected(&self) -> bool {
        self.state() == ConnectionState::Connected
    }

    /// Whether a transaction is in progress.  While it is, the monitor does
    /// not sample.
    pub fn transaction_active(&self) -> bool {
        self.transaction.load(Ordering::Acquire)
    }

    pub(crate) fn begin_transaction(&self) {
        self.transaction.store(true, Ordering::Release);
    }

    pub(crate) fn end_transaction(&self) {
        self.transaction.store(false, Ordering::Release);
    }

    /// The number of complete sampling epochs since the monitor was armed.
    pub fn epochs(&self) -> u32 {
        self.epochs.load(Ordering::Relaxed)
    }

    /// The number of consecutive dead epochs seen so far.
    pub fn dead_epochs(&self) -> u8 {
        self.dead_epochs.load(Ordering::Relaxed)
    }

    /// Re-arm the monitor after a bus reset.  The epoch divider restarts and
    /// the hysteresis counter is cleared.  The connection state is left
    /// alone - only an epoch can change it.
    pub(crate) fn rearm(&self) {
        self.transaction.store(false, Ordering::Release);
        self.dead_epochs.store(0, Ordering::Relaxed);
        self.subticks.store(0, Ordering::Relaxed);
        self.epochs.store(0, Ordering::Relaxed);
    }

    /// Called from the periodic timer every sub-tick.  Every
    /// `MONITOR_SUBTICKS_PER_EPOCH` sub-ticks an epoch completes, and if no
    /// transaction is active `atn_dead` is called to sample the bus.
    ///
    /// `atn_dead` must return true if ATN reads asserted.
    pub fn tick(&self, atn_dead: impl FnOnce() -> bool) {
        let subticks = self.subticks.load(Ordering::Relaxed) + 1;
        if subticks < MONITOR_SUBTICKS_PER_EPOCH {
            self.subticks.store(subticks, Ordering::Relaxed);
            return;
        }
        self.subticks.store(0, Ordering::Relaxed);
        self.epochs
            .store(self.epochs().wrapping_add(1), Ordering::Relaxed);

        if self.transaction_active() {
            return;
        }
        self.epoch(atn_dead());
    }

    /// Run the hysteresis filter for one completed epoch.
    pub fn epoch(&self, atn_dead: bool) {
        if atn_dead {
            let dead = self.dead_epochs().saturating_add(1).min(MONITOR_DEAD_EPOCHS);
            self.dead_epochs.store(dead, Ordering::Relaxed);
            if dead >= MONITOR_DEAD_EPOCHS {
                self.set_state(ConnectionState::Disconnected);
            }
        } else {
            self.dead_epochs.store(0, Ordering::Relaxed);
            self.set_state(ConnectionState::Connected);
        }
    }

    fn set_state(&self, state: ConnectionState) {
        let old = ConnectionState::from_u8(self.state.swap(state.to_u8(), Ordering::AcqRel));
        if old != state {
            info!("Connection state {} -> {}", old, state);
        }
    }
}
