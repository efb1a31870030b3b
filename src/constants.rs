//! This module contains constants for gpib488.
//!
//! The first half is protocol timing, used by the hardware independent
//! protocol core.  These are plain integers, as the core delays through
//! embedded-hal's `DelayNs`.  The second half is only used by the firmware
//! and uses embassy-time `Duration`s.

// Copyright (c) 2025 Piers Finlayson <piers@piers.rocks>
//
// GPLv3 licensed - see https://www.gnu.org/licenses/gpl-3.0.html

use static_assertions::const_assert;

//
// Handshake timing
//

/// How long data must be held on the bus before DAV may be asserted.  The
/// IEEE-488 settling time is well below this.
pub const DATA_SETTLE_US: u32 = 1;

/// How long a `PollBudget` waits on each poll.
pub const POLL_INTERVAL_US: u32 = 10;

//
// Interface clear
//

/// How long IFC is held asserted to clear all device interfaces.
pub const IFC_PULSE_MS: u32 = 100;

/// How long to leave devices to recover after IFC is released.
pub const IFC_RECOVERY_MS: u32 = 10;

//
// Address discovery
//

/// Polls allowed for each command byte sent while probing for a device
/// address.  At `POLL_INTERVAL_US` this is 5ms.
pub const DISCOVERY_POLL_BUDGET: u16 = 500;

/// How long to wait after addressing a candidate listener before checking
/// whether a device has latched onto the address.
pub const DISCOVERY_SETTLE_MS: u32 = 2;

/// The highest address the discovery scan tries.  0x20-0x3e are primary
/// addresses 0x00-0x1e with secondary address 0.
pub const DISCOVERY_FIRST_CANDIDATE: u8 = 0x3e;

/// Returned to users of the legacy interface when no device answered the
/// discovery scan.
pub const NO_ADDRESS: u8 = 0xff;

//
// Connection monitor
//

/// Monitor sub-ticks that make up one sampling epoch.
pub const MONITOR_SUBTICKS_PER_EPOCH: u8 = 6;

/// Length of a monitor sub-tick.  Six of these make a ~100ms epoch.
pub const MONITOR_SUBTICK_US: u64 = 16_384;

/// Consecutive epochs with a dead ATN line before the device is considered
/// disconnected.
pub const MONITOR_DEAD_EPOCHS: u8 = 2;

const_assert!(MONITOR_DEAD_EPOCHS > 0);
const_assert!(MONITOR_SUBTICKS_PER_EPOCH as u64 * MONITOR_SUBTICK_US <= 100_000);

//
// Executor blocking
//
// Bus operations busy-wait, so while one runs nothing else on the executor
// does.  The controller task makes at most one bus operation, or one
// discovery step, per pass.
//

/// Time budget for a single bus operation issued by the controller task, in
/// ms.
pub const TRANSFER_TIMEOUT_MS: u64 = 1_000;

// A timeout is always followed by a reset, which pulses IFC.
const RECOVERY_MS: u64 = (IFC_PULSE_MS + IFC_RECOVERY_MS) as u64;

// A discovery step is one probe and an Unlisten, both of which may time out.
const PROBE_TIMEOUT_MS: u64 = DISCOVERY_POLL_BUDGET as u64 * POLL_INTERVAL_US as u64 / 1000;
const DISCOVERY_STEP_WORST_CASE_MS: u64 =
    2 * (PROBE_TIMEOUT_MS + RECOVERY_MS) + DISCOVERY_SETTLE_MS as u64;

const TRANSFER_WORST_CASE_MS: u64 = TRANSFER_TIMEOUT_MS + RECOVERY_MS;

/// The longest the executor can be blocked by a controller task pass, in
/// ms.
pub const BUS_BLOCK_WORST_CASE_MS: u64 = if TRANSFER_WORST_CASE_MS > DISCOVERY_STEP_WORST_CASE_MS {
    TRANSFER_WORST_CASE_MS
} else {
    DISCOVERY_STEP_WORST_CASE_MS
};

//
// Watchdog timers
//
// A policed task last fed just before a block can be overdue by the time the
// executor resumes, and the watchdog task may check before it runs again.
// Every policed task's timer must therefore cover a whole block plus a check
// interval.  The watchdog task itself feeds the hardware watchdog, so that
// must also cover a block plus a check interval.
//

/// The hardware watchdog timeout, in ms.  The RP2040 watchdog cannot be set
/// beyond ~8.3s.
pub const WATCHDOG_HW_TIMEOUT_MS: u64 = 8_000;

/// How often the watchdog task checks that policed tasks have fed it, in ms.
pub const WATCHDOG_CHECK_INTERVAL_MS: u64 = 1_000;

/// How often the bus controller task must feed the watchdog, in ms.
pub const CONTROLLER_WATCHDOG_TIMER_MS: u64 = 10_000;

/// How often the monitor task must feed the watchdog, in ms.
pub const MONITOR_WATCHDOG_TIMER_MS: u64 = 10_000;

/// How often the status display must feed the watchdog, in ms.
pub const STATUS_DISPLAY_WATCHDOG_TIMER_MS: u64 = 3_000;

const WATCHDOG_MIN_TIMER_MS: u64 = BUS_BLOCK_WORST_CASE_MS + WATCHDOG_CHECK_INTERVAL_MS;

const_assert!(WATCHDOG_MIN_TIMER_MS < WATCHDOG_HW_TIMEOUT_MS);
const_assert!(WATCHDOG_MIN_TIMER_MS < CONTROLLER_WATCHDOG_TIMER_MS);
const_assert!(WATCHDOG_MIN_TIMER_MS < MONITOR_WATCHDOG_TIMER_MS);
const_assert!(WATCHDOG_MIN_TIMER_MS < STATUS_DISPLAY_WATCHDOG_TIMER_MS);

#[cfg(feature = "firmware")]
pub use firmware::*;

#[cfg(feature = "firmware")]
mod firmware {
    use embassy_time::Duration;

    use super::{
        CONTROLLER_WATCHDOG_TIMER_MS, MONITOR_SUBTICK_US, MONITOR_WATCHDOG_TIMER_MS,
        STATUS_DISPLAY_WATCHDOG_TIMER_MS, TRANSFER_TIMEOUT_MS, WATCHDOG_CHECK_INTERVAL_MS,
        WATCHDOG_HW_TIMEOUT_MS,
    };

    /// Hardware watchdog timeout.
    pub const WATCHDOG_HW_TIMEOUT: Duration = Duration::from_millis(WATCHDOG_HW_TIMEOUT_MS);

    /// How often the watchdog task checks that policed tasks have fed it.
    pub const WATCHDOG_CHECK_INTERVAL: Duration = Duration::from_millis(WATCHDOG_CHECK_INTERVAL_MS);

    /// How often the bus controller task must feed the watchdog.
    pub const CONTROLLER_WATCHDOG_TIMER: Duration =
        Duration::from_millis(CONTROLLER_WATCHDOG_TIMER_MS);

    /// How often the monitor task must feed the watchdog.
    pub const MONITOR_WATCHDOG_TIMER: Duration = Duration::from_millis(MONITOR_WATCHDOG_TIMER_MS);

    /// How often the status display must feed the watchdog to prevent a reset.
    pub const STATUS_DISPLAY_WATCHDOG_TIMER: Duration =
        Duration::from_millis(STATUS_DISPLAY_WATCHDOG_TIMER_MS);

    /// The connection monitor sub-tick.
    pub const MONITOR_TICK: Duration = Duration::from_micros(MONITOR_SUBTICK_US);

    // Timer for the StatusDisplay spend on and off when blinking.
    pub const STATUS_DISPLAY_BLINK_TIMER: Duration = Duration::from_millis(100);

    // Timer for the StatusDisplay to pause between doing work.  Must be less
    // than the minimum time the status LED can be on off, and when the code
    // changes the device status, it will take up to this time for the new
    // status to be applied.
    pub const STATUS_DISPLAY_TIMER: Duration = Duration::from_millis(50);

    // How often we aim to log from our primary loops to prove they are still
    // alive.
    pub const LOOP_LOG_INTERVAL: Duration = Duration::from_secs(5);

    /// How long the bus controller task sleeps between passes.
    pub const CONTROLLER_LOOP_TIMER: Duration = Duration::from_millis(100);

    /// How often a discovered instrument is serial polled.
    pub const STATUS_POLL_INTERVAL: Duration = Duration::from_secs(1);

    /// Time budget for a single bus operation issued by the controller task.
    pub const TRANSFER_TIMEOUT: Duration = Duration::from_millis(TRANSFER_TIMEOUT_MS);

    /// How long the bus controller task yields between discovery steps.
    pub const DISCOVERY_STEP_TIMER: Duration = Duration::from_millis(1);
}
