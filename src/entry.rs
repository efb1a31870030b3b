//! Firmware entry point, and the tasks which run the bus controller.
//!
//! Threading and tasks model
//!
//! Everything runs on core 0 in thread mode.  The tasks are:
//! - the monitor task, which ticks the connection monitor every
//!   `MONITOR_TICK`
//! - the controller task, which finds the instrument once it is attached,
//!   locks out its front panel, and then serial polls it periodically
//! - the status display task, which drives the LED
//! - the watchdog task.
//!
//! Bus operations busy-wait, so while one is running (a discovery scan in
//! particular) no other task runs.  The monitor's ticks catch up afterwards.

// Copyright (c) 2025 Piers Finlayson <piers@piers.rocks>
//
// GPLv3 licensed - see https://www.gnu.org/licenses/gpl-3.0.html

use core::cell::RefCell;
use embassy_executor::{SpawnError, Spawner};
use embassy_rp::gpio::AnyPin;
use embassy_sync::blocking_mutex::{Mutex, raw::ThreadModeRawMutex};
use embassy_time::{Duration, Instant, Ticker, Timer, block_for};
use embedded_hal::delay::DelayNs;

use crate::built::log_fw_info;
use crate::constants::{
    CONTROLLER_LOOP_TIMER, CONTROLLER_WATCHDOG_TIMER, DISCOVERY_STEP_TIMER, LOOP_LOG_INTERVAL,
    MONITOR_TICK, MONITOR_WATCHDOG_TIMER, STATUS_POLL_INTERVAL, TRANSFER_TIMEOUT,
};
use crate::gpib::timeout::Deadline;
use crate::gpib::{BusController, ConnectionState, DiscoveryScan};
use crate::infra::display::{DisplayType, StatusDisplay, status_task, update_status};
use crate::infra::gpio::{Gpio, RpBusLines};
use crate::infra::watchdog::{TaskId, WatchdogType, create_watchdog, watchdog_task};

/// Busy-waiting delay used by the bus controller.  Handshake timing is too
/// tight to yield to the executor.
#[derive(Clone, Copy)]
pub struct BusDelay;

impl DelayNs for BusDelay {
    fn delay_ns(&mut self, ns: u32) {
        block_for(Duration::from_micros(u64::from(ns).div_ceil(1000)));
    }

    fn delay_us(&mut self, us: u32) {
        block_for(Duration::from_micros(u64::from(us)));
    }

    fn delay_ms(&mut self, ms: u32) {
        block_for(Duration::from_millis(u64::from(ms)));
    }
}

type Controller = BusController<RpBusLines, BusDelay>;

// The bus controller, shared between the monitor and controller tasks.
static CONTROLLER: Mutex<ThreadModeRawMutex, RefCell<Option<Controller>>> =
    Mutex::new(RefCell::new(None));

/// Firmware main, called by the binary's embassy main.
pub async fn common_main(spawner: Spawner, bin_name: &'static str) -> ! {
    let p = embassy_rp::init(Default::default());

    log_fw_info(bin_name);

    // Start the watchdog first, so we reset if anything below hangs.
    let watchdog = create_watchdog(p.WATCHDOG);
    spawn_or_reboot(spawner.spawn(watchdog_task(watchdog)), "Watchdog");

    let mut gpio = Gpio::new(
        [
            AnyPin::from(p.PIN_0),
            AnyPin::from(p.PIN_1),
            AnyPin::from(p.PIN_2),
            AnyPin::from(p.PIN_3),
            AnyPin::from(p.PIN_4),
            AnyPin::from(p.PIN_5),
            AnyPin::from(p.PIN_6),
            AnyPin::from(p.PIN_7),
            AnyPin::from(p.PIN_8),
            AnyPin::from(p.PIN_9),
            AnyPin::from(p.PIN_10),
            AnyPin::from(p.PIN_11),
            AnyPin::from(p.PIN_12),
            AnyPin::from(p.PIN_13),
            AnyPin::from(p.PIN_14),
            AnyPin::from(p.PIN_15),
            AnyPin::from(p.PIN_16),
            AnyPin::from(p.PIN_17),
            AnyPin::from(p.PIN_18),
            AnyPin::from(p.PIN_19),
            AnyPin::from(p.PIN_20),
            AnyPin::from(p.PIN_21),
            AnyPin::from(p.PIN_22),
            AnyPin::from(p.PIN_23),
            AnyPin::from(p.PIN_24),
            AnyPin::from(p.PIN_25),
            AnyPin::from(p.PIN_26),
            AnyPin::from(p.PIN_27),
            AnyPin::from(p.PIN_28),
            AnyPin::from(p.PIN_29),
        ],
        None,
    );

    // Status display
    match gpio.take_status_display() {
        Ok(led) => {
            StatusDisplay::create_static(led);
            spawn_or_reboot(spawner.spawn(status_task(watchdog)), "Status Display");
        }
        Err(e) => error!("No status display: {}", e),
    }

    // Bus controller.  Without the bus there is nothing for us to do.
    let lines = match gpio.take_bus_lines() {
        Ok(lines) => lines,
        Err(e) => {
            error!("Failed to allocate GPIB pins: {}", e);
            reboot();
        }
    };
    let mut controller = BusController::new(lines, BusDelay);
    controller.init();
    CONTROLLER.lock(|c| *c.borrow_mut() = Some(controller));

    spawn_or_reboot(spawner.spawn(monitor_task(watchdog)), "Monitor");
    spawn_or_reboot(spawner.spawn(controller_task(watchdog)), "Controller");

    info!("Initialization complete");

    loop {
        Timer::after(LOOP_LOG_INTERVAL).await;
        trace!("Main loop");
    }
}

// Runs a closure against the bus controller.  Returns None if the controller
// hasn't been created.
fn with_controller<T>(f: impl FnOnce(&mut Controller) -> T) -> Option<T> {
    CONTROLLER.lock(|c| c.borrow_mut().as_mut().map(f))
}

/// Ticks the connection monitor, and reflects connection changes on the
/// status display.
#[embassy_executor::task]
async fn monitor_task(watchdog: &'static WatchdogType) -> ! {
    info!("Monitor task started");

    let id = TaskId::Monitor;
    watchdog.register_task(&id, MONITOR_WATCHDOG_TIMER).await;

    let mut ticker = Ticker::every(MONITOR_TICK);
    let mut last_state = ConnectionState::Unknown;
    loop {
        watchdog.feed(&id).await;

        let state = CONTROLLER.lock(|c| {
            c.borrow().as_ref().map(|controller| {
                controller.tick();
                controller.connection_state()
            })
        });

        if let Some(state) = state {
            if state != last_state {
                match state {
                    ConnectionState::Connected => update_status(DisplayType::Connected),
                    ConnectionState::Disconnected => update_status(DisplayType::Disconnected),
                    ConnectionState::Unknown => (),
                }
                last_state = state;
            }
        }

        ticker.next().await;
    }
}

// What the controller task knows about the attached instrument.
enum Target {
    None,
    Discovering(DiscoveryScan),
    Found(Instrument),
}

struct Instrument {
    address: u8,
    locked_out: bool,
    next_poll: Instant,
}

/// Finds the instrument when one is attached, then serial polls it.
///
/// Each pass makes at most one bus operation, or one discovery step, so the
/// executor is never blocked for longer than `BUS_BLOCK_WORST_CASE_MS`.
#[embassy_executor::task]
async fn controller_task(watchdog: &'static WatchdogType) -> ! {
    info!("Controller task started");

    let id = TaskId::Controller;
    watchdog.register_task(&id, CONTROLLER_WATCHDOG_TIMER).await;

    let mut target = Target::None;
    let mut next_log_instant = Instant::now();
    loop {
        let now = Instant::now();
        if now >= next_log_instant {
            trace!("Controller loop");
            next_log_instant += LOOP_LOG_INTERVAL;
        }

        watchdog.feed(&id).await;

        let current = core::mem::replace(&mut target, Target::None);
        target = with_controller(move |controller| controller_pass(controller, current, now))
            .unwrap_or(Target::None);

        let pause = match target {
            Target::Discovering(_) => DISCOVERY_STEP_TIMER,
            _ => CONTROLLER_LOOP_TIMER,
        };
        Timer::after(pause).await;
    }
}

// One pass of the controller task.
fn controller_pass(controller: &mut Controller, target: Target, now: Instant) -> Target {
    match target {
        // A scan in progress is always run to completion, so the transaction
        // it holds is ended.
        Target::Discovering(scan) => discovery_pass(controller, scan, now),
        _ if !controller.is_connected() => {
            if let Target::Found(instrument) = target {
                info!("Instrument 0x{:02x} disconnected", instrument.address);
            }
            Target::None
        }
        Target::None => {
            update_status(DisplayType::Busy);
            discovery_pass(controller, DiscoveryScan::new(), now)
        }
        Target::Found(instrument) if !instrument.locked_out => lockout_pass(controller, instrument),
        Target::Found(instrument) if now < instrument.next_poll => Target::Found(instrument),
        Target::Found(instrument) => poll_pass(controller, instrument, now),
    }
}

fn discovery_pass(controller: &mut Controller, mut scan: DiscoveryScan, now: Instant) -> Target {
    let Some(found) = controller.discovery_step(&mut scan) else {
        return Target::Discovering(scan);
    };
    restore_status(controller);

    match found {
        Some(address) => Target::Found(Instrument {
            address,
            locked_out: false,
            next_poll: now,
        }),
        None => Target::None,
    }
}

fn lockout_pass(controller: &mut Controller, mut instrument: Instrument) -> Target {
    if let Err(e) = controller.local_lockout(&mut Deadline::after(TRANSFER_TIMEOUT)) {
        warn!("Local lockout failed: {}", e);
    }
    instrument.locked_out = true;
    Target::Found(instrument)
}

fn poll_pass(controller: &mut Controller, mut instrument: Instrument, now: Instant) -> Target {
    instrument.next_poll = now + STATUS_POLL_INTERVAL;

    update_status(DisplayType::Busy);
    let result = controller.read_status_byte(
        instrument.address,
        &mut Deadline::after(TRANSFER_TIMEOUT),
    );
    restore_status(controller);

    match result {
        Ok(status) => {
            debug!("Instrument 0x{:02x} status 0x{:02x}", instrument.address, status);
            Target::Found(instrument)
        }
        Err(e) => {
            // It may have been readdressed, or swapped for another.
            warn!("Serial poll of 0x{:02x} failed: {}", instrument.address, e);
            Target::None
        }
    }
}

// Put the display back after a bus operation, which may have seen the
// instrument go away.
fn restore_status(controller: &Controller) {
    match controller.connection_state() {
        ConnectionState::Disconnected => update_status(DisplayType::Disconnected),
        _ => update_status(DisplayType::Connected),
    }
}

// Spawning can fail, because too many instances of that task are already
// running.  This shouldn't happen as tasks are only spawned at start of day,
// so we handle it by rebooting.
fn spawn_or_reboot(spawn_result: Result<(), SpawnError>, task_name: &str) {
    match spawn_result {
        Ok(()) => debug!("Spawned task {}", task_name),
        Err(e) => {
            error!("Failed to spawn task: {}, error: {}", task_name, e);
            reboot();
        }
    }
}

fn reboot() -> ! {
    cortex_m::peripheral::SCB::sys_reset()
}

/// Called by the binary's defmt panic handler.
pub fn defmt_panic_handler() -> ! {
    error!("defmt panic");
    reboot()
}

/// Called by the binary's core panic handler.
pub fn panic_handler(info: &core::panic::PanicInfo) -> ! {
    error!("Panic: {}", defmt::Display2Format(info));
    reboot()
}
