//! Handles displaying status of the device on the LED.

// Copyright (c) 2025 Piers Finlayson <piers@piers.rocks>
//
// GPLv3 licensed - see https://www.gnu.org/licenses/gpl-3.0.html

use core::cell::RefCell;
use embassy_rp::gpio::Output;
use embassy_sync::blocking_mutex::{Mutex, raw::CriticalSectionRawMutex};
use embassy_time::{Duration, Instant, Timer};

use crate::constants::{
    STATUS_DISPLAY_BLINK_TIMER, STATUS_DISPLAY_TIMER, STATUS_DISPLAY_WATCHDOG_TIMER,
};
use crate::infra::watchdog::{TaskId, WatchdogType};

// The STATUS_DISPLAY static is used to store the StatusDisplay object.  It is
// shared between tasks, so we need a Mutex and a RefCell (the latter for
// mutability).
static STATUS_DISPLAY: Mutex<CriticalSectionRawMutex, RefCell<Option<StatusDisplay>>> =
    Mutex::new(RefCell::new(None));

/// Status display types, corresponding to the operating states of the
/// device.
#[derive(Debug, Clone, Copy, PartialEq, Eq, defmt::Format)]
pub enum DisplayType {
    /// Starting up, LED is fully on
    Init,
    /// An instrument is attached and idle, LED is fully off
    Connected,
    /// No instrument attached, LED blinks slowly
    Disconnected,
    /// Talking to the instrument, LED blinks quickly
    Busy,
}

/// Handles the operation of the status LED based on the current device state
pub struct StatusDisplay {
    led: Output<'static>,
    current_status: DisplayType,

    // Last time the LED was toggled, used for blinking patterns
    last_toggle: Instant,

    led_state: bool,
}

impl StatusDisplay {
    /// Creates a new StatusDisplay from the LED output, which must be lit,
    /// and stores it in the STATUS_DISPLAY static.
    pub fn create_static(led: Output<'static>) {
        let status_display = Self {
            led,
            current_status: DisplayType::Init,
            last_toggle: Instant::now(),
            led_state: true,
        };

        STATUS_DISPLAY.lock(|d| {
            *d.borrow_mut() = Some(status_display);
        });
    }

    /// Update the current status.
    pub fn update(&mut self, status: DisplayType) {
        if self.current_status == status {
            return;
        }
        debug!("Status display {} -> {}", self.current_status, status);
        self.current_status = status;

        // The steady states are applied immediately, blinking is handled by
        // do_work()
        match status {
            DisplayType::Init => self.set_led(true),
            DisplayType::Connected => self.set_led(false),
            DisplayType::Disconnected | DisplayType::Busy => {}
        }
    }

    /// Perform an action on the status display if one is required.  Does not
    /// block.  Returns the maximum Duration until the next time this function
    /// should be called.
    pub fn do_work(&mut self) -> Duration {
        match self.current_status {
            DisplayType::Init => {
                self.set_led(true);
                STATUS_DISPLAY_BLINK_TIMER
            }
            DisplayType::Connected => {
                self.set_led(false);
                STATUS_DISPLAY_BLINK_TIMER
            }
            DisplayType::Disconnected => self.do_blink(STATUS_DISPLAY_BLINK_TIMER * 5),
            DisplayType::Busy => self.do_blink(STATUS_DISPLAY_BLINK_TIMER),
        }
    }

    // Toggles the LED every `period` regardless of how often we're called.
    // Returns the time until the next toggle.
    fn do_blink(&mut self, period: Duration) -> Duration {
        let elapsed = Instant::now().duration_since(self.last_toggle);

        if elapsed >= period {
            self.set_led(!self.led_state);
            self.last_toggle = Instant::now();
            period
        } else {
            period - elapsed
        }
    }

    fn set_led(&mut self, on: bool) {
        if on {
            self.led.set_high();
        } else {
            self.led.set_low();
        }
        self.led_state = on;
    }
}

/// Runs the status display.
#[embassy_executor::task]
pub async fn status_task(watchdog: &'static WatchdogType) -> ! {
    let id = TaskId::Display;
    watchdog
        .register_task(&id, STATUS_DISPLAY_WATCHDOG_TIMER)
        .await;

    loop {
        watchdog.feed(&id).await;

        // If the display hasn't been created yet, check again shortly.
        let next_update = STATUS_DISPLAY
            .lock(|d| d.borrow_mut().as_mut().map(StatusDisplay::do_work))
            .unwrap_or(STATUS_DISPLAY_TIMER);

        // Wake in time for the next LED update, and often enough to pick up
        // status changes.
        Timer::after(Duration::min(next_update, STATUS_DISPLAY_TIMER)).await;
    }
}

/// Helper function to update the status.
pub fn update_status(display: DisplayType) {
    STATUS_DISPLAY.lock(|d| {
        if let Some(d) = d.borrow_mut().as_mut() {
            d.update(display);
        }
    });
}
