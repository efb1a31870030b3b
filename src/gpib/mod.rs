//! The IEEE-488 (GPIB) bus controller.
//!
//! `BusController` owns the bus lines and all of the controller's state.  It
//! is hardware independent - the lines are driven through the `BusLines`
//! trait and delays come from an embedded-hal `DelayNs` - so the whole
//! protocol can be exercised on the host against a simulated bus.
//!
//! There is only ever one controller, and the application must serialize
//! calls into it.  The exception is `tick()`, which is called from a timer to
//! run the connection monitor, and only takes `&self`.

// Copyright (c) 2025 Piers Finlayson <piers@piers.rocks>
//
// GPLv3 licensed - see https://www.gnu.org/licenses/gpl-3.0.html

pub mod command;
mod discovery;
mod handshake;
pub mod lines;
pub mod monitor;
pub mod timeout;

use embedded_hal::delay::DelayNs;

use crate::constants::{IFC_PULSE_MS, IFC_RECOVERY_MS};
pub use command::Command;
pub use discovery::DiscoveryScan;
pub use handshake::Received;
pub use lines::{BusLines, Line, LineMask};
pub use monitor::{ConnectionMonitor, ConnectionState};
pub use timeout::{PollBudget, Timeout};

/// Errors returned by bus operations.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum BusError {
    /// The timeout policy elapsed while waiting on the bus.  The bus has
    /// been reset.
    Timeout,
}

/// An optional character which ends a received message, in addition to EOI.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum Terminator {
    /// Only EOI ends a message.
    #[default]
    None,
    LineFeed,
    CarriageReturn,
}

impl Terminator {
    /// Map a terminator character to a `Terminator`.  Only '\n' and '\r' are
    /// supported - anything else means no terminator.
    pub const fn from_char(c: u8) -> Self {
        match c {
            b'\n' => Terminator::LineFeed,
            b'\r' => Terminator::CarriageReturn,
            _ => Terminator::None,
        }
    }

    /// Whether a received byte ends the message.
    pub const fn matches(self, byte: u8) -> bool {
        match self {
            Terminator::None => false,
            Terminator::LineFeed => byte == b'\n',
            Terminator::CarriageReturn => byte == b'\r',
        }
    }
}

pub struct BusController<L, D> {
    lines: L,
    delay: D,
    monitor: ConnectionMonitor,
    terminator: Terminator,

    // Whether REN is asserted when the bus is (re)initialized.
    remote_enable: bool,
}

impl<L: BusLines, D: DelayNs> BusController<L, D> {
    /// Create the controller.  The bus is not touched until `init()`.
    pub fn new(lines: L, delay: D) -> Self {
        Self {
            lines,
            delay,
            monitor: ConnectionMonitor::new(),
            terminator: Terminator::None,
            remote_enable: true,
        }
    }

    /// Initialize the bus: everything released, REN as configured, then an
    /// interface clear.  The connection monitor is re-armed.
    ///
    /// This is also what the controller does to recover from a timeout.
    pub fn init(&mut self) {
        debug!("Initializing bus");
        self.lines.release_data();
        self.lines.release_lines(LineMask::all());
        if self.remote_enable {
            self.lines.assert(Line::Ren);
        }
        self.monitor.rearm();
        self.interface_clear();
    }

    /// Pulse IFC, returning every device's interface to its idle state.
    pub fn interface_clear(&mut self) {
        self.lines.assert(Line::Ifc);
        self.delay.delay_ms(IFC_PULSE_MS);
        self.lines.release(Line::Ifc);
        self.delay.delay_ms(IFC_RECOVERY_MS);
        self.monitor.end_transaction();
    }

    /// Assert or release REN.  The setting is kept, and reapplied whenever
    /// the bus is reset.
    pub fn set_remote_enable(&mut self, enable: bool) {
        debug!("Remote enable {}", enable);
        self.remote_enable = enable;
        if enable {
            self.lines.assert(Line::Ren);
        } else {
            self.lines.release(Line::Ren);
        }
    }

    /// Set the character, if any, that ends a received message.
    pub fn set_read_terminator(&mut self, terminator: Terminator) {
        self.terminator = terminator;
    }

    pub fn read_terminator(&self) -> Terminator {
        self.terminator
    }

    /// Whether an instrument is attached, as last decided by the connection
    /// monitor.
    pub fn connection_state(&self) -> ConnectionState {
        self.monitor.state()
    }

    pub fn is_connected(&self) -> bool {
        self.monitor.is_connected()
    }

    pub fn monitor(&self) -> &ConnectionMonitor {
        &self.monitor
    }

    /// Run the connection monitor.  Must be called every
    /// `MONITOR_SUBTICK_US`.
    pub fn tick(&self) {
        self.monitor.tick(|| self.lines.is_asserted(Line::Atn));
    }

    /// Send one data byte to the addressed listeners, with EOI if it is the
    /// last byte of a message.
    pub fn write_byte(
        &mut self,
        byte: u8,
        eoi: bool,
        timeout: &mut impl Timeout,
    ) -> Result<(), BusError> {
        if eoi {
            self.lines.assert(Line::Eoi);
        }
        let result = self.transmit(byte, false, timeout);
        self.lines.release(Line::Eoi);
        result
    }

    /// Receive one data byte from the addressed talker.
    pub fn read_byte(&mut self, timeout: &mut impl Timeout) -> Result<Received, BusError> {
        self.receive(timeout)
    }

    /// Send a message to the addressed listeners, with EOI on the final byte
    /// if `eoi` is set.
    pub fn write_message(
        &mut self,
        data: &[u8],
        eoi: bool,
        timeout: &mut impl Timeout,
    ) -> Result<(), BusError> {
        let last = data.len().saturating_sub(1);
        for (ii, byte) in data.iter().enumerate() {
            self.write_byte(*byte, eoi && ii == last, timeout)?;
        }
        Ok(())
    }

    /// Receive a message from the addressed talker into `buf`, stopping at
    /// the end of the message or when `buf` is full.  Returns the number of
    /// bytes received.
    pub fn read_message(
        &mut self,
        buf: &mut [u8],
        timeout: &mut impl Timeout,
    ) -> Result<usize, BusError> {
        for (ii, slot) in buf.iter_mut().enumerate() {
            let received = self.receive(timeout)?;
            *slot = received.byte;
            if received.end {
                return Ok(ii + 1);
            }
        }
        Ok(buf.len())
    }
}
