//! The GPIB command set, and the composite operations built from it.
//!
//! Every command is a single byte sent with ATN asserted.  Addressing
//! commands carry a 5 bit primary address, optionally followed by a
//! secondary address byte.
//!
//! Throughout this crate an instrument address is a `u8` whose low 5 bits
//! are the primary address.  If any of the top 3 bits are set the instrument
//! also needs a secondary address: `(addr >> 5) - 1`.  So 0x0c is primary
//! address 12, and 0x2c is primary address 12, secondary address 0.

// Copyright (c) 2025 Piers Finlayson <piers@piers.rocks>
//
// GPLv3 licensed - see https://www.gnu.org/licenses/gpl-3.0.html

use embedded_hal::delay::DelayNs;

use super::lines::{BusLines, Line};
use super::timeout::Timeout;
use super::{BusController, BusError};

/// Mask for the primary address bits of an address.
pub const PRIMARY_MASK: u8 = 0x1f;

/// The primary address pattern reserved for the Unlisten/Untalk commands.
pub const RESERVED_PRIMARY: u8 = 0x1f;

/// A GPIB interface command.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum Command {
    /// UNL - all listeners stop listening.
    Unlisten,
    /// UNT - the talker stops talking.
    Untalk,
    /// LAG - address a device as listener.  Only the primary address bits
    /// are used.
    Listen(u8),
    /// TAG - address a device as talker.  Only the primary address bits are
    /// used.
    Talk(u8),
    /// SCG - secondary address, following a LAG or TAG.
    Secondary(u8),
    /// LLO - disable front panel local controls on all devices.
    LocalLockout,
    /// GTL - return addressed listeners to local control.
    GotoLocal,
    /// SPE - serial poll enable.
    SerialPollEnable,
    /// SPD - serial poll disable.
    SerialPollDisable,
    /// GET - trigger addressed listeners.
    GroupExecuteTrigger,
    /// DCL - reset all devices.
    DeviceClear,
    /// SDC - reset addressed listeners.
    SelectedDeviceClear,
}

impl Command {
    /// The byte this command is sent as.
    pub const fn byte(self) -> u8 {
        match self {
            Command::Unlisten => 0x3f,
            Command::Untalk => 0x5f,
            Command::Listen(addr) => 0x20 | (addr & PRIMARY_MASK),
            Command::Talk(addr) => 0x40 | (addr & PRIMARY_MASK),
            Command::Secondary(secondary) => 0x60 | (secondary & PRIMARY_MASK),
            Command::LocalLockout => 0x11,
            Command::GotoLocal => 0x01,
            Command::SerialPollEnable => 0x18,
            Command::SerialPollDisable => 0x19,
            Command::GroupExecuteTrigger => 0x08,
            Command::DeviceClear => 0x14,
            Command::SelectedDeviceClear => 0x04,
        }
    }
}

/// The primary address part of an address.
pub const fn primary(addr: u8) -> u8 {
    addr & PRIMARY_MASK
}

/// The secondary address of an address, if it has one.
pub const fn secondary(addr: u8) -> Option<u8> {
    match addr >> 5 {
        0 => None,
        n => Some(n - 1),
    }
}

/// Whether this address needs a secondary address byte.
pub const fn has_secondary(addr: u8) -> bool {
    secondary(addr).is_some()
}

// Command sending, used by the composite operations below and discovery.
impl<L: BusLines, D: DelayNs> BusController<L, D> {
    /// Send a single command byte.
    pub(crate) fn command(
        &mut self,
        command: Command,
        timeout: &mut impl Timeout,
    ) -> Result<(), BusError> {
        debug!("Command {} (0x{:02x})", command, command.byte());
        self.transmit(command.byte(), true, timeout)
    }

    /// Send a listen address, followed by its secondary address if it has
    /// one.
    pub(crate) fn listen_address(
        &mut self,
        addr: u8,
        timeout: &mut impl Timeout,
    ) -> Result<(), BusError> {
        self.command(Command::Listen(addr), timeout)?;
        self.secondary_address(addr, timeout)
    }

    /// Send a talk address, followed by its secondary address if it has one.
    pub(crate) fn talk_address(
        &mut self,
        addr: u8,
        timeout: &mut impl Timeout,
    ) -> Result<(), BusError> {
        self.command(Command::Talk(addr), timeout)?;
        self.secondary_address(addr, timeout)
    }

    fn secondary_address(&mut self, addr: u8, timeout: &mut impl Timeout) -> Result<(), BusError> {
        match secondary(addr) {
            Some(secondary) => self.command(Command::Secondary(secondary), timeout),
            None => Ok(()),
        }
    }

    // Runs a controller-only command sequence.  A transaction is marked
    // active for the duration, so the connection monitor does not mistake
    // our ATN for a dead bus.  If a device was already addressed by
    // `make_talker()` or `make_listener()`, that transaction is left open
    // for `untalk_unlisten()` to end.
    fn sequence<T>(
        &mut self,
        f: impl FnOnce(&mut Self) -> Result<T, BusError>,
    ) -> Result<T, BusError> {
        let already_active = self.monitor.transaction_active();
        self.monitor.begin_transaction();
        let result = f(self);
        if !already_active {
            self.monitor.end_transaction();
        }
        result
    }
}

// The public command operations.
//
// Every bus timeout is raised inside the handshake engine, which resets the
// bus before returning the error.  These sequences therefore just stop at
// the first error, and the bus is idle whichever step failed.
impl<L: BusLines, D: DelayNs> BusController<L, D> {
    /// Address a device as talker, ready for `read_byte()`.
    ///
    /// The transaction stays active until `untalk_unlisten()`.
    pub fn make_talker(&mut self, addr: u8, timeout: &mut impl Timeout) -> Result<(), BusError> {
        debug!("Make talker 0x{:02x}", addr);
        self.monitor.begin_transaction();
        self.command(Command::Unlisten, timeout)?;
        self.talk_address(addr, timeout)?;
        self.lines.release(Line::Atn);
        self.lines.assert(Line::Ndac);
        Ok(())
    }

    /// Address a device as listener, ready for `write_byte()`.
    ///
    /// The transaction stays active until `untalk_unlisten()`.
    pub fn make_listener(&mut self, addr: u8, timeout: &mut impl Timeout) -> Result<(), BusError> {
        debug!("Make listener 0x{:02x}", addr);
        self.monitor.begin_transaction();
        self.command(Command::Untalk, timeout)?;
        self.command(Command::Unlisten, timeout)?;
        self.listen_address(addr, timeout)?;
        self.lines.release(Line::Atn);
        Ok(())
    }

    /// Unaddress all talkers and listeners, ending the transaction.
    pub fn untalk_unlisten(&mut self, timeout: &mut impl Timeout) -> Result<(), BusError> {
        debug!("Untalk/unlisten");
        let result = self
            .command(Command::Unlisten, timeout)
            .and_then(|()| self.command(Command::Untalk, timeout));
        self.monitor.end_transaction();
        result
    }

    /// Serial poll a device, returning its status byte.
    pub fn read_status_byte(&mut self, addr: u8, timeout: &mut impl Timeout) -> Result<u8, BusError> {
        let status = self.sequence(|bus| {
            bus.command(Command::SerialPollEnable, timeout)?;
            bus.talk_address(addr, timeout)?;
            bus.lines.release(Line::Atn);
            bus.lines.assert(Line::Ndac);
            let received = bus.receive(timeout)?;
            bus.command(Command::Untalk, timeout)?;
            bus.command(Command::SerialPollDisable, timeout)?;
            Ok(received.byte)
        })?;
        debug!("Status byte from 0x{:02x}: 0x{:02x}", addr, status);
        Ok(status)
    }

    /// Disable the front panel controls of every device.
    pub fn local_lockout(&mut self, timeout: &mut impl Timeout) -> Result<(), BusError> {
        self.sequence(|bus| bus.command(Command::LocalLockout, timeout))
    }

    /// Return a device to front panel control.
    pub fn goto_local(&mut self, addr: u8, timeout: &mut impl Timeout) -> Result<(), BusError> {
        self.sequence(|bus| {
            bus.listen_address(addr, timeout)?;
            bus.command(Command::GotoLocal, timeout)?;
            bus.command(Command::Unlisten, timeout)
        })
    }

    /// Trigger a device.
    pub fn trigger(&mut self, addr: u8, timeout: &mut impl Timeout) -> Result<(), BusError> {
        self.sequence(|bus| {
            bus.listen_address(addr, timeout)?;
            bus.command(Command::GroupExecuteTrigger, timeout)?;
            bus.command(Command::Unlisten, timeout)
        })
    }
}
