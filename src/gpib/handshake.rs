//! The IEEE-488 three wire handshake.
//!
//! Source handshake (controller sends):
//!
//! ```text
//!   data   ---<  byte  >---------------
//!   NRFD   ___/                          (acceptors ready)
//!   DAV    ------\_______/--------------
//!   NDAC   __________/                   (acceptors latched)
//! ```
//!
//! Acceptor handshake (controller receives): hold NDAC, release NRFD, wait
//! for DAV, hold NRFD while reading, release NDAC, wait for DAV to go.
//!
//! Every wait polls the caller's timeout policy.  Any timeout resets the bus
//! before the error is returned, so the caller always gets the bus back idle.

// Copyright (c) 2025 Piers Finlayson <piers@piers.rocks>
//
// GPLv3 licensed - see https://www.gnu.org/licenses/gpl-3.0.html

use embedded_hal::delay::DelayNs;

use super::lines::{BusLines, Line, LineMask};
use super::timeout::Timeout;
use super::{BusController, BusError};
use crate::constants::DATA_SETTLE_US;

/// A byte received from the bus.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct Received {
    pub byte: u8,

    /// True if this is the last byte of the message - either EOI was
    /// asserted with it, or it matched the read terminator.
    pub end: bool,
}

impl<L: BusLines, D: DelayNs> BusController<L, D> {
    /// Source handshake - put one byte onto the bus, as a command if
    /// `command` is set, and wait for every acceptor to latch it.
    pub(crate) fn transmit(
        &mut self,
        byte: u8,
        command: bool,
        timeout: &mut impl Timeout,
    ) -> Result<(), BusError> {
        trace!("Transmit 0x{:02x} command {}", byte, command);

        // They should already be released, but make sure
        self.lines.release_lines(LineMask::HANDSHAKE);

        if command {
            self.lines.assert(Line::Atn);
        } else {
            self.lines.release(Line::Atn);
        }

        self.lines.drive_data(byte);
        self.delay.delay_us(DATA_SETTLE_US);

        let result = self.wait_for(Line::Nrfd, false, timeout).and_then(|()| {
            self.lines.assert(Line::Dav);
            let result = self.wait_for(Line::Ndac, false, timeout);
            self.lines.release(Line::Dav);
            result
        });

        self.lines.release_data();
        self.lines.release(Line::Atn);

        if result.is_err() {
            warn!("Timed out transmitting 0x{:02x}", byte);
            self.recover();
        }
        result
    }

    /// Acceptor handshake - take one byte from the current talker.
    pub(crate) fn receive(&mut self, timeout: &mut impl Timeout) -> Result<Received, BusError> {
        // Ready for data
        self.lines.assert(Line::Ndac);
        self.lines.release(Line::Nrfd);

        let result = self.wait_for(Line::Dav, true, timeout).and_then(|()| {
            // Not ready for another byte while we deal with this one
            self.lines.assert(Line::Nrfd);
            let byte = self.lines.read_data();
            let eoi = self.lines.is_asserted(Line::Eoi);
            self.lines.release(Line::Ndac);

            self.wait_for(Line::Dav, false, timeout)
                .map(|()| (byte, eoi))
        });

        match result {
            Ok((byte, eoi)) => {
                let end = eoi || self.terminator.matches(byte);
                trace!("Received 0x{:02x} eoi {} end {}", byte, eoi, end);
                Ok(Received { byte, end })
            }
            Err(e) => {
                warn!("Timed out receiving");
                self.recover();
                Err(e)
            }
        }
    }

    // Busy wait until `line` is (or isn't) asserted.  The policy is polled
    // before the line is checked, and if it has elapsed we time out even if
    // the line has just reached the state we want.
    fn wait_for(
        &mut self,
        line: Line,
        asserted: bool,
        timeout: &mut impl Timeout,
    ) -> Result<(), BusError> {
        loop {
            if timeout.elapsed() {
                return Err(BusError::Timeout);
            }
            if self.lines.is_asserted(line) == asserted {
                return Ok(());
            }
        }
    }

    /// Put the bus back into its idle state after a timeout.  This is a full
    /// re-initialization, and cannot itself fail.
    pub(crate) fn recover(&mut self) {
        debug!("Recovering bus");
        self.init();
    }
}
