//! The IEEE-488 bus lines, and the trait the protocol core uses to drive
//! them.
//!
//! All of the control lines, and the data lines, are open-collector and
//! active low.  A line is either asserted (driven low by at least one party
//! on the bus) or released (floated, and pulled high by the bus
//! terminations).  The controller can only assert and release its own drive
//! of a line - when reading, it sees the wired-OR of every party.

// Copyright (c) 2025 Piers Finlayson <piers@piers.rocks>
//
// GPLv3 licensed - see https://www.gnu.org/licenses/gpl-3.0.html

use bitflags::bitflags;

/// A single IEEE-488 control line.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum Line {
    /// Data Valid - asserted by the source when the data lines are valid.
    Dav,
    /// Not Ready For Data - held by any acceptor not ready for a byte.
    Nrfd,
    /// Not Data Accepted - held by any acceptor that has not latched the
    /// current byte.
    Ndac,
    /// Attention - asserted by the controller while sending commands.
    Atn,
    /// End Or Identify - marks the last byte of a message.
    Eoi,
    /// Remote Enable - allows devices to be placed into remote mode.
    Ren,
    /// Interface Clear - resets every device's bus interface.
    Ifc,
}

impl Line {
    /// Every control line, in the order they appear on the connector.
    pub const ALL: [Line; 7] = [
        Line::Dav,
        Line::Nrfd,
        Line::Ndac,
        Line::Atn,
        Line::Eoi,
        Line::Ren,
        Line::Ifc,
    ];

    /// The mask bit for this line.
    pub const fn mask(self) -> LineMask {
        match self {
            Line::Dav => LineMask::DAV,
            Line::Nrfd => LineMask::NRFD,
            Line::Ndac => LineMask::NDAC,
            Line::Atn => LineMask::ATN,
            Line::Eoi => LineMask::EOI,
            Line::Ren => LineMask::REN,
            Line::Ifc => LineMask::IFC,
        }
    }
}

bitflags! {
    /// A set of control lines.
    #[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
    pub struct LineMask: u8 {
        const DAV = 0x01;
        const NRFD = 0x02;
        const NDAC = 0x04;
        const ATN = 0x08;
        const EOI = 0x10;
        const REN = 0x20;
        const IFC = 0x40;

        /// The three handshake lines.
        const HANDSHAKE = Self::DAV.bits() | Self::NRFD.bits() | Self::NDAC.bits();
    }
}

#[cfg(feature = "defmt")]
impl defmt::Format for LineMask {
    fn format(&self, f: defmt::Formatter) {
        defmt::write!(f, "LineMask(0x{:02x})", self.bits());
    }
}

impl LineMask {
    /// Iterate over the individual lines in this mask.
    pub fn lines(self) -> impl Iterator<Item = Line> {
        Line::ALL
            .into_iter()
            .filter(move |line| self.contains(line.mask()))
    }
}

/// The Line Interface - the hardware primitives the protocol core is built
/// on.
///
/// Implementations must be synchronous and infallible.  Reads take `&self`
/// so the connection monitor can sample the bus without exclusive access.
pub trait BusLines {
    /// Drive a control line low.
    fn assert(&mut self, line: Line);

    /// Stop driving a control line, letting it float high unless another
    /// party holds it.
    fn release(&mut self, line: Line);

    /// Returns true if the line is low, i.e. asserted by any party.
    fn is_asserted(&self, line: Line) -> bool;

    /// Drive a byte onto the data lines.  `byte` is the logical value - a 1
    /// bit is driven low.
    fn drive_data(&mut self, byte: u8);

    /// Float all of the data lines.
    fn release_data(&mut self);

    /// Read the data lines, returning the logical value (the inverse of the
    /// electrical levels).
    fn read_data(&self) -> u8;

    /// Assert every line in `mask`.
    fn assert_lines(&mut self, mask: LineMask) {
        for line in mask.lines() {
            self.assert(line);
        }
    }

    /// Release every line in `mask`.
    fn release_lines(&mut self, mask: LineMask) {
        for line in mask.lines() {
            self.release(line);
        }
    }
}
