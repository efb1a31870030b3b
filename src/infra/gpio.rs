//! This file handles GPIO pin allocation, and implements the bus lines on
//! top of the RP2040/RP235x GPIOs.
//!
//! The source code serves as the master list of pin assignments for the
//! hardware.
//!
//! The control lines are connected through inverting transceivers, each
//! line using one pin to drive the bus and another to read it.  Driving the
//! output pin high pulls the bus line low (asserted), and the input pin reads
//! low while the bus line is asserted.  The data lines are driven
//! open drain style directly: a pin asserts its line by outputting low, and
//! releases it by becoming a floating input.

// Copyright (c) 2025 Piers Finlayson <piers@piers.rocks>
//
// GPLv3 licensed - see https://www.gnu.org/licenses/gpl-3.0.html

use embassy_rp::gpio::{AnyPin, Flex, Level, Output, Pull};

use crate::gpib::{BusLines, Line};

/// The number of GPIOs we manage.
const NUM_PINS: usize = 30;

/// GPIO configurations for different boards.
pub mod config {
    use super::{GpibPinConfig, LinePins, PinConfig};

    /// Configuration for the v0.1 board.
    pub fn standard_v0_1() -> PinConfig {
        PinConfig {
            status_display_pin: 25,
            gpib_pins: gpib_v0_1(),
        }
    }

    fn gpib_v0_1() -> GpibPinConfig {
        GpibPinConfig {
            dav: LinePins { input: 8, output: 9 },
            nrfd: LinePins { input: 10, output: 11 },
            ndac: LinePins { input: 12, output: 13 },
            atn: LinePins { input: 14, output: 15 },
            eoi: LinePins { input: 16, output: 17 },
            ren: LinePins { input: 18, output: 19 },
            ifc: LinePins { input: 20, output: 21 },
            d_io: [0, 1, 2, 3, 4, 5, 6, 7],
        }
    }
}

/// Pin configuration for a board.
pub struct PinConfig {
    pub status_display_pin: u8,
    pub gpib_pins: GpibPinConfig,
}

impl Default for PinConfig {
    fn default() -> Self {
        config::standard_v0_1()
    }
}

/// The pair of pins used for one control line.
#[derive(Clone, Copy)]
pub struct LinePins {
    pub input: u8,
    pub output: u8,
}

/// GPIB bus pin configuration.  `d_io[0]` is DIO1.
#[derive(Clone)]
pub struct GpibPinConfig {
    pub dav: LinePins,
    pub nrfd: LinePins,
    pub ndac: LinePins,
    pub atn: LinePins,
    pub eoi: LinePins,
    pub ren: LinePins,
    pub ifc: LinePins,
    pub d_io: [u8; 8],
}

/// Errors allocating pins.
#[derive(Debug, Clone, Copy, PartialEq, Eq, defmt::Format)]
pub enum GpioError {
    /// The pin doesn't exist, or has already been taken.
    PinUnavailable(u8),
}

/// Object which provides methods to create objects that require GPIO pins.
/// Each pin can only be taken once.
pub struct Gpio {
    pins: [Option<AnyPin>; NUM_PINS],
    config: PinConfig,
}

impl Gpio {
    /// Create the pin registry from every GPIO pin, in pin number order.
    pub fn new(pins: [AnyPin; NUM_PINS], config: Option<PinConfig>) -> Self {
        Self {
            pins: pins.map(Some),
            config: config.unwrap_or_default(),
        }
    }

    /// Get the status display LED, initially lit.
    pub fn take_status_display(&mut self) -> Result<Output<'static>, GpioError> {
        self.take_output(self.config.status_display_pin, Level::High)
    }

    /// Get the GPIB bus lines.
    pub fn take_bus_lines(&mut self) -> Result<RpBusLines, GpioError> {
        let config = self.config.gpib_pins.clone();
        info!("Taking GPIB pins");

        let control = ControlLines {
            dav: self.take_line(config.dav)?,
            nrfd: self.take_line(config.nrfd)?,
            ndac: self.take_line(config.ndac)?,
            atn: self.take_line(config.atn)?,
            eoi: self.take_line(config.eoi)?,
            ren: self.take_line(config.ren)?,
            ifc: self.take_line(config.ifc)?,
        };

        let [d1, d2, d3, d4, d5, d6, d7, d8] = config.d_io;
        let data = DataBus::new([
            self.take_flex_pin(d1)?,
            self.take_flex_pin(d2)?,
            self.take_flex_pin(d3)?,
            self.take_flex_pin(d4)?,
            self.take_flex_pin(d5)?,
            self.take_flex_pin(d6)?,
            self.take_flex_pin(d7)?,
            self.take_flex_pin(d8)?,
        ]);

        Ok(RpBusLines { control, data })
    }

    fn take_line(&mut self, pins: LinePins) -> Result<LinePair, GpioError> {
        let input = self.take_flex_pin(pins.input)?;
        let output = self.take_flex_pin(pins.output)?;
        Ok(LinePair::new(input, output))
    }

    pub fn take_flex_pin(&mut self, index: u8) -> Result<Flex<'static>, GpioError> {
        self.take_pin_as_any(index).map(Flex::new)
    }

    pub fn take_output(&mut self, index: u8, level: Level) -> Result<Output<'static>, GpioError> {
        self.take_pin_as_any(index)
            .map(|pin| Output::new(pin, level))
    }

    // Helper to take a pin by index
    fn take_pin_as_any(&mut self, index: u8) -> Result<AnyPin, GpioError> {
        match self.pins.get_mut(index as usize).and_then(Option::take) {
            Some(pin) => Ok(pin),
            None => {
                warn!("Attempt to take unavailable pin {}", index);
                Err(GpioError::PinUnavailable(index))
            }
        }
    }
}

/// A single control line, using separate input and output pins through an
/// inverting transceiver.
pub struct LinePair {
    input: Flex<'static>,
    output: Flex<'static>,
}

impl LinePair {
    /// Create a new line, released.
    pub fn new(mut input: Flex<'static>, mut output: Flex<'static>) -> Self {
        input.set_as_input();
        input.set_pull(Pull::Up);

        // Low is released - the bus is physically high.
        output.set_low();
        output.set_as_output();

        Self { input, output }
    }

    /// Drive the bus line low (asserted) - the output is inverted, so high.
    pub fn set(&mut self) {
        self.output.set_high();
    }

    /// Release the bus line - the output is inverted, so low.
    pub fn release(&mut self) {
        self.output.set_low();
    }

    /// Whether the bus line is asserted, by us or any device.
    pub fn get(&self) -> bool {
        self.input.is_low()
    }
}

struct ControlLines {
    dav: LinePair,
    nrfd: LinePair,
    ndac: LinePair,
    atn: LinePair,
    eoi: LinePair,
    ren: LinePair,
    ifc: LinePair,
}

impl ControlLines {
    fn line(&self, line: Line) -> &LinePair {
        match line {
            Line::Dav => &self.dav,
            Line::Nrfd => &self.nrfd,
            Line::Ndac => &self.ndac,
            Line::Atn => &self.atn,
            Line::Eoi => &self.eoi,
            Line::Ren => &self.ren,
            Line::Ifc => &self.ifc,
        }
    }

    fn line_mut(&mut self, line: Line) -> &mut LinePair {
        match line {
            Line::Dav => &mut self.dav,
            Line::Nrfd => &mut self.nrfd,
            Line::Ndac => &mut self.ndac,
            Line::Atn => &mut self.atn,
            Line::Eoi => &mut self.eoi,
            Line::Ren => &mut self.ren,
            Line::Ifc => &mut self.ifc,
        }
    }
}

/// The eight data lines.
pub struct DataBus {
    pins: [Flex<'static>; 8],
}

impl DataBus {
    fn new(mut pins: [Flex<'static>; 8]) -> Self {
        for pin in pins.iter_mut() {
            // Output level is always low - a line is released by making it
            // an input.
            pin.set_low();
            pin.set_pull(Pull::None);
            pin.set_as_input();
        }
        Self { pins }
    }

    // A set bit asserts its line by driving it low.  A clear bit floats it,
    // so it is pulled high by the bus terminations.
    fn drive(&mut self, byte: u8) {
        for (bit, pin) in self.pins.iter_mut().enumerate() {
            if byte & (1 << bit) != 0 {
                pin.set_low();
                pin.set_as_output();
            } else {
                pin.set_as_input();
            }
        }
    }

    fn release(&mut self) {
        for pin in self.pins.iter_mut() {
            pin.set_as_input();
        }
    }

    // The bus is active low.
    fn read(&self) -> u8 {
        self.pins
            .iter()
            .enumerate()
            .fold(0, |byte, (bit, pin)| {
                if pin.is_low() { byte | (1 << bit) } else { byte }
            })
    }
}

/// The GPIB bus, implemented on the Pico's GPIOs.
pub struct RpBusLines {
    control: ControlLines,
    data: DataBus,
}

impl BusLines for RpBusLines {
    fn assert(&mut self, line: Line) {
        self.control.line_mut(line).set();
    }

    fn release(&mut self, line: Line) {
        self.control.line_mut(line).release();
    }

    fn is_asserted(&self, line: Line) -> bool {
        self.control.line(line).get()
    }

    fn drive_data(&mut self, byte: u8) {
        self.data.drive(byte);
    }

    fn release_data(&mut self) {
        self.data.release();
    }

    fn read_data(&self) -> u8 {
        self.data.read()
    }
}
