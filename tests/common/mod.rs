//! A simulated IEEE-488 bus for driving the controller on the host.
//!
//! `SimBus` implements `BusLines`.  Each line reads asserted if either the
//! controller or the simulated instrument drives it.  The instrument is a
//! small behavioural model: it accepts command bytes under ATN, listens and
//! talks when addressed, answers serial polls, and takes part in the three
//! wire handshake.  It reacts every time the controller touches the bus.
//!
//! With no powered instrument attached, every line reads asserted, as the
//! controller's receivers do on an unterminated bus.

// Copyright (c) 2025 Piers Finlayson <piers@piers.rocks>
//
// GPLv3 licensed - see https://www.gnu.org/licenses/gpl-3.0.html

#![allow(dead_code)]

use std::cell::{Cell, RefCell};
use std::collections::VecDeque;
use std::rc::Rc;

use embedded_hal::delay::DelayNs;
use gpib488_rs::gpib::{BusController, BusLines, Line, LineMask};

/// A delay which just records how long it has been asked to wait.
#[derive(Clone, Default)]
pub struct SimDelay {
    ns: Rc<Cell<u64>>,
}

impl SimDelay {
    pub fn elapsed_us(&self) -> u64 {
        self.ns.get() / 1000
    }

    pub fn reset(&self) {
        self.ns.set(0);
    }
}

impl DelayNs for SimDelay {
    fn delay_ns(&mut self, ns: u32) {
        self.ns.set(self.ns.get() + u64::from(ns));
    }
}

/// Everything the instrument saw.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Event {
    /// A byte received with ATN asserted.
    Command(u8),
    /// A data byte received as listener, with its EOI state.
    Data(u8, bool),
    /// A data byte sent as talker.
    Sent(u8),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Role {
    Listen,
    Talk,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Acceptor {
    Ready,
    Latched,
}

/// The simulated instrument.
pub struct Instrument {
    primary: u8,

    // Secondary address the instrument requires, if it uses extended
    // addressing.
    secondary: Option<u8>,

    pub powered: bool,
    pub status: u8,

    // Never becomes ready for data.
    pub stuck_nrfd: bool,

    listening: bool,
    talking: bool,
    serial_poll: bool,
    pending: Option<Role>,
    pub local_lockout: bool,
    pub triggers: u32,
    pub gone_local: u32,

    acceptor: Acceptor,
    sourcing: Option<(u8, bool)>,
    talk_queue: VecDeque<(u8, bool)>,

    // What the instrument is driving.
    drives: LineMask,
    data: u8,

    pub events: Vec<Event>,
}

impl Instrument {
    pub fn new(primary: u8) -> Self {
        Self {
            primary,
            secondary: None,
            powered: true,
            status: 0,
            stuck_nrfd: false,
            listening: false,
            talking: false,
            serial_poll: false,
            pending: None,
            local_lockout: false,
            triggers: 0,
            gone_local: 0,
            acceptor: Acceptor::Ready,
            sourcing: None,
            talk_queue: VecDeque::new(),
            drives: LineMask::empty(),
            data: 0,
            events: Vec::new(),
        }
    }

    /// An instrument which only answers to `primary` followed by the given
    /// secondary address.
    pub fn with_secondary(primary: u8, secondary: u8) -> Self {
        Self {
            secondary: Some(secondary),
            ..Self::new(primary)
        }
    }

    pub fn is_listening(&self) -> bool {
        self.listening
    }

    pub fn is_talking(&self) -> bool {
        self.talking
    }

    /// Queue a message for the instrument to send when addressed to talk.
    /// The final byte is sent with EOI.
    pub fn queue_message(&mut self, message: &[u8]) {
        let last = message.len().saturating_sub(1);
        for (ii, byte) in message.iter().enumerate() {
            self.talk_queue.push_back((*byte, ii == last));
        }
    }

    /// Command bytes seen, in order.
    pub fn commands(&self) -> Vec<u8> {
        self.events
            .iter()
            .filter_map(|event| match event {
                Event::Command(byte) => Some(*byte),
                _ => None,
            })
            .collect()
    }

    /// Data bytes received as a listener, in order.
    pub fn received(&self) -> Vec<(u8, bool)> {
        self.events
            .iter()
            .filter_map(|event| match event {
                Event::Data(byte, eoi) => Some((*byte, *eoi)),
                _ => None,
            })
            .collect()
    }

    fn command(&mut self, byte: u8) {
        let byte = byte & 0x7f;
        self.events.push(Event::Command(byte));

        let pending = self.pending.take();
        let addr = byte & 0x1f;
        match byte {
            0x3f => self.listening = false,
            0x5f => self.talking = false,
            0x20..=0x3e if addr == self.primary => match self.secondary {
                None => self.listening = true,
                Some(_) => self.pending = Some(Role::Listen),
            },
            0x40..=0x5e if addr == self.primary => match self.secondary {
                None => self.talking = true,
                Some(_) => self.pending = Some(Role::Talk),
            },
            // Addressing another talker unaddresses us.
            0x40..=0x5e => self.talking = false,
            0x60..=0x7f => {
                if self.secondary == Some(addr) {
                    match pending {
                        Some(Role::Listen) => self.listening = true,
                        Some(Role::Talk) => self.talking = true,
                        None => (),
                    }
                }
            }
            0x11 => self.local_lockout = true,
            0x01 if self.listening => self.gone_local += 1,
            0x08 if self.listening => self.triggers += 1,
            0x18 => self.serial_poll = true,
            0x19 => self.serial_poll = false,
            _ => (),
        }
    }

    // React to the controller's side of the bus.
    fn step(&mut self, controller: LineMask, controller_data: u8) {
        if !self.powered {
            self.drives = LineMask::empty();
            self.data = 0;
            return;
        }

        let atn = controller.contains(LineMask::ATN);
        let mut drives = LineMask::empty();

        // Acceptor - every device accepts commands, and listeners accept
        // data.
        if atn || self.listening {
            match self.acceptor {
                Acceptor::Ready => {
                    if controller.contains(LineMask::DAV) {
                        if atn {
                            self.command(controller_data);
                        } else {
                            let eoi = controller.contains(LineMask::EOI);
                            self.events.push(Event::Data(controller_data, eoi));
                        }
                        self.acceptor = Acceptor::Latched;
                    }
                }
                Acceptor::Latched => {
                    if !controller.contains(LineMask::DAV) {
                        self.acceptor = Acceptor::Ready;
                    }
                }
            }
            match self.acceptor {
                Acceptor::Ready => {
                    drives |= LineMask::NDAC;
                    if self.stuck_nrfd {
                        drives |= LineMask::NRFD;
                    }
                }
                Acceptor::Latched => drives |= LineMask::NRFD,
            }
        } else {
            self.acceptor = Acceptor::Ready;
        }

        // Source - only while addressed to talk with ATN released.
        let mut data = 0;
        if atn || !self.talking {
            self.sourcing = None;
        } else {
            match self.sourcing {
                None => {
                    // Acceptors must be present (NDAC held) and ready.
                    if controller.contains(LineMask::NDAC) && !controller.contains(LineMask::NRFD)
                    {
                        let next = if self.serial_poll {
                            Some((self.status, true))
                        } else {
                            self.talk_queue.front().copied()
                        };
                        self.sourcing = next;
                    }
                }
                Some((byte, _)) => {
                    if !controller.contains(LineMask::NDAC) {
                        self.events.push(Event::Sent(byte));
                        if !self.serial_poll {
                            self.talk_queue.pop_front();
                        }
                        self.sourcing = None;
                    }
                }
            }
            if let Some((byte, eoi)) = self.sourcing {
                data = byte;
                drives |= LineMask::DAV;
                if eoi {
                    drives |= LineMask::EOI;
                }
            }
        }

        self.drives = drives;
        self.data = data;
    }
}

#[derive(Default)]
struct SimState {
    controller: LineMask,
    controller_data: u8,
    instrument: Option<Instrument>,
}

impl SimState {
    fn step(&mut self) {
        let (controller, data) = (self.controller, self.controller_data);
        if let Some(instrument) = self.instrument.as_mut() {
            instrument.step(controller, data);
        }
    }

    fn terminated(&self) -> bool {
        self.instrument.as_ref().is_some_and(|i| i.powered)
    }
}

/// The simulated bus.  Clones share the same bus, so a test can keep one to
/// inspect while the controller owns another.
#[derive(Clone, Default)]
pub struct SimBus {
    state: Rc<RefCell<SimState>>,
}

impl SimBus {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_instrument(instrument: Instrument) -> Self {
        let bus = Self::new();
        bus.state.borrow_mut().instrument = Some(instrument);
        bus
    }

    /// Run `f` against the attached instrument.
    pub fn instrument<T>(&self, f: impl FnOnce(&mut Instrument) -> T) -> T {
        let mut state = self.state.borrow_mut();
        let instrument = state.instrument.as_mut().expect("no instrument attached");
        f(instrument)
    }

    /// The lines the controller is driving.
    pub fn controller_lines(&self) -> LineMask {
        self.state.borrow().controller
    }

    /// The data the controller is driving.
    pub fn controller_data(&self) -> u8 {
        self.state.borrow().controller_data
    }
}

impl BusLines for SimBus {
    fn assert(&mut self, line: Line) {
        let mut state = self.state.borrow_mut();
        state.controller |= line.mask();
        state.step();
    }

    fn release(&mut self, line: Line) {
        let mut state = self.state.borrow_mut();
        state.controller -= line.mask();
        state.step();
    }

    fn is_asserted(&self, line: Line) -> bool {
        let mut state = self.state.borrow_mut();
        state.step();
        if !state.terminated() {
            return true;
        }
        let instrument = state.instrument.as_ref().map_or(LineMask::empty(), |i| i.drives);
        (state.controller | instrument).contains(line.mask())
    }

    fn drive_data(&mut self, byte: u8) {
        let mut state = self.state.borrow_mut();
        state.controller_data = byte;
        state.step();
    }

    fn release_data(&mut self) {
        let mut state = self.state.borrow_mut();
        state.controller_data = 0;
        state.step();
    }

    fn read_data(&self) -> u8 {
        let mut state = self.state.borrow_mut();
        state.step();
        if !state.terminated() {
            return 0xff;
        }
        let instrument = state.instrument.as_ref().map_or(0, |i| i.data);
        state.controller_data | instrument
    }
}

pub type SimController = BusController<SimBus, SimDelay>;

/// A controller on a bus with the given instrument, initialized.
pub fn controller_with(instrument: Instrument) -> (SimController, SimBus, SimDelay) {
    let bus = SimBus::with_instrument(instrument);
    let delay = SimDelay::default();
    let mut controller = BusController::new(bus.clone(), delay.clone());
    controller.init();
    (controller, bus, delay)
}

/// A controller on a bus with nothing attached, initialized.
pub fn controller_without_instrument() -> (SimController, SimBus, SimDelay) {
    let bus = SimBus::new();
    let delay = SimDelay::default();
    let mut controller = BusController::new(bus.clone(), delay.clone());
    controller.init();
    (controller, bus, delay)
}

/// A timeout policy generous enough for any operation against a responsive
/// instrument.
pub fn patient() -> impl FnMut() -> bool {
    let mut polls = 0u32;
    move || {
        polls += 1;
        polls > 10_000
    }
}
