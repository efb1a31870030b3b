//! Instrument address discovery.
//!
//! GPIB has no "who is there" command, so we find an instrument by its
//! handshake side effects.  Once a device has been addressed as a listener
//! and ATN is released, it holds NDAC asserted waiting for data.  Devices
//! which were not addressed take no part in the handshake.  So after
//! addressing each candidate in turn, NDAC asserted with ATN released means
//! the candidate is the device's address.

// Copyright (c) 2025 Piers Finlayson <piers@piers.rocks>
//
// GPLv3 licensed - see https://www.gnu.org/licenses/gpl-3.0.html

use embedded_hal::delay::DelayNs;

use super::BusController;
use super::command::{Command, RESERVED_PRIMARY, has_secondary, primary};
use super::lines::{BusLines, Line};
use super::timeout::PollBudget;
use crate::constants::{DISCOVERY_FIRST_CANDIDATE, DISCOVERY_POLL_BUDGET, DISCOVERY_SETTLE_MS};

/// The progress of a discovery scan, driven by
/// `BusController::discovery_step()`.
///
/// Each step makes at most one probe, so a caller which cannot block for a
/// whole scan can do other work between steps.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DiscoveryScan {
    state: ScanState,
    already_active: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ScanState {
    Start,
    Scanning(u8),
    Secondary(u8),
    Done(Option<u8>),
}

impl DiscoveryScan {
    pub const fn new() -> Self {
        Self {
            state: ScanState::Start,
            already_active: false,
        }
    }

    /// The scan result, once complete.
    pub fn result(&self) -> Option<Option<u8>> {
        match self.state {
            ScanState::Done(found) => Some(found),
            _ => None,
        }
    }
}

impl Default for DiscoveryScan {
    fn default() -> Self {
        Self::new()
    }
}

impl<L: BusLines, D: DelayNs + Clone> BusController<L, D> {
    /// Scan the bus for an instrument, returning its address.
    ///
    /// Candidates are tried from 0x3e down to 0x00, skipping the Unlisten
    /// pattern, so addresses needing a secondary address are tried first.
    /// If the device answered with a secondary address it is then tried
    /// without one, and if it also answers there, the primary-only address
    /// is returned.
    ///
    /// Timeouts while probing are expected (and reset the bus as usual), so
    /// they are not reported.
    ///
    /// A transaction opened by `make_talker()` or `make_listener()` before
    /// the scan is left open.
    pub fn discover_address(&mut self) -> Option<u8> {
        let mut scan = DiscoveryScan::new();
        loop {
            if let Some(found) = self.discovery_step(&mut scan) {
                return found;
            }
        }
    }

    /// Run the next step of a discovery scan.  Returns the scan result once
    /// the scan is complete, and keeps returning it if called again.
    pub fn discovery_step(&mut self, scan: &mut DiscoveryScan) -> Option<Option<u8>> {
        match scan.state {
            ScanState::Start => {
                info!("Discovering instrument address");
                scan.already_active = self.monitor.transaction_active();
                self.probe_unlisten();
                scan.state = ScanState::Scanning(DISCOVERY_FIRST_CANDIDATE);
            }
            ScanState::Scanning(addr) => {
                if self.probe(addr) {
                    self.probe_unlisten();
                    if has_secondary(addr) {
                        debug!("0x{:02x} uses a secondary address - trying without", addr);
                        scan.state = ScanState::Secondary(addr);
                    } else {
                        self.finish_discovery(scan, Some(addr));
                    }
                } else if let Some(next) = next_candidate(addr) {
                    scan.state = ScanState::Scanning(next);
                } else {
                    self.probe_unlisten();
                    self.finish_discovery(scan, None);
                }
            }
            ScanState::Secondary(addr) => {
                let found = if self.probe(primary(addr)) {
                    primary(addr)
                } else {
                    addr
                };
                self.probe_unlisten();
                self.finish_discovery(scan, Some(found));
            }
            ScanState::Done(_) => (),
        }
        scan.result()
    }

    fn finish_discovery(&mut self, scan: &mut DiscoveryScan, found: Option<u8>) {
        if !scan.already_active {
            self.monitor.end_transaction();
        }
        match found {
            Some(addr) => info!("Found instrument at address 0x{:02x}", addr),
            None => info!("No instrument found"),
        }
        scan.state = ScanState::Done(found);
    }

    // Address a candidate as listener and test whether a device latched on.
    //
    // A timed out probe resets the bus, which ends the transaction, so each
    // probe marks it active again.
    fn probe(&mut self, addr: u8) -> bool {
        self.monitor.begin_transaction();
        let mut budget = self.probe_budget();
        if self.listen_address(addr, &mut budget).is_err() {
            trace!("Probe 0x{:02x} timed out", addr);
        }
        self.lines.release(Line::Atn);
        self.delay.delay_ms(DISCOVERY_SETTLE_MS);

        self.lines.is_asserted(Line::Ndac) && !self.lines.is_asserted(Line::Atn)
    }

    fn probe_unlisten(&mut self) {
        self.monitor.begin_transaction();
        let mut budget = self.probe_budget();
        if self.command(Command::Unlisten, &mut budget).is_err() {
            trace!("Probe unlisten timed out");
        }
    }

    fn probe_budget(&self) -> PollBudget<D> {
        PollBudget::new(self.delay.clone(), DISCOVERY_POLL_BUDGET)
    }
}

// The candidate after `addr`, skipping the Unlisten pattern.
fn next_candidate(addr: u8) -> Option<u8> {
    let next = addr.checked_sub(1)?;
    if primary(next) == RESERVED_PRIMARY {
        next.checked_sub(1)
    } else {
        Some(next)
    }
}
