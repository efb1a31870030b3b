//! Integration tests for the addressing and command operations, against a
//! simulated instrument.

// Copyright (c) 2025 Piers Finlayson <piers@piers.rocks>
//
// GPLv3 licensed - see https://www.gnu.org/licenses/gpl-3.0.html

mod common;

use common::{Instrument, controller_with, controller_without_instrument, patient};
use gpib488_rs::gpib::{BusError, LineMask, PollBudget};

#[test]
fn make_listener_sequence() {
    let (mut controller, bus, _delay) = controller_with(Instrument::new(12));
    controller.make_listener(12, &mut patient()).unwrap();

    // UNT, UNL, LAG 12
    assert_eq!(bus.instrument(|i| i.commands()), [0x5f, 0x3f, 0x2c]);
    assert!(controller.monitor().transaction_active());
    assert!(!bus.controller_lines().contains(LineMask::ATN));
}

#[test]
fn make_talker_sequence() {
    let (mut controller, bus, _delay) = controller_with(Instrument::new(7));
    controller.make_talker(7, &mut patient()).unwrap();

    // UNL, TAG 7, then we're ready to accept data
    assert_eq!(bus.instrument(|i| i.commands()), [0x3f, 0x47]);
    assert!(controller.monitor().transaction_active());
    assert_eq!(
        bus.controller_lines() & (LineMask::ATN | LineMask::NDAC),
        LineMask::NDAC
    );
}

#[test]
fn untalk_unlisten_sequence() {
    let (mut controller, bus, _delay) = controller_with(Instrument::new(12));
    controller.make_listener(12, &mut patient()).unwrap();
    bus.instrument(|i| i.events.clear());

    controller.untalk_unlisten(&mut patient()).unwrap();
    assert_eq!(bus.instrument(|i| i.commands()), [0x3f, 0x5f]);
    assert!(!controller.monitor().transaction_active());
}

#[test]
fn every_primary_address_round_trips() {
    for addr in 0..=30 {
        let (mut controller, bus, _delay) = controller_with(Instrument::new(addr));
        controller.make_listener(addr, &mut patient()).unwrap();
        assert!(bus.instrument(|i| i.is_listening()), "address {addr}");
        controller.untalk_unlisten(&mut patient()).unwrap();

        assert!(!controller.monitor().transaction_active());
        assert!(!bus.instrument(|i| i.is_listening()));
        assert_eq!(bus.controller_lines(), LineMask::REN);
    }
}

#[test]
fn secondary_address_is_sent_after_primary() {
    let (mut controller, bus, _delay) = controller_with(Instrument::with_secondary(12, 0));
    controller.make_listener(0x2c, &mut patient()).unwrap();
    assert_eq!(bus.instrument(|i| i.commands()), [0x5f, 0x3f, 0x2c, 0x60]);
    assert!(bus.instrument(|i| i.is_listening()));
}

#[test]
fn higher_secondary_addresses() {
    let (mut controller, bus, _delay) = controller_with(Instrument::with_secondary(5, 2));
    controller.make_talker(0x65, &mut patient()).unwrap();
    assert_eq!(bus.instrument(|i| i.commands()), [0x3f, 0x45, 0x62]);
    assert!(bus.instrument(|i| i.is_talking()));
}

#[test]
fn instrument_needing_secondary_ignores_primary_only() {
    let (mut controller, bus, _delay) = controller_with(Instrument::with_secondary(12, 0));
    controller.make_listener(12, &mut patient()).unwrap();
    assert!(!bus.instrument(|i| i.is_listening()));
}

#[test]
fn read_status_byte() {
    let mut instrument = Instrument::new(9);
    instrument.status = 0x41;
    let (mut controller, bus, _delay) = controller_with(instrument);

    assert_eq!(controller.read_status_byte(9, &mut patient()), Ok(0x41));

    // SPE, TAG 9, the status byte, UNT, SPD
    assert_eq!(bus.instrument(|i| i.commands()), [0x18, 0x49, 0x5f, 0x19]);
    assert!(!bus.instrument(|i| i.is_talking()));
    assert!(!controller.monitor().transaction_active());
    assert_eq!(bus.controller_lines(), LineMask::REN);
}

#[test]
fn read_status_byte_with_secondary() {
    let mut instrument = Instrument::with_secondary(9, 0);
    instrument.status = 0x10;
    let (mut controller, bus, _delay) = controller_with(instrument);

    assert_eq!(controller.read_status_byte(0x29, &mut patient()), Ok(0x10));
    assert_eq!(
        bus.instrument(|i| i.commands()),
        [0x18, 0x49, 0x60, 0x5f, 0x19]
    );
}

#[test]
fn read_status_byte_from_absent_device_times_out() {
    let (mut controller, bus, _delay) = controller_with(Instrument::new(9));

    // SPE and TAG are accepted by the instrument at 9, but nobody is at 4 to
    // answer.
    let mut polls = 0;
    let result = controller.read_status_byte(4, &mut || {
        polls += 1;
        polls > 1000
    });
    assert_eq!(result, Err(BusError::Timeout));
    assert_eq!(bus.instrument(|i| i.commands()), [0x18, 0x44]);
    assert!(!controller.monitor().transaction_active());
    assert_eq!(bus.controller_lines(), LineMask::REN);
}

#[test]
fn trigger() {
    let (mut controller, bus, _delay) = controller_with(Instrument::new(12));
    controller.trigger(12, &mut patient()).unwrap();

    // LAG 12, GET, UNL
    assert_eq!(bus.instrument(|i| i.commands()), [0x2c, 0x08, 0x3f]);
    assert_eq!(bus.instrument(|i| i.triggers), 1);
    assert!(!controller.monitor().transaction_active());
}

#[test]
fn trigger_with_secondary() {
    let (mut controller, bus, _delay) = controller_with(Instrument::with_secondary(12, 0));
    controller.trigger(0x2c, &mut patient()).unwrap();
    assert_eq!(bus.instrument(|i| i.commands()), [0x2c, 0x60, 0x08, 0x3f]);
    assert_eq!(bus.instrument(|i| i.triggers), 1);
}

#[test]
fn trigger_other_address_is_ignored() {
    let (mut controller, bus, _delay) = controller_with(Instrument::new(12));
    controller.trigger(13, &mut patient()).unwrap();
    assert_eq!(bus.instrument(|i| i.triggers), 0);
}

#[test]
fn goto_local() {
    let (mut controller, bus, _delay) = controller_with(Instrument::new(22));
    controller.goto_local(22, &mut patient()).unwrap();

    // LAG 22, GTL, UNL
    assert_eq!(bus.instrument(|i| i.commands()), [0x36, 0x01, 0x3f]);
    assert_eq!(bus.instrument(|i| i.gone_local), 1);
    assert!(!bus.instrument(|i| i.is_listening()));
    assert!(!controller.monitor().transaction_active());
}

#[test]
fn local_lockout() {
    let (mut controller, bus, _delay) = controller_with(Instrument::new(1));
    controller.local_lockout(&mut patient()).unwrap();
    assert_eq!(bus.instrument(|i| i.commands()), [0x11]);
    assert!(bus.instrument(|i| i.local_lockout));
    assert!(!controller.monitor().transaction_active());
}

#[test]
fn commands_keep_an_addressed_transaction_open() {
    let (mut controller, bus, _delay) = controller_with(Instrument::new(12));
    controller.make_listener(12, &mut patient()).unwrap();

    controller.local_lockout(&mut patient()).unwrap();
    assert!(bus.instrument(|i| i.is_listening()));
    assert!(controller.monitor().transaction_active());

    controller.untalk_unlisten(&mut patient()).unwrap();
    assert!(!controller.monitor().transaction_active());
}

#[test]
fn trigger_while_talker_addressed_keeps_transaction_open() {
    let (mut controller, bus, _delay) = controller_with(Instrument::new(12));
    controller.make_talker(12, &mut patient()).unwrap();

    controller.trigger(5, &mut patient()).unwrap();
    assert!(bus.instrument(|i| i.is_talking()));
    assert!(controller.monitor().transaction_active());

    controller.untalk_unlisten(&mut patient()).unwrap();
    assert!(!bus.instrument(|i| i.is_talking()));
    assert!(!controller.monitor().transaction_active());
}

#[test]
fn failed_command_ends_an_addressed_transaction() {
    let (mut controller, bus, _delay) = controller_with(Instrument::new(12));
    controller.make_listener(12, &mut patient()).unwrap();

    // The reset that follows a timeout unaddresses everything.
    assert_eq!(
        controller.goto_local(12, &mut || true),
        Err(BusError::Timeout)
    );
    assert!(!controller.monitor().transaction_active());
    assert_eq!(bus.controller_lines(), LineMask::REN);
}

#[test]
fn timeout_stops_the_sequence() {
    let mut instrument = Instrument::new(12);
    instrument.stuck_nrfd = true;
    let (mut controller, bus, _delay) = controller_with(instrument);

    let mut budget = PollBudget::new(common::SimDelay::default(), 10);
    assert_eq!(controller.trigger(12, &mut budget), Err(BusError::Timeout));

    // Nothing got through, and the bus is idle again.
    assert!(bus.instrument(|i| i.commands().is_empty()));
    assert_eq!(bus.controller_lines(), LineMask::REN);
    assert!(!controller.monitor().transaction_active());
}

#[test]
fn commands_time_out_with_nothing_attached() {
    let (mut controller, bus, _delay) = controller_without_instrument();
    let mut budget = PollBudget::new(common::SimDelay::default(), 10);
    assert_eq!(
        controller.local_lockout(&mut budget),
        Err(BusError::Timeout)
    );
    assert_eq!(bus.controller_lines(), LineMask::REN);
    assert!(!controller.monitor().transaction_active());
}
