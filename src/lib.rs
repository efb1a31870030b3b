//! gpib488
//!
//! A bit-banged IEEE-488 (GPIB) bus controller.  It drives a single
//! instrument through inverting bus transceivers: addressing it as talker or
//! listener, moving data with the three wire handshake, serial polling it,
//! triggering it, and locking out or restoring its front panel.  It can also
//! find the instrument's address itself, and watches the bus to tell whether
//! an instrument is attached at all.
//!
//! The protocol core in [`gpib`] is hardware independent, and is built and
//! tested on the host.  The `firmware` feature adds the Raspberry Pi Pico
//! implementation of the bus lines and the embassy tasks that run it.

// Copyright (c) 2025 Piers Finlayson <piers@piers.rocks>
//
// GPLv3 licensed - see https://www.gnu.org/licenses/gpl-3.0.html

#![cfg_attr(not(test), no_std)]

// Provide some feature guidance when compiling the firmware.
#[cfg(all(feature = "firmware", not(any(feature = "pico", feature = "pico2"))))]
compile_error!("Either 'pico' or 'pico2' feature must be enabled to build the firmware");
#[cfg(all(feature = "pico", feature = "pico2"))]
compile_error!("Features 'pico' and 'pico2' cannot be enabled simultaneously");

// Must come first, so the logging macros are visible to every other module.
#[macro_use]
mod fmt;

// Declare all of this library's modules.
pub mod constants;
pub mod gpib;

#[cfg(feature = "firmware")]
mod built;
#[cfg(feature = "firmware")]
pub mod entry;
#[cfg(feature = "firmware")]
mod infra;

#[cfg(feature = "firmware")]
pub use entry::{common_main, defmt_panic_handler, panic_handler};

// Extra binary information that picotool can read.
#[cfg(feature = "firmware")]
#[unsafe(link_section = ".bi_entries")]
#[used]
pub static PICOTOOL_ENTRIES: [embassy_rp::binary_info::EntryAddr; 4] = [
    embassy_rp::binary_info::rp_program_name!(c"gpib488 by piers.rocks"),
    embassy_rp::binary_info::rp_program_description!(
        c"A bit-banged IEEE-488 (GPIB) bus controller, which finds, serial polls and controls a single attached instrument."
    ),
    embassy_rp::binary_info::rp_cargo_version!(),
    embassy_rp::binary_info::rp_program_build_attribute!(),
];

// A note about Statics
//
// The firmware shares two objects between tasks: the bus controller and the
// status display.  Both live in a blocking Mutex holding a RefCell<Option<>>,
// filled in once at start of day.
//
// - The bus controller uses a ThreadModeRawMutex.  Every task runs on core 0
//   in thread mode, and a controller operation never awaits, so the lock is
//   never contended.  The connection monitor's tick only needs
//   &BusController, so it takes a shared borrow.
//
// - The status display uses a CriticalSectionRawMutex, as in general it may
//   be updated from anywhere.
//
// - The watchdog is initialized once and then only shared immutably, so it
//   lives in a StaticCell.
