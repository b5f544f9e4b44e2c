//! # smartport-bridge
//!
//! Emulates two Apple SmartPort mass-storage peripherals on a single
//! daisy-chained bus. The bus side is split into two cooperating halves:
//!
//! - a realtime **bus engine** ([`engine::Engine`]) that decodes the
//!   self-clocking WDAT line, assembles packets, and pulse-times replies back
//!   out over RDAT — meant to run on its own thread (or, historically, its own
//!   co-processor) where it can't be starved by anything else in the process
//! - a cooperative **supervisor** ([`supervisor::Supervisor`]) that owns the
//!   two 32 MB disk images, decides how to answer each command, and never
//!   touches the bus lines directly
//!
//! The two communicate through a [`mailbox::MailboxPage`] split into typed
//! half-duplex views, standing in for the physical shared memory page the
//! original two-processor design used.
//!
//! ## Crate features
//! | Feature | Description |
//! |---------|--------------|
//! | `log` (default) | Emit diagnostics through the `log` facade |
//!
//! ## Usage
//!
//! ```rust
//! use smartport_bridge::mailbox::MailboxPage;
//! use smartport_bridge::image::Image;
//! use smartport_bridge::supervisor::{Supervisor, WriteblockHandshake};
//!
//! let (_engine_view, supervisor_view) = MailboxPage::split();
//! let images = [Image::zeroed(), Image::zeroed()];
//! let mut supervisor = Supervisor::new(supervisor_view, images, WriteblockHandshake::Skip);
//! supervisor.poll_once();
//! ```

#![deny(
    bad_style,
    improper_ctypes,
    non_shorthand_field_patterns,
    no_mangle_generic_items,
    overflowing_literals,
    path_statements,
    patterns_in_fns_without_body,
    unconditional_recursion,
    while_true,
    missing_debug_implementations,
    trivial_casts,
    trivial_numeric_casts,
    unused_extern_crates,
    unused_import_braces,
    unused_qualifications
)]

pub mod codec;
pub mod consts;
pub mod engine;
pub mod error;
pub mod image;
pub mod mailbox;
pub mod packet;
pub mod pins;
pub mod supervisor;
pub mod timing;

pub use engine::Engine;
pub use image::Image;
pub use mailbox::MailboxPage;
pub use supervisor::{Supervisor, WriteblockHandshake};

#[cfg(test)]
mod tests {
    use embedded_hal_mock::eh1::digital::{Mock as PinMock, State as PinState, Transaction as PinTransaction};

    use crate::pins::{BusOutputs, GpioBus};

    fn bus_with_outen(outen: PinMock) -> GpioBus<PinMock, PinMock, PinMock, PinMock, PinMock, PinMock, PinMock, PinMock, PinMock, PinMock> {
        GpioBus {
            wdat: PinMock::new(&[]),
            req: PinMock::new(&[]),
            p1: PinMock::new(&[]),
            p2: PinMock::new(&[]),
            p3: PinMock::new(&[]),
            outen,
            rdat: PinMock::new(&[]),
            ack: PinMock::new(&[]),
            led: PinMock::new(&[]),
            test: PinMock::new(&[]),
        }
    }

    #[test]
    fn set_outen_active_drives_pin_low() {
        let outen = PinMock::new(&[PinTransaction::set(PinState::Low)]);
        let mut bus = bus_with_outen(outen);
        bus.set_outen(true).unwrap();
        bus.outen.done();
    }

    #[test]
    fn set_outen_inactive_floats_pin_high() {
        let outen = PinMock::new(&[PinTransaction::set(PinState::High)]);
        let mut bus = bus_with_outen(outen);
        bus.set_outen(false).unwrap();
        bus.outen.done();
    }

    #[test]
    fn set_led_on_drives_pin_high() {
        let led = PinMock::new(&[PinTransaction::set(PinState::High)]);
        let mut bus = bus_with_outen(PinMock::new(&[]));
        bus.led = led;
        bus.set_led(true).unwrap();
        bus.led.done();
    }
}
