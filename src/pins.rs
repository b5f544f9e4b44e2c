//! Pin-level abstraction over the SmartPort bus's five signal lines plus the
//! LED/TEST outputs, generic over `embedded-hal` digital pin traits the same
//! way a GPIO-bit-banging driver is generic over its RX/TX/PTT pins.

use embedded_hal::digital::{InputPin, OutputPin};

/// Bus-facing inputs the engine samples every main-loop iteration.
pub trait BusInputs {
    type Error: core::fmt::Debug;
    fn wdat(&mut self) -> Result<bool, Self::Error>;
    fn req(&mut self) -> Result<bool, Self::Error>;
    fn p1(&mut self) -> Result<bool, Self::Error>;
    fn p2(&mut self) -> Result<bool, Self::Error>;
    fn p3(&mut self) -> Result<bool, Self::Error>;
}

/// Bus-facing outputs the engine drives.
pub trait BusOutputs {
    type Error: core::fmt::Debug;
    fn set_outen(&mut self, active: bool) -> Result<(), Self::Error>;
    fn set_rdat(&mut self, high: bool) -> Result<(), Self::Error>;
    fn set_ack(&mut self, high: bool) -> Result<(), Self::Error>;
    fn set_led(&mut self, on: bool) -> Result<(), Self::Error>;
    fn set_test(&mut self, high: bool) -> Result<(), Self::Error>;
}

/// A concrete pin bundle built from five `embedded-hal` input pins and five
/// output pins, matching the physical pinout documented alongside the PRU
/// firmware this engine replaces.
pub struct GpioBus<WDAT, REQ, P1, P2, P3, OUTEN, RDAT, ACK, LED, TEST> {
    pub wdat: WDAT,
    pub req: REQ,
    pub p1: P1,
    pub p2: P2,
    pub p3: P3,
    pub outen: OUTEN,
    pub rdat: RDAT,
    pub ack: ACK,
    pub led: LED,
    pub test: TEST,
}

impl<WDAT, REQ, P1, P2, P3, OUTEN, RDAT, ACK, LED, TEST> BusInputs
    for GpioBus<WDAT, REQ, P1, P2, P3, OUTEN, RDAT, ACK, LED, TEST>
where
    WDAT: InputPin,
    REQ: InputPin,
    P1: InputPin,
    P2: InputPin,
    P3: InputPin,
{
    type Error = ();

    fn wdat(&mut self) -> Result<bool, Self::Error> {
        self.wdat.is_high().map_err(|_| ())
    }
    fn req(&mut self) -> Result<bool, Self::Error> {
        self.req.is_high().map_err(|_| ())
    }
    fn p1(&mut self) -> Result<bool, Self::Error> {
        self.p1.is_high().map_err(|_| ())
    }
    fn p2(&mut self) -> Result<bool, Self::Error> {
        self.p2.is_high().map_err(|_| ())
    }
    fn p3(&mut self) -> Result<bool, Self::Error> {
        self.p3.is_high().map_err(|_| ())
    }
}

impl<WDAT, REQ, P1, P2, P3, OUTEN, RDAT, ACK, LED, TEST> BusOutputs
    for GpioBus<WDAT, REQ, P1, P2, P3, OUTEN, RDAT, ACK, LED, TEST>
where
    OUTEN: OutputPin,
    RDAT: OutputPin,
    ACK: OutputPin,
    LED: OutputPin,
    TEST: OutputPin,
{
    type Error = ();

    fn set_outen(&mut self, active: bool) -> Result<(), Self::Error> {
        // OUTEN is active-low on the LS367 line driver: active==true means drive RDAT.
        if active {
            self.outen.set_low().map_err(|_| ())
        } else {
            self.outen.set_high().map_err(|_| ())
        }
    }
    fn set_rdat(&mut self, high: bool) -> Result<(), Self::Error> {
        if high {
            self.rdat.set_high().map_err(|_| ())
        } else {
            self.rdat.set_low().map_err(|_| ())
        }
    }
    fn set_ack(&mut self, high: bool) -> Result<(), Self::Error> {
        if high {
            self.ack.set_high().map_err(|_| ())
        } else {
            self.ack.set_low().map_err(|_| ())
        }
    }
    fn set_led(&mut self, on: bool) -> Result<(), Self::Error> {
        if on {
            self.led.set_high().map_err(|_| ())
        } else {
            self.led.set_low().map_err(|_| ())
        }
    }
    fn set_test(&mut self, high: bool) -> Result<(), Self::Error> {
        if high {
            self.test.set_high().map_err(|_| ())
        } else {
            self.test.set_low().map_err(|_| ())
        }
    }
}
