//! Bit-banged JTAG over digital I/O lines.
use bitvec::prelude::*;
use embedded_hal::digital::{ErrorType, InputPin, OutputPin, PinState};
use tracing::trace;

use super::{tdr, DebugTransport, ScanEnd, TransportError};

/// The JTAG lines as seen by the bit-bang driver.
pub trait JtagPins {
    /// Drive every output to its active (high) level.
    fn configure(&mut self) -> Result<(), TransportError>;
    /// Stop driving the lines.
    fn release(&mut self) -> Result<(), TransportError>;

    fn set_tck(&mut self, high: bool) -> Result<(), TransportError>;
    fn set_tms(&mut self, high: bool) -> Result<(), TransportError>;
    fn set_tdi(&mut self, high: bool) -> Result<(), TransportError>;
    fn tdo(&mut self) -> Result<bool, TransportError>;

    /// TRST is optional, boards without it ignore this.
    fn set_trst(&mut self, _high: bool) -> Result<(), TransportError> {
        Ok(())
    }
}

/// Placeholder for an absent TRST line.
pub struct NoPin;

impl ErrorType for NoPin {
    type Error = core::convert::Infallible;
}

impl OutputPin for NoPin {
    fn set_low(&mut self) -> Result<(), Self::Error> {
        Ok(())
    }

    fn set_high(&mut self) -> Result<(), Self::Error> {
        Ok(())
    }
}

/// JTAG lines on `embedded-hal` pins.
pub struct GpioPins<Tck, Tms, Tdi, Tdo, Trst = NoPin> {
    tck: Tck,
    tms: Tms,
    tdi: Tdi,
    tdo: Tdo,
    trst: Option<Trst>,
}

impl<Tck, Tms, Tdi, Tdo> GpioPins<Tck, Tms, Tdi, Tdo, NoPin>
where
    Tck: OutputPin,
    Tms: OutputPin,
    Tdi: OutputPin,
    Tdo: InputPin,
{
    pub fn new(tck: Tck, tms: Tms, tdi: Tdi, tdo: Tdo) -> Self {
        Self {
            tck,
            tms,
            tdi,
            tdo,
            trst: None,
        }
    }
}

impl<Tck, Tms, Tdi, Tdo, Trst> GpioPins<Tck, Tms, Tdi, Tdo, Trst>
where
    Tck: OutputPin,
    Tms: OutputPin,
    Tdi: OutputPin,
    Tdo: InputPin,
    Trst: OutputPin,
{
    pub fn with_trst(tck: Tck, tms: Tms, tdi: Tdi, tdo: Tdo, trst: Trst) -> Self {
        Self {
            tck,
            tms,
            tdi,
            tdo,
            trst: Some(trst),
        }
    }
}

impl<Tck, Tms, Tdi, Tdo, Trst> JtagPins for GpioPins<Tck, Tms, Tdi, Tdo, Trst>
where
    Tck: OutputPin,
    Tms: OutputPin,
    Tdi: OutputPin,
    Tdo: InputPin,
    Trst: OutputPin,
{
    fn configure(&mut self) -> Result<(), TransportError> {
        self.tck.set_high().map_err(TransportError::pin)?;
        self.tms.set_high().map_err(TransportError::pin)?;
        self.tdi.set_high().map_err(TransportError::pin)?;
        if let Some(trst) = &mut self.trst {
            trst.set_high().map_err(TransportError::pin)?;
        }
        Ok(())
    }

    // embedded-hal has no direction control, so the lines are parked with
    // TCK low instead of being turned into inputs.
    fn release(&mut self) -> Result<(), TransportError> {
        self.tck.set_low().map_err(TransportError::pin)
    }

    fn set_tck(&mut self, high: bool) -> Result<(), TransportError> {
        self.tck.set_state(PinState::from(high)).map_err(TransportError::pin)
    }

    fn set_tms(&mut self, high: bool) -> Result<(), TransportError> {
        self.tms.set_state(PinState::from(high)).map_err(TransportError::pin)
    }

    fn set_tdi(&mut self, high: bool) -> Result<(), TransportError> {
        self.tdi.set_state(PinState::from(high)).map_err(TransportError::pin)
    }

    fn tdo(&mut self) -> Result<bool, TransportError> {
        self.tdo.is_high().map_err(TransportError::pin)
    }

    fn set_trst(&mut self, high: bool) -> Result<(), TransportError> {
        match &mut self.trst {
            Some(trst) => trst.set_state(PinState::from(high)).map_err(TransportError::pin),
            None => Ok(()),
        }
    }
}

/// JTAG driver that toggles the lines one clock at a time.
pub struct BitBang<P> {
    pins: P,
    ready: bool,
}

impl<P: JtagPins> BitBang<P> {
    pub fn new(pins: P) -> Self {
        Self { pins, ready: false }
    }

    pub fn pins(&self) -> &P {
        &self.pins
    }

    pub fn pins_mut(&mut self) -> &mut P {
        &mut self.pins
    }

    pub fn into_inner(self) -> P {
        self.pins
    }

    pub fn is_ready(&self) -> bool {
        self.ready
    }

    fn ensure_ready(&self) -> Result<(), TransportError> {
        if self.ready {
            Ok(())
        } else {
            Err(TransportError::NotReady)
        }
    }

    /// `count` full TCK periods, TCK is left low.
    fn clock(&mut self, count: u32) -> Result<(), TransportError> {
        for _ in 0..count {
            self.pins.set_tck(false)?;
            self.pins.set_tck(true)?;
        }
        self.pins.set_tck(false)
    }
}

impl<P: JtagPins> DebugTransport for BitBang<P> {
    fn init(&mut self) -> Result<(), TransportError> {
        self.pins.configure()?;
        self.ready = true;
        Ok(())
    }

    fn reset(&mut self) -> Result<(), TransportError> {
        self.ensure_ready()?;

        self.pins.set_trst(true)?;
        self.pins.set_tms(true)?;
        self.clock(16)?;

        self.pins.set_trst(false)?;
        self.pins.set_tdi(true)?;
        self.pins.set_tms(false)?;
        self.clock(32)
    }

    fn read_id(&mut self) -> Result<u32, TransportError> {
        self.ensure_ready()?;
        tdr::read_idcode(self)
    }

    fn tick(&mut self, count: u32) -> Result<(), TransportError> {
        self.ensure_ready()?;
        self.clock(count)
    }

    fn update_ir(&mut self, bits: &BitSlice<u8, Lsb0>) -> Result<(), TransportError> {
        let Some((last, head)) = bits.split_last() else {
            return Ok(());
        };
        self.ensure_ready()?;
        trace!("update ir, {} bits", bits.len());

        // Select-DR-Scan, Select-IR-Scan
        self.pins.set_tms(true)?;
        self.clock(2)?;

        // Capture-IR. The bit presented on the next clock is consumed by the
        // Capture-IR -> Shift-IR transition.
        self.pins.set_tms(false)?;
        self.clock(1)?;

        // Shift-IR
        for bit in head {
            self.pins.set_tdi(*bit)?;
            self.clock(1)?;
        }

        // Exit1-IR
        self.pins.set_tms(true)?;
        self.pins.set_tdi(*last)?;
        self.clock(1)?;

        // Update-IR, Select-DR-Scan
        self.clock(2)
    }

    fn update_dr(&mut self, bits: &BitSlice<u8, Lsb0>, end: ScanEnd) -> Result<BitVec<u8, Lsb0>, TransportError> {
        let Some((last, head)) = bits.split_last() else {
            return Ok(BitVec::new());
        };
        self.ensure_ready()?;
        trace!("update dr, {} bits, end {:?}", bits.len(), end);

        let mut out = BitVec::with_capacity(bits.len());

        // Capture-DR, Shift-DR
        self.pins.set_tms(false)?;
        self.clock(2)?;

        for bit in head {
            self.pins.set_tdi(*bit)?;
            out.push(self.pins.tdo()?);
            self.clock(1)?;
        }

        // Exit1-DR
        self.pins.set_tms(true)?;
        self.pins.set_tdi(*last)?;
        out.push(self.pins.tdo()?);
        self.clock(1)?;

        // Update-DR
        self.clock(1)?;

        self.pins.set_tms(end == ScanEnd::SelectDr)?;
        self.clock(1)?;

        Ok(out)
    }

    fn teardown(&mut self) -> Result<(), TransportError> {
        self.ready = false;
        self.pins.release()
    }
}
