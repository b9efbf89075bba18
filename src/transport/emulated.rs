//! Debug transport backed by the TAP emulator instead of real pins.
use bitvec::prelude::*;
use tracing::trace;

use super::bitbang::{BitBang, JtagPins};
use super::{tdr, DebugTransport, ScanEnd, TransportError};
use crate::emulator::TapEmulator;

/// Pin levels fed straight into a [`TapEmulator`].
pub struct EmulatorPins {
    tap: TapEmulator,
    tck: bool,
    tms: bool,
    tdi: bool,
    driven: bool,
}

impl EmulatorPins {
    fn new(tap: TapEmulator) -> Self {
        Self {
            tap,
            tck: true,
            tms: true,
            tdi: true,
            driven: false,
        }
    }

    fn drive(&mut self) {
        if self.driven {
            self.tap.drive(self.tck, self.tms, self.tdi);
        }
    }
}

impl JtagPins for EmulatorPins {
    fn configure(&mut self) -> Result<(), TransportError> {
        self.driven = true;
        self.tck = true;
        self.tms = true;
        self.tdi = true;
        self.drive();
        Ok(())
    }

    fn release(&mut self) -> Result<(), TransportError> {
        self.tck = false;
        self.drive();
        self.driven = false;
        Ok(())
    }

    fn set_tck(&mut self, high: bool) -> Result<(), TransportError> {
        self.tck = high;
        self.drive();
        Ok(())
    }

    fn set_tms(&mut self, high: bool) -> Result<(), TransportError> {
        self.tms = high;
        self.drive();
        Ok(())
    }

    fn set_tdi(&mut self, high: bool) -> Result<(), TransportError> {
        self.tdi = high;
        self.drive();
        Ok(())
    }

    fn tdo(&mut self) -> Result<bool, TransportError> {
        Ok(self.tap.tdo())
    }
}

/// The bit-bang driver running against an emulated target.
pub struct EmulatedJtag {
    jtag: BitBang<EmulatorPins>,
}

impl Default for EmulatedJtag {
    fn default() -> Self {
        Self::new()
    }
}

impl EmulatedJtag {
    pub fn new() -> Self {
        Self {
            jtag: BitBang::new(EmulatorPins::new(TapEmulator::new())),
        }
    }

    /// Emulated target with `memory` already attached.
    pub fn with_memory(memory: Vec<u32>) -> Self {
        let mut this = Self::new();
        this.attach(memory);
        this
    }

    pub fn attach(&mut self, memory: Vec<u32>) {
        self.jtag.pins_mut().tap.attach(memory);
    }

    pub fn detach(&mut self) -> Vec<u32> {
        self.jtag.pins_mut().tap.detach()
    }

    pub fn read(&self, addr: u32) -> Result<u32, TransportError> {
        self.jtag.pins().tap.read(addr)
    }

    pub fn memory(&self) -> &[u32] {
        self.jtag.pins().tap.memory()
    }

    pub fn emulator(&self) -> &TapEmulator {
        &self.jtag.pins().tap
    }

    pub fn is_ready(&self) -> bool {
        self.jtag.is_ready()
    }
}

impl DebugTransport for EmulatedJtag {
    fn init(&mut self) -> Result<(), TransportError> {
        self.jtag.init()
    }

    fn reset(&mut self) -> Result<(), TransportError> {
        self.jtag.reset()
    }

    fn read_id(&mut self) -> Result<u32, TransportError> {
        self.jtag.read_id()
    }

    fn tick(&mut self, count: u32) -> Result<(), TransportError> {
        self.jtag.tick(count)
    }

    fn update_ir(&mut self, bits: &BitSlice<u8, Lsb0>) -> Result<(), TransportError> {
        self.jtag.update_ir(bits)
    }

    fn update_dr(&mut self, bits: &BitSlice<u8, Lsb0>, end: ScanEnd) -> Result<BitVec<u8, Lsb0>, TransportError> {
        self.jtag.update_dr(bits, end)
    }

    fn teardown(&mut self) -> Result<(), TransportError> {
        self.jtag.teardown()
    }

    // TDO is not modelled, so memory inside the emulated range is read
    // directly. Anything else goes over the wire and reads back as zero.
    fn read_word(&mut self, addr: u32) -> Result<u32, TransportError> {
        if !self.jtag.is_ready() {
            return Err(TransportError::NotReady);
        }
        match self.read(addr) {
            Ok(value) => Ok(value),
            Err(TransportError::OutOfRange { .. }) => {
                trace!("{:#010x} is not emulated, reading through the TAP", addr);
                tdr::axi_read(self, addr)
            }
            Err(e) => Err(e),
        }
    }

    fn wait_bus(&mut self, _addr: u32) -> Result<bool, TransportError> {
        if !self.jtag.is_ready() {
            return Err(TransportError::NotReady);
        }
        Ok(true)
    }
}
