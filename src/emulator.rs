//! Software model of the target's TAP controller and the memory behind its
//! AXI bridge.
//!
//! The emulator only sees pin levels. Every falling edge of TCK samples TMS
//! and TDI, performs the action of the current state and then moves along
//! the transition table. Data register updates are decoded with the same
//! SIB-select/TDR framing that [`crate::transport::tdr`] produces: the
//! address and data TDRs latch their values, and a write command committed
//! to the control/status TDR stores the latched data word, so a block write
//! through the shift path lands in [`TapEmulator::memory`].
//!
//! TDO is not modelled. Reads are served by [`TapEmulator::read`], which
//! stands in for the debug transport's fast read path.

use tracing::{debug, trace};

use crate::tap::{Register, ShiftRegisterSet, TapState};
use crate::transport::tdr::{AXI_ADDR_TDR, AXI_CNTL_WRITE, AXI_CONTROL_STATUS_TDR, AXI_DATA_TDR};
use crate::transport::TransportError;

/// Which TDR the next DR update is aimed at.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
enum Pairing {
    #[default]
    Idle,
    /// The address TDR was selected, next DR update is the address.
    Address,
    /// The data TDR was selected, next DR update is the data word.
    Data,
    /// The control/status TDR was selected, next DR update is a command.
    Control,
}

#[derive(Debug)]
pub struct TapEmulator {
    state: TapState,
    selected: Register,
    regs: ShiftRegisterSet,
    tck: bool,
    edges: usize,
    pairing: Pairing,
    address: Option<u32>,
    data: Option<u32>,
    memory: Vec<u32>,
}

impl Default for TapEmulator {
    fn default() -> Self {
        Self::new()
    }
}

impl TapEmulator {
    pub fn new() -> Self {
        Self {
            state: TapState::Idle,
            selected: Register::Bypass,
            regs: ShiftRegisterSet::default(),
            // pins come up driven high
            tck: true,
            edges: 0,
            pairing: Pairing::Idle,
            address: None,
            data: None,
            memory: Vec::new(),
        }
    }

    /// Bind the array standing in for target memory.
    pub fn attach(&mut self, memory: Vec<u32>) {
        debug!("emulator attached to {} words of memory", memory.len());
        self.memory = memory;
    }

    /// Unbind target memory, returning its contents.
    pub fn detach(&mut self) -> Vec<u32> {
        std::mem::take(&mut self.memory)
    }

    pub fn memory(&self) -> &[u32] {
        &self.memory
    }

    /// Read one word of emulated memory by byte address.
    pub fn read(&self, addr: u32) -> Result<u32, TransportError> {
        let value = self
            .memory
            .get((addr >> 2) as usize)
            .copied()
            .ok_or(TransportError::OutOfRange { addr })?;
        trace!("R: addr: {:03x} data: {:08x}", addr, value);
        Ok(value)
    }

    pub fn state(&self) -> TapState {
        self.state
    }

    pub fn selected(&self) -> Register {
        self.selected
    }

    /// Value latched by the last Update of `reg`.
    pub fn hold(&self, reg: Register) -> u32 {
        self.regs.get(reg).hold()
    }

    /// Number of falling TCK edges seen so far.
    pub fn edges(&self) -> usize {
        self.edges
    }

    pub fn tdo(&self) -> bool {
        false
    }

    /// React to the current pin levels. Only a change of TCK matters.
    pub fn drive(&mut self, tck: bool, tms: bool, tdi: bool) {
        if tck == self.tck {
            return;
        }
        self.tck = tck;

        if !tck {
            self.falling_edge(tms, tdi);
        }
    }

    fn falling_edge(&mut self, tms: bool, tdi: bool) {
        match self.state {
            TapState::ScanDr => self.selected = Register::Data,
            TapState::ScanIr => self.selected = Register::Instruction,
            TapState::CaptureDr | TapState::CaptureIr => self.regs.get_mut(self.selected).capture(),
            TapState::ShiftDr | TapState::ShiftIr => {
                // the bit clocked while leaving Shift-* is not stored
                if !tms {
                    self.regs.get_mut(self.selected).shift_in(tdi);
                }
            }
            TapState::UpdateDr | TapState::UpdateIr => self.update(),
            _ => {}
        }

        let next = self.state.next(tms);
        trace!("{:5}\t{}\t{}\t{}", self.edges, tms as u8, tdi as u8, next);
        self.state = next;
        self.edges += 1;
    }

    fn update(&mut self) {
        let value = self.regs.get_mut(self.selected).update();
        if self.selected == Register::Data {
            self.on_data_update(value);
        }
    }

    fn on_data_update(&mut self, value: u32) {
        match self.pairing {
            Pairing::Address => {
                self.pairing = Pairing::Idle;
                self.address = Some(value);
            }
            Pairing::Data => {
                self.pairing = Pairing::Idle;
                self.data = Some(value);
            }
            Pairing::Control => {
                self.pairing = Pairing::Idle;
                // reads and status polls leave memory alone
                if value & AXI_CNTL_WRITE != 0 {
                    if let (Some(addr), Some(data)) = (self.address, self.data.take()) {
                        self.store(addr, data);
                    }
                }
            }
            // SIB selects carry the TDR number plus one
            Pairing::Idle => match value.wrapping_sub(1) {
                AXI_ADDR_TDR => self.pairing = Pairing::Address,
                AXI_DATA_TDR => self.pairing = Pairing::Data,
                AXI_CONTROL_STATUS_TDR => self.pairing = Pairing::Control,
                _ => {}
            },
        }
    }

    fn store(&mut self, addr: u32, value: u32) {
        match self.memory.get_mut((addr >> 2) as usize) {
            Some(slot) => {
                *slot = value;
                debug!("W: addr: {:03x} data: {:08x}", addr, value);
            }
            None => trace!("dropping write to {:#010x}, outside emulated memory", addr),
        }
    }
}
