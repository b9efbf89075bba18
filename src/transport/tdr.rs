//! Memory access through the remote TAP's test data registers.
//!
//! The master TAP instruction selects the remote TAP (RTAP). Each TDR access
//! is then two data register scans: a SIB select carrying `tdr + 1`, and the
//! TDR payload shifted up past the SIB bits. Three TDRs form an AXI bridge:
//! address, data and control/status.
use tracing::{debug, trace, warn};

use super::{bits, value, DebugTransport, ScanEnd, TransportError};

pub const MST_TAP_OP_ISCAN_SEL: u8 = 2;
pub const MST_TAP_OP_DEVID_SEL: u8 = 6;

pub const RTAP_ADDR: u32 = 0x19e;

pub const IR_LEN: usize = 24;
pub const ID_LEN: usize = 32;
pub const SIB_LEN: usize = 4;
pub const TDR_LEN: usize = 32;
/// SIB select scan length.
pub const SIB_SCAN_LEN: usize = SIB_LEN + 1;
/// TDR payload scan length.
pub const TDR_SCAN_LEN: usize = 1 + TDR_LEN + SIB_LEN;

pub const AXI_ADDR_TDR: u32 = 0;
pub const AXI_DATA_TDR: u32 = 1;
pub const AXI_CONTROL_STATUS_TDR: u32 = 2;

pub const AXI_CNTL_READ: u32 = 1 << 31;
pub const AXI_CNTL_WRITE: u32 = 1 << 30;

/// Low nibble of the control/status TDR once a read has completed.
const AXI_STATUS_READ_DONE: u32 = 1;
/// Bit of the control/status TDR that flags a failed write.
const AXI_STATUS_WRITE_FAIL_BIT: u32 = 16;
const AXI_WAIT_POLLS: usize = 3;

pub use regs::Instruction;

pub mod regs {
    use bitfield::bitfield;

    bitfield! {
        /// Master TAP instruction register.
        #[derive(Copy, Clone, Default, Eq, PartialEq)]
        pub struct Instruction(u32);
        impl Debug;
        pub u8, op, set_op: 2, 0;
        /// Low three bits of the selected RTAP address.
        pub u8, bisten_sel_0, set_bisten_sel_0: 9, 7;
        /// Remaining six bits of the selected RTAP address.
        pub u8, bisten_sel_1, set_bisten_sel_1: 22, 17;
    }

    impl Instruction {
        /// ISCAN_SEL instruction routing scans to the remote TAP at `rtap`.
        pub fn select(rtap: u32) -> Self {
            let mut instr = Instruction(0);
            instr.set_op(super::MST_TAP_OP_ISCAN_SEL);
            instr.set_bisten_sel_0((rtap & 0x7) as u8);
            instr.set_bisten_sel_1(((rtap >> 3) & 0x3f) as u8);
            instr
        }

        pub fn devid() -> Self {
            let mut instr = Instruction(0);
            instr.set_op(super::MST_TAP_OP_DEVID_SEL);
            instr
        }
    }
}

/// Shift the DEVID instruction and read back the identification word.
pub fn read_idcode<T: DebugTransport + ?Sized>(t: &mut T) -> Result<u32, TransportError> {
    t.update_ir(&bits(Instruction::devid().0 as u64, IR_LEN)?)?;
    let id = t.update_dr(&bits(0, ID_LEN)?, ScanEnd::Idle)?;
    Ok(value(&id) as u32)
}

pub fn select_rtap<T: DebugTransport + ?Sized>(t: &mut T, rtap: u32) -> Result<(), TransportError> {
    let instr = Instruction::select(rtap);
    trace!("select rtap {:#x}: {:?}", rtap, instr);
    t.update_ir(&bits(instr.0 as u64, IR_LEN)?)
}

pub fn write_tdr<T: DebugTransport + ?Sized>(
    t: &mut T,
    tdr: u32,
    data: u32,
    end: ScanEnd,
) -> Result<(), TransportError> {
    t.update_dr(&bits(tdr as u64 + 1, SIB_SCAN_LEN)?, ScanEnd::SelectDr)?;
    t.update_dr(&bits((data as u64) << SIB_LEN, TDR_SCAN_LEN)?, end)?;
    Ok(())
}

pub fn read_tdr<T: DebugTransport + ?Sized>(t: &mut T, tdr: u32, end: ScanEnd) -> Result<u32, TransportError> {
    t.update_dr(&bits(tdr as u64 + 1, SIB_SCAN_LEN)?, ScanEnd::SelectDr)?;
    let out = t.update_dr(&bits(0, TDR_SCAN_LEN)?, end)?;
    Ok((value(&out) >> SIB_LEN) as u32)
}

pub fn axi_read<T: DebugTransport + ?Sized>(t: &mut T, addr: u32) -> Result<u32, TransportError> {
    select_rtap(t, RTAP_ADDR)?;

    write_tdr(t, AXI_ADDR_TDR, addr, ScanEnd::SelectDr)?;
    write_tdr(t, AXI_CONTROL_STATUS_TDR, AXI_CNTL_READ, ScanEnd::SelectDr)?;

    // The bridge reports a failed status here even on reads that return good
    // data, so it is only logged.
    let status = read_tdr(t, AXI_CONTROL_STATUS_TDR, ScanEnd::SelectDr)?;
    if status & 0xF == 0 {
        trace!("AXI read of {:#010x} status {:#x}", addr, status);
    }

    let data = read_tdr(t, AXI_DATA_TDR, ScanEnd::Idle)?;
    debug!("AXI read {:#010x} -> {:#010x}", addr, data);
    Ok(data)
}

pub fn axi_write<T: DebugTransport + ?Sized>(t: &mut T, addr: u32, data: u32) -> Result<(), TransportError> {
    select_rtap(t, RTAP_ADDR)?;

    write_tdr(t, AXI_ADDR_TDR, addr, ScanEnd::SelectDr)?;
    write_tdr(t, AXI_DATA_TDR, data, ScanEnd::SelectDr)?;
    write_tdr(t, AXI_CONTROL_STATUS_TDR, AXI_CNTL_WRITE, ScanEnd::SelectDr)?;

    let status = read_tdr(t, AXI_CONTROL_STATUS_TDR, ScanEnd::Idle)?;
    if (status >> AXI_STATUS_WRITE_FAIL_BIT) & 1 == 1 {
        warn!("AXI write {:#010x} <- {:#010x} reported failure (status {:#x})", addr, data, status);
    } else {
        debug!("AXI write {:#010x} <- {:#010x}", addr, data);
    }
    Ok(())
}

/// Issue a read of `addr` and report whether the bridge completed it.
pub fn axi_wait<T: DebugTransport + ?Sized>(t: &mut T, addr: u32) -> Result<bool, TransportError> {
    t.reset()?;
    select_rtap(t, RTAP_ADDR)?;

    write_tdr(t, AXI_ADDR_TDR, addr, ScanEnd::SelectDr)?;
    write_tdr(t, AXI_CONTROL_STATUS_TDR, AXI_CNTL_READ, ScanEnd::SelectDr)?;

    let mut status = 0;
    for _ in 0..AXI_WAIT_POLLS {
        status = read_tdr(t, AXI_CONTROL_STATUS_TDR, ScanEnd::SelectDr)?;
        if status & 0xF == AXI_STATUS_READ_DONE {
            break;
        }
    }

    read_tdr(t, AXI_DATA_TDR, ScanEnd::Idle)?;

    Ok(status & 0xF == AXI_STATUS_READ_DONE)
}
