//! Writing the bootrom patch into the target, checking it, and restarting
//! the core on it.
use tracing::{debug, error, info};

use crate::patch::BootPatch;
use crate::transport::{DebugTransport, TransportError};

use self::regs::MiscCntl;

pub mod regs {
    use bitfield::bitfield;

    /// Reset unit of the target.
    pub const RESET_BASE: u32 = 0x8003_0000;
    /// Status byte observed by the board management controller.
    pub const POSTCODE: u32 = RESET_BASE + 0x60;
    pub const MISC_CNTL: u32 = RESET_BASE + 0x100;
    /// Output enables of the GPIO bank carrying the postcode.
    pub const GPIO_TRIEN: u32 = RESET_BASE + 0x1A0;
    pub const GPIO_TRIEN_POSTCODE: u32 = 0xFF00;

    /// First word of the target ROM, fetched as the reset vector.
    pub const ROM_BASE: u32 = 0x8001_0000;
    /// Reset vector pointing at the patch entry point.
    pub const RESET_VECTOR: u32 = 0x84;

    pub const HALT_ALL: u8 = 0b1111;

    bitfield! {
        #[derive(Copy, Clone, Default, Eq, PartialEq)]
        pub struct MiscCntl(u32);
        impl Debug;
        /// Per-core halt requests.
        pub u8, halt, set_halt: 7, 4;
        pub soft_reset, set_soft_reset: 12;
    }
}

/// Progress values written to [`regs::POSTCODE`].
#[derive(Clone, Copy, Debug, PartialEq, Eq, docsplay::Display)]
#[repr(u8)]
pub enum Postcode {
    /// patch write in progress
    PatchStart = 0xF2,
    /// patch write complete
    PatchDone = 0xF3,
    /// patch verification failed
    VerifyFailed = 0x06,
}

impl Postcode {
    pub fn value(self) -> u32 {
        self as u8 as u32
    }
}

/// First word that did not read back as written.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Mismatch {
    pub index: usize,
    pub addr: u32,
    pub expected: u32,
    pub actual: u32,
}

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum LoaderError {
    #[error(transparent)]
    Transport(#[from] TransportError),
    #[error("Bootcode mismatch at {:#05x}: expected {:#010x}, actual {:#010x}", .0.addr, .0.expected, .0.actual)]
    Mismatch(Mismatch),
}

fn write_postcode<T: DebugTransport + ?Sized>(t: &mut T, code: Postcode) -> Result<(), TransportError> {
    debug!("postcode {:#04x}: {}", code as u8, code);
    t.write_word(regs::POSTCODE, code.value())
}

/// Set the bits chosen by `f` in MISC_CNTL, then clear them again.
///
/// Both halves are read-modify-write. If clearing fails, a last clearing
/// write of the value read first is attempted before the error is returned.
fn pulse<T, F>(t: &mut T, f: F) -> Result<(), TransportError>
where
    T: DebugTransport + ?Sized,
    F: Fn(&mut MiscCntl, bool),
{
    let mut cntl = MiscCntl(t.read_word(regs::MISC_CNTL)?);
    f(&mut cntl, true);
    t.write_word(regs::MISC_CNTL, cntl.0)?;

    let cleared = match t.read_word(regs::MISC_CNTL) {
        Ok(value) => {
            let mut cntl = MiscCntl(value);
            f(&mut cntl, false);
            t.write_word(regs::MISC_CNTL, cntl.0)
        }
        Err(e) => Err(e),
    };

    if let Err(e) = cleared {
        f(&mut cntl, false);
        let _ = t.write_word(regs::MISC_CNTL, cntl.0);
        return Err(e);
    }
    Ok(())
}

fn halt_pulse<T: DebugTransport + ?Sized>(t: &mut T) -> Result<(), TransportError> {
    pulse(t, |cntl, on| cntl.set_halt(if on { regs::HALT_ALL } else { 0 }))
}

/// Halt the core and write `patch` to byte address `addr`.
#[tracing::instrument(skip(t, patch), fields(words = patch.len()))]
pub fn apply<T: DebugTransport + ?Sized>(t: &mut T, patch: &BootPatch, addr: u32) -> Result<(), TransportError> {
    t.reset()?;

    halt_pulse(t)?;

    t.write_word(regs::GPIO_TRIEN, regs::GPIO_TRIEN_POSTCODE)?;

    write_postcode(t, Postcode::PatchStart)?;
    t.write_block(addr, patch.words())?;
    write_postcode(t, Postcode::PatchDone)?;

    info!("wrote {} words of bootcode at {:#x}", patch.len(), addr);
    Ok(())
}

/// Read `patch` back from byte address `addr`, stopping at the first word
/// that differs.
#[tracing::instrument(skip(t, patch), fields(words = patch.len()))]
pub fn verify<T: DebugTransport + ?Sized>(t: &mut T, patch: &BootPatch, addr: u32) -> Result<(), LoaderError> {
    for (index, &expected) in patch.words().iter().enumerate() {
        let word_addr = addr.wrapping_add(index as u32 * 4);
        let actual = t.read_word(word_addr)?;

        if actual != expected {
            let mismatch = Mismatch {
                index,
                addr: word_addr,
                expected,
                actual,
            };
            error!(
                "Bootcode mismatch at {:03x}. expected: {:08x} actual: {:08x}",
                word_addr, expected, actual
            );
            write_postcode(t, Postcode::VerifyFailed)?;
            return Err(LoaderError::Mismatch(mismatch));
        }
    }

    info!("bootcode write verified");
    Ok(())
}

/// Point the reset vector at the patch and pulse the core's soft reset.
#[tracing::instrument(skip(t))]
pub fn soft_reset_target<T: DebugTransport + ?Sized>(t: &mut T) -> Result<(), TransportError> {
    t.reset()?;

    halt_pulse(t)?;

    t.write_word(regs::ROM_BASE, regs::RESET_VECTOR)?;

    pulse(t, |cntl, on| cntl.set_soft_reset(on))?;

    info!("target core released from soft reset");
    Ok(())
}
