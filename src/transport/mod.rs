//! Debug transport: the capability set the loader drives the target through.
pub mod bitbang;
pub mod emulated;
pub mod tdr;

use bitvec::prelude::*;

/// An error in the communication with the target's TAP.
#[derive(Debug, thiserror::Error, Clone, Copy, PartialEq, Eq)]
pub enum TransportError {
    /// The link was used before `init` or after `teardown`.
    #[error("Debug transport is not initialized.")]
    NotReady,
    /// The request itself was malformed.
    #[error("Invalid argument: {0}")]
    InvalidArgument(&'static str),
    /// A pin could not be read or driven.
    #[error("Pin access failed: {0:?}")]
    Pin(embedded_hal::digital::ErrorKind),
    /// A direct memory access fell outside the backing memory.
    #[error("Address {addr:#010x} is outside of target memory.")]
    OutOfRange { addr: u32 },
}

impl TransportError {
    pub(crate) fn pin<E: embedded_hal::digital::Error>(e: E) -> Self {
        TransportError::Pin(e.kind())
    }
}

/// Where a data register scan leaves the TAP.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ScanEnd {
    /// Run-Test/Idle, ready for a new instruction.
    Idle,
    /// Select-DR-Scan, ready to chain another data register scan.
    SelectDr,
}

/// Operations every JTAG backend provides.
///
/// Shift operations advance the TAP state machine and are not idempotent.
/// `update_ir` expects the TAP in Run-Test/Idle and leaves it in
/// Select-DR-Scan; `update_dr` expects Select-DR-Scan and leaves it as
/// requested by [`ScanEnd`].
pub trait DebugTransport {
    /// Take control of the link. Everything except `teardown` fails with
    /// [`TransportError::NotReady`] until this succeeds.
    fn init(&mut self) -> Result<(), TransportError>;

    /// Return the TAP to Run-Test/Idle through Test-Logic-Reset.
    fn reset(&mut self) -> Result<(), TransportError>;

    /// Shift out the identification value of the target.
    fn read_id(&mut self) -> Result<u32, TransportError>;

    /// Clock TCK `count` times without touching TMS/TDI.
    fn tick(&mut self, count: u32) -> Result<(), TransportError>;

    /// Shift `bits` (LSB first) into the instruction register and update it.
    /// An empty slice is a no-op.
    fn update_ir(&mut self, bits: &BitSlice<u8, Lsb0>) -> Result<(), TransportError>;

    /// Shift `bits` (LSB first) through the data register and update it,
    /// returning the bits shifted out. An empty slice is a no-op.
    fn update_dr(&mut self, bits: &BitSlice<u8, Lsb0>, end: ScanEnd) -> Result<BitVec<u8, Lsb0>, TransportError>;

    /// Release the link.
    fn teardown(&mut self) -> Result<(), TransportError>;

    /// Read one word of target memory.
    fn read_word(&mut self, addr: u32) -> Result<u32, TransportError> {
        tdr::axi_read(self, addr)
    }

    /// Write one word of target memory.
    fn write_word(&mut self, addr: u32, value: u32) -> Result<(), TransportError> {
        tdr::axi_write(self, addr, value)
    }

    /// Write consecutive words starting at `addr`.
    fn write_block(&mut self, addr: u32, words: &[u32]) -> Result<(), TransportError> {
        for (i, word) in words.iter().enumerate() {
            self.write_word(addr.wrapping_add(i as u32 * 4), *word)?;
        }
        Ok(())
    }

    /// Check that the target's bus answers a read of `addr`.
    fn wait_bus(&mut self, addr: u32) -> Result<bool, TransportError> {
        tdr::axi_wait(self, addr)
    }
}

/// Low `len` bits of `value`, LSB first. At most 64 bits.
pub fn bits(value: u64, len: usize) -> Result<BitVec<u8, Lsb0>, TransportError> {
    if len > 64 {
        return Err(TransportError::InvalidArgument("scan longer than 64 bits"));
    }

    let mut bv = bitvec![u8, Lsb0; 0; len];
    if len > 0 {
        bv.store_le(value);
    }
    Ok(bv)
}

/// Inverse of [`bits`], for scans of at most 64 bits.
pub fn value(bits: &BitSlice<u8, Lsb0>) -> u64 {
    match bits.len() {
        0 => 0,
        1..=64 => bits.load_le(),
        _ => bits[..64].load_le(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bits_are_lsb_first() {
        let bv = bits(0b1101, 5).unwrap();
        assert_eq!(bv.len(), 5);
        assert!(bv[0]);
        assert!(!bv[1]);
        assert!(bv[2]);
        assert!(bv[3]);
        assert!(!bv[4]);
        assert_eq!(value(&bv), 0b1101);
    }

    #[test]
    fn bits_truncate_to_len() {
        assert_eq!(value(&bits(0xFFFF, 4).unwrap()), 0xF);
        assert_eq!(value(&bits(0x1_0000_0000 | 0x1234, 37).unwrap()), 0x1_0000_1234);
        assert!(bits(0xFF, 0).unwrap().is_empty());
    }

    #[test]
    fn oversized_scan_is_rejected() {
        assert!(bits(0, 64).is_ok());
        assert_eq!(
            bits(0, 65),
            Err(TransportError::InvalidArgument("scan longer than 64 bits"))
        );
    }
}
