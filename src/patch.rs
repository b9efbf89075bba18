use std::sync::Arc;

use scroll::{Pread, LE};

#[derive(Debug, thiserror::Error)]
pub enum PatchError {
    #[error("Patch image is {len} bytes, not a whole number of 32-bit words.")]
    Misaligned { len: usize },
    #[error("Patch image is empty.")]
    Empty,
    #[error("Patch image could not be decoded: {0}")]
    Decode(#[from] scroll::Error),
}

/// Boot code to be written into the target's instruction memory.
///
/// Cloning is cheap, the words are shared.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct BootPatch {
    words: Arc<[u32]>,
    base: u32,
}

impl BootPatch {
    /// `base` is the byte address the first word is written to.
    pub fn new(words: impl Into<Arc<[u32]>>, base: u32) -> Result<Self, PatchError> {
        let words = words.into();
        if words.is_empty() {
            return Err(PatchError::Empty);
        }
        Ok(Self { words, base })
    }

    /// Decode a boot image stored as little-endian words.
    pub fn from_le_bytes(bytes: &[u8], base: u32) -> Result<Self, PatchError> {
        if bytes.len() % 4 != 0 {
            return Err(PatchError::Misaligned { len: bytes.len() });
        }

        let words = (0..bytes.len())
            .step_by(4)
            .map(|offset| bytes.pread_with::<u32>(offset, LE))
            .collect::<Result<Vec<_>, _>>()?;
        Self::new(words, base)
    }

    pub fn words(&self) -> &[u32] {
        &self.words
    }

    pub fn len(&self) -> usize {
        self.words.len()
    }

    pub fn is_empty(&self) -> bool {
        self.words.is_empty()
    }

    pub fn base(&self) -> u32 {
        self.base
    }

    /// Byte address of word `index`.
    pub fn addr_of(&self, index: usize) -> u32 {
        self.base.wrapping_add(index as u32 * 4)
    }
}
