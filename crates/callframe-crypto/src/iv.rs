//! Per-stream IV seeds and per-frame IV construction.

use crate::derivation::IV_SIZE;

/// 12-byte IV seed bound to one (participant, stream) pair.
///
/// The per-frame IV is the seed with its first 8 bytes XORed by
/// `frame_id (u32 BE) || generation (u32 BE)`. Within one generation the
/// frame counter never repeats, so neither does the IV.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct IvSeed([u8; IV_SIZE]);

impl IvSeed {
    /// Wrap raw seed bytes.
    #[must_use]
    pub fn from_bytes(bytes: [u8; IV_SIZE]) -> Self {
        Self(bytes)
    }

    /// Raw seed bytes.
    #[must_use]
    pub fn as_bytes(&self) -> &[u8; IV_SIZE] {
        &self.0
    }

    /// IV for one frame.
    ///
    /// Only the low 32 bits of `generation` enter the IV. Generations that
    /// collide modulo 2^32 have unrelated media keys.
    #[must_use]
    pub fn frame_iv(&self, frame_id: u32, generation: u64) -> [u8; IV_SIZE] {
        let mut mask = [0u8; 8];
        mask[..4].copy_from_slice(&frame_id.to_be_bytes());
        mask[4..].copy_from_slice(&(generation as u32).to_be_bytes());

        let mut iv = self.0;
        for (byte, m) in iv.iter_mut().zip(mask) {
            *byte ^= m;
        }
        iv
    }
}
