//! Block identifiers.

use serde::{Deserialize, Serialize};
use std::fmt;

/// A 256-bit opaque block identifier.
///
/// The first 32 bits, interpreted as a big-endian integer, carry the block
/// height. That is the only numeric ordering the gadget uses; everything else
/// about the id is opaque and compared bitwise.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, Default)]
pub struct BlockId(pub [u8; 32]);

impl BlockId {
    /// The all-zero id, used as the pre-genesis sentinel (height 0).
    pub const ZERO: BlockId = BlockId([0u8; 32]);

    /// Block height embedded in the id prefix.
    pub fn height(&self) -> u32 {
        u32::from_be_bytes([self.0[0], self.0[1], self.0[2], self.0[3]])
    }

    /// Build an id carrying `height` in its prefix with the given suffix
    /// bytes. Mostly useful for tests and simulation; production ids come
    /// from the host chain as-is.
    pub fn with_height(height: u32, suffix: &[u8]) -> Self {
        let mut bytes = [0u8; 32];
        bytes[..4].copy_from_slice(&height.to_be_bytes());
        let n = suffix.len().min(28);
        bytes[4..4 + n].copy_from_slice(&suffix[..n]);
        BlockId(bytes)
    }

    /// Raw bytes of the id.
    pub fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }
}

impl fmt::Debug for BlockId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "BlockId(h={}, ", self.height())?;
        for b in &self.0[4..8] {
            write!(f, "{:02x}", b)?;
        }
        write!(f, "..)")
    }
}

impl fmt::Display for BlockId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for b in &self.0 {
            write!(f, "{:02x}", b)?;
        }
        Ok(())
    }
}
