//! Contiguous block paths.

use crate::BlockId;
use serde::{Deserialize, Serialize};

/// A contiguous path of blocks.
///
/// `blocks[0]` is a child of `base_block`, `blocks[i]` a child of
/// `blocks[i - 1]`. The base is typically an ancestor the receiver already
/// knows, so a chain can be grafted onto an existing tree.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Chain {
    pub base_block: BlockId,
    pub blocks: Vec<BlockId>,
}

impl Chain {
    pub fn new(base_block: BlockId, blocks: Vec<BlockId>) -> Self {
        Self { base_block, blocks }
    }

    /// The deepest block named by this chain.
    pub fn head(&self) -> BlockId {
        *self.blocks.last().unwrap_or(&self.base_block)
    }
}
