//! The host seams.

use randpa_types::{BlockId, PublicKey, SessionId};
use std::collections::BTreeSet;
use std::time::SystemTime;

/// What the gadget needs to know about one accepted block.
#[derive(Debug, Clone)]
pub struct BlockState {
    pub block_id: BlockId,
    pub prev_block_id: BlockId,
    /// The block signer.
    pub signing_key: PublicKey,
    /// Active producer schedule as of this block.
    pub active_schedule: BTreeSet<PublicKey>,
    /// Host wall-clock timestamp of the block.
    pub timestamp: SystemTime,
}

/// The host chain operations the gadget relies on.
///
/// Implementations are called from the gadget's worker thread and from
/// channel subscribers; `bft_finalize` in particular must hop to the host's
/// own executor rather than calling chain internals inline.
pub trait HostChain: Send + Sync {
    fn fetch_block_state_by_id(&self, id: &BlockId) -> Option<BlockState>;
    fn active_producers(&self) -> BTreeSet<PublicKey>;
    fn last_irreversible_block_id(&self) -> BlockId;
    fn head_block_state(&self) -> Option<BlockState>;
    /// Apply a finalization decision. Fire-and-forget: failures after host
    /// shutdown are silently dropped.
    fn bft_finalize(&self, id: &BlockId);
}

/// The host's peer-to-peer transport.
pub trait Transport: Send + Sync {
    /// Send an already-framed payload to one peer session.
    fn send(&self, session_id: SessionId, msg_type_id: u32, payload: Vec<u8>);
}
