//! Host chain events.

use randpa_types::{BlockId, PublicKey, SessionId};
use std::collections::BTreeSet;

/// A block was accepted by the host chain.
#[derive(Debug, Clone)]
pub struct AcceptedBlock {
    pub block_id: BlockId,
    pub prev_block_id: BlockId,
    /// The block signer.
    pub creator_key: PublicKey,
    /// The active block-producer set as of this block.
    pub active_bp_keys: BTreeSet<PublicKey>,
    /// True while catching up (block timestamp older than the sync age);
    /// sync blocks extend the tree but are never voted on.
    pub sync: bool,
}

/// The host chain marked a block irreversible.
#[derive(Debug, Clone)]
pub struct IrreversibleBlock {
    pub block_id: BlockId,
}

/// The transport opened a new peer session.
#[derive(Debug, Clone)]
pub struct NewPeer {
    pub session_id: SessionId,
}

/// The closed set of host chain events.
#[derive(Debug, Clone)]
pub enum ChainEvent {
    AcceptedBlock(AcceptedBlock),
    IrreversibleBlock(IrreversibleBlock),
    NewPeer(NewPeer),
}

impl ChainEvent {
    /// Human-readable variant name for logging.
    pub fn type_name(&self) -> &'static str {
        match self {
            ChainEvent::AcceptedBlock(_) => "AcceptedBlock",
            ChainEvent::IrreversibleBlock(_) => "IrreversibleBlock",
            ChainEvent::NewPeer(_) => "NewPeer",
        }
    }
}
