//! Signed wire payloads.

use randpa_types::{BlockId, SessionId, SignedEnvelope};
use serde::{Deserialize, Serialize};
use std::time::Instant;

/// Transport message type ids start here to avoid colliding with other
/// overlays on the same connection; a payload's id is `MSG_TYPE_BASE + tag`.
pub const MSG_TYPE_BASE: u32 = 100;

/// Handshake sent to a fresh peer session, carrying our LIB.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Handshake {
    pub lib: BlockId,
}

/// Reply to a [`Handshake`], carrying the responder's LIB.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HandshakeAns {
    pub lib: BlockId,
}

/// A prevote names a chain the voter supports.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Prevote {
    pub round_num: u32,
    pub base_block: BlockId,
    pub blocks: Vec<BlockId>,
}

/// A precommit names the block that reached the prevote quorum.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Precommit {
    pub round_num: u32,
    pub block_id: BlockId,
}

pub type PrevoteEnvelope = SignedEnvelope<Prevote>;
pub type PrecommitEnvelope = SignedEnvelope<Precommit>;
pub type ProofEnvelope = SignedEnvelope<Proof>;

/// A bundle of prevotes and precommits sufficient to convince any verifier
/// that `best_block` has been finalized.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Proof {
    pub round_num: u32,
    pub best_block: BlockId,
    pub prevotes: Vec<PrevoteEnvelope>,
    pub precommits: Vec<PrecommitEnvelope>,
}

/// The closed set of wire payloads.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum NetworkMessage {
    Handshake(SignedEnvelope<Handshake>),
    HandshakeAns(SignedEnvelope<HandshakeAns>),
    Prevote(PrevoteEnvelope),
    Precommit(PrecommitEnvelope),
    Proof(ProofEnvelope),
}

impl NetworkMessage {
    /// Wire tag of this variant.
    pub fn tag(&self) -> u32 {
        match self {
            NetworkMessage::Handshake(_) => 0,
            NetworkMessage::HandshakeAns(_) => 1,
            NetworkMessage::Prevote(_) => 2,
            NetworkMessage::Precommit(_) => 3,
            NetworkMessage::Proof(_) => 4,
        }
    }

    /// Transport message type id (`MSG_TYPE_BASE + tag`).
    pub fn msg_type_id(&self) -> u32 {
        MSG_TYPE_BASE + self.tag()
    }

    /// Human-readable variant name for logging.
    pub fn type_name(&self) -> &'static str {
        match self {
            NetworkMessage::Handshake(_) => "Handshake",
            NetworkMessage::HandshakeAns(_) => "HandshakeAns",
            NetworkMessage::Prevote(_) => "Prevote",
            NetworkMessage::Precommit(_) => "Precommit",
            NetworkMessage::Proof(_) => "Proof",
        }
    }
}

/// An inbound network message, tagged with the session it arrived on and
/// the wall-clock time it was received (used by the queue's expiration
/// shedding).
#[derive(Debug, Clone)]
pub struct NetMessage {
    pub session_id: SessionId,
    pub data: NetworkMessage,
    pub receive_time: Instant,
}

impl NetMessage {
    pub fn new(session_id: SessionId, data: NetworkMessage) -> Self {
        Self {
            session_id,
            data,
            receive_time: Instant::now(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use randpa_types::PrivateKey;

    fn test_key(seed: u8) -> PrivateKey {
        let mut bytes = [0u8; 32];
        bytes[31] = seed;
        PrivateKey::from_bytes(&bytes).unwrap()
    }

    #[test]
    fn tags_match_the_wire_table() {
        let key = test_key(1);
        let lib = BlockId::with_height(1, b"lib");

        let msgs = [
            NetworkMessage::Handshake(SignedEnvelope::new(Handshake { lib }, &key)),
            NetworkMessage::HandshakeAns(SignedEnvelope::new(HandshakeAns { lib }, &key)),
            NetworkMessage::Prevote(SignedEnvelope::new(
                Prevote {
                    round_num: 0,
                    base_block: lib,
                    blocks: vec![],
                },
                &key,
            )),
            NetworkMessage::Precommit(SignedEnvelope::new(
                Precommit {
                    round_num: 0,
                    block_id: lib,
                },
                &key,
            )),
            NetworkMessage::Proof(SignedEnvelope::new(
                Proof {
                    round_num: 0,
                    best_block: lib,
                    prevotes: vec![],
                    precommits: vec![],
                },
                &key,
            )),
        ];

        for (tag, msg) in msgs.iter().enumerate() {
            assert_eq!(msg.tag(), tag as u32);
            assert_eq!(msg.msg_type_id(), MSG_TYPE_BASE + tag as u32);
        }
    }

    #[test]
    fn payload_serde_round_trip() {
        let key = test_key(2);
        let prevote = Prevote {
            round_num: 9,
            base_block: BlockId::with_height(17, b"base"),
            blocks: vec![BlockId::with_height(18, b"a"), BlockId::with_height(19, b"b")],
        };
        let msg = NetworkMessage::Prevote(SignedEnvelope::new(prevote, &key));

        let bytes = bincode::serialize(&msg).unwrap();
        let back: NetworkMessage = bincode::deserialize(&bytes).unwrap();
        assert_eq!(back, msg);

        if let NetworkMessage::Prevote(env) = back {
            assert_eq!(env.public_key().unwrap(), key.public_key());
        } else {
            panic!("expected prevote");
        }
    }
}
