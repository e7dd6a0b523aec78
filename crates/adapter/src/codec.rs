//! Wire framing.
//!
//! Each payload travels as its bincode encoding under a transport message
//! type id of `100 + tag`, so the overlay never collides with other
//! protocols sharing the connection.

use randpa_messages::{NetworkMessage, MSG_TYPE_BASE};
use thiserror::Error;

/// Errors from message encoding and decoding.
#[derive(Debug, Error)]
pub enum CodecError {
    #[error("unknown message type id: {0}")]
    UnknownMsgType(u32),

    #[error("encode error: {0}")]
    Encode(String),

    #[error("decode error: {0}")]
    Decode(String),
}

/// Encode an outbound message: its transport type id plus the payload bytes.
pub fn encode_message(message: &NetworkMessage) -> Result<(u32, Vec<u8>), CodecError> {
    let payload = match message {
        NetworkMessage::Handshake(env) => bincode::serialize(env),
        NetworkMessage::HandshakeAns(env) => bincode::serialize(env),
        NetworkMessage::Prevote(env) => bincode::serialize(env),
        NetworkMessage::Precommit(env) => bincode::serialize(env),
        NetworkMessage::Proof(env) => bincode::serialize(env),
    }
    .map_err(|e| CodecError::Encode(e.to_string()))?;

    Ok((message.msg_type_id(), payload))
}

/// Decode an inbound payload according to its transport type id.
pub fn decode_message(msg_type_id: u32, payload: &[u8]) -> Result<NetworkMessage, CodecError> {
    let tag = msg_type_id
        .checked_sub(MSG_TYPE_BASE)
        .ok_or(CodecError::UnknownMsgType(msg_type_id))?;

    let decode_err = |e: bincode::Error| CodecError::Decode(e.to_string());
    match tag {
        0 => bincode::deserialize(payload)
            .map(NetworkMessage::Handshake)
            .map_err(decode_err),
        1 => bincode::deserialize(payload)
            .map(NetworkMessage::HandshakeAns)
            .map_err(decode_err),
        2 => bincode::deserialize(payload)
            .map(NetworkMessage::Prevote)
            .map_err(decode_err),
        3 => bincode::deserialize(payload)
            .map(NetworkMessage::Precommit)
            .map_err(decode_err),
        4 => bincode::deserialize(payload)
            .map(NetworkMessage::Proof)
            .map_err(decode_err),
        _ => Err(CodecError::UnknownMsgType(msg_type_id)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use randpa_messages::{Handshake, Precommit, Prevote, Proof};
    use randpa_types::{BlockId, PrivateKey, SignedEnvelope};

    fn key(seed: u8) -> PrivateKey {
        let mut bytes = [0u8; 32];
        bytes[31] = seed;
        PrivateKey::from_bytes(&bytes).unwrap()
    }

    #[test]
    fn every_variant_round_trips() {
        let k = key(1);
        let lib = BlockId::with_height(3, b"lib");
        let block = BlockId::with_height(5, b"blk");

        let messages = vec![
            NetworkMessage::Handshake(SignedEnvelope::new(Handshake { lib }, &k)),
            NetworkMessage::HandshakeAns(SignedEnvelope::new(
                randpa_messages::HandshakeAns { lib },
                &k,
            )),
            NetworkMessage::Prevote(SignedEnvelope::new(
                Prevote {
                    round_num: 2,
                    base_block: lib,
                    blocks: vec![block],
                },
                &k,
            )),
            NetworkMessage::Precommit(SignedEnvelope::new(
                Precommit {
                    round_num: 2,
                    block_id: block,
                },
                &k,
            )),
            NetworkMessage::Proof(SignedEnvelope::new(
                Proof {
                    round_num: 2,
                    best_block: block,
                    prevotes: vec![],
                    precommits: vec![],
                },
                &k,
            )),
        ];

        for (i, msg) in messages.into_iter().enumerate() {
            let (msg_type_id, payload) = encode_message(&msg).unwrap();
            assert_eq!(msg_type_id, 100 + i as u32);
            let back = decode_message(msg_type_id, &payload).unwrap();
            assert_eq!(back, msg);
        }
    }

    #[test]
    fn unknown_type_ids_are_rejected() {
        assert!(matches!(
            decode_message(99, &[]),
            Err(CodecError::UnknownMsgType(99))
        ));
        assert!(matches!(
            decode_message(105, &[]),
            Err(CodecError::UnknownMsgType(105))
        ));
    }

    #[test]
    fn truncated_payloads_are_rejected() {
        let k = key(1);
        let msg = NetworkMessage::Handshake(SignedEnvelope::new(
            Handshake {
                lib: BlockId::ZERO,
            },
            &k,
        ));
        let (msg_type_id, payload) = encode_message(&msg).unwrap();
        assert!(matches!(
            decode_message(msg_type_id, &payload[..payload.len() / 2]),
            Err(CodecError::Decode(_))
        ));
    }
}
