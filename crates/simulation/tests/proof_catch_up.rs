//! Proof-only catch-up: a late joiner whose blocks all arrive as sync
//! blocks advances its LIB purely on forwarded proofs, without ever casting
//! a vote.

use randpa_finality::{Config, Engine, Output, PrefixTree};
use randpa_messages::{
    AcceptedBlock, ChainEvent, Handshake, IrreversibleBlock, NetMessage, NetworkMessage,
    Precommit, PrecommitEnvelope, Prevote, PrevoteEnvelope, Proof, ProofEnvelope, RandpaMessage,
};
use randpa_types::{BlockId, PrivateKey, PublicKey, SignedEnvelope};
use std::collections::BTreeSet;
use std::time::Instant;

fn key(seed: u8) -> PrivateKey {
    let mut bytes = [0u8; 32];
    bytes[31] = seed;
    PrivateKey::from_bytes(&bytes).unwrap()
}

fn block(height: u32) -> BlockId {
    BlockId::with_height(height, b"chain")
}

fn net(msg: NetworkMessage) -> RandpaMessage {
    RandpaMessage::Net(NetMessage {
        session_id: 1,
        data: msg,
        receive_time: Instant::now(),
    })
}

/// A valid proof for `best` signed by every producer in `seeds`.
fn proof_for(best: BlockId, base: BlockId, seeds: &[u8]) -> Proof {
    let round_num = (best.height() - 1) / 2;
    let prevotes: Vec<PrevoteEnvelope> = seeds
        .iter()
        .map(|&s| {
            SignedEnvelope::new(
                Prevote {
                    round_num,
                    base_block: base,
                    blocks: vec![best],
                },
                &key(s),
            )
        })
        .collect();
    let precommits: Vec<PrecommitEnvelope> = seeds
        .iter()
        .map(|&s| {
            SignedEnvelope::new(
                Precommit {
                    round_num,
                    block_id: best,
                },
                &key(s),
            )
        })
        .collect();
    Proof {
        round_num,
        best_block: best,
        prevotes,
        precommits,
    }
}

#[test]
fn lib_advances_to_ten_on_proofs_alone() {
    let producers: Vec<u8> = vec![1, 2, 3];
    let bp_keys: BTreeSet<PublicKey> = producers.iter().map(|&s| key(s).public_key()).collect();

    // A late joiner with its own key and one connected peer.
    let mut engine = Engine::new(Config::default(), Some(key(9)), PrefixTree::new(BlockId::ZERO));
    let mut outputs = Vec::new();
    outputs.extend(engine.handle(net(NetworkMessage::Handshake(SignedEnvelope::new(
        Handshake {
            lib: BlockId::ZERO,
        },
        &key(1),
    )))));

    // The whole chain arrives flagged as sync: the tree grows, no voting.
    let mut prev = BlockId::ZERO;
    for height in 1..=10 {
        outputs.extend(engine.handle(RandpaMessage::Event(ChainEvent::AcceptedBlock(
            AcceptedBlock {
                block_id: block(height),
                prev_block_id: prev,
                creator_key: key(1).public_key(),
                active_bp_keys: bp_keys.clone(),
                sync: true,
            },
        ))));
        prev = block(height);
    }
    assert!(engine.round_state().is_none());

    // Proofs for heights 1..=10 arrive in order; each one finalizes and the
    // host answers with the irreversible event.
    let mut base = BlockId::ZERO;
    for height in 1..=10 {
        let env = ProofEnvelope::new(proof_for(block(height), base, &[1, 2, 3]), &key(1));
        let batch = engine.handle(net(NetworkMessage::Proof(env)));

        assert!(
            batch
                .iter()
                .any(|o| matches!(o, Output::Finalized(b) if *b == block(height))),
            "height {height} should finalize"
        );
        outputs.extend(batch);

        outputs.extend(engine.handle(RandpaMessage::Event(ChainEvent::IrreversibleBlock(
            IrreversibleBlock {
                block_id: block(height),
            },
        ))));
        base = block(height);
    }

    assert_eq!(engine.lib().height(), 10);
    assert_eq!(engine.tree().root().block_id, block(10));

    // Not one vote went out; only handshake answers and forwarded proofs.
    for output in &outputs {
        if let Output::Send { message, .. } = output {
            assert!(
                !matches!(
                    message,
                    NetworkMessage::Prevote(_) | NetworkMessage::Precommit(_)
                ),
                "the catch-up node must never vote"
            );
        }
    }
}

#[test]
fn replayed_proofs_below_lib_are_ignored() {
    let producers: Vec<u8> = vec![1, 2, 3];
    let bp_keys: BTreeSet<PublicKey> = producers.iter().map(|&s| key(s).public_key()).collect();

    let mut engine = Engine::new(Config::default(), None, PrefixTree::new(BlockId::ZERO));
    let mut prev = BlockId::ZERO;
    for height in 1..=4 {
        engine.handle(RandpaMessage::Event(ChainEvent::AcceptedBlock(
            AcceptedBlock {
                block_id: block(height),
                prev_block_id: prev,
                creator_key: key(1).public_key(),
                active_bp_keys: bp_keys.clone(),
                sync: true,
            },
        )));
        prev = block(height);
    }

    let env = ProofEnvelope::new(proof_for(block(3), block(2), &[1, 2, 3]), &key(2));
    let outputs = engine.handle(net(NetworkMessage::Proof(env.clone())));
    assert!(outputs
        .iter()
        .any(|o| matches!(o, Output::Finalized(b) if *b == block(3))));
    engine.handle(RandpaMessage::Event(ChainEvent::IrreversibleBlock(
        IrreversibleBlock {
            block_id: block(3),
        },
    )));

    // The same proof again, and an older one: both skipped.
    assert!(engine.handle(net(NetworkMessage::Proof(env))).is_empty());
    let stale = ProofEnvelope::new(proof_for(block(1), BlockId::ZERO, &[1, 2, 3]), &key(2));
    assert!(engine.handle(net(NetworkMessage::Proof(stale))).is_empty());
}
