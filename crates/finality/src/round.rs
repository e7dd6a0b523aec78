//! A single finality round.
//!
//! One round spans `round_width` blocks: a prevote phase in which voters name
//! the chain they support, and a precommit phase in which voters commit to
//! the block that reached the prevote quorum. The round is a synchronous
//! state machine; everything it wants sent or reported is returned as a
//! [`RoundAction`] for the engine to execute.

use crate::tree::{NodeIdx, PrefixTree};
use randpa_messages::{
    NetworkMessage, Precommit, PrecommitEnvelope, Prevote, PrevoteEnvelope, Proof,
};
use randpa_types::{BlockId, Chain, PrivateKey, PublicKey};
use std::collections::BTreeSet;
use tracing::{debug, warn};

/// Round phase. Only the transitions listed in the module docs occur.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RoundState {
    Init,
    Prevote,
    ReadyToPrecommit,
    Precommit,
    Done,
    Fail,
}

/// Something the round wants the engine to do.
#[derive(Debug, Clone)]
pub enum RoundAction {
    /// Gossip a message to all peers.
    Broadcast(NetworkMessage),
    /// The round reached supermajority; the proof is complete.
    Done(Proof),
}

/// A single two-phase voting round.
pub struct Round {
    num: u32,
    /// Producer of the round's first block; prevotes target the longest
    /// branch this producer has built.
    primary: PublicKey,
    state: RoundState,
    best_node: Option<NodeIdx>,
    proof: Proof,
    prevoted_keys: BTreeSet<PublicKey>,
    precommitted_keys: BTreeSet<PublicKey>,
    private_key: Option<PrivateKey>,
    is_active_bp: bool,
}

impl Round {
    /// Start a round. An active block producer immediately prevotes for the
    /// longest branch built by `primary`; everyone else enters the prevote
    /// phase passively and never emits votes.
    pub fn new(
        num: u32,
        primary: PublicKey,
        tree: &mut PrefixTree,
        private_key: Option<PrivateKey>,
        is_active_bp: bool,
    ) -> (Self, Vec<RoundAction>) {
        debug!(round = num, primary = %primary, is_active_bp, "round started");

        let mut round = Self {
            num,
            primary,
            state: RoundState::Init,
            best_node: None,
            proof: Proof {
                round_num: num,
                best_block: BlockId::ZERO,
                prevotes: Vec::new(),
                precommits: Vec::new(),
            },
            prevoted_keys: BTreeSet::new(),
            precommitted_keys: BTreeSet::new(),
            private_key,
            is_active_bp,
        };

        let actions = round.prevote(tree);
        (round, actions)
    }

    pub fn num(&self) -> u32 {
        self.num
    }

    pub fn state(&self) -> RoundState {
        self.state
    }

    /// Mark the round done on the strength of an externally verified proof.
    pub fn set_done(&mut self) {
        self.state = RoundState::Done;
    }

    /// The completed proof, available once the round is done.
    pub fn proof(&self) -> Option<&Proof> {
        (self.state == RoundState::Done).then_some(&self.proof)
    }

    /// Ingest a prevote. Invalid or out-of-phase prevotes are dropped.
    pub fn on_prevote(&mut self, tree: &mut PrefixTree, msg: &PrevoteEnvelope) {
        if self.state != RoundState::Prevote && self.state != RoundState::ReadyToPrecommit {
            debug!(round = self.num, state = ?self.state, "prevote in wrong state");
            return;
        }

        if !self.validate_prevote(tree, msg) {
            debug!(round = self.num, "prevote validation failed");
            return;
        }

        self.add_prevote(tree, msg.clone());
    }

    /// Ingest a precommit. Returns the done action when this precommit
    /// completes the supermajority.
    pub fn on_precommit(
        &mut self,
        tree: &PrefixTree,
        msg: &PrecommitEnvelope,
    ) -> Option<RoundAction> {
        if self.state != RoundState::Precommit && self.state != RoundState::ReadyToPrecommit {
            debug!(round = self.num, state = ?self.state, "precommit in wrong state");
            return None;
        }

        if !self.validate_precommit(tree, msg) {
            debug!(round = self.num, "precommit validation failed");
            return None;
        }

        self.add_precommit(tree, msg.clone())
    }

    /// The prevote sub-slot ended. Without a quorum the round fails; with
    /// one, the proof's prevote set is frozen and our precommit goes out.
    pub fn end_prevote(&mut self, tree: &PrefixTree) -> Vec<RoundAction> {
        match self.state {
            RoundState::ReadyToPrecommit => {}
            // Failing is only reachable out of the prevote phases; a round
            // already past them is left alone.
            RoundState::Init | RoundState::Prevote => {
                debug!(round = self.num, state = ?self.state, "round failed at end of prevote");
                self.state = RoundState::Fail;
                return Vec::new();
            }
            RoundState::Precommit | RoundState::Done | RoundState::Fail => {
                return Vec::new();
            }
        }

        let best = self.best_node.expect("ready state always has a best node");
        self.proof.round_num = self.num;
        self.proof.best_block = tree.node(best).block_id;
        self.proof.prevotes = tree.node(best).confirmations.values().cloned().collect();

        self.precommit(tree)
    }

    /// The round's terminal boundary. True iff the round is done; anything
    /// else becomes a failure.
    pub fn finish(&mut self) -> bool {
        if self.state != RoundState::Done {
            debug!(round = self.num, state = ?self.state, "round failed at finish");
            self.state = RoundState::Fail;
            return false;
        }
        true
    }

    fn prevote(&mut self, tree: &mut PrefixTree) -> Vec<RoundAction> {
        if !self.is_active_bp || self.private_key.is_none() {
            self.state = RoundState::Prevote;
            return Vec::new();
        }

        self.state = RoundState::Prevote;

        let Some(last) = tree.last_inserted_block(&self.primary) else {
            warn!(round = self.num, primary = %self.primary, "no block by primary in tree");
            return Vec::new();
        };

        let chain = tree.get_branch(last);
        let prevote = Prevote {
            round_num: self.num,
            base_block: chain.base_block,
            blocks: chain.blocks,
        };
        let key = self.private_key.as_ref().expect("checked above");
        let msg = PrevoteEnvelope::new(prevote, key);

        self.add_prevote(tree, msg.clone());
        vec![RoundAction::Broadcast(NetworkMessage::Prevote(msg))]
    }

    fn precommit(&mut self, tree: &PrefixTree) -> Vec<RoundAction> {
        debug_assert_eq!(self.state, RoundState::ReadyToPrecommit);
        self.state = RoundState::Precommit;

        if !self.is_active_bp {
            return Vec::new();
        }
        let Some(key) = self.private_key.as_ref() else {
            return Vec::new();
        };

        let best = self.best_node.expect("precommit always has a best node");
        let precommit = Precommit {
            round_num: self.num,
            block_id: tree.node(best).block_id,
        };
        let msg = PrecommitEnvelope::new(precommit, key);

        let mut actions = vec![RoundAction::Broadcast(NetworkMessage::Precommit(msg.clone()))];
        actions.extend(self.add_precommit(tree, msg));
        actions
    }

    fn validate_prevote(&self, tree: &PrefixTree, msg: &PrevoteEnvelope) -> bool {
        if msg.data.round_num != self.num {
            debug!(
                received = msg.data.round_num,
                expected = self.num,
                "prevote for wrong round"
            );
            return false;
        }

        let Ok(signer) = msg.public_key() else {
            debug!("prevote signature recovery failed");
            return false;
        };

        if self.prevoted_keys.contains(&signer) {
            debug!(signer = %signer, "duplicate prevote");
            return false;
        }

        let Some(target) = find_last_node(tree, &msg.data.base_block, &msg.data.blocks) else {
            debug!("prevote for unknown blocks");
            return false;
        };

        if !tree.node(target).active_bp_keys.contains(&signer) {
            debug!(signer = %signer, "prevote from inactive producer");
            return false;
        }

        true
    }

    fn validate_precommit(&self, tree: &PrefixTree, msg: &PrecommitEnvelope) -> bool {
        if msg.data.round_num != self.num {
            debug!(
                received = msg.data.round_num,
                expected = self.num,
                "precommit for wrong round"
            );
            return false;
        }

        let Ok(signer) = msg.public_key() else {
            debug!("precommit signature recovery failed");
            return false;
        };

        if self.precommitted_keys.contains(&signer) {
            debug!(signer = %signer, "duplicate precommit");
            return false;
        }

        let best = self.best_node.expect("precommit phase always has a best node");
        if msg.data.block_id != tree.node(best).block_id {
            debug!(
                block = %msg.data.block_id,
                best = %tree.node(best).block_id,
                "precommit for non-best block"
            );
            return false;
        }

        if !tree.node(best).has_confirmation(&signer) {
            debug!(signer = %signer, "precommit from peer that did not prevote");
            return false;
        }

        true
    }

    fn add_prevote(&mut self, tree: &mut PrefixTree, msg: PrevoteEnvelope) {
        let Ok(signer) = msg.public_key() else {
            return;
        };
        let chain = Chain::new(msg.data.base_block, msg.data.blocks.clone());

        let max_node = match tree.add_confirmations(&chain, signer, msg) {
            Ok(idx) => idx,
            Err(err) => {
                warn!(%err, "confirmation not insertable");
                return;
            }
        };

        self.prevoted_keys.insert(signer);
        debug!(
            round = self.num,
            from = %signer,
            max_confirmations = tree.node(max_node).confirmation_count(),
            "prevote recorded"
        );

        // Once the best node is fixed it never changes within this round;
        // later prevotes keep accumulating on the tree.
        if self.state != RoundState::ReadyToPrecommit && has_threshold(tree, max_node) {
            self.state = RoundState::ReadyToPrecommit;
            self.best_node = Some(max_node);
            debug!(
                round = self.num,
                best = %tree.node(max_node).block_id,
                "prevote threshold reached"
            );
        }
    }

    fn add_precommit(&mut self, tree: &PrefixTree, msg: PrecommitEnvelope) -> Option<RoundAction> {
        let signer = msg.public_key().ok()?;
        self.precommitted_keys.insert(signer);
        self.proof.precommits.push(msg);

        // Precommits arriving during ready-to-precommit accumulate; the
        // supermajority can only complete once the precommit phase began.
        let best = self.best_node.expect("precommit phase always has a best node");
        let bp_count = tree.node(best).active_bp_keys.len();
        if self.state == RoundState::Precommit && self.proof.precommits.len() > bp_count * 2 / 3 {
            debug!(
                round = self.num,
                best = %tree.node(best).block_id,
                "precommit threshold reached"
            );
            self.state = RoundState::Done;
            return Some(RoundAction::Done(self.proof.clone()));
        }
        None
    }
}

/// The deepest element of `[base_block, blocks..]` present in the tree.
fn find_last_node(tree: &PrefixTree, base_block: &BlockId, blocks: &[BlockId]) -> Option<NodeIdx> {
    blocks
        .iter()
        .rev()
        .find_map(|id| tree.find(id))
        .or_else(|| tree.find(base_block))
}

/// Strict 2/3+ quorum against the node's own active producer set.
fn has_threshold(tree: &PrefixTree, node: NodeIdx) -> bool {
    let node = tree.node(node);
    node.confirmation_count() > node.active_bp_keys.len() * 2 / 3
}

#[cfg(test)]
mod tests {
    use super::*;
    use randpa_types::Chain;
    use std::collections::BTreeSet;

    fn key(seed: u8) -> PrivateKey {
        let mut bytes = [0u8; 32];
        bytes[31] = seed;
        PrivateKey::from_bytes(&bytes).unwrap()
    }

    fn id(height: u32, tag: &[u8]) -> BlockId {
        BlockId::with_height(height, tag)
    }

    fn bp_set(seeds: &[u8]) -> BTreeSet<PublicKey> {
        seeds.iter().map(|&s| key(s).public_key()).collect()
    }

    /// A tree with root at height 0 and one block at height 1 built by
    /// `creator`, with the given producer set.
    fn tree_with_block(creator: u8, bps: &BTreeSet<PublicKey>) -> (PrefixTree, BlockId, BlockId) {
        let root = id(0, b"root");
        let b1 = id(1, b"a");
        let mut tree = PrefixTree::new(root);
        tree.insert(&Chain::new(root, vec![b1]), key(creator).public_key(), bps)
            .unwrap();
        (tree, root, b1)
    }

    fn prevote_for(seed: u8, round: u32, base: BlockId, blocks: Vec<BlockId>) -> PrevoteEnvelope {
        PrevoteEnvelope::new(
            Prevote {
                round_num: round,
                base_block: base,
                blocks,
            },
            &key(seed),
        )
    }

    fn precommit_for(seed: u8, round: u32, block: BlockId) -> PrecommitEnvelope {
        PrecommitEnvelope::new(
            Precommit {
                round_num: round,
                block_id: block,
            },
            &key(seed),
        )
    }

    #[test]
    fn active_bp_prevotes_on_construction() {
        let bps = bp_set(&[1, 2, 3]);
        let (mut tree, _, _) = tree_with_block(1, &bps);

        let (round, actions) = Round::new(
            0,
            key(1).public_key(),
            &mut tree,
            Some(key(1)),
            true,
        );

        assert_eq!(round.state(), RoundState::Prevote);
        assert_eq!(actions.len(), 1);
        assert!(matches!(
            actions[0],
            RoundAction::Broadcast(NetworkMessage::Prevote(_))
        ));
    }

    #[test]
    fn passive_round_emits_nothing() {
        let bps = bp_set(&[1, 2, 3]);
        let (mut tree, _, _) = tree_with_block(1, &bps);

        let (round, actions) = Round::new(0, key(1).public_key(), &mut tree, Some(key(9)), false);
        assert_eq!(round.state(), RoundState::Prevote);
        assert!(actions.is_empty());

        let (round, actions) = Round::new(0, key(1).public_key(), &mut tree, None, true);
        assert_eq!(round.state(), RoundState::Prevote);
        assert!(actions.is_empty());
    }

    #[test]
    fn quorum_moves_round_to_ready() {
        let bps = bp_set(&[1, 2, 3]);
        let (mut tree, root, b1) = tree_with_block(1, &bps);
        let (mut round, _) = Round::new(0, key(1).public_key(), &mut tree, Some(key(1)), true);

        // Own prevote is already in; one more of three is not a quorum.
        round.on_prevote(&mut tree, &prevote_for(2, 0, root, vec![b1]));
        assert_eq!(round.state(), RoundState::Prevote);

        round.on_prevote(&mut tree, &prevote_for(3, 0, root, vec![b1]));
        assert_eq!(round.state(), RoundState::ReadyToPrecommit);
    }

    #[test]
    fn rejects_wrong_round_duplicates_and_unknown_signers() {
        let bps = bp_set(&[1, 2, 3]);
        let (mut tree, root, b1) = tree_with_block(1, &bps);
        let (mut round, _) = Round::new(0, key(1).public_key(), &mut tree, Some(key(1)), true);

        // Wrong round.
        round.on_prevote(&mut tree, &prevote_for(2, 5, root, vec![b1]));
        // Signer not in the producer set.
        round.on_prevote(&mut tree, &prevote_for(9, 0, root, vec![b1]));
        // Duplicate of our own vote.
        round.on_prevote(&mut tree, &prevote_for(1, 0, root, vec![b1]));
        assert_eq!(round.state(), RoundState::Prevote);

        // Unknown target.
        round.on_prevote(
            &mut tree,
            &prevote_for(2, 0, id(8, b"nowhere"), vec![id(9, b"gone")]),
        );
        assert_eq!(round.state(), RoundState::Prevote);
    }

    #[test]
    fn end_prevote_without_quorum_fails_the_round() {
        let bps = bp_set(&[1, 2, 3]);
        let (mut tree, _, _) = tree_with_block(1, &bps);
        let (mut round, _) = Round::new(0, key(1).public_key(), &mut tree, Some(key(1)), true);

        let actions = round.end_prevote(&tree);
        assert!(actions.is_empty());
        assert_eq!(round.state(), RoundState::Fail);
        assert!(!round.finish());
    }

    #[test]
    fn full_round_reaches_done() {
        let bps = bp_set(&[1, 2, 3]);
        let (mut tree, root, b1) = tree_with_block(1, &bps);
        let (mut round, _) = Round::new(0, key(1).public_key(), &mut tree, Some(key(1)), true);

        round.on_prevote(&mut tree, &prevote_for(2, 0, root, vec![b1]));
        round.on_prevote(&mut tree, &prevote_for(3, 0, root, vec![b1]));
        assert_eq!(round.state(), RoundState::ReadyToPrecommit);

        // End of the prevote sub-slot: our precommit goes out.
        let actions = round.end_prevote(&tree);
        assert_eq!(round.state(), RoundState::Precommit);
        assert!(matches!(
            actions[0],
            RoundAction::Broadcast(NetworkMessage::Precommit(_))
        ));

        // Two more precommits complete the supermajority.
        assert!(round.on_precommit(&tree, &precommit_for(2, 0, b1)).is_none());
        let done = round.on_precommit(&tree, &precommit_for(3, 0, b1));
        assert!(matches!(done, Some(RoundAction::Done(_))));
        assert_eq!(round.state(), RoundState::Done);
        assert!(round.finish());

        let proof = round.proof().unwrap();
        assert_eq!(proof.round_num, 0);
        assert_eq!(proof.best_block, b1);
        assert_eq!(proof.prevotes.len(), 3);
        assert_eq!(proof.precommits.len(), 3);

        // Every precommitter also prevoted.
        let prevoters: BTreeSet<_> = proof
            .prevotes
            .iter()
            .map(|p| p.public_key().unwrap())
            .collect();
        for pc in &proof.precommits {
            assert!(prevoters.contains(&pc.public_key().unwrap()));
        }
    }

    #[test]
    fn precommit_for_non_best_block_is_rejected() {
        let bps = bp_set(&[1, 2, 3]);
        let (mut tree, root, b1) = tree_with_block(1, &bps);
        // A competing fork at the same height.
        let b1b = id(1, b"b");
        tree.insert(&Chain::new(root, vec![b1b]), key(2).public_key(), &bps)
            .unwrap();

        let (mut round, _) = Round::new(0, key(1).public_key(), &mut tree, Some(key(1)), true);
        round.on_prevote(&mut tree, &prevote_for(2, 0, root, vec![b1]));
        round.on_prevote(&mut tree, &prevote_for(3, 0, root, vec![b1]));
        round.end_prevote(&tree);

        assert!(round.on_precommit(&tree, &precommit_for(2, 0, b1b)).is_none());
        assert_eq!(round.state(), RoundState::Precommit);
    }

    #[test]
    fn precommit_requires_a_prior_prevote() {
        let bps = bp_set(&[1, 2, 3, 4]);
        let (mut tree, root, b1) = tree_with_block(1, &bps);
        let (mut round, _) = Round::new(0, key(1).public_key(), &mut tree, Some(key(1)), true);

        round.on_prevote(&mut tree, &prevote_for(2, 0, root, vec![b1]));
        round.on_prevote(&mut tree, &prevote_for(3, 0, root, vec![b1]));
        round.end_prevote(&tree);

        // Key 4 is an active producer but never prevoted.
        assert!(round.on_precommit(&tree, &precommit_for(4, 0, b1)).is_none());
        assert_eq!(round.proof.precommits.len(), 1);
    }

    #[test]
    fn best_node_is_never_replaced_within_a_round() {
        let bps = bp_set(&[1, 2, 3, 4, 5]);
        let root = id(0, b"root");
        let b1 = id(1, b"a");
        let b2 = id(2, b"a");
        let mut tree = PrefixTree::new(root);
        tree.insert(&Chain::new(root, vec![b1, b2]), key(1).public_key(), &bps)
            .unwrap();

        let (mut round, _) = Round::new(0, key(1).public_key(), &mut tree, Some(key(1)), true);
        // Four of five prevote the short chain: quorum lands on b1... except
        // our own prevote covered b2 as well, so the counts on b1 and b2 are
        // what decide. Votes 2..4 name only b1.
        round.on_prevote(&mut tree, &prevote_for(2, 0, root, vec![b1]));
        round.on_prevote(&mut tree, &prevote_for(3, 0, root, vec![b1]));
        round.on_prevote(&mut tree, &prevote_for(4, 0, root, vec![b1]));
        assert_eq!(round.state(), RoundState::ReadyToPrecommit);
        let best = round.best_node.unwrap();
        assert_eq!(tree.node(best).block_id, b1);

        // A late prevote covering b2 accumulates but does not move the best.
        round.on_prevote(&mut tree, &prevote_for(5, 0, root, vec![b1, b2]));
        assert_eq!(round.best_node.unwrap(), best);
        assert!(tree
            .node(tree.find(&b2).unwrap())
            .has_confirmation(&key(5).public_key()));
    }
}
