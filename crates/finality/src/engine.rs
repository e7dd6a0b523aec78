//! The finality engine.
//!
//! Owns the prefix tree and the current round, dispatches every network
//! message and chain event, and emits outbound messages and finalization
//! decisions as [`Output`]s. The engine is synchronous and performs no I/O;
//! a dispatch shell (the threaded service or the deterministic simulator)
//! feeds it one message at a time and executes what it returns.

use crate::config::Config;
use crate::round::{Round, RoundAction, RoundState};
use crate::tree::PrefixTree;
use randpa_messages::{
    AcceptedBlock, ChainEvent, Handshake, HandshakeAns, IrreversibleBlock, NetMessage, NewPeer,
    NetworkMessage, Proof, ProofEnvelope, RandpaMessage,
};
use randpa_types::{
    digest_of, BlockId, Chain, Digest, PrivateKey, PublicKey, SessionId, SignedEnvelope,
};
use std::collections::{BTreeMap, BTreeSet};
use tracing::{debug, error, info, warn};

/// Something the engine wants its shell to do.
#[derive(Debug, Clone)]
pub enum Output {
    /// Send a message to one peer session.
    Send {
        session_id: SessionId,
        message: NetworkMessage,
    },
    /// A block reached finality; tell the host.
    Finalized(BlockId),
}

/// What we know about a handshaked peer.
#[derive(Debug, Clone)]
pub struct PeerInfo {
    pub session_id: SessionId,
    pub last_known_lib: BlockId,
}

/// The finality engine.
pub struct Engine {
    config: Config,
    tree: PrefixTree,
    round: Option<Round>,
    lib: BlockId,
    /// None in observer mode: no handshakes, no votes, proofs only.
    private_key: Option<PrivateKey>,
    peers: BTreeMap<PublicKey, PeerInfo>,
    /// Digests already forwarded to each peer; stops gossip echo.
    known_messages: BTreeMap<PublicKey, BTreeSet<Digest>>,
    /// The local node's symmetric entry: digests already fed to the round.
    processed: BTreeSet<Digest>,
}

impl Engine {
    /// Build an engine over an already-seeded tree. The tree root is the
    /// current LIB.
    pub fn new(config: Config, private_key: Option<PrivateKey>, tree: PrefixTree) -> Self {
        let lib = tree.root().block_id;
        Self {
            config,
            tree,
            round: None,
            lib,
            private_key,
            peers: BTreeMap::new(),
            known_messages: BTreeMap::new(),
            processed: BTreeSet::new(),
        }
    }

    pub fn lib(&self) -> BlockId {
        self.lib
    }

    pub fn tree(&self) -> &PrefixTree {
        &self.tree
    }

    pub fn round_state(&self) -> Option<RoundState> {
        self.round.as_ref().map(|r| r.state())
    }

    pub fn peers(&self) -> &BTreeMap<PublicKey, PeerInfo> {
        &self.peers
    }

    /// Our public key, if we can sign.
    pub fn self_key(&self) -> Option<PublicKey> {
        self.private_key.as_ref().map(|k| k.public_key())
    }

    /// Dispatch one queue message.
    pub fn handle(&mut self, msg: RandpaMessage) -> Vec<Output> {
        match msg {
            RandpaMessage::Net(m) => {
                debug!(
                    msg_type = m.data.type_name(),
                    session = m.session_id,
                    "processing net message"
                );
                self.on_net(m)
            }
            RandpaMessage::Event(e) => {
                debug!(event = e.type_name(), "processing event");
                self.on_event(e)
            }
        }
    }

    fn on_net(&mut self, msg: NetMessage) -> Vec<Output> {
        let session_id = msg.session_id;
        match msg.data {
            NetworkMessage::Prevote(_) | NetworkMessage::Precommit(_) => {
                self.process_round_msg(msg.data)
            }
            NetworkMessage::Proof(env) => self.on_proof(env),
            NetworkMessage::Handshake(env) => self.on_handshake(session_id, env),
            NetworkMessage::HandshakeAns(env) => self.on_handshake_ans(session_id, env),
        }
    }

    fn on_event(&mut self, event: ChainEvent) -> Vec<Output> {
        match event {
            ChainEvent::AcceptedBlock(e) => self.on_accepted_block(e),
            ChainEvent::IrreversibleBlock(e) => self.on_irreversible(e),
            ChainEvent::NewPeer(e) => self.on_new_peer(e),
        }
    }

    // ─── Chain events ───

    fn on_accepted_block(&mut self, e: AcceptedBlock) -> Vec<Output> {
        debug!(
            block = %e.block_id,
            height = e.block_id.height(),
            creator = %e.creator_key,
            producers = e.active_bp_keys.len(),
            "accepted block"
        );

        if self.tree.find(&e.block_id).is_some() {
            debug!(block = %e.block_id, "block already known");
            return Vec::new();
        }

        let chain = Chain::new(e.prev_block_id, vec![e.block_id]);
        if let Err(err) = self.tree.insert(&chain, e.creator_key, &e.active_bp_keys) {
            error!(
                %err,
                base = %e.prev_block_id,
                block = %e.block_id,
                "cannot insert block into tree"
            );
            return Vec::new();
        }

        if e.sync {
            info!(block = %e.block_id, "omitting block while syncing");
            return Vec::new();
        }

        let mut outputs = Vec::new();
        let height = e.block_id.height();

        if self.should_start_round(height) {
            // A still-open round is finished (and logged) before
            // replacement; a done round already emitted its proof.
            if let Some(round) = self.round.as_mut() {
                round.finish();
            }
            self.clear_round_data();

            let is_active_bp = self
                .self_key()
                .map(|k| e.active_bp_keys.contains(&k))
                .unwrap_or(false);
            let (round, actions) = Round::new(
                self.config.round_num(height),
                e.creator_key,
                &mut self.tree,
                self.private_key.clone(),
                is_active_bp,
            );
            self.round = Some(round);
            outputs.extend(self.run_round_actions(actions));
        }

        if self.should_end_prevote(height) {
            let actions = self
                .round
                .as_mut()
                .expect("should_end_prevote implies an active round")
                .end_prevote(&self.tree);
            outputs.extend(self.run_round_actions(actions));
        }

        outputs
    }

    fn on_irreversible(&mut self, e: IrreversibleBlock) -> Vec<Output> {
        debug!(block = %e.block_id, height = e.block_id.height(), "irreversible block");

        if e.block_id.height() <= self.tree.root().block_id.height() {
            warn!(block = %e.block_id, "irreversible event for old block");
            return Vec::new();
        }

        match self.tree.find(&e.block_id) {
            Some(idx) => self.tree.set_root(idx),
            // Out-of-order catch-up: replace the root outright, accepting
            // the loss of in-flight confirmations.
            None => self.tree.reset_root(e.block_id),
        }
        self.lib = e.block_id;
        Vec::new()
    }

    fn on_new_peer(&mut self, e: NewPeer) -> Vec<Output> {
        debug!(session = e.session_id, "new peer");

        let Some(key) = self.private_key.as_ref() else {
            debug!("observer mode, not handshaking");
            return Vec::new();
        };
        let msg = NetworkMessage::Handshake(SignedEnvelope::new(Handshake { lib: self.lib }, key));
        vec![Output::Send {
            session_id: e.session_id,
            message: msg,
        }]
    }

    // ─── Network messages ───

    fn on_handshake(
        &mut self,
        session_id: SessionId,
        env: SignedEnvelope<Handshake>,
    ) -> Vec<Output> {
        let Ok(peer_key) = env.public_key() else {
            warn!(session = session_id, "handshake signature recovery failed");
            return Vec::new();
        };
        info!(session = session_id, from = %peer_key, "handshake received");

        self.peers.insert(
            peer_key,
            PeerInfo {
                session_id,
                last_known_lib: env.data.lib,
            },
        );

        let Some(key) = self.private_key.as_ref() else {
            return Vec::new();
        };
        let reply =
            NetworkMessage::HandshakeAns(SignedEnvelope::new(HandshakeAns { lib: self.lib }, key));
        vec![Output::Send {
            session_id,
            message: reply,
        }]
    }

    fn on_handshake_ans(
        &mut self,
        session_id: SessionId,
        env: SignedEnvelope<HandshakeAns>,
    ) -> Vec<Output> {
        let Ok(peer_key) = env.public_key() else {
            warn!(session = session_id, "handshake answer signature recovery failed");
            return Vec::new();
        };
        info!(session = session_id, from = %peer_key, "handshake answer received");

        self.peers.insert(
            peer_key,
            PeerInfo {
                session_id,
                last_known_lib: env.data.lib,
            },
        );
        Vec::new()
    }

    /// Prevotes and precommits are forwarded to all peers first, then fed to
    /// the round unless we already processed the same digest.
    fn process_round_msg(&mut self, msg: NetworkMessage) -> Vec<Output> {
        if self.round.is_none() {
            debug!("no active round");
            return Vec::new();
        }

        let digest = digest_of(&msg);
        let mut outputs = self.bcast(msg.clone());

        let mut done = None;
        if self.processed.insert(digest) {
            let round = self.round.as_mut().expect("checked above");
            match msg {
                NetworkMessage::Prevote(env) => round.on_prevote(&mut self.tree, &env),
                NetworkMessage::Precommit(env) => {
                    done = round.on_precommit(&self.tree, &env);
                }
                _ => {}
            }
        }

        if let Some(RoundAction::Done(proof)) = done {
            outputs.extend(self.on_round_done(proof));
        }
        outputs
    }

    fn on_proof(&mut self, env: ProofEnvelope) -> Vec<Output> {
        let proof = &env.data;
        info!(
            block = %proof.best_block,
            round = proof.round_num,
            "proof received"
        );

        if self.lib.height() >= proof.best_block.height() {
            debug!(
                block = %proof.best_block,
                lib = %self.lib,
                "skipping proof below lib"
            );
            return Vec::new();
        }

        // First verifying proof for a round wins; later ones are dropped.
        if let Some(round) = &self.round {
            if round.num() == proof.round_num && round.state() == RoundState::Done {
                debug!(round = proof.round_num, "proof for already completed round");
                return Vec::new();
            }
        }

        if !self.validate_proof(proof) {
            warn!(block = %proof.best_block, "invalid proof received");
            return Vec::new();
        }
        info!(block = %proof.best_block, "successfully validated proof");

        if let Some(round) = self.round.as_mut() {
            if round.num() == proof.round_num {
                round.set_done();
            }
        }

        let mut outputs = vec![Output::Finalized(proof.best_block)];
        outputs.extend(self.bcast(NetworkMessage::Proof(env)));
        outputs
    }

    // ─── Round plumbing ───

    fn run_round_actions(&mut self, actions: Vec<RoundAction>) -> Vec<Output> {
        let mut outputs = Vec::new();
        for action in actions {
            match action {
                RoundAction::Broadcast(msg) => outputs.extend(self.bcast(msg)),
                RoundAction::Done(proof) => outputs.extend(self.on_round_done(proof)),
            }
        }
        outputs
    }

    fn on_round_done(&mut self, proof: Proof) -> Vec<Output> {
        info!(
            round = proof.round_num,
            best_block = %proof.best_block,
            best_height = proof.best_block.height(),
            "round reached supermajority"
        );

        if self.lib.height() >= proof.best_block.height() {
            return Vec::new();
        }

        let mut outputs = vec![Output::Finalized(proof.best_block)];
        if let Some(key) = self.private_key.as_ref() {
            let msg = NetworkMessage::Proof(SignedEnvelope::new(proof, key));
            outputs.extend(self.bcast(msg));
        }
        outputs
    }

    fn should_start_round(&self, height: u32) -> bool {
        if height < 1 {
            return false;
        }
        match &self.round {
            None => true,
            Some(round) => self.config.round_num(height) > round.num(),
        }
    }

    fn should_end_prevote(&self, height: u32) -> bool {
        if height < 1 {
            return false;
        }
        match &self.round {
            None => false,
            Some(round) => {
                self.config.round_num(height) == round.num()
                    && self.config.pos_in_round(height) == self.config.prevote_width
            }
        }
    }

    /// Per-round state is dropped on round boundaries: the gossip dedup sets
    /// and every confirmation on the tree.
    fn clear_round_data(&mut self) {
        self.known_messages.clear();
        self.processed.clear();
        self.tree.remove_confirmations();
    }

    // ─── Gossip ───

    /// Forward `msg` to every peer that has not seen it from us yet.
    fn bcast(&mut self, msg: NetworkMessage) -> Vec<Output> {
        let digest = digest_of(&msg);
        let mut outputs = Vec::new();
        for (peer_key, peer) in &self.peers {
            let sent = self.known_messages.entry(*peer_key).or_default();
            if sent.insert(digest) {
                outputs.push(Output::Send {
                    session_id: peer.session_id,
                    message: msg.clone(),
                });
            }
        }
        outputs
    }

    // ─── Proof verification ───

    /// Independently verify a finality proof against the local tree.
    fn validate_proof(&self, proof: &Proof) -> bool {
        let Some(node_idx) = self.tree.find(&proof.best_block) else {
            warn!(block = %proof.best_block, "proof for unknown block");
            return false;
        };
        let bp_keys = &self.tree.node(node_idx).active_bp_keys;
        let best_block = proof.best_block;

        let mut prevoted = BTreeSet::new();
        for prevote in &proof.prevotes {
            let Ok(signer) = prevote.public_key() else {
                warn!("proof prevote signature recovery failed");
                return false;
            };
            let covers_best = prevote.data.base_block == best_block
                || prevote.data.blocks.contains(&best_block);
            if !covers_best {
                warn!(base = %prevote.data.base_block, "proof prevote does not cover best block");
                return false;
            }
            if !bp_keys.contains(&signer) {
                warn!(signer = %signer, "proof prevote from inactive producer");
                return false;
            }
            if !prevoted.insert(signer) {
                warn!(signer = %signer, "duplicate prevote signer in proof");
                return false;
            }
        }

        let mut precommitted = BTreeSet::new();
        for precommit in &proof.precommits {
            let Ok(signer) = precommit.public_key() else {
                warn!("proof precommit signature recovery failed");
                return false;
            };
            if !prevoted.contains(&signer) {
                warn!(signer = %signer, "proof precommitter has not prevoted");
                return false;
            }
            if precommit.data.block_id != best_block {
                warn!(block = %precommit.data.block_id, "proof precommit for wrong block");
                return false;
            }
            if !bp_keys.contains(&signer) {
                warn!(signer = %signer, "proof precommit from inactive producer");
                return false;
            }
            precommitted.insert(signer);
        }

        precommitted.len() > bp_keys.len() * 2 / 3
    }
}
