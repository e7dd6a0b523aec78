//! Deterministic simulation runner.
//!
//! Drives a set of simulated block-producer hosts, each owning a real
//! finality [`Engine`], over a virtual clock. Tasks (block production,
//! message delivery, peer connection, delay updates) live on one ordered
//! timeline keyed by `(time, sequence)`, so a run is a pure function of the
//! topology: identical every time.
//!
//! Each host produces one block per slot in round-robin order, building on
//! its own longest chain. Blocks propagate host-side along shortest relay
//! paths; gadget messages travel only on direct links, exactly like peer
//! sessions. Finalization decisions loop straight back as irreversible
//! events, standing in for the host's `bft_finalize`.

use crate::network::DelayNetwork;
use randpa_finality::{Config, Engine, Output, PrefixTree};
use randpa_messages::{
    AcceptedBlock, ChainEvent, IrreversibleBlock, NetMessage, NetworkMessage, NewPeer,
    RandpaMessage,
};
use randpa_types::{BlockId, PrivateKey, PublicKey};
use std::collections::{BTreeMap, BTreeSet, HashMap, VecDeque};
use std::time::Instant;
use tracing::{debug, info};

/// Index of a node in the simulation.
pub type NodeIndex = usize;

/// Simulation timing knobs.
#[derive(Debug, Clone)]
pub struct SimConfig {
    /// One block is produced per slot.
    pub slot_ms: u64,
    /// Blocks accepted later than this after production are sync blocks.
    pub sync_age_ms: u64,
}

impl Default for SimConfig {
    fn default() -> Self {
        Self {
            slot_ms: 500,
            sync_age_ms: 2000,
        }
    }
}

/// A produced block as the simulated hosts see it.
#[derive(Debug, Clone)]
struct BlockInfo {
    id: BlockId,
    prev: BlockId,
    producer: NodeIndex,
    produced_at: u64,
}

/// One simulated host plus its finality engine.
struct SimNode {
    engine: Engine,
    /// Host-side fork database.
    blocks: HashMap<BlockId, BlockInfo>,
    /// Blocks waiting for their parent, keyed by the missing parent.
    pending: HashMap<BlockId, Vec<BlockInfo>>,
    head: BlockId,
    /// Host-side LIB, advanced by finalization decisions.
    lib: BlockId,
    votes_sent: u64,
}

enum Task {
    Produce,
    DeliverBlock {
        to: NodeIndex,
        block: BlockInfo,
    },
    DeliverNet {
        to: NodeIndex,
        from: NodeIndex,
        msg: NetworkMessage,
    },
    NewPeer {
        to: NodeIndex,
        from: NodeIndex,
    },
    SetDelay {
        a: NodeIndex,
        b: NodeIndex,
        delay_ms: Option<u64>,
    },
}

/// The deterministic runner.
pub struct SimulationRunner {
    config: SimConfig,
    nodes: Vec<SimNode>,
    keys: Vec<PublicKey>,
    bp_keys: BTreeSet<PublicKey>,
    network: DelayNetwork,
    timeline: BTreeMap<(u64, u64), Task>,
    seq: u64,
    now: u64,
    slot: u64,
    producers: Vec<NodeIndex>,
    started: bool,
    /// Finalized block per height across all nodes, for fork-safety checks.
    finalized_at_height: BTreeMap<u32, BlockId>,
    finalization_conflicts: u64,
}

impl SimulationRunner {
    /// `n` nodes, all active block producers, no links yet.
    pub fn new(n: usize) -> Self {
        Self::with_config(n, SimConfig::default())
    }

    pub fn with_config(n: usize, config: SimConfig) -> Self {
        let private_keys: Vec<PrivateKey> = (0..n)
            .map(|i| {
                let mut seed = [0u8; 32];
                seed[24..].copy_from_slice(&(i as u64 + 1).to_be_bytes());
                PrivateKey::from_bytes(&seed).expect("small nonzero scalar")
            })
            .collect();
        let keys: Vec<PublicKey> = private_keys.iter().map(|k| k.public_key()).collect();
        let bp_keys: BTreeSet<PublicKey> = keys.iter().copied().collect();

        let genesis = BlockInfo {
            id: BlockId::ZERO,
            prev: BlockId::ZERO,
            producer: 0,
            produced_at: 0,
        };
        let nodes = private_keys
            .into_iter()
            .map(|key| SimNode {
                engine: Engine::new(Config::default(), Some(key), PrefixTree::new(BlockId::ZERO)),
                blocks: HashMap::from([(BlockId::ZERO, genesis.clone())]),
                pending: HashMap::new(),
                head: BlockId::ZERO,
                lib: BlockId::ZERO,
                votes_sent: 0,
            })
            .collect();

        info!(nodes = n, "created simulation runner");
        Self {
            config,
            nodes,
            keys,
            bp_keys,
            network: DelayNetwork::new(n),
            timeline: BTreeMap::new(),
            seq: 0,
            now: 0,
            slot: 0,
            producers: (0..n).collect(),
            started: false,
            finalized_at_height: BTreeMap::new(),
            finalization_conflicts: 0,
        }
    }

    // ─── Topology ───

    pub fn connect(&mut self, a: NodeIndex, b: NodeIndex, delay_ms: u64) {
        self.network.set_delay(a, b, Some(delay_ms));
    }

    pub fn network_mut(&mut self) -> &mut DelayNetwork {
        &mut self.network
    }

    /// Schedule a delay change at a future time, e.g. a slow link healing.
    pub fn set_delay_at(&mut self, at_ms: u64, a: NodeIndex, b: NodeIndex, delay_ms: Option<u64>) {
        self.schedule(at_ms, Task::SetDelay { a, b, delay_ms });
    }

    /// Restrict block production to a subset of nodes (round-robin over the
    /// given list). Every node stays in the voting schedule.
    pub fn set_producers(&mut self, producers: Vec<NodeIndex>) {
        assert!(!producers.is_empty());
        self.producers = producers;
    }

    // ─── Inspection ───

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    /// The host-side LIB of a node.
    pub fn lib(&self, node: NodeIndex) -> BlockId {
        self.nodes[node].lib
    }

    pub fn lib_height(&self, node: NodeIndex) -> u32 {
        self.nodes[node].lib.height()
    }

    pub fn head_height(&self, node: NodeIndex) -> u32 {
        self.nodes[node].head.height()
    }

    pub fn votes_sent(&self, node: NodeIndex) -> u64 {
        self.nodes[node].votes_sent
    }

    /// Times two nodes finalized different blocks at one height. Any value
    /// above zero is a safety violation.
    pub fn finalization_conflicts(&self) -> u64 {
        self.finalization_conflicts
    }

    pub fn now(&self) -> u64 {
        self.now
    }

    // ─── Execution ───

    /// Run the timeline up to and including `t_end` milliseconds.
    pub fn run_until(&mut self, t_end: u64) {
        if !self.started {
            self.started = true;
            self.init_connections();
            let first_slot = self.config.slot_ms;
            self.schedule(first_slot, Task::Produce);
        }

        while let Some((&(at, seq), _)) = self.timeline.iter().next() {
            if at > t_end {
                break;
            }
            let task = self
                .timeline
                .remove(&(at, seq))
                .expect("peeked key is present");
            self.now = at;
            self.handle_task(task);
        }
        self.now = t_end;
    }

    /// Run `slots` production slots plus headroom for in-slot deliveries.
    pub fn run_slots(&mut self, slots: u64) {
        self.run_until(slots * self.config.slot_ms + self.config.slot_ms / 2);
    }

    fn init_connections(&mut self) {
        let n = self.nodes.len();
        for from in 0..n {
            for to in 0..n {
                if let Some(delay) = self.network.direct_delay(from, to) {
                    self.schedule(delay, Task::NewPeer { to, from });
                }
            }
        }
    }

    fn schedule(&mut self, at: u64, task: Task) {
        self.seq += 1;
        self.timeline.insert((at, self.seq), task);
    }

    fn handle_task(&mut self, task: Task) {
        match task {
            Task::Produce => self.produce_block(),
            Task::DeliverBlock { to, block } => self.accept_block(to, block),
            Task::DeliverNet { to, from, msg } => {
                self.dispatch(
                    to,
                    RandpaMessage::Net(NetMessage {
                        session_id: from as u32,
                        data: msg,
                        receive_time: Instant::now(),
                    }),
                );
            }
            Task::NewPeer { to, from } => {
                self.dispatch(
                    to,
                    RandpaMessage::Event(ChainEvent::NewPeer(NewPeer {
                        session_id: from as u32,
                    })),
                );
            }
            Task::SetDelay { a, b, delay_ms } => {
                debug!(a, b, ?delay_ms, "updating link delay");
                self.network.set_delay(a, b, delay_ms);
            }
        }
    }

    /// The slot fires: the scheduled producer extends its own longest chain.
    fn produce_block(&mut self) {
        self.slot += 1;
        let producer = self.producers[(self.slot as usize - 1) % self.producers.len()];

        let parent = self.nodes[producer].head;
        let height = parent.height() + 1;
        let mut suffix = Vec::with_capacity(9);
        suffix.push(producer as u8);
        suffix.extend_from_slice(&self.slot.to_be_bytes());
        let block = BlockInfo {
            id: BlockId::with_height(height, &suffix),
            prev: parent,
            producer,
            produced_at: self.now,
        };
        debug!(slot = self.slot, producer, height, "block produced");

        for to in 0..self.nodes.len() {
            if to == producer {
                continue;
            }
            if let Some(delay) = self.network.relay_delay(producer, to) {
                let at = self.now + delay;
                self.schedule(
                    at,
                    Task::DeliverBlock {
                        to,
                        block: block.clone(),
                    },
                );
            }
        }
        self.accept_block(producer, block);

        let next = self.now + self.config.slot_ms;
        self.schedule(next, Task::Produce);
    }

    /// Host-side block acceptance: a block links only when its parent is
    /// known, otherwise it waits in the pending buffer.
    fn accept_block(&mut self, node_idx: NodeIndex, block: BlockInfo) {
        if self.nodes[node_idx].blocks.contains_key(&block.id) {
            return;
        }
        if !self.nodes[node_idx].blocks.contains_key(&block.prev) {
            self.nodes[node_idx]
                .pending
                .entry(block.prev)
                .or_default()
                .push(block);
            return;
        }

        let mut queue = VecDeque::from([block]);
        while let Some(b) = queue.pop_front() {
            {
                let node = &mut self.nodes[node_idx];
                if node.blocks.contains_key(&b.id) {
                    continue;
                }
                node.blocks.insert(b.id, b.clone());
                if b.id.height() > node.head.height() {
                    node.head = b.id;
                }
            }

            let sync = self.now.saturating_sub(b.produced_at) > self.config.sync_age_ms;
            let event = ChainEvent::AcceptedBlock(AcceptedBlock {
                block_id: b.id,
                prev_block_id: b.prev,
                creator_key: self.keys[b.producer],
                active_bp_keys: self.bp_keys.clone(),
                sync,
            });
            self.dispatch(node_idx, RandpaMessage::Event(event));

            if let Some(children) = self.nodes[node_idx].pending.remove(&b.id) {
                queue.extend(children);
            }
        }
    }

    /// Feed one message into a node's engine and execute its outputs:
    /// sends become timeline deliveries, finalizations advance the host LIB
    /// and loop back as irreversible events.
    fn dispatch(&mut self, node_idx: NodeIndex, msg: RandpaMessage) {
        let mut inputs = VecDeque::from([msg]);
        while let Some(input) = inputs.pop_front() {
            let outputs = self.nodes[node_idx].engine.handle(input);
            for output in outputs {
                match output {
                    Output::Send {
                        session_id,
                        message,
                    } => {
                        let to = session_id as usize;
                        if matches!(
                            message,
                            NetworkMessage::Prevote(_) | NetworkMessage::Precommit(_)
                        ) {
                            self.nodes[node_idx].votes_sent += 1;
                        }
                        match self.network.direct_delay(node_idx, to) {
                            Some(delay) => {
                                let at = self.now + delay;
                                self.schedule(
                                    at,
                                    Task::DeliverNet {
                                        to,
                                        from: node_idx,
                                        msg: message,
                                    },
                                );
                            }
                            None => debug!(from = node_idx, to, "dropping send on dead link"),
                        }
                    }
                    Output::Finalized(block_id) => {
                        if block_id.height() > self.nodes[node_idx].lib.height() {
                            debug!(node = node_idx, block = %block_id, "host finalizes block");
                            self.nodes[node_idx].lib = block_id;
                            self.record_finalized(block_id);
                            inputs.push_back(RandpaMessage::Event(ChainEvent::IrreversibleBlock(
                                IrreversibleBlock { block_id },
                            )));
                        }
                    }
                }
            }
        }
    }

    fn record_finalized(&mut self, block_id: BlockId) {
        match self.finalized_at_height.get(&block_id.height()) {
            Some(existing) if *existing != block_id => {
                self.finalization_conflicts += 1;
            }
            Some(_) => {}
            None => {
                self.finalized_at_height.insert(block_id.height(), block_id);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn same_topology_gives_identical_runs() {
        let build = || {
            let mut runner = SimulationRunner::new(3);
            runner.connect(0, 1, 10);
            runner.connect(0, 2, 10);
            runner.connect(1, 2, 10);
            runner.run_slots(6);
            (0..3).map(|i| runner.lib(i)).collect::<Vec<_>>()
        };

        assert_eq!(build(), build());
    }

    #[test]
    fn producers_rotate_and_heads_advance() {
        let mut runner = SimulationRunner::new(2);
        runner.connect(0, 1, 10);
        runner.run_slots(4);

        assert_eq!(runner.head_height(0), 4);
        assert_eq!(runner.head_height(1), 4);
    }
}
