//! The prefix (fork) tree.
//!
//! One node per distinct block observed since the current LIB. Nodes live in
//! an index arena: links are plain indices into the arena, children are owned
//! by the tree, and advancing the root rebuilds the arena with only the
//! retained subtree. The tree is owned by the engine and never shared across
//! threads.

use randpa_messages::PrevoteEnvelope;
use randpa_types::{BlockId, Chain, PublicKey};
use std::collections::{BTreeMap, BTreeSet};
use thiserror::Error;
use tracing::trace;

/// Index of a node in the tree arena.
pub type NodeIdx = usize;

/// Errors from tree operations.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum TreeError {
    /// Neither the chain's base block nor any of its listed blocks is known.
    #[error("node not found in tree")]
    NodeNotFound,
}

/// One block observed since the current LIB.
#[derive(Debug, Clone)]
pub struct TreeNode {
    pub block_id: BlockId,
    /// The block signer. The root seeded from a bare LIB id has none.
    pub creator_key: Option<PublicKey>,
    /// Active block-producer set as of this block; quorum for votes at this
    /// height is computed against this set.
    pub active_bp_keys: BTreeSet<PublicKey>,
    /// Prevotes covering this node in the current round, by voter.
    pub confirmations: BTreeMap<PublicKey, PrevoteEnvelope>,
    parent: Option<NodeIdx>,
    children: Vec<NodeIdx>,
}

impl TreeNode {
    fn new_root(block_id: BlockId) -> Self {
        Self {
            block_id,
            creator_key: None,
            active_bp_keys: BTreeSet::new(),
            confirmations: BTreeMap::new(),
            parent: None,
            children: Vec::new(),
        }
    }

    pub fn parent(&self) -> Option<NodeIdx> {
        self.parent
    }

    pub fn children(&self) -> &[NodeIdx] {
        &self.children
    }

    pub fn confirmation_count(&self) -> usize {
        self.confirmations.len()
    }

    pub fn has_confirmation(&self, key: &PublicKey) -> bool {
        self.confirmations.contains_key(key)
    }
}

/// The prefix tree rooted at the current LIB.
#[derive(Debug)]
pub struct PrefixTree {
    nodes: Vec<TreeNode>,
    root: NodeIdx,
    /// Deepest block each producer is known to have built, used to pick the
    /// prevote target. Entries are dropped when their node is released.
    last_inserted: BTreeMap<PublicKey, NodeIdx>,
}

impl PrefixTree {
    /// A tree containing only the given root block.
    pub fn new(root_id: BlockId) -> Self {
        Self {
            nodes: vec![TreeNode::new_root(root_id)],
            root: 0,
            last_inserted: BTreeMap::new(),
        }
    }

    pub fn root(&self) -> &TreeNode {
        &self.nodes[self.root]
    }

    pub fn root_idx(&self) -> NodeIdx {
        self.root
    }

    pub fn node(&self, idx: NodeIdx) -> &TreeNode {
        &self.nodes[idx]
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    /// Depth-first search from the root.
    pub fn find(&self, block_id: &BlockId) -> Option<NodeIdx> {
        let mut stack = vec![self.root];
        while let Some(idx) = stack.pop() {
            if self.nodes[idx].block_id == *block_id {
                return Some(idx);
            }
            stack.extend(self.nodes[idx].children.iter().copied());
        }
        None
    }

    /// Locate where a chain attaches: the base block if known, otherwise the
    /// first listed block already in the tree. Returns the attach node and
    /// the offset into `chain.blocks` from which the remainder continues.
    fn locate(&self, chain: &Chain) -> Option<(NodeIdx, usize)> {
        if let Some(idx) = self.find(&chain.base_block) {
            return Some((idx, 0));
        }
        chain
            .blocks
            .iter()
            .enumerate()
            .find_map(|(i, id)| self.find(id).map(|idx| (idx, i + 1)))
    }

    /// Insert the blocks of `chain` beneath their attach point. Newly created
    /// nodes carry `creator_key` and `active_bp_keys`; the creator's
    /// last-inserted entry is moved to the deepest node on the walked path.
    pub fn insert(
        &mut self,
        chain: &Chain,
        creator_key: PublicKey,
        active_bp_keys: &BTreeSet<PublicKey>,
    ) -> Result<NodeIdx, TreeError> {
        let (mut idx, offset) = self.locate(chain).ok_or(TreeError::NodeNotFound)?;

        for block_id in &chain.blocks[offset..] {
            idx = match self.child_by_id(idx, block_id) {
                Some(existing) => existing,
                None => {
                    let child = self.nodes.len();
                    self.nodes.push(TreeNode {
                        block_id: *block_id,
                        creator_key: Some(creator_key),
                        active_bp_keys: active_bp_keys.clone(),
                        confirmations: BTreeMap::new(),
                        parent: Some(idx),
                        children: Vec::new(),
                    });
                    self.nodes[idx].children.push(child);
                    trace!(block_id = %block_id, "inserted tree node");
                    child
                }
            };
        }

        self.last_inserted.insert(creator_key, idx);
        Ok(idx)
    }

    /// Record `envelope` as `voter_key`'s confirmation on every node of the
    /// chain that is present, stopping silently at the first unknown
    /// descendant. Returns the deepest node whose confirmation count reached
    /// a new maximum across this call; exact ties go to the deeper node.
    pub fn add_confirmations(
        &mut self,
        chain: &Chain,
        voter_key: PublicKey,
        envelope: PrevoteEnvelope,
    ) -> Result<NodeIdx, TreeError> {
        let (mut idx, offset) = self.locate(chain).ok_or(TreeError::NodeNotFound)?;

        self.nodes[idx]
            .confirmations
            .insert(voter_key, envelope.clone());
        let mut max_idx = idx;

        for block_id in &chain.blocks[offset..] {
            let Some(child) = self.child_by_id(idx, block_id) else {
                break;
            };
            self.nodes[child]
                .confirmations
                .insert(voter_key, envelope.clone());
            if self.nodes[child].confirmation_count() >= self.nodes[max_idx].confirmation_count() {
                max_idx = child;
            }
            idx = child;
        }

        Ok(max_idx)
    }

    /// Clear confirmations on every node. Called between rounds.
    pub fn remove_confirmations(&mut self) {
        for node in &mut self.nodes {
            node.confirmations.clear();
        }
    }

    /// Make `new_root` the root, dropping its parent edge and releasing all
    /// nodes that are not in its subtree.
    pub fn set_root(&mut self, new_root: NodeIdx) {
        let mut order = vec![new_root];
        let mut i = 0;
        while i < order.len() {
            let idx = order[i];
            order.extend(self.nodes[idx].children.iter().copied());
            i += 1;
        }

        let mut remap = vec![usize::MAX; self.nodes.len()];
        for (new_idx, &old_idx) in order.iter().enumerate() {
            remap[old_idx] = new_idx;
        }

        let mut old: Vec<Option<TreeNode>> =
            std::mem::take(&mut self.nodes).into_iter().map(Some).collect();
        self.nodes = order
            .iter()
            .map(|&old_idx| {
                let mut node = old[old_idx].take().expect("subtree nodes are distinct");
                node.parent = node
                    .parent
                    .map(|p| remap[p])
                    .filter(|&p| p != usize::MAX);
                for child in &mut node.children {
                    *child = remap[*child];
                }
                node
            })
            .collect();
        self.root = 0;

        self.last_inserted = std::mem::take(&mut self.last_inserted)
            .into_iter()
            .filter(|&(_, idx)| remap[idx] != usize::MAX)
            .map(|(key, idx)| (key, remap[idx]))
            .collect();
    }

    /// Replace the whole tree with a fresh root for `block_id`. Used when an
    /// irreversible block arrives that the tree has never seen.
    pub fn reset_root(&mut self, block_id: BlockId) {
        self.nodes = vec![TreeNode::new_root(block_id)];
        self.root = 0;
        self.last_inserted.clear();
    }

    /// The path from the root to `head`: `base` is the root block and
    /// `blocks` runs from the root's child down to `head`.
    pub fn get_branch(&self, head: NodeIdx) -> Chain {
        let mut blocks = Vec::new();
        let mut idx = head;
        while idx != self.root {
            blocks.push(self.nodes[idx].block_id);
            idx = self.nodes[idx]
                .parent
                .expect("non-root nodes always have a parent");
        }
        blocks.reverse();
        Chain::new(self.nodes[self.root].block_id, blocks)
    }

    /// Deepest block known to be built by `key`.
    pub fn last_inserted_block(&self, key: &PublicKey) -> Option<NodeIdx> {
        self.last_inserted.get(key).copied()
    }

    fn child_by_id(&self, idx: NodeIdx, block_id: &BlockId) -> Option<NodeIdx> {
        self.nodes[idx]
            .children
            .iter()
            .copied()
            .find(|&c| self.nodes[c].block_id == *block_id)
    }
}
