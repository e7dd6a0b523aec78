//! Seeding the prefix tree from the host's fork database.

use crate::host::HostChain;
use randpa_finality::PrefixTree;
use randpa_types::Chain;
use tracing::{debug, warn};

/// Walk the host's fork database from the LIB to the head and seed a fresh
/// prefix tree with every block on the way, oldest first. Run before the
/// worker starts, so a restarted node picks rounds back up without a
/// persistent vote archive.
pub fn seed_tree(host: &dyn HostChain) -> PrefixTree {
    let lib_id = host.last_irreversible_block_id();
    debug!(lib = %lib_id, "initializing prefix tree");
    let mut tree = PrefixTree::new(lib_id);

    let mut blocks = Vec::new();
    let mut current = host.head_block_state();
    while let Some(state) = current {
        if state.block_id == lib_id {
            break;
        }
        let prev = state.prev_block_id;
        blocks.push(state);
        current = host.fetch_block_state_by_id(&prev);
    }
    blocks.reverse();

    let count = blocks.len();
    for state in blocks {
        let chain = Chain::new(state.prev_block_id, vec![state.block_id]);
        if let Err(err) = tree.insert(&chain, state.signing_key, &state.active_schedule) {
            warn!(%err, block = %state.block_id, "skipping unlinkable block while seeding");
        }
    }
    debug!(blocks = count, "prefix tree seeded from fork database");

    tree
}
