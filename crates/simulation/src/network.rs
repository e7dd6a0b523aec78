//! Simulated network with per-pair delays.
//!
//! Delays are one-way milliseconds, symmetric, `None` for unconnected
//! pairs. Votes travel only on direct links (sessions exist only between
//! directly connected peers); block propagation is host gossip and uses the
//! shortest relay path. Delays can change mid-run to model links healing or
//! degrading.

use rand::Rng;
use rand_chacha::ChaCha8Rng;

/// Per-pair delay matrix with shortest-path relay delays for host-level
/// block propagation.
#[derive(Debug)]
pub struct DelayNetwork {
    delays: Vec<Vec<Option<u64>>>,
    shortest: Vec<Vec<Option<u64>>>,
    dirty: bool,
}

impl DelayNetwork {
    /// A network of `n` nodes with no links.
    pub fn new(n: usize) -> Self {
        let mut delays = vec![vec![None; n]; n];
        for (i, row) in delays.iter_mut().enumerate() {
            row[i] = Some(0);
        }
        Self {
            shortest: delays.clone(),
            delays,
            dirty: false,
        }
    }

    pub fn len(&self) -> usize {
        self.delays.len()
    }

    pub fn is_empty(&self) -> bool {
        self.delays.is_empty()
    }

    /// Set the symmetric one-way delay of a link; `None` disconnects it.
    pub fn set_delay(&mut self, a: usize, b: usize, delay_ms: Option<u64>) {
        self.delays[a][b] = delay_ms;
        self.delays[b][a] = delay_ms;
        self.dirty = true;
    }

    /// Connect every pair with a delay sampled uniformly from `min..=max`.
    /// Seeded, so the same seed gives the same topology.
    pub fn randomize_full_mesh(&mut self, min_ms: u64, max_ms: u64, rng: &mut ChaCha8Rng) {
        let n = self.len();
        for a in 0..n {
            for b in a + 1..n {
                let delay = rng.gen_range(min_ms..=max_ms);
                self.set_delay(a, b, Some(delay));
            }
        }
    }

    /// Direct link delay, used for session traffic.
    pub fn direct_delay(&self, from: usize, to: usize) -> Option<u64> {
        if from == to {
            return None;
        }
        self.delays[from][to]
    }

    /// Whether two distinct nodes share a direct link.
    pub fn connected(&self, a: usize, b: usize) -> bool {
        a != b && self.delays[a][b].is_some()
    }

    /// Shortest relay delay, used for host-level block propagation.
    pub fn relay_delay(&mut self, from: usize, to: usize) -> Option<u64> {
        if self.dirty {
            self.recompute_shortest();
            self.dirty = false;
        }
        if from == to {
            return None;
        }
        self.shortest[from][to]
    }

    fn recompute_shortest(&mut self) {
        let n = self.len();
        let mut dist = self.delays.clone();
        for k in 0..n {
            for i in 0..n {
                let Some(ik) = dist[i][k] else { continue };
                for j in 0..n {
                    let Some(kj) = dist[k][j] else { continue };
                    let through = ik + kj;
                    if dist[i][j].map_or(true, |d| through < d) {
                        dist[i][j] = Some(through);
                    }
                }
            }
        }
        self.shortest = dist;
    }
}
