//! Deterministic simulation of a RANDPA network.
//!
//! A virtual clock, a delay-matrix network, and simulated block-producer
//! hosts drive the same [`randpa_finality::Engine`] the production service
//! runs, but inline and in deterministic order: given the same topology the
//! run is identical every time. This is the synchronous dispatch shell of
//! the engine/shell duality.

mod network;
mod runner;

pub use network::DelayNetwork;
pub use runner::{NodeIndex, SimConfig, SimulationRunner};
