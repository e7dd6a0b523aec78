//! Network messages and chain events for the RANDPA finality gadget.
//!
//! Three sum types cover every input the gadget can receive:
//!
//! - [`NetworkMessage`]: the five signed wire payloads
//! - [`ChainEvent`]: host chain notifications
//! - [`RandpaMessage`]: the outer type carried on the worker queue
//!
//! Dispatch everywhere is a single `match`; there are no open sets.

mod event;
mod wire;

pub use event::{AcceptedBlock, ChainEvent, IrreversibleBlock, NewPeer};
pub use wire::{
    Handshake, HandshakeAns, NetMessage, NetworkMessage, Precommit, Prevote, Proof,
    PrecommitEnvelope, PrevoteEnvelope, ProofEnvelope, MSG_TYPE_BASE,
};

/// The outer message type consumed by the gadget's worker.
#[derive(Debug, Clone)]
pub enum RandpaMessage {
    /// An inbound network message with its session and receive time.
    Net(NetMessage),
    /// A host chain event.
    Event(ChainEvent),
}
