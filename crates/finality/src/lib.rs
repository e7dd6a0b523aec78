//! The RANDPA finality core.
//!
//! This crate provides the finality subsystem as a synchronous state machine
//! plus the threaded dispatch shell around it:
//!
//! - [`PrefixTree`]: the in-memory fork tree rooted at the current LIB,
//!   carrying per-node prevote confirmations
//! - [`Round`]: a single two-phase voting round
//!   (prevote → ready-to-precommit → precommit → done/fail)
//! - [`Engine`]: owns the tree and the current round, dispatches every
//!   message and event, and emits outbound messages and finalization
//!   decisions
//! - [`MessageQueue`] and [`FinalityService`]: the bounded single-worker
//!   dispatch shell for production use
//!
//! # Architecture
//!
//! The engine is synchronous and performs no I/O:
//!
//! ```text
//! RandpaMessage → Engine::handle() → Vec<Output>
//! ```
//!
//! All I/O is handled by a dispatch shell. [`FinalityService`] runs the
//! engine on a dedicated worker thread fed by a [`MessageQueue`]; the
//! deterministic simulator drives the same engine inline. Both shells share
//! one state machine; only the dispatch differs.

mod config;
mod engine;
mod queue;
mod round;
mod service;
mod tree;

pub use config::Config;
pub use engine::{Engine, Output, PeerInfo};
pub use queue::MessageQueue;
pub use round::{Round, RoundAction, RoundState};
pub use service::{Channel, FinalityService, OutboundMessage};
pub use tree::{NodeIdx, PrefixTree, TreeError, TreeNode};
