//! Core types for the RANDPA finality gadget.
//!
//! This crate provides the foundational types used throughout the gadget:
//!
//! - **Block identity**: [`BlockId`] with the height embedded in its prefix
//! - **Crypto primitives**: [`PublicKey`], [`PrivateKey`], [`Signature`],
//!   [`Digest`] with ECDSA public-key recovery
//! - **Signed payloads**: [`SignedEnvelope`] whose signer is recovered from
//!   the signature, never transmitted
//! - **Chain paths**: [`Chain`], a contiguous run of block ids
//!
//! # Design Philosophy
//!
//! This crate is self-contained with minimal dependencies. It does not depend
//! on any other workspace crates, making it the foundation layer.

mod block;
mod chain;
mod crypto;
mod envelope;

pub use block::BlockId;
pub use chain::Chain;
pub use crypto::{digest_of, CryptoError, Digest, PrivateKey, PublicKey, Signature};
pub use envelope::SignedEnvelope;

/// The host transport's opaque handle for a peer connection.
pub type SessionId = u32;
