//! Host glue for the RANDPA finality gadget.
//!
//! Translates between the opaque host world and the gadget's typed
//! messages:
//!
//! - [`HostChain`] and [`Transport`]: the host seams, as traits
//! - [`codec`]: wire framing with `100 + tag` message type ids
//! - [`bootstrap`]: seeding the prefix tree from the host's fork database
//! - [`AdapterConfig`]: the `randpa-private-key` option
//! - [`RandpaPlugin`]: wiring it all to a running [`FinalityService`]

mod bootstrap;
mod codec;
mod config;
mod host;
mod plugin;

pub use bootstrap::seed_tree;
pub use codec::{decode_message, encode_message, CodecError};
pub use config::{AdapterConfig, ConfigError};
pub use host::{BlockState, HostChain, Transport};
pub use plugin::RandpaPlugin;
