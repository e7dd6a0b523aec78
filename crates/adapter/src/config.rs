//! Gadget configuration options.

use randpa_types::{CryptoError, PrivateKey};
use thiserror::Error;

/// Fatal configuration errors, surfaced to the host at initialization.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("argument --randpa-private-key not provided")]
    MissingPrivateKey,

    #[error("malformed private key: {0}")]
    MalformedPrivateKey(#[from] CryptoError),
}

/// Parsed gadget options.
///
/// The one recognized option is `randpa-private-key`, a WIF-encoded signing
/// key. Active block producers must provide it; observers may omit it and
/// then never vote.
#[derive(Debug)]
pub struct AdapterConfig {
    pub private_key: Option<PrivateKey>,
}

impl AdapterConfig {
    /// Parse the `randpa-private-key` option. `require_key` is set for
    /// nodes expected to vote, turning an absent key into a fatal error.
    pub fn from_option(wif: Option<&str>, require_key: bool) -> Result<Self, ConfigError> {
        let private_key = match wif {
            Some(wif) => Some(PrivateKey::from_wif(wif)?),
            None if require_key => return Err(ConfigError::MissingPrivateKey),
            None => None,
        };
        Ok(Self { private_key })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn wif(seed: u8) -> String {
        let mut raw = [0u8; 32];
        raw[31] = seed;
        bs58::encode(&raw).with_check_version(0x80).into_string()
    }

    #[test]
    fn valid_wif_is_accepted() {
        let config = AdapterConfig::from_option(Some(&wif(5)), true).unwrap();
        assert!(config.private_key.is_some());
    }

    #[test]
    fn missing_key_is_fatal_for_producers() {
        assert!(matches!(
            AdapterConfig::from_option(None, true),
            Err(ConfigError::MissingPrivateKey)
        ));
    }

    #[test]
    fn missing_key_is_fine_for_observers() {
        let config = AdapterConfig::from_option(None, false).unwrap();
        assert!(config.private_key.is_none());
    }

    #[test]
    fn malformed_key_is_fatal() {
        assert!(matches!(
            AdapterConfig::from_option(Some("garbage"), false),
            Err(ConfigError::MalformedPrivateKey(_))
        ));
    }
}
