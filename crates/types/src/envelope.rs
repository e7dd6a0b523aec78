//! Signed message envelopes.

use crate::crypto::{digest_of, CryptoError, Digest, PrivateKey, PublicKey, Signature};
use serde::{Deserialize, Serialize};
use std::sync::OnceLock;

/// A payload plus the recoverable signature over its digest.
///
/// The signer's key is not transmitted; [`SignedEnvelope::public_key`]
/// recovers it from the signature and caches the result, so repeated checks
/// (round ingestion, proof verification) pay the elliptic-curve work once.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SignedEnvelope<T> {
    pub data: T,
    pub signature: Signature,

    #[serde(skip)]
    signer: OnceLock<Option<PublicKey>>,
}

impl<T: Serialize> SignedEnvelope<T> {
    /// Sign `data` with `key`.
    pub fn new(data: T, key: &PrivateKey) -> Self {
        let digest = digest_of(&data);
        let signature = key.sign(&digest);
        Self {
            data,
            signature,
            signer: OnceLock::new(),
        }
    }

    /// Digest of the payload (the signed message).
    pub fn data_digest(&self) -> Digest {
        digest_of(&self.data)
    }

    /// The signer's public key, recovered from the signature.
    pub fn public_key(&self) -> Result<PublicKey, CryptoError> {
        self.signer
            .get_or_init(|| self.signature.recover(&self.data_digest()).ok())
            .ok_or(CryptoError::RecoveryFailed)
    }

    /// Whether this envelope was signed by `key`.
    pub fn is_signed_by(&self, key: &PublicKey) -> bool {
        self.public_key().map(|k| k == *key).unwrap_or(false)
    }
}

impl<T: PartialEq> PartialEq for SignedEnvelope<T> {
    fn eq(&self, other: &Self) -> bool {
        self.data == other.data && self.signature == other.signature
    }
}

impl<T: Eq> Eq for SignedEnvelope<T> {}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_key(seed: u8) -> PrivateKey {
        let mut bytes = [0u8; 32];
        bytes[31] = seed;
        PrivateKey::from_bytes(&bytes).unwrap()
    }

    #[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
    struct Payload {
        round: u32,
        tag: String,
    }

    #[test]
    fn recovers_the_signing_key() {
        let key = test_key(5);
        let env = SignedEnvelope::new(
            Payload {
                round: 3,
                tag: "prevote".into(),
            },
            &key,
        );

        assert_eq!(env.public_key().unwrap(), key.public_key());
        assert!(env.is_signed_by(&key.public_key()));
        assert!(!env.is_signed_by(&test_key(6).public_key()));
    }

    #[test]
    fn tampered_payload_changes_recovered_key() {
        let key = test_key(5);
        let mut env = SignedEnvelope::new(
            Payload {
                round: 3,
                tag: "prevote".into(),
            },
            &key,
        );
        env.data.round = 4;

        // Recovery either fails or yields some other key.
        match env.public_key() {
            Ok(k) => assert_ne!(k, key.public_key()),
            Err(_) => {}
        }
    }

    #[test]
    fn serde_round_trip_preserves_signature() {
        let key = test_key(8);
        let env = SignedEnvelope::new(
            Payload {
                round: 1,
                tag: "x".into(),
            },
            &key,
        );

        let bytes = bincode::serialize(&env).unwrap();
        let back: SignedEnvelope<Payload> = bincode::deserialize(&bytes).unwrap();
        assert_eq!(back, env);
        assert_eq!(back.public_key().unwrap(), key.public_key());
    }
}
