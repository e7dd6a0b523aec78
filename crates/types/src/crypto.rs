//! Cryptographic primitives.
//!
//! The gadget signs SHA-256 digests of canonically serialized payloads with
//! recoverable secp256k1 ECDSA: the signer's public key is derived from
//! `(signature, digest)` by the receiver and never travels on the wire.

use serde::{Deserialize, Serialize};
use sha2::{Digest as _, Sha256};
use std::fmt;
use thiserror::Error;

use k256::ecdsa::{RecoveryId, Signature as EcdsaSignature, SigningKey, VerifyingKey};

/// WIF version byte for private keys.
const WIF_VERSION: u8 = 0x80;

/// Errors from key handling and signature recovery.
#[derive(Debug, Error)]
pub enum CryptoError {
    #[error("malformed private key")]
    MalformedKey,

    #[error("malformed WIF string: {0}")]
    MalformedWif(String),

    #[error("malformed signature")]
    MalformedSignature,

    #[error("public key recovery failed")]
    RecoveryFailed,
}

/// A 32-byte SHA-256 digest.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, Default,
)]
pub struct Digest(pub [u8; 32]);

impl Digest {
    pub fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }
}

/// SHA-256 digest of the canonical (bincode) encoding of `value`.
pub fn digest_of<T: Serialize>(value: &T) -> Digest {
    let bytes = bincode::serialize(value).expect("in-memory serialization is infallible");
    let mut hasher = Sha256::new();
    hasher.update(&bytes);
    Digest(hasher.finalize().into())
}

/// A compressed secp256k1 public key (33-byte SEC1 encoding).
///
/// Ordered bytewise so it can key `BTreeMap`/`BTreeSet` collections.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct PublicKey(#[serde(with = "bytes_array")] pub [u8; 33]);

impl PublicKey {
    pub fn as_bytes(&self) -> &[u8; 33] {
        &self.0
    }
}

impl fmt::Debug for PublicKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "PublicKey(")?;
        for b in &self.0[..5] {
            write!(f, "{:02x}", b)?;
        }
        write!(f, "..)")
    }
}

impl fmt::Display for PublicKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for b in &self.0 {
            write!(f, "{:02x}", b)?;
        }
        Ok(())
    }
}

/// A recoverable ECDSA signature: 64 compact bytes plus one recovery byte.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Signature(#[serde(with = "bytes_array")] pub [u8; 65]);

impl Signature {
    /// Recover the signer's public key from this signature over `digest`.
    pub fn recover(&self, digest: &Digest) -> Result<PublicKey, CryptoError> {
        let sig = EcdsaSignature::from_slice(&self.0[..64])
            .map_err(|_| CryptoError::MalformedSignature)?;
        let recid =
            RecoveryId::from_byte(self.0[64]).ok_or(CryptoError::MalformedSignature)?;
        let key = VerifyingKey::recover_from_prehash(digest.as_bytes(), &sig, recid)
            .map_err(|_| CryptoError::RecoveryFailed)?;

        let point = key.to_encoded_point(true);
        let mut bytes = [0u8; 33];
        bytes.copy_from_slice(point.as_bytes());
        Ok(PublicKey(bytes))
    }
}

impl fmt::Debug for Signature {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Signature(")?;
        for b in &self.0[..5] {
            write!(f, "{:02x}", b)?;
        }
        write!(f, "..)")
    }
}

/// A secp256k1 signing key.
#[derive(Clone)]
pub struct PrivateKey {
    inner: SigningKey,
}

impl PrivateKey {
    /// Construct from a raw 32-byte scalar.
    pub fn from_bytes(bytes: &[u8; 32]) -> Result<Self, CryptoError> {
        let inner = SigningKey::from_slice(bytes).map_err(|_| CryptoError::MalformedKey)?;
        Ok(Self { inner })
    }

    /// Decode a WIF-encoded private key (base58check, version `0x80`,
    /// optional compression suffix).
    pub fn from_wif(wif: &str) -> Result<Self, CryptoError> {
        let decoded = bs58::decode(wif)
            .with_check(Some(WIF_VERSION))
            .into_vec()
            .map_err(|e| CryptoError::MalformedWif(e.to_string()))?;

        // Checked payload still carries the version byte; the key may carry
        // a trailing 0x01 compression marker.
        let key = match decoded.len() {
            33 => &decoded[1..33],
            34 if decoded[33] == 0x01 => &decoded[1..33],
            _ => return Err(CryptoError::MalformedWif("bad payload length".into())),
        };

        let mut bytes = [0u8; 32];
        bytes.copy_from_slice(key);
        Self::from_bytes(&bytes)
    }

    /// The corresponding public key.
    pub fn public_key(&self) -> PublicKey {
        let point = self.inner.verifying_key().to_encoded_point(true);
        let mut bytes = [0u8; 33];
        bytes.copy_from_slice(point.as_bytes());
        PublicKey(bytes)
    }

    /// Sign a digest, producing a recoverable signature.
    pub fn sign(&self, digest: &Digest) -> Signature {
        let (sig, recid) = self
            .inner
            .sign_prehash_recoverable(digest.as_bytes())
            .expect("signing a 32-byte digest is infallible");

        let mut bytes = [0u8; 65];
        bytes[..64].copy_from_slice(&sig.to_bytes());
        bytes[64] = recid.to_byte();
        Signature(bytes)
    }
}

impl fmt::Debug for PrivateKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        // Never print key material.
        write!(f, "PrivateKey({:?})", self.public_key())
    }
}

/// Serde support for fixed-size byte arrays longer than serde's built-in
/// impls cover.
mod bytes_array {
    use serde::de::{Error, SeqAccess, Visitor};
    use serde::{Deserializer, Serializer};
    use std::fmt;

    pub fn serialize<S: Serializer, const N: usize>(
        bytes: &[u8; N],
        serializer: S,
    ) -> Result<S::Ok, S::Error> {
        serializer.serialize_bytes(bytes)
    }

    struct BytesVisitor<const N: usize>;

    impl<'de, const N: usize> Visitor<'de> for BytesVisitor<N> {
        type Value = [u8; N];

        fn expecting(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
            write!(f, "{} bytes", N)
        }

        fn visit_bytes<E: Error>(self, v: &[u8]) -> Result<Self::Value, E> {
            v.try_into()
                .map_err(|_| E::invalid_length(v.len(), &self))
        }

        fn visit_seq<A: SeqAccess<'de>>(self, mut seq: A) -> Result<Self::Value, A::Error> {
            let mut out = [0u8; N];
            for (i, slot) in out.iter_mut().enumerate() {
                *slot = seq
                    .next_element()?
                    .ok_or_else(|| A::Error::invalid_length(i, &self))?;
            }
            Ok(out)
        }
    }

    pub fn deserialize<'de, D: Deserializer<'de>, const N: usize>(
        deserializer: D,
    ) -> Result<[u8; N], D::Error> {
        deserializer.deserialize_bytes(BytesVisitor::<N>)
    }
}
