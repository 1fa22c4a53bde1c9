//! Cryptographic primitives for the ODIN gateway.
//!
//! Wraps Ed25519 signing and SHA-256 content identifiers with strong types.
//! Binary values that travel in JSON (public keys, signatures, seeds) use
//! unpadded base64url.

use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine as _;
use ed25519_dalek::{Signer, SigningKey, Verifier, VerifyingKey};
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use sha2::{Digest, Sha256};
use std::fmt;
use std::str::FromStr;
use zeroize::Zeroizing;

use crate::error::CoreError;
use crate::keys::KeyId;

/// Text prefix of every content identifier.
pub const CID_PREFIX: &str = "sha256:";

/// Encode bytes as unpadded base64url.
pub fn b64u_encode(bytes: &[u8]) -> String {
    URL_SAFE_NO_PAD.encode(bytes)
}

/// Decode base64url, accepting input with or without trailing padding.
pub fn b64u_decode(s: &str) -> Result<Vec<u8>, CoreError> {
    URL_SAFE_NO_PAD
        .decode(s.trim().trim_end_matches('='))
        .map_err(|e| CoreError::DecodingError(format!("invalid base64url: {e}")))
}

fn decode_fixed<const N: usize>(s: &str, what: &str) -> Result<[u8; N], CoreError> {
    let bytes = b64u_decode(s)?;
    bytes.as_slice().try_into().map_err(|_| {
        CoreError::InvalidKeyMaterial(format!("{what} must be {N} bytes, got {}", bytes.len()))
    })
}

/// A content identifier: the SHA-256 digest of canonical bytes.
///
/// Rendered as `sha256:` followed by 64 lowercase hex digits.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Cid(pub [u8; 32]);

impl Cid {
    /// The all-zero identifier used as `prev_cid` of the first receipt in a chain.
    pub const NULL: Self = Self([0u8; 32]);

    /// Hash the given bytes.
    pub fn digest(data: &[u8]) -> Self {
        let mut hasher = Sha256::new();
        hasher.update(data);
        Self(hasher.finalize().into())
    }

    pub const fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }

    pub fn to_hex(&self) -> String {
        hex::encode(self.0)
    }

    pub fn is_null(&self) -> bool {
        *self == Self::NULL
    }
}

impl fmt::Display for Cid {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{CID_PREFIX}{}", self.to_hex())
    }
}

impl fmt::Debug for Cid {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Cid({}...)", &self.to_hex()[..16])
    }
}

impl FromStr for Cid {
    type Err = CoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let hex_part = s
            .strip_prefix(CID_PREFIX)
            .ok_or_else(|| CoreError::DecodingError(format!("cid must start with {CID_PREFIX}")))?;
        if hex_part.len() != 64 || hex_part.bytes().any(|b| b.is_ascii_uppercase()) {
            return Err(CoreError::DecodingError(
                "cid digest must be 64 lowercase hex digits".into(),
            ));
        }
        let mut arr = [0u8; 32];
        hex::decode_to_slice(hex_part, &mut arr)
            .map_err(|e| CoreError::DecodingError(format!("invalid cid hex: {e}")))?;
        Ok(Self(arr))
    }
}

impl Serialize for Cid {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for Cid {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        s.parse().map_err(serde::de::Error::custom)
    }
}

impl AsRef<[u8]> for Cid {
    fn as_ref(&self) -> &[u8] {
        &self.0
    }
}

impl From<[u8; 32]> for Cid {
    fn from(bytes: [u8; 32]) -> Self {
        Self(bytes)
    }
}

/// A 32-byte Ed25519 public key.
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct PublicKey(pub [u8; 32]);

impl PublicKey {
    pub const fn from_bytes(bytes: [u8; 32]) -> Self {
        Self(bytes)
    }

    pub const fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }

    pub fn to_b64u(&self) -> String {
        b64u_encode(&self.0)
    }

    /// Parse from base64url and check that the bytes are a valid curve point.
    pub fn from_b64u(s: &str) -> Result<Self, CoreError> {
        let bytes = decode_fixed::<32>(s, "public key")?;
        VerifyingKey::from_bytes(&bytes).map_err(|_| CoreError::InvalidPublicKey)?;
        Ok(Self(bytes))
    }

    /// Derive the default key id: `ed25519-` plus the first 16 hex digits of
    /// the SHA-256 of the raw public key.
    pub fn derive_kid(&self) -> KeyId {
        let digest = Sha256::digest(self.0);
        KeyId::new_unchecked(format!("ed25519-{}", &hex::encode(digest)[..16]))
    }

    /// Verify a signature over a message.
    pub fn verify(&self, message: &[u8], signature: &Signature) -> Result<(), CoreError> {
        let verifying_key =
            VerifyingKey::from_bytes(&self.0).map_err(|_| CoreError::InvalidPublicKey)?;
        let sig = ed25519_dalek::Signature::from_bytes(&signature.0);
        verifying_key
            .verify(message, &sig)
            .map_err(|_| CoreError::InvalidSignature)
    }
}

impl fmt::Debug for PublicKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Ed25519Pub({})", &hex::encode(self.0)[..16])
    }
}

impl AsRef<[u8]> for PublicKey {
    fn as_ref(&self) -> &[u8] {
        &self.0
    }
}

/// A 64-byte Ed25519 signature, serialized as unpadded base64url.
#[derive(Clone, Copy, PartialEq, Eq)]
pub struct Signature(pub [u8; 64]);

impl Signature {
    pub const fn from_bytes(bytes: [u8; 64]) -> Self {
        Self(bytes)
    }

    pub const fn as_bytes(&self) -> &[u8; 64] {
        &self.0
    }

    pub fn to_b64u(&self) -> String {
        b64u_encode(&self.0)
    }

    pub fn from_b64u(s: &str) -> Result<Self, CoreError> {
        let bytes = b64u_decode(s)?;
        let arr: [u8; 64] = bytes.as_slice().try_into().map_err(|_| CoreError::InvalidSignature)?;
        Ok(Self(arr))
    }
}

impl fmt::Debug for Signature {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Ed25519Sig({}...)", &hex::encode(self.0)[..16])
    }
}

impl Serialize for Signature {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.to_b64u())
    }
}

impl<'de> Deserialize<'de> for Signature {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        Self::from_b64u(&s).map_err(serde::de::Error::custom)
    }
}

impl AsRef<[u8]> for Signature {
    fn as_ref(&self) -> &[u8] {
        &self.0
    }
}

/// A keypair for signing receipts and responses.
///
/// This wraps ed25519-dalek's SigningKey, which zeroizes on drop.
#[derive(Clone)]
pub struct Keypair {
    signing_key: SigningKey,
}

impl Keypair {
    /// Generate a new random keypair.
    pub fn generate() -> Self {
        let mut rng = rand::thread_rng();
        Self {
            signing_key: SigningKey::generate(&mut rng),
        }
    }

    /// Create from a 32-byte seed.
    pub fn from_seed(seed: &[u8; 32]) -> Self {
        Self {
            signing_key: SigningKey::from_bytes(seed),
        }
    }

    /// Create from a base64url-encoded 32-byte seed.
    pub fn from_b64u_seed(s: &str) -> Result<Self, CoreError> {
        let seed = Zeroizing::new(decode_fixed::<32>(s, "private key seed")?);
        Ok(Self::from_seed(&seed))
    }

    pub fn public_key(&self) -> PublicKey {
        PublicKey(self.signing_key.verifying_key().to_bytes())
    }

    pub fn sign(&self, message: &[u8]) -> Signature {
        Signature(self.signing_key.sign(message).to_bytes())
    }

    /// Export the seed as base64url (secret key material).
    pub fn to_b64u_seed(&self) -> Zeroizing<String> {
        let seed = Zeroizing::new(self.signing_key.to_bytes());
        Zeroizing::new(b64u_encode(&*seed))
    }
}

impl fmt::Debug for Keypair {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Keypair({:?})", self.public_key())
    }
}
