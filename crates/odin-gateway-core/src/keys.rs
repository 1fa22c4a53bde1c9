//! Key identifiers, published key sets and the signing key manager.
//!
//! The [`KeyManager`] owns the single active signing key plus the public
//! halves of every key that may still have signed stored receipts. Its
//! public view is a [`PublicKeyset`], published as a JWKS document with the
//! active key first. A third party can rebuild a verification-only
//! [`PublicKeyset`] from that document and check receipts, responses and
//! export bundles without any private material.

use serde::{Deserialize, Serialize};
use std::fmt;

use crate::canonical::SIGNING_SEPARATOR;
use crate::crypto::{Keypair, PublicKey, Signature};
use crate::error::{CoreError, Result};

/// Longest accepted key id.
pub const MAX_KID_LEN: usize = 128;

/// JWK key type for Ed25519 keys.
pub const JWK_KTY: &str = "OKP";
/// JWK curve name for Ed25519 keys.
pub const JWK_CRV: &str = "Ed25519";

/// A signing key identifier.
///
/// Key ids travel in response headers and signed receipts, so they are
/// restricted to printable characters without whitespace or `|`.
#[derive(Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct KeyId(String);

impl KeyId {
    pub fn new(kid: impl Into<String>) -> Result<Self> {
        let kid = kid.into();
        if kid.is_empty() || kid.len() > MAX_KID_LEN {
            return Err(CoreError::InvalidField {
                field: "kid",
                reason: format!("length must be 1..={MAX_KID_LEN}"),
            });
        }
        if kid
            .chars()
            .any(|c| c == SIGNING_SEPARATOR || c.is_whitespace() || c.is_control())
        {
            return Err(CoreError::InvalidField {
                field: "kid",
                reason: "must not contain whitespace, control characters or '|'".into(),
            });
        }
        Ok(Self(kid))
    }

    pub(crate) fn new_unchecked(kid: String) -> Self {
        Self(kid)
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for KeyId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl fmt::Debug for KeyId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "KeyId({})", self.0)
    }
}

impl TryFrom<String> for KeyId {
    type Error = CoreError;

    fn try_from(s: String) -> Result<Self> {
        Self::new(s)
    }
}

impl From<KeyId> for String {
    fn from(kid: KeyId) -> Self {
        kid.0
    }
}

/// Whether a published key is the current signer or kept for verification.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum KeyStatus {
    Active,
    /// Keys without an explicit status are treated as verification-only.
    #[default]
    Rotated,
}

/// A single JSON Web Key for an Ed25519 public key.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Jwk {
    pub kty: String,
    pub crv: String,
    /// Base64url public key bytes.
    pub x: String,
    pub kid: KeyId,
    #[serde(default)]
    pub status: KeyStatus,
}

impl Jwk {
    pub fn from_key(kid: KeyId, public_key: &PublicKey, status: KeyStatus) -> Self {
        Self {
            kty: JWK_KTY.to_owned(),
            crv: JWK_CRV.to_owned(),
            x: public_key.to_b64u(),
            kid,
            status,
        }
    }

    /// Decode the public key, rejecting anything that is not an Ed25519 OKP key.
    pub fn public_key(&self) -> Result<PublicKey> {
        if self.kty != JWK_KTY || self.crv != JWK_CRV {
            return Err(CoreError::InvalidKeyMaterial(format!(
                "key {} is {}/{}, expected {JWK_KTY}/{JWK_CRV}",
                self.kid, self.kty, self.crv
            )));
        }
        PublicKey::from_b64u(&self.x)
    }
}

/// A JWKS document: `{"keys": [...]}`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Jwks {
    pub keys: Vec<Jwk>,
}

impl Jwks {
    /// Parse a JWKS document. Blank input is an empty set.
    pub fn from_json(s: &str) -> Result<Self> {
        if s.trim().is_empty() {
            return Ok(Self::default());
        }
        serde_json::from_str(s).map_err(|e| CoreError::DecodingError(format!("invalid JWKS: {e}")))
    }
}

/// A public key with its id and status.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PublishedKey {
    pub kid: KeyId,
    pub public_key: PublicKey,
    pub status: KeyStatus,
}

/// Resolves key ids to public keys for signature verification.
pub trait KeyResolver {
    fn resolve(&self, kid: &KeyId) -> Option<PublicKey>;

    /// Verify `signature` over `message` with the key registered as `kid`.
    ///
    /// Returns `Ok(false)` for a bad signature and `UnknownKey` if the kid is
    /// not registered.
    fn verify(&self, kid: &KeyId, message: &[u8], signature: &Signature) -> Result<bool> {
        let key = self
            .resolve(kid)
            .ok_or_else(|| CoreError::UnknownKey(kid.clone()))?;
        Ok(key.verify(message, signature).is_ok())
    }
}

/// An ordered, verification-only set of public keys.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PublicKeyset {
    keys: Vec<PublishedKey>,
}

impl PublicKeyset {
    /// Rebuild a key set from a published JWKS document.
    pub fn from_jwks(jwks: &Jwks) -> Result<Self> {
        let mut set = Self::default();
        for jwk in &jwks.keys {
            set.insert(PublishedKey {
                kid: jwk.kid.clone(),
                public_key: jwk.public_key()?,
                status: jwk.status,
            })?;
        }
        Ok(set)
    }

    fn insert(&mut self, key: PublishedKey) -> Result<()> {
        if self.get(&key.kid).is_some() {
            return Err(CoreError::DuplicateKey(key.kid));
        }
        self.keys.push(key);
        Ok(())
    }

    pub fn get(&self, kid: &KeyId) -> Option<&PublishedKey> {
        self.keys.iter().find(|k| &k.kid == kid)
    }

    pub fn iter(&self) -> impl Iterator<Item = &PublishedKey> {
        self.keys.iter()
    }

    pub fn len(&self) -> usize {
        self.keys.len()
    }

    pub fn is_empty(&self) -> bool {
        self.keys.is_empty()
    }

    pub fn to_jwks(&self) -> Jwks {
        Jwks {
            keys: self
                .keys
                .iter()
                .map(|k| Jwk::from_key(k.kid.clone(), &k.public_key, k.status))
                .collect(),
        }
    }
}

impl KeyResolver for PublicKeyset {
    fn resolve(&self, kid: &KeyId) -> Option<PublicKey> {
        self.get(kid).map(|k| k.public_key)
    }
}

/// Holds the active signing key and the published key set.
///
/// Built once at startup and read-only afterwards.
pub struct KeyManager {
    keypair: Keypair,
    active_kid: KeyId,
    keyset: PublicKeyset,
}

impl KeyManager {
    /// Create a key manager.
    ///
    /// `kid` defaults to the id derived from the public key. Keys in
    /// `additional` are registered as rotated. An additional entry that
    /// repeats the active key verbatim is ignored; any other kid collision
    /// is an error.
    pub fn new(keypair: Keypair, kid: Option<KeyId>, additional: &Jwks) -> Result<Self> {
        let public_key = keypair.public_key();
        let active_kid = kid.unwrap_or_else(|| public_key.derive_kid());

        let mut keyset = PublicKeyset::default();
        keyset.insert(PublishedKey {
            kid: active_kid.clone(),
            public_key,
            status: KeyStatus::Active,
        })?;

        for jwk in &additional.keys {
            let key = jwk.public_key()?;
            if jwk.kid == active_kid && key == public_key {
                continue;
            }
            keyset.insert(PublishedKey {
                kid: jwk.kid.clone(),
                public_key: key,
                status: KeyStatus::Rotated,
            })?;
        }

        Ok(Self {
            keypair,
            active_kid,
            keyset,
        })
    }

    /// A key manager with a fresh random key and a derived kid.
    pub fn generated() -> Self {
        let keypair = Keypair::generate();
        let active_kid = keypair.public_key().derive_kid();
        let keyset = PublicKeyset {
            keys: vec![PublishedKey {
                kid: active_kid.clone(),
                public_key: keypair.public_key(),
                status: KeyStatus::Active,
            }],
        };
        Self {
            keypair,
            active_kid,
            keyset,
        }
    }

    pub fn active_kid(&self) -> &KeyId {
        &self.active_kid
    }

    pub fn active_public_key(&self) -> PublicKey {
        self.keypair.public_key()
    }

    /// Sign with the active key.
    pub fn sign(&self, message: &[u8]) -> Signature {
        self.keypair.sign(message)
    }

    pub fn public_keyset(&self) -> &PublicKeyset {
        &self.keyset
    }

    pub fn jwks(&self) -> Jwks {
        self.keyset.to_jwks()
    }

    /// Kids from `referenced` that do not resolve in this key set.
    pub fn unresolved<'a, I>(&self, referenced: I) -> Vec<KeyId>
    where
        I: IntoIterator<Item = &'a KeyId>,
    {
        referenced
            .into_iter()
            .filter(|kid| self.keyset.get(kid).is_none())
            .cloned()
            .collect()
    }
}

impl KeyResolver for KeyManager {
    fn resolve(&self, kid: &KeyId) -> Option<PublicKey> {
        self.keyset.resolve(kid)
    }
}

impl fmt::Debug for KeyManager {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("KeyManager")
            .field("active_kid", &self.active_kid)
            .field("keys", &self.keyset.len())
            .field("private_key", &"[REDACTED]")
            .finish()
    }
}
