//! Error types for the ODIN gateway core.

use thiserror::Error;

use crate::crypto::Cid;
use crate::keys::KeyId;

/// Core errors that can occur while encoding, signing or verifying.
#[derive(Debug, Error)]
pub enum CoreError {
    /// The value cannot be represented canonically (NaN, infinity, ...).
    #[error("encoding error: {0}")]
    EncodingError(String),

    #[error("decoding error: {0}")]
    DecodingError(String),

    #[error("invalid public key")]
    InvalidPublicKey,

    #[error("invalid signature")]
    InvalidSignature,

    /// Private or public key material could not be parsed.
    #[error("invalid key material: {0}")]
    InvalidKeyMaterial(String),

    /// Verification was requested for a kid that is not registered.
    #[error("unknown key id: {0}")]
    UnknownKey(KeyId),

    #[error("duplicate key id in key set: {0}")]
    DuplicateKey(KeyId),

    /// A field destined for a signed message contains a forbidden character.
    #[error("invalid {field}: {reason}")]
    InvalidField { field: &'static str, reason: String },
}

/// Result type for core operations.
pub type Result<T> = std::result::Result<T, CoreError>;

/// Chain and bundle validation failures.
///
/// Each variant describes the first fault found while walking a chain.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ValidationError {
    #[error("receipt identity mismatch: stored {stored}, recomputed {recomputed}")]
    ReceiptCidMismatch { stored: Cid, recomputed: Cid },

    #[error("invalid prev_cid: expected {expected}, got {got}")]
    InvalidPrevCid { expected: Cid, got: Cid },

    #[error("invalid sequence number: expected {expected}, got {got}")]
    InvalidSequence { expected: u64, got: u64 },

    #[error("receipt belongs to trace {got}, expected {expected}")]
    TraceMismatch { expected: String, got: String },

    #[error("receipt signed with unknown key {0}")]
    UnknownKey(KeyId),

    #[error("signature verification failed")]
    SignatureFailed,

    /// A stored record could not be decoded.
    #[error("malformed record (seq {seq:?}): {reason}")]
    MalformedRecord { seq: Option<u64>, reason: String },

    #[error("bundle cid mismatch: stored {stored}, recomputed {recomputed}")]
    BundleCidMismatch { stored: Cid, recomputed: Cid },

    #[error("bundle contains no receipts")]
    EmptyBundle,

    #[error("structural error: {0}")]
    StructuralError(String),
}

impl From<CoreError> for ValidationError {
    fn from(e: CoreError) -> Self {
        match e {
            CoreError::UnknownKey(kid) => ValidationError::UnknownKey(kid),
            CoreError::InvalidSignature | CoreError::InvalidPublicKey => {
                ValidationError::SignatureFailed
            }
            other => ValidationError::StructuralError(other.to_string()),
        }
    }
}
