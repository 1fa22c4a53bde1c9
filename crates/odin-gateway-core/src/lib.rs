//! # ODIN Gateway Core
//!
//! Pure primitives for the ODIN gateway: structured values, canonical
//! encoding, content identifiers, signing keys and hash-linked receipts.
//!
//! This crate contains no I/O, no storage, no networking. Everything here
//! can be re-run by a third party to verify receipts and exports off-box.
//!
//! ## Key Types
//!
//! - [`Value`] - Structured value accepted by the canonicalizer
//! - [`Cid`] - Content identifier (`sha256:<hex>`)
//! - [`KeyManager`] - Active signing key plus the published key set
//! - [`Receipt`] - Signed proof of acceptance at a chain position
//! - [`ExportBundle`] - Signed, portable copy of a chain
//!
//! ## Canonicalization
//!
//! Values are encoded as canonical JSON. See the [`canonical`] module.

pub mod bundle;
pub mod canonical;
pub mod crypto;
pub mod error;
pub mod keys;
pub mod receipt;
pub mod validation;
pub mod value;

pub use bundle::ExportBundle;
pub use canonical::{
    canonical_bytes, canonicalize, cid_of, cid_of_serialize, cid_of_value, signing_message,
};
pub use crypto::{Cid, Keypair, PublicKey, Signature};
pub use error::{CoreError, ValidationError};
pub use keys::{Jwk, Jwks, KeyId, KeyManager, KeyResolver, KeyStatus, PublicKeyset, PublishedKey};
pub use receipt::{validate_trace_id, ChainAnchor, Receipt, ReceiptDraft, Tombstone};
pub use validation::{verify_receipt, verify_receipts, verify_stored, ChainVerification, StoredReceipt};
pub use value::{Number, Value};
