//! Receipt: signed proof that an envelope was accepted at a chain position.
//!
//! A receipt is immutable once appended. Its identity (`receipt_cid`) is the
//! CID of the canonical receipt fields excluding `receipt_cid` and
//! `signature`; the signature covers `{receipt_cid}|{trace_id}|{ts}`.
//! Receipts of one trace are linked through `prev_cid`.

use serde::{Deserialize, Serialize};

use crate::canonical::{cid_of_serialize, signing_message, SIGNING_SEPARATOR};
use crate::crypto::{Cid, Signature};
use crate::error::{CoreError, Result};
use crate::keys::{KeyId, KeyManager, KeyResolver};

/// Longest accepted trace id.
pub const MAX_TRACE_ID_LEN: usize = 256;

/// Check that a trace id can be stored and signed.
///
/// Trace ids must be non-empty, at most [`MAX_TRACE_ID_LEN`] characters and
/// free of control characters and the signing separator.
pub fn validate_trace_id(trace_id: &str) -> Result<()> {
    let reason = if trace_id.is_empty() {
        "must not be empty".to_owned()
    } else if trace_id.chars().count() > MAX_TRACE_ID_LEN {
        format!("must be at most {MAX_TRACE_ID_LEN} characters")
    } else if trace_id.contains(SIGNING_SEPARATOR) {
        format!("must not contain '{SIGNING_SEPARATOR}'")
    } else if trace_id.chars().any(char::is_control) {
        "must not contain control characters".to_owned()
    } else {
        return Ok(());
    };
    Err(CoreError::InvalidField {
        field: "trace_id",
        reason,
    })
}

/// A signed, hash-linked receipt.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Receipt {
    /// Identity of this receipt.
    pub receipt_cid: Cid,
    /// CID of the accepted envelope content.
    pub cid: Cid,
    pub trace_id: String,
    /// Position in the chain, starting at 0.
    pub seq: u64,
    /// RFC 3339 timestamp, kept verbatim.
    pub ts: String,
    /// Identity of the previous receipt, [`Cid::NULL`] or a tombstone anchor.
    pub prev_cid: Cid,
    pub kid: KeyId,
    pub payload_type: String,
    pub target_type: String,
    pub signature: Signature,
}

/// The fields covered by a receipt's identity.
#[derive(Serialize)]
struct ReceiptBody<'a> {
    cid: &'a Cid,
    trace_id: &'a str,
    seq: u64,
    ts: &'a str,
    prev_cid: &'a Cid,
    kid: &'a KeyId,
    payload_type: &'a str,
    target_type: &'a str,
}

impl ReceiptBody<'_> {
    fn identity(&self) -> Result<Cid> {
        cid_of_serialize(self)
    }
}

impl Receipt {
    /// Recompute this receipt's identity from its fields.
    pub fn compute_cid(&self) -> Result<Cid> {
        ReceiptBody {
            cid: &self.cid,
            trace_id: &self.trace_id,
            seq: self.seq,
            ts: &self.ts,
            prev_cid: &self.prev_cid,
            kid: &self.kid,
            payload_type: &self.payload_type,
            target_type: &self.target_type,
        }
        .identity()
    }

    /// The message covered by `signature`.
    pub fn signing_message(&self) -> Result<Vec<u8>> {
        signing_message(&self.receipt_cid, &self.trace_id, &self.ts)
    }

    /// Check the signature with the key registered under `kid`.
    pub fn verify_signature(&self, keys: &impl KeyResolver) -> Result<bool> {
        keys.verify(&self.kid, &self.signing_message()?, &self.signature)
    }

    /// The anchor the next receipt in this chain must link to.
    pub fn next_anchor(&self) -> ChainAnchor {
        ChainAnchor {
            prev_cid: self.receipt_cid,
            next_seq: self.seq + 1,
        }
    }
}

/// Where the next receipt of a chain attaches: its `prev_cid` and `seq`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChainAnchor {
    pub prev_cid: Cid,
    pub next_seq: u64,
}

impl ChainAnchor {
    /// The anchor of an empty chain.
    pub const GENESIS: Self = Self {
        prev_cid: Cid::NULL,
        next_seq: 0,
    };
}

/// Marker left behind when a chain prefix is pruned.
///
/// Records the identity of the last removed receipt and the next expected
/// position, so the surviving suffix still verifies and later appends
/// continue the chain.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Tombstone {
    pub trace_id: String,
    pub last_receipt_cid: Cid,
    pub next_seq: u64,
    /// Total receipts removed from this trace so far.
    pub pruned_count: u64,
    pub pruned_at: String,
}

impl Tombstone {
    pub fn anchor(&self) -> ChainAnchor {
        ChainAnchor {
            prev_cid: self.last_receipt_cid,
            next_seq: self.next_seq,
        }
    }
}

/// Builder for a new receipt.
#[derive(Debug, Clone)]
pub struct ReceiptDraft {
    trace_id: String,
    anchor: ChainAnchor,
    cid: Cid,
    ts: String,
    payload_type: String,
    target_type: String,
}

impl ReceiptDraft {
    /// Start a receipt for `trace_id` attached at `anchor`.
    pub fn new(trace_id: impl Into<String>, anchor: ChainAnchor) -> Self {
        Self {
            trace_id: trace_id.into(),
            anchor,
            cid: Cid::NULL,
            ts: String::new(),
            payload_type: String::new(),
            target_type: String::new(),
        }
    }

    /// Set the envelope content CID.
    pub fn content(mut self, cid: Cid) -> Self {
        self.cid = cid;
        self
    }

    pub fn timestamp(mut self, ts: impl Into<String>) -> Self {
        self.ts = ts.into();
        self
    }

    pub fn types(mut self, payload_type: impl Into<String>, target_type: impl Into<String>) -> Self {
        self.payload_type = payload_type.into();
        self.target_type = target_type.into();
        self
    }

    /// Compute the identity and sign with the active key.
    pub fn sign(self, keys: &KeyManager) -> Result<Receipt> {
        validate_trace_id(&self.trace_id)?;
        if self.ts.is_empty() {
            return Err(CoreError::InvalidField {
                field: "timestamp",
                reason: "must not be empty".into(),
            });
        }

        let kid = keys.active_kid().clone();
        let receipt_cid = ReceiptBody {
            cid: &self.cid,
            trace_id: &self.trace_id,
            seq: self.anchor.next_seq,
            ts: &self.ts,
            prev_cid: &self.anchor.prev_cid,
            kid: &kid,
            payload_type: &self.payload_type,
            target_type: &self.target_type,
        }
        .identity()?;

        let message = signing_message(&receipt_cid, &self.trace_id, &self.ts)?;
        let signature = keys.sign(&message);

        Ok(Receipt {
            receipt_cid,
            cid: self.cid,
            trace_id: self.trace_id,
            seq: self.anchor.next_seq,
            ts: self.ts,
            prev_cid: self.anchor.prev_cid,
            kid,
            payload_type: self.payload_type,
            target_type: self.target_type,
            signature,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crypto::Keypair;
    use crate::keys::Jwks;

    fn keys() -> KeyManager {
        KeyManager::new(
            Keypair::from_seed(&[0x42; 32]),
            Some(KeyId::new("k1").unwrap()),
            &Jwks::default(),
        )
        .unwrap()
    }

    fn draft(anchor: ChainAnchor) -> ReceiptDraft {
        ReceiptDraft::new("t1", anchor)
            .content(Cid::digest(b"{}"))
            .timestamp("2025-01-01T00:00:00Z")
            .types("vendor.event.v1", "canonical.event.v1")
    }

    #[test]
    fn test_first_receipt_uses_null_sentinel() {
        let r = draft(ChainAnchor::GENESIS).sign(&keys()).unwrap();
        assert_eq!(r.seq, 0);
        assert!(r.prev_cid.is_null());
        assert_eq!(r.kid.as_str(), "k1");
    }

    #[test]
    fn test_identity_deterministic_and_recomputable() {
        let km = keys();
        let a = draft(ChainAnchor::GENESIS).sign(&km).unwrap();
        let b = draft(ChainAnchor::GENESIS).sign(&km).unwrap();
        assert_eq!(a.receipt_cid, b.receipt_cid);
        assert_eq!(a.compute_cid().unwrap(), a.receipt_cid);
    }

    #[test]
    fn test_signature_verifies_and_detects_tampering() {
        let km = keys();
        let mut r = draft(ChainAnchor::GENESIS).sign(&km).unwrap();
        assert!(r.verify_signature(&km).unwrap());

        r.ts = "2025-01-01T00:00:01Z".into();
        assert!(!r.verify_signature(&km).unwrap());
    }

    #[test]
    fn test_next_anchor_links() {
        let km = keys();
        let first = draft(ChainAnchor::GENESIS).sign(&km).unwrap();
        let second = draft(first.next_anchor()).sign(&km).unwrap();
        assert_eq!(second.prev_cid, first.receipt_cid);
        assert_eq!(second.seq, 1);
    }

    #[test]
    fn test_tombstone_anchor() {
        let tomb = Tombstone {
            trace_id: "t1".into(),
            last_receipt_cid: Cid::digest(b"x"),
            next_seq: 7,
            pruned_count: 7,
            pruned_at: "2025-01-01T00:00:00Z".into(),
        };
        let r = draft(tomb.anchor()).sign(&keys()).unwrap();
        assert_eq!(r.seq, 7);
        assert_eq!(r.prev_cid, Cid::digest(b"x"));
    }

    #[test]
    fn test_trace_id_validation() {
        assert!(validate_trace_id("t1").is_ok());
        assert!(validate_trace_id("").is_err());
        assert!(validate_trace_id("a|b").is_err());
        assert!(validate_trace_id("a\nb").is_err());
        assert!(validate_trace_id(&"x".repeat(MAX_TRACE_ID_LEN + 1)).is_err());
    }

    #[test]
    fn test_missing_timestamp_rejected() {
        let result = ReceiptDraft::new("t1", ChainAnchor::GENESIS).sign(&keys());
        assert!(matches!(result, Err(CoreError::InvalidField { field: "timestamp", .. })));
    }

    #[test]
    fn test_serde_field_names() {
        let r = draft(ChainAnchor::GENESIS).sign(&keys()).unwrap();
        let json = serde_json::to_value(&r).unwrap();
        for field in ["receipt_cid", "cid", "trace_id", "seq", "ts", "prev_cid", "kid",
            "payload_type", "target_type", "signature"] {
            assert!(json.get(field).is_some(), "missing {field}");
        }
        let back: Receipt = serde_json::from_value(json).unwrap();
        assert_eq!(back, r);
    }
}
