//! Signed export bundles.
//!
//! A bundle carries an entire chain (plus its tombstone, if a prefix was
//! pruned) together with a signature over
//! `{bundle_cid}|{trace_id}|{exported_at}`. `bundle_cid` is the CID of the
//! canonical list of receipts; when a tombstone is present it is the CID of
//! `{"chain": [...], "tombstone": {...}}` so the anchor is sealed too.
//! Anyone holding the published key set can re-verify a bundle offline.

use serde::{Deserialize, Serialize};

use crate::canonical::{cid_of_serialize, signing_message};
use crate::crypto::{Cid, Signature};
use crate::error::{Result, ValidationError};
use crate::keys::{KeyId, KeyManager, KeyResolver};
use crate::receipt::{Receipt, Tombstone};
use crate::validation::{verify_receipts, ChainVerification};

/// The sealed content of a bundle whose chain starts at a tombstone.
#[derive(Serialize)]
struct AnchoredChain<'a> {
    chain: &'a [Receipt],
    tombstone: &'a Tombstone,
}

/// A portable, independently verifiable chain export.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExportBundle {
    pub trace_id: String,
    pub chain: Vec<Receipt>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tombstone: Option<Tombstone>,
    pub exported_at: String,
    pub bundle_cid: Cid,
    pub kid: KeyId,
    pub signature: Signature,
}

impl ExportBundle {
    /// CID of the canonical ordered receipt list, together with the
    /// tombstone when there is one.
    pub fn compute_bundle_cid(chain: &[Receipt], tombstone: Option<&Tombstone>) -> Result<Cid> {
        match tombstone {
            None => cid_of_serialize(chain),
            Some(tombstone) => cid_of_serialize(&AnchoredChain { chain, tombstone }),
        }
    }

    /// Assemble and sign a bundle with the active key.
    pub fn seal(
        trace_id: impl Into<String>,
        chain: Vec<Receipt>,
        tombstone: Option<Tombstone>,
        exported_at: impl Into<String>,
        keys: &KeyManager,
    ) -> Result<Self> {
        let trace_id = trace_id.into();
        let exported_at = exported_at.into();
        let bundle_cid = Self::compute_bundle_cid(&chain, tombstone.as_ref())?;
        let signature = keys.sign(&signing_message(&bundle_cid, &trace_id, &exported_at)?);

        Ok(Self {
            trace_id,
            chain,
            tombstone,
            exported_at,
            bundle_cid,
            kid: keys.active_kid().clone(),
            signature,
        })
    }

    /// Re-verify the bundle: bundle CID, bundle signature and every receipt
    /// in the chain.
    pub fn verify(&self, keys: &impl KeyResolver) -> std::result::Result<(), ValidationError> {
        if self.chain.is_empty() {
            return Err(ValidationError::EmptyBundle);
        }

        let recomputed = Self::compute_bundle_cid(&self.chain, self.tombstone.as_ref())?;
        if recomputed != self.bundle_cid {
            return Err(ValidationError::BundleCidMismatch {
                stored: self.bundle_cid,
                recomputed,
            });
        }

        let message = signing_message(&self.bundle_cid, &self.trace_id, &self.exported_at)?;
        if !keys.verify(&self.kid, &message, &self.signature)? {
            return Err(ValidationError::SignatureFailed);
        }

        match verify_receipts(&self.trace_id, &self.chain, self.tombstone.as_ref(), keys) {
            ChainVerification::Valid { .. } => Ok(()),
            ChainVerification::Invalid { fault, .. } => Err(fault),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crypto::Keypair;
    use crate::keys::{Jwks, PublicKeyset};
    use crate::receipt::{ChainAnchor, ReceiptDraft};

    fn keys() -> KeyManager {
        KeyManager::new(Keypair::from_seed(&[7; 32]), None, &Jwks::default()).unwrap()
    }

    fn two_receipts(km: &KeyManager) -> Vec<Receipt> {
        let first = ReceiptDraft::new("t1", ChainAnchor::GENESIS)
            .content(Cid::digest(b"a"))
            .timestamp("2025-01-01T00:00:00Z")
            .types("vendor.event.v1", "canonical.event.v1")
            .sign(km)
            .unwrap();
        let second = ReceiptDraft::new("t1", first.next_anchor())
            .content(Cid::digest(b"b"))
            .timestamp("2025-01-01T00:00:01Z")
            .types("vendor.event.v1", "canonical.event.v1")
            .sign(km)
            .unwrap();
        vec![first, second]
    }

    #[test]
    fn test_sealed_bundle_verifies_with_published_keys() {
        let km = keys();
        let bundle =
            ExportBundle::seal("t1", two_receipts(&km), None, "2025-01-02T00:00:00Z", &km).unwrap();
        let published = PublicKeyset::from_jwks(&km.jwks()).unwrap();
        bundle.verify(&published).unwrap();
    }

    #[test]
    fn test_bundle_serde_roundtrip_still_verifies() {
        let km = keys();
        let bundle =
            ExportBundle::seal("t1", two_receipts(&km), None, "2025-01-02T00:00:00Z", &km).unwrap();
        let text = serde_json::to_string(&bundle).unwrap();
        let back: ExportBundle = serde_json::from_str(&text).unwrap();
        back.verify(&km).unwrap();
    }

    #[test]
    fn test_reordered_chain_fails() {
        let km = keys();
        let mut bundle =
            ExportBundle::seal("t1", two_receipts(&km), None, "2025-01-02T00:00:00Z", &km).unwrap();
        bundle.chain.swap(0, 1);
        assert!(matches!(
            bundle.verify(&km),
            Err(ValidationError::BundleCidMismatch { .. })
        ));
    }

    #[test]
    fn test_tombstone_is_sealed() {
        let km = keys();
        let receipts = two_receipts(&km);
        let tombstone = Tombstone {
            trace_id: "t1".into(),
            last_receipt_cid: receipts[0].receipt_cid,
            next_seq: 1,
            pruned_count: 1,
            pruned_at: "2025-01-01T12:00:00Z".into(),
        };
        let mut bundle = ExportBundle::seal(
            "t1",
            receipts[1..].to_vec(),
            Some(tombstone),
            "2025-01-02T00:00:00Z",
            &km,
        )
        .unwrap();
        bundle.verify(&km).unwrap();
        assert_ne!(
            bundle.bundle_cid,
            ExportBundle::compute_bundle_cid(&bundle.chain, None).unwrap()
        );

        // A swapped tombstone no longer matches the sealed identity
        if let Some(t) = bundle.tombstone.as_mut() {
            t.pruned_count = 7;
        }
        assert!(matches!(
            bundle.verify(&km),
            Err(ValidationError::BundleCidMismatch { .. })
        ));
    }

    #[test]
    fn test_changed_export_time_fails_signature() {
        let km = keys();
        let mut bundle =
            ExportBundle::seal("t1", two_receipts(&km), None, "2025-01-02T00:00:00Z", &km).unwrap();
        bundle.exported_at = "2030-01-01T00:00:00Z".into();
        assert_eq!(bundle.verify(&km), Err(ValidationError::SignatureFailed));
    }

    #[test]
    fn test_empty_bundle_rejected() {
        let km = keys();
        let bundle = ExportBundle::seal("t1", Vec::new(), None, "2025-01-02T00:00:00Z", &km).unwrap();
        assert_eq!(bundle.verify(&km), Err(ValidationError::EmptyBundle));
    }
}
