//! Golden test vectors for deterministic verification.
//!
//! These vectors pin the canonical encoding, content identifiers, key ids,
//! receipt identities and signatures so that any independent verifier
//! produces byte-identical results.

use odin_gateway_core::{
    canonicalize, cid_of_value, Cid, ExportBundle, Jwks, KeyManager, Keypair, Receipt,
    ReceiptDraft, ChainAnchor, Value,
};

/// A canonicalization vector.
#[derive(Debug, Clone)]
pub struct CanonicalVector {
    pub name: &'static str,
    /// Input as JSON text.
    pub input: &'static str,
    /// Expected canonical form.
    pub canonical: &'static str,
    pub cid: &'static str,
}

/// Get all canonicalization vectors.
pub fn canonical_vectors() -> Vec<CanonicalVector> {
    vec![
        CanonicalVector {
            name: "empty object",
            input: "{}",
            canonical: "{}",
            cid: "sha256:44136fa355b3678a1146ad16f7e8649e94fb4fc21fe77e8310c060f61caaff8a",
        },
        CanonicalVector {
            name: "nested keys sorted",
            input: r#"{"b":1,"a":[1,2,{"d":null,"c":true}]}"#,
            canonical: r#"{"a":[1,2,{"c":true,"d":null}],"b":1}"#,
            cid: "sha256:a06efa1296746038e65b4c06eddffdeff5009838cc5bb977fac2695f82fd1ebe",
        },
        CanonicalVector {
            name: "keys in UTF-8 byte order",
            input: r#"{"é":1,"z":2,"Z":3}"#,
            canonical: r#"{"Z":3,"z":2,"é":1}"#,
            cid: "sha256:e98731a9e65b2b5ae6c890d8f7f29495d78f77a57af65ccee140f13869e7efb1",
        },
        CanonicalVector {
            name: "string escapes",
            input: r#"{"s":"a\"b\\c\nd\u0001\t\u001f"}"#,
            canonical: r#"{"s":"a\"b\\c\nd\u0001\t\u001f"}"#,
            cid: "sha256:dd2a1a927c5f51c4747d915e7aded668164ce8cda5b6d60b79b0dbb1db7af7aa",
        },
        CanonicalVector {
            name: "number forms",
            input: r#"{"f":1.0,"h":123.45,"n":-0.0,"i":-42,"u":18446744073709551615,"q":0.1}"#,
            canonical: r#"{"f":1,"h":123.45,"i":-42,"n":0,"q":0.1,"u":18446744073709551615}"#,
            cid: "sha256:e2a2607db68cac406169144979e68e4c80204e101002f72943df193fa63e2f5f",
        },
        CanonicalVector {
            name: "envelope payload",
            input: r#"{"hello":"world"}"#,
            canonical: r#"{"hello":"world"}"#,
            cid: "sha256:93a23971a914e5eacbf0a8d25154cda309c3c1c72fbb9914d47c60f3cb681588",
        },
        CanonicalVector {
            name: "non-ASCII kept raw",
            input: r#"{"name":"ödin ✓"}"#,
            canonical: r#"{"name":"ödin ✓"}"#,
            cid: "sha256:5ebbeb63aae0ab6433d1b8a35c965f8d61c8e9493bf6844856db5dab19d1c8fb",
        },
    ]
}

/// Parse a vector input into a [`Value`].
pub fn parse_input(vector: &CanonicalVector) -> Value {
    serde_json::from_str::<Value>(vector.input)
        .unwrap_or_else(|e| panic!("vector '{}' has invalid JSON: {e}", vector.name))
}

/// A two-receipt chain signed with a fixed seed.
#[derive(Debug, Clone)]
pub struct ChainVector {
    pub seed: [u8; 32],
    pub seed_b64u: &'static str,
    pub public_key_b64u: &'static str,
    pub kid: &'static str,
    pub trace_id: &'static str,
    /// Envelope payload as JSON text.
    pub payload: &'static str,
    pub payload_type: &'static str,
    pub target_type: &'static str,
    pub timestamps: [&'static str; 2],
    pub content_cid: &'static str,
    pub receipt_cids: [&'static str; 2],
    pub signatures: [&'static str; 2],
    pub exported_at: &'static str,
    pub bundle_cid: &'static str,
    pub bundle_signature: &'static str,
}

/// The reference chain: the end-to-end envelope appended twice to "t1".
pub fn chain_vector() -> ChainVector {
    ChainVector {
        seed: [0x42; 32],
        seed_b64u: "QkJCQkJCQkJCQkJCQkJCQkJCQkJCQkJCQkJCQkJCQkI",
        public_key_b64u: "IVL40Zt5HSRFMkLhXy6rbLfP-ntqXtMAl5YOBpiB2xI",
        kid: "ed25519-3097e2dee2cb4a34",
        trace_id: "t1",
        payload: r#"{"hello":"world"}"#,
        payload_type: "vendor.event.v1",
        target_type: "canonical.event.v1",
        timestamps: ["2025-01-01T00:00:00Z", "2025-01-01T00:00:01Z"],
        content_cid: "sha256:93a23971a914e5eacbf0a8d25154cda309c3c1c72fbb9914d47c60f3cb681588",
        receipt_cids: [
            "sha256:4438894b59ad7ddbd854752733b9b374046cba9f9e2d9f42d8f66cab0642af4d",
            "sha256:253a4f071aeba605e58ce472ebcce9e3ff62f6a268266c1e6a0846ba159f49ce",
        ],
        signatures: [
            "EaJfn8HvMym3cNbPahB03M3rI_I0MwnTvzHpYq0SPvjKebhKe8lQWufxTEddG2ijRb6SbcizqLk2XflVsEOmBA",
            "ojClImwTfVIUhmP4CbCqdDeAp8TUtvgXC8YGKYX31fF2Z4HSwhLsbVZ5Pwlqd7W5Uwt7txAT-pH7EEHHjlGkAQ",
        ],
        exported_at: "2025-01-02T00:00:00Z",
        bundle_cid: "sha256:cd56344c9c9590a4e6c48c8de495706189a34a719a6f462a9c6e5f4cc6b9ffab",
        bundle_signature: "5MdYP-GyPFU7FDfkxFc3SZsNbrkpzZUTjC7Q_VYTyT7rRTYz2irtb_pAAC0dGCStpDxLhKUh3ItohSo0I3YvBg",
    }
}

impl ChainVector {
    /// Key manager for the vector seed with the derived kid.
    pub fn key_manager(&self) -> KeyManager {
        KeyManager::new(Keypair::from_seed(&self.seed), None, &Jwks::default())
            .expect("a lone active key cannot collide")
    }

    /// Build the chain from the vector inputs.
    pub fn build_chain(&self) -> Vec<Receipt> {
        let keys = self.key_manager();
        let payload: Value = serde_json::from_str(self.payload).expect("vector payload is JSON");
        let content = cid_of_value(&payload).expect("vector payload canonicalizes");

        let mut anchor = ChainAnchor::GENESIS;
        let mut chain = Vec::new();
        for ts in self.timestamps {
            let receipt = ReceiptDraft::new(self.trace_id, anchor)
                .content(content)
                .timestamp(ts)
                .types(self.payload_type, self.target_type)
                .sign(&keys)
                .expect("vector receipt signs");
            anchor = receipt.next_anchor();
            chain.push(receipt);
        }
        chain
    }

    /// Seal the built chain into an export bundle at `exported_at`.
    pub fn build_bundle(&self) -> ExportBundle {
        ExportBundle::seal(
            self.trace_id,
            self.build_chain(),
            None,
            self.exported_at,
            &self.key_manager(),
        )
        .expect("vector bundle seals")
    }
}

/// Check every canonical vector against this implementation.
///
/// Returns `(name, matches, computed cid)` per vector.
pub fn verify_all_vectors() -> Vec<(String, bool, String)> {
    canonical_vectors()
        .iter()
        .map(|v| {
            let value = parse_input(v);
            let bytes = canonicalize(&value).unwrap_or_default();
            let cid = Cid::digest(&bytes).to_string();
            let matches = bytes == v.canonical.as_bytes() && cid == v.cid;
            (v.name.to_string(), matches, cid)
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use odin_gateway_core::{verify_receipts, PublicKeyset};

    #[test]
    fn test_canonical_vectors_match() {
        for (name, matches, cid) in verify_all_vectors() {
            assert!(matches, "vector '{name}' mismatched (computed {cid})");
        }
    }

    #[test]
    fn test_key_vector() {
        let v = chain_vector();
        let keypair = Keypair::from_b64u_seed(v.seed_b64u).unwrap();
        assert_eq!(keypair.public_key().to_b64u(), v.public_key_b64u);
        assert_eq!(keypair.public_key().derive_kid().as_str(), v.kid);
        assert_eq!(v.key_manager().active_kid().as_str(), v.kid);
    }

    #[test]
    fn test_chain_vector() {
        let v = chain_vector();
        let chain = v.build_chain();

        assert_eq!(chain[0].cid.to_string(), v.content_cid);
        assert!(chain[0].prev_cid.is_null());
        for (i, receipt) in chain.iter().enumerate() {
            assert_eq!(receipt.receipt_cid.to_string(), v.receipt_cids[i]);
            assert_eq!(receipt.signature.to_b64u(), v.signatures[i]);
            assert_eq!(receipt.kid.as_str(), v.kid);
        }
        assert_eq!(chain[1].prev_cid, chain[0].receipt_cid);

        let keys = v.key_manager();
        assert!(verify_receipts(v.trace_id, &chain, None, &keys).is_valid());
    }

    #[test]
    fn test_bundle_vector() {
        let v = chain_vector();
        let bundle = v.build_bundle();
        assert_eq!(bundle.bundle_cid.to_string(), v.bundle_cid);
        assert_eq!(bundle.signature.to_b64u(), v.bundle_signature);

        let published = PublicKeyset::from_jwks(&v.key_manager().jwks()).unwrap();
        bundle.verify(&published).unwrap();
    }
}
