//! Golden vectors for cross-implementation verification.
//!
//! Every verifier of ODIN receipts must produce identical:
//! - canonical bytes and content CIDs
//! - derived kids
//! - receipt CIDs and signatures (deterministic Ed25519)
//! - bundle CIDs and bundle signatures

use std::sync::Arc;

use odin_gateway::core::{
    canonicalize, signing_message, verify_receipts, ChainVerification, Cid, KeyManager,
    PublicKeyset, Signature, ValidationError, Value,
};
use odin_gateway::store::MemoryStore;
use odin_gateway::{Envelope, Gateway, GatewayConfig, LedgerBackend};
use odin_gateway_testkit::{canonical_vectors, chain_vector, verify_all_vectors};
use serde::Serialize;

fn vector_gateway() -> (Gateway, KeyManager) {
    let v = chain_vector();
    let gateway = Gateway::builder(v.key_manager(), Arc::new(MemoryStore::new()))
        .build()
        .unwrap();
    (gateway, v.key_manager())
}

fn vector_envelope(ts: &str) -> Envelope {
    let v = chain_vector();
    let payload: Value = serde_json::from_str(v.payload).unwrap();
    Envelope::new(payload, v.payload_type, v.target_type)
        .with_trace_id(v.trace_id)
        .with_timestamp(ts)
}

#[test]
fn test_canonical_vectors() {
    let results = verify_all_vectors();
    assert_eq!(results.len(), canonical_vectors().len());
    for (name, matches, cid) in results {
        assert!(matches, "canonical vector '{name}' mismatched (computed {cid})");
    }
}

#[tokio::test]
async fn test_gateway_reproduces_chain_vector() {
    let v = chain_vector();
    let (gateway, _) = vector_gateway();
    assert_eq!(gateway.active_kid().as_str(), v.kid);

    for (i, ts) in v.timestamps.iter().enumerate() {
        let response = gateway.handle_envelope(vector_envelope(ts)).await.unwrap();
        let receipt = &response.body.receipt;
        assert_eq!(receipt.cid.to_string(), v.content_cid);
        assert_eq!(receipt.seq, i as u64);
        assert_eq!(receipt.receipt_cid.to_string(), v.receipt_cids[i], "receipt {i}");
        assert_eq!(receipt.signature.to_b64u(), v.signatures[i], "signature {i}");
    }

    let export = gateway.export(v.trace_id).await.unwrap();
    assert_eq!(export.body.bundle_cid.to_string(), v.bundle_cid);
    assert_eq!(export.headers.response_cid.to_string(), v.bundle_cid);
}

#[tokio::test]
async fn test_configured_gateway_uses_vector_key() {
    let v = chain_vector();
    let mut config = GatewayConfig::default();
    config.ledger.backend = LedgerBackend::Memory;
    config.signing.private_key = Some(v.seed_b64u.to_owned());

    let gateway = Gateway::from_config(&config).await.unwrap();
    assert_eq!(gateway.active_kid().as_str(), v.kid);

    let jwks = gateway.jwks();
    assert_eq!(jwks.keys.len(), 1);
    assert_eq!(jwks.keys[0].x, v.public_key_b64u);
}

#[test]
fn test_vectors_deterministic() {
    let v = chain_vector();
    assert_eq!(v.build_chain(), v.build_chain());
    assert_eq!(v.build_bundle(), v.build_bundle());
}

#[test]
fn test_signing_message_layout() {
    let v = chain_vector();
    let cid: Cid = v.receipt_cids[0].parse().unwrap();
    let message = signing_message(&cid, v.trace_id, v.timestamps[0]).unwrap();
    assert_eq!(
        message,
        format!("{}|{}|{}", v.receipt_cids[0], v.trace_id, v.timestamps[0]).into_bytes()
    );
}

#[test]
fn print_golden_vectors_json() {
    #[derive(Serialize)]
    struct CanonicalEntry {
        name: &'static str,
        input: &'static str,
        canonical: &'static str,
        cid: &'static str,
    }

    #[derive(Serialize)]
    struct VectorFile {
        version: &'static str,
        description: &'static str,
        canonical: Vec<CanonicalEntry>,
        chain: Vec<odin_gateway::core::Receipt>,
        bundle: odin_gateway::core::ExportBundle,
    }

    let v = chain_vector();
    let file = VectorFile {
        version: "1",
        description: "Golden vectors for ODIN receipts. Every verifier must produce identical outputs.",
        canonical: canonical_vectors()
            .into_iter()
            .map(|c| CanonicalEntry {
                name: c.name,
                input: c.input,
                canonical: c.canonical,
                cid: c.cid,
            })
            .collect(),
        chain: v.build_chain(),
        bundle: v.build_bundle(),
    };

    let json = serde_json::to_string_pretty(&file).unwrap();
    println!("{json}");
}

// =============================================================================
// REJECTION VECTORS
// Altered chains must fail verification at the first bad receipt.
// =============================================================================

fn published() -> PublicKeyset {
    PublicKeyset::from_jwks(&chain_vector().key_manager().jwks()).unwrap()
}

fn fault_at(chain: &[odin_gateway::core::Receipt]) -> (usize, ValidationError) {
    match verify_receipts(chain_vector().trace_id, chain, None, &published()) {
        ChainVerification::Invalid { index, fault } => (index, fault),
        ChainVerification::Valid { .. } => panic!("altered chain verified"),
    }
}

#[test]
fn test_reject_forged_signature() {
    let mut chain = chain_vector().build_chain();
    chain[1].signature = Signature::from_bytes([0xff; 64]);
    assert_eq!(fault_at(&chain).0, 1);
}

#[test]
fn test_reject_altered_content() {
    let mut chain = chain_vector().build_chain();
    chain[0].cid = Cid::digest(b"something else");
    assert_eq!(fault_at(&chain).0, 0);
}

#[test]
fn test_reject_reordered_chain() {
    let mut chain = chain_vector().build_chain();
    chain.swap(0, 1);
    assert_eq!(fault_at(&chain).0, 0);
}

#[test]
fn test_reject_dropped_receipt() {
    let chain = chain_vector().build_chain();
    assert_eq!(fault_at(&chain[1..]).0, 0);
}

#[test]
fn test_reject_unknown_key() {
    let chain = chain_vector().build_chain();
    let other = KeyManager::generated();
    let verdict = verify_receipts(chain_vector().trace_id, &chain, None, other.public_keyset());
    assert!(matches!(
        verdict,
        ChainVerification::Invalid { index: 0, fault: ValidationError::UnknownKey(_) }
    ));
}

#[test]
fn test_reject_non_finite_number() {
    assert!(canonicalize(&Value::from(f64::NAN)).is_err());
    assert!(canonicalize(&Value::from(f64::INFINITY)).is_err());
}

#[tokio::test]
async fn test_reject_separator_in_trace_id() {
    let (gateway, _) = vector_gateway();
    let envelope = vector_envelope("2025-01-01T00:00:00Z").with_trace_id("a|b");
    let err = gateway.handle_envelope(envelope).await.unwrap_err();
    assert_eq!(err.status_code(), 400);
}
