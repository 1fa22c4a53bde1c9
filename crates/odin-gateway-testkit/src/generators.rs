//! Proptest generators for property-based testing.

use proptest::collection::{btree_map, vec};
use proptest::prelude::*;

use odin_gateway_core::{Cid, KeyManager, Keypair, Receipt, ReceiptDraft, ChainAnchor, Value};

use crate::fixtures::key_manager_from_seed;

/// Generate an arbitrary Cid.
pub fn arb_cid() -> impl Strategy<Value = Cid> {
    any::<[u8; 32]>().prop_map(Cid)
}

/// Generate an arbitrary keypair.
pub fn arb_keypair() -> impl Strategy<Value = Keypair> {
    any::<[u8; 32]>().prop_map(|seed| Keypair::from_seed(&seed))
}

/// Generate a key manager with a derived kid.
pub fn arb_key_manager() -> impl Strategy<Value = KeyManager> {
    any::<[u8; 32]>().prop_map(key_manager_from_seed)
}

/// Generate a valid trace id.
pub fn arb_trace_id() -> impl Strategy<Value = String> {
    "[a-zA-Z0-9._:-]{1,64}"
}

/// Generate an RFC 3339 UTC timestamp.
pub fn arb_timestamp() -> impl Strategy<Value = String> {
    (2000u32..2100, 1u32..=12, 1u32..=28, 0u32..24, 0u32..60, 0u32..60).prop_map(
        |(y, mo, d, h, mi, s)| format!("{y:04}-{mo:02}-{d:02}T{h:02}:{mi:02}:{s:02}Z"),
    )
}

/// Generate a dotted type name such as `vendor.event.v1`.
pub fn arb_type_name() -> impl Strategy<Value = String> {
    "[a-z]{1,8}\\.[a-z]{1,8}\\.v[0-9]"
}

fn arb_leaf() -> impl Strategy<Value = Value> {
    prop_oneof![
        Just(Value::Null),
        any::<bool>().prop_map(Value::from),
        any::<i64>().prop_map(Value::from),
        any::<u64>().prop_map(Value::from),
        (-1.0e12f64..1.0e12).prop_map(Value::from),
        ".{0,16}".prop_map(Value::from),
    ]
}

/// Generate an arbitrary JSON value with finite numbers.
pub fn arb_value() -> impl Strategy<Value = Value> {
    arb_leaf().prop_recursive(4, 64, 8, |inner| {
        prop_oneof![
            vec(inner.clone(), 0..8).prop_map(Value::Array),
            btree_map(".{0,8}", inner, 0..8).prop_map(Value::Object),
        ]
    })
}

/// Parameters for generating a single receipt.
#[derive(Debug, Clone)]
pub struct ReceiptParams {
    pub seed: [u8; 32],
    pub trace_id: String,
    pub seq: u64,
    pub prev_cid: Cid,
    pub content: Cid,
    pub ts: String,
    pub payload_type: String,
    pub target_type: String,
}

impl Arbitrary for ReceiptParams {
    type Parameters = ();
    type Strategy = BoxedStrategy<Self>;

    fn arbitrary_with(_: Self::Parameters) -> Self::Strategy {
        (
            any::<[u8; 32]>(),
            arb_trace_id(),
            0u64..1_000_000,
            arb_cid(),
            arb_cid(),
            arb_timestamp(),
            arb_type_name(),
            arb_type_name(),
        )
            .prop_map(
                |(seed, trace_id, seq, prev_cid, content, ts, payload_type, target_type)| {
                    ReceiptParams {
                        seed,
                        trace_id,
                        seq,
                        prev_cid,
                        content,
                        ts,
                        payload_type,
                        target_type,
                    }
                },
            )
            .boxed()
    }
}

impl ReceiptParams {
    pub fn key_manager(&self) -> KeyManager {
        key_manager_from_seed(self.seed)
    }

    /// Sign a receipt from these parameters.
    pub fn build(&self) -> Receipt {
        let anchor = if self.seq == 0 {
            ChainAnchor::GENESIS
        } else {
            ChainAnchor {
                prev_cid: self.prev_cid,
                next_seq: self.seq,
            }
        };
        ReceiptDraft::new(self.trace_id.clone(), anchor)
            .content(self.content)
            .timestamp(self.ts.clone())
            .types(self.payload_type.clone(), self.target_type.clone())
            .sign(&self.key_manager())
            .expect("generated receipt fields are valid")
    }
}
