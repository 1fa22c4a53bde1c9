//! Test fixtures for common scenarios.

use odin_gateway_core::{
    cid_of_value, Jwks, KeyId, KeyManager, Keypair, PublicKeyset, Receipt, ReceiptDraft, Value,
};
use odin_gateway_store::{MemoryStore, ReceiptStore, Result};

/// Payload type used by fixture receipts.
pub const FIXTURE_PAYLOAD_TYPE: &str = "vendor.event.v1";
/// Target type used by fixture receipts.
pub const FIXTURE_TARGET_TYPE: &str = "canonical.event.v1";

/// Deterministic timestamp for the `n`th fixture receipt.
///
/// One second apart, starting at 2025-01-01T00:00:00Z.
pub fn fixture_timestamp(n: u64) -> String {
    let (h, m, s) = (n / 3600, (n / 60) % 60, n % 60);
    format!("2025-01-01T{h:02}:{m:02}:{s:02}Z")
}

/// A key manager for a seed, with the derived kid.
pub fn key_manager_from_seed(seed: [u8; 32]) -> KeyManager {
    KeyManager::new(Keypair::from_seed(&seed), None, &Jwks::default())
        .expect("a lone active key cannot collide")
}

/// A test fixture with a signing key and an in-memory store.
pub struct TestFixture {
    pub seed: [u8; 32],
    pub keys: KeyManager,
    pub store: MemoryStore,
}

impl TestFixture {
    /// Create a new test fixture with a fixed seed.
    pub fn new() -> Self {
        Self::with_seed([1u8; 32])
    }

    /// Create a fixture with a specific seed.
    pub fn with_seed(seed: [u8; 32]) -> Self {
        Self {
            seed,
            keys: key_manager_from_seed(seed),
            store: MemoryStore::new(),
        }
    }

    pub fn kid(&self) -> &KeyId {
        self.keys.active_kid()
    }

    /// The keys a third party would fetch from the JWKS endpoint.
    pub fn published_keys(&self) -> PublicKeyset {
        PublicKeyset::from_jwks(&self.keys.jwks()).expect("own JWKS parses")
    }

    /// Payload for the `n`th fixture envelope.
    pub fn payload(n: u64) -> Value {
        Value::object([("n", Value::from(n)), ("hello", Value::from("world"))])
    }

    /// Sign the next receipt for `trace_id` against `store` without appending.
    ///
    /// Panics if `trace_id` is not a valid trace id.
    pub async fn next_receipt(&self, store: &dyn ReceiptStore, trace_id: &str) -> Result<Receipt> {
        let anchor = store.tail(trace_id).await?.anchor();
        let content =
            cid_of_value(&Self::payload(anchor.next_seq)).expect("fixture payload canonicalizes");
        Ok(ReceiptDraft::new(trace_id, anchor)
            .content(content)
            .timestamp(fixture_timestamp(anchor.next_seq))
            .types(FIXTURE_PAYLOAD_TYPE, FIXTURE_TARGET_TYPE)
            .sign(&self.keys)
            .expect("fixture receipt signs"))
    }

    /// Append `count` receipts to `trace_id` in `store`.
    pub async fn append_chain_to(
        &self,
        store: &dyn ReceiptStore,
        trace_id: &str,
        count: usize,
    ) -> Result<Vec<Receipt>> {
        let mut appended = Vec::with_capacity(count);
        for _ in 0..count {
            let receipt = self.next_receipt(store, trace_id).await?;
            store.append(&receipt).await?;
            appended.push(receipt);
        }
        Ok(appended)
    }

    /// Append `count` receipts to `trace_id` in the fixture's own store.
    pub async fn append_chain(&self, trace_id: &str, count: usize) -> Result<Vec<Receipt>> {
        self.append_chain_to(&self.store, trace_id, count).await
    }
}

impl Default for TestFixture {
    fn default() -> Self {
        Self::new()
    }
}

/// Create fixtures for independent gateways with distinct keys.
pub fn multi_party_fixtures(count: usize) -> Vec<TestFixture> {
    (0..count)
        .map(|i| {
            let mut seed = [0u8; 32];
            seed[0] = i as u8;
            seed[1] = (i >> 8) as u8;
            TestFixture::with_seed(seed)
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use odin_gateway_core::verify_receipts;

    #[test]
    fn test_fixture_timestamps() {
        assert_eq!(fixture_timestamp(0), "2025-01-01T00:00:00Z");
        assert_eq!(fixture_timestamp(61), "2025-01-01T00:01:01Z");
        assert_eq!(fixture_timestamp(3600), "2025-01-01T01:00:00Z");
    }

    #[test]
    fn test_fixture_is_deterministic() {
        let a = TestFixture::new();
        let b = TestFixture::new();
        assert_eq!(a.kid(), b.kid());
        assert_eq!(a.keys.jwks(), b.keys.jwks());
    }

    #[tokio::test]
    async fn test_append_chain_links() {
        let fixture = TestFixture::new();
        let chain = fixture.append_chain("t1", 3).await.unwrap();

        assert_eq!(chain.len(), 3);
        assert!(chain[0].prev_cid.is_null());
        assert_eq!(chain[2].seq, 2);
        assert_eq!(chain[2].prev_cid, chain[1].receipt_cid);

        let stored = fixture.store.chain("t1").await.unwrap();
        assert_eq!(stored, chain);
        assert!(verify_receipts("t1", &stored, None, &fixture.published_keys()).is_valid());
    }

    #[test]
    fn test_multi_party_keys_differ() {
        let parties = multi_party_fixtures(3);
        assert_ne!(parties[0].kid(), parties[1].kid());
        assert_ne!(parties[1].kid(), parties[2].kid());
    }
}
