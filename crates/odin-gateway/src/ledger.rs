//! The receipt ledger: builds, links, persists and verifies receipt chains.
//!
//! Appends to one trace are serialized by a per-trace async mutex held
//! across "read tail + sign + write". Appends to different traces run
//! concurrently. No network activity happens inside the critical section.
//! Verification reads a store snapshot, so chain and tombstone always come
//! from the same point in time.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use chrono::{DateTime, SecondsFormat, Utc};

use odin_gateway_core::{
    validate_trace_id, verify_stored, ChainVerification, Cid, KeyId, KeyManager, Receipt,
    ReceiptDraft, Tombstone,
};
use odin_gateway_store::{ChainSnapshot, ForwardAnnotation, PruneReport, ReceiptStore, StoreError};

use crate::error::{GatewayError, Result};

type TraceLock = Arc<tokio::sync::Mutex<()>>;

/// A claim on a trace's append lock. Dropping it, on any path, removes the
/// lock table entry once nobody else holds it.
struct TraceLease<'a> {
    ledger: &'a ReceiptLedger,
    trace_id: &'a str,
    lock: Option<TraceLock>,
}

impl TraceLease<'_> {
    /// Wait for the trace. `None` only once the lease is being dropped.
    async fn acquire(&self) -> Option<tokio::sync::MutexGuard<'_, ()>> {
        Some(self.lock.as_ref()?.lock().await)
    }
}

impl Drop for TraceLease<'_> {
    fn drop(&mut self) {
        self.lock.take();
        self.ledger.release_trace_lock(self.trace_id);
    }
}

/// Current UTC time as RFC 3339 with microseconds and a `Z` suffix.
pub fn now_rfc3339() -> String {
    Utc::now().to_rfc3339_opts(SecondsFormat::Micros, true)
}

/// Append-only, hash-linked receipt chains over a [`ReceiptStore`].
pub struct ReceiptLedger {
    store: Arc<dyn ReceiptStore>,
    keys: Arc<KeyManager>,
    locks: Mutex<HashMap<String, TraceLock>>,
}

impl ReceiptLedger {
    pub fn new(store: Arc<dyn ReceiptStore>, keys: Arc<KeyManager>) -> Self {
        Self {
            store,
            keys,
            locks: Mutex::new(HashMap::new()),
        }
    }

    pub fn store(&self) -> &Arc<dyn ReceiptStore> {
        &self.store
    }

    pub fn keys(&self) -> &Arc<KeyManager> {
        &self.keys
    }

    /// Append a receipt for `envelope_cid` at the tail of `trace_id`.
    pub async fn append(
        &self,
        trace_id: &str,
        envelope_cid: Cid,
        payload_type: &str,
        target_type: &str,
        timestamp: &str,
    ) -> Result<Receipt> {
        validate_trace_id(trace_id)?;

        let lease = self.trace_lease(trace_id)?;
        let result = {
            let _guard = lease.acquire().await;
            self.append_locked(trace_id, envelope_cid, payload_type, target_type, timestamp)
                .await
        };
        drop(lease);

        let receipt = result?;
        tracing::debug!(
            trace_id,
            seq = receipt.seq,
            receipt_cid = %receipt.receipt_cid,
            kid = %receipt.kid,
            "appended receipt"
        );
        Ok(receipt)
    }

    async fn append_locked(
        &self,
        trace_id: &str,
        envelope_cid: Cid,
        payload_type: &str,
        target_type: &str,
        timestamp: &str,
    ) -> Result<Receipt> {
        let anchor = self.store.tail(trace_id).await?.anchor();
        let receipt = ReceiptDraft::new(trace_id, anchor)
            .content(envelope_cid)
            .timestamp(timestamp)
            .types(payload_type, target_type)
            .sign(&self.keys)?;

        self.store.append(&receipt).await.map_err(|e| {
            tracing::error!(trace_id, seq = receipt.seq, error = %e, "ledger write failed");
            GatewayError::LedgerWrite(e)
        })?;
        Ok(receipt)
    }

    /// Ordered receipts of a trace; empty for unknown traces.
    pub async fn read_chain(&self, trace_id: &str) -> Result<Vec<Receipt>> {
        Ok(self.store.chain(trace_id).await?)
    }

    pub async fn tombstone(&self, trace_id: &str) -> Result<Option<Tombstone>> {
        Ok(self.store.tombstone(trace_id).await?)
    }

    pub async fn verify_chain(&self, trace_id: &str) -> Result<bool> {
        Ok(self.verify_chain_detailed(trace_id).await?.is_valid())
    }

    /// Chain and tombstone of a trace as persisted, read atomically.
    pub async fn snapshot(&self, trace_id: &str) -> Result<ChainSnapshot> {
        Ok(self.store.snapshot(trace_id).await?)
    }

    /// Walk the persisted chain and report the first fault, if any.
    ///
    /// Records that no longer decode count as faults of this trace only.
    pub async fn verify_chain_detailed(&self, trace_id: &str) -> Result<ChainVerification> {
        let snapshot = self.store.snapshot(trace_id).await?;
        let verification = verify_stored(
            trace_id,
            &snapshot.entries,
            snapshot.tombstone.as_ref(),
            &*self.keys,
        );

        if let ChainVerification::Invalid { index, fault } = &verification {
            tracing::warn!(trace_id, index, %fault, "chain verification failed");
        }
        Ok(verification)
    }

    /// Remove receipts older than `max_age`, leaving tombstone anchors.
    pub async fn prune(&self, max_age: Duration) -> Result<u64> {
        let cutoff = cutoff_for(Utc::now(), max_age);
        let PruneReport { removed, traces } =
            self.store.prune_before(cutoff, &now_rfc3339()).await?;
        if removed > 0 {
            tracing::info!(removed, traces = traces.len(), %cutoff, "pruned receipts");
        }
        Ok(removed)
    }

    /// Kids referenced by stored receipts that no registered key resolves.
    pub async fn audit_keys(&self) -> Result<Vec<KeyId>> {
        let referenced = self.store.referenced_kids().await?;
        let unresolved = self.keys.unresolved(&referenced);
        for kid in &unresolved {
            tracing::warn!(%kid, "stored receipts reference a key missing from the key set");
        }
        Ok(unresolved)
    }

    pub async fn annotations(&self, receipt_cid: &Cid) -> Result<Vec<ForwardAnnotation>> {
        Ok(self.store.annotations(receipt_cid).await?)
    }

    fn trace_lease<'a>(&'a self, trace_id: &'a str) -> Result<TraceLease<'a>> {
        let mut locks = self.locks.lock().map_err(|e| {
            GatewayError::Store(StoreError::Unavailable(format!("trace lock table poisoned: {e}")))
        })?;
        Ok(TraceLease {
            ledger: self,
            trace_id,
            lock: Some(locks.entry(trace_id.to_owned()).or_default().clone()),
        })
    }

    fn release_trace_lock(&self, trace_id: &str) {
        if let Ok(mut locks) = self.locks.lock() {
            if locks
                .get(trace_id)
                .is_some_and(|lock| Arc::strong_count(lock) == 1)
            {
                locks.remove(trace_id);
            }
        }
    }
}

fn cutoff_for(now: DateTime<Utc>, max_age: Duration) -> DateTime<Utc> {
    chrono::Duration::from_std(max_age)
        .ok()
        .and_then(|age| now.checked_sub_signed(age))
        .unwrap_or(DateTime::<Utc>::MIN_UTC)
}
