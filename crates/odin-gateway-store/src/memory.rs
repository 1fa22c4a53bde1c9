//! In-memory implementation of the ReceiptStore trait.
//!
//! This is primarily for testing. It has the same semantics as the
//! persistent backends but keeps everything in memory.

use std::collections::{BTreeSet, HashMap};
use std::sync::{RwLock, RwLockReadGuard, RwLockWriteGuard};

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use odin_gateway_core::{Cid, KeyId, Receipt, Tombstone};

use crate::error::{Result, StoreError};
use crate::traits::{
    check_position, next_tombstone, prunable_prefix, ChainSnapshot, ChainTail, ForwardAnnotation,
    PruneReport, ReceiptStore,
};

/// In-memory store implementation.
///
/// All data is lost when the store is dropped. Thread-safe via RwLock.
#[derive(Default)]
pub struct MemoryStore {
    inner: RwLock<MemoryStoreInner>,
}

/// Receipts and tombstones per trace plus forwarding annotations.
///
/// Shared with the JSONL backend, which keeps the same index in memory.
#[derive(Default, Clone)]
pub(crate) struct MemoryStoreInner {
    traces: HashMap<String, TraceLog>,
    annotations: HashMap<Cid, Vec<ForwardAnnotation>>,
}

#[derive(Default, Clone)]
struct TraceLog {
    receipts: Vec<Receipt>,
    tombstone: Option<Tombstone>,
    /// Why some persisted record of this trace could not be loaded.
    damaged: Option<String>,
}

impl MemoryStoreInner {
    pub(crate) fn tail(&self, trace_id: &str) -> ChainTail {
        match self.traces.get(trace_id) {
            Some(log) => match (log.receipts.last(), &log.tombstone) {
                (Some(r), _) => ChainTail::Receipt(r.clone()),
                (None, Some(t)) => ChainTail::Tombstone(t.clone()),
                (None, None) => ChainTail::Empty,
            },
            None => ChainTail::Empty,
        }
    }

    /// Appends attach at the tail; a trace with unreadable records has no
    /// trustworthy tail and refuses them.
    pub(crate) fn check_append(&self, receipt: &Receipt) -> Result<()> {
        if let Some(reason) = self.damage(&receipt.trace_id) {
            return Err(StoreError::InvalidData(format!(
                "trace {} has unreadable records: {reason}",
                receipt.trace_id
            )));
        }
        check_position(&self.tail(&receipt.trace_id), receipt)
    }

    pub(crate) fn mark_damaged(&mut self, trace_id: &str, reason: String) {
        let log = self.traces.entry(trace_id.to_owned()).or_default();
        log.damaged.get_or_insert(reason);
    }

    pub(crate) fn damage(&self, trace_id: &str) -> Option<&str> {
        self.traces.get(trace_id).and_then(|log| log.damaged.as_deref())
    }

    /// Insert without position checks; callers check first.
    pub(crate) fn push(&mut self, receipt: Receipt) {
        self.traces
            .entry(receipt.trace_id.clone())
            .or_default()
            .receipts
            .push(receipt);
    }

    pub(crate) fn chain(&self, trace_id: &str) -> Vec<Receipt> {
        self.traces
            .get(trace_id)
            .map(|log| log.receipts.clone())
            .unwrap_or_default()
    }

    pub(crate) fn tombstone(&self, trace_id: &str) -> Option<Tombstone> {
        self.traces.get(trace_id).and_then(|log| log.tombstone.clone())
    }

    pub(crate) fn snapshot(&self, trace_id: &str) -> ChainSnapshot {
        ChainSnapshot::decoded(self.chain(trace_id), self.tombstone(trace_id))
    }

    /// Install a tombstone, dropping any receipts it covers.
    ///
    /// Covered receipts only exist when a prune was interrupted between
    /// recording the tombstone and rewriting the log.
    pub(crate) fn set_tombstone(&mut self, tombstone: Tombstone) {
        let log = self.traces.entry(tombstone.trace_id.clone()).or_default();
        log.receipts.retain(|r| r.seq >= tombstone.next_seq);
        log.tombstone = Some(tombstone);
    }

    pub(crate) fn referenced_kids(&self) -> BTreeSet<KeyId> {
        self.traces
            .values()
            .flat_map(|log| log.receipts.iter().map(|r| r.kid.clone()))
            .collect()
    }

    /// Drop old prefixes and return the new tombstones. Damaged traces are
    /// left alone.
    pub(crate) fn prune_before(
        &mut self,
        cutoff: DateTime<Utc>,
        pruned_at: &str,
    ) -> (PruneReport, Vec<Tombstone>) {
        let mut report = PruneReport::default();
        let mut tombstones = Vec::new();

        for (trace_id, log) in self.traces.iter_mut() {
            if log.damaged.is_some() {
                continue;
            }
            let n = prunable_prefix(&log.receipts, cutoff);
            if n == 0 {
                continue;
            }
            let removed: Vec<Receipt> = log.receipts.drain(..n).collect();
            if let Some(t) = next_tombstone(log.tombstone.as_ref(), &removed, pruned_at) {
                log.tombstone = Some(t.clone());
                tombstones.push(t);
            }
            report.removed += n as u64;
            report.traces.push(trace_id.clone());
        }

        report.traces.sort();
        (report, tombstones)
    }

    pub(crate) fn annotate(&mut self, annotation: ForwardAnnotation) {
        self.annotations
            .entry(annotation.receipt_cid)
            .or_default()
            .push(annotation);
    }

    pub(crate) fn annotations(&self, receipt_cid: &Cid) -> Vec<ForwardAnnotation> {
        self.annotations.get(receipt_cid).cloned().unwrap_or_default()
    }
}

impl MemoryStore {
    /// Create a new empty in-memory store.
    pub fn new() -> Self {
        Self::default()
    }

    fn read(&self) -> Result<RwLockReadGuard<'_, MemoryStoreInner>> {
        self.inner
            .read()
            .map_err(|e| StoreError::Unavailable(format!("lock poisoned: {e}")))
    }

    fn write(&self) -> Result<RwLockWriteGuard<'_, MemoryStoreInner>> {
        self.inner
            .write()
            .map_err(|e| StoreError::Unavailable(format!("lock poisoned: {e}")))
    }
}

#[async_trait]
impl ReceiptStore for MemoryStore {
    async fn append(&self, receipt: &Receipt) -> Result<()> {
        let mut inner = self.write()?;
        inner.check_append(receipt)?;
        inner.push(receipt.clone());
        Ok(())
    }

    async fn tail(&self, trace_id: &str) -> Result<ChainTail> {
        Ok(self.read()?.tail(trace_id))
    }

    async fn chain(&self, trace_id: &str) -> Result<Vec<Receipt>> {
        Ok(self.read()?.chain(trace_id))
    }

    async fn tombstone(&self, trace_id: &str) -> Result<Option<Tombstone>> {
        Ok(self.read()?.tombstone(trace_id))
    }

    async fn snapshot(&self, trace_id: &str) -> Result<ChainSnapshot> {
        Ok(self.read()?.snapshot(trace_id))
    }

    async fn referenced_kids(&self) -> Result<BTreeSet<KeyId>> {
        Ok(self.read()?.referenced_kids())
    }

    async fn prune_before(&self, cutoff: DateTime<Utc>, pruned_at: &str) -> Result<PruneReport> {
        Ok(self.write()?.prune_before(cutoff, pruned_at).0)
    }

    async fn annotate(&self, annotation: &ForwardAnnotation) -> Result<()> {
        self.write()?.annotate(annotation.clone());
        Ok(())
    }

    async fn annotations(&self, receipt_cid: &Cid) -> Result<Vec<ForwardAnnotation>> {
        Ok(self.read()?.annotations(receipt_cid))
    }
}
