//! ReceiptStore trait: the abstract interface for receipt persistence.
//!
//! This trait keeps the ledger storage-agnostic. Implementations include
//! SQLite, an append-only JSONL file, in-memory (for tests) and a caching
//! wrapper around any of them.

use std::collections::BTreeSet;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use odin_gateway_core::{ChainAnchor, Cid, KeyId, Receipt, StoredReceipt, Tombstone};

use crate::error::Result;

/// The current end of a trace's chain.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChainTail {
    /// No receipt has ever been appended to this trace.
    Empty,
    /// The most recent receipt.
    Receipt(Receipt),
    /// Every receipt has been pruned; the chain continues from here.
    Tombstone(Tombstone),
}

impl ChainTail {
    /// Where the next receipt attaches.
    pub fn anchor(&self) -> ChainAnchor {
        match self {
            ChainTail::Empty => ChainAnchor::GENESIS,
            ChainTail::Receipt(r) => r.next_anchor(),
            ChainTail::Tombstone(t) => t.anchor(),
        }
    }
}

/// A trace's chain and tombstone as of a single point in time, decoded
/// from the backend's persisted form.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ChainSnapshot {
    /// Stored records in append order.
    pub entries: Vec<StoredReceipt>,
    pub tombstone: Option<Tombstone>,
}

impl ChainSnapshot {
    /// A snapshot whose records all decoded.
    pub fn decoded(receipts: Vec<Receipt>, tombstone: Option<Tombstone>) -> Self {
        Self {
            entries: receipts.into_iter().map(StoredReceipt::Decoded).collect(),
            tombstone,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Number of records that failed to decode.
    pub fn malformed(&self) -> usize {
        self.entries.iter().filter(|e| e.receipt().is_none()).count()
    }

    /// The receipts, or the first record that failed to decode.
    pub fn into_receipts(self) -> std::result::Result<Vec<Receipt>, StoredReceipt> {
        self.entries
            .into_iter()
            .map(|entry| match entry {
                StoredReceipt::Decoded(receipt) => Ok(receipt),
                malformed => Err(malformed),
            })
            .collect()
    }
}

/// Result of a prune pass.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PruneReport {
    /// Number of receipts removed.
    pub removed: u64,
    /// Traces that received a new or updated tombstone.
    pub traces: Vec<String>,
}

/// Result of forwarding an accepted envelope.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum ForwardOutcome {
    /// The destination answered; `status` is its HTTP status code.
    Delivered { status: u16 },
    Failed { error: String },
    TimedOut,
}

/// Append-only record of a forwarding attempt, keyed by receipt identity.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ForwardAnnotation {
    pub receipt_cid: Cid,
    pub trace_id: String,
    pub destination: String,
    #[serde(flatten)]
    pub outcome: ForwardOutcome,
    pub recorded_at: String,
}

/// The ReceiptStore trait: async interface for receipt persistence.
///
/// All methods are async to support both blocking (SQLite, files) and
/// in-memory backends. Blocking backends use `spawn_blocking` internally.
///
/// # Design Notes
///
/// - **Atomic append**: `append` either stores the receipt or fails; no
///   partial receipt is ever readable.
/// - **Position check**: a receipt must attach at the trace's current tail
///   (`seq == tail.anchor().next_seq`), otherwise `Conflict` is returned.
/// - **Tombstones**: pruning removes a chain prefix and records a tombstone
///   so the surviving suffix still verifies.
/// - **Snapshots**: `snapshot` reads chain and tombstone atomically from the
///   persisted form, never from a cache. Records that no longer decode are
///   returned as [`StoredReceipt::Malformed`] instead of failing the read.
#[async_trait]
pub trait ReceiptStore: Send + Sync {
    // ─────────────────────────────────────────────────────────────────────────
    // Receipt Operations
    // ─────────────────────────────────────────────────────────────────────────

    /// Persist a receipt at its `(trace_id, seq)` position.
    async fn append(&self, receipt: &Receipt) -> Result<()>;

    /// The current tail of a trace.
    async fn tail(&self, trace_id: &str) -> Result<ChainTail>;

    /// All stored receipts of a trace in append order. Empty for unknown traces.
    async fn chain(&self, trace_id: &str) -> Result<Vec<Receipt>>;

    /// The tombstone of a trace, if a prefix has been pruned.
    async fn tombstone(&self, trace_id: &str) -> Result<Option<Tombstone>>;

    /// Chain and tombstone of a trace read together from persisted state.
    async fn snapshot(&self, trace_id: &str) -> Result<ChainSnapshot>;

    /// Distinct key ids referenced by stored receipts.
    async fn referenced_kids(&self) -> Result<BTreeSet<KeyId>>;

    // ─────────────────────────────────────────────────────────────────────────
    // Retention
    // ─────────────────────────────────────────────────────────────────────────

    /// Remove, per trace, the prefix of receipts timestamped before `cutoff`,
    /// leaving a tombstone stamped `pruned_at`.
    async fn prune_before(&self, cutoff: DateTime<Utc>, pruned_at: &str) -> Result<PruneReport>;

    // ─────────────────────────────────────────────────────────────────────────
    // Forwarding annotations
    // ─────────────────────────────────────────────────────────────────────────

    async fn annotate(&self, annotation: &ForwardAnnotation) -> Result<()>;

    async fn annotations(&self, receipt_cid: &Cid) -> Result<Vec<ForwardAnnotation>>;
}

/// Check that `receipt` attaches at `tail`.
pub(crate) fn check_position(tail: &ChainTail, receipt: &Receipt) -> Result<()> {
    let expected = tail.anchor().next_seq;
    if receipt.seq != expected {
        return Err(crate::error::StoreError::Conflict {
            trace_id: receipt.trace_id.clone(),
            seq: receipt.seq,
            expected,
        });
    }
    Ok(())
}

/// The leading decoded receipts of a stored chain.
pub(crate) fn decoded_prefix(entries: &[StoredReceipt]) -> Vec<Receipt> {
    entries
        .iter()
        .map_while(StoredReceipt::receipt)
        .cloned()
        .collect()
}

/// Number of leading receipts that are older than `cutoff`.
///
/// Only a prefix is pruned so the remaining chain stays contiguous.
/// Receipts with unparseable timestamps are never pruned.
pub(crate) fn prunable_prefix(chain: &[Receipt], cutoff: DateTime<Utc>) -> usize {
    chain
        .iter()
        .take_while(|r| {
            DateTime::parse_from_rfc3339(&r.ts)
                .map(|ts| ts.with_timezone(&Utc) < cutoff)
                .unwrap_or(false)
        })
        .count()
}

/// The tombstone after removing `removed` (a non-empty chain prefix).
pub(crate) fn next_tombstone(
    previous: Option<&Tombstone>,
    removed: &[Receipt],
    pruned_at: &str,
) -> Option<Tombstone> {
    let last = removed.last()?;
    Some(Tombstone {
        trace_id: last.trace_id.clone(),
        last_receipt_cid: last.receipt_cid,
        next_seq: last.seq + 1,
        pruned_count: previous.map_or(0, |t| t.pruned_count) + removed.len() as u64,
        pruned_at: pruned_at.to_owned(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use odin_gateway_core::{KeyManager, ReceiptDraft};

    fn receipts(ts: &[&str]) -> Vec<Receipt> {
        let km = KeyManager::generated();
        let mut out: Vec<Receipt> = Vec::new();
        for t in ts {
            let anchor = out.last().map_or(ChainAnchor::GENESIS, Receipt::next_anchor);
            out.push(
                ReceiptDraft::new("t1", anchor)
                    .timestamp(*t)
                    .types("a", "b")
                    .sign(&km)
                    .unwrap(),
            );
        }
        out
    }

    fn cutoff() -> DateTime<Utc> {
        DateTime::parse_from_rfc3339("2025-06-01T00:00:00Z")
            .unwrap()
            .with_timezone(&Utc)
    }

    #[test]
    fn test_prunable_prefix_stops_at_first_recent_receipt() {
        let chain = receipts(&[
            "2025-01-01T00:00:00Z",
            "2025-02-01T00:00:00Z",
            "2025-07-01T00:00:00Z",
            "2025-03-01T00:00:00Z",
        ]);
        assert_eq!(prunable_prefix(&chain, cutoff()), 2);
    }

    #[test]
    fn test_unparseable_timestamp_is_kept() {
        let chain = receipts(&["yesterday", "2025-01-01T00:00:00Z"]);
        assert_eq!(prunable_prefix(&chain, cutoff()), 0);
    }

    #[test]
    fn test_next_tombstone_accumulates() {
        let chain = receipts(&["2025-01-01T00:00:00Z", "2025-02-01T00:00:00Z"]);
        let first = next_tombstone(None, &chain[..1], "p1").unwrap();
        assert_eq!(first.next_seq, 1);
        assert_eq!(first.pruned_count, 1);

        let second = next_tombstone(Some(&first), &chain[1..], "p2").unwrap();
        assert_eq!(second.last_receipt_cid, chain[1].receipt_cid);
        assert_eq!(second.next_seq, 2);
        assert_eq!(second.pruned_count, 2);
        assert!(next_tombstone(Some(&second), &[], "p3").is_none());
    }

    #[test]
    fn test_tail_anchor() {
        let chain = receipts(&["2025-01-01T00:00:00Z"]);
        assert_eq!(ChainTail::Empty.anchor(), ChainAnchor::GENESIS);
        assert_eq!(ChainTail::Receipt(chain[0].clone()).anchor().next_seq, 1);
    }

    #[test]
    fn test_snapshot_surfaces_first_malformed_record() {
        let chain = receipts(&["2025-01-01T00:00:00Z", "2025-02-01T00:00:00Z"]);
        let mut snapshot = ChainSnapshot::decoded(chain.clone(), None);
        assert_eq!(snapshot.malformed(), 0);
        assert_eq!(snapshot.clone().into_receipts(), Ok(chain.clone()));

        let broken = StoredReceipt::Malformed {
            seq: Some(1),
            reason: "bad".into(),
        };
        snapshot.entries[1] = broken.clone();
        assert_eq!(snapshot.malformed(), 1);
        assert_eq!(decoded_prefix(&snapshot.entries), chain[..1].to_vec());
        assert_eq!(snapshot.into_receipts(), Err(broken));
    }

    #[test]
    fn test_annotation_serde_shape() {
        let a = ForwardAnnotation {
            receipt_cid: Cid::NULL,
            trace_id: "t1".into(),
            destination: "https://postman-echo.com/post".into(),
            outcome: ForwardOutcome::Delivered { status: 200 },
            recorded_at: "2025-01-01T00:00:00Z".into(),
        };
        let json = serde_json::to_value(&a).unwrap();
        assert_eq!(json["outcome"], "delivered");
        assert_eq!(json["status"], 200);
        let back: ForwardAnnotation = serde_json::from_value(json).unwrap();
        assert_eq!(back, a);
    }
}
