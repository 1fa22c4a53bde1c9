//! SQLite implementation of the ReceiptStore trait.
//!
//! This is the primary persistent backend. It uses rusqlite with bundled
//! SQLite, wrapped in async via tokio::spawn_blocking. Appends run in a
//! transaction guarded by `UNIQUE(trace_id, seq)`.

use std::collections::BTreeSet;
use std::path::Path;
use std::str::FromStr;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rusqlite::types::Type;
use rusqlite::{params, Connection, OptionalExtension};

use odin_gateway_core::{Cid, CoreError, KeyId, Receipt, Signature, StoredReceipt, Tombstone};

use crate::error::{Result, StoreError};
use crate::migration;
use crate::traits::{
    check_position, decoded_prefix, next_tombstone, prunable_prefix, ChainSnapshot, ChainTail,
    ForwardAnnotation, ForwardOutcome, PruneReport, ReceiptStore,
};

const RECEIPT_COLUMNS: &str =
    "receipt_cid, cid, trace_id, seq, ts, prev_cid, kid, payload_type, target_type, signature";

/// SQLite-based store implementation.
///
/// Thread-safe via internal Mutex. All operations use spawn_blocking
/// to avoid blocking the async runtime.
pub struct SqliteStore {
    /// The SQLite connection, protected by a mutex.
    conn: Arc<Mutex<Connection>>,
}

impl SqliteStore {
    /// Open a SQLite database at the given path.
    ///
    /// Creates the file and runs migrations if it doesn't exist.
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let mut conn = Connection::open(path)?;
        migration::migrate(&mut conn)?;
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    /// Open an in-memory SQLite database.
    ///
    /// Useful for testing.
    pub fn open_memory() -> Result<Self> {
        let mut conn = Connection::open_in_memory()?;
        migration::migrate(&mut conn)?;
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    /// Execute a blocking operation on the connection.
    async fn blocking<F, T>(&self, f: F) -> Result<T>
    where
        F: FnOnce(&mut Connection) -> Result<T> + Send + 'static,
        T: Send + 'static,
    {
        let conn = self.conn.clone();
        tokio::task::spawn_blocking(move || {
            let mut conn = conn
                .lock()
                .map_err(|e| StoreError::Unavailable(format!("mutex poisoned: {e}")))?;
            f(&mut conn)
        })
        .await
        .map_err(|e| StoreError::Unavailable(format!("spawn_blocking failed: {e}")))?
    }
}

fn parse_column<T>(row: &rusqlite::Row<'_>, idx: usize) -> rusqlite::Result<T>
where
    T: FromStr<Err = CoreError>,
{
    let text: String = row.get(idx)?;
    text.parse()
        .map_err(|e| rusqlite::Error::FromSqlConversionFailure(idx, Type::Text, Box::new(e)))
}

// Helper to convert a row to Receipt
fn row_to_receipt(row: &rusqlite::Row<'_>) -> rusqlite::Result<Receipt> {
    let seq: i64 = row.get(3)?;
    let kid: String = row.get(6)?;
    let signature: String = row.get(9)?;

    Ok(Receipt {
        receipt_cid: parse_column(row, 0)?,
        cid: parse_column(row, 1)?,
        trace_id: row.get(2)?,
        seq: u64::try_from(seq).map_err(|e| {
            rusqlite::Error::FromSqlConversionFailure(3, Type::Integer, Box::new(e))
        })?,
        ts: row.get(4)?,
        prev_cid: parse_column(row, 5)?,
        kid: KeyId::new(kid)
            .map_err(|e| rusqlite::Error::FromSqlConversionFailure(6, Type::Text, Box::new(e)))?,
        payload_type: row.get(7)?,
        target_type: row.get(8)?,
        signature: Signature::from_b64u(&signature)
            .map_err(|e| rusqlite::Error::FromSqlConversionFailure(9, Type::Text, Box::new(e)))?,
    })
}

/// Like [`row_to_receipt`], but a row whose columns no longer convert
/// becomes a malformed entry instead of an error.
fn row_to_stored(row: &rusqlite::Row<'_>) -> rusqlite::Result<StoredReceipt> {
    match row_to_receipt(row) {
        Ok(receipt) => Ok(StoredReceipt::Decoded(receipt)),
        Err(
            e @ (rusqlite::Error::FromSqlConversionFailure(..)
            | rusqlite::Error::InvalidColumnType(..)
            | rusqlite::Error::IntegralValueOutOfRange(..)),
        ) => Ok(StoredReceipt::Malformed {
            seq: row
                .get::<_, i64>(3)
                .ok()
                .and_then(|seq| u64::try_from(seq).ok()),
            reason: e.to_string(),
        }),
        Err(e) => Err(e),
    }
}

fn row_to_tombstone(row: &rusqlite::Row<'_>) -> rusqlite::Result<Tombstone> {
    let next_seq: i64 = row.get(2)?;
    let pruned_count: i64 = row.get(3)?;
    Ok(Tombstone {
        trace_id: row.get(0)?,
        last_receipt_cid: parse_column(row, 1)?,
        next_seq: next_seq as u64,
        pruned_count: pruned_count as u64,
        pruned_at: row.get(4)?,
    })
}

fn chain_in(conn: &Connection, trace_id: &str) -> Result<Vec<Receipt>> {
    let mut stmt = conn.prepare(&format!(
        "SELECT {RECEIPT_COLUMNS} FROM receipts WHERE trace_id = ?1 ORDER BY seq"
    ))?;
    let receipts = stmt
        .query_map(params![trace_id], row_to_receipt)?
        .collect::<rusqlite::Result<Vec<_>>>()?;
    Ok(receipts)
}

fn entries_in(conn: &Connection, trace_id: &str) -> Result<Vec<StoredReceipt>> {
    let mut stmt = conn.prepare(&format!(
        "SELECT {RECEIPT_COLUMNS} FROM receipts WHERE trace_id = ?1 ORDER BY seq"
    ))?;
    let entries = stmt
        .query_map(params![trace_id], row_to_stored)?
        .collect::<rusqlite::Result<Vec<_>>>()?;
    Ok(entries)
}

fn snapshot_in(conn: &mut Connection, trace_id: &str) -> Result<ChainSnapshot> {
    let tx = conn.transaction()?;
    let mut entries = Vec::new();
    let tombstone = match tombstone_in(&tx, trace_id) {
        Ok(tombstone) => tombstone,
        Err(StoreError::Database(e)) if is_conversion_error(&e) => {
            entries.push(StoredReceipt::Malformed {
                seq: None,
                reason: format!("unreadable tombstone: {e}"),
            });
            None
        }
        Err(e) => return Err(e),
    };
    entries.extend(entries_in(&tx, trace_id)?);
    tx.commit()?;
    Ok(ChainSnapshot { entries, tombstone })
}

fn is_conversion_error(e: &rusqlite::Error) -> bool {
    matches!(
        e,
        rusqlite::Error::FromSqlConversionFailure(..)
            | rusqlite::Error::InvalidColumnType(..)
            | rusqlite::Error::IntegralValueOutOfRange(..)
    )
}

fn tombstone_in(conn: &Connection, trace_id: &str) -> Result<Option<Tombstone>> {
    conn.query_row(
        "SELECT trace_id, last_receipt_cid, next_seq, pruned_count, pruned_at
         FROM tombstones WHERE trace_id = ?1",
        params![trace_id],
        row_to_tombstone,
    )
    .optional()
    .map_err(StoreError::from)
}

fn tail_in(conn: &Connection, trace_id: &str) -> Result<ChainTail> {
    let last = conn
        .query_row(
            &format!(
                "SELECT {RECEIPT_COLUMNS} FROM receipts WHERE trace_id = ?1
                 ORDER BY seq DESC LIMIT 1"
            ),
            params![trace_id],
            row_to_receipt,
        )
        .optional()?;
    if let Some(receipt) = last {
        return Ok(ChainTail::Receipt(receipt));
    }
    Ok(match tombstone_in(conn, trace_id)? {
        Some(t) => ChainTail::Tombstone(t),
        None => ChainTail::Empty,
    })
}

#[async_trait]
impl ReceiptStore for SqliteStore {
    async fn append(&self, receipt: &Receipt) -> Result<()> {
        let receipt = receipt.clone();
        self.blocking(move |conn| {
            let tx = conn.transaction()?;
            check_position(&tail_in(&tx, &receipt.trace_id)?, &receipt)?;

            tx.execute(
                &format!(
                    "INSERT INTO receipts ({RECEIPT_COLUMNS})
                     VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)"
                ),
                params![
                    receipt.receipt_cid.to_string(),
                    receipt.cid.to_string(),
                    receipt.trace_id,
                    receipt.seq as i64,
                    receipt.ts,
                    receipt.prev_cid.to_string(),
                    receipt.kid.as_str(),
                    receipt.payload_type,
                    receipt.target_type,
                    receipt.signature.to_b64u(),
                ],
            )?;

            tx.commit()?;
            Ok(())
        })
        .await
    }

    async fn tail(&self, trace_id: &str) -> Result<ChainTail> {
        let trace_id = trace_id.to_owned();
        self.blocking(move |conn| tail_in(conn, &trace_id)).await
    }

    async fn chain(&self, trace_id: &str) -> Result<Vec<Receipt>> {
        let trace_id = trace_id.to_owned();
        self.blocking(move |conn| chain_in(conn, &trace_id)).await
    }

    async fn tombstone(&self, trace_id: &str) -> Result<Option<Tombstone>> {
        let trace_id = trace_id.to_owned();
        self.blocking(move |conn| tombstone_in(conn, &trace_id)).await
    }

    async fn snapshot(&self, trace_id: &str) -> Result<ChainSnapshot> {
        let trace_id = trace_id.to_owned();
        self.blocking(move |conn| snapshot_in(conn, &trace_id)).await
    }

    async fn referenced_kids(&self) -> Result<BTreeSet<KeyId>> {
        self.blocking(|conn| {
            let mut stmt = conn.prepare("SELECT DISTINCT kid FROM receipts")?;
            let kids = stmt
                .query_map([], |row| row.get::<_, String>(0))?
                .collect::<rusqlite::Result<Vec<_>>>()?;
            kids.into_iter()
                .map(|k| KeyId::new(k).map_err(|e| StoreError::InvalidData(e.to_string())))
                .collect()
        })
        .await
    }

    async fn prune_before(&self, cutoff: DateTime<Utc>, pruned_at: &str) -> Result<PruneReport> {
        let pruned_at = pruned_at.to_owned();
        self.blocking(move |conn| {
            let tx = conn.transaction()?;
            let trace_ids: Vec<String> = {
                let mut stmt = tx.prepare("SELECT DISTINCT trace_id FROM receipts ORDER BY trace_id")?;
                let ids = stmt
                    .query_map([], |row| row.get(0))?
                    .collect::<rusqlite::Result<Vec<_>>>()?;
                ids
            };

            let mut report = PruneReport::default();
            for trace_id in trace_ids {
                // Only the prefix before an undecodable row can be pruned
                let entries = entries_in(&tx, &trace_id)?;
                let chain = decoded_prefix(&entries);
                let n = prunable_prefix(&chain, cutoff);
                if n == 0 {
                    continue;
                }
                let removed = &chain[..n];
                let previous = match tombstone_in(&tx, &trace_id) {
                    Ok(previous) => previous,
                    Err(StoreError::Database(e)) if is_conversion_error(&e) => {
                        tracing::warn!(trace_id = %trace_id, error = %e, "unreadable tombstone, trace not pruned");
                        continue;
                    }
                    Err(e) => return Err(e),
                };
                let Some(tombstone) = next_tombstone(previous.as_ref(), removed, &pruned_at) else {
                    continue;
                };

                tx.execute(
                    "DELETE FROM receipts WHERE trace_id = ?1 AND seq < ?2",
                    params![trace_id, tombstone.next_seq as i64],
                )?;
                tx.execute(
                    "INSERT OR REPLACE INTO tombstones
                        (trace_id, last_receipt_cid, next_seq, pruned_count, pruned_at)
                     VALUES (?1, ?2, ?3, ?4, ?5)",
                    params![
                        tombstone.trace_id,
                        tombstone.last_receipt_cid.to_string(),
                        tombstone.next_seq as i64,
                        tombstone.pruned_count as i64,
                        tombstone.pruned_at,
                    ],
                )?;

                report.removed += n as u64;
                report.traces.push(trace_id);
            }

            tx.commit()?;
            Ok(report)
        })
        .await
    }

    async fn annotate(&self, annotation: &ForwardAnnotation) -> Result<()> {
        let annotation = annotation.clone();
        self.blocking(move |conn| {
            conn.execute(
                "INSERT INTO forward_annotations
                    (receipt_cid, trace_id, destination, outcome, recorded_at)
                 VALUES (?1, ?2, ?3, ?4, ?5)",
                params![
                    annotation.receipt_cid.to_string(),
                    annotation.trace_id,
                    annotation.destination,
                    serde_json::to_string(&annotation.outcome)?,
                    annotation.recorded_at,
                ],
            )?;
            Ok(())
        })
        .await
    }

    async fn annotations(&self, receipt_cid: &Cid) -> Result<Vec<ForwardAnnotation>> {
        let receipt_cid = *receipt_cid;
        self.blocking(move |conn| {
            let mut stmt = conn.prepare(
                "SELECT trace_id, destination, outcome, recorded_at
                 FROM forward_annotations WHERE receipt_cid = ?1 ORDER BY id",
            )?;
            let rows = stmt
                .query_map(params![receipt_cid.to_string()], |row| {
                    Ok((
                        row.get::<_, String>(0)?,
                        row.get::<_, String>(1)?,
                        row.get::<_, String>(2)?,
                        row.get::<_, String>(3)?,
                    ))
                })?
                .collect::<rusqlite::Result<Vec<_>>>()?;

            rows.into_iter()
                .map(|(trace_id, destination, outcome, recorded_at)| -> Result<ForwardAnnotation> {
                    Ok(ForwardAnnotation {
                        receipt_cid,
                        trace_id,
                        destination,
                        outcome: serde_json::from_str::<ForwardOutcome>(&outcome)?,
                        recorded_at,
                    })
                })
                .collect()
        })
        .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use odin_gateway_core::{verify_receipts, verify_stored, ChainAnchor, KeyManager, ReceiptDraft};
    use tempfile::TempDir;

    fn sign(km: &KeyManager, anchor: ChainAnchor, ts: &str) -> Receipt {
        sign_for(km, "t1", anchor, ts)
    }

    fn sign_for(km: &KeyManager, trace: &str, anchor: ChainAnchor, ts: &str) -> Receipt {
        ReceiptDraft::new(trace, anchor)
            .content(Cid::digest(ts.as_bytes()))
            .timestamp(ts)
            .types("vendor.event.v1", "canonical.event.v1")
            .sign(km)
            .unwrap()
    }

    #[tokio::test]
    async fn test_append_and_read_chain() {
        let store = SqliteStore::open_memory().unwrap();
        let km = KeyManager::generated();
        let r0 = sign(&km, ChainAnchor::GENESIS, "2025-01-01T00:00:00Z");
        let r1 = sign(&km, r0.next_anchor(), "2025-01-01T00:00:01Z");
        store.append(&r0).await.unwrap();
        store.append(&r1).await.unwrap();

        assert_eq!(store.chain("t1").await.unwrap(), vec![r0, r1.clone()]);
        assert_eq!(store.tail("t1").await.unwrap(), ChainTail::Receipt(r1));
        assert_eq!(store.tail("t2").await.unwrap(), ChainTail::Empty);
    }

    #[tokio::test]
    async fn test_conflict_detection() {
        let store = SqliteStore::open_memory().unwrap();
        let km = KeyManager::generated();
        store
            .append(&sign(&km, ChainAnchor::GENESIS, "2025-01-01T00:00:00Z"))
            .await
            .unwrap();

        let duplicate = sign(&km, ChainAnchor::GENESIS, "2025-01-01T00:00:09Z");
        assert!(matches!(
            store.append(&duplicate).await,
            Err(StoreError::Conflict { .. })
        ));
        assert_eq!(store.chain("t1").await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_persists_across_reopen() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("receipts.db");
        let km = KeyManager::generated();
        let r0 = sign(&km, ChainAnchor::GENESIS, "2025-01-01T00:00:00Z");
        {
            let store = SqliteStore::open(&path).unwrap();
            store.append(&r0).await.unwrap();
        }
        let store = SqliteStore::open(&path).unwrap();
        assert_eq!(store.chain("t1").await.unwrap(), vec![r0]);
    }

    #[tokio::test]
    async fn test_tampered_row_fails_verification() {
        let store = SqliteStore::open_memory().unwrap();
        let km = KeyManager::generated();
        store
            .append(&sign(&km, ChainAnchor::GENESIS, "2025-01-01T00:00:00Z"))
            .await
            .unwrap();

        store
            .conn
            .lock()
            .unwrap()
            .execute("UPDATE receipts SET payload_type = 'forged.v1'", [])
            .unwrap();

        let chain = store.chain("t1").await.unwrap();
        assert!(!verify_receipts("t1", &chain, None, &km).is_valid());
    }

    #[tokio::test]
    async fn test_unconvertible_row_is_a_malformed_entry() {
        let store = SqliteStore::open_memory().unwrap();
        let km = KeyManager::generated();
        let r0 = sign(&km, ChainAnchor::GENESIS, "2025-01-01T00:00:00Z");
        let r1 = sign(&km, r0.next_anchor(), "2025-01-01T00:00:01Z");
        let other = sign_for(&km, "t2", ChainAnchor::GENESIS, "2025-01-01T00:00:00Z");
        for r in [&r0, &r1, &other] {
            store.append(r).await.unwrap();
        }

        store
            .conn
            .lock()
            .unwrap()
            .execute(
                "UPDATE receipts SET prev_cid = 'sha256:zz' WHERE trace_id = 't1' AND seq = 1",
                [],
            )
            .unwrap();

        let snapshot = store.snapshot("t1").await.unwrap();
        assert_eq!(snapshot.entries[0], StoredReceipt::Decoded(r0));
        assert!(matches!(
            snapshot.entries[1],
            StoredReceipt::Malformed { seq: Some(1), .. }
        ));
        assert!(!verify_stored("t1", &snapshot.entries, None, &km).is_valid());

        let t2 = store.snapshot("t2").await.unwrap();
        assert!(verify_stored("t2", &t2.entries, None, &km).is_valid());

        // Retention still runs; t1 keeps the undecodable row and everything after it
        let cutoff = DateTime::parse_from_rfc3339("2025-06-01T00:00:00Z")
            .unwrap()
            .with_timezone(&Utc);
        let report = store.prune_before(cutoff, "2025-06-01T00:00:00Z").await.unwrap();
        assert_eq!(report.removed, 2);
        let snapshot = store.snapshot("t1").await.unwrap();
        assert_eq!(snapshot.malformed(), 1);
        assert_eq!(snapshot.tombstone.unwrap().next_seq, 1);
    }

    #[tokio::test]
    async fn test_prune_and_continue() {
        let store = SqliteStore::open_memory().unwrap();
        let km = KeyManager::generated();
        let r0 = sign(&km, ChainAnchor::GENESIS, "2025-01-01T00:00:00Z");
        let r1 = sign(&km, r0.next_anchor(), "2025-12-01T00:00:00Z");
        store.append(&r0).await.unwrap();
        store.append(&r1).await.unwrap();

        let cutoff = DateTime::parse_from_rfc3339("2025-06-01T00:00:00Z")
            .unwrap()
            .with_timezone(&Utc);
        let report = store.prune_before(cutoff, "2025-06-01T00:00:00Z").await.unwrap();
        assert_eq!(report.removed, 1);

        let tomb = store.tombstone("t1").await.unwrap().unwrap();
        assert_eq!(tomb.next_seq, 1);
        let chain = store.chain("t1").await.unwrap();
        assert!(verify_receipts("t1", &chain, Some(&tomb), &km).is_valid());

        let r2 = sign(&km, store.tail("t1").await.unwrap().anchor(), "2025-12-02T00:00:00Z");
        assert_eq!(r2.seq, 2);
        store.append(&r2).await.unwrap();
    }

    #[tokio::test]
    async fn test_annotations_and_kids() {
        let store = SqliteStore::open_memory().unwrap();
        let km = KeyManager::generated();
        let r0 = sign(&km, ChainAnchor::GENESIS, "2025-01-01T00:00:00Z");
        store.append(&r0).await.unwrap();

        let annotation = ForwardAnnotation {
            receipt_cid: r0.receipt_cid,
            trace_id: "t1".into(),
            destination: "https://postman-echo.com/post".into(),
            outcome: ForwardOutcome::Delivered { status: 200 },
            recorded_at: "2025-01-01T00:00:01Z".into(),
        };
        store.annotate(&annotation).await.unwrap();
        assert_eq!(store.annotations(&r0.receipt_cid).await.unwrap(), vec![annotation]);

        let kids = store.referenced_kids().await.unwrap();
        assert!(kids.contains(km.active_kid()));
    }
}
