//! Append-only JSON Lines implementation of the ReceiptStore trait.
//!
//! Layout inside the store directory:
//!
//! - `receipts.jsonl` - one receipt per line, in append order
//! - `tombstones.jsonl` - one tombstone per prune; the last line per trace wins
//! - `annotations.jsonl` - forwarding outcomes
//!
//! Every record is written as a single newline-terminated line followed by
//! `fsync`, by a single writer holding the store mutex. A torn trailing line
//! left by a crash is dropped on open. The log is indexed in memory for
//! appends and plain reads; `snapshot` re-reads the files so verification
//! sees what is actually on disk.
//!
//! A complete line that no longer decodes does not fail the store. When its
//! trace id can still be read, that trace is marked damaged: it refuses
//! appends and prunes, and its snapshots carry the bad record.

use std::collections::{BTreeSet, HashMap};
use std::fs::{self, File, OpenOptions};
use std::io::{Read, Write};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::de::{DeserializeOwned, IgnoredAny};
use serde::{Deserialize, Serialize};

use odin_gateway_core::{Cid, KeyId, Receipt, StoredReceipt, Tombstone};

use crate::error::{Result, StoreError};
use crate::memory::MemoryStoreInner;
use crate::traits::{ChainSnapshot, ChainTail, ForwardAnnotation, PruneReport, ReceiptStore};

pub const RECEIPTS_FILE: &str = "receipts.jsonl";
pub const TOMBSTONES_FILE: &str = "tombstones.jsonl";
pub const ANNOTATIONS_FILE: &str = "annotations.jsonl";

/// JSONL file store.
///
/// Thread-safe via internal Mutex. File operations use spawn_blocking
/// to avoid blocking the async runtime.
pub struct JsonlStore {
    inner: Arc<Mutex<JsonlInner>>,
}

struct JsonlInner {
    dir: PathBuf,
    receipts: File,
    tombstones: File,
    annotations: File,
    index: MemoryStoreInner,
}

/// One decoded line of a log file.
enum LogLine<T> {
    Record(T),
    /// A complete line that does not decode. `trace_id` and `seq` are
    /// recovered from the raw text when they are still readable.
    Malformed {
        trace_id: Option<String>,
        seq: Option<u64>,
        reason: String,
    },
}

impl JsonlStore {
    /// Open (or create) a store in `dir`, loading the existing log.
    pub fn open(dir: impl AsRef<Path>) -> Result<Self> {
        let dir = dir.as_ref().to_path_buf();
        fs::create_dir_all(&dir)?;

        let mut index = MemoryStoreInner::default();
        for (lineno, line) in read_lines(&dir.join(RECEIPTS_FILE), true)?.iter().enumerate() {
            match decode_line::<Receipt>(line) {
                LogLine::Record(receipt) => index.push(receipt),
                LogLine::Malformed { trace_id, reason, .. } => {
                    note_malformed(&mut index, RECEIPTS_FILE, lineno + 1, trace_id, reason)
                }
            }
        }

        // The last tombstone line of a trace wins, readable or not
        let mut unreadable_tombstones: HashMap<String, String> = HashMap::new();
        for (lineno, line) in read_lines(&dir.join(TOMBSTONES_FILE), true)?.iter().enumerate() {
            match decode_line::<Tombstone>(line) {
                LogLine::Record(tombstone) => {
                    unreadable_tombstones.remove(&tombstone.trace_id);
                    index.set_tombstone(tombstone);
                }
                LogLine::Malformed {
                    trace_id: Some(trace_id),
                    reason,
                    ..
                } => {
                    unreadable_tombstones
                        .insert(trace_id, format!("{TOMBSTONES_FILE}:{}: {reason}", lineno + 1));
                }
                LogLine::Malformed { reason, .. } => {
                    note_malformed(&mut index, TOMBSTONES_FILE, lineno + 1, None, reason)
                }
            }
        }
        for (trace_id, reason) in unreadable_tombstones {
            tracing::warn!(trace_id = %trace_id, %reason, "unreadable tombstone");
            index.mark_damaged(&trace_id, reason);
        }

        for (lineno, line) in read_lines(&dir.join(ANNOTATIONS_FILE), true)?.iter().enumerate() {
            match decode_line::<ForwardAnnotation>(line) {
                LogLine::Record(annotation) => index.annotate(annotation),
                LogLine::Malformed { reason, .. } => tracing::warn!(
                    file = ANNOTATIONS_FILE,
                    line = lineno + 1,
                    %reason,
                    "skipping unreadable annotation"
                ),
            }
        }

        Ok(Self {
            inner: Arc::new(Mutex::new(JsonlInner {
                receipts: open_append(&dir.join(RECEIPTS_FILE))?,
                tombstones: open_append(&dir.join(TOMBSTONES_FILE))?,
                annotations: open_append(&dir.join(ANNOTATIONS_FILE))?,
                dir,
                index,
            })),
        })
    }

    /// Path of the receipt log.
    pub fn receipts_path(&self) -> Result<PathBuf> {
        Ok(lock(&self.inner)?.dir.join(RECEIPTS_FILE))
    }

    /// Run a blocking operation on the store state.
    async fn blocking<F, T>(&self, f: F) -> Result<T>
    where
        F: FnOnce(&mut JsonlInner) -> Result<T> + Send + 'static,
        T: Send + 'static,
    {
        let inner = self.inner.clone();
        tokio::task::spawn_blocking(move || f(&mut *lock(&inner)?))
            .await
            .map_err(|e| StoreError::Unavailable(format!("spawn_blocking failed: {e}")))?
    }

    /// Read from the in-memory index.
    fn read<T>(&self, f: impl FnOnce(&MemoryStoreInner) -> T) -> Result<T> {
        Ok(f(&lock(&self.inner)?.index))
    }
}

fn lock(inner: &Mutex<JsonlInner>) -> Result<std::sync::MutexGuard<'_, JsonlInner>> {
    inner
        .lock()
        .map_err(|e| StoreError::Unavailable(format!("mutex poisoned: {e}")))
}

fn open_append(path: &Path) -> Result<File> {
    Ok(OpenOptions::new().create(true).append(true).open(path)?)
}

fn note_malformed(
    index: &mut MemoryStoreInner,
    file: &str,
    line: usize,
    trace_id: Option<String>,
    reason: String,
) {
    match trace_id {
        Some(trace_id) => {
            tracing::warn!(file, line, trace_id = %trace_id, %reason, "unreadable record, trace marked damaged");
            index.mark_damaged(&trace_id, format!("{file}:{line}: {reason}"));
        }
        None => tracing::warn!(file, line, %reason, "unreadable record of unknown trace"),
    }
}

/// The complete lines of a JSONL file, without terminators.
///
/// A trailing line without a newline that is not valid JSON is a torn
/// write and is skipped. With `repair` the file is also truncated back to
/// the last full record.
fn read_lines(path: &Path, repair: bool) -> Result<Vec<Vec<u8>>> {
    let mut bytes = Vec::new();
    match File::open(path) {
        Ok(mut f) => {
            f.read_to_end(&mut bytes)?;
        }
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
        Err(e) => return Err(e.into()),
    }

    let mut lines = Vec::new();
    let mut offset = 0usize;
    for line in bytes.split_inclusive(|b| *b == b'\n') {
        let complete = line.ends_with(b"\n");
        let body = line.strip_suffix(b"\n").unwrap_or(line);
        let body = body.strip_suffix(b"\r").unwrap_or(body);
        if !complete && serde_json::from_slice::<IgnoredAny>(body).is_err() {
            if repair {
                tracing::warn!(path = %path.display(), offset, "dropping torn trailing record");
                OpenOptions::new().write(true).open(path)?.set_len(offset as u64)?;
            }
            break;
        }
        if !body.iter().all(u8::is_ascii_whitespace) {
            lines.push(body.to_vec());
        }
        offset += line.len();
    }
    Ok(lines)
}

fn decode_line<T: DeserializeOwned>(line: &[u8]) -> LogLine<T> {
    match serde_json::from_slice(line) {
        Ok(record) => LogLine::Record(record),
        Err(e) => {
            let text = String::from_utf8_lossy(line);
            LogLine::Malformed {
                trace_id: sniff(&text, "trace_id"),
                seq: sniff(&text, "seq"),
                reason: format!("decoding error: {e}"),
            }
        }
    }
}

/// Read one field out of a line that no longer decodes as a whole.
fn sniff<T: DeserializeOwned>(text: &str, field: &str) -> Option<T> {
    let key = format!("\"{field}\":");
    let start = text.find(&key)? + key.len();
    let mut de = serde_json::Deserializer::from_str(&text[start..]);
    T::deserialize(&mut de).ok()
}

/// Re-read one trace from disk and check it against the index.
///
/// Receipts the index holds but the log no longer does are reported as
/// malformed records, so a deleted line cannot pass verification.
fn read_snapshot(dir: &Path, index: &MemoryStoreInner, trace_id: &str) -> Result<ChainSnapshot> {
    let mut last_tombstone = None;
    for line in read_lines(&dir.join(TOMBSTONES_FILE), false)? {
        match decode_line::<Tombstone>(&line) {
            LogLine::Record(t) if t.trace_id == trace_id => last_tombstone = Some(Ok(t)),
            LogLine::Malformed {
                trace_id: Some(t),
                reason,
                ..
            } if t == trace_id => last_tombstone = Some(Err(reason)),
            _ => {}
        }
    }

    let mut entries = Vec::new();
    let tombstone = match last_tombstone {
        Some(Ok(t)) => Some(t),
        Some(Err(reason)) => {
            entries.push(StoredReceipt::Malformed {
                seq: None,
                reason: format!("unreadable tombstone: {reason}"),
            });
            None
        }
        None => None,
    };
    let floor = tombstone.as_ref().map_or(0, |t| t.next_seq);

    let mut on_disk = BTreeSet::new();
    for line in read_lines(&dir.join(RECEIPTS_FILE), false)? {
        match decode_line::<Receipt>(&line) {
            LogLine::Record(r) if r.trace_id == trace_id && r.seq >= floor => {
                on_disk.insert(r.seq);
                entries.push(StoredReceipt::Decoded(r));
            }
            LogLine::Malformed {
                trace_id: Some(t),
                seq,
                reason,
            } if t == trace_id && seq.map_or(true, |s| s >= floor) => {
                on_disk.extend(seq);
                entries.push(StoredReceipt::Malformed { seq, reason });
            }
            _ => {}
        }
    }

    for receipt in index.chain(trace_id) {
        if receipt.seq >= floor && !on_disk.contains(&receipt.seq) {
            entries.push(StoredReceipt::Malformed {
                seq: Some(receipt.seq),
                reason: format!("record missing from {RECEIPTS_FILE}"),
            });
        }
    }

    Ok(ChainSnapshot { entries, tombstone })
}

/// Append one record as a newline-terminated line and sync it to disk.
///
/// On failure the file is cut back to its previous length so no partial
/// line is left in front of later records.
fn append_record<T: Serialize>(file: &mut File, record: &T) -> Result<()> {
    let mut line = serde_json::to_vec(record)?;
    line.push(b'\n');

    let len = file.metadata()?.len();
    if let Err(e) = write_synced(file, &line) {
        let _ = file.set_len(len);
        return Err(e.into());
    }
    Ok(())
}

fn write_synced(file: &mut File, bytes: &[u8]) -> std::io::Result<()> {
    file.write_all(bytes)?;
    file.flush()?;
    file.sync_data()
}

/// Rewrite the receipt log without the receipts covered by `tombstones`.
///
/// Every other line, including ones that no longer decode, is kept verbatim.
fn rewrite_receipts(dir: &Path, tombstones: &[Tombstone]) -> Result<File> {
    let floors: HashMap<&str, u64> = tombstones
        .iter()
        .map(|t| (t.trace_id.as_str(), t.next_seq))
        .collect();
    let path = dir.join(RECEIPTS_FILE);
    let tmp = dir.join(format!("{RECEIPTS_FILE}.tmp"));
    {
        let mut out = File::create(&tmp)?;
        for line in read_lines(&path, false)? {
            if let LogLine::Record(r) = decode_line::<Receipt>(&line) {
                if floors
                    .get(r.trace_id.as_str())
                    .is_some_and(|&floor| r.seq < floor)
                {
                    continue;
                }
            }
            out.write_all(&line)?;
            out.write_all(b"\n")?;
        }
        out.sync_all()?;
    }
    fs::rename(&tmp, &path)?;
    open_append(&path)
}

#[async_trait]
impl ReceiptStore for JsonlStore {
    async fn append(&self, receipt: &Receipt) -> Result<()> {
        let receipt = receipt.clone();
        self.blocking(move |inner| {
            inner.index.check_append(&receipt)?;
            append_record(&mut inner.receipts, &receipt)?;
            inner.index.push(receipt);
            Ok(())
        })
        .await
    }

    async fn tail(&self, trace_id: &str) -> Result<ChainTail> {
        self.read(|index| index.tail(trace_id))
    }

    async fn chain(&self, trace_id: &str) -> Result<Vec<Receipt>> {
        self.read(|index| index.chain(trace_id))
    }

    async fn tombstone(&self, trace_id: &str) -> Result<Option<Tombstone>> {
        self.read(|index| index.tombstone(trace_id))
    }

    async fn snapshot(&self, trace_id: &str) -> Result<ChainSnapshot> {
        let trace_id = trace_id.to_owned();
        self.blocking(move |inner| read_snapshot(&inner.dir, &inner.index, &trace_id))
            .await
    }

    async fn referenced_kids(&self) -> Result<BTreeSet<KeyId>> {
        self.read(MemoryStoreInner::referenced_kids)
    }

    async fn prune_before(&self, cutoff: DateTime<Utc>, pruned_at: &str) -> Result<PruneReport> {
        let pruned_at = pruned_at.to_owned();
        self.blocking(move |inner| {
            let mut next = inner.index.clone();
            let (report, tombstones) = next.prune_before(cutoff, &pruned_at);
            if report.removed == 0 {
                return Ok(report);
            }

            for tombstone in &tombstones {
                append_record(&mut inner.tombstones, tombstone)?;
            }
            inner.receipts = rewrite_receipts(&inner.dir, &tombstones)?;
            inner.index = next;

            tracing::info!(
                removed = report.removed,
                traces = report.traces.len(),
                "pruned receipt log"
            );
            Ok(report)
        })
        .await
    }

    async fn annotate(&self, annotation: &ForwardAnnotation) -> Result<()> {
        let annotation = annotation.clone();
        self.blocking(move |inner| {
            append_record(&mut inner.annotations, &annotation)?;
            inner.index.annotate(annotation);
            Ok(())
        })
        .await
    }

    async fn annotations(&self, receipt_cid: &Cid) -> Result<Vec<ForwardAnnotation>> {
        self.read(|index| index.annotations(receipt_cid))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::traits::ForwardOutcome;
    use odin_gateway_core::{
        verify_receipts, verify_stored, ChainAnchor, ChainVerification, KeyManager, ReceiptDraft,
        ValidationError,
    };
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
    async fn test_reopen_restores_chain() {
        let dir = TempDir::new().unwrap();
        let km = KeyManager::generated();
        let r0 = sign(&km, ChainAnchor::GENESIS, "2025-01-01T00:00:00Z");
        let r1 = sign(&km, r0.next_anchor(), "2025-01-01T00:00:01Z");
        {
            let store = JsonlStore::open(dir.path()).unwrap();
            store.append(&r0).await.unwrap();
            store.append(&r1).await.unwrap();
        }

        let store = JsonlStore::open(dir.path()).unwrap();
        assert_eq!(store.chain("t1").await.unwrap(), vec![r0, r1]);
    }

    #[tokio::test]
    async fn test_torn_trailing_line_is_dropped() {
        let dir = TempDir::new().unwrap();
        let km = KeyManager::generated();
        let r0 = sign(&km, ChainAnchor::GENESIS, "2025-01-01T00:00:00Z");
        {
            let store = JsonlStore::open(dir.path()).unwrap();
            store.append(&r0).await.unwrap();
        }
        let path = dir.path().join(RECEIPTS_FILE);
        let mut f = OpenOptions::new().append(true).open(&path).unwrap();
        f.write_all(br#"{"receipt_cid":"sha256:0"#).unwrap();
        drop(f);

        let store = JsonlStore::open(dir.path()).unwrap();
        assert_eq!(store.chain("t1").await.unwrap(), vec![r0.clone()]);

        // The next append lands on a clean line
        let r1 = sign(&km, r0.next_anchor(), "2025-01-01T00:00:01Z");
        store.append(&r1).await.unwrap();
        drop(store);
        let store = JsonlStore::open(dir.path()).unwrap();
        assert_eq!(store.chain("t1").await.unwrap().len(), 2);
    }

    #[test]
    fn test_unattributable_line_does_not_fail_open() {
        let dir = TempDir::new().unwrap();
        fs::write(dir.path().join(RECEIPTS_FILE), "not json\n{}\n").unwrap();
        JsonlStore::open(dir.path()).unwrap();
    }

    #[tokio::test]
    async fn test_malformed_record_only_affects_its_trace() {
        let dir = TempDir::new().unwrap();
        let km = KeyManager::generated();
        let r0 = sign(&km, ChainAnchor::GENESIS, "2025-01-01T00:00:00Z");
        let other = sign_for(&km, "t2", ChainAnchor::GENESIS, "2025-01-01T00:00:00Z");
        {
            let store = JsonlStore::open(dir.path()).unwrap();
            store.append(&r0).await.unwrap();
            store.append(&other).await.unwrap();
        }

        // Break one hex digit of t1's content cid
        let path = dir.path().join(RECEIPTS_FILE);
        let text = fs::read_to_string(&path).unwrap();
        let cid = r0.cid.to_string();
        let broken = format!("{}z", &cid[..cid.len() - 1]);
        fs::write(&path, text.replacen(&cid, &broken, 1)).unwrap();

        let store = JsonlStore::open(dir.path()).unwrap();
        let snapshot = store.snapshot("t1").await.unwrap();
        assert_eq!(snapshot.malformed(), 1);
        assert!(matches!(
            snapshot.entries[0],
            StoredReceipt::Malformed { seq: Some(0), .. }
        ));
        assert!(!verify_stored("t1", &snapshot.entries, None, &km).is_valid());

        let next = sign(&km, r0.next_anchor(), "2025-01-01T00:00:01Z");
        assert!(matches!(store.append(&next).await, Err(StoreError::InvalidData(_))));

        let t2 = store.snapshot("t2").await.unwrap();
        assert!(verify_stored("t2", &t2.entries, None, &km).is_valid());
        let more = sign_for(&km, "t2", other.next_anchor(), "2025-01-01T00:00:01Z");
        store.append(&more).await.unwrap();
    }

    #[tokio::test]
    async fn test_snapshot_sees_live_tampering() {
        let dir = TempDir::new().unwrap();
        let km = KeyManager::generated();
        let store = JsonlStore::open(dir.path()).unwrap();
        let r0 = sign(&km, ChainAnchor::GENESIS, "2025-01-01T00:00:00Z");
        store.append(&r0).await.unwrap();
        store
            .append(&sign(&km, r0.next_anchor(), "2025-01-01T00:00:01Z"))
            .await
            .unwrap();

        let path = dir.path().join(RECEIPTS_FILE);
        let text = fs::read_to_string(&path).unwrap();
        fs::write(&path, text.replace("vendor.event.v1", "vendor.event.v9")).unwrap();

        let snapshot = store.snapshot("t1").await.unwrap();
        assert!(!verify_stored("t1", &snapshot.entries, None, &km).is_valid());
        let receipts = snapshot.into_receipts().unwrap();
        assert_eq!(receipts[0].payload_type, "vendor.event.v9");
    }

    #[tokio::test]
    async fn test_snapshot_reports_deleted_line() {
        let dir = TempDir::new().unwrap();
        let km = KeyManager::generated();
        let store = JsonlStore::open(dir.path()).unwrap();
        let r0 = sign(&km, ChainAnchor::GENESIS, "2025-01-01T00:00:00Z");
        let r1 = sign(&km, r0.next_anchor(), "2025-01-01T00:00:01Z");
        store.append(&r0).await.unwrap();
        store.append(&r1).await.unwrap();

        // Drop the last record; the remaining prefix links correctly on its own
        let path = dir.path().join(RECEIPTS_FILE);
        let text = fs::read_to_string(&path).unwrap();
        let first_line = text.lines().next().unwrap();
        fs::write(&path, format!("{first_line}\n")).unwrap();

        let snapshot = store.snapshot("t1").await.unwrap();
        assert!(matches!(
            verify_stored("t1", &snapshot.entries, None, &km),
            ChainVerification::Invalid { index: 1, fault: ValidationError::MalformedRecord { seq: Some(1), .. } }
        ));
    }

    #[tokio::test]
    async fn test_prune_keeps_unreadable_lines() {
        let dir = TempDir::new().unwrap();
        let km = KeyManager::generated();
        let r0 = sign(&km, ChainAnchor::GENESIS, "2025-01-01T00:00:00Z");
        let bad = sign_for(&km, "t2", ChainAnchor::GENESIS, "2025-01-01T00:00:00Z");
        {
            let store = JsonlStore::open(dir.path()).unwrap();
            store.append(&r0).await.unwrap();
            store.append(&bad).await.unwrap();
        }
        let path = dir.path().join(RECEIPTS_FILE);
        let text = fs::read_to_string(&path).unwrap();
        let sig = bad.signature.to_b64u();
        fs::write(&path, text.replace(&sig, "!!")).unwrap();

        let store = JsonlStore::open(dir.path()).unwrap();
        let cutoff = DateTime::parse_from_rfc3339("2025-06-01T00:00:00Z")
            .unwrap()
            .with_timezone(&Utc);
        let report = store.prune_before(cutoff, "2025-06-01T00:00:00Z").await.unwrap();
        assert_eq!(report.traces, vec!["t1".to_string()]);

        let remaining = fs::read_to_string(&path).unwrap();
        assert_eq!(remaining.lines().count(), 1);
        assert!(remaining.contains("\"trace_id\":\"t2\""));
        assert_eq!(store.snapshot("t2").await.unwrap().malformed(), 1);
    }

    #[tokio::test]
    async fn test_tampered_bytes_fail_verification() {
        let dir = TempDir::new().unwrap();
        let km = KeyManager::generated();
        let r0 = sign(&km, ChainAnchor::GENESIS, "2025-01-01T00:00:00Z");
        {
            let store = JsonlStore::open(dir.path()).unwrap();
            store.append(&r0).await.unwrap();
        }
        let path = dir.path().join(RECEIPTS_FILE);
        let text = fs::read_to_string(&path).unwrap();
        fs::write(&path, text.replace("vendor.event.v1", "vendor.event.v2")).unwrap();

        let store = JsonlStore::open(dir.path()).unwrap();
        let chain = store.chain("t1").await.unwrap();
        assert!(!verify_receipts("t1", &chain, None, &km).is_valid());
    }

    #[tokio::test]
    async fn test_prune_persists_tombstone() {
        let dir = TempDir::new().unwrap();
        let km = KeyManager::generated();
        let r0 = sign(&km, ChainAnchor::GENESIS, "2025-01-01T00:00:00Z");
        let r1 = sign(&km, r0.next_anchor(), "2025-12-01T00:00:00Z");
        let cutoff = DateTime::parse_from_rfc3339("2025-06-01T00:00:00Z")
            .unwrap()
            .with_timezone(&Utc);
        {
            let store = JsonlStore::open(dir.path()).unwrap();
            store.append(&r0).await.unwrap();
            store.append(&r1).await.unwrap();
            let report = store.prune_before(cutoff, "2025-06-01T00:00:00Z").await.unwrap();
            assert_eq!(report.removed, 1);
        }

        let store = JsonlStore::open(dir.path()).unwrap();
        let chain = store.chain("t1").await.unwrap();
        assert_eq!(chain, vec![r1]);
        let tomb = store.tombstone("t1").await.unwrap().unwrap();
        assert_eq!(tomb.last_receipt_cid, r0.receipt_cid);
        assert!(verify_receipts("t1", &chain, Some(&tomb), &km).is_valid());
    }

    #[tokio::test]
    async fn test_annotations_survive_reopen() {
        let dir = TempDir::new().unwrap();
        let annotation = ForwardAnnotation {
            receipt_cid: Cid::digest(b"r"),
            trace_id: "t1".into(),
            destination: "https://postman-echo.com/post".into(),
            outcome: ForwardOutcome::Failed {
                error: "connection refused".into(),
            },
            recorded_at: "2025-01-01T00:00:00Z".into(),
        };
        {
            let store = JsonlStore::open(dir.path()).unwrap();
            store.annotate(&annotation).await.unwrap();
        }
        let store = JsonlStore::open(dir.path()).unwrap();
        assert_eq!(
            store.annotations(&annotation.receipt_cid).await.unwrap(),
            vec![annotation]
        );
    }
}
