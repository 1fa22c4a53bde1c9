//! Read-through chain cache around any ReceiptStore.
//!
//! `chain(trace_id)` results are cached with a TTL and an approximate cap on
//! the total number of cached receipts. `tail` and `snapshot` are always
//! read from the inner store.
//!
//! Writes through this wrapper are fenced: while an append to a trace (or
//! any prune) is in flight, reads of that trace bypass the cache, and a
//! miss only fills the cache when no write completed during its inner read.
//! A cached chain therefore never misses a receipt committed through this
//! wrapper.

use std::collections::{BTreeSet, HashMap};
use std::sync::{Mutex, MutexGuard};
use std::time::{Duration, Instant};

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use odin_gateway_core::{Cid, KeyId, Receipt, Tombstone};

use crate::error::{Result, StoreError};
use crate::traits::{ChainSnapshot, ChainTail, ForwardAnnotation, PruneReport, ReceiptStore};

/// Default time-to-live of a cached chain.
pub const DEFAULT_CACHE_TTL: Duration = Duration::from_secs(300);
/// Default cap on the number of cached receipts.
pub const DEFAULT_CACHE_MAX_RECEIPTS: usize = 1000;

/// Cache counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CacheStats {
    pub hits: u64,
    pub misses: u64,
    pub evictions: u64,
    pub entries: usize,
    pub cached_receipts: usize,
}

struct CacheEntry {
    chain: Vec<Receipt>,
    inserted_at: Instant,
}

#[derive(Default)]
struct CacheState {
    entries: HashMap<String, CacheEntry>,
    cached_receipts: usize,
    hits: u64,
    misses: u64,
    evictions: u64,
    /// Appends in flight per trace.
    writers: HashMap<String, usize>,
    /// Prunes in flight.
    pruning: usize,
    /// Bumped whenever a write finishes.
    generation: u64,
}

/// What a write through the cache touches.
enum WriteScope {
    Trace(String),
    All,
}

impl CacheState {
    fn fenced(&self, trace_id: &str) -> bool {
        self.pruning > 0 || self.writers.contains_key(trace_id)
    }

    fn begin_write(&mut self, scope: &WriteScope) {
        match scope {
            WriteScope::Trace(trace_id) => {
                *self.writers.entry(trace_id.clone()).or_default() += 1;
                self.remove(trace_id);
            }
            WriteScope::All => {
                self.pruning += 1;
                self.clear();
            }
        }
    }

    fn end_write(&mut self, scope: &WriteScope) {
        match scope {
            WriteScope::Trace(trace_id) => {
                if let Some(n) = self.writers.get_mut(trace_id) {
                    *n -= 1;
                    if *n == 0 {
                        self.writers.remove(trace_id);
                    }
                }
                self.remove(trace_id);
            }
            WriteScope::All => {
                self.pruning = self.pruning.saturating_sub(1);
                self.clear();
            }
        }
        self.generation += 1;
    }

    fn remove(&mut self, trace_id: &str) {
        if let Some(entry) = self.entries.remove(trace_id) {
            self.cached_receipts -= entry.chain.len();
        }
    }

    fn clear(&mut self) {
        self.entries.clear();
        self.cached_receipts = 0;
    }

    fn insert(&mut self, trace_id: String, chain: Vec<Receipt>, max_receipts: usize) {
        self.remove(&trace_id);
        if chain.len() > max_receipts {
            return;
        }
        while self.cached_receipts + chain.len() > max_receipts {
            let Some(oldest) = self
                .entries
                .iter()
                .min_by_key(|(_, e)| e.inserted_at)
                .map(|(k, _)| k.clone())
            else {
                break;
            };
            self.remove(&oldest);
            self.evictions += 1;
        }
        self.cached_receipts += chain.len();
        self.entries.insert(
            trace_id,
            CacheEntry {
                chain,
                inserted_at: Instant::now(),
            },
        );
    }
}

/// Ends a write on drop, so a cancelled write does not leave its fence up.
struct WriteFence<'a> {
    state: &'a Mutex<CacheState>,
    scope: WriteScope,
}

impl Drop for WriteFence<'_> {
    fn drop(&mut self) {
        match self.state.lock() {
            Ok(mut state) => state.end_write(&self.scope),
            Err(poisoned) => poisoned.into_inner().end_write(&self.scope),
        }
    }
}

/// Outcome of a cache lookup.
enum Lookup {
    Hit(Vec<Receipt>),
    /// Fill the cache afterwards if the generation is unchanged.
    Miss { generation: u64 },
    /// A write is in flight; read through without caching.
    Bypass,
}

/// A ReceiptStore wrapper that caches chains.
pub struct CachingStore<S> {
    inner: S,
    ttl: Duration,
    max_receipts: usize,
    state: Mutex<CacheState>,
}

impl<S: ReceiptStore> CachingStore<S> {
    pub fn new(inner: S) -> Self {
        Self::with_limits(inner, DEFAULT_CACHE_TTL, DEFAULT_CACHE_MAX_RECEIPTS)
    }

    pub fn with_limits(inner: S, ttl: Duration, max_receipts: usize) -> Self {
        Self {
            inner,
            ttl,
            max_receipts,
            state: Mutex::new(CacheState::default()),
        }
    }

    pub fn inner(&self) -> &S {
        &self.inner
    }

    pub fn cache_stats(&self) -> Result<CacheStats> {
        let state = self.state()?;
        Ok(CacheStats {
            hits: state.hits,
            misses: state.misses,
            evictions: state.evictions,
            entries: state.entries.len(),
            cached_receipts: state.cached_receipts,
        })
    }

    fn state(&self) -> Result<MutexGuard<'_, CacheState>> {
        self.state
            .lock()
            .map_err(|e| StoreError::Unavailable(format!("cache lock poisoned: {e}")))
    }

    fn lookup(&self, trace_id: &str) -> Result<Lookup> {
        let mut state = self.state()?;
        if state.fenced(trace_id) {
            state.misses += 1;
            return Ok(Lookup::Bypass);
        }
        let fresh = state
            .entries
            .get(trace_id)
            .filter(|e| e.inserted_at.elapsed() < self.ttl)
            .map(|e| e.chain.clone());
        match fresh {
            Some(chain) => {
                state.hits += 1;
                Ok(Lookup::Hit(chain))
            }
            None => {
                state.remove(trace_id);
                state.misses += 1;
                Ok(Lookup::Miss {
                    generation: state.generation,
                })
            }
        }
    }

    fn fill(&self, trace_id: &str, chain: &[Receipt], generation: u64) -> Result<()> {
        let mut state = self.state()?;
        if state.generation == generation && !state.fenced(trace_id) {
            state.insert(trace_id.to_owned(), chain.to_vec(), self.max_receipts);
        }
        Ok(())
    }

    fn fence(&self, scope: WriteScope) -> Result<WriteFence<'_>> {
        self.state()?.begin_write(&scope);
        Ok(WriteFence {
            state: &self.state,
            scope,
        })
    }
}

#[async_trait]
impl<S: ReceiptStore> ReceiptStore for CachingStore<S> {
    async fn append(&self, receipt: &Receipt) -> Result<()> {
        let _fence = self.fence(WriteScope::Trace(receipt.trace_id.clone()))?;
        self.inner.append(receipt).await
    }

    async fn tail(&self, trace_id: &str) -> Result<ChainTail> {
        self.inner.tail(trace_id).await
    }

    async fn chain(&self, trace_id: &str) -> Result<Vec<Receipt>> {
        match self.lookup(trace_id)? {
            Lookup::Hit(chain) => Ok(chain),
            Lookup::Bypass => self.inner.chain(trace_id).await,
            Lookup::Miss { generation } => {
                let chain = self.inner.chain(trace_id).await?;
                self.fill(trace_id, &chain, generation)?;
                Ok(chain)
            }
        }
    }

    async fn tombstone(&self, trace_id: &str) -> Result<Option<Tombstone>> {
        self.inner.tombstone(trace_id).await
    }

    async fn snapshot(&self, trace_id: &str) -> Result<ChainSnapshot> {
        self.inner.snapshot(trace_id).await
    }

    async fn referenced_kids(&self) -> Result<BTreeSet<KeyId>> {
        self.inner.referenced_kids().await
    }

    async fn prune_before(&self, cutoff: DateTime<Utc>, pruned_at: &str) -> Result<PruneReport> {
        let _fence = self.fence(WriteScope::All)?;
        self.inner.prune_before(cutoff, pruned_at).await
    }

    async fn annotate(&self, annotation: &ForwardAnnotation) -> Result<()> {
        self.inner.annotate(annotation).await
    }

    async fn annotations(&self, receipt_cid: &Cid) -> Result<Vec<ForwardAnnotation>> {
        self.inner.annotations(receipt_cid).await
    }
}
