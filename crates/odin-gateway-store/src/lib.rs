//! # ODIN Gateway Store
//!
//! Storage abstraction for the ODIN gateway receipt ledger. Provides a
//! trait-based interface for receipt persistence with SQLite, JSONL-file and
//! in-memory implementations, plus a caching wrapper.
//!
//! ## Key Types
//!
//! - [`ReceiptStore`] - The async trait for all storage operations
//! - [`SqliteStore`] - SQLite-based persistent storage
//! - [`JsonlStore`] - Append-only JSON Lines log
//! - [`MemoryStore`] - In-memory storage for tests
//! - [`CachingStore`] - TTL and size-capped chain cache around any store
//! - [`ChainTail`] - Where the next receipt of a trace attaches
//! - [`ChainSnapshot`] - Chain and tombstone read together for verification
//!
//! ## Usage
//!
//! ```rust,no_run
//! use odin_gateway_store::{ReceiptStore, SqliteStore};
//!
//! async fn example() {
//!     let store = SqliteStore::open("receipts.db").unwrap();
//!     let chain = store.chain("trace-1").await.unwrap();
//!     println!("{} receipts", chain.len());
//! }
//! ```

pub mod cache;
pub mod error;
pub mod jsonl;
pub mod memory;
pub mod migration;
pub mod sqlite;
pub mod traits;

pub use cache::{CacheStats, CachingStore};
pub use error::{Result, StoreError};
pub use jsonl::JsonlStore;
pub use memory::MemoryStore;
pub use sqlite::SqliteStore;
pub use traits::{
    ChainSnapshot, ChainTail, ForwardAnnotation, ForwardOutcome, PruneReport, ReceiptStore,
};
