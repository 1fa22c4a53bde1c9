//! # ODIN Gateway Testkit
//!
//! Testing utilities for the gateway crates.
//!
//! ## Contents
//!
//! - **Golden vectors**: canonical encodings, CIDs, kids and signatures that
//!   any independent verifier must reproduce
//! - **Fixtures**: deterministic keys and chains over an in-memory store
//! - **Generators**: proptest strategies for values, keys and receipts

pub mod fixtures;
pub mod generators;
pub mod vectors;

pub use fixtures::{fixture_timestamp, key_manager_from_seed, multi_party_fixtures, TestFixture};
pub use vectors::{canonical_vectors, chain_vector, verify_all_vectors, CanonicalVector, ChainVector};
