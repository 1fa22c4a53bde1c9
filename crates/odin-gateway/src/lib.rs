//! # ODIN Gateway
//!
//! Accepts structured envelopes and answers with cryptographically verifiable
//! receipts proving each envelope was received, unaltered, at a specific
//! position in an append-only, hash-linked chain.
//!
//! ## Overview
//!
//! - **Receipts**: signed, hash-linked records, one chain per trace id
//! - **Responses**: every accepted envelope gets a signed response CID
//! - **Exports**: portable bundles re-verifiable with only the published keys
//! - **Egress**: forwarding only to allowlisted hosts, after commit
//! - **Metrics**: request counters and latency in Prometheus text format
//!
//! ## Usage
//!
//! ```rust,no_run
//! use odin_gateway::{ConfigLoader, Envelope, Gateway};
//! use odin_gateway::core::Value;
//!
//! async fn example() -> anyhow::Result<()> {
//!     let config = ConfigLoader::new().load()?;
//!     odin_gateway::telemetry::init(&config.telemetry)?;
//!     let gateway = Gateway::from_config(&config).await?;
//!
//!     let envelope = Envelope::new(Value::from("hello"), "vendor.event.v1", "canonical.event.v1")
//!         .with_trace_id("t1");
//!     let response = gateway.handle_envelope(envelope).await?;
//!     for (name, value) in response.headers.to_pairs() {
//!         println!("{name}: {value}");
//!     }
//!     Ok(())
//! }
//! ```
//!
//! ## Re-exports
//!
//! - `odin_gateway::core` - Core primitives (Value, Cid, Receipt, keys)
//! - `odin_gateway::store` - Storage abstraction and backends

pub mod allowlist;
pub mod config;
pub mod envelope;
pub mod error;
pub mod export;
pub mod forward;
pub mod gateway;
pub mod ledger;
pub mod metrics;
pub mod signer;
pub mod telemetry;
pub mod transform;

pub use odin_gateway_core as core;
pub use odin_gateway_store as store;

pub use allowlist::AllowlistGate;
pub use config::{ConfigLoader, GatewayConfig, LedgerBackend};
pub use envelope::{Envelope, EnvelopeResponse, ForwardDispatch, ResponseHeaders, SignedResponse};
pub use error::{ConfigError, GatewayError, Result};
pub use export::ExportBundler;
pub use forward::{ForwardDispatcher, ForwardHandle, Forwarder, HttpForwarder};
pub use gateway::{open_store, ChainView, Gateway, GatewayBuilder};
pub use ledger::ReceiptLedger;
pub use metrics::GatewayMetrics;
pub use signer::EnvelopeSigner;
pub use transform::{PayloadTransform, TransformRegistry};
