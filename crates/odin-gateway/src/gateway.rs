//! The Gateway: unified API for envelope intake, chains, exports and keys.

use std::sync::Arc;
use std::time::{Duration, Instant};

use serde::{Deserialize, Serialize};

use odin_gateway_core::{cid_of_serialize, cid_of_value, ExportBundle, Jwks, KeyId, KeyManager, Receipt};
use odin_gateway_store::{
    CachingStore, ForwardAnnotation, JsonlStore, MemoryStore, ReceiptStore, SqliteStore,
};

use crate::allowlist::AllowlistGate;
use crate::config::{GatewayConfig, LedgerBackend, LedgerConfig};
use crate::envelope::{Envelope, EnvelopeResponse, ForwardDispatch, ResponseHeaders, SignedResponse};
use crate::error::{ConfigError, Result};
use crate::export::ExportBundler;
use crate::forward::{ForwardDispatcher, Forwarder, HttpForwarder};
use crate::ledger::ReceiptLedger;
use crate::metrics::GatewayMetrics;
use crate::signer::EnvelopeSigner;
use crate::transform::TransformRegistry;

/// Default timeout for forwarding tasks.
pub const DEFAULT_FORWARD_TIMEOUT: Duration = Duration::from_secs(10);

/// Body of a chain read.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChainView {
    pub trace_id: String,
    pub chain: Vec<Receipt>,
}

/// Open the configured receipt store.
pub fn open_store(config: &LedgerConfig) -> Result<Arc<dyn ReceiptStore>> {
    fn cached<S: ReceiptStore + 'static>(store: S, config: &LedgerConfig) -> Arc<dyn ReceiptStore> {
        if config.cache.enabled {
            Arc::new(CachingStore::with_limits(
                store,
                Duration::from_secs(config.cache.ttl_secs),
                config.cache.max_receipts,
            ))
        } else {
            Arc::new(store)
        }
    }

    Ok(match config.backend {
        LedgerBackend::Memory => cached(MemoryStore::new(), config),
        LedgerBackend::Jsonl => cached(JsonlStore::open(&config.path)?, config),
        LedgerBackend::Sqlite => cached(SqliteStore::open(&config.path)?, config),
    })
}

/// Builder for a [`Gateway`].
pub struct GatewayBuilder {
    keys: KeyManager,
    store: Arc<dyn ReceiptStore>,
    allowlist: AllowlistGate,
    forwarder: Option<Arc<dyn Forwarder>>,
    forward_timeout: Duration,
    transforms: TransformRegistry,
    retention: Option<Duration>,
    prune_on_append: bool,
}

impl GatewayBuilder {
    pub fn allowlist(mut self, allowlist: AllowlistGate) -> Self {
        self.allowlist = allowlist;
        self
    }

    /// Use a custom forwarder instead of HTTP.
    pub fn forwarder(mut self, forwarder: Arc<dyn Forwarder>) -> Self {
        self.forwarder = Some(forwarder);
        self
    }

    pub fn forward_timeout(mut self, timeout: Duration) -> Self {
        self.forward_timeout = timeout;
        self
    }

    pub fn transforms(mut self, transforms: TransformRegistry) -> Self {
        self.transforms = transforms;
        self
    }

    /// Retention for [`Gateway::prune`]; with `prune_on_append` it also runs
    /// before every append.
    pub fn retention(mut self, max_age: Duration, prune_on_append: bool) -> Self {
        self.retention = Some(max_age);
        self.prune_on_append = prune_on_append;
        self
    }

    pub fn build(self) -> Result<Gateway> {
        let forwarder = match self.forwarder {
            Some(forwarder) => forwarder,
            None => Arc::new(HttpForwarder::new(self.forward_timeout)?),
        };
        let keys = Arc::new(self.keys);

        Ok(Gateway {
            metrics: GatewayMetrics::new()?,
            signer: EnvelopeSigner::new(keys.clone()),
            bundler: ExportBundler::new(self.store.clone(), keys.clone()),
            dispatcher: ForwardDispatcher::new(forwarder, self.store.clone(), self.forward_timeout),
            ledger: ReceiptLedger::new(self.store, keys.clone()),
            keys,
            allowlist: self.allowlist,
            transforms: self.transforms,
            retention: self.retention,
            prune_on_append: self.prune_on_append,
        })
    }
}

/// The gateway facade.
///
/// Provides:
/// - Envelope intake with signed receipts and responses
/// - Chain reads and verification
/// - Signed exports
/// - The published key set
/// - Request metrics
pub struct Gateway {
    keys: Arc<KeyManager>,
    metrics: GatewayMetrics,
    allowlist: AllowlistGate,
    ledger: ReceiptLedger,
    signer: EnvelopeSigner,
    bundler: ExportBundler,
    dispatcher: ForwardDispatcher,
    transforms: TransformRegistry,
    retention: Option<Duration>,
    prune_on_append: bool,
}

impl Gateway {
    pub fn builder(keys: KeyManager, store: Arc<dyn ReceiptStore>) -> GatewayBuilder {
        GatewayBuilder {
            keys,
            store,
            allowlist: AllowlistGate::deny_all(),
            forwarder: None,
            forward_timeout: DEFAULT_FORWARD_TIMEOUT,
            transforms: TransformRegistry::default(),
            retention: None,
            prune_on_append: false,
        }
    }

    /// Build a gateway from validated configuration.
    ///
    /// Fails without a usable signing key. Logs a warning for every kid
    /// referenced by stored receipts that the key set cannot resolve.
    pub async fn from_config(config: &GatewayConfig) -> Result<Self> {
        config.validate()?;
        let keys = config.signing.key_manager()?;
        let store = open_store(&config.ledger)?;

        let mut builder = Gateway::builder(keys, store)
            .allowlist(AllowlistGate::new(&config.egress.allowlist))
            .forward_timeout(config.egress.forward_timeout());
        if let Some(max_age) = config.ledger.retention() {
            builder = builder.retention(max_age, config.ledger.prune_on_append);
        } else if config.ledger.prune_on_append {
            return Err(ConfigError::InvalidLedger(
                "prune_on_append requires retention_max_age_secs".into(),
            )
            .into());
        }
        let gateway = builder.build()?;

        gateway.ledger.audit_keys().await?;
        tracing::info!(
            kid = %gateway.keys.active_kid(),
            keys = gateway.keys.public_keyset().len(),
            backend = ?config.ledger.backend,
            allowlisted = config.egress.allowlist.len(),
            "gateway started"
        );
        Ok(gateway)
    }

    pub fn ledger(&self) -> &ReceiptLedger {
        &self.ledger
    }

    pub fn active_kid(&self) -> &KeyId {
        self.keys.active_kid()
    }

    /// The published key set (`/.well-known/jwks.json`).
    pub fn jwks(&self) -> Jwks {
        self.keys.jwks()
    }

    /// Request metrics (`/metrics`).
    pub fn metrics(&self) -> &GatewayMetrics {
        &self.metrics
    }

    /// Accept an envelope (`POST /v1/odin/envelope`).
    ///
    /// Order: transform, content CID, allowlist check, append, sign the
    /// response, then hand off forwarding. Nothing is written when any step
    /// before the append fails. Every call is counted by response status.
    pub async fn handle_envelope(&self, envelope: Envelope) -> Result<SignedResponse<EnvelopeResponse>> {
        let started = Instant::now();
        let result = self.accept(envelope).await;
        let status = result.as_ref().map_or_else(|e| e.status_code(), |_| 200);
        self.metrics.observe(status, started.elapsed());
        result
    }

    async fn accept(&self, envelope: Envelope) -> Result<SignedResponse<EnvelopeResponse>> {
        let trace_id = envelope.resolve_trace_id()?;
        let ts = envelope.resolve_timestamp()?;

        let normalized =
            self.transforms
                .normalize(&envelope.payload, &envelope.payload_type, &envelope.target_type)?;
        let content_cid = cid_of_value(&normalized)?;

        let destination = envelope
            .forward_url
            .as_deref()
            .map(|url| self.allowlist.check(url))
            .transpose()?;

        if self.prune_on_append {
            if let Some(max_age) = self.retention {
                if let Err(e) = self.ledger.prune(max_age).await {
                    tracing::warn!(error = %e, "retention before append failed");
                }
            }
        }

        let receipt = self
            .ledger
            .append(
                &trace_id,
                content_cid,
                &envelope.payload_type,
                &envelope.target_type,
                &ts,
            )
            .await?;

        let body = EnvelopeResponse {
            trace_id: trace_id.clone(),
            receipt,
            accepted: true,
            forward: destination.as_ref().map(|url| ForwardDispatch {
                destination: url.to_string(),
            }),
        };
        let response_cid = cid_of_serialize(&body)?;
        let (signature, kid) = self.signer.sign_response(&response_cid, &trace_id, &ts)?;

        if let Some(url) = destination {
            // Detached: the handle is dropped and the outcome lands in the store.
            self.dispatcher.dispatch(&body.receipt, url, normalized);
        }

        Ok(SignedResponse {
            body,
            headers: ResponseHeaders {
                response_cid,
                signature,
                kid,
            },
        })
    }

    /// Read a chain (`GET /v1/receipts/hops/chain/{trace_id}`).
    pub async fn chain(&self, trace_id: &str) -> Result<ChainView> {
        Ok(ChainView {
            trace_id: trace_id.to_owned(),
            chain: self.ledger.read_chain(trace_id).await?,
        })
    }

    /// Export a chain (`GET /v1/receipts/export/{trace_id}`).
    pub async fn export(&self, trace_id: &str) -> Result<SignedResponse<ExportBundle>> {
        self.bundler.export(trace_id).await
    }

    pub async fn verify_chain(&self, trace_id: &str) -> Result<bool> {
        self.ledger.verify_chain(trace_id).await
    }

    /// Apply the configured retention. Returns 0 when none is configured.
    pub async fn prune(&self) -> Result<u64> {
        match self.retention {
            Some(max_age) => self.ledger.prune(max_age).await,
            None => Ok(0),
        }
    }

    /// Recorded forwarding outcomes for a receipt.
    pub async fn forward_annotations(&self, receipt: &Receipt) -> Result<Vec<ForwardAnnotation>> {
        self.ledger.annotations(&receipt.receipt_cid).await
    }
}
