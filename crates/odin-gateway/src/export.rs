//! Signed chain exports.

use std::sync::Arc;

use odin_gateway_core::{ExportBundle, KeyManager, StoredReceipt};
use odin_gateway_store::ReceiptStore;

use crate::envelope::{ResponseHeaders, SignedResponse};
use crate::error::{GatewayError, Result};
use crate::ledger::now_rfc3339;

/// Assembles portable bundles that verify against the published key set.
pub struct ExportBundler {
    store: Arc<dyn ReceiptStore>,
    keys: Arc<KeyManager>,
}

impl ExportBundler {
    pub fn new(store: Arc<dyn ReceiptStore>, keys: Arc<KeyManager>) -> Self {
        Self { store, keys }
    }

    /// Export the full persisted chain of `trace_id`.
    ///
    /// Chain and tombstone come from one store snapshot. The signature
    /// covers `{bundle_cid}|{trace_id}|{exported_at}` and is repeated in the
    /// response headers.
    pub async fn export(&self, trace_id: &str) -> Result<SignedResponse<ExportBundle>> {
        let snapshot = self.store.snapshot(trace_id).await?;
        if snapshot.is_empty() {
            return Err(GatewayError::UnknownTrace(trace_id.to_owned()));
        }
        let tombstone = snapshot.tombstone.clone();
        let chain = snapshot.into_receipts().map_err(|entry| {
            let reason = match entry {
                StoredReceipt::Malformed { seq, reason } => format!("seq {seq:?}: {reason}"),
                StoredReceipt::Decoded(r) => format!("seq {}", r.seq),
            };
            tracing::warn!(trace_id, %reason, "refusing to export unreadable chain");
            GatewayError::UnreadableChain {
                trace_id: trace_id.to_owned(),
                reason,
            }
        })?;

        let bundle = ExportBundle::seal(trace_id, chain, tombstone, now_rfc3339(), &self.keys)?;
        tracing::debug!(
            trace_id,
            receipts = bundle.chain.len(),
            bundle_cid = %bundle.bundle_cid,
            "exported chain"
        );

        let headers = ResponseHeaders {
            response_cid: bundle.bundle_cid,
            signature: bundle.signature,
            kid: bundle.kid.clone(),
        };
        Ok(SignedResponse {
            body: bundle,
            headers,
        })
    }
}
