//! Post-commit forwarding of accepted envelopes.
//!
//! Forwarding runs as a detached task after the receipt is committed, under
//! its own timeout. The outcome is stored as an append-only annotation keyed
//! by `receipt_cid`; the receipt itself is never touched.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use reqwest::Url;
use tokio::task::JoinHandle;

use odin_gateway_core::{Receipt, Value};
use odin_gateway_store::{ForwardAnnotation, ForwardOutcome, ReceiptStore};

use crate::error::{ConfigError, Result};
use crate::ledger::now_rfc3339;

/// Delivers a normalized payload to an allowed destination.
#[async_trait]
pub trait Forwarder: Send + Sync {
    async fn forward(&self, destination: &Url, body: &Value) -> ForwardOutcome;
}

/// JSON-over-HTTP POST forwarder.
#[derive(Debug, Clone)]
pub struct HttpForwarder {
    client: reqwest::Client,
}

impl HttpForwarder {
    pub fn new(timeout: Duration) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| ConfigError::InvalidEgress(format!("http client: {e}")))?;
        Ok(Self { client })
    }
}

#[async_trait]
impl Forwarder for HttpForwarder {
    async fn forward(&self, destination: &Url, body: &Value) -> ForwardOutcome {
        match self.client.post(destination.clone()).json(body).send().await {
            Ok(response) => ForwardOutcome::Delivered {
                status: response.status().as_u16(),
            },
            Err(e) if e.is_timeout() => ForwardOutcome::TimedOut,
            Err(e) => ForwardOutcome::Failed {
                error: e.to_string(),
            },
        }
    }
}

/// Spawns forwarding tasks and records their outcomes.
#[derive(Clone)]
pub struct ForwardDispatcher {
    forwarder: Arc<dyn Forwarder>,
    store: Arc<dyn ReceiptStore>,
    timeout: Duration,
}

impl ForwardDispatcher {
    pub fn new(forwarder: Arc<dyn Forwarder>, store: Arc<dyn ReceiptStore>, timeout: Duration) -> Self {
        Self {
            forwarder,
            store,
            timeout,
        }
    }

    /// Forward `body` for an already committed `receipt`.
    pub fn dispatch(&self, receipt: &Receipt, destination: Url, body: Value) -> ForwardHandle {
        let forwarder = Arc::clone(&self.forwarder);
        let store = Arc::clone(&self.store);
        let timeout = self.timeout;
        let receipt_cid = receipt.receipt_cid;
        let trace_id = receipt.trace_id.clone();

        let task = tokio::spawn(async move {
            let outcome = tokio::time::timeout(timeout, forwarder.forward(&destination, &body))
                .await
                .unwrap_or(ForwardOutcome::TimedOut);

            match &outcome {
                ForwardOutcome::Delivered { status } => {
                    tracing::info!(%trace_id, %receipt_cid, %destination, status, "forwarded envelope")
                }
                ForwardOutcome::Failed { error } => {
                    tracing::warn!(%trace_id, %receipt_cid, %destination, %error, "forwarding failed")
                }
                ForwardOutcome::TimedOut => {
                    tracing::warn!(%trace_id, %receipt_cid, %destination, "forwarding timed out")
                }
            }

            let annotation = ForwardAnnotation {
                receipt_cid,
                trace_id,
                destination: destination.to_string(),
                outcome,
                recorded_at: now_rfc3339(),
            };
            match store.annotate(&annotation).await {
                Ok(()) => Some(annotation),
                Err(e) => {
                    tracing::error!(%receipt_cid, error = %e, "failed to record forwarding outcome");
                    None
                }
            }
        });

        ForwardHandle { task }
    }
}

/// Handle to a detached forwarding task. Dropping it does not cancel the task.
pub struct ForwardHandle {
    task: JoinHandle<Option<ForwardAnnotation>>,
}

impl ForwardHandle {
    /// Wait for the task and return the recorded annotation.
    pub async fn wait(self) -> Option<ForwardAnnotation> {
        self.task.await.ok().flatten()
    }
}
