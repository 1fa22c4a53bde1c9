//! Response signing.

use std::sync::Arc;

use odin_gateway_core::{signing_message, Cid, KeyId, KeyManager, KeyResolver, Signature};

use crate::error::Result;

/// Signs `{response_cid}|{trace_id}|{timestamp}` with the active key.
#[derive(Debug, Clone)]
pub struct EnvelopeSigner {
    keys: Arc<KeyManager>,
}

impl EnvelopeSigner {
    pub fn new(keys: Arc<KeyManager>) -> Self {
        Self { keys }
    }

    pub fn sign_response(
        &self,
        response_cid: &Cid,
        trace_id: &str,
        timestamp: &str,
    ) -> Result<(Signature, KeyId)> {
        let message = signing_message(response_cid, trace_id, timestamp)?;
        Ok((self.keys.sign(&message), self.keys.active_kid().clone()))
    }

    /// Check a response signature against any registered key.
    pub fn verify_response(
        &self,
        response_cid: &Cid,
        trace_id: &str,
        timestamp: &str,
        kid: &KeyId,
        signature: &Signature,
    ) -> Result<bool> {
        let message = signing_message(response_cid, trace_id, timestamp)?;
        Ok(self.keys.verify(kid, &message, signature)?)
    }
}
