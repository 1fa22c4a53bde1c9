//! Envelope intake and signed responses.

use chrono::DateTime;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use odin_gateway_core::{validate_trace_id, Cid, KeyId, Receipt, Signature, Value};

use crate::error::{GatewayError, Result};
use crate::ledger::now_rfc3339;

/// Header carrying the CID of the response body (or export bundle).
pub const RESPONSE_CID_HEADER: &str = "X-ODIN-Response-CID";
/// Header carrying the base64url Ed25519 signature.
pub const SIGNATURE_HEADER: &str = "X-ODIN-Signature";
/// Header carrying the signing key id.
pub const KID_HEADER: &str = "X-ODIN-KID";

/// A structured message submitted for a receipt.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Envelope {
    pub payload: Value,
    pub payload_type: String,
    pub target_type: String,
    /// Generated (UUID v4) when absent.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub trace_id: Option<String>,
    /// RFC 3339, kept verbatim. Server time when absent.
    #[serde(default, alias = "timestamp", skip_serializing_if = "Option::is_none")]
    pub ts: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub forward_url: Option<String>,
}

impl Envelope {
    pub fn new(payload: Value, payload_type: impl Into<String>, target_type: impl Into<String>) -> Self {
        Self {
            payload,
            payload_type: payload_type.into(),
            target_type: target_type.into(),
            trace_id: None,
            ts: None,
            forward_url: None,
        }
    }

    pub fn with_trace_id(mut self, trace_id: impl Into<String>) -> Self {
        self.trace_id = Some(trace_id.into());
        self
    }

    pub fn with_timestamp(mut self, ts: impl Into<String>) -> Self {
        self.ts = Some(ts.into());
        self
    }

    pub fn with_forward_url(mut self, url: impl Into<String>) -> Self {
        self.forward_url = Some(url.into());
        self
    }

    /// Parse a JSON request body.
    pub fn from_json(body: &str) -> Result<Self> {
        serde_json::from_str(body).map_err(|e| GatewayError::InvalidEnvelope(e.to_string()))
    }

    pub(crate) fn resolve_trace_id(&self) -> Result<String> {
        match &self.trace_id {
            Some(trace_id) => {
                validate_trace_id(trace_id)?;
                Ok(trace_id.clone())
            }
            None => Ok(Uuid::new_v4().to_string()),
        }
    }

    pub(crate) fn resolve_timestamp(&self) -> Result<String> {
        match &self.ts {
            Some(ts) => {
                DateTime::parse_from_rfc3339(ts).map_err(|e| {
                    GatewayError::InvalidEnvelope(format!("ts {ts:?} is not RFC 3339: {e}"))
                })?;
                Ok(ts.clone())
            }
            None => Ok(now_rfc3339()),
        }
    }
}

/// Forwarding scheduled for an accepted envelope.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ForwardDispatch {
    pub destination: String,
}

/// Body returned for an accepted envelope.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EnvelopeResponse {
    pub trace_id: String,
    pub receipt: Receipt,
    pub accepted: bool,
    pub forward: Option<ForwardDispatch>,
}

/// Signature headers attached to a response.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResponseHeaders {
    pub response_cid: Cid,
    pub signature: Signature,
    pub kid: KeyId,
}

impl ResponseHeaders {
    /// Header name/value pairs in wire form.
    pub fn to_pairs(&self) -> [(&'static str, String); 3] {
        [
            (RESPONSE_CID_HEADER, self.response_cid.to_string()),
            (SIGNATURE_HEADER, self.signature.to_b64u()),
            (KID_HEADER, self.kid.to_string()),
        ]
    }
}

/// A response body together with its signature headers.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SignedResponse<T> {
    pub body: T,
    pub headers: ResponseHeaders,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_minimal_envelope() {
        let env = Envelope::from_json(
            r#"{"payload":{"hello":"world"},"payload_type":"vendor.event.v1","target_type":"canonical.event.v1","trace_id":"t1"}"#,
        )
        .unwrap();
        assert_eq!(env.trace_id.as_deref(), Some("t1"));
        assert!(env.ts.is_none());
        assert!(env.forward_url.is_none());
        assert_eq!(env.payload.get("hello").and_then(Value::as_str), Some("world"));
    }

    #[test]
    fn test_missing_fields_rejected() {
        assert!(Envelope::from_json(r#"{"payload":{}}"#).is_err());
        assert!(Envelope::from_json("not json").is_err());
    }

    #[test]
    fn test_generated_trace_id_is_uuid() {
        let env = Envelope::new(Value::Null, "a", "b");
        let trace_id = env.resolve_trace_id().unwrap();
        assert!(Uuid::parse_str(&trace_id).is_ok());
        assert_ne!(trace_id, env.resolve_trace_id().unwrap());
    }

    #[test]
    fn test_timestamp_kept_verbatim_or_rejected() {
        let env = Envelope::new(Value::Null, "a", "b").with_timestamp("2025-01-01T12:00:00+02:00");
        assert_eq!(env.resolve_timestamp().unwrap(), "2025-01-01T12:00:00+02:00");

        let env = Envelope::new(Value::Null, "a", "b").with_timestamp("yesterday");
        assert!(matches!(
            env.resolve_timestamp(),
            Err(GatewayError::InvalidEnvelope(_))
        ));

        let env = Envelope::new(Value::Null, "a", "b");
        assert!(DateTime::parse_from_rfc3339(&env.resolve_timestamp().unwrap()).is_ok());
    }

    #[test]
    fn test_header_pairs() {
        let keys = odin_gateway_core::KeyManager::generated();
        let cid = odin_gateway_core::cid_of(b"{}");
        let headers = ResponseHeaders {
            response_cid: cid,
            signature: keys.sign(b"x"),
            kid: keys.active_kid().clone(),
        };
        let pairs = headers.to_pairs();
        assert_eq!(pairs[0], (RESPONSE_CID_HEADER, cid.to_string()));
        assert_eq!(pairs[2].1, keys.active_kid().as_str());
    }
}
