//! Error types for the gateway.

use odin_gateway_core::CoreError;
use odin_gateway_store::StoreError;
use thiserror::Error;

/// Errors that can occur during gateway operations.
#[derive(Debug, Error)]
pub enum GatewayError {
    /// A value could not be canonicalized or a field failed validation.
    #[error("core error: {0}")]
    Core(#[from] CoreError),

    /// The envelope itself is malformed.
    #[error("invalid envelope: {0}")]
    InvalidEnvelope(String),

    /// The forward destination is not a usable http(s) URL.
    #[error("invalid destination: {0}")]
    InvalidDestination(String),

    /// The destination host is not on the egress allowlist.
    #[error("forwarding not permitted to host {host}")]
    ForwardingNotPermitted { host: String },

    /// No receipts exist for the trace.
    #[error("unknown trace: {0}")]
    UnknownTrace(String),

    /// Persisted records of the trace no longer decode.
    #[error("chain of trace {trace_id} is unreadable: {reason}")]
    UnreadableChain { trace_id: String, reason: String },

    /// Storage failed while appending; nothing was written.
    #[error("ledger write failed: {0}")]
    LedgerWrite(#[source] StoreError),

    /// Storage error outside the append path.
    #[error("storage error: {0}")]
    Store(#[from] StoreError),

    /// Configuration error.
    #[error("configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("metrics error: {0}")]
    Metrics(#[from] prometheus::Error),
}

impl GatewayError {
    /// HTTP status code an outer routing layer should answer with.
    pub fn status_code(&self) -> u16 {
        match self {
            GatewayError::Core(CoreError::EncodingError(_) | CoreError::InvalidField { .. }) => 400,
            GatewayError::InvalidEnvelope(_) | GatewayError::InvalidDestination(_) => 400,
            GatewayError::ForwardingNotPermitted { .. } => 403,
            GatewayError::UnknownTrace(_) => 404,
            GatewayError::Core(_)
            | GatewayError::UnreadableChain { .. }
            | GatewayError::LedgerWrite(_)
            | GatewayError::Store(_)
            | GatewayError::Config(_)
            | GatewayError::Metrics(_) => 500,
        }
    }
}

/// Startup configuration errors. All of them are fatal.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("no signing key configured")]
    MissingSigningKey,

    #[error("invalid signing key: {0}")]
    InvalidSigningKey(String),

    #[error("invalid key id: {0}")]
    InvalidKid(String),

    #[error("invalid additional public keys: {0}")]
    InvalidAdditionalKeys(String),

    #[error("invalid ledger configuration: {0}")]
    InvalidLedger(String),

    #[error("invalid egress configuration: {0}")]
    InvalidEgress(String),
}

/// Result type for gateway operations.
pub type Result<T> = std::result::Result<T, GatewayError>;
