//! Gateway configuration.
//!
//! Sources, lowest precedence first:
//!
//! 1. Built-in defaults
//! 2. Project config file (`odin-gateway.toml`)
//! 3. Environment variables (`ODIN_SECTION__KEY`, e.g. `ODIN_SIGNING__PRIVATE_KEY`)
//!
//! The configuration is loaded once at startup and never mutated.

use std::env;
use std::fmt;
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::Context;
use serde::{Deserialize, Deserializer, Serialize};

use odin_gateway_core::{Jwks, KeyId, KeyManager, Keypair};

use crate::error::ConfigError;

/// Default project config file name.
pub const CONFIG_FILE: &str = "odin-gateway.toml";

/// Placeholder decoded to `/` in allowlist entries.
const SLASH_PLACEHOLDER: &str = "__SL__";

/// Complete gateway configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct GatewayConfig {
    pub signing: SigningConfig,
    pub egress: EgressConfig,
    pub ledger: LedgerConfig,
    pub telemetry: TelemetryConfig,
}

impl GatewayConfig {
    /// Check everything that would make startup fail.
    pub fn validate(&self) -> Result<(), ConfigError> {
        self.signing.key_manager()?;
        if self.egress.forward_timeout_secs == 0 {
            return Err(ConfigError::InvalidEgress(
                "forward_timeout_secs must be positive".into(),
            ));
        }
        if self.ledger.backend != LedgerBackend::Memory && self.ledger.path.as_os_str().is_empty() {
            return Err(ConfigError::InvalidLedger(
                "path is required for persistent backends".into(),
            ));
        }
        if self.ledger.cache.enabled && self.ledger.cache.max_receipts == 0 {
            return Err(ConfigError::InvalidLedger(
                "cache.max_receipts must be positive".into(),
            ));
        }
        Ok(())
    }
}

/// Signing key material.
#[derive(Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct SigningConfig {
    /// Base64url (unpadded) 32-byte Ed25519 seed.
    pub private_key: Option<String>,
    /// Key id for the active key; derived from the public key when unset.
    pub kid: Option<String>,
    /// JWKS JSON document of rotated public keys kept for verification.
    pub additional_jwks: Option<String>,
}

impl SigningConfig {
    /// Build the key manager. Fails when the key is missing or malformed.
    pub fn key_manager(&self) -> Result<KeyManager, ConfigError> {
        let seed = self
            .private_key
            .as_deref()
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .ok_or(ConfigError::MissingSigningKey)?;
        let keypair =
            Keypair::from_b64u_seed(seed).map_err(|e| ConfigError::InvalidSigningKey(e.to_string()))?;

        let kid = self
            .kid
            .as_deref()
            .filter(|s| !s.is_empty())
            .map(KeyId::new)
            .transpose()
            .map_err(|e| ConfigError::InvalidKid(e.to_string()))?;

        let additional = Jwks::from_json(self.additional_jwks.as_deref().unwrap_or(""))
            .map_err(|e| ConfigError::InvalidAdditionalKeys(e.to_string()))?;

        KeyManager::new(keypair, kid, &additional)
            .map_err(|e| ConfigError::InvalidAdditionalKeys(e.to_string()))
    }
}

impl fmt::Debug for SigningConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SigningConfig")
            .field("private_key", &self.private_key.as_ref().map(|_| "[REDACTED]"))
            .field("kid", &self.kid)
            .field("additional_jwks", &self.additional_jwks.is_some())
            .finish()
    }
}

/// Outbound forwarding.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct EgressConfig {
    /// Permitted destination hosts. Empty denies all forwarding.
    #[serde(deserialize_with = "deserialize_host_list")]
    pub allowlist: Vec<String>,
    pub forward_timeout_secs: u64,
}

impl EgressConfig {
    pub fn forward_timeout(&self) -> Duration {
        Duration::from_secs(self.forward_timeout_secs)
    }
}

impl Default for EgressConfig {
    fn default() -> Self {
        Self {
            allowlist: Vec::new(),
            forward_timeout_secs: 10,
        }
    }
}

/// Storage backend for the receipt ledger.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LedgerBackend {
    Memory,
    #[default]
    Jsonl,
    Sqlite,
}

/// Receipt ledger storage and retention.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LedgerConfig {
    pub backend: LedgerBackend,
    /// Directory for `jsonl`, database file for `sqlite`.
    pub path: PathBuf,
    /// Receipts older than this are pruned. Unset keeps everything.
    pub retention_max_age_secs: Option<u64>,
    /// Run retention before every append.
    pub prune_on_append: bool,
    pub cache: CacheConfig,
}

impl LedgerConfig {
    pub fn retention(&self) -> Option<Duration> {
        self.retention_max_age_secs.map(Duration::from_secs)
    }
}

impl Default for LedgerConfig {
    fn default() -> Self {
        Self {
            backend: LedgerBackend::default(),
            path: PathBuf::from("odin-data"),
            retention_max_age_secs: None,
            prune_on_append: false,
            cache: CacheConfig::default(),
        }
    }
}

/// Chain read cache.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CacheConfig {
    pub enabled: bool,
    pub ttl_secs: u64,
    pub max_receipts: usize,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            ttl_secs: 300,
            max_receipts: 1000,
        }
    }
}

/// Log output.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TelemetryConfig {
    /// Emit JSON lines instead of human-readable logs.
    pub json: bool,
    /// Filter used when `RUST_LOG` is unset.
    pub filter: String,
}

impl Default for TelemetryConfig {
    fn default() -> Self {
        Self {
            json: false,
            filter: "info".into(),
        }
    }
}

/// Split a comma-separated host list, decode `__SL__` and drop blank entries.
pub fn parse_host_list(raw: &str) -> Vec<String> {
    raw.replace(SLASH_PLACEHOLDER, "/")
        .split(',')
        .map(str::trim)
        .filter(|h| !h.is_empty())
        .map(str::to_owned)
        .collect()
}

fn deserialize_host_list<'de, D>(deserializer: D) -> Result<Vec<String>, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum HostList {
        Joined(String),
        Split(Vec<String>),
    }

    Ok(match HostList::deserialize(deserializer)? {
        HostList::Joined(s) => parse_host_list(&s),
        HostList::Split(v) => v.iter().flat_map(|s| parse_host_list(s)).collect(),
    })
}

/// Configuration loader with multi-source merging.
pub struct ConfigLoader {
    project_dir: PathBuf,
    env_prefix: String,
}

impl ConfigLoader {
    /// Loader reading from the current directory and `ODIN_*` variables.
    pub fn new() -> Self {
        Self {
            project_dir: env::current_dir().unwrap_or_else(|_| PathBuf::from(".")),
            env_prefix: "ODIN".to_string(),
        }
    }

    pub fn with_project_dir(mut self, dir: impl AsRef<Path>) -> Self {
        self.project_dir = dir.as_ref().to_path_buf();
        self
    }

    /// Set the environment variable prefix (default: "ODIN").
    pub fn with_env_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.env_prefix = prefix.into();
        self
    }

    /// Load configuration from all sources with proper precedence.
    pub fn load(self) -> anyhow::Result<GatewayConfig> {
        let mut builder = config::Config::builder();

        let defaults = GatewayConfig::default();
        builder = builder.add_source(config::Config::try_from(&defaults)?);

        let project_file = self.project_dir.join(CONFIG_FILE);
        if project_file.exists() {
            builder = builder.add_source(
                config::File::from(project_file)
                    .required(false)
                    .format(config::FileFormat::Toml),
            );
        }

        builder = builder.add_source(
            config::Environment::with_prefix(&self.env_prefix)
                .prefix_separator("_")
                .separator("__")
                .try_parsing(true),
        );

        let config = builder.build().context("Failed to build configuration")?;

        let mut gateway_config: GatewayConfig = config
            .try_deserialize()
            .context("Failed to deserialize configuration")?;

        if gateway_config.ledger.path.is_relative() {
            gateway_config.ledger.path = self.project_dir.join(&gateway_config.ledger.path);
        }

        Ok(gateway_config)
    }
}

impl Default for ConfigLoader {
    fn default() -> Self {
        Self::new()
    }
}
