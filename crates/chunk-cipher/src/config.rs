//! Configuration loading and validation for a [`ChunkCipher`](crate::ChunkCipher).
//!
//! Values are read from `CHUNK_CIPHER_*` environment variables. Loading fails
//! with a clear error message if any required variable is missing or invalid.

use std::time::Duration;

use anyhow::{Context, Result};
use serde::Deserialize;

use crate::envelope::CipherVariant;
use crate::key::KeySecret;

const ENV_PREFIX: &str = "CHUNK_CIPHER";

/// Validated engine configuration.
#[derive(Clone, Deserialize)]
pub struct EngineConfig {
    /// Id of the cipher variant used for new envelopes.
    #[serde(default = "default_variant")]
    pub variant: String,

    /// Upper bound on a single broker round-trip, in milliseconds.
    #[serde(default = "default_broker_timeout_ms")]
    pub broker_timeout_ms: u64,

    /// Fail decrypts whose key attributes do not verify.
    #[serde(default)]
    pub strict_attribute_integrity: bool,

    /// Standard base64 of the 32-byte secret shared with the broker. **Required.**
    pub client_secret: String,

    /// Tracing log level (e.g. `"info"`, `"debug"`).
    #[serde(default = "default_log_level")]
    pub log_level: String,
}

fn default_variant() -> String {
    CipherVariant::V2.id.into()
}
fn default_broker_timeout_ms() -> u64 {
    30_000
}
fn default_log_level() -> String {
    "info".into()
}

impl std::fmt::Debug for EngineConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EngineConfig")
            .field("variant", &self.variant)
            .field("broker_timeout_ms", &self.broker_timeout_ms)
            .field("strict_attribute_integrity", &self.strict_attribute_integrity)
            .field("client_secret", &"[REDACTED]")
            .field("log_level", &self.log_level)
            .finish()
    }
}

impl EngineConfig {
    /// Load and validate configuration from environment variables.
    ///
    /// # Errors
    ///
    /// Returns an error if any required variable is absent or cannot be parsed.
    pub fn from_env() -> Result<Self> {
        Self::from_environment(config::Environment::with_prefix(ENV_PREFIX))
    }

    fn from_environment(env: config::Environment) -> Result<Self> {
        let cfg = config::Config::builder()
            .add_source(env.try_parsing(true))
            .build()
            .context("failed to build configuration from environment")?;

        let c: EngineConfig = cfg
            .try_deserialize()
            .context("failed to deserialise configuration")?;

        c.validate()?;
        Ok(c)
    }

    /// Validate all fields, returning a descriptive error on the first failure.
    pub fn validate(&self) -> Result<()> {
        ensure_non_empty(&self.client_secret, "CHUNK_CIPHER_CLIENT_SECRET")?;
        ensure_non_empty(&self.log_level, "CHUNK_CIPHER_LOG_LEVEL")?;

        if self.broker_timeout_ms == 0 {
            anyhow::bail!("CHUNK_CIPHER_BROKER_TIMEOUT_MS must be > 0");
        }
        self.cipher_variant()?;
        self.client_secret()?;
        Ok(())
    }

    /// Resolve [`variant`](Self::variant) to a built-in cipher variant.
    pub fn cipher_variant(&self) -> Result<CipherVariant> {
        CipherVariant::from_id(&self.variant)
            .with_context(|| format!("CHUNK_CIPHER_VARIANT {:?} is not a known cipher variant", self.variant))
    }

    /// Decode [`client_secret`](Self::client_secret).
    pub fn client_secret(&self) -> Result<KeySecret> {
        KeySecret::from_base64(&self.client_secret).context("CHUNK_CIPHER_CLIENT_SECRET is invalid")
    }

    pub fn broker_timeout(&self) -> Duration {
        Duration::from_millis(self.broker_timeout_ms)
    }
}

fn ensure_non_empty(value: &str, name: &str) -> Result<()> {
    if value.trim().is_empty() {
        anyhow::bail!("{name} is required and must not be empty");
    }
    Ok(())
}
