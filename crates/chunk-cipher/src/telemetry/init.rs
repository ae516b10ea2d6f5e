//! Tracing subscriber initialisation.

use anyhow::{Context, Result};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

/// Install the global JSON tracing subscriber.
///
/// Intended for binaries embedding the library; the library itself only emits
/// events.
///
/// # Errors
///
/// Returns an error if `log_level` is not a valid filter directive or a global
/// subscriber is already installed.
pub fn init_telemetry(log_level: &str) -> Result<()> {
    tracing_subscriber::registry()
        .with(env_filter(log_level)?)
        .with(tracing_subscriber::fmt::layer().json())
        .try_init()
        .context("failed to initialise tracing subscriber")?;

    Ok(())
}

fn env_filter(log_level: &str) -> Result<EnvFilter> {
    match EnvFilter::try_from_default_env() {
        Ok(filter) => Ok(filter),
        Err(_) => EnvFilter::try_new(log_level)
            .with_context(|| format!("invalid log level {log_level:?}")),
    }
}
