//! Log subscriber setup.

use tracing_subscriber::EnvFilter;

use crate::config::TelemetryConfig;

/// Install the global tracing subscriber.
///
/// `RUST_LOG` takes precedence over the configured filter. Fails if a
/// subscriber is already installed.
pub fn init(config: &TelemetryConfig) -> anyhow::Result<()> {
    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(&config.filter))
        .map_err(|e| anyhow::anyhow!("invalid log filter {:?}: {e}", config.filter))?;

    let builder = tracing_subscriber::fmt().with_env_filter(filter);
    let installed = if config.json {
        builder.json().try_init()
    } else {
        builder.try_init()
    };
    installed.map_err(|e| anyhow::anyhow!("failed to install tracing subscriber: {e}"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_init_twice_fails() {
        let config = TelemetryConfig::default();
        // Another test may already have installed a subscriber.
        let _ = init(&config);
        assert!(init(&config).is_err());
    }
}
