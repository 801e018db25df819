// 📜 Logging - tracing subscriber setup for binaries embedding the core
//
// The library itself only emits tracing events; installing a subscriber is
// the embedding program's call. RUST_LOG wins over the configured filter.

use crate::config::SyncConfig;
use anyhow::{anyhow, Context, Result};
use tracing_subscriber::EnvFilter;

pub fn init_logging(default_filter: &str) -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(env_filter(default_filter)?)
        .with_target(true)
        .try_init()
        .map_err(|e| anyhow!("failed to install tracing subscriber: {e}"))
}

/// Install the subscriber using the configured `log_filter`
pub fn init_logging_from_config(config: &SyncConfig) -> Result<()> {
    init_logging(&config.log_filter)
}

fn env_filter(default_filter: &str) -> Result<EnvFilter> {
    match EnvFilter::try_from_default_env() {
        Ok(filter) => Ok(filter),
        Err(_) => EnvFilter::try_new(default_filter)
            .with_context(|| format!("invalid log filter: {default_filter}")),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_second_init_fails_cleanly() {
        let _ = init_logging("warn");
        assert!(init_logging("warn").is_err());
    }

    #[test]
    fn test_configured_filter_is_parsed() {
        if std::env::var("RUST_LOG").is_ok() {
            return;
        }
        let mut config = SyncConfig::default();
        config.log_filter = "catalog_sync=notalevel".to_string();

        let err = init_logging_from_config(&config).unwrap_err();
        assert!(err.to_string().contains("catalog_sync=notalevel"));
        assert!(env_filter(&SyncConfig::default().log_filter).is_ok());
    }
}
