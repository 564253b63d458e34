use crate::config::LoggingConfig;
use tracing_subscriber::EnvFilter;

/// Install the global tracing subscriber.
///
/// `RUST_LOG` takes precedence over the configured level. Calling this more
/// than once returns an error instead of panicking.
pub fn init_tracing(config: &LoggingConfig) -> anyhow::Result<()> {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&config.level));

    let result = match config.format.as_str() {
        "json" => tracing_subscriber::fmt()
            .with_env_filter(filter)
            .json()
            .try_init(),
        "pretty" => tracing_subscriber::fmt()
            .with_env_filter(filter)
            .pretty()
            .try_init(),
        other => anyhow::bail!("unknown log format: {}", other),
    };

    result.map_err(|e| anyhow::anyhow!("failed to install tracing subscriber: {}", e))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_unknown_format() {
        let config = LoggingConfig {
            level: "debug".to_string(),
            format: "xml".to_string(),
        };
        assert!(init_tracing(&config).is_err());
    }
}
