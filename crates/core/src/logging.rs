//! Structured logging initialisation.
//!
//! `RUST_LOG` takes precedence over the configured level. Logs go to stderr so
//! the console's stdout carries only operator output.

use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use crate::config::LoggingConfig;

/// Initialize the logging system from configuration.
///
/// # Example
/// ```no_run
/// use nodeauth_core::{config::LoggingConfig, logging};
///
/// logging::init(&LoggingConfig::default());
/// tracing::info!("console started");
/// ```
pub fn init(config: &LoggingConfig) {
    let filter = filter_for(config);

    if config.json {
        tracing_subscriber::registry()
            .with(filter)
            .with(fmt::layer().json().with_target(true).with_writer(std::io::stderr))
            .init();
    } else {
        tracing_subscriber::registry()
            .with(filter)
            .with(fmt::layer().with_target(true).with_writer(std::io::stderr))
            .init();
    }
}

fn filter_for(config: &LoggingConfig) -> EnvFilter {
    EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&config.level))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_filter_builds_from_config() {
        // Only one subscriber can be installed per process, so only the filter is exercised.
        let config = LoggingConfig {
            level: "nodeauth_identity=debug".to_string(),
            json: false,
        };
        let _ = filter_for(&config);
    }
}
