//! Tracing setup.
//!
//! `RUST_LOG` wins when set; otherwise the configured default filter is used.

use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter, Layer};

use crate::config::LoggingConfig;

/// Build the filter: `RUST_LOG` if present and valid, else `default_filter`,
/// else `info`.
pub fn env_filter(default_filter: &str) -> EnvFilter {
    EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(default_filter))
        .unwrap_or_else(|_| EnvFilter::new("info"))
}

/// Install the global subscriber. Safe to call more than once; later calls
/// are ignored.
pub fn init_tracing(config: &LoggingConfig) {
    let result = tracing_subscriber::registry()
        .with(
            tracing_subscriber::fmt::layer()
                .with_target(true)
                .with_filter(env_filter(&config.default_filter)),
        )
        .try_init();

    if result.is_ok() {
        tracing::debug!("Tracing initialized");
    }
}
