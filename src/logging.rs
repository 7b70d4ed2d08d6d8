//! Tracing subscriber setup.
//!
//! `RUST_LOG` wins over the configured level. Transport adapters log every
//! message through the `log` facade under the `comm` target, so
//! `RUST_LOG=comm=debug` shows the raw wire traffic.

use tracing_subscriber::EnvFilter;

/// Install the global subscriber. Calling it twice is harmless.
pub fn init(level: &str, json: bool) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));

    let result = if json {
        tracing_subscriber::fmt()
            .json()
            .with_env_filter(filter)
            .try_init()
    } else {
        tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_target(true)
            .try_init()
    };

    if let Err(e) = result {
        tracing::debug!("logging already initialised: {}", e);
    }
}
